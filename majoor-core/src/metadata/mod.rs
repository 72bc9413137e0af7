//! Metadata enrichment.
//!
//! Extractors are pluggable behind [`MetadataExtractor`]; the built-in
//! [`HeaderProbe`] reads container headers directly (PNG/JPEG/GIF/WebP
//! dimensions, PNG text chunks for embedded workflow payloads) and never
//! shells out to external tools. Results flow into `asset_metadata` and
//! `metadata_cache` with existence guards against `assets`.

mod probe;
mod sidecar;

pub use probe::HeaderProbe;
pub use sidecar::{SidecarSync, SidecarUpdate};

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use majoor_model::{ExtractedMetadata, MetadataQuality};
use sha2::{Digest, Sha256};

use crate::db::Database;
use crate::error::Result;
use crate::params;

/// Contract for producing metadata for one filepath. Implementations must
/// be cheap to call concurrently and must not panic on malformed files.
#[async_trait]
pub trait MetadataExtractor: Send + Sync + std::fmt::Debug {
    async fn extract(&self, path: &Path) -> Result<ExtractedMetadata>;
}

/// Extractor that reports nothing; used when enrichment is disabled.
#[derive(Debug, Default)]
pub struct NoopExtractor;

#[async_trait]
impl MetadataExtractor for NoopExtractor {
    async fn extract(&self, _path: &Path) -> Result<ExtractedMetadata> {
        Ok(ExtractedMetadata {
            quality: MetadataQuality::None,
            ..Default::default()
        })
    }
}

/// Stable digest of a workflow payload, for duplicate workflow detection.
pub fn workflow_hash(workflow: &serde_json::Value) -> String {
    let canonical = workflow.to_string();
    hex::encode(Sha256::digest(canonical.as_bytes()))[..32].to_string()
}

/// Best-effort workflow type tag pulled from the payload shape.
pub fn workflow_type_of(workflow: &serde_json::Value) -> Option<String> {
    let object = workflow.as_object()?;
    if object.contains_key("nodes") {
        Some("COMFY_UI".to_string())
    } else if object.values().any(|v| {
        v.as_object()
            .map(|node| node.contains_key("class_type"))
            .unwrap_or(false)
    }) {
        Some("COMFY_API".to_string())
    } else {
        None
    }
}

/// Persist one extraction result for an already-indexed asset.
///
/// Enrichment is best-effort: it never overwrites a non-zero user rating or
/// a non-empty user tag list, and a missing asset row makes the write a
/// no-op rather than an error.
pub async fn write_enrichment(
    db: &Arc<Database>,
    filepath: &str,
    state_hash: &str,
    extracted: &ExtractedMetadata,
    max_raw_bytes: i64,
) -> Result<bool> {
    let now = chrono::Utc::now().timestamp();

    if extracted.width.is_some()
        || extracted.height.is_some()
        || extracted.duration.is_some()
    {
        db.execute(
            "UPDATE assets SET width = COALESCE(?, width), \
             height = COALESCE(?, height), duration = COALESCE(?, duration), \
             updated_at = ? WHERE filepath = ?",
            &params![
                extracted.width,
                extracted.height,
                extracted.duration,
                now,
                filepath
            ],
        )
        .await?;
    }

    let tags = majoor_model::normalize_tags(extracted.tags.iter());
    let tags_json = serde_json::to_string(&tags)?;
    let tags_text = tags.join(" ");
    let rating = extracted.rating.unwrap_or(0).clamp(0, majoor_model::MAX_RATING);
    let wf_hash = extracted.workflow.as_ref().map(workflow_hash);
    let wf_type = extracted.workflow.as_ref().and_then(workflow_type_of);
    let raw_json = match &extracted.raw {
        Some(raw) => {
            let serialized = serde_json::to_string(raw)?;
            if serialized.len() as i64 > max_raw_bytes {
                None
            } else {
                Some(serialized)
            }
        }
        None => None,
    };

    let affected = db
        .execute(
            "INSERT INTO asset_metadata (asset_id, rating, tags, tags_text, \
             workflow_hash, workflow_type, has_workflow, has_generation_data, \
             quality, raw, updated_at) \
             SELECT a.id, ?, ?, ?, ?, ?, ?, ?, ?, ?, ? FROM assets a \
             WHERE a.filepath = ? \
             ON CONFLICT(asset_id) DO UPDATE SET \
               rating = CASE WHEN asset_metadata.rating > 0 \
                             THEN asset_metadata.rating ELSE excluded.rating END, \
               tags = CASE WHEN asset_metadata.tags != '[]' \
                           THEN asset_metadata.tags ELSE excluded.tags END, \
               tags_text = CASE WHEN asset_metadata.tags != '[]' \
                                THEN asset_metadata.tags_text ELSE excluded.tags_text END, \
               workflow_hash = excluded.workflow_hash, \
               workflow_type = excluded.workflow_type, \
               has_workflow = excluded.has_workflow, \
               has_generation_data = excluded.has_generation_data, \
               quality = excluded.quality, \
               raw = excluded.raw, \
               updated_at = excluded.updated_at",
            &params![
                rating,
                tags_json,
                tags_text,
                wf_hash,
                wf_type,
                extracted.has_workflow(),
                extracted.has_generation_data(),
                extracted.quality.as_str(),
                raw_json.clone(),
                now,
                filepath
            ],
        )
        .await?;

    if affected > 0 {
        if let Some(raw) = raw_json {
            db.execute(
                "INSERT OR REPLACE INTO metadata_cache \
                 (filepath, state_hash, payload, created_at) VALUES (?, ?, ?, ?)",
                &params![filepath, state_hash, raw, now],
            )
            .await?;
        }
    }

    Ok(affected > 0)
}

/// Cached extractor output for an unchanged filesystem state, if any.
pub async fn cached_extraction(
    db: &Arc<Database>,
    filepath: &str,
    state_hash: &str,
) -> Result<Option<ExtractedMetadata>> {
    use sqlx::Row;
    let row = db
        .query_one(
            "SELECT payload FROM metadata_cache WHERE filepath = ? AND state_hash = ?",
            &params![filepath, state_hash],
        )
        .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    let payload: String = row.try_get("payload").unwrap_or_default();
    match serde_json::from_str::<ExtractedMetadata>(&payload) {
        Ok(extracted) => Ok(Some(extracted)),
        Err(_) => Ok(None),
    }
}

/// Trim the metadata cache to its retention bounds.
pub async fn prune_metadata_cache(
    db: &Arc<Database>,
    max_entries: i64,
    ttl_s: f64,
) -> Result<u64> {
    let cutoff = chrono::Utc::now().timestamp() - ttl_s as i64;
    let mut removed = db
        .execute(
            "DELETE FROM metadata_cache WHERE created_at < ?",
            &params![cutoff],
        )
        .await?;
    removed += db
        .execute(
            "DELETE FROM metadata_cache WHERE rowid IN (\
             SELECT rowid FROM metadata_cache ORDER BY created_at DESC \
             LIMIT -1 OFFSET ?)",
            &params![max_entries],
        )
        .await?;
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use majoor_config::DbConfig;

    async fn db_with_asset() -> (tempfile::TempDir, Arc<Database>) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Arc::new(
            Database::open(dir.path().join("assets.sqlite"), DbConfig::default())
                .await
                .expect("open"),
        );
        db.execute(
            "INSERT INTO assets (filepath, filename, subfolder, source, kind, ext, size_bytes, mtime) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            &params!["/out/a.png", "a.png", "", "output", "image", "png", 10, 100],
        )
        .await
        .expect("insert");
        (dir, db)
    }

    #[tokio::test]
    async fn enrichment_respects_user_rating() {
        let (_dir, db) = db_with_asset().await;
        // User sets a rating first.
        db.execute(
            "INSERT INTO asset_metadata (asset_id, rating, tags, tags_text) \
             SELECT id, 4, '[\"keep\"]', 'keep' FROM assets WHERE filepath = ?",
            &params!["/out/a.png"],
        )
        .await
        .expect("seed");

        let extracted = ExtractedMetadata {
            rating: Some(1),
            tags: vec!["auto".to_string()],
            width: Some(256),
            height: Some(256),
            quality: MetadataQuality::Full,
            ..Default::default()
        };
        let wrote = write_enrichment(&db, "/out/a.png", "h1", &extracted, 1 << 20)
            .await
            .expect("write");
        assert!(wrote);

        use sqlx::Row;
        let row = db
            .query_one(
                "SELECT m.rating, m.tags, m.quality, a.width FROM asset_metadata m \
                 JOIN assets a ON a.id = m.asset_id WHERE a.filepath = ?",
                &params!["/out/a.png"],
            )
            .await
            .expect("query")
            .expect("row");
        assert_eq!(row.try_get::<i64, _>("rating").unwrap(), 4);
        assert_eq!(row.try_get::<String, _>("tags").unwrap(), "[\"keep\"]");
        assert_eq!(row.try_get::<String, _>("quality").unwrap(), "full");
        assert_eq!(row.try_get::<i64, _>("width").unwrap(), 256);
    }

    #[tokio::test]
    async fn enrichment_is_noop_for_unknown_asset() {
        let (_dir, db) = db_with_asset().await;
        let extracted = ExtractedMetadata::degraded();
        let wrote = write_enrichment(&db, "/out/missing.png", "h", &extracted, 1 << 20)
            .await
            .expect("write");
        assert!(!wrote);
    }

    #[test]
    fn workflow_type_detection() {
        let ui = serde_json::json!({"nodes": [], "links": []});
        assert_eq!(workflow_type_of(&ui).as_deref(), Some("COMFY_UI"));
        let api = serde_json::json!({"3": {"class_type": "KSampler"}});
        assert_eq!(workflow_type_of(&api).as_deref(), Some("COMFY_API"));
        let other = serde_json::json!({"foo": 1});
        assert_eq!(workflow_type_of(&other), None);
    }
}

//! Duplicate detection: exact groups by content hash, near-duplicate
//! groups by perceptual hash within a Hamming bound.
//!
//! Content hashes are computed lazily, a bounded number per analyze call,
//! so the first analysis of a large library converges over a few passes
//! instead of stalling one request.

use std::collections::HashMap;
use std::path::Path;

use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::Row;

use crate::db::SqlValue;
use crate::error::Result;
use crate::params;
use crate::search::{listed_from_row, ListedAsset, SearchEngine};

/// Files hashed per analyze call; keeps one request bounded.
const HASH_BATCH_LIMIT: usize = 500;
/// Perceptual hashes compared pairwise per call.
const PERCEPTUAL_SCAN_LIMIT: usize = 2000;
pub const DEFAULT_HAMMING_BOUND: u32 = 8;

#[derive(Debug, Clone, Serialize)]
pub struct DuplicateGroup {
    pub hash: String,
    /// "content" for exact groups, "perceptual" for near-duplicates.
    pub kind: String,
    pub assets: Vec<ListedAsset>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DuplicateReport {
    pub groups: Vec<DuplicateGroup>,
    /// Files hashed during this call.
    pub hashed_now: u64,
    /// Files still awaiting a content hash.
    pub pending: i64,
}

fn hamming_distance_hex(a: &str, b: &str) -> Option<u32> {
    if a.len() != b.len() {
        return None;
    }
    let mut distance = 0u32;
    for (ca, cb) in a.chars().zip(b.chars()) {
        let xa = ca.to_digit(16)?;
        let xb = cb.to_digit(16)?;
        distance += (xa ^ xb).count_ones();
    }
    Some(distance)
}

impl SearchEngine {
    /// Hash a bounded slice of unhashed assets, then report duplicate
    /// groups across the whole index.
    pub async fn analyze_duplicates(
        &self,
        hamming_bound: u32,
    ) -> Result<DuplicateReport> {
        let hashed_now = self.compute_missing_hashes(HASH_BATCH_LIMIT).await?;

        let pending_row = self
            .db()
            .query_one(
                "SELECT COUNT(*) AS n FROM assets WHERE hash_state = 'none'",
                &[],
            )
            .await?;
        let pending: i64 = pending_row
            .and_then(|row| row.try_get("n").ok())
            .unwrap_or(0);

        let mut groups = self.content_groups().await?;
        groups.extend(self.perceptual_groups(hamming_bound).await?);
        Ok(DuplicateReport {
            groups,
            hashed_now,
            pending,
        })
    }

    async fn compute_missing_hashes(&self, limit: usize) -> Result<u64> {
        let rows = self
            .db()
            .query(
                "SELECT filepath FROM assets WHERE hash_state = 'none' \
                 ORDER BY mtime DESC LIMIT ?",
                &params![limit],
            )
            .await?;
        let mut hashed = 0u64;
        for row in rows {
            let filepath: String = row.try_get("filepath")?;
            let fs_path = filepath.clone();
            let digest = tokio::task::spawn_blocking(move || {
                hash_file(Path::new(&fs_path))
            })
            .await
            .ok()
            .flatten();
            match digest {
                Some(content_hash) => {
                    self.db()
                        .execute(
                            "UPDATE assets SET content_hash = ?, \
                             hash_state = 'computed' WHERE filepath = ?",
                            &params![content_hash, filepath],
                        )
                        .await?;
                    hashed += 1;
                }
                None => {
                    self.db()
                        .execute(
                            "UPDATE assets SET hash_state = 'failed' \
                             WHERE filepath = ?",
                            &params![filepath],
                        )
                        .await?;
                }
            }
        }
        Ok(hashed)
    }

    async fn content_groups(&self) -> Result<Vec<DuplicateGroup>> {
        let rows = self
            .db()
            .query(
                "SELECT content_hash, COUNT(*) AS n FROM assets \
                 WHERE content_hash IS NOT NULL \
                 GROUP BY content_hash HAVING n > 1 \
                 ORDER BY n DESC LIMIT 200",
                &[],
            )
            .await?;
        let mut groups = Vec::new();
        for row in rows {
            let hash: String = row.try_get("content_hash")?;
            let members = self
                .db()
                .query(
                    &format!(
                        "SELECT {} FROM assets a \
                         LEFT JOIN asset_metadata m ON m.asset_id = a.id \
                         WHERE a.content_hash = ? \
                         ORDER BY a.mtime DESC",
                        super::SELECT_COLUMNS
                    ),
                    &params![hash.clone()],
                )
                .await?;
            let assets: Vec<ListedAsset> =
                members.iter().map(listed_from_row).collect::<Result<_>>()?;
            groups.push(DuplicateGroup {
                hash,
                kind: "content".to_string(),
                assets,
            });
        }
        Ok(groups)
    }

    async fn perceptual_groups(
        &self,
        hamming_bound: u32,
    ) -> Result<Vec<DuplicateGroup>> {
        if hamming_bound == 0 {
            return Ok(Vec::new());
        }
        let rows = self
            .db()
            .query(
                "SELECT id, perceptual_hash FROM assets \
                 WHERE perceptual_hash IS NOT NULL LIMIT ?",
                &params![PERCEPTUAL_SCAN_LIMIT],
            )
            .await?;
        let mut hashes: Vec<(i64, String)> = Vec::with_capacity(rows.len());
        for row in rows {
            hashes.push((row.try_get("id")?, row.try_get("perceptual_hash")?));
        }

        // Greedy clustering: each unclaimed hash seeds a group of all
        // neighbors within the bound.
        let mut claimed = vec![false; hashes.len()];
        let mut groups = Vec::new();
        for i in 0..hashes.len() {
            if claimed[i] {
                continue;
            }
            let mut member_ids = vec![hashes[i].0];
            for j in (i + 1)..hashes.len() {
                if claimed[j] {
                    continue;
                }
                if let Some(distance) =
                    hamming_distance_hex(&hashes[i].1, &hashes[j].1)
                {
                    if distance <= hamming_bound {
                        claimed[j] = true;
                        member_ids.push(hashes[j].0);
                    }
                }
            }
            if member_ids.len() < 2 {
                continue;
            }
            claimed[i] = true;
            let ids: Vec<SqlValue> =
                member_ids.iter().map(|id| SqlValue::Int(*id)).collect();
            let members = self
                .db()
                .query_in(
                    &format!(
                        "SELECT {} FROM assets a \
                         LEFT JOIN asset_metadata m ON m.asset_id = a.id \
                         WHERE a.id IN ({{IN}})",
                        super::SELECT_COLUMNS
                    ),
                    &[],
                    &ids,
                )
                .await?;
            let assets: Vec<ListedAsset> =
                members.iter().map(listed_from_row).collect::<Result<_>>()?;
            groups.push(DuplicateGroup {
                hash: hashes[i].1.clone(),
                kind: "perceptual".to_string(),
                assets,
            });
        }
        Ok(groups)
    }

    /// Counters for the duplicates status endpoint.
    pub async fn duplicates_status(&self) -> Result<HashMap<String, i64>> {
        let mut out = HashMap::new();
        for (key, sql) in [
            ("total", "SELECT COUNT(*) AS n FROM assets"),
            (
                "hashed",
                "SELECT COUNT(*) AS n FROM assets WHERE hash_state = 'computed'",
            ),
            (
                "pending",
                "SELECT COUNT(*) AS n FROM assets WHERE hash_state = 'none'",
            ),
            (
                "failed",
                "SELECT COUNT(*) AS n FROM assets WHERE hash_state = 'failed'",
            ),
        ] {
            let row = self.db().query_one(sql, &[]).await?;
            out.insert(
                key.to_string(),
                row.and_then(|row| row.try_get("n").ok()).unwrap_or(0),
            );
        }
        Ok(out)
    }
}

fn hash_file(path: &Path) -> Option<String> {
    use std::io::Read;
    let mut file = std::fs::File::open(path).ok()?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer).ok()?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Some(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::tests::engine_with_fixtures;

    #[test]
    fn hamming_distance_counts_bits() {
        assert_eq!(hamming_distance_hex("ff", "ff"), Some(0));
        assert_eq!(hamming_distance_hex("f0", "0f"), Some(8));
        assert_eq!(hamming_distance_hex("00", "01"), Some(1));
        assert_eq!(hamming_distance_hex("abc", "ab"), None);
    }

    #[tokio::test]
    async fn identical_files_group_by_content_hash() {
        let (_dir, db, engine) = engine_with_fixtures().await;
        let base = engine.registry().output_root();
        std::fs::write(base.join("one.png"), b"same bytes").expect("write");
        std::fs::write(base.join("two.png"), b"same bytes").expect("write");
        std::fs::write(base.join("other.png"), b"different").expect("write");
        let policy = engine.registry().policy();
        for name in ["one.png", "two.png", "other.png"] {
            let key = policy.canonical_key(&base.join(name));
            db.execute(
                "INSERT INTO assets (filepath, filename, subfolder, source, kind, ext, size_bytes, mtime) \
                 VALUES (?, ?, '', 'output', 'image', 'png', 10, 1)",
                &params![key, name],
            )
            .await
            .expect("insert");
        }

        let report = engine
            .analyze_duplicates(DEFAULT_HAMMING_BOUND)
            .await
            .expect("analyze");
        assert_eq!(report.hashed_now, 3);
        assert_eq!(report.pending, 0);
        let content: Vec<&DuplicateGroup> = report
            .groups
            .iter()
            .filter(|g| g.kind == "content")
            .collect();
        assert_eq!(content.len(), 1);
        assert_eq!(content[0].assets.len(), 2);
    }

    #[tokio::test]
    async fn perceptual_groups_respect_bound() {
        let (_dir, db, engine) = engine_with_fixtures().await;
        let rows: &[(&str, &str)] = &[
            ("/out/a.png", "00000000"),
            ("/out/b.png", "00000001"),
            ("/out/c.png", "ffffffff"),
        ];
        for (filepath, phash) in rows {
            db.execute(
                "INSERT INTO assets (filepath, filename, subfolder, source, kind, ext, \
                 size_bytes, mtime, perceptual_hash, hash_state, content_hash) \
                 VALUES (?, 'x.png', '', 'output', 'image', 'png', 1, 1, ?, 'computed', ?)",
                &params![*filepath, *phash, *filepath],
            )
            .await
            .expect("insert");
        }
        let report = engine.analyze_duplicates(4).await.expect("analyze");
        let perceptual: Vec<&DuplicateGroup> = report
            .groups
            .iter()
            .filter(|g| g.kind == "perceptual")
            .collect();
        assert_eq!(perceptual.len(), 1);
        assert_eq!(perceptual[0].assets.len(), 2);
    }
}

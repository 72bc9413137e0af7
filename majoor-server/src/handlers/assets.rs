//! Mutating asset endpoints: rating, tags, delete, rename, open-in-folder.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use majoor_core::metadata::SidecarUpdate;
use majoor_core::{AssetError, SqlValue, WriteOperation};
use majoor_model::ErrorCode;
use serde_json::{json, Value};
use sqlx::Row;
use tracing::{info, warn};

use crate::envelope::Envelope;
use crate::state::AppState;

const WRITE_RATE_LIMIT: (usize, u64) = (30, 60);
const DELETE_RATE_LIMIT: (usize, u64) = (20, 60);

/// Resolve the target asset id from `asset_id` or `filepath` in the body,
/// indexing the file on demand when only a path is supplied.
async fn resolve_asset_id(state: &AppState, body: &Value) -> Result<i64, AssetError> {
    if let Some(id) = body.get("asset_id").and_then(Value::as_i64) {
        if id > 0 {
            return Ok(id);
        }
    }
    let filepath = body
        .get("filepath")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or("");
    if filepath.is_empty() {
        return Err(AssetError::invalid("Provide asset_id or filepath"));
    }
    let normalized = majoor_core::roots::normalize_path(filepath)
        .ok_or_else(|| AssetError::invalid("Invalid filepath"))?;
    state.indexer.resolve_or_create(&normalized).await
}

async fn fetch_asset_row(
    state: &AppState,
    asset_id: i64,
) -> Result<(String, i64, Vec<String>), AssetError> {
    let row = state
        .db
        .query_one(
            "SELECT a.filepath, COALESCE(m.rating, 0) AS rating, \
             COALESCE(m.tags, '[]') AS tags \
             FROM assets a LEFT JOIN asset_metadata m ON m.asset_id = a.id \
             WHERE a.id = ?",
            &majoor_core::params![asset_id],
        )
        .await?
        .ok_or_else(|| AssetError::NotFound(format!("Asset not found: {asset_id}")))?;
    let filepath: String = row.try_get("filepath")?;
    let rating: i64 = row.try_get("rating").unwrap_or(0);
    let tags: Vec<String> = row
        .try_get::<String, _>("tags")
        .ok()
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default();
    Ok((filepath, rating, tags))
}

fn sidecar_sync_requested(headers: &HeaderMap) -> bool {
    headers
        .get("x-mjr-sidecar-sync")
        .and_then(|value| value.to_str().ok())
        .map(|raw| {
            matches!(
                raw.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(false)
}

pub async fn update_rating(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Envelope {
    let ctx = state.request_context(&axum::http::Method::POST, &headers, &addr);
    if let Err(err) =
        state.rate_limit(&ctx, "asset_rating", WRITE_RATE_LIMIT.0, WRITE_RATE_LIMIT.1)
    {
        return err.into();
    }
    if let Err(err) = state.write_guard(&ctx, WriteOperation::Write).await {
        return err.into();
    }
    let payload = match state.parse_json_body(&body) {
        Ok(payload) => payload,
        Err(err) => return err.into(),
    };

    let Some(rating) = payload.get("rating").and_then(Value::as_i64) else {
        return Envelope::err(ErrorCode::InvalidInput, "Missing rating");
    };
    if !(0..=majoor_model::MAX_RATING).contains(&rating) {
        return Envelope::err(
            ErrorCode::InvalidInput,
            format!("Rating must be between 0 and {}", majoor_model::MAX_RATING),
        );
    }

    let asset_id = match resolve_asset_id(&state, &payload).await {
        Ok(id) => id,
        Err(err) => return err.into(),
    };

    let now = chrono::Utc::now().timestamp();
    let result = state
        .db
        .execute(
            "INSERT INTO asset_metadata (asset_id, rating, updated_at) \
             SELECT id, ?, ? FROM assets WHERE id = ? \
             ON CONFLICT(asset_id) DO UPDATE SET \
               rating = excluded.rating, updated_at = excluded.updated_at",
            &majoor_core::params![rating, now, asset_id],
        )
        .await;
    if let Err(err) = result {
        return AssetError::from(err_as_update(err)).into();
    }

    if sidecar_sync_requested(&headers) {
        if let Ok((filepath, rating, tags)) = fetch_asset_row(&state, asset_id).await {
            state.sidecar.push(SidecarUpdate {
                filepath,
                rating,
                tags,
            });
        }
    }

    match state.search.asset_by_id(asset_id).await {
        Ok(Some(asset)) => Envelope::ok(asset),
        Ok(None) => Envelope::err(ErrorCode::NotFound, "Asset vanished during update"),
        Err(err) => err.into(),
    }
}

fn err_as_update(err: AssetError) -> AssetError {
    match err {
        AssetError::Db(inner) => {
            AssetError::Internal(format!("update failed: {inner}"))
        }
        other => other,
    }
}

pub async fn update_tags(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Envelope {
    let ctx = state.request_context(&axum::http::Method::POST, &headers, &addr);
    if let Err(err) =
        state.rate_limit(&ctx, "asset_tags", WRITE_RATE_LIMIT.0, WRITE_RATE_LIMIT.1)
    {
        return err.into();
    }
    if let Err(err) = state.write_guard(&ctx, WriteOperation::Write).await {
        return err.into();
    }
    let payload = match state.parse_json_body(&body) {
        Ok(payload) => payload,
        Err(err) => return err.into(),
    };

    let Some(raw_tags) = payload.get("tags").and_then(Value::as_array) else {
        return Envelope::err(ErrorCode::InvalidInput, "tags must be a list");
    };
    let tags = majoor_model::normalize_tags(
        raw_tags.iter().filter_map(Value::as_str),
    );
    let tags_json = match serde_json::to_string(&tags) {
        Ok(json) => json,
        Err(err) => return AssetError::from(err).into(),
    };
    let tags_text = tags.join(" ");

    let asset_id = match resolve_asset_id(&state, &payload).await {
        Ok(id) => id,
        Err(err) => return err.into(),
    };

    let now = chrono::Utc::now().timestamp();
    let result = state
        .db
        .execute(
            "INSERT INTO asset_metadata (asset_id, tags, tags_text, updated_at) \
             SELECT id, ?, ?, ? FROM assets WHERE id = ? \
             ON CONFLICT(asset_id) DO UPDATE SET \
               tags = excluded.tags, tags_text = excluded.tags_text, \
               updated_at = excluded.updated_at",
            &majoor_core::params![tags_json, tags_text, now, asset_id],
        )
        .await;
    if let Err(err) = result {
        return AssetError::from(err_as_update(err)).into();
    }

    if sidecar_sync_requested(&headers) {
        if let Ok((filepath, rating, tags)) = fetch_asset_row(&state, asset_id).await {
            state.sidecar.push(SidecarUpdate {
                filepath,
                rating,
                tags,
            });
        }
    }

    match state.search.asset_by_id(asset_id).await {
        Ok(Some(asset)) => Envelope::ok(asset),
        Ok(None) => Envelope::err(ErrorCode::NotFound, "Asset vanished during update"),
        Err(err) => err.into(),
    }
}

fn confine_asset_path(state: &AppState, filepath: &str) -> Result<PathBuf, AssetError> {
    let path = PathBuf::from(filepath);
    let resolved = majoor_core::roots::resolve_lenient(&path);
    if state.registry.is_path_allowed(&resolved, false)
        || state.registry.is_path_allowed_custom(&resolved)
    {
        Ok(resolved)
    } else {
        Err(AssetError::Forbidden(
            "Path is not within allowed roots".to_string(),
        ))
    }
}

fn delete_file_best_effort(path: &Path) -> Result<(), AssetError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(AssetError::DeleteFailed(err.to_string())),
    }
}

async fn delete_asset_rows(state: &AppState, ids: &[i64]) -> Result<(), AssetError> {
    let values: Vec<SqlValue> = ids.iter().map(|id| SqlValue::Int(*id)).collect();
    state
        .db
        .execute_in(
            "DELETE FROM scan_journal WHERE filepath IN \
             (SELECT filepath FROM assets WHERE id IN ({IN}))",
            &[],
            &values,
        )
        .await?;
    state
        .db
        .execute_in("DELETE FROM assets WHERE id IN ({IN})", &[], &values)
        .await?;
    Ok(())
}

pub async fn delete_asset(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Envelope {
    let ctx = state.request_context(&axum::http::Method::POST, &headers, &addr);
    if let Err(err) =
        state.rate_limit(&ctx, "asset_delete", DELETE_RATE_LIMIT.0, DELETE_RATE_LIMIT.1)
    {
        return err.into();
    }
    if let Err(err) = state.write_guard(&ctx, WriteOperation::Delete).await {
        return err.into();
    }
    let payload = match state.parse_json_body(&body) {
        Ok(payload) => payload,
        Err(err) => return err.into(),
    };
    let asset_id = match resolve_asset_id(&state, &payload).await {
        Ok(id) => id,
        Err(err) => return err.into(),
    };
    let (filepath, ..) = match fetch_asset_row(&state, asset_id).await {
        Ok(row) => row,
        Err(err) => return err.into(),
    };
    let path = match confine_asset_path(&state, &filepath) {
        Ok(path) => path,
        Err(err) => return err.into(),
    };
    if let Err(err) = delete_file_best_effort(&path) {
        return err.into();
    }
    if let Err(err) = delete_asset_rows(&state, &[asset_id]).await {
        return err.into();
    }
    info!(asset_id, "asset deleted");
    Envelope::ok(json!({ "deleted": 1 }))
}

pub async fn delete_assets(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Envelope {
    let ctx = state.request_context(&axum::http::Method::POST, &headers, &addr);
    if let Err(err) = state.rate_limit(
        &ctx,
        "assets_delete",
        DELETE_RATE_LIMIT.0,
        DELETE_RATE_LIMIT.1,
    ) {
        return err.into();
    }
    if let Err(err) = state.write_guard(&ctx, WriteOperation::Delete).await {
        return err.into();
    }
    let payload = match state.parse_json_body(&body) {
        Ok(payload) => payload,
        Err(err) => return err.into(),
    };
    let Some(raw_ids) = payload.get("ids").and_then(Value::as_array) else {
        return Envelope::err(ErrorCode::InvalidInput, "ids must be a list");
    };
    let ids: Vec<i64> = raw_ids
        .iter()
        .filter_map(Value::as_i64)
        .filter(|id| *id > 0)
        .take(state.search.config().max_batch_ids)
        .collect();
    if ids.is_empty() {
        return Envelope::err(ErrorCode::InvalidInput, "No valid ids provided");
    }

    let mut deleted_ids = Vec::new();
    let mut failed_ids = Vec::new();
    let mut errors = serde_json::Map::new();
    for id in ids {
        let (filepath, ..) = match fetch_asset_row(&state, id).await {
            Ok(row) => row,
            Err(err) => {
                failed_ids.push(id);
                errors.insert(id.to_string(), Value::String(err.to_string()));
                continue;
            }
        };
        let path = match confine_asset_path(&state, &filepath) {
            Ok(path) => path,
            Err(err) => {
                failed_ids.push(id);
                errors.insert(id.to_string(), Value::String(err.to_string()));
                continue;
            }
        };
        match delete_file_best_effort(&path) {
            Ok(()) => deleted_ids.push(id),
            Err(err) => {
                warn!(id, "bulk delete failed for file: {err}");
                failed_ids.push(id);
                errors.insert(
                    id.to_string(),
                    Value::String(
                        majoor_core::error::sanitize_error_message(
                            &err.to_string(),
                            "Failed to delete file",
                        ),
                    ),
                );
            }
        }
    }
    // Rows disappear only for files that actually left the disk.
    if !deleted_ids.is_empty() {
        if let Err(err) = delete_asset_rows(&state, &deleted_ids).await {
            return err.into();
        }
    }

    let partial = !failed_ids.is_empty();
    Envelope::ok_with_meta(
        json!({
            "deleted_ids": deleted_ids,
            "failed_ids": failed_ids,
            "errors": errors,
        }),
        json!({ "partial": partial }),
    )
}

/// Validate a replacement filename: no separators, traversal, NUL, or
/// control characters, bounded length.
fn validate_new_name(name: &str) -> Result<(), AssetError> {
    let name = name.trim();
    if name.is_empty() || name.len() > 255 {
        return Err(AssetError::invalid("Invalid new_name"));
    }
    if name.contains(['/', '\\', '\0', ':'])
        || name == "."
        || name == ".."
        || name.chars().any(char::is_control)
    {
        return Err(AssetError::invalid("Invalid new_name"));
    }
    Ok(())
}

pub async fn rename_asset(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Envelope {
    let ctx = state.request_context(&axum::http::Method::POST, &headers, &addr);
    if let Err(err) =
        state.rate_limit(&ctx, "asset_rename", WRITE_RATE_LIMIT.0, WRITE_RATE_LIMIT.1)
    {
        return err.into();
    }
    if let Err(err) = state.write_guard(&ctx, WriteOperation::Rename).await {
        return err.into();
    }
    let payload = match state.parse_json_body(&body) {
        Ok(payload) => payload,
        Err(err) => return err.into(),
    };
    let new_name = payload
        .get("new_name")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or("");
    if let Err(err) = validate_new_name(new_name) {
        return err.into();
    }
    let asset_id = match resolve_asset_id(&state, &payload).await {
        Ok(id) => id,
        Err(err) => return err.into(),
    };
    let (filepath, ..) = match fetch_asset_row(&state, asset_id).await {
        Ok(row) => row,
        Err(err) => return err.into(),
    };
    let source_path = match confine_asset_path(&state, &filepath) {
        Ok(path) => path,
        Err(err) => return err.into(),
    };
    let Some(parent) = source_path.parent() else {
        return Envelope::err(ErrorCode::RenameFailed, "Asset has no parent directory");
    };
    let target_path = parent.join(new_name);

    let policy = state.registry.policy();
    let same_file_case_rename = policy.case_insensitive
        && policy.canonical_key(&target_path) == policy.canonical_key(&source_path);
    if target_path.exists() && !same_file_case_rename {
        return Envelope::err(
            ErrorCode::Conflict,
            format!("Target already exists: {new_name}"),
        );
    }

    if let Err(err) = std::fs::rename(&source_path, &target_path) {
        return AssetError::RenameFailed(err.to_string()).into();
    }

    let new_key = policy.canonical_key(&target_path);
    let now = chrono::Utc::now().timestamp();
    let update = state
        .db
        .execute(
            "UPDATE assets SET filepath = ?, filename = ?, updated_at = ? \
             WHERE id = ?",
            &majoor_core::params![new_key.clone(), new_name, now, asset_id],
        )
        .await;
    if let Err(err) = update {
        // Roll the physical rename back so disk and index stay aligned.
        if let Err(undo) = std::fs::rename(&target_path, &source_path) {
            warn!("rename rollback failed: {undo}");
        }
        return AssetError::from(err_as_update(err)).into();
    }
    let old_key = policy.canonical_key(&source_path);
    let _ = state
        .db
        .execute(
            "UPDATE OR REPLACE scan_journal SET filepath = ? WHERE filepath = ?",
            &majoor_core::params![new_key, old_key],
        )
        .await;

    match state.search.asset_by_id(asset_id).await {
        Ok(Some(asset)) => Envelope::ok(asset),
        Ok(None) => Envelope::err(ErrorCode::NotFound, "Asset vanished during rename"),
        Err(err) => err.into(),
    }
}

pub async fn open_in_folder(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Envelope {
    let ctx = state.request_context(&axum::http::Method::POST, &headers, &addr);
    if let Err(err) = state.write_guard(&ctx, WriteOperation::OpenInFolder).await {
        return err.into();
    }
    // Shelling out to a desktop opener only makes sense for the machine
    // the server runs on.
    if !majoor_core::security::is_loopback_ip(&state.security.resolve_client_ip(&ctx)) {
        return Envelope::err(ErrorCode::Forbidden, "open-in-folder is loopback-only");
    }
    let payload = match state.parse_json_body(&body) {
        Ok(payload) => payload,
        Err(err) => return err.into(),
    };
    let asset_id = match resolve_asset_id(&state, &payload).await {
        Ok(id) => id,
        Err(err) => return err.into(),
    };
    let (filepath, ..) = match fetch_asset_row(&state, asset_id).await {
        Ok(row) => row,
        Err(err) => return err.into(),
    };
    let path = match confine_asset_path(&state, &filepath) {
        Ok(path) => path,
        Err(err) => return err.into(),
    };

    let (selected, result) = spawn_opener(&path);
    match result {
        Ok(()) => Envelope::ok(json!({ "opened": true, "selected": selected })),
        Err(err) => Envelope::ok(json!({
            "opened": false,
            "selected": false,
            "fallback": majoor_core::error::sanitize_error_message(
                &err.to_string(),
                "Could not open file manager",
            ),
        })),
    }
}

fn spawn_opener(path: &Path) -> (bool, std::io::Result<()>) {
    #[cfg(target_os = "windows")]
    {
        let arg = format!("/select,{}", path.display());
        (
            true,
            std::process::Command::new("explorer").arg(arg).spawn().map(|_| ()),
        )
    }
    #[cfg(target_os = "macos")]
    {
        (
            true,
            std::process::Command::new("open")
                .arg("-R")
                .arg(path)
                .spawn()
                .map(|_| ()),
        )
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        let parent = path.parent().unwrap_or(path);
        (
            false,
            std::process::Command::new("xdg-open")
                .arg(parent)
                .spawn()
                .map(|_| ()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_name_validation() {
        assert!(validate_new_name("image.png").is_ok());
        assert!(validate_new_name("").is_err());
        assert!(validate_new_name("a/b.png").is_err());
        assert!(validate_new_name("..").is_err());
        assert!(validate_new_name("a\0b").is_err());
        assert!(validate_new_name(&"x".repeat(300)).is_err());
    }
}

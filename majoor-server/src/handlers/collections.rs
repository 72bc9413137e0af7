//! Collection endpoints: JSON-file-backed, ids hydrated on read.

use std::net::SocketAddr;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use majoor_core::{SqlValue, WriteOperation};
use majoor_model::ErrorCode;
use serde_json::{json, Value};
use sqlx::Row;

use crate::envelope::Envelope;
use crate::state::AppState;

/// Map collection filepaths to their current index ids; unindexed entries
/// hydrate to null.
async fn hydrate_ids(
    state: &AppState,
    filepaths: &[String],
) -> majoor_core::Result<Vec<Value>> {
    let lookups: Vec<SqlValue> = filepaths
        .iter()
        .map(|filepath| {
            SqlValue::Text(state.registry.policy().canonical_key_str(filepath))
        })
        .collect();
    let mut ids = std::collections::HashMap::new();
    if !lookups.is_empty() {
        let rows = state
            .db
            .query_in(
                "SELECT filepath, id FROM assets WHERE filepath IN ({IN})",
                &[],
                &lookups,
            )
            .await?;
        for row in rows {
            let filepath: String = row.try_get("filepath")?;
            let id: i64 = row.try_get("id")?;
            ids.insert(filepath, id);
        }
    }
    Ok(filepaths
        .iter()
        .map(|filepath| {
            let key = state.registry.policy().canonical_key_str(filepath);
            json!({
                "filepath": filepath,
                "id": ids.get(&key).copied(),
            })
        })
        .collect())
}

pub async fn list_collections(State(state): State<AppState>) -> Envelope {
    let mut out = Vec::new();
    for collection in state.collections.list() {
        let items = match hydrate_ids(&state, &collection.filepaths).await {
            Ok(items) => items,
            Err(err) => return err.into(),
        };
        out.push(json!({
            "id": collection.id,
            "name": collection.name,
            "created_at": collection.created_at,
            "items": items,
        }));
    }
    Envelope::ok(out)
}

pub async fn create_collection(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Envelope {
    let ctx = state.request_context(&axum::http::Method::POST, &headers, &addr);
    if let Err(err) = state.write_guard(&ctx, WriteOperation::Write).await {
        return err.into();
    }
    let payload = match state.parse_json_body(&body) {
        Ok(payload) => payload,
        Err(err) => return err.into(),
    };
    let Some(name) = payload.get("name").and_then(Value::as_str) else {
        return Envelope::err(ErrorCode::InvalidInput, "Missing name");
    };
    let filepaths: Vec<String> = payload
        .get("filepaths")
        .and_then(Value::as_array)
        .map(|raw| {
            raw.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    crate::envelope::respond(state.collections.create(name, filepaths))
}

pub async fn remove_collection(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Envelope {
    let ctx = state.request_context(&axum::http::Method::POST, &headers, &addr);
    if let Err(err) = state.write_guard(&ctx, WriteOperation::Write).await {
        return err.into();
    }
    let payload = match state.parse_json_body(&body) {
        Ok(payload) => payload,
        Err(err) => return err.into(),
    };
    let Some(id) = payload.get("id").and_then(Value::as_str) else {
        return Envelope::err(ErrorCode::InvalidInput, "Missing id");
    };
    match state.collections.remove(id) {
        Ok(()) => Envelope::ok(json!({ "removed": id })),
        Err(err) => err.into(),
    }
}

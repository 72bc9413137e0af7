//! Manual scan endpoint.

use std::net::SocketAddr;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use majoor_core::WriteOperation;
use majoor_model::{AssetSource, ScanRequest};
use serde_json::Value;

use crate::envelope::Envelope;
use crate::state::AppState;

const SCAN_RATE_LIMIT: (usize, u64) = (10, 60);

pub async fn scan(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Envelope {
    let ctx = state.request_context(&axum::http::Method::POST, &headers, &addr);
    if let Err(err) = state.rate_limit(&ctx, "scan", SCAN_RATE_LIMIT.0, SCAN_RATE_LIMIT.1)
    {
        return err.into();
    }
    // Scanning mutates the index but not user files; the plain write gate
    // applies.
    if let Err(err) = state.write_guard(&ctx, WriteOperation::Write).await {
        return err.into();
    }
    if let Err(err) = state.maintenance.ensure_inactive() {
        return err.into();
    }
    let payload = match state.parse_json_body(&body) {
        Ok(payload) => payload,
        Err(err) => return err.into(),
    };

    let root = payload
        .get("root")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|root| !root.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| {
            state.registry.output_root().to_string_lossy().into_owned()
        });
    let request = ScanRequest {
        root,
        recursive: payload
            .get("recursive")
            .and_then(Value::as_bool)
            .unwrap_or(true),
        incremental: payload
            .get("incremental")
            .and_then(Value::as_bool)
            .unwrap_or(true),
        source: payload
            .get("source")
            .and_then(Value::as_str)
            .and_then(AssetSource::parse),
        root_id: payload
            .get("root_id")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|rid| !rid.is_empty())
            .map(str::to_string),
        fast: payload.get("fast").and_then(Value::as_bool).unwrap_or(false),
        background_metadata: payload
            .get("background_metadata")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    };

    crate::envelope::respond(state.indexer.scan(&request).await)
}

//! Duplicate analysis endpoints.

use std::net::SocketAddr;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use majoor_core::search::dupes::DEFAULT_HAMMING_BOUND;
use serde_json::{json, Value};

use crate::envelope::Envelope;
use crate::state::AppState;

const ANALYZE_RATE_LIMIT: (usize, u64) = (5, 60);

pub async fn analyze(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Envelope {
    let ctx = state.request_context(&axum::http::Method::POST, &headers, &addr);
    if let Err(err) = state.csrf_guard(&ctx) {
        return err.into();
    }
    if let Err(err) = state.rate_limit(
        &ctx,
        "duplicates_analyze",
        ANALYZE_RATE_LIMIT.0,
        ANALYZE_RATE_LIMIT.1,
    ) {
        return err.into();
    }
    if let Err(err) = state.maintenance.ensure_inactive() {
        return err.into();
    }
    let payload = match state.parse_json_body(&body) {
        Ok(payload) => payload,
        Err(err) => return err.into(),
    };
    let hamming_bound = payload
        .get("hamming_bound")
        .and_then(Value::as_u64)
        .map(|bound| bound.min(64) as u32)
        .unwrap_or(DEFAULT_HAMMING_BOUND);
    crate::envelope::respond(state.search.analyze_duplicates(hamming_bound).await)
}

pub async fn duplicates_status(State(state): State<AppState>) -> Envelope {
    if let Err(err) = state.maintenance.ensure_inactive() {
        return err.into();
    }
    crate::envelope::respond(state.search.duplicates_status().await)
}

pub async fn alerts(State(state): State<AppState>) -> Envelope {
    if let Err(err) = state.maintenance.ensure_inactive() {
        return err.into();
    }
    let watcher = state.watcher().await;
    Envelope::ok(json!({
        "alerts": watcher.recent_alerts(),
    }))
}

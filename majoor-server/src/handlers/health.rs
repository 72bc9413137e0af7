//! Diagnostics and settings endpoints.

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use majoor_core::settings::SecurityPrefsUpdate;
use majoor_core::WriteOperation;
use majoor_model::ErrorCode;
use serde_json::{json, Value};
use sqlx::Row;

use crate::envelope::Envelope;
use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> Envelope {
    let watcher = state.watcher().await;
    Envelope::ok(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_s": state.started_at.elapsed().as_secs(),
        "maintenance_active": state.maintenance.is_active(),
        "watcher": {
            "running": watcher.is_running(),
            "pending": watcher.pending_count(),
            "watched": watcher
                .watched_paths()
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect::<Vec<_>>(),
        },
        "enrichment_queue": state.enrich.queue_length(),
        "sidecar_queue": state.sidecar.queue_length(),
    }))
}

pub async fn health_counters(State(state): State<AppState>) -> Envelope {
    let mut counters = HashMap::new();
    for (key, sql) in [
        ("assets", "SELECT COUNT(*) AS n FROM assets"),
        ("metadata", "SELECT COUNT(*) AS n FROM asset_metadata"),
        ("journal", "SELECT COUNT(*) AS n FROM scan_journal"),
        ("metadata_cache", "SELECT COUNT(*) AS n FROM metadata_cache"),
        (
            "with_workflow",
            "SELECT COUNT(*) AS n FROM asset_metadata WHERE has_workflow = 1",
        ),
        (
            "rated",
            "SELECT COUNT(*) AS n FROM asset_metadata WHERE rating > 0",
        ),
    ] {
        let value = match state.db.query_one(sql, &[]).await {
            Ok(row) => row
                .and_then(|row| row.try_get::<i64, _>("n").ok())
                .unwrap_or(0),
            Err(err) => return err.into(),
        };
        counters.insert(key.to_string(), value);
    }
    Envelope::ok(counters)
}

pub async fn health_db(State(state): State<AppState>) -> Envelope {
    let diagnostics = state.db.diagnostics().await;
    let integrity_ok = state.db.integrity_ok().await;
    Envelope::ok(json!({
        "diagnostics": diagnostics,
        "integrity_ok": integrity_ok,
        "path": state.db.path().to_string_lossy(),
    }))
}

pub async fn status(State(state): State<AppState>) -> Envelope {
    let watcher = state.watcher().await;
    Envelope::ok(json!({
        "maintenance_active": state.maintenance.is_active(),
        "watcher_running": watcher.is_running(),
        "watcher_pending": watcher.pending_count(),
        "enrichment_queue": state.enrich.queue_length(),
        "output_root": state.registry.output_root().to_string_lossy(),
        "input_root": state.registry.input_root().to_string_lossy(),
    }))
}

pub async fn effective_config(State(state): State<AppState>) -> Envelope {
    // Tuning snapshot only; security material never leaves the process.
    Envelope::ok(json!({
        "db": state.config.db,
        "scan": state.config.scan,
        "watcher": state.config.watcher,
        "search": state.config.search,
        "enrich": state.config.enrich,
    }))
}

pub async fn get_output_directory(State(state): State<AppState>) -> Envelope {
    let stored = state.settings.output_directory_override().await;
    match stored {
        Ok(stored) => Envelope::ok(json!({
            "override": stored,
            "effective": state.registry.output_root().to_string_lossy(),
        })),
        Err(err) => err.into(),
    }
}

pub async fn set_output_directory(
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
    let path = payload
        .get("path")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|path| !path.is_empty());

    if let Some(path) = path {
        let resolved = match majoor_core::roots::normalize_path(path) {
            Some(resolved) => resolved,
            None => return Envelope::err(ErrorCode::InvalidInput, "Invalid path"),
        };
        if !resolved.is_dir() {
            return Envelope::err(
                ErrorCode::DirNotFound,
                "Directory not found",
            );
        }
        if let Err(err) = state
            .settings
            .set_output_directory_override(Some(&resolved.to_string_lossy()))
            .await
        {
            return err.into();
        }
        state.registry.set_output_override(Some(resolved));
    } else {
        if let Err(err) = state.settings.set_output_directory_override(None).await {
            return err.into();
        }
        state.registry.set_output_override(None);
    }
    Envelope::ok(json!({
        "effective": state.registry.output_root().to_string_lossy(),
    }))
}

pub async fn set_probe_backend(
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
    let mode = payload
        .get("mode")
        .and_then(Value::as_str)
        .unwrap_or_default();
    crate::envelope::respond(state.settings.set_probe_backend(mode).await)
}

pub async fn get_metadata_fallback(State(state): State<AppState>) -> Envelope {
    let (image, media) = state.settings.metadata_fallback_prefs().await;
    Envelope::ok(json!({ "image": image, "media": media }))
}

pub async fn set_metadata_fallback(
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
    let image = payload.get("image").and_then(Value::as_bool);
    let media = payload.get("media").and_then(Value::as_bool);
    match state.settings.set_metadata_fallback_prefs(image, media).await {
        Ok((image, media)) => Envelope::ok(json!({ "image": image, "media": media })),
        Err(err) => err.into(),
    }
}

pub async fn get_security_settings(State(state): State<AppState>) -> Envelope {
    // Prefs only; the token itself is never echoed back.
    Envelope::ok(state.settings.security_prefs().await)
}

pub async fn set_security_settings(
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
    let update: SecurityPrefsUpdate = match serde_json::from_value(payload) {
        Ok(update) => update,
        Err(_) => {
            return Envelope::err(ErrorCode::InvalidInput, "Invalid security payload")
        }
    };
    crate::envelope::respond(state.settings.set_security_prefs(update).await)
}

pub async fn rotate_token(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    _body: Bytes,
) -> Envelope {
    let ctx = state.request_context(&axum::http::Method::POST, &headers, &addr);
    if let Err(err) = state.write_guard(&ctx, WriteOperation::Write).await {
        return err.into();
    }
    match state.settings.rotate_api_token().await {
        Ok(token) => Envelope::ok(json!({ "api_token": token })),
        Err(err) => err.into(),
    }
}

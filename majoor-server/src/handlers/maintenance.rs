//! Database maintenance endpoints: optimize, backup, restore,
//! force-delete, and the case-duplicate cleanup pass.
//!
//! Destructive operations raise the maintenance flag, stop the watcher,
//! and let enrichment workers park before touching storage; the watcher is
//! restarted and opportunistic rescans queued on the way out.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use majoor_core::maintenance::{
    backup_save, cleanup_case_duplicates, force_delete, list_backups,
    resolve_backup_path, restore_from_backup, MaintenanceStatus,
};
use majoor_core::{NoopWatcher, WatcherHandle, WriteOperation};
use majoor_model::{AssetSource, ErrorCode};
use serde_json::{json, Value};
use tracing::warn;

use crate::envelope::Envelope;
use crate::state::AppState;

async fn stop_watcher(state: &AppState) -> bool {
    let watcher = state.watcher().await;
    let was_running = watcher.is_running();
    watcher.stop().await;
    state.replace_watcher(Arc::new(NoopWatcher)).await;
    was_running
}

async fn restart_watcher(state: &AppState, should_restart: bool) {
    if !should_restart {
        return;
    }
    match crate::build_watcher(state) {
        Ok(watcher) => state.replace_watcher(watcher).await,
        Err(err) => warn!("watcher restart failed: {err}"),
    }
}

fn queue_opportunistic_rescans(state: &AppState) {
    for (root, source) in [
        (state.registry.output_root(), AssetSource::Output),
        (state.registry.input_root(), AssetSource::Input),
    ] {
        if !root.is_dir() {
            continue;
        }
        let indexer = state.indexer.clone();
        let request = majoor_model::ScanRequest {
            root: root.to_string_lossy().into_owned(),
            recursive: true,
            incremental: true,
            source: Some(source),
            root_id: None,
            fast: true,
            background_metadata: true,
        };
        tokio::spawn(async move {
            if let Err(err) = indexer.scan(&request).await {
                warn!("post-maintenance rescan failed: {err}");
            }
        });
    }
}

pub async fn optimize(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    _body: Bytes,
) -> Envelope {
    let ctx = state.request_context(&axum::http::Method::POST, &headers, &addr);
    if let Err(err) = state.write_guard(&ctx, WriteOperation::Write).await {
        return err.into();
    }
    if let Err(err) = state.maintenance.ensure_inactive() {
        return err.into();
    }
    crate::envelope::respond(state.db.optimize().await.map(|()| json!({"optimized": true})))
}

pub async fn backups(State(state): State<AppState>) -> Envelope {
    crate::envelope::respond(list_backups(&state.index_dir()).await)
}

pub async fn backup_save_endpoint(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    _body: Bytes,
) -> Envelope {
    let ctx = state.request_context(&axum::http::Method::POST, &headers, &addr);
    if let Err(err) = state.write_guard(&ctx, WriteOperation::Write).await {
        return err.into();
    }
    if let Err(err) = state.maintenance.ensure_inactive() {
        return err.into();
    }
    crate::envelope::respond(backup_save(&state.db, &state.index_dir()).await)
}

pub async fn backup_restore(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Envelope {
    let ctx = state.request_context(&axum::http::Method::POST, &headers, &addr);
    if let Err(err) = state.write_guard(&ctx, WriteOperation::ResetIndex).await {
        return err.into();
    }
    let payload = match state.parse_json_body(&body) {
        Ok(payload) => payload,
        Err(err) => return err.into(),
    };
    let Some(name) = payload.get("name").and_then(Value::as_str) else {
        return Envelope::err(ErrorCode::InvalidInput, "Missing backup name");
    };
    let backup_path = match resolve_backup_path(&state.index_dir(), name) {
        Ok(path) => path,
        Err(err) => return err.into(),
    };

    let session = match state.maintenance.begin() {
        Ok(session) => session,
        Err(err) => return err.into(),
    };
    session.emit(MaintenanceStatus::StoppingWorkers);
    let watcher_was_running = stop_watcher(&state).await;

    let result = restore_from_backup(&session, &state.db, &backup_path).await;
    match result {
        Ok(()) => {
            session.emit(MaintenanceStatus::RestartingScan);
            queue_opportunistic_rescans(&state);
            restart_watcher(&state, watcher_was_running).await;
            session.finish(true);
            Envelope::ok(json!({ "restored": name }))
        }
        Err(err) => {
            restart_watcher(&state, watcher_was_running).await;
            session.finish(false);
            err.into()
        }
    }
}

pub async fn db_force_delete(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    _body: Bytes,
) -> Envelope {
    let ctx = state.request_context(&axum::http::Method::POST, &headers, &addr);
    if let Err(err) = state.write_guard(&ctx, WriteOperation::ResetIndex).await {
        return err.into();
    }
    let session = match state.maintenance.begin() {
        Ok(session) => session,
        Err(err) => return err.into(),
    };
    session.emit(MaintenanceStatus::StoppingWorkers);
    let watcher_was_running = stop_watcher(&state).await;

    let result = force_delete(&session, &state.db).await;
    match result {
        Ok(()) => {
            session.emit(MaintenanceStatus::RestartingScan);
            queue_opportunistic_rescans(&state);
            restart_watcher(&state, watcher_was_running).await;
            session.finish(true);
            Envelope::ok(json!({ "reset": true }))
        }
        Err(err) => {
            restart_watcher(&state, watcher_was_running).await;
            session.finish(false);
            err.into()
        }
    }
}

pub async fn cleanup_case_duplicates_endpoint(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    _body: Bytes,
) -> Envelope {
    let ctx = state.request_context(&axum::http::Method::POST, &headers, &addr);
    if let Err(err) = state.write_guard(&ctx, WriteOperation::Write).await {
        return err.into();
    }
    let session = match state.maintenance.begin() {
        Ok(session) => session,
        Err(err) => return err.into(),
    };
    session.emit(MaintenanceStatus::ResettingDb);
    let result = cleanup_case_duplicates(&state.db).await;
    match result {
        Ok(stats) => {
            session.finish(true);
            Envelope::ok(stats)
        }
        Err(err) => {
            session.finish(false);
            err.into()
        }
    }
}

/// One-shot view of the maintenance flag for status polling.
pub async fn maintenance_status(State(state): State<AppState>) -> Envelope {
    Envelope::ok(json!({
        "active": state.maintenance.is_active(),
    }))
}

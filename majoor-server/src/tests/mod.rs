//! HTTP-level tests over the full router with a temp-directory backend.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::connect_info::ConnectInfo;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use majoor_config::AppConfig;
use majoor_core::settings::SecurityPrefsUpdate;
use majoor_core::{
    CollectionStore, CustomRootStore, Database, EnrichmentQueue, HeaderProbe,
    Indexer, MaintenanceGuard, NoopWatcher, PathPolicy, PauseToken,
    RootRegistry, ScanThrottle, SearchEngine, SecurityPolicy, SettingsStore,
    SidecarSync, WatcherHandle,
};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tower::ServiceExt;

use crate::routes::create_router;
use crate::state::AppState;

struct TestApp {
    _dir: tempfile::TempDir,
    output: PathBuf,
    state: AppState,
    router: Router,
}

async fn test_app() -> TestApp {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = dir.path().join("output");
    std::fs::create_dir_all(&output).expect("mkdir");

    let config = Arc::new(AppConfig::default());
    let policy = PathPolicy {
        case_insensitive: false,
    };
    let custom = Arc::new(CustomRootStore::new(
        dir.path().join("custom_roots.json"),
        policy,
    ));
    let registry = Arc::new(RootRegistry::new(policy, custom));
    registry.set_output_override(Some(output.clone()));

    let db = Arc::new(
        Database::open(dir.path().join("assets.sqlite"), config.db.clone())
            .await
            .expect("open db"),
    );
    let settings = Arc::new(SettingsStore::new(Arc::clone(&db)));
    let security = Arc::new(SecurityPolicy::new(config.security.clone()));
    let maintenance = Arc::new(MaintenanceGuard::new());
    let pause = Arc::new(PauseToken::default());
    let enrich = EnrichmentQueue::new(
        1000,
        config.db.max_metadata_json_bytes,
        Arc::clone(&pause),
        Arc::clone(&maintenance),
    );
    let indexer = Indexer::new(
        Arc::clone(&db),
        Arc::clone(&registry),
        config.scan.clone(),
        config.db.max_metadata_json_bytes,
        Arc::new(ScanThrottle::new(config.scan.bg_scan_grace_s)),
        Arc::clone(&enrich),
        Arc::clone(&maintenance),
        Arc::new(HeaderProbe),
    );
    let search = SearchEngine::new(
        Arc::clone(&db),
        Arc::clone(&registry),
        config.search.clone(),
        pause,
    );
    let state = AppState {
        config,
        db,
        registry,
        settings,
        security,
        indexer,
        search,
        maintenance,
        enrich,
        sidecar: SidecarSync::new(100),
        collections: Arc::new(CollectionStore::new(dir.path().join("collections"))),
        watcher: Arc::new(RwLock::new(
            Arc::new(NoopWatcher) as Arc<dyn WatcherHandle>
        )),
        started_at: Instant::now(),
    };
    let router = create_router(state.clone());
    TestApp {
        _dir: dir,
        output,
        state,
        router,
    }
}

/// Unlock write/delete operations through stored preferences, the way an
/// operator would via the settings endpoint.
async fn allow_writes(app: &TestApp) {
    app.state
        .settings
        .set_security_prefs(SecurityPrefsUpdate {
            safe_mode: Some(false),
            allow_write: Some(true),
            allow_delete: Some(true),
            allow_rename: Some(true),
            allow_remote_write: Some(true),
            ..Default::default()
        })
        .await
        .expect("unlock writes");
}

fn request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method.clone()).uri(uri);
    if method != Method::GET {
        builder = builder
            .header("x-requested-with", "XMLHttpRequest")
            .header(header::CONTENT_TYPE, "application/json");
    }
    let mut request = builder
        .body(match body {
            Some(body) => Body::from(body.to_string()),
            None => Body::empty(),
        })
        .expect("request");
    request.extensions_mut().insert(ConnectInfo(SocketAddr::from((
        [127, 0, 0, 1],
        45_000,
    ))));
    request
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 10 * 1024 * 1024)
        .await
        .expect("body");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    let mut ihdr = Vec::new();
    ihdr.extend_from_slice(&width.to_be_bytes());
    ihdr.extend_from_slice(&height.to_be_bytes());
    ihdr.extend_from_slice(&[8, 6, 0, 0, 0]);
    bytes.extend_from_slice(&(ihdr.len() as u32).to_be_bytes());
    bytes.extend_from_slice(b"IHDR");
    bytes.extend_from_slice(&ihdr);
    bytes.extend_from_slice(&[0u8; 4]);
    bytes.extend_from_slice(&0u32.to_be_bytes());
    bytes.extend_from_slice(b"IEND");
    bytes.extend_from_slice(&[0u8; 4]);
    bytes
}

async fn scan_output(app: &TestApp) {
    app.state
        .indexer
        .scan(&majoor_model::ScanRequest::new(
            app.output.to_string_lossy(),
        ))
        .await
        .expect("scan");
}

#[tokio::test]
async fn health_uses_the_uniform_envelope() {
    let app = test_app().await;
    let (status, body) = send(&app.router, request(Method::GET, "/mjr/am/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], json!(true));
    assert!(body["data"]["version"].is_string());
    assert!(body["meta"].is_object());
}

#[tokio::test]
async fn csrf_header_is_required_for_mutations() {
    let app = test_app().await;
    let mut req = request(Method::POST, "/mjr/am/asset/delete", Some(json!({})));
    req.headers_mut().remove("x-requested-with");
    let (status, body) = send(&app.router, req).await;
    assert_eq!(status, StatusCode::OK, "business errors stay HTTP 200");
    assert_eq!(body["ok"], json!(false));
    assert_eq!(body["code"], json!("CSRF"));
}

#[tokio::test]
async fn rating_round_trip() {
    let app = test_app().await;
    allow_writes(&app).await;
    std::fs::write(app.output.join("a.png"), png_bytes(32, 32)).expect("write");
    scan_output(&app).await;

    let filepath = app.output.join("a.png").to_string_lossy().into_owned();
    let (_, body) = send(
        &app.router,
        request(
            Method::POST,
            "/mjr/am/asset/rating",
            Some(json!({ "filepath": filepath, "rating": 4 })),
        ),
    )
    .await;
    assert_eq!(body["ok"], json!(true), "{body}");
    let id = body["data"]["id"].as_i64().expect("id");
    assert_eq!(body["data"]["rating"], json!(4));

    let (_, body) = send(
        &app.router,
        request(Method::GET, &format!("/mjr/am/asset/{id}"), None),
    )
    .await;
    assert_eq!(body["data"]["rating"], json!(4));

    // Out-of-range ratings are invalid input.
    let (_, body) = send(
        &app.router,
        request(
            Method::POST,
            "/mjr/am/asset/rating",
            Some(json!({ "asset_id": id, "rating": 9 })),
        ),
    )
    .await;
    assert_eq!(body["code"], json!("INVALID_INPUT"));
}

#[tokio::test]
async fn rating_endpoint_rate_limits_after_thirty_calls() {
    let app = test_app().await;
    allow_writes(&app).await;

    let mut last = Value::Null;
    let mut retry_header = None;
    for call in 0..31 {
        let response = app
            .router
            .clone()
            .oneshot(request(
                Method::POST,
                "/mjr/am/asset/rating",
                Some(json!({ "rating": 3 })),
            ))
            .await
            .expect("response");
        if call == 30 {
            retry_header = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);
        }
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .expect("body");
        last = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    }
    assert_eq!(last["code"], json!("RATE_LIMITED"), "{last}");
    let retry_after = last["meta"]["retry_after"].as_u64().expect("retry_after");
    assert!(retry_after >= 1);
    assert_eq!(retry_header.as_deref(), Some(retry_after.to_string().as_str()));
}

#[tokio::test]
async fn list_boundaries() {
    let app = test_app().await;
    let (_, body) = send(
        &app.router,
        request(Method::GET, "/mjr/am/list?scope=output&limit=0", None),
    )
    .await;
    assert_eq!(body["ok"], json!(true), "{body}");
    assert_eq!(body["data"]["assets"], json!([]));
    assert!(body["data"]["total"].as_i64().unwrap() >= 0);

    let (_, body) = send(
        &app.router,
        request(
            Method::GET,
            "/mjr/am/list?scope=output&offset=99999999",
            None,
        ),
    )
    .await;
    assert_eq!(body["code"], json!("INVALID_INPUT"));

    let (_, body) = send(
        &app.router,
        request(Method::GET, "/mjr/am/list?scope=bogus", None),
    )
    .await;
    assert_eq!(body["code"], json!("INVALID_INPUT"));
}

#[tokio::test]
async fn listing_is_deterministic_over_unchanged_state() {
    let app = test_app().await;
    for i in 0..5 {
        std::fs::write(
            app.output.join(format!("img_{i}.png")),
            png_bytes(16, 16),
        )
        .expect("write");
    }
    scan_output(&app).await;

    let uri = "/mjr/am/list?scope=output&sort=mtime_desc&limit=3";
    let (_, first) = send(&app.router, request(Method::GET, uri, None)).await;
    let (_, second) = send(&app.router, request(Method::GET, uri, None)).await;
    assert_eq!(first["data"]["assets"], second["data"]["assets"]);
    assert_eq!(first["data"]["total"], second["data"]["total"]);
}

#[cfg(unix)]
#[tokio::test]
async fn bulk_delete_reports_partial_success() {
    use std::os::unix::fs::PermissionsExt;

    let app = test_app().await;
    allow_writes(&app).await;
    let keep_dir = app.output.join("locked");
    std::fs::create_dir_all(&keep_dir).expect("mkdir");
    std::fs::write(app.output.join("gone.png"), png_bytes(8, 8)).expect("write");
    std::fs::write(keep_dir.join("stays.png"), png_bytes(8, 8)).expect("write");
    scan_output(&app).await;

    use sqlx::Row;
    let rows = app
        .state
        .db
        .query("SELECT id, filepath FROM assets ORDER BY filepath", &[])
        .await
        .expect("ids");
    assert_eq!(rows.len(), 2);
    let gone_id: i64 = rows[0].try_get("id").expect("id");
    let stays_id: i64 = rows[1].try_get("id").expect("id");

    // A read-only parent directory makes the unlink fail.
    std::fs::set_permissions(&keep_dir, std::fs::Permissions::from_mode(0o555))
        .expect("chmod");

    let (_, body) = send(
        &app.router,
        request(
            Method::POST,
            "/mjr/am/assets/delete",
            Some(json!({ "ids": [gone_id, stays_id] })),
        ),
    )
    .await;

    std::fs::set_permissions(&keep_dir, std::fs::Permissions::from_mode(0o755))
        .expect("chmod back");

    assert_eq!(body["ok"], json!(true), "{body}");
    assert_eq!(body["meta"]["partial"], json!(true));
    assert_eq!(body["data"]["deleted_ids"], json!([gone_id]));
    assert_eq!(body["data"]["failed_ids"], json!([stays_id]));
    assert!(!body["data"]["errors"][stays_id.to_string()]
        .as_str()
        .unwrap()
        .is_empty());

    // Row 1 gone from DB and disk; row 2 intact in both.
    assert!(!app.output.join("gone.png").exists());
    assert!(keep_dir.join("stays.png").exists());
    let rows = app
        .state
        .db
        .query("SELECT id FROM assets", &[])
        .await
        .expect("rows");
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn maintenance_flag_fences_listing_endpoints() {
    let app = test_app().await;
    let session = app.state.maintenance.begin().expect("begin");

    let (_, body) = send(
        &app.router,
        request(Method::GET, "/mjr/am/duplicates/alerts", None),
    )
    .await;
    assert_eq!(body["code"], json!("DB_MAINTENANCE"));

    let (_, body) = send(
        &app.router,
        request(Method::GET, "/mjr/am/list?scope=output", None),
    )
    .await;
    assert_eq!(body["code"], json!("DB_MAINTENANCE"));

    session.finish(true);

    let (_, body) = send(
        &app.router,
        request(Method::GET, "/mjr/am/duplicates/alerts", None),
    )
    .await;
    assert_eq!(body["ok"], json!(true));
}

#[tokio::test]
async fn custom_roots_round_trip_via_http() {
    let app = test_app().await;
    allow_writes(&app).await;
    let media = app._dir.path().join("media");
    std::fs::create_dir_all(&media).expect("mkdir");

    let (_, body) = send(
        &app.router,
        request(
            Method::POST,
            "/mjr/am/custom-roots",
            Some(json!({ "path": media.to_string_lossy(), "label": "Media" })),
        ),
    )
    .await;
    assert_eq!(body["ok"], json!(true), "{body}");
    let root_id = body["data"]["id"].as_str().expect("id").to_string();

    let (_, body) = send(
        &app.router,
        request(Method::GET, "/mjr/am/custom-roots", None),
    )
    .await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (_, body) = send(
        &app.router,
        request(
            Method::POST,
            "/mjr/am/custom-roots/remove",
            Some(json!({ "id": root_id })),
        ),
    )
    .await;
    assert_eq!(body["ok"], json!(true));
}

#[tokio::test]
async fn rename_conflict_is_reported() {
    let app = test_app().await;
    allow_writes(&app).await;
    std::fs::write(app.output.join("a.png"), png_bytes(8, 8)).expect("write");
    std::fs::write(app.output.join("b.png"), png_bytes(8, 8)).expect("write");
    scan_output(&app).await;

    let filepath = app.output.join("a.png").to_string_lossy().into_owned();
    let (_, body) = send(
        &app.router,
        request(
            Method::POST,
            "/mjr/am/asset/rename",
            Some(json!({ "filepath": filepath, "new_name": "b.png" })),
        ),
    )
    .await;
    assert_eq!(body["code"], json!("CONFLICT"), "{body}");

    // A clean rename updates disk and index together.
    let (_, body) = send(
        &app.router,
        request(
            Method::POST,
            "/mjr/am/asset/rename",
            Some(json!({ "filepath": filepath, "new_name": "c.png" })),
        ),
    )
    .await;
    assert_eq!(body["ok"], json!(true), "{body}");
    assert!(app.output.join("c.png").exists());
    assert!(!app.output.join("a.png").exists());
}

#[tokio::test]
async fn custom_view_serves_only_allowed_media() {
    let app = test_app().await;
    std::fs::write(app.output.join("ok.png"), png_bytes(8, 8)).expect("write");
    std::fs::write(app.output.join("nope.html"), b"<html>").expect("write");

    let uri = format!(
        "/mjr/am/custom-view?filepath={}",
        app.output.join("ok.png").to_string_lossy()
    );
    let response = app
        .router
        .clone()
        .oneshot(request(Method::GET, &uri, None))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("x-content-type-options").unwrap(),
        "nosniff"
    );
    assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "image/png"
    );

    let uri = format!(
        "/mjr/am/custom-view?filepath={}",
        app.output.join("nope.html").to_string_lossy()
    );
    let response = app
        .router
        .clone()
        .oneshot(request(Method::GET, &uri, None))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn date_histogram_marks_days_with_assets() {
    let app = test_app().await;
    std::fs::write(app.output.join("a.png"), png_bytes(8, 8)).expect("write");
    std::fs::write(app.output.join("b.png"), png_bytes(8, 8)).expect("write");
    scan_output(&app).await;

    // The files were just written; query the current month.
    let month = chrono::Local::now().format("%Y-%m").to_string();
    let (_, body) = send(
        &app.router,
        request(
            Method::GET,
            &format!("/mjr/am/date-histogram?scope=output&month={month}"),
            None,
        ),
    )
    .await;
    assert_eq!(body["ok"], json!(true), "{body}");
    assert_eq!(body["data"]["month"], json!(month));
    let days = body["data"]["days"].as_object().expect("days map");
    let total: i64 = days.values().filter_map(Value::as_i64).sum();
    assert_eq!(total, 2);

    // Missing and malformed months are invalid input.
    let (_, body) = send(
        &app.router,
        request(Method::GET, "/mjr/am/date-histogram", None),
    )
    .await;
    assert_eq!(body["code"], json!("INVALID_INPUT"));
    let (_, body) = send(
        &app.router,
        request(Method::GET, "/mjr/am/date-histogram?month=2024-13", None),
    )
    .await;
    assert_eq!(body["code"], json!("INVALID_INPUT"));
}

#[tokio::test]
async fn settings_version_monotonic_via_http() {
    let app = test_app().await;
    allow_writes(&app).await;
    let v1 = app.state.settings.version().await;
    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    let (_, body) = send(
        &app.router,
        request(
            Method::POST,
            "/mjr/am/settings/metadata-fallback",
            Some(json!({ "image": false })),
        ),
    )
    .await;
    assert_eq!(body["ok"], json!(true), "{body}");
    let v2 = app.state.settings.version().await;
    assert!(v2 > v1);
}

mod envelope;
mod handlers;
mod routes;
mod state;
#[cfg(test)]
mod tests;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use majoor_config::AppConfig;
use majoor_core::{
    AssetError, CollectionStore, Database, EnrichmentQueue, HeaderProbe,
    Indexer, MaintenanceGuard, NoopWatcher, PathPolicy, PauseToken,
    RootRegistry, ScanThrottle, SearchEngine, SecurityPolicy, SettingsStore,
    SidecarSync, WatchService, WatcherHandle,
};
use majoor_core::watch::WatchRoot;
use majoor_model::AssetSource;
use tokio::sync::RwLock;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::state::AppState;

/// Build a native watcher over the current roots, or fail with the reason
/// the caller can log.
pub fn build_watcher(
    state: &AppState,
) -> Result<Arc<dyn WatcherHandle>, AssetError> {
    let mut roots = vec![WatchRoot {
        path: state.registry.output_root(),
        source: AssetSource::Output,
        root_id: None,
    }];
    let input_root = state.registry.input_root();
    if input_root.is_dir() {
        roots.push(WatchRoot {
            path: input_root,
            source: AssetSource::Input,
            root_id: None,
        });
    }
    for custom in state.registry.custom_roots().list() {
        if !custom.offline && !custom.invalid {
            roots.push(WatchRoot {
                path: custom.path.into(),
                source: AssetSource::Custom,
                root_id: Some(custom.id),
            });
        }
    }
    WatchService::start(
        roots,
        state.config.watcher.clone(),
        state.indexer.clone(),
    )
    .map(|watcher| watcher as Arc<dyn WatcherHandle>)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "majoor_server=info,majoor_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(AppConfig::from_env());
    let policy = PathPolicy::detect();
    let registry = RootRegistry::bootstrap(policy);
    info!(
        output = %registry.output_root().display(),
        input = %registry.input_root().display(),
        case_insensitive = policy.case_insensitive,
        "roots resolved"
    );

    let db = Arc::new(
        Database::open(
            registry.index_dir().join("assets.sqlite"),
            config.db.clone(),
        )
        .await?,
    );
    let settings = Arc::new(SettingsStore::new(Arc::clone(&db)));
    settings.ensure_security_bootstrap().await?;
    if let Ok(Some(path)) = settings.output_directory_override().await {
        registry.set_output_override(Some(path.into()));
    }

    let security = Arc::new(SecurityPolicy::new(config.security.clone()));
    let maintenance = Arc::new(MaintenanceGuard::new());
    let pause = Arc::new(PauseToken::default());
    let extractor: Arc<dyn majoor_core::MetadataExtractor> = Arc::new(HeaderProbe);
    let enrich = EnrichmentQueue::new(
        config.enrich.queue_max,
        config.db.max_metadata_json_bytes,
        Arc::clone(&pause),
        Arc::clone(&maintenance),
    );
    enrich.start(
        config.enrich.concurrency,
        Arc::clone(&db),
        Arc::clone(&extractor),
    );
    let throttle = Arc::new(ScanThrottle::new(config.scan.bg_scan_grace_s));
    let indexer = Indexer::new(
        Arc::clone(&db),
        Arc::clone(&registry),
        config.scan.clone(),
        config.db.max_metadata_json_bytes,
        throttle,
        Arc::clone(&enrich),
        Arc::clone(&maintenance),
        extractor,
    );
    let search = SearchEngine::new(
        Arc::clone(&db),
        Arc::clone(&registry),
        config.search.clone(),
        Arc::clone(&pause),
    );
    let sidecar = SidecarSync::new(config.enrich.sidecar_queue_max);
    sidecar.start();
    let collections = Arc::new(CollectionStore::new(
        registry.index_dir().join("collections"),
    ));

    let state = AppState {
        config: Arc::clone(&config),
        db: Arc::clone(&db),
        registry: Arc::clone(&registry),
        settings,
        security,
        indexer: Arc::clone(&indexer),
        search,
        maintenance,
        enrich: Arc::clone(&enrich),
        sidecar: Arc::clone(&sidecar),
        collections,
        watcher: Arc::new(RwLock::new(Arc::new(NoopWatcher) as Arc<dyn WatcherHandle>)),
        started_at: Instant::now(),
    };

    if config.watcher.enabled {
        match build_watcher(&state) {
            Ok(watcher) => state.replace_watcher(watcher).await,
            Err(err) => warn!("filesystem watcher unavailable: {err}"),
        }
    } else {
        info!("filesystem watcher disabled by configuration");
    }

    // Prime the index without blocking startup.
    {
        let indexer = Arc::clone(&indexer);
        let root = registry.output_root();
        tokio::spawn(async move {
            let request = majoor_model::ScanRequest {
                root: root.to_string_lossy().into_owned(),
                recursive: true,
                incremental: true,
                source: Some(AssetSource::Output),
                root_id: None,
                fast: true,
                background_metadata: true,
            };
            if let Err(err) = indexer.scan(&request).await {
                warn!("initial scan failed: {err}");
            }
        });
    }

    let app = routes::create_router(state.clone());
    let addr: SocketAddr =
        format!("{}:{}", config.bind_host, config.bind_port).parse()?;
    info!("majoor assets backend listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;

    info!("shutting down");
    state.watcher().await.stop().await;
    enrich.stop().await;
    sidecar.stop().await;
    db.close().await;
    Ok(())
}

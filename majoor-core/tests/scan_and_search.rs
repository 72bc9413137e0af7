//! End-to-end indexer/search scenarios over a real temp directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use majoor_config::{DbConfig, ScanConfig, SearchConfig};
use majoor_core::{
    CustomRootStore, Database, EnrichmentQueue, HeaderProbe, Indexer,
    MaintenanceGuard, PathPolicy, PauseToken, RootRegistry, ScanThrottle,
    SearchEngine,
};
use majoor_core::search::SearchParams;
use majoor_model::{AssetSource, ListFilters, ScanRequest, SortKey};

struct Fixture {
    _dir: tempfile::TempDir,
    output: PathBuf,
    db: Arc<Database>,
    indexer: Arc<Indexer>,
    search: Arc<SearchEngine>,
    maintenance: Arc<MaintenanceGuard>,
}

/// Minimal PNG with real IHDR dimensions so the header probe produces
/// rich metadata during non-fast scans.
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

async fn fixture() -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = dir.path().join("output");
    std::fs::create_dir_all(&output).expect("mkdir");

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
        Database::open(dir.path().join("assets.sqlite"), DbConfig::default())
            .await
            .expect("open db"),
    );
    let maintenance = Arc::new(MaintenanceGuard::new());
    let pause = Arc::new(PauseToken::default());
    let enrich = EnrichmentQueue::new(
        1000,
        1 << 20,
        Arc::clone(&pause),
        Arc::clone(&maintenance),
    );
    let indexer = Indexer::new(
        Arc::clone(&db),
        Arc::clone(&registry),
        ScanConfig::default(),
        1 << 20,
        Arc::new(ScanThrottle::new(30.0)),
        enrich,
        Arc::clone(&maintenance),
        Arc::new(HeaderProbe),
    );
    let search = SearchEngine::new(
        Arc::clone(&db),
        Arc::clone(&registry),
        SearchConfig::default(),
        pause,
    );
    Fixture {
        _dir: dir,
        output,
        db,
        indexer,
        search,
        maintenance,
    }
}

fn set_mtime(path: &Path, seconds: i64) {
    let file = std::fs::File::options()
        .write(true)
        .open(path)
        .expect("open for touch");
    let time = std::time::SystemTime::UNIX_EPOCH
        + std::time::Duration::from_secs(seconds as u64);
    file.set_modified(time).expect("set mtime");
}

#[tokio::test]
async fn scan_then_search_returns_both_assets() {
    let fx = fixture().await;
    std::fs::write(fx.output.join("a.png"), png_bytes(100, 100)).expect("write");
    std::fs::write(fx.output.join("b.jpg"), png_bytes(200, 200)).expect("write");
    set_mtime(&fx.output.join("a.png"), 1_000_000);
    set_mtime(&fx.output.join("b.jpg"), 1_000_100);

    let stats = fx
        .indexer
        .scan(&ScanRequest::new(fx.output.to_string_lossy()))
        .await
        .expect("scan");
    assert_eq!(stats.scanned, 2);
    assert_eq!(stats.added, 2);
    assert_eq!(stats.errors, 0);

    let page = fx
        .search
        .search_scoped(&SearchParams {
            query: "*".to_string(),
            roots: vec![fx.output.to_string_lossy().into_owned()],
            filters: ListFilters {
                kind: Some(majoor_model::AssetKind::Image),
                ..Default::default()
            },
            sort: SortKey::MtimeDesc,
            limit: 10,
            offset: 0,
            include_total: true,
        })
        .await
        .expect("search");
    assert_eq!(page.total, 2);
    assert_eq!(page.assets[0].filename, "b.jpg");
    assert_eq!(page.assets[1].filename, "a.png");
    // Dimensions arrive through inline enrichment on a non-fast scan.
    assert_eq!(page.assets[1].width, Some(100));
}

#[tokio::test]
async fn incremental_rescan_skips_unchanged_and_updates_touched() {
    let fx = fixture().await;
    let a = fx.output.join("a.png");
    let b = fx.output.join("b.jpg");
    std::fs::write(&a, png_bytes(64, 64)).expect("write");
    std::fs::write(&b, png_bytes(64, 64)).expect("write");
    set_mtime(&a, 1_000_000);
    set_mtime(&b, 1_000_000);

    let request = ScanRequest::new(fx.output.to_string_lossy());
    let first = fx.indexer.scan(&request).await.expect("scan 1");
    assert_eq!(first.added, 2);

    let journal_before = journal_hash(&fx.db, &a).await;

    // Touch only a.png.
    set_mtime(&a, 1_000_010);

    let second = fx.indexer.scan(&request).await.expect("scan 2");
    assert_eq!(second.scanned, 2);
    assert_eq!(second.added, 0);
    assert_eq!(second.updated, 1);
    assert_eq!(second.skipped, 1);

    let journal_after = journal_hash(&fx.db, &a).await;
    assert_ne!(journal_before, journal_after);

    // Third pass with nothing changed is fully idempotent.
    let third = fx.indexer.scan(&request).await.expect("scan 3");
    assert_eq!(third.added, 0);
    assert_eq!(third.updated, 0);
    assert_eq!(third.skipped, 2);
}

async fn journal_hash(db: &Arc<Database>, path: &Path) -> String {
    use sqlx::Row;
    let key = majoor_core::roots::resolve_lenient(path)
        .to_string_lossy()
        .replace('\\', "/");
    let row = db
        .query_one(
            "SELECT state_hash FROM scan_journal WHERE filepath = ?",
            &majoor_core::params![key],
        )
        .await
        .expect("journal query")
        .expect("journal row");
    row.try_get("state_hash").expect("state_hash")
}

#[tokio::test]
async fn journal_covers_every_classified_file() {
    let fx = fixture().await;
    std::fs::create_dir_all(fx.output.join("sub")).expect("mkdir");
    std::fs::write(fx.output.join("a.png"), png_bytes(8, 8)).expect("write");
    std::fs::write(fx.output.join("sub/b.mp4"), b"video-ish").expect("write");
    std::fs::write(fx.output.join("notes.txt"), b"ignored").expect("write");

    fx.indexer
        .scan(&ScanRequest::new(fx.output.to_string_lossy()))
        .await
        .expect("scan");

    use sqlx::Row;
    let rows = fx
        .db
        .query("SELECT COUNT(*) AS n FROM scan_journal", &[])
        .await
        .expect("count");
    let journal: i64 = rows[0].try_get("n").expect("n");
    assert_eq!(journal, 2, "journal rows equal classified files");

    let rows = fx
        .db
        .query(
            "SELECT COUNT(*) AS n FROM scan_journal j \
             WHERE NOT EXISTS (SELECT 1 FROM assets a WHERE a.filepath = j.filepath)",
            &[],
        )
        .await
        .expect("orphans");
    let orphans: i64 = rows[0].try_get("n").expect("n");
    assert_eq!(orphans, 0, "every journal row has its asset");
}

#[tokio::test]
async fn resolve_or_create_indexes_on_demand() {
    let fx = fixture().await;
    let file = fx.output.join("late.png");
    std::fs::write(&file, png_bytes(16, 16)).expect("write");

    let id = fx.indexer.resolve_or_create(&file).await.expect("resolve");
    assert!(id > 0);
    // Second resolve returns the same id without rescanning.
    let again = fx.indexer.resolve_or_create(&file).await.expect("resolve");
    assert_eq!(id, again);

    let outside = fx._dir.path().join("elsewhere.png");
    std::fs::write(&outside, png_bytes(16, 16)).expect("write");
    assert!(fx.indexer.resolve_or_create(&outside).await.is_err());
}

#[tokio::test]
async fn maintenance_flag_blocks_scans() {
    let fx = fixture().await;
    std::fs::write(fx.output.join("a.png"), png_bytes(8, 8)).expect("write");

    let session = fx.maintenance.begin().expect("begin");
    let err = fx
        .indexer
        .scan(&ScanRequest::new(fx.output.to_string_lossy()))
        .await
        .unwrap_err();
    assert!(matches!(err, majoor_core::AssetError::Maintenance));
    session.finish(true);

    fx.indexer
        .scan(&ScanRequest::new(fx.output.to_string_lossy()))
        .await
        .expect("scan after maintenance");
}

#[tokio::test]
async fn custom_source_scan_tags_root_id() {
    let fx = fixture().await;
    let custom_dir = fx._dir.path().join("media");
    std::fs::create_dir_all(&custom_dir).expect("mkdir");
    std::fs::write(custom_dir.join("c.png"), png_bytes(8, 8)).expect("write");
    let root = fx
        .search
        .registry()
        .custom_roots()
        .add(custom_dir.to_str().unwrap(), Some("Media"), &[])
        .expect("add root");

    let stats = fx
        .indexer
        .scan(&ScanRequest {
            root: custom_dir.to_string_lossy().into_owned(),
            recursive: true,
            incremental: true,
            source: Some(AssetSource::Custom),
            root_id: Some(root.id.clone()),
            fast: true,
            background_metadata: false,
        })
        .await
        .expect("scan");
    assert_eq!(stats.added, 1);

    use sqlx::Row;
    let rows = fx
        .db
        .query(
            "SELECT source, root_id FROM assets",
            &[],
        )
        .await
        .expect("rows");
    assert_eq!(rows.len(), 1);
    let source: String = rows[0].try_get("source").expect("source");
    let root_id: String = rows[0].try_get("root_id").expect("root_id");
    assert_eq!(source, "custom");
    assert_eq!(root_id, root.id);
}

//! The indexer: reconciles a directory tree with the asset index under
//! bounded transactions.
//!
//! A scan walks the tree, classifies files by extension, and streams them
//! into batches sized by the configured ladder. Each batch commits assets,
//! journal rows, and (unless fast) metadata in one immediate transaction;
//! a failed batch is retried once and then counted into `errors` without
//! aborting the scan.

mod enrich;
mod throttle;

pub use enrich::{EnrichmentQueue, PauseToken};
pub use throttle::ScanThrottle;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use majoor_config::ScanConfig;
use majoor_model::{
    AssetKind, AssetSource, ExtractedMetadata, ScanRequest, ScanStats,
};
use sha2::{Digest, Sha256};
use sqlx::Row;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::db::{exec_conn, Database, SqlValue, TxMode};
use crate::error::{AssetError, Result};
use crate::maintenance::MaintenanceGuard;
use crate::metadata::MetadataExtractor;
use crate::params;
use crate::roots::{resolve_lenient, RootRegistry};

/// Directories the indexer never descends into.
const SKIPPED_DIR_NAMES: &[&str] = &["_mjr_index", "_mjr_batch_zips"];

/// Digest of `(filepath, mtime_ns, size)`; changes iff the file would need
/// reprocessing.
pub fn state_hash_for(filepath: &str, meta: &std::fs::Metadata) -> String {
    let mtime_ns = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0);
    state_hash_parts(filepath, mtime_ns, meta.len() as i64)
}

pub fn state_hash_parts(filepath: &str, mtime_ns: i64, size: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(filepath.as_bytes());
    hasher.update(b"|");
    hasher.update(mtime_ns.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(size.to_string().as_bytes());
    hex::encode(hasher.finalize())[..32].to_string()
}

/// Journal skip predicate: in incremental mode a file with an unchanged
/// state hash is skipped outright when the scan is fast, or when its asset
/// already carries rich metadata.
fn should_skip_by_journal(
    incremental: bool,
    journal_hash: Option<&str>,
    state_hash: &str,
    fast: bool,
    existing_id: Option<i64>,
    has_rich_meta: bool,
) -> bool {
    incremental
        && journal_hash == Some(state_hash)
        && (fast || (existing_id.is_some() && has_rich_meta))
}

fn is_incremental_unchanged(
    incremental: bool,
    existing: Option<(i64, i64)>,
    mtime: i64,
) -> bool {
    incremental
        && matches!(existing, Some((_, existing_mtime)) if existing_mtime == mtime)
}

/// One classified file ready for batching.
#[derive(Debug, Clone)]
struct WalkedFile {
    filepath: String,
    filename: String,
    subfolder: String,
    kind: AssetKind,
    ext: String,
    size: i64,
    mtime: i64,
    state_hash: String,
    fs_path: PathBuf,
}

#[derive(Debug)]
struct ExistingRow {
    id: i64,
    mtime: i64,
    has_rich_meta: bool,
}

#[derive(Debug)]
pub struct Indexer {
    db: Arc<Database>,
    registry: Arc<RootRegistry>,
    cfg: ScanConfig,
    max_raw_bytes: i64,
    throttle: Arc<ScanThrottle>,
    enrich: Arc<EnrichmentQueue>,
    maintenance: Arc<MaintenanceGuard>,
    extractor: Arc<dyn MetadataExtractor>,
}

impl Indexer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<Database>,
        registry: Arc<RootRegistry>,
        cfg: ScanConfig,
        max_raw_bytes: i64,
        throttle: Arc<ScanThrottle>,
        enrich: Arc<EnrichmentQueue>,
        maintenance: Arc<MaintenanceGuard>,
        extractor: Arc<dyn MetadataExtractor>,
    ) -> Arc<Self> {
        Arc::new(Indexer {
            db,
            registry,
            cfg,
            max_raw_bytes,
            throttle,
            enrich,
            maintenance,
            extractor,
        })
    }

    pub fn throttle(&self) -> &Arc<ScanThrottle> {
        &self.throttle
    }

    pub fn enrichment(&self) -> &Arc<EnrichmentQueue> {
        &self.enrich
    }

    /// Scan a directory per the request and reconcile it with the index.
    pub async fn scan(&self, request: &ScanRequest) -> Result<ScanStats> {
        self.maintenance.ensure_inactive()?;
        let started = chrono::Utc::now();
        let clock = std::time::Instant::now();

        let root = resolve_lenient(Path::new(&request.root));
        if !root.is_dir() {
            return Err(AssetError::DirNotFound(
                root.to_string_lossy().into_owned(),
            ));
        }

        let (source, root_id, base) = match (request.source, &request.root_id) {
            (Some(source), root_id) => {
                let base = self.base_for(source, root_id.as_deref())?;
                (source, root_id.clone(), base)
            }
            _ => match self.registry.classify_source(&root) {
                Some((source, root_id, base)) => (source, root_id, base),
                None => {
                    return Err(AssetError::Forbidden(
                        "scan root is outside all allowed directories".to_string(),
                    ))
                }
            },
        };

        let recursive = request.recursive;
        let walk_root = root.clone();
        let stat_errors = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let stat_errors_walk = Arc::clone(&stat_errors);
        let files = tokio::task::spawn_blocking(move || {
            walk_directory(&walk_root, recursive, &stat_errors_walk)
        })
        .await
        .map_err(|err| AssetError::internal(format!("walk task failed: {err}")))?;

        let mut stats = self
            .index_walked(files, source, root_id.as_deref(), &base, request)
            .await?;
        stats.errors += stat_errors.load(std::sync::atomic::Ordering::Relaxed);
        stats.start_time = started.timestamp();
        stats.duration = clock.elapsed().as_secs_f64();

        let dir = root.to_string_lossy();
        self.throttle
            .mark_directory_scanned(&dir, source.as_str(), root_id.as_deref());
        let metadata_complete = !request.fast && !request.background_metadata;
        self.throttle.mark_directory_indexed(
            &dir,
            source.as_str(),
            root_id.as_deref(),
            metadata_complete,
        );

        info!(
            root = %root.display(),
            scanned = stats.scanned,
            added = stats.added,
            updated = stats.updated,
            skipped = stats.skipped,
            errors = stats.errors,
            "scan finished"
        );
        Ok(stats)
    }

    /// Index an explicit file list (watcher flushes, resolve-or-create).
    pub async fn index_files(
        &self,
        paths: &[PathBuf],
        source: AssetSource,
        root_id: Option<&str>,
        incremental: bool,
        fast: bool,
        background_metadata: bool,
    ) -> Result<ScanStats> {
        self.maintenance.ensure_inactive()?;
        let base = self.base_for(source, root_id)?;
        let mut files = Vec::new();
        let mut errors = 0;
        for path in paths {
            match std::fs::metadata(path) {
                Ok(meta) if meta.is_file() => files.push((path.clone(), meta)),
                Ok(_) => {}
                Err(_) => errors += 1,
            }
        }
        let request = ScanRequest {
            root: base.to_string_lossy().into_owned(),
            recursive: false,
            incremental,
            source: Some(source),
            root_id: root_id.map(str::to_string),
            fast,
            background_metadata,
        };
        let mut stats = self
            .index_walked(files, source, root_id, &base, &request)
            .await?;
        stats.errors += errors;
        Ok(stats)
    }

    fn base_for(
        &self,
        source: AssetSource,
        root_id: Option<&str>,
    ) -> Result<PathBuf> {
        match source {
            AssetSource::Output => Ok(self.registry.output_root()),
            AssetSource::Input => Ok(self.registry.input_root()),
            AssetSource::Custom => {
                let rid = root_id.ok_or_else(|| {
                    AssetError::invalid("custom source requires root_id")
                })?;
                self.registry.custom_roots().resolve(rid)
            }
        }
    }

    async fn index_walked(
        &self,
        files: Vec<(PathBuf, std::fs::Metadata)>,
        source: AssetSource,
        root_id: Option<&str>,
        base: &Path,
        request: &ScanRequest,
    ) -> Result<ScanStats> {
        let policy = self.registry.policy();
        let mut walked = Vec::with_capacity(files.len());
        for (path, meta) in files {
            let filename = match path.file_name() {
                Some(name) => name.to_string_lossy().into_owned(),
                None => continue,
            };
            let Some(kind) = majoor_model::classify_file(&filename) else {
                continue;
            };
            let ext = Path::new(&filename)
                .extension()
                .map(|e| e.to_string_lossy().to_ascii_lowercase())
                .unwrap_or_default();
            let filepath = policy.canonical_key(&path);
            let mtime_ns = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_nanos() as i64)
                .unwrap_or(0);
            let mtime = mtime_ns / 1_000_000_000;
            let size = meta.len() as i64;
            walked.push(WalkedFile {
                state_hash: state_hash_parts(&filepath, mtime_ns, size),
                subfolder: self.registry.subfolder_for(&path, base),
                filepath,
                filename,
                kind,
                ext,
                size,
                mtime,
                fs_path: path,
            });
        }

        let mut stats = ScanStats {
            scanned: walked.len() as u64,
            ..Default::default()
        };
        if walked.is_empty() {
            return Ok(stats);
        }

        let batch_size = self.cfg.batch_size_for(walked.len());
        let mut enqueued = 0usize;
        for batch in walked.chunks(batch_size) {
            match self
                .process_batch(batch, source, root_id, request, &mut stats)
                .await
            {
                Ok(prepared) => {
                    if request.background_metadata && !request.fast {
                        for filepath in prepared {
                            if enqueued >= self.cfg.max_enrich_items {
                                break;
                            }
                            if self.enrich.push(&filepath) {
                                enqueued += 1;
                            }
                        }
                    }
                }
                Err(err) => {
                    warn!("batch failed after retry, counting as errors: {err}");
                    stats.errors += batch.len() as u64;
                }
            }
        }
        Ok(stats)
    }

    /// Process one batch: load existing state, apply the skip predicates,
    /// extract metadata for rows that will be written, then commit assets,
    /// journal, and metadata atomically. Retries once on transaction
    /// failure. Returns the filepaths that were written.
    async fn process_batch(
        &self,
        batch: &[WalkedFile],
        source: AssetSource,
        root_id: Option<&str>,
        request: &ScanRequest,
        stats: &mut ScanStats,
    ) -> Result<Vec<String>> {
        let filepaths: Vec<SqlValue> = batch
            .iter()
            .map(|file| SqlValue::Text(file.filepath.clone()))
            .collect();

        let existing_rows = self
            .db
            .query_in(
                "SELECT a.filepath, a.id, a.mtime, \
                 COALESCE(m.quality, 'none') != 'none' AS has_rich \
                 FROM assets a \
                 LEFT JOIN asset_metadata m ON m.asset_id = a.id \
                 WHERE a.filepath IN ({IN})",
                &[],
                &filepaths,
            )
            .await?;
        let mut existing: HashMap<String, ExistingRow> = HashMap::new();
        for row in existing_rows {
            let filepath: String = row.try_get("filepath")?;
            existing.insert(
                filepath,
                ExistingRow {
                    id: row.try_get("id")?,
                    mtime: row.try_get("mtime")?,
                    has_rich_meta: row.try_get::<i64, _>("has_rich")? != 0,
                },
            );
        }

        let journal_rows = self
            .db
            .query_in(
                "SELECT filepath, state_hash FROM scan_journal \
                 WHERE filepath IN ({IN})",
                &[],
                &filepaths,
            )
            .await?;
        let mut journal: HashMap<String, String> = HashMap::new();
        for row in journal_rows {
            journal.insert(row.try_get("filepath")?, row.try_get("state_hash")?);
        }

        let mut prepared: Vec<&WalkedFile> = Vec::new();
        let mut unchanged: Vec<&WalkedFile> = Vec::new();
        let mut batch_added = 0u64;
        let mut batch_updated = 0u64;
        let mut batch_skipped = 0u64;
        for file in batch {
            let row = existing.get(&file.filepath);
            let journal_hash = journal.get(&file.filepath).map(String::as_str);
            if should_skip_by_journal(
                request.incremental,
                journal_hash,
                &file.state_hash,
                request.fast,
                row.map(|r| r.id),
                row.map(|r| r.has_rich_meta).unwrap_or(false),
            ) {
                batch_skipped += 1;
                continue;
            }
            if is_incremental_unchanged(
                request.incremental,
                row.map(|r| (r.id, r.mtime)),
                file.mtime,
            ) {
                batch_skipped += 1;
                unchanged.push(file);
                continue;
            }
            if row.is_some() {
                batch_updated += 1;
            } else {
                batch_added += 1;
            }
            prepared.push(file);
        }

        // Extraction happens before the transaction so no file IO runs
        // while the write lock is held.
        let mut extractions: HashMap<String, ExtractedMetadata> = HashMap::new();
        if !request.fast && !request.background_metadata {
            for file in &prepared {
                let cached = crate::metadata::cached_extraction(
                    &self.db,
                    &file.filepath,
                    &file.state_hash,
                )
                .await?;
                let extracted = match cached {
                    Some(extracted) => extracted,
                    None => match self.extractor.extract(&file.fs_path).await {
                        Ok(extracted) => extracted,
                        Err(err) => {
                            debug!(
                                filepath = %file.filepath,
                                "extraction failed, degrading: {err}"
                            );
                            ExtractedMetadata::degraded()
                        }
                    },
                };
                extractions.insert(file.filepath.clone(), extracted);
            }
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self
                .commit_batch(&prepared, &unchanged, source, root_id, request, &extractions)
                .await;
            match result {
                Ok(()) => break,
                Err(err) if attempt == 1 => {
                    warn!("batch transaction failed, retrying once: {err}");
                }
                Err(err) => return Err(err),
            }
        }

        stats.added += batch_added;
        stats.updated += batch_updated;
        stats.skipped += batch_skipped;
        Ok(prepared.iter().map(|file| file.filepath.clone()).collect())
    }

    async fn commit_batch(
        &self,
        prepared: &[&WalkedFile],
        unchanged: &[&WalkedFile],
        source: AssetSource,
        root_id: Option<&str>,
        request: &ScanRequest,
        extractions: &HashMap<String, ExtractedMetadata>,
    ) -> Result<()> {
        if prepared.is_empty() && unchanged.is_empty() {
            return Ok(());
        }
        let now = chrono::Utc::now().timestamp();
        let prepared: Vec<WalkedFile> =
            prepared.iter().map(|f| (*f).clone()).collect();
        let unchanged: Vec<WalkedFile> =
            unchanged.iter().map(|f| (*f).clone()).collect();
        let source = source.as_str().to_string();
        let root_id = root_id.map(str::to_string);
        let write_metadata = !request.fast && !request.background_metadata;
        let extractions = extractions.clone();
        let max_raw_bytes = self.max_raw_bytes;

        self.db
            .transaction(TxMode::Immediate, move |conn| {
                Box::pin(async move {
                    upsert_assets(conn, &prepared, &source, root_id.as_deref(), now)
                        .await?;
                    let mut journal_rows: Vec<&WalkedFile> = prepared.iter().collect();
                    journal_rows.extend(unchanged.iter());
                    upsert_journal(conn, &journal_rows, now).await?;
                    if write_metadata {
                        for file in &prepared {
                            if let Some(extracted) = extractions.get(&file.filepath) {
                                upsert_metadata(
                                    conn,
                                    file,
                                    extracted,
                                    now,
                                    max_raw_bytes,
                                )
                                .await?;
                            }
                        }
                    }
                    Ok(())
                })
            })
            .await
    }

    /// Resolve an asset id for a filepath, indexing the file first when it
    /// is not yet known. Used by rating/tags writes addressed by path.
    pub async fn resolve_or_create(&self, path: &Path) -> Result<i64> {
        let resolved = resolve_lenient(path);
        let (source, root_id, _base) = self
            .registry
            .classify_source(&resolved)
            .ok_or_else(|| {
                AssetError::Forbidden("path is outside allowed roots".to_string())
            })?;

        let key = self.registry.policy().canonical_key(&resolved);
        if let Some(id) = self.lookup_id(&key).await? {
            return Ok(id);
        }

        let budget = Duration::from_secs_f64(self.cfg.resolve_timeout_s);
        let index = self.index_files(
            std::slice::from_ref(&resolved),
            source,
            root_id.as_deref(),
            true,
            true,
            true,
        );
        match timeout(budget, index).await {
            Ok(result) => {
                result?;
            }
            Err(_) => {
                return Err(AssetError::Timeout(
                    "indexing did not finish in time".to_string(),
                ))
            }
        }

        self.lookup_id(&key).await?.ok_or_else(|| {
            AssetError::NotFound("asset not indexed after scan".to_string())
        })
    }

    async fn lookup_id(&self, filepath_key: &str) -> Result<Option<i64>> {
        let row = self
            .db
            .query_one(
                "SELECT id FROM assets WHERE filepath = ?",
                &params![filepath_key],
            )
            .await?;
        Ok(row.map(|row| row.try_get("id")).transpose()?)
    }
}

fn walk_directory(
    root: &Path,
    recursive: bool,
    stat_errors: &std::sync::atomic::AtomicU64,
) -> Vec<(PathBuf, std::fs::Metadata)> {
    let skipped: HashSet<&str> = SKIPPED_DIR_NAMES.iter().copied().collect();
    let mut out = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => {
                stat_errors.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                continue;
            }
        };
        for entry in entries {
            let Ok(entry) = entry else {
                stat_errors.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                continue;
            };
            let path = entry.path();
            let Ok(file_type) = entry.file_type() else {
                stat_errors.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                continue;
            };
            if file_type.is_dir() {
                if recursive {
                    let name = entry.file_name();
                    let name = name.to_string_lossy();
                    if !skipped.contains(name.as_ref()) && !name.starts_with('.') {
                        pending.push(path);
                    }
                }
                continue;
            }
            if !file_type.is_file() {
                continue;
            }
            let filename = entry.file_name().to_string_lossy().into_owned();
            if majoor_model::classify_file(&filename).is_none() {
                continue;
            }
            match entry.metadata() {
                Ok(meta) => out.push((path, meta)),
                Err(_) => {
                    stat_errors.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                }
            }
        }
    }
    out
}

/// Multi-row asset upsert. `kind` is immutable on conflict by design.
async fn upsert_assets(
    conn: &mut sqlx::SqliteConnection,
    files: &[WalkedFile],
    source: &str,
    root_id: Option<&str>,
    now: i64,
) -> Result<()> {
    const COLS: usize = 12;
    let rows_per_chunk = (crate::db::MAX_BIND_PARAMS / COLS).max(1);
    for chunk in files.chunks(rows_per_chunk) {
        let placeholders = vec!["(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"; chunk.len()]
            .join(", ");
        let sql = format!(
            "INSERT INTO assets (filepath, filename, subfolder, source, root_id, \
             kind, ext, size_bytes, mtime, created_at, updated_at, indexed_at) \
             VALUES {placeholders} \
             ON CONFLICT(filepath) DO UPDATE SET \
               filename = excluded.filename, \
               subfolder = excluded.subfolder, \
               source = excluded.source, \
               root_id = excluded.root_id, \
               size_bytes = excluded.size_bytes, \
               mtime = excluded.mtime, \
               updated_at = excluded.updated_at, \
               indexed_at = excluded.indexed_at"
        );
        let mut values = Vec::with_capacity(chunk.len() * COLS);
        for file in chunk {
            values.push(SqlValue::Text(file.filepath.clone()));
            values.push(SqlValue::Text(file.filename.clone()));
            values.push(SqlValue::Text(file.subfolder.clone()));
            values.push(SqlValue::Text(source.to_string()));
            values.push(match root_id {
                Some(rid) => SqlValue::Text(rid.to_string()),
                None => SqlValue::Null,
            });
            values.push(SqlValue::Text(file.kind.as_str().to_string()));
            values.push(SqlValue::Text(file.ext.clone()));
            values.push(SqlValue::Int(file.size));
            values.push(SqlValue::Int(file.mtime));
            values.push(SqlValue::Int(now));
            values.push(SqlValue::Int(now));
            values.push(SqlValue::Int(now));
        }
        exec_conn(conn, &sql, &values).await?;
    }
    Ok(())
}

/// Multi-row journal upsert, guarded by asset existence per filepath.
async fn upsert_journal(
    conn: &mut sqlx::SqliteConnection,
    files: &[&WalkedFile],
    now: i64,
) -> Result<()> {
    const COLS: usize = 6;
    let rows_per_chunk = (crate::db::MAX_BIND_PARAMS / COLS).max(1);
    for chunk in files.chunks(rows_per_chunk) {
        let placeholders = vec!["(?, ?, ?, ?, ?, ?)"; chunk.len()].join(", ");
        let sql = format!(
            "INSERT OR REPLACE INTO scan_journal \
             (filepath, dir_path, state_hash, mtime, size, last_seen) \
             SELECT column1, column2, column3, column4, column5, column6 \
             FROM (VALUES {placeholders}) \
             WHERE EXISTS (SELECT 1 FROM assets WHERE assets.filepath = column1)"
        );
        let mut values = Vec::with_capacity(chunk.len() * COLS);
        for file in chunk {
            let dir_path = Path::new(&file.filepath)
                .parent()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default();
            values.push(SqlValue::Text(file.filepath.clone()));
            values.push(SqlValue::Text(dir_path));
            values.push(SqlValue::Text(file.state_hash.clone()));
            values.push(SqlValue::Int(file.mtime));
            values.push(SqlValue::Int(file.size));
            values.push(SqlValue::Int(now));
        }
        exec_conn(conn, &sql, &values).await?;
    }
    Ok(())
}

async fn upsert_metadata(
    conn: &mut sqlx::SqliteConnection,
    file: &WalkedFile,
    extracted: &ExtractedMetadata,
    now: i64,
    max_raw_bytes: i64,
) -> Result<()> {
    if extracted.width.is_some()
        || extracted.height.is_some()
        || extracted.duration.is_some()
    {
        exec_conn(
            conn,
            "UPDATE assets SET width = COALESCE(?, width), \
             height = COALESCE(?, height), duration = COALESCE(?, duration) \
             WHERE filepath = ?",
            &params![
                extracted.width,
                extracted.height,
                extracted.duration,
                file.filepath.clone()
            ],
        )
        .await?;
    }

    let tags = majoor_model::normalize_tags(extracted.tags.iter());
    let tags_json = serde_json::to_string(&tags)?;
    let tags_text = tags.join(" ");
    let rating = extracted
        .rating
        .unwrap_or(0)
        .clamp(0, majoor_model::MAX_RATING);
    let wf_hash = extracted.workflow.as_ref().map(crate::metadata::workflow_hash);
    let wf_type = extracted
        .workflow
        .as_ref()
        .and_then(crate::metadata::workflow_type_of);
    let raw_json = match &extracted.raw {
        Some(raw) => {
            let serialized = serde_json::to_string(raw)?;
            (serialized.len() as i64 <= max_raw_bytes).then_some(serialized)
        }
        None => None,
    };

    exec_conn(
        conn,
        "INSERT INTO asset_metadata (asset_id, rating, tags, tags_text, \
         workflow_hash, workflow_type, has_workflow, has_generation_data, \
         quality, raw, updated_at) \
         SELECT a.id, ?, ?, ?, ?, ?, ?, ?, ?, ?, ? FROM assets a \
         WHERE a.filepath = ? \
         ON CONFLICT(asset_id) DO UPDATE SET \
           rating = CASE WHEN asset_metadata.rating > 0 \
                         THEN asset_metadata.rating ELSE excluded.rating END, \
           tags = CASE WHEN asset_metadata.tags != '[]' \
                       THEN asset_metadata.tags ELSE excluded.tags END, \
           tags_text = CASE WHEN asset_metadata.tags != '[]' \
                            THEN asset_metadata.tags_text ELSE excluded.tags_text END, \
           workflow_hash = excluded.workflow_hash, \
           workflow_type = excluded.workflow_type, \
           has_workflow = excluded.has_workflow, \
           has_generation_data = excluded.has_generation_data, \
           quality = excluded.quality, \
           raw = excluded.raw, \
           updated_at = excluded.updated_at",
        &params![
            rating,
            tags_json,
            tags_text,
            wf_hash,
            wf_type,
            extracted.has_workflow(),
            extracted.has_generation_data(),
            extracted.quality.as_str(),
            raw_json.clone(),
            now,
            file.filepath.clone()
        ],
    )
    .await?;

    if let Some(raw) = raw_json {
        exec_conn(
            conn,
            "INSERT OR REPLACE INTO metadata_cache \
             (filepath, state_hash, payload, created_at) VALUES (?, ?, ?, ?)",
            &params![file.filepath.clone(), file.state_hash.clone(), raw, now],
        )
        .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn journal_skip_predicate() {
        // Matching hash + fast scan skips regardless of metadata.
        assert!(should_skip_by_journal(true, Some("h"), "h", true, None, false));
        // Matching hash + rich metadata skips a full scan.
        assert!(should_skip_by_journal(true, Some("h"), "h", false, Some(1), true));
        // Full scan without rich metadata must not skip.
        assert!(!should_skip_by_journal(true, Some("h"), "h", false, Some(1), false));
        // Hash mismatch never skips.
        assert!(!should_skip_by_journal(true, Some("x"), "h", true, Some(1), true));
        // Non-incremental never skips.
        assert!(!should_skip_by_journal(false, Some("h"), "h", true, Some(1), true));
    }

    #[test]
    fn incremental_unchanged_predicate() {
        assert!(is_incremental_unchanged(true, Some((1, 100)), 100));
        assert!(!is_incremental_unchanged(true, Some((1, 100)), 101));
        assert!(!is_incremental_unchanged(true, None, 100));
        assert!(!is_incremental_unchanged(false, Some((1, 100)), 100));
    }

    #[test]
    fn state_hash_changes_with_inputs() {
        let a = state_hash_parts("/out/a.png", 1_000, 10);
        assert_eq!(a, state_hash_parts("/out/a.png", 1_000, 10));
        assert_ne!(a, state_hash_parts("/out/a.png", 2_000, 10));
        assert_ne!(a, state_hash_parts("/out/a.png", 1_000, 11));
        assert_ne!(a, state_hash_parts("/out/b.png", 1_000, 10));
    }

    #[test]
    fn walk_skips_index_dir_and_unknown_kinds() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.png"), b"x").expect("write");
        std::fs::write(dir.path().join("notes.txt"), b"x").expect("write");
        let nested = dir.path().join("sub");
        std::fs::create_dir_all(&nested).expect("mkdir");
        std::fs::write(nested.join("b.mp4"), b"x").expect("write");
        let index_dir = dir.path().join("_mjr_index");
        std::fs::create_dir_all(&index_dir).expect("mkdir");
        std::fs::write(index_dir.join("c.png"), b"x").expect("write");

        let errors = std::sync::atomic::AtomicU64::new(0);
        let files = walk_directory(dir.path(), true, &errors);
        let names: Vec<String> = files
            .iter()
            .map(|(p, _)| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert!(names.contains(&"a.png".to_string()));
        assert!(names.contains(&"b.mp4".to_string()));
        assert!(!names.contains(&"notes.txt".to_string()));
        assert!(!names.contains(&"c.png".to_string()));

        let flat = walk_directory(dir.path(), false, &errors);
        assert_eq!(flat.len(), 1);
    }
}

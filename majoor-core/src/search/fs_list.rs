//! Filesystem listing fallback with a short-lived cache.
//!
//! Serves scopes the index does not cover yet (input before its first
//! scan, custom browser mode). The walk applies the same filter
//! vocabulary as the indexed path, rows are hydrated from the index when
//! their filepaths are already known, and repeated listings inside the
//! TTL are served from a process-wide cache validated by the directory's
//! mtime and a watch token.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use majoor_model::{AssetSource, ListFilters, SortKey};
use sqlx::Row;

use crate::db::SqlValue;
use crate::error::{AssetError, Result};
use crate::roots::{resolve_lenient, safe_rel_path};
use crate::search::query::matches_text_query;
use crate::search::{ListPage, ListedAsset, SearchEngine};

/// Hard ceiling on entries collected per walk; a listing is a UI page,
/// not an export.
const MAX_WALK_ENTRIES: usize = 100_000;

#[derive(Debug, Clone)]
pub struct FsListRequest {
    pub base: PathBuf,
    pub subfolder: String,
    pub query: String,
    pub filters: ListFilters,
    pub sort: SortKey,
    pub limit: usize,
    pub offset: usize,
    pub source: AssetSource,
    pub root_id: Option<String>,
    pub hydrate: bool,
}

#[derive(Debug, Clone)]
struct FsEntry {
    path: PathBuf,
    filename: String,
    subfolder: String,
    kind: &'static str,
    ext: String,
    size: i64,
    mtime: i64,
}

#[derive(Debug)]
struct CacheSlot {
    dir_mtime_ns: i64,
    watch_token: u64,
    created: Instant,
    entries: Arc<Vec<FsEntry>>,
}

/// `(base, target, source, root_id)`-keyed listing cache.
#[derive(Debug)]
pub struct FsListCache {
    slots: Mutex<HashMap<String, CacheSlot>>,
    watch_token: AtomicU64,
    max_slots: usize,
    ttl_s: f64,
}

impl FsListCache {
    pub fn new(max_slots: usize, ttl_s: f64) -> Self {
        FsListCache {
            slots: Mutex::new(HashMap::new()),
            watch_token: AtomicU64::new(0),
            max_slots,
            ttl_s,
        }
    }

    /// Invalidate every cached listing (filesystem activity observed).
    pub fn invalidate_all(&self) {
        self.watch_token.fetch_add(1, Ordering::Relaxed);
    }

    fn current_token(&self) -> u64 {
        self.watch_token.load(Ordering::Relaxed)
    }

    fn get(&self, key: &str, dir_mtime_ns: i64) -> Option<Arc<Vec<FsEntry>>> {
        let slots = self.slots.lock().expect("fs cache lock");
        let slot = slots.get(key)?;
        if slot.dir_mtime_ns != dir_mtime_ns
            || slot.watch_token != self.current_token()
            || slot.created.elapsed().as_secs_f64() > self.ttl_s
        {
            return None;
        }
        Some(Arc::clone(&slot.entries))
    }

    fn put(&self, key: String, dir_mtime_ns: i64, entries: Arc<Vec<FsEntry>>) {
        let mut slots = self.slots.lock().expect("fs cache lock");
        if slots.len() >= self.max_slots {
            let oldest = slots
                .iter()
                .min_by_key(|(_, slot)| slot.created)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                slots.remove(&oldest);
            }
        }
        slots.insert(
            key,
            CacheSlot {
                dir_mtime_ns,
                watch_token: self.current_token(),
                created: Instant::now(),
                entries,
            },
        );
    }
}

fn dir_mtime_ns(path: &Path) -> i64 {
    std::fs::metadata(path)
        .ok()
        .and_then(|meta| meta.modified().ok())
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

fn collect_entries(base: &Path, target: &Path) -> Vec<FsEntry> {
    let mut out = Vec::new();
    let mut pending = vec![target.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            if out.len() >= MAX_WALK_ENTRIES {
                return out;
            }
            let path = entry.path();
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            if file_type.is_dir() {
                if !name.starts_with('.') && !name.starts_with("_mjr_") {
                    pending.push(path);
                }
                continue;
            }
            if !file_type.is_file() {
                continue;
            }
            let Some(kind) = majoor_model::classify_file(&name) else {
                continue;
            };
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            let subfolder = path
                .parent()
                .and_then(|parent| parent.strip_prefix(base).ok())
                .map(|rel| rel.to_string_lossy().replace('\\', "/"))
                .unwrap_or_default();
            let ext = Path::new(&name)
                .extension()
                .map(|e| e.to_string_lossy().to_ascii_lowercase())
                .unwrap_or_default();
            out.push(FsEntry {
                mtime: meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_secs() as i64)
                    .unwrap_or(0),
                size: meta.len() as i64,
                path,
                filename: name,
                subfolder,
                kind: kind.as_str(),
                ext,
            });
        }
    }
    out
}

fn entry_passes_filters(entry: &FsEntry, filters: &ListFilters) -> bool {
    if let Some(kind) = filters.kind {
        if entry.kind != kind.as_str() {
            return false;
        }
    }
    if let Some(min) = filters.min_size_bytes {
        if entry.size < min {
            return false;
        }
    }
    if let Some(max) = filters.max_size_bytes {
        if entry.size > max {
            return false;
        }
    }
    if !filters.extensions.is_empty()
        && !filters.extensions.iter().any(|ext| *ext == entry.ext)
    {
        return false;
    }
    if let Some(start) = filters.mtime_start {
        if entry.mtime < start {
            return false;
        }
    }
    if let Some(end) = filters.mtime_end {
        if entry.mtime > end {
            return false;
        }
    }
    true
}

fn sort_entries(entries: &mut [FsEntry], sort: SortKey) {
    match sort {
        SortKey::MtimeDesc => entries.sort_by(|a, b| {
            (b.mtime, b.path.to_string_lossy().to_lowercase())
                .cmp(&(a.mtime, a.path.to_string_lossy().to_lowercase()))
        }),
        SortKey::MtimeAsc => entries.sort_by(|a, b| {
            (a.mtime, a.path.to_string_lossy().to_lowercase())
                .cmp(&(b.mtime, b.path.to_string_lossy().to_lowercase()))
        }),
        SortKey::NameAsc => entries.sort_by(|a, b| {
            (a.filename.to_lowercase(), a.path.to_string_lossy().to_lowercase())
                .cmp(&(b.filename.to_lowercase(), b.path.to_string_lossy().to_lowercase()))
        }),
        SortKey::NameDesc => entries.sort_by(|a, b| {
            (b.filename.to_lowercase(), b.path.to_string_lossy().to_lowercase())
                .cmp(&(a.filename.to_lowercase(), a.path.to_string_lossy().to_lowercase()))
        }),
        SortKey::None => {}
    }
}

impl SearchEngine {
    /// List a directory with the shared filter vocabulary, serving from
    /// the listing cache when its validity key still matches.
    pub async fn list_filesystem(&self, request: &FsListRequest) -> Result<ListPage> {
        let rel = safe_rel_path(&request.subfolder)?;
        let target = resolve_lenient(&request.base.join(rel));
        let base = resolve_lenient(&request.base);
        let policy = self.registry().policy();
        let base_key = policy.canonical_key(&base);
        let target_key = policy.canonical_key(&target);
        if target_key != base_key
            && !target_key.starts_with(&format!("{base_key}/"))
        {
            return Err(AssetError::Forbidden(
                "listing target escapes its base".to_string(),
            ));
        }
        if !target.is_dir() {
            return Err(AssetError::DirNotFound(
                target.to_string_lossy().into_owned(),
            ));
        }

        let cache_key = format!(
            "{base_key}|{target_key}|{}|{}",
            request.source,
            request.root_id.as_deref().unwrap_or("")
        );
        let mtime_ns = dir_mtime_ns(&target);
        let entries = match self.fs_cache().get(&cache_key, mtime_ns) {
            Some(entries) => entries,
            None => {
                let base_clone = base.clone();
                let target_clone = target.clone();
                let collected = tokio::task::spawn_blocking(move || {
                    collect_entries(&base_clone, &target_clone)
                })
                .await
                .map_err(|err| {
                    AssetError::internal(format!("listing walk failed: {err}"))
                })?;
                let entries = Arc::new(collected);
                self.fs_cache()
                    .put(cache_key, mtime_ns, Arc::clone(&entries));
                entries
            }
        };

        let mut filters = request.filters.clone();
        filters.normalize_ranges();
        let mut filtered: Vec<FsEntry> = entries
            .iter()
            .filter(|entry| {
                matches_text_query(&request.query, &entry.filename, &entry.subfolder)
                    && entry_passes_filters(entry, &filters)
            })
            .cloned()
            .collect();
        sort_entries(&mut filtered, request.sort);

        let total = filtered.len() as i64;
        let limit = request.limit.min(self.config().max_limit);
        let page: Vec<FsEntry> = filtered
            .into_iter()
            .skip(request.offset)
            .take(limit)
            .collect();

        let mut assets: Vec<ListedAsset> = page
            .into_iter()
            .map(|entry| ListedAsset {
                id: None,
                filepath: policy.canonical_key(&entry.path),
                filename: entry.filename,
                subfolder: entry.subfolder,
                scope_type: request.source.as_str().to_string(),
                kind: entry.kind.to_string(),
                ext: entry.ext,
                size_bytes: entry.size,
                mtime: entry.mtime,
                width: None,
                height: None,
                duration: None,
                rating: 0,
                tags: Vec::new(),
                has_workflow: false,
                workflow_type: None,
                root_id: request.root_id.clone(),
                folder: false,
            })
            .collect();

        if request.hydrate {
            self.hydrate_from_index(&mut assets).await?;
        }
        if let Some(min_rating) = filters.min_rating {
            if min_rating > 0 {
                let before = assets.len() as i64;
                assets.retain(|asset| asset.rating >= min_rating);
                // Unhydrated rows cannot satisfy a rating filter; the
                // total is adjusted by what this page lost.
                return Ok(ListPage {
                    total: (total - (before - assets.len() as i64)).max(0),
                    assets,
                    limit,
                    offset: request.offset,
                });
            }
        }

        Ok(ListPage {
            assets,
            total,
            limit,
            offset: request.offset,
        })
    }

    /// Enrich filesystem rows whose filepaths already exist in the index
    /// with their id, rating, tags, workflow flags, and root id. Folder
    /// rows are skipped.
    pub async fn hydrate_from_index(&self, assets: &mut [ListedAsset]) -> Result<()> {
        let lookups: Vec<SqlValue> = assets
            .iter()
            .filter(|asset| !asset.folder)
            .take(self.config().max_filepath_lookup)
            .map(|asset| SqlValue::Text(asset.filepath.clone()))
            .collect();
        if lookups.is_empty() {
            return Ok(());
        }
        let rows = self
            .db()
            .query_in(
                "SELECT a.filepath, a.id, a.root_id, a.width, a.height, \
                 a.duration, COALESCE(m.rating, 0) AS rating, \
                 COALESCE(m.tags, '[]') AS tags, \
                 COALESCE(m.has_workflow, 0) AS has_workflow, m.workflow_type \
                 FROM assets a \
                 LEFT JOIN asset_metadata m ON m.asset_id = a.id \
                 WHERE a.filepath IN ({IN})",
                &[],
                &lookups,
            )
            .await?;

        let mut by_filepath: HashMap<String, &sqlx::sqlite::SqliteRow> =
            HashMap::new();
        for row in &rows {
            if let Ok(filepath) = row.try_get::<String, _>("filepath") {
                by_filepath.insert(filepath, row);
            }
        }
        for asset in assets.iter_mut() {
            if asset.folder {
                continue;
            }
            let Some(row) = by_filepath.get(&asset.filepath) else {
                continue;
            };
            asset.id = row.try_get("id").ok();
            asset.rating = row.try_get("rating").unwrap_or(0);
            asset.width = row.try_get("width").ok();
            asset.height = row.try_get("height").ok();
            asset.duration = row.try_get("duration").ok();
            asset.has_workflow =
                row.try_get::<i64, _>("has_workflow").unwrap_or(0) != 0;
            asset.workflow_type = row.try_get("workflow_type").ok();
            if asset.root_id.is_none() {
                asset.root_id = row.try_get("root_id").ok();
            }
            let tags_raw: String =
                row.try_get("tags").unwrap_or_else(|_| "[]".to_string());
            asset.tags = serde_json::from_str(&tags_raw).unwrap_or_default();
        }
        Ok(())
    }

    /// Immediate subdirectories of a custom-root subfolder, as folder rows
    /// prepended by the custom scope's first page.
    pub fn list_visible_subfolders(
        &self,
        base: &Path,
        subfolder: &str,
        root_id: &str,
    ) -> Result<Vec<ListedAsset>> {
        let rel = safe_rel_path(subfolder)?;
        let target = resolve_lenient(&base.join(rel));
        let policy = self.registry().policy();
        let base_key = policy.canonical_key(base);
        let target_key = policy.canonical_key(&target);
        if target_key != base_key
            && !target_key.starts_with(&format!("{base_key}/"))
        {
            return Err(AssetError::Forbidden(
                "listing target escapes its base".to_string(),
            ));
        }
        let mut out = Vec::new();
        let Ok(entries) = std::fs::read_dir(&target) else {
            return Ok(out);
        };
        for entry in entries.flatten() {
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if !file_type.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || name.starts_with("_mjr_") {
                continue;
            }
            let path = entry.path();
            let mtime = std::fs::metadata(&path)
                .ok()
                .and_then(|meta| meta.modified().ok())
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);
            let subfolder = path
                .strip_prefix(base)
                .map(|rel| rel.to_string_lossy().replace('\\', "/"))
                .unwrap_or_default();
            out.push(ListedAsset {
                id: None,
                filepath: policy.canonical_key(&path),
                filename: name,
                subfolder,
                scope_type: "custom".to_string(),
                kind: "folder".to_string(),
                ext: String::new(),
                size_bytes: 0,
                mtime,
                width: None,
                height: None,
                duration: None,
                rating: 0,
                tags: Vec::new(),
                has_workflow: false,
                workflow_type: None,
                root_id: Some(root_id.to_string()),
                folder: true,
            });
        }
        out.sort_by(|a, b| a.filename.to_lowercase().cmp(&b.filename.to_lowercase()));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::tests::engine_with_fixtures;

    async fn make_tree(engine: &std::sync::Arc<SearchEngine>) -> PathBuf {
        let base = engine.registry().output_root();
        std::fs::create_dir_all(base.join("renders")).expect("mkdir");
        std::fs::write(base.join("a.png"), vec![0u8; 10]).expect("write");
        std::fs::write(base.join("b.jpg"), vec![0u8; 2048]).expect("write");
        std::fs::write(base.join("renders/c.mp4"), vec![0u8; 64]).expect("write");
        std::fs::write(base.join("ignore.txt"), b"x").expect("write");
        base
    }

    #[tokio::test]
    async fn walk_filters_and_paginates() {
        let (_dir, _db, engine) = engine_with_fixtures().await;
        let base = make_tree(&engine).await;

        let page = engine
            .list_filesystem(&FsListRequest {
                base: base.clone(),
                subfolder: String::new(),
                query: "*".to_string(),
                filters: ListFilters::default(),
                sort: SortKey::NameAsc,
                limit: 10,
                offset: 0,
                source: AssetSource::Output,
                root_id: None,
                hydrate: false,
            })
            .await
            .expect("list");
        assert_eq!(page.total, 3);
        let names: Vec<&str> =
            page.assets.iter().map(|a| a.filename.as_str()).collect();
        assert_eq!(names, vec!["a.png", "b.jpg", "c.mp4"]);

        // Size filter applies the shared vocabulary.
        let page = engine
            .list_filesystem(&FsListRequest {
                base: base.clone(),
                subfolder: String::new(),
                query: "*".to_string(),
                filters: ListFilters {
                    min_size_bytes: Some(1000),
                    ..Default::default()
                },
                sort: SortKey::NameAsc,
                limit: 10,
                offset: 0,
                source: AssetSource::Output,
                root_id: None,
                hydrate: false,
            })
            .await
            .expect("list");
        assert_eq!(page.total, 1);
        assert_eq!(page.assets[0].filename, "b.jpg");
    }

    #[tokio::test]
    async fn subfolder_escape_is_forbidden() {
        let (_dir, _db, engine) = engine_with_fixtures().await;
        let base = make_tree(&engine).await;
        let err = engine
            .list_filesystem(&FsListRequest {
                base,
                subfolder: "../..".to_string(),
                query: "*".to_string(),
                filters: ListFilters::default(),
                sort: SortKey::NameAsc,
                limit: 10,
                offset: 0,
                source: AssetSource::Output,
                root_id: None,
                hydrate: false,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AssetError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn hydration_attaches_index_rows() {
        let (_dir, db, engine) = engine_with_fixtures().await;
        let base = make_tree(&engine).await;
        let policy = engine.registry().policy();
        let key = policy.canonical_key(&base.join("a.png"));
        db.execute(
            "INSERT INTO assets (filepath, filename, subfolder, source, kind, ext, size_bytes, mtime) \
             VALUES (?, 'a.png', '', 'output', 'image', 'png', 10, 5)",
            &crate::params![key.clone()],
        )
        .await
        .expect("insert");
        db.execute(
            "INSERT INTO asset_metadata (asset_id, rating, tags, tags_text) \
             SELECT id, 3, '[\"hero\"]', 'hero' FROM assets WHERE filepath = ?",
            &crate::params![key],
        )
        .await
        .expect("meta");

        let page = engine
            .list_filesystem(&FsListRequest {
                base,
                subfolder: String::new(),
                query: "a".to_string(),
                filters: ListFilters::default(),
                sort: SortKey::NameAsc,
                limit: 10,
                offset: 0,
                source: AssetSource::Output,
                root_id: None,
                hydrate: true,
            })
            .await
            .expect("list");
        assert_eq!(page.assets.len(), 1);
        let hydrated = &page.assets[0];
        assert!(hydrated.id.is_some());
        assert_eq!(hydrated.rating, 3);
        assert_eq!(hydrated.tags, vec!["hero".to_string()]);
    }

    #[tokio::test]
    async fn repeated_listing_hits_cache() {
        let (_dir, _db, engine) = engine_with_fixtures().await;
        let base = make_tree(&engine).await;
        let request = FsListRequest {
            base,
            subfolder: String::new(),
            query: "*".to_string(),
            filters: ListFilters::default(),
            sort: SortKey::MtimeDesc,
            limit: 10,
            offset: 0,
            source: AssetSource::Output,
            root_id: None,
            hydrate: false,
        };
        let first = engine.list_filesystem(&request).await.expect("list");
        let second = engine.list_filesystem(&request).await.expect("list");
        assert_eq!(first.total, second.total);
        let a: Vec<&str> = first.assets.iter().map(|x| x.filename.as_str()).collect();
        let b: Vec<&str> = second.assets.iter().map(|x| x.filename.as_str()).collect();
        assert_eq!(a, b, "cache serves identical pages");
    }

    #[tokio::test]
    async fn visible_subfolders_are_folder_rows() {
        let (_dir, _db, engine) = engine_with_fixtures().await;
        let base = make_tree(&engine).await;
        let folders = engine
            .list_visible_subfolders(&base, "", "root-1")
            .expect("folders");
        assert_eq!(folders.len(), 1);
        assert!(folders[0].folder);
        assert_eq!(folders[0].kind, "folder");
        assert_eq!(folders[0].root_id.as_deref(), Some("root-1"));
    }
}

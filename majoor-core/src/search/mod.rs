//! Search and listing engine.
//!
//! Indexed scopes run a single FTS-joined query with deterministic sort
//! tie-breaks and optional COUNT; unindexed scopes fall back to a
//! filesystem walk with the same filter vocabulary (see `fs_list`), and
//! the `all` scope merges both streams with stable pagination until the
//! input root has been indexed.

pub mod dupes;
mod fs_list;
pub mod query;

pub use dupes::{DuplicateGroup, DuplicateReport};
pub use fs_list::{FsListCache, FsListRequest};

use std::sync::Arc;

use majoor_config::SearchConfig;
use majoor_model::{ListFilters, SortKey};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::db::{Database, SqlValue};
use crate::error::Result;
use crate::index::PauseToken;
use crate::params;
use crate::roots::RootRegistry;
use crate::search::query::{build_match_expression, escape_like_prefix};

/// One row in a listing response. Filesystem rows carry no `id` until
/// hydration finds them in the index.
#[derive(Debug, Clone, Serialize)]
pub struct ListedAsset {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub filepath: String,
    pub filename: String,
    pub subfolder: String,
    #[serde(rename = "type")]
    pub scope_type: String,
    pub kind: String,
    pub ext: String,
    pub size_bytes: i64,
    pub mtime: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    pub rating: i64,
    pub tags: Vec<String>,
    pub has_workflow: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_id: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub folder: bool,
}

/// A page of results plus the (optionally computed) total.
#[derive(Debug, Clone, Serialize)]
pub struct ListPage {
    pub assets: Vec<ListedAsset>,
    pub total: i64,
    pub limit: usize,
    pub offset: usize,
}

/// Parameters for one indexed query.
#[derive(Debug, Clone)]
pub struct SearchParams {
    pub query: String,
    /// Path prefixes (canonical keys) the results must live under.
    pub roots: Vec<String>,
    pub filters: ListFilters,
    pub sort: SortKey,
    pub limit: usize,
    pub offset: usize,
    pub include_total: bool,
}

#[derive(Debug)]
pub struct SearchEngine {
    db: Arc<Database>,
    registry: Arc<RootRegistry>,
    cfg: SearchConfig,
    pause: Arc<PauseToken>,
    fs_cache: FsListCache,
}

const SELECT_COLUMNS: &str = "a.id, a.filepath, a.filename, a.subfolder, \
    a.source, a.root_id, a.kind, a.ext, a.size_bytes, a.mtime, a.width, \
    a.height, a.duration, COALESCE(m.rating, 0) AS rating, \
    COALESCE(m.tags, '[]') AS tags, \
    COALESCE(m.has_workflow, 0) AS has_workflow, m.workflow_type";

impl SearchEngine {
    pub fn new(
        db: Arc<Database>,
        registry: Arc<RootRegistry>,
        cfg: SearchConfig,
        pause: Arc<PauseToken>,
    ) -> Arc<Self> {
        let fs_cache = FsListCache::new(cfg.fs_cache_max, cfg.fs_cache_ttl_s);
        Arc::new(SearchEngine {
            db,
            registry,
            cfg,
            pause,
            fs_cache,
        })
    }

    pub fn config(&self) -> &SearchConfig {
        &self.cfg
    }

    pub fn registry(&self) -> &Arc<RootRegistry> {
        &self.registry
    }

    pub(crate) fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub(crate) fn fs_cache(&self) -> &FsListCache {
        &self.fs_cache
    }

    /// Mark UI interactivity so enrichment workers yield for a short
    /// window.
    pub fn touch_interaction_pause(&self, seconds: f64) {
        self.pause.touch(seconds);
    }

    /// Indexed query over the given root prefixes.
    pub async fn search_scoped(&self, params: &SearchParams) -> Result<ListPage> {
        let limit = params.limit.min(self.cfg.max_limit);
        let mut filters = params.filters.clone();
        filters.normalize_ranges();

        let (mut conditions, mut binds, match_join) =
            self.build_where(&params.query, &params.roots, &filters);

        let order_by = order_clause(params.sort);
        let mut sql = format!(
            "SELECT {SELECT_COLUMNS} FROM assets a \
             LEFT JOIN asset_metadata m ON m.asset_id = a.id{match_join}"
        );
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(order_by);
        sql.push_str(" LIMIT ? OFFSET ?");
        binds.push(SqlValue::Int(limit as i64));
        binds.push(SqlValue::Int(params.offset as i64));

        let rows = self.db.query(&sql, &binds).await?;
        let assets: Vec<ListedAsset> =
            rows.iter().map(listed_from_row).collect::<Result<_>>()?;

        let total = if params.include_total {
            // Rebuild without LIMIT binds.
            let (count_conditions, count_binds, count_match) =
                self.build_where(&params.query, &params.roots, &filters);
            conditions = count_conditions;
            let mut count_sql = format!(
                "SELECT COUNT(*) AS n FROM assets a \
                 LEFT JOIN asset_metadata m ON m.asset_id = a.id{count_match}"
            );
            if !conditions.is_empty() {
                count_sql.push_str(" WHERE ");
                count_sql.push_str(&conditions.join(" AND "));
            }
            let row = self.db.query_one(&count_sql, &count_binds).await?;
            row.map(|row| row.try_get::<i64, _>("n"))
                .transpose()?
                .unwrap_or(0)
        } else {
            assets.len() as i64
        };

        Ok(ListPage {
            assets,
            total,
            limit,
            offset: params.offset,
        })
    }

    fn build_where(
        &self,
        query: &str,
        roots: &[String],
        filters: &ListFilters,
    ) -> (Vec<String>, Vec<SqlValue>, &'static str) {
        let mut conditions = Vec::new();
        let mut binds = Vec::new();
        let mut match_join = "";

        if let Some(expression) = build_match_expression(query, &self.cfg) {
            match_join = " JOIN assets_fts fts ON fts.rowid = a.id";
            conditions.push("fts MATCH ?".to_string());
            binds.push(SqlValue::Text(expression));
        }

        if !roots.is_empty() {
            let policy = self.registry.policy();
            let mut parts = Vec::new();
            for root in roots {
                let key = policy.canonical_key_str(root);
                parts.push("a.filepath LIKE ? ESCAPE '\\'".to_string());
                binds.push(SqlValue::Text(format!(
                    "{}/%",
                    escape_like_prefix(key.trim_end_matches('/'))
                )));
            }
            conditions.push(format!("({})", parts.join(" OR ")));
        }

        if let Some(kind) = filters.kind {
            conditions.push("a.kind = ?".to_string());
            binds.push(SqlValue::Text(kind.as_str().to_string()));
        }
        if let Some(source) = &filters.source {
            conditions.push("a.source = ?".to_string());
            binds.push(SqlValue::Text(source.clone()));
        }
        if let Some(min_rating) = filters.min_rating {
            if min_rating > 0 {
                conditions.push("COALESCE(m.rating, 0) >= ?".to_string());
                binds.push(SqlValue::Int(min_rating));
            }
        }
        if let Some(min) = filters.min_size_bytes {
            conditions.push("a.size_bytes >= ?".to_string());
            binds.push(SqlValue::Int(min));
        }
        if let Some(max) = filters.max_size_bytes {
            conditions.push("a.size_bytes <= ?".to_string());
            binds.push(SqlValue::Int(max));
        }
        if let Some(min) = filters.min_width {
            conditions.push("a.width >= ?".to_string());
            binds.push(SqlValue::Int(min));
        }
        if let Some(max) = filters.max_width {
            conditions.push("a.width <= ?".to_string());
            binds.push(SqlValue::Int(max));
        }
        if let Some(min) = filters.min_height {
            conditions.push("a.height >= ?".to_string());
            binds.push(SqlValue::Int(min));
        }
        if let Some(max) = filters.max_height {
            conditions.push("a.height <= ?".to_string());
            binds.push(SqlValue::Int(max));
        }
        if let Some(workflow_type) = &filters.workflow_type {
            conditions.push("m.workflow_type = ?".to_string());
            binds.push(SqlValue::Text(workflow_type.clone()));
        }
        if let Some(has_workflow) = filters.has_workflow {
            if has_workflow {
                conditions.push("COALESCE(m.has_workflow, 0) = 1".to_string());
            } else {
                conditions.push("COALESCE(m.has_workflow, 0) = 0".to_string());
            }
        }
        if !filters.extensions.is_empty() {
            let placeholders = vec!["?"; filters.extensions.len()].join(", ");
            conditions.push(format!("a.ext IN ({placeholders})"));
            for ext in &filters.extensions {
                binds.push(SqlValue::Text(ext.clone()));
            }
        }
        if let Some(start) = filters.mtime_start {
            conditions.push("a.mtime >= ?".to_string());
            binds.push(SqlValue::Int(start));
        }
        if let Some(end) = filters.mtime_end {
            conditions.push("a.mtime <= ?".to_string());
            binds.push(SqlValue::Int(end));
        }
        if let Some(exclude) = &filters.exclude_root {
            let key = self.registry.policy().canonical_key_str(exclude);
            conditions.push("a.filepath NOT LIKE ? ESCAPE '\\'".to_string());
            binds.push(SqlValue::Text(format!(
                "{}/%",
                escape_like_prefix(key.trim_end_matches('/'))
            )));
        }

        (conditions, binds, match_join)
    }

    /// Per-day asset counts for `[start_ts, end_ts)` under the given root
    /// prefixes, keyed by local-time `YYYY-MM-DD`. Drives the calendar UI
    /// that marks days with assets.
    pub async fn date_histogram_scoped(
        &self,
        roots: &[String],
        start_ts: i64,
        end_ts: i64,
        filters: &ListFilters,
    ) -> Result<std::collections::BTreeMap<String, i64>> {
        let mut filters = filters.clone();
        filters.normalize_ranges();
        // The shared filter vocabulary carries inclusive bounds; the
        // histogram window is half-open.
        filters.mtime_start = Some(start_ts);
        filters.mtime_end = Some(end_ts - 1);

        let (conditions, binds, match_join) =
            self.build_where("*", roots, &filters);
        let mut sql = format!(
            "SELECT date(a.mtime, 'unixepoch', 'localtime') AS day, \
             COUNT(*) AS n \
             FROM assets a \
             LEFT JOIN asset_metadata m ON m.asset_id = a.id{match_join}"
        );
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(" GROUP BY day ORDER BY day");

        let rows = self.db.query(&sql, &binds).await?;
        let mut days = std::collections::BTreeMap::new();
        for row in rows {
            let day: String = row.try_get("day")?;
            let count: i64 = row.try_get("n")?;
            days.insert(day, count);
        }
        Ok(days)
    }

    /// True when any asset row lives under the given root prefix.
    pub async fn has_assets_under_root(&self, root: &str) -> Result<bool> {
        let key = self.registry.policy().canonical_key_str(root);
        let row = self
            .db
            .query_one(
                "SELECT 1 AS hit FROM assets \
                 WHERE filepath LIKE ? ESCAPE '\\' LIMIT 1",
                &params![format!(
                    "{}/%",
                    escape_like_prefix(key.trim_end_matches('/'))
                )],
            )
            .await?;
        Ok(row.is_some())
    }

    /// Fetch assets by ids, bounded by the configured batch cap.
    pub async fn assets_by_ids(&self, ids: &[i64]) -> Result<Vec<ListedAsset>> {
        let ids: Vec<SqlValue> = ids
            .iter()
            .take(self.cfg.max_batch_ids)
            .map(|id| SqlValue::Int(*id))
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self
            .db
            .query_in(
                &format!(
                    "SELECT {SELECT_COLUMNS} FROM assets a \
                     LEFT JOIN asset_metadata m ON m.asset_id = a.id \
                     WHERE a.id IN ({{IN}})"
                ),
                &[],
                &ids,
            )
            .await?;
        rows.iter().map(listed_from_row).collect()
    }

    pub async fn asset_by_id(&self, id: i64) -> Result<Option<ListedAsset>> {
        Ok(self.assets_by_ids(&[id]).await?.into_iter().next())
    }

    /// Distinct tag vocabulary across the index.
    pub async fn all_tags(&self) -> Result<Vec<String>> {
        let rows = self
            .db
            .query(
                "SELECT tags FROM asset_metadata WHERE tags != '[]' LIMIT ?",
                &params![self.cfg.max_filepath_lookup],
            )
            .await?;
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for row in rows {
            let raw: String = row.try_get("tags").unwrap_or_default();
            let Ok(tags) = serde_json::from_str::<Vec<String>>(&raw) else {
                continue;
            };
            for tag in tags {
                if seen.insert(tag.to_lowercase()) {
                    out.push(tag);
                }
            }
        }
        out.sort_by_key(|tag| tag.to_lowercase());
        Ok(out)
    }

    /// Prefix completion: tag vocabulary first, then filenames.
    pub async fn autocomplete(&self, prefix: &str, limit: usize) -> Result<Vec<String>> {
        let prefix = prefix.trim().to_lowercase();
        let limit = limit.clamp(1, 50);
        let mut out: Vec<String> = Vec::new();
        if prefix.is_empty() {
            return Ok(out);
        }

        for tag in self.all_tags().await? {
            if tag.to_lowercase().starts_with(&prefix) {
                out.push(tag);
                if out.len() >= limit {
                    return Ok(out);
                }
            }
        }

        let rows = self
            .db
            .query(
                "SELECT DISTINCT filename FROM assets \
                 WHERE lower(filename) LIKE ? ESCAPE '\\' \
                 ORDER BY filename LIMIT ?",
                &params![
                    format!("{}%", escape_like_prefix(&prefix)),
                    (limit - out.len())
                ],
            )
            .await?;
        for row in rows {
            let name: String = row.try_get("filename").unwrap_or_default();
            if !name.is_empty() {
                out.push(name);
            }
        }
        Ok(out)
    }

    /// Merge the indexed output stream with the filesystem input stream in
    /// global sort order. Used for `scope=all` until the input root has
    /// been indexed; pagination is deterministic over unchanged state.
    pub async fn merged_all(
        &self,
        query: &str,
        filters: &ListFilters,
        sort: SortKey,
        limit: usize,
        offset: usize,
    ) -> Result<ListPage> {
        let this = self;
        let output_root = this.registry.output_root();
        let input_root = this.registry.input_root();
        let chunk = (limit.max(1) * 2).clamp(50, 500);

        let mut out_filters = filters.clone();
        out_filters.source = Some("output".to_string());

        let mut out_buf: Vec<ListedAsset> = Vec::new();
        let mut in_buf: Vec<ListedAsset> = Vec::new();
        let mut out_offset = 0usize;
        let mut in_offset = 0usize;
        let mut out_total: Option<i64> = None;
        // A missing input directory contributes an empty stream.
        let mut in_total: Option<i64> = if input_root.is_dir() {
            None
        } else {
            Some(0)
        };
        let mut out_index = 0usize;
        let mut in_index = 0usize;

        macro_rules! fill_out {
            () => {
                if out_total.map(|t| (out_offset as i64) < t).unwrap_or(true) {
                    let page = this
                        .search_scoped(&SearchParams {
                            query: query.to_string(),
                            roots: vec![output_root.to_string_lossy().into_owned()],
                            filters: out_filters.clone(),
                            sort,
                            limit: chunk,
                            offset: out_offset,
                            include_total: true,
                        })
                        .await?;
                    out_total = Some(page.total);
                    out_offset += page.assets.len();
                    let mut items = page.assets;
                    for item in &mut items {
                        item.scope_type = "output".to_string();
                    }
                    out_buf.extend(items);
                }
            };
        }
        macro_rules! fill_in {
            () => {
                if in_total.map(|t| (in_offset as i64) < t).unwrap_or(true) {
                    let page = this
                        .list_filesystem(&FsListRequest {
                            base: input_root.clone(),
                            subfolder: String::new(),
                            query: query.to_string(),
                            filters: filters.clone(),
                            sort,
                            limit: chunk,
                            offset: in_offset,
                            source: majoor_model::AssetSource::Input,
                            root_id: None,
                            hydrate: true,
                        })
                        .await?;
                    in_total = Some(page.total);
                    in_offset += page.assets.len();
                    in_buf.extend(page.assets);
                }
            };
        }

        fill_out!();
        fill_in!();

        let total = out_total.unwrap_or(0) + in_total.unwrap_or(0);
        if limit == 0 {
            return Ok(ListPage {
                assets: Vec::new(),
                total,
                limit,
                offset,
            });
        }

        let target = offset + limit;
        let mut produced = 0usize;
        let mut page = Vec::new();
        loop {
            if out_index >= out_buf.len()
                && out_total.map(|t| (out_offset as i64) < t).unwrap_or(false)
            {
                fill_out!();
            }
            if in_index >= in_buf.len()
                && in_total.map(|t| (in_offset as i64) < t).unwrap_or(false)
            {
                fill_in!();
            }
            let out_has = out_index < out_buf.len();
            let in_has = in_index < in_buf.len();
            if !out_has && !in_has {
                break;
            }
            let pick_out = match (out_has, in_has) {
                (true, true) => pick_first(
                    &out_buf[out_index],
                    &in_buf[in_index],
                    sort,
                ),
                (true, false) => true,
                (false, true) => false,
                (false, false) => unreachable!(),
            };
            let item = if pick_out {
                out_index += 1;
                out_buf[out_index - 1].clone()
            } else {
                in_index += 1;
                in_buf[in_index - 1].clone()
            };
            if produced >= offset {
                page.push(item);
                if page.len() >= limit {
                    break;
                }
            }
            produced += 1;
            if produced >= target && page.len() >= limit {
                break;
            }
        }

        Ok(dedupe_page(
            ListPage {
                assets: page,
                total,
                limit,
                offset,
            },
            this.registry.policy(),
        ))
    }
}

/// Stable comparator for the two-stream merge: true picks the output item.
fn pick_first(a: &ListedAsset, b: &ListedAsset, sort: SortKey) -> bool {
    let key = |item: &ListedAsset| {
        (
            item.mtime,
            item.filepath.to_lowercase(),
            item.filename.to_lowercase(),
        )
    };
    match sort {
        SortKey::MtimeDesc | SortKey::None => key(a) >= key(b),
        SortKey::MtimeAsc => key(a) <= key(b),
        SortKey::NameAsc => {
            (a.filename.to_lowercase(), a.filepath.to_lowercase())
                <= (b.filename.to_lowercase(), b.filepath.to_lowercase())
        }
        SortKey::NameDesc => {
            (a.filename.to_lowercase(), a.filepath.to_lowercase())
                >= (b.filename.to_lowercase(), b.filepath.to_lowercase())
        }
    }
}

fn order_clause(sort: SortKey) -> &'static str {
    match sort {
        SortKey::MtimeDesc => " ORDER BY a.mtime DESC, a.filepath DESC",
        SortKey::MtimeAsc => " ORDER BY a.mtime ASC, a.filepath ASC",
        SortKey::NameAsc => " ORDER BY lower(a.filename) ASC, a.filepath ASC",
        SortKey::NameDesc => " ORDER BY lower(a.filename) DESC, a.filepath DESC",
        SortKey::None => "",
    }
}

pub(crate) fn listed_from_row(row: &SqliteRow) -> Result<ListedAsset> {
    let tags_raw: String = row.try_get("tags").unwrap_or_else(|_| "[]".to_string());
    let tags = serde_json::from_str::<Vec<String>>(&tags_raw).unwrap_or_default();
    let source: String = row.try_get("source")?;
    Ok(ListedAsset {
        id: Some(row.try_get("id")?),
        filepath: row.try_get("filepath")?,
        filename: row.try_get("filename")?,
        subfolder: row.try_get("subfolder")?,
        scope_type: source,
        kind: row.try_get("kind")?,
        ext: row.try_get("ext")?,
        size_bytes: row.try_get("size_bytes")?,
        mtime: row.try_get("mtime")?,
        width: row.try_get("width").ok(),
        height: row.try_get("height").ok(),
        duration: row.try_get("duration").ok(),
        rating: row.try_get("rating").unwrap_or(0),
        tags,
        has_workflow: row.try_get::<i64, _>("has_workflow").unwrap_or(0) != 0,
        workflow_type: row.try_get("workflow_type").ok(),
        root_id: row.try_get("root_id").ok(),
        folder: false,
    })
}

/// Dedupe a page by case-normalized filepath; `total` shrinks by the
/// number of removed rows so pagination math stays consistent.
pub fn dedupe_page(page: ListPage, policy: crate::roots::PathPolicy) -> ListPage {
    let mut seen = std::collections::HashSet::new();
    let before = page.assets.len();
    let assets: Vec<ListedAsset> = page
        .assets
        .into_iter()
        .filter(|asset| {
            asset.folder || seen.insert(policy.canonical_key_str(&asset.filepath))
        })
        .collect();
    let removed = (before - assets.len()) as i64;
    ListPage {
        assets,
        total: (page.total - removed).max(0),
        limit: page.limit,
        offset: page.offset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roots::{CustomRootStore, PathPolicy};
    use majoor_config::DbConfig;

    pub(super) async fn engine_with_fixtures(
    ) -> (tempfile::TempDir, Arc<Database>, Arc<SearchEngine>) {
        let dir = tempfile::tempdir().expect("tempdir");
        let output = dir.path().join("output");
        std::fs::create_dir_all(&output).expect("mkdir");
        let db = Arc::new(
            Database::open(dir.path().join("assets.sqlite"), DbConfig::default())
                .await
                .expect("open"),
        );
        let policy = PathPolicy {
            case_insensitive: false,
        };
        let custom = Arc::new(CustomRootStore::new(
            dir.path().join("custom_roots.json"),
            policy,
        ));
        let registry = Arc::new(RootRegistry::new(policy, custom));
        registry.set_output_override(Some(output));
        let engine = SearchEngine::new(
            Arc::clone(&db),
            registry,
            SearchConfig::default(),
            Arc::new(PauseToken::default()),
        );
        (dir, db, engine)
    }

    async fn seed(db: &Arc<Database>, engine: &Arc<SearchEngine>) {
        let root = engine.registry().output_root();
        let root = root.to_string_lossy();
        let rows: &[(&str, i64, i64, &str)] = &[
            ("b_newest.png", 300, 10, "image"),
            ("a_oldest.png", 100, 20, "image"),
            ("clip.mp4", 200, 5000, "video"),
            ("same_mtime_1.png", 250, 30, "image"),
            ("same_mtime_2.png", 250, 30, "image"),
        ];
        for (name, mtime, size, kind) in rows {
            db.execute(
                "INSERT INTO assets (filepath, filename, subfolder, source, kind, ext, size_bytes, mtime) \
                 VALUES (?, ?, '', 'output', ?, ?, ?, ?)",
                &params![
                    format!("{root}/{name}"),
                    *name,
                    *kind,
                    name.rsplit('.').next().unwrap(),
                    *size,
                    *mtime
                ],
            )
            .await
            .expect("insert");
        }
    }

    #[tokio::test]
    async fn mtime_desc_is_deterministic_with_filepath_tiebreak() {
        let (_dir, db, engine) = engine_with_fixtures().await;
        seed(&db, &engine).await;
        let root = engine.registry().output_root();
        let params = SearchParams {
            query: "*".to_string(),
            roots: vec![root.to_string_lossy().into_owned()],
            filters: ListFilters::default(),
            sort: SortKey::MtimeDesc,
            limit: 10,
            offset: 0,
            include_total: true,
        };
        let first = engine.search_scoped(&params).await.expect("search");
        let second = engine.search_scoped(&params).await.expect("search");
        assert_eq!(first.total, 5);
        let names: Vec<&str> = first
            .assets
            .iter()
            .map(|a| a.filename.as_str())
            .collect();
        let names2: Vec<&str> = second
            .assets
            .iter()
            .map(|a| a.filename.as_str())
            .collect();
        assert_eq!(names, names2, "identical requests return identical rows");
        // Equal mtimes break ties by filepath DESC.
        assert_eq!(names[0], "b_newest.png");
        assert_eq!(names[1], "same_mtime_2.png");
        assert_eq!(names[2], "same_mtime_1.png");
    }

    #[tokio::test]
    async fn filters_restrict_kind_and_size() {
        let (_dir, db, engine) = engine_with_fixtures().await;
        seed(&db, &engine).await;
        let root = engine.registry().output_root();
        let page = engine
            .search_scoped(&SearchParams {
                query: "*".to_string(),
                roots: vec![root.to_string_lossy().into_owned()],
                filters: ListFilters {
                    kind: Some(majoor_model::AssetKind::Image),
                    max_size_bytes: Some(25),
                    ..Default::default()
                },
                sort: SortKey::NameAsc,
                limit: 10,
                offset: 0,
                include_total: true,
            })
            .await
            .expect("search");
        let names: Vec<&str> =
            page.assets.iter().map(|a| a.filename.as_str()).collect();
        assert_eq!(names, vec!["a_oldest.png", "b_newest.png"]);
    }

    #[tokio::test]
    async fn fts_query_matches_filenames() {
        let (_dir, db, engine) = engine_with_fixtures().await;
        seed(&db, &engine).await;
        let root = engine.registry().output_root();
        let page = engine
            .search_scoped(&SearchParams {
                query: "clip".to_string(),
                roots: vec![root.to_string_lossy().into_owned()],
                filters: ListFilters::default(),
                sort: SortKey::MtimeDesc,
                limit: 10,
                offset: 0,
                include_total: true,
            })
            .await
            .expect("search");
        assert_eq!(page.total, 1);
        assert_eq!(page.assets[0].filename, "clip.mp4");
    }

    #[tokio::test]
    async fn limit_zero_returns_total_only() {
        let (_dir, db, engine) = engine_with_fixtures().await;
        seed(&db, &engine).await;
        let root = engine.registry().output_root();
        let page = engine
            .search_scoped(&SearchParams {
                query: "*".to_string(),
                roots: vec![root.to_string_lossy().into_owned()],
                filters: ListFilters::default(),
                sort: SortKey::MtimeDesc,
                limit: 0,
                offset: 0,
                include_total: true,
            })
            .await
            .expect("search");
        assert!(page.assets.is_empty());
        assert_eq!(page.total, 5);
    }

    #[tokio::test]
    async fn date_histogram_buckets_by_day() {
        let (_dir, db, engine) = engine_with_fixtures().await;
        let root = engine.registry().output_root();
        let root_str = root.to_string_lossy().into_owned();
        // Two assets on one day, one asset two days later; 48 hours apart
        // guarantees distinct local days regardless of UTC offset.
        let day_one = 1_700_000_000i64;
        let day_two = day_one + 48 * 3600;
        let rows: &[(&str, i64, &str)] = &[
            ("one_a.png", day_one, "image"),
            ("one_b.png", day_one + 60, "image"),
            ("two.mp4", day_two, "video"),
        ];
        for (name, mtime, kind) in rows {
            db.execute(
                "INSERT INTO assets (filepath, filename, subfolder, source, kind, ext, size_bytes, mtime) \
                 VALUES (?, ?, '', 'output', ?, ?, 1, ?)",
                &params![
                    format!("{root_str}/{name}"),
                    *name,
                    *kind,
                    name.rsplit('.').next().unwrap(),
                    *mtime
                ],
            )
            .await
            .expect("insert");
        }

        let days = engine
            .date_histogram_scoped(
                std::slice::from_ref(&root_str),
                day_one - 3600,
                day_two + 3600,
                &ListFilters::default(),
            )
            .await
            .expect("histogram");
        let mut counts: Vec<i64> = days.values().copied().collect();
        counts.sort_unstable();
        assert_eq!(counts, vec![1, 2]);

        // The filter vocabulary applies: kind=video keeps only day two.
        let days = engine
            .date_histogram_scoped(
                std::slice::from_ref(&root_str),
                day_one - 3600,
                day_two + 3600,
                &ListFilters {
                    kind: Some(majoor_model::AssetKind::Video),
                    ..Default::default()
                },
            )
            .await
            .expect("histogram");
        assert_eq!(days.values().copied().collect::<Vec<i64>>(), vec![1]);

        // The window is half-open: an end bound at day two's timestamp
        // excludes it.
        let days = engine
            .date_histogram_scoped(
                std::slice::from_ref(&root_str),
                day_one - 3600,
                day_two,
                &ListFilters::default(),
            )
            .await
            .expect("histogram");
        assert_eq!(days.values().sum::<i64>(), 2);
    }

    #[tokio::test]
    async fn autocomplete_prefers_tags_over_filenames() {
        let (_dir, db, engine) = engine_with_fixtures().await;
        seed(&db, &engine).await;
        let root = engine.registry().output_root();
        db.execute(
            "INSERT INTO asset_metadata (asset_id, rating, tags, tags_text) \
             SELECT id, 0, '[\"cliffside\"]', 'cliffside' FROM assets \
             WHERE filepath = ?",
            &params![format!("{}/a_oldest.png", root.to_string_lossy())],
        )
        .await
        .expect("tag");

        let results = engine.autocomplete("cli", 10).await.expect("autocomplete");
        assert_eq!(results[0], "cliffside");
        assert!(results.contains(&"clip.mp4".to_string()));
    }

    #[test]
    fn dedupe_adjusts_total() {
        let policy = PathPolicy {
            case_insensitive: true,
        };
        let mk = |fp: &str| ListedAsset {
            id: None,
            filepath: fp.to_string(),
            filename: "x.png".to_string(),
            subfolder: String::new(),
            scope_type: "output".to_string(),
            kind: "image".to_string(),
            ext: "png".to_string(),
            size_bytes: 1,
            mtime: 1,
            width: None,
            height: None,
            duration: None,
            rating: 0,
            tags: Vec::new(),
            has_workflow: false,
            workflow_type: None,
            root_id: None,
            folder: false,
        };
        let page = ListPage {
            assets: vec![mk("/out/X.png"), mk("/out/x.png"), mk("/out/y.png")],
            total: 10,
            limit: 50,
            offset: 0,
        };
        let deduped = dedupe_page(page, policy);
        assert_eq!(deduped.assets.len(), 2);
        assert_eq!(deduped.total, 9);
    }
}

//! Listing, search, autocomplete, and read-side asset endpoints.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::HeaderMap;
use majoor_core::search::{FsListRequest, ListPage, SearchParams};
use majoor_core::MetadataExtractor;
use majoor_model::{AssetSource, ErrorCode, ListFilters, Scope, SortKey};
use serde_json::{json, Value};
use sqlx::Row;
use tracing::debug;

use crate::envelope::Envelope;
use crate::state::AppState;

use super::{parse_list_query, truthy_param};

const LIST_RATE_LIMIT: (usize, u64) = (50, 60);
const AUTOCOMPLETE_RATE_LIMIT: (usize, u64) = (40, 60);

fn page_payload(
    page: ListPage,
    query: &str,
    scope: Scope,
    sort: SortKey,
    mode: Option<&str>,
) -> Value {
    let mut payload = json!({
        "assets": page.assets,
        "total": page.total,
        "limit": page.limit,
        "offset": page.offset,
        "query": query,
        "scope": scope.as_str(),
        "sort": sort.as_str(),
    });
    if let Some(mode) = mode {
        payload["mode"] = Value::String(mode.to_string());
    }
    payload
}

/// Opportunistically index a directory in the background, throttled so a
/// busy UI does not queue redundant scans.
pub(crate) fn kickoff_background_scan(
    state: &AppState,
    dir: &Path,
    source: AssetSource,
    root_id: Option<String>,
    recursive: bool,
    fast: bool,
) {
    let dir_str = dir.to_string_lossy().into_owned();
    if state.indexer.throttle().should_skip_background_scan(
        &dir_str,
        source.as_str(),
        root_id.as_deref(),
        true,
    ) {
        return;
    }
    let indexer = state.indexer.clone();
    let request = majoor_model::ScanRequest {
        root: dir_str,
        recursive,
        incremental: true,
        source: Some(source),
        root_id,
        fast,
        background_metadata: true,
    };
    tokio::spawn(async move {
        if let Err(err) = indexer.scan(&request).await {
            debug!("background scan failed: {err}");
        }
    });
}

pub async fn list_assets(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Envelope {
    let ctx = state.request_context(&axum::http::Method::GET, &headers, &addr);
    if let Err(err) = state.rate_limit(&ctx, "list_assets", LIST_RATE_LIMIT.0, LIST_RATE_LIMIT.1) {
        return err.into();
    }
    if let Err(err) = state.maintenance.ensure_inactive() {
        return err.into();
    }

    let scope_raw = query.get("scope").map(String::as_str).unwrap_or("output");
    let Some(scope) = Scope::parse(scope_raw) else {
        return Envelope::err(
            ErrorCode::InvalidInput,
            format!("Unknown scope: {scope_raw}"),
        );
    };
    let (text, filters, sort, limit, offset, include_total) =
        match parse_list_query(&query, state.search.config()) {
            Ok(parsed) => parsed,
            Err(err) => return err.into(),
        };

    state.search.touch_interaction_pause(state.config.enrich.interaction_pause_s);

    match scope {
        Scope::Output => {
            list_output(&state, &text, filters, sort, limit, offset, include_total)
                .await
        }
        Scope::Input => {
            list_input(&state, &query, &text, filters, sort, limit, offset, include_total)
                .await
        }
        Scope::All => {
            list_all(&state, &text, filters, sort, limit, offset, include_total).await
        }
        Scope::Custom | Scope::Browser => {
            let force_browser = matches!(scope, Scope::Browser);
            list_custom(
                &state,
                &ctx,
                &query,
                &text,
                filters,
                sort,
                limit,
                offset,
                force_browser,
            )
            .await
        }
    }
}

async fn list_output(
    state: &AppState,
    text: &str,
    mut filters: ListFilters,
    sort: SortKey,
    limit: usize,
    offset: usize,
    include_total: bool,
) -> Envelope {
    let output_root = state.registry.output_root();
    let input_root = state.registry.input_root();
    filters.source = Some("output".to_string());
    filters.exclude_root = Some(input_root.to_string_lossy().into_owned());

    let params = SearchParams {
        query: text.to_string(),
        roots: vec![output_root.to_string_lossy().into_owned()],
        filters: filters.clone(),
        sort,
        limit,
        offset,
        include_total: true,
    };
    let page = match state.search.search_scoped(&params).await {
        Ok(page) => page,
        Err(err) => return err.into(),
    };

    // Empty index on an initial listing: serve the filesystem so the grid
    // populates immediately, and build the index in the background.
    let is_initial = text == "*" && offset == 0 && filters_is_default(&filters);
    if is_initial && page.total == 0 {
        kickoff_background_scan(
            state,
            &output_root,
            AssetSource::Output,
            None,
            false,
            true,
        );
        let fs_page = state
            .search
            .list_filesystem(&FsListRequest {
                base: output_root,
                subfolder: String::new(),
                query: text.to_string(),
                filters: ListFilters::default(),
                sort,
                limit,
                offset,
                source: AssetSource::Output,
                root_id: None,
                hydrate: true,
            })
            .await;
        return match fs_page {
            Ok(page) => {
                let page =
                    majoor_core::search::dedupe_page(page, state.registry.policy());
                Envelope::ok(page_payload(
                    page,
                    text,
                    Scope::Output,
                    sort,
                    Some("filesystem"),
                ))
            }
            Err(err) => err.into(),
        };
    }

    let page = majoor_core::search::dedupe_page(page, state.registry.policy());
    let _ = include_total;
    Envelope::ok(page_payload(page, text, Scope::Output, sort, None))
}

fn filters_is_default(filters: &ListFilters) -> bool {
    let mut stripped = filters.clone();
    stripped.source = None;
    stripped.exclude_root = None;
    stripped.is_empty()
}

#[allow(clippy::too_many_arguments)]
async fn list_input(
    state: &AppState,
    query: &HashMap<String, String>,
    text: &str,
    mut filters: ListFilters,
    sort: SortKey,
    limit: usize,
    offset: usize,
    include_total: bool,
) -> Envelope {
    let input_root = state.registry.input_root();
    let indexed = state
        .search
        .has_assets_under_root(&input_root.to_string_lossy())
        .await
        .unwrap_or(false);

    if indexed {
        filters.source = Some("input".to_string());
        let params = SearchParams {
            query: text.to_string(),
            roots: vec![input_root.to_string_lossy().into_owned()],
            filters,
            sort,
            limit,
            offset,
            include_total,
        };
        return match state.search.search_scoped(&params).await {
            Ok(page) => {
                let page =
                    majoor_core::search::dedupe_page(page, state.registry.policy());
                Envelope::ok(page_payload(page, text, Scope::Input, sort, None))
            }
            Err(err) => err.into(),
        };
    }

    if !input_root.is_dir() {
        return Envelope::ok(page_payload(
            ListPage {
                assets: Vec::new(),
                total: 0,
                limit,
                offset,
            },
            text,
            Scope::Input,
            sort,
            Some("filesystem"),
        ));
    }
    if text == "*" && offset == 0 && filters.is_empty() {
        kickoff_background_scan(
            state,
            &input_root,
            AssetSource::Input,
            None,
            false,
            false,
        );
    }
    let subfolder = query.get("subfolder").cloned().unwrap_or_default();
    match state
        .search
        .list_filesystem(&FsListRequest {
            base: input_root,
            subfolder,
            query: text.to_string(),
            filters,
            sort,
            limit,
            offset,
            source: AssetSource::Input,
            root_id: None,
            hydrate: true,
        })
        .await
    {
        Ok(page) => {
            let page = majoor_core::search::dedupe_page(page, state.registry.policy());
            Envelope::ok(page_payload(
                page,
                text,
                Scope::Input,
                sort,
                Some("filesystem"),
            ))
        }
        Err(err) => err.into(),
    }
}

async fn list_all(
    state: &AppState,
    text: &str,
    filters: ListFilters,
    sort: SortKey,
    limit: usize,
    offset: usize,
    include_total: bool,
) -> Envelope {
    let output_root = state.registry.output_root();
    let input_root = state.registry.input_root();
    let input_indexed = state
        .search
        .has_assets_under_root(&input_root.to_string_lossy())
        .await
        .unwrap_or(false);

    if input_indexed {
        let params = SearchParams {
            query: text.to_string(),
            roots: vec![
                output_root.to_string_lossy().into_owned(),
                input_root.to_string_lossy().into_owned(),
            ],
            filters,
            sort,
            limit,
            offset,
            include_total,
        };
        return match state.search.search_scoped(&params).await {
            Ok(page) => {
                let page =
                    majoor_core::search::dedupe_page(page, state.registry.policy());
                Envelope::ok(page_payload(page, text, Scope::All, sort, None))
            }
            Err(err) => err.into(),
        };
    }

    if text == "*" && offset == 0 && filters.is_empty() {
        kickoff_background_scan(
            state,
            &input_root,
            AssetSource::Input,
            None,
            false,
            false,
        );
    }
    match state
        .search
        .merged_all(text, &filters, sort, limit, offset)
        .await
    {
        Ok(page) => Envelope::ok(page_payload(
            page,
            text,
            Scope::All,
            sort,
            Some("merged"),
        )),
        Err(err) => err.into(),
    }
}

#[allow(clippy::too_many_arguments)]
async fn list_custom(
    state: &AppState,
    ctx: &majoor_core::RequestContext,
    query: &HashMap<String, String>,
    text: &str,
    filters: ListFilters,
    sort: SortKey,
    limit: usize,
    offset: usize,
    force_browser: bool,
) -> Envelope {
    let subfolder = query.get("subfolder").cloned().unwrap_or_default();
    let root_id = query
        .get("custom_root_id")
        .or_else(|| query.get("root_id"))
        .map(|raw| raw.trim().to_string())
        .unwrap_or_default();
    let browser_mode = force_browser || truthy_param(query, "browser_mode");

    if root_id.is_empty() {
        if !browser_mode {
            return Envelope::err(ErrorCode::InvalidInput, "Missing custom_root_id");
        }
        // Browser mode walks arbitrary configured roots; loopback only.
        if !majoor_core::security::is_loopback_ip(&state.security.resolve_client_ip(ctx)) {
            return Envelope::err(
                ErrorCode::Forbidden,
                "Custom browser mode is loopback-only",
            );
        }
        let mut folders = Vec::new();
        for root in state.registry.custom_roots().list() {
            if !root.offline && !root.invalid {
                folders.push(json!({
                    "id": root.id,
                    "path": root.path,
                    "label": root.label,
                    "folder": true,
                }));
            }
        }
        return Envelope::ok(json!({
            "assets": folders,
            "total": folders.len(),
            "limit": limit,
            "offset": offset,
            "scope": "browser",
        }));
    }

    let root_dir = match state.registry.custom_roots().resolve(&root_id) {
        Ok(dir) => dir,
        Err(err) => return err.into(),
    };

    if text == "*" && offset == 0 && filters.is_empty() {
        kickoff_background_scan(
            state,
            &root_dir,
            AssetSource::Custom,
            Some(root_id.clone()),
            false,
            false,
        );
    }

    let kind_filtered = filters.kind.is_some();
    let page = match state
        .search
        .list_filesystem(&FsListRequest {
            base: root_dir.clone(),
            subfolder: subfolder.clone(),
            query: text.to_string(),
            filters,
            sort,
            limit,
            offset,
            source: AssetSource::Custom,
            root_id: Some(root_id.clone()),
            hydrate: true,
        })
        .await
    {
        Ok(page) => majoor_core::search::dedupe_page(page, state.registry.policy()),
        Err(err) => return err.into(),
    };

    // First page interleaves visible subfolders ahead of files so the UI
    // can navigate; a kind filter implies files-only.
    let mut assets = page.assets;
    let mut total = page.total;
    if offset == 0 && !kind_filtered {
        let mut folders = match state
            .search
            .list_visible_subfolders(&root_dir, &subfolder, &root_id)
        {
            Ok(folders) => folders,
            Err(err) => return err.into(),
        };
        if text != "*" && !text.is_empty() {
            let needle = text.to_lowercase();
            folders.retain(|folder| folder.filename.to_lowercase().contains(&needle));
        }
        total += folders.len() as i64;
        folders.extend(assets);
        assets = folders;
    }

    Envelope::ok(json!({
        "assets": assets,
        "total": total,
        "limit": limit,
        "offset": offset,
        "query": text,
        "scope": "custom",
        "sort": sort.as_str(),
    }))
}

pub async fn search_assets(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Envelope {
    let ctx = state.request_context(&axum::http::Method::GET, &headers, &addr);
    if let Err(err) =
        state.rate_limit(&ctx, "search_assets", LIST_RATE_LIMIT.0, LIST_RATE_LIMIT.1)
    {
        return err.into();
    }
    if let Err(err) = state.maintenance.ensure_inactive() {
        return err.into();
    }
    let (text, filters, sort, limit, offset, include_total) =
        match parse_list_query(&query, state.search.config()) {
            Ok(parsed) => parsed,
            Err(err) => return err.into(),
        };
    state.search.touch_interaction_pause(state.config.enrich.interaction_pause_s);

    let params = SearchParams {
        query: text.clone(),
        roots: Vec::new(),
        filters,
        sort,
        limit,
        offset,
        include_total,
    };
    match state.search.search_scoped(&params).await {
        Ok(page) => {
            let page = majoor_core::search::dedupe_page(page, state.registry.policy());
            Envelope::ok(page_payload(page, &text, Scope::All, sort, None))
        }
        Err(err) => err.into(),
    }
}

/// Convert `YYYY-MM` to `[start_ts, end_ts)` in local time.
fn month_bounds(month: &str) -> Option<(i64, i64)> {
    use chrono::TimeZone;

    let (year_raw, month_raw) = month.trim().split_once('-')?;
    let year: i32 = year_raw.parse().ok()?;
    let mon: u32 = month_raw.parse().ok()?;
    let start_date = chrono::NaiveDate::from_ymd_opt(year, mon, 1)?;
    let (next_year, next_mon) = if mon == 12 {
        (year + 1, 1)
    } else {
        (year, mon + 1)
    };
    let end_date = chrono::NaiveDate::from_ymd_opt(next_year, next_mon, 1)?;
    let to_local_ts = |date: chrono::NaiveDate| {
        chrono::Local
            .from_local_datetime(&date.and_hms_opt(0, 0, 0)?)
            .earliest()
            .map(|dt| dt.timestamp())
    };
    Some((to_local_ts(start_date)?, to_local_ts(end_date)?))
}

/// Day-to-count mapping for one month; drives the calendar view that
/// marks days with assets.
pub async fn date_histogram(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Envelope {
    let ctx = state.request_context(&axum::http::Method::GET, &headers, &addr);
    if let Err(err) = state.rate_limit(
        &ctx,
        "date_histogram",
        LIST_RATE_LIMIT.0,
        LIST_RATE_LIMIT.1,
    ) {
        return err.into();
    }
    if let Err(err) = state.maintenance.ensure_inactive() {
        return err.into();
    }

    let month = query.get("month").map(String::as_str).unwrap_or("").trim();
    if month.is_empty() {
        return Envelope::err(ErrorCode::InvalidInput, "Missing month (YYYY-MM)");
    }
    let Some((month_start, month_end)) = month_bounds(month) else {
        return Envelope::err(
            ErrorCode::InvalidInput,
            "Invalid month (expected YYYY-MM)",
        );
    };

    let mut filters = ListFilters::default();
    if let Some(kind) = query.get("kind") {
        filters.kind = match majoor_model::AssetKind::parse(kind) {
            Some(kind) => Some(kind),
            None => {
                return Envelope::err(
                    ErrorCode::InvalidInput,
                    "Invalid kind. Must be one of: audio, image, model3d, video",
                )
            }
        };
    }
    if let Some(raw) = query.get("min_rating") {
        let rating = match raw.trim().parse::<i64>() {
            Ok(rating) => rating,
            Err(_) => {
                return Envelope::err(ErrorCode::InvalidInput, "Invalid min_rating")
            }
        };
        filters.min_rating = Some(rating.clamp(0, majoor_model::MAX_RATING));
    }
    if let Some(raw) = query.get("has_workflow") {
        filters.has_workflow = Some(matches!(
            raw.trim().to_ascii_lowercase().as_str(),
            "true" | "1" | "yes"
        ));
    }

    let output_root = state.registry.output_root();
    let input_root = state.registry.input_root();
    let scope = query.get("scope").map(String::as_str).unwrap_or("output");
    let roots = match scope.trim().to_ascii_lowercase().as_str() {
        "input" => vec![input_root.to_string_lossy().into_owned()],
        "all" => vec![
            output_root.to_string_lossy().into_owned(),
            input_root.to_string_lossy().into_owned(),
        ],
        "custom" => {
            let root_id = query
                .get("custom_root_id")
                .or_else(|| query.get("root_id"))
                .map(String::as_str)
                .unwrap_or("");
            match state.registry.custom_roots().resolve(root_id) {
                Ok(root) => vec![root.to_string_lossy().into_owned()],
                Err(err) => return err.into(),
            }
        }
        _ => vec![output_root.to_string_lossy().into_owned()],
    };

    match state
        .search
        .date_histogram_scoped(&roots, month_start, month_end, &filters)
        .await
    {
        Ok(days) => Envelope::ok(json!({ "month": month, "days": days })),
        Err(err) => err.into(),
    }
}

pub async fn autocomplete(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Envelope {
    let ctx = state.request_context(&axum::http::Method::GET, &headers, &addr);
    if let Err(err) = state.rate_limit(
        &ctx,
        "autocomplete",
        AUTOCOMPLETE_RATE_LIMIT.0,
        AUTOCOMPLETE_RATE_LIMIT.1,
    ) {
        return err.into();
    }
    let prefix = query.get("q").map(String::as_str).unwrap_or("").trim();
    let limit = query
        .get("limit")
        .and_then(|raw| raw.trim().parse::<usize>().ok())
        .unwrap_or(10)
        .clamp(1, 50);
    state.search.touch_interaction_pause(state.config.enrich.interaction_pause_s * 0.8);
    crate::envelope::respond(state.search.autocomplete(prefix, limit).await)
}

pub async fn all_tags(State(state): State<AppState>) -> Envelope {
    crate::envelope::respond(state.search.all_tags().await)
}

pub async fn get_asset(
    State(state): State<AppState>,
    axum::extract::Path(id): axum::extract::Path<i64>,
) -> Envelope {
    match state.search.asset_by_id(id).await {
        Ok(Some(asset)) => Envelope::ok(asset),
        Ok(None) => Envelope::err(ErrorCode::NotFound, format!("Asset not found: {id}")),
        Err(err) => err.into(),
    }
}

pub async fn assets_batch(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Envelope {
    let ctx = state.request_context(&axum::http::Method::POST, &headers, &addr);
    if let Err(err) = state.csrf_guard(&ctx) {
        return err.into();
    }
    let payload = match state.parse_json_body(&body) {
        Ok(payload) => payload,
        Err(err) => return err.into(),
    };
    let Some(raw_ids) = payload.get("asset_ids").and_then(Value::as_array) else {
        return Envelope::err(ErrorCode::InvalidInput, "asset_ids must be a list");
    };
    let ids: Vec<i64> = raw_ids
        .iter()
        .filter_map(Value::as_i64)
        .filter(|id| *id > 0)
        .take(state.search.config().max_batch_ids)
        .collect();
    crate::envelope::respond(state.search.assets_by_ids(&ids).await)
}

pub async fn workflow_quick(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Envelope {
    let filename = query.get("filename").map(String::as_str).unwrap_or("");
    if filename.is_empty() {
        return Envelope::err(ErrorCode::InvalidInput, "Missing filename");
    }
    let subfolder = query.get("subfolder").map(String::as_str).unwrap_or("");
    let source = query
        .get("type")
        .and_then(|raw| AssetSource::parse(raw))
        .unwrap_or(AssetSource::Output);
    let root_id = query.get("root_id").map(String::as_str).unwrap_or("");

    let mut sql = "SELECT m.raw, m.has_workflow FROM assets a \
                   JOIN asset_metadata m ON m.asset_id = a.id \
                   WHERE a.filename = ? AND a.subfolder = ? AND a.source = ?"
        .to_string();
    let mut params = majoor_core::params![filename, subfolder, source.as_str()];
    if !root_id.is_empty() {
        sql.push_str(" AND a.root_id = ?");
        params.push(majoor_core::SqlValue::Text(root_id.to_string()));
    }

    match state.db.query_one(&sql, &params).await {
        Ok(Some(row)) => {
            let has_workflow = row.try_get::<i64, _>("has_workflow").unwrap_or(0) != 0;
            let raw: Option<String> = row.try_get("raw").ok();
            let workflow = raw
                .filter(|_| has_workflow)
                .and_then(|raw| serde_json::from_str::<Value>(&raw).ok())
                .and_then(|payload| payload.get("workflow").cloned());
            Envelope::ok(workflow.unwrap_or(Value::Null))
        }
        Ok(None) => Envelope::ok(Value::Null),
        Err(err) => err.into(),
    }
}

pub async fn asset_metadata(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Envelope {
    let filename = query.get("filename").map(String::as_str).unwrap_or("");
    if filename.is_empty() {
        return Envelope::err(ErrorCode::InvalidInput, "Missing filename");
    }
    if filename.contains(['/', '\\', '\0']) {
        return Envelope::err(ErrorCode::InvalidInput, "Invalid filename");
    }
    let subfolder = query.get("subfolder").map(String::as_str).unwrap_or("");
    let source = query
        .get("type")
        .and_then(|raw| AssetSource::parse(raw))
        .unwrap_or(AssetSource::Output);
    let root_id = query.get("root_id").map(String::as_str).unwrap_or("");

    let base = match source {
        AssetSource::Output => state.registry.output_root(),
        AssetSource::Input => state.registry.input_root(),
        AssetSource::Custom => {
            match state.registry.custom_roots().resolve(root_id) {
                Ok(base) => base,
                Err(err) => return err.into(),
            }
        }
    };
    let rel = match majoor_core::roots::safe_rel_path(subfolder) {
        Ok(rel) => rel,
        Err(err) => return err.into(),
    };
    let path = base.join(rel).join(filename);
    let resolved = majoor_core::roots::resolve_lenient(&path);
    if !(state.registry.is_path_allowed(&resolved, true)
        || state.registry.is_path_allowed_custom(&resolved))
    {
        return Envelope::err(ErrorCode::Forbidden, "Path is not within allowed roots");
    }
    if !resolved.is_file() {
        return Envelope::err(ErrorCode::NotFound, "File not found");
    }

    // Prefer the indexed payload; fall back to a live header probe.
    let key = state.registry.policy().canonical_key(&resolved);
    let row = state
        .db
        .query_one(
            "SELECT m.raw, m.quality, COALESCE(m.rating, 0) AS rating, \
             COALESCE(m.tags, '[]') AS tags \
             FROM assets a JOIN asset_metadata m ON m.asset_id = a.id \
             WHERE a.filepath = ?",
            &majoor_core::params![key],
        )
        .await;
    if let Ok(Some(row)) = row {
        let raw: Option<String> = row.try_get("raw").ok();
        if let Some(parsed) = raw.and_then(|raw| serde_json::from_str::<Value>(&raw).ok())
        {
            return Envelope::ok(json!({
                "metadata": parsed,
                "quality": row.try_get::<String, _>("quality").unwrap_or_default(),
                "rating": row.try_get::<i64, _>("rating").unwrap_or(0),
                "tags": serde_json::from_str::<Value>(
                    &row.try_get::<String, _>("tags").unwrap_or_else(|_| "[]".into())
                ).unwrap_or(Value::Array(Vec::new())),
                "source": "index",
            }));
        }
    }

    let probe = majoor_core::HeaderProbe;
    match probe.extract(&resolved).await {
        Ok(extracted) => {
            let quality = extracted.quality.as_str();
            Envelope::ok(json!({
                "metadata": extracted,
                "quality": quality,
                "source": "probe",
            }))
        }
        Err(err) => Envelope::err(
            ErrorCode::MetadataFailed,
            majoor_core::error::sanitize_error_message(
                &err.to_string(),
                "Metadata extraction failed",
            ),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn month_bounds_spans_one_month() {
        let (start, end) = month_bounds("2024-03").expect("bounds");
        assert!(end > start);
        // March has 31 days; allow for a DST transition inside the month.
        let span_hours = (end - start) / 3600;
        assert!((30 * 24..=32 * 24).contains(&span_hours), "{span_hours}");

        let (dec_start, dec_end) = month_bounds("2024-12").expect("bounds");
        assert!(dec_end > dec_start, "year rollover produces a valid window");
    }

    #[test]
    fn month_bounds_rejects_bad_input() {
        assert!(month_bounds("").is_none());
        assert!(month_bounds("2024").is_none());
        assert!(month_bounds("2024-13").is_none());
        assert!(month_bounds("2024-00").is_none());
        assert!(month_bounds("yyyy-mm").is_none());
    }
}

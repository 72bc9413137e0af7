pub mod assets;
pub mod collections;
pub mod duplicates;
pub mod health;
pub mod maintenance;
pub mod roots;
pub mod scan;
pub mod search;

use std::collections::HashMap;

use majoor_core::AssetError;
use majoor_model::{ListFilters, SortKey};

/// Parse the shared listing/search query vocabulary from query params.
/// Explicit params override inline `key:value` filters parsed from `q`.
pub fn parse_list_query(
    query: &HashMap<String, String>,
    search_cfg: &majoor_config::SearchConfig,
) -> Result<(String, ListFilters, SortKey, usize, usize, bool), AssetError> {
    let raw_query = query.get("q").map(String::as_str).unwrap_or("").trim();
    let (text, mut filters) =
        majoor_core::search::query::parse_inline_filters(raw_query, search_cfg);

    let limit = match query.get("limit") {
        Some(raw) => raw
            .trim()
            .parse::<i64>()
            .map_err(|_| AssetError::invalid("Invalid limit or offset"))?,
        None => 50,
    };
    let offset = match query.get("offset") {
        Some(raw) => raw
            .trim()
            .parse::<i64>()
            .map_err(|_| AssetError::invalid("Invalid limit or offset"))?,
        None => 0,
    };
    let limit = limit.clamp(0, search_cfg.max_limit as i64) as usize;
    let offset = offset.max(0) as usize;
    if offset > search_cfg.max_offset {
        return Err(AssetError::invalid(format!(
            "Offset must be less than {}",
            search_cfg.max_offset
        )));
    }

    if let Some(kind) = query.get("kind") {
        filters.kind = Some(
            majoor_model::AssetKind::parse(kind).ok_or_else(|| {
                AssetError::invalid(
                    "Invalid kind. Must be one of: audio, image, model3d, video",
                )
            })?,
        );
    }
    if let Some(raw) = query.get("min_rating") {
        let rating = raw
            .trim()
            .parse::<i64>()
            .map_err(|_| AssetError::invalid("Invalid min_rating"))?;
        filters.min_rating = Some(rating.clamp(0, majoor_model::MAX_RATING));
    }
    for (param, target) in [
        ("min_size_mb", &mut filters.min_size_bytes),
        ("max_size_mb", &mut filters.max_size_bytes),
    ] {
        if let Some(raw) = query.get(param) {
            let value = raw
                .trim()
                .parse::<f64>()
                .map_err(|_| AssetError::invalid(format!("Invalid {param}")))?;
            if value > 0.0 {
                *target = Some((value * 1024.0 * 1024.0) as i64);
            }
        }
    }
    for (param, target) in [
        ("min_width", &mut filters.min_width),
        ("max_width", &mut filters.max_width),
        ("min_height", &mut filters.min_height),
        ("max_height", &mut filters.max_height),
    ] {
        if let Some(raw) = query.get(param) {
            let value = raw
                .trim()
                .parse::<i64>()
                .map_err(|_| AssetError::invalid(format!("Invalid {param}")))?;
            if value > 0 {
                *target = Some(value);
            }
        }
    }
    for (param, target) in [
        ("mtime_start", &mut filters.mtime_start),
        ("mtime_end", &mut filters.mtime_end),
    ] {
        if let Some(raw) = query.get(param) {
            let value = raw
                .trim()
                .parse::<i64>()
                .map_err(|_| AssetError::invalid(format!("Invalid {param}")))?;
            *target = Some(value);
        }
    }
    if let Some(workflow_type) = query.get("workflow_type") {
        let workflow_type = workflow_type.trim().to_ascii_uppercase();
        if !workflow_type.is_empty() {
            filters.workflow_type = Some(workflow_type);
        }
    }
    if let Some(raw) = query.get("has_workflow") {
        filters.has_workflow = Some(matches!(
            raw.trim().to_ascii_lowercase().as_str(),
            "true" | "1" | "yes"
        ));
    }
    if let Some(raw) = query.get("extensions") {
        for ext in raw.split(',') {
            let ext = majoor_core::search::query::normalize_extension(ext);
            if !ext.is_empty() {
                filters.extensions.push(ext);
            }
        }
    }
    filters.normalize_ranges();

    let sort = SortKey::parse(query.get("sort").map(String::as_str).unwrap_or(""));
    let include_total = query
        .get("include_total")
        .map(|raw| {
            !matches!(
                raw.trim().to_ascii_lowercase().as_str(),
                "0" | "false" | "no" | "off"
            )
        })
        .unwrap_or(true);

    let text = if text.is_empty() {
        "*".to_string()
    } else {
        text
    };
    Ok((text, filters, sort, limit, offset, include_total))
}

pub fn truthy_param(query: &HashMap<String, String>, key: &str) -> bool {
    query
        .get(key)
        .map(|raw| {
            matches!(
                raw.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(false)
}

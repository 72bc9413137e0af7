//! Query sanitization and inline filter parsing.
//!
//! A raw query string is split into tokens; `key:value` tokens for known
//! keys are consumed as filters, the rest become the text query handed to
//! the FTS index. Token count and length are clamped so user input can
//! never build an unbounded MATCH expression.

use majoor_config::SearchConfig;
use majoor_model::{AssetKind, ListFilters};

/// Split inline filters out of a raw query. Returns the remaining text
/// query (empty means match-all) and the parsed filters.
pub fn parse_inline_filters(raw: &str, cfg: &SearchConfig) -> (String, ListFilters) {
    let mut filters = ListFilters::default();
    let mut text_tokens: Vec<&str> = Vec::new();
    let clamped: String = raw.chars().take(cfg.max_query_length).collect();

    for token in clamped.split_whitespace() {
        if let Some((key, value)) = token.split_once(':') {
            if consume_filter_token(key, value, &mut filters) {
                continue;
            }
        }
        text_tokens.push(token);
    }
    (text_tokens.join(" "), filters)
}

fn consume_filter_token(key: &str, value: &str, filters: &mut ListFilters) -> bool {
    let key = key.to_ascii_lowercase();
    let value = value.trim();
    if value.is_empty() {
        return false;
    }
    match key.as_str() {
        "kind" | "type" => match AssetKind::parse(value) {
            Some(kind) => {
                filters.kind = Some(kind);
                true
            }
            None => false,
        },
        "ext" | "extension" => {
            let ext = normalize_extension(value);
            if ext.is_empty() {
                false
            } else {
                filters.extensions.push(ext);
                true
            }
        }
        "rating" | "min_rating" => match value.parse::<i64>() {
            Ok(rating) => {
                filters.min_rating =
                    Some(rating.clamp(0, majoor_model::MAX_RATING));
                true
            }
            Err(_) => false,
        },
        "has_workflow" | "workflow" => {
            match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => {
                    filters.has_workflow = Some(true);
                    true
                }
                "0" | "false" | "no" => {
                    filters.has_workflow = Some(false);
                    true
                }
                _ => false,
            }
        }
        "workflow_type" => {
            filters.workflow_type = Some(value.to_ascii_uppercase());
            true
        }
        _ => false,
    }
}

pub fn normalize_extension(value: &str) -> String {
    value
        .trim()
        .trim_start_matches('.')
        .to_ascii_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

/// Build a safe FTS5 MATCH expression: quoted prefix terms, bounded in
/// count and length. Returns `None` for a match-all query.
pub fn build_match_expression(query: &str, cfg: &SearchConfig) -> Option<String> {
    let trimmed = query.trim();
    if trimmed.is_empty() || trimmed == "*" {
        return None;
    }
    let mut terms = Vec::new();
    for token in trimmed.split_whitespace().take(cfg.max_tokens) {
        let cleaned: String = token
            .chars()
            .filter(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
            .take(cfg.max_token_length)
            .collect();
        if cleaned.is_empty() {
            continue;
        }
        terms.push(format!("\"{cleaned}\"*"));
    }
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" "))
    }
}

/// Case-insensitive substring match used by the filesystem fallback, which
/// has no FTS index to lean on.
pub fn matches_text_query(query: &str, filename: &str, subfolder: &str) -> bool {
    let trimmed = query.trim();
    if trimmed.is_empty() || trimmed == "*" {
        return true;
    }
    let haystack = format!("{} {}", filename.to_lowercase(), subfolder.to_lowercase());
    trimmed
        .split_whitespace()
        .all(|token| haystack.contains(&token.to_lowercase()))
}

/// Escape `%`/`_` for a LIKE prefix match with `ESCAPE '\'`.
pub fn escape_like_prefix(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len() + 4);
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

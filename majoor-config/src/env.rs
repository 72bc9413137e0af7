//! Environment parsing helpers.
//!
//! Every knob accepts a primary `MJR_AM_*` name plus legacy `MAJOOR_*` /
//! `MJR_*` aliases; the first non-empty value wins. Invalid values fall back
//! to the default with a warning rather than failing startup.

use std::env;

use tracing::warn;

/// Return the first non-empty value among the named environment variables.
pub fn env_raw(names: &[&str]) -> Option<String> {
    for name in names {
        if name.is_empty() {
            continue;
        }
        if let Ok(value) = env::var(name) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

pub fn env_string(default: &str, names: &[&str]) -> String {
    env_raw(names).unwrap_or_else(|| default.to_string())
}

pub fn env_int(
    default: i64,
    names: &[&str],
    min_value: Option<i64>,
    max_value: Option<i64>,
) -> i64 {
    let Some(raw) = env_raw(names) else {
        return default;
    };
    let mut value = match raw.parse::<i64>() {
        Ok(v) => v,
        Err(_) => {
            warn!(
                var = names.first().copied().unwrap_or("<unknown>"),
                raw, default, "invalid integer, using default"
            );
            return default;
        }
    };
    if let Some(min) = min_value {
        if value < min {
            warn!(
                var = names.first().copied().unwrap_or("<unknown>"),
                value, min, "value too small, clamped"
            );
            value = min;
        }
    }
    if let Some(max) = max_value {
        if value > max {
            warn!(
                var = names.first().copied().unwrap_or("<unknown>"),
                value, max, "value too large, clamped"
            );
            value = max;
        }
    }
    value
}

pub fn env_float(
    default: f64,
    names: &[&str],
    min_value: Option<f64>,
    max_value: Option<f64>,
) -> f64 {
    let Some(raw) = env_raw(names) else {
        return default;
    };
    let mut value = match raw.parse::<f64>() {
        Ok(v) => v,
        Err(_) => {
            warn!(
                var = names.first().copied().unwrap_or("<unknown>"),
                raw, default, "invalid float, using default"
            );
            return default;
        }
    };
    if let Some(min) = min_value {
        if value < min {
            value = min;
        }
    }
    if let Some(max) = max_value {
        if value > max {
            value = max;
        }
    }
    value
}

/// Truthy strings: `1`, `true`, `yes`, `on` (case-insensitive).
pub fn parse_bool(raw: &str, default: bool) -> bool {
    let trimmed = raw.trim().to_ascii_lowercase();
    if trimmed.is_empty() {
        return default;
    }
    matches!(trimmed.as_str(), "1" | "true" | "yes" | "on")
}

pub fn env_bool(default: bool, names: &[&str]) -> bool {
    match env_raw(names) {
        Some(raw) => parse_bool(&raw, default),
        None => default,
    }
}

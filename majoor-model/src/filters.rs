use std::fmt;

use serde::{Deserialize, Serialize};

use crate::asset::AssetKind;

/// Logical view over assets a listing request addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Output,
    Input,
    All,
    Custom,
    Browser,
}

impl Scope {
    pub fn parse(value: &str) -> Option<Scope> {
        match value.trim().to_ascii_lowercase().as_str() {
            "output" | "outputs" => Some(Scope::Output),
            "input" => Some(Scope::Input),
            "all" => Some(Scope::All),
            "custom" => Some(Scope::Custom),
            "browser" => Some(Scope::Browser),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Output => "output",
            Scope::Input => "input",
            Scope::All => "all",
            Scope::Custom => "custom",
            Scope::Browser => "browser",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Listing order. `mtime` sorts tie-break on filepath so pagination stays
/// deterministic for equal timestamps; name sorts compare case-insensitively.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    MtimeDesc,
    MtimeAsc,
    NameAsc,
    NameDesc,
    None,
}

impl SortKey {
    pub fn parse(value: &str) -> SortKey {
        match value.trim().to_ascii_lowercase().as_str() {
            "mtime_asc" => SortKey::MtimeAsc,
            "name_asc" => SortKey::NameAsc,
            "name_desc" => SortKey::NameDesc,
            "none" => SortKey::None,
            _ => SortKey::MtimeDesc,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SortKey::MtimeDesc => "mtime_desc",
            SortKey::MtimeAsc => "mtime_asc",
            SortKey::NameAsc => "name_asc",
            SortKey::NameDesc => "name_desc",
            SortKey::None => "none",
        }
    }
}

/// Filter vocabulary shared by the indexed and filesystem listing paths.
///
/// Both bounds of a range being set with `max < min` normalizes to
/// `max := min` before the query runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<AssetKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_rating: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_size_bytes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_size_bytes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_width: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_width: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_height: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_height: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_workflow: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mtime_start: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mtime_end: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Exclude rows whose filepath descends from this root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_root: Option<String>,
}

impl ListFilters {
    pub fn is_empty(&self) -> bool {
        *self == ListFilters::default()
    }

    /// Clamp inverted ranges so `max >= min` always holds downstream.
    pub fn normalize_ranges(&mut self) {
        fn clamp(min: Option<i64>, max: &mut Option<i64>) {
            if let (Some(lo), Some(hi)) = (min, *max) {
                if lo > 0 && hi > 0 && hi < lo {
                    *max = Some(lo);
                }
            }
        }
        clamp(self.min_size_bytes, &mut self.max_size_bytes);
        clamp(self.min_width, &mut self.max_width);
        clamp(self.min_height, &mut self.max_height);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_key_falls_back_to_mtime_desc() {
        assert_eq!(SortKey::parse("bogus"), SortKey::MtimeDesc);
        assert_eq!(SortKey::parse("name_asc"), SortKey::NameAsc);
        assert_eq!(SortKey::parse("NONE"), SortKey::None);
    }

    #[test]
    fn inverted_ranges_normalize_to_min() {
        let mut filters = ListFilters {
            min_size_bytes: Some(100),
            max_size_bytes: Some(10),
            min_width: Some(512),
            max_width: Some(256),
            ..Default::default()
        };
        filters.normalize_ranges();
        assert_eq!(filters.max_size_bytes, Some(100));
        assert_eq!(filters.max_width, Some(512));
    }

    #[test]
    fn scope_aliases() {
        assert_eq!(Scope::parse("outputs"), Some(Scope::Output));
        assert_eq!(Scope::parse("nope"), None);
    }
}

use serde::{Deserialize, Serialize};

/// A user-registered directory outside the built-in output/input roots.
///
/// Persisted as JSON; `offline` and `invalid` are computed at read time and
/// never written back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomRoot {
    pub id: String,
    pub path: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub offline: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub invalid: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub already_exists: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// An ordered, user-curated list of assets identified by filepath.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub filepaths: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

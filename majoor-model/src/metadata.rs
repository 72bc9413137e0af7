use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How much structured metadata the extractor recovered for a file.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum MetadataQuality {
    Full,
    Partial,
    Degraded,
    #[default]
    None,
}

impl MetadataQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataQuality::Full => "full",
            MetadataQuality::Partial => "partial",
            MetadataQuality::Degraded => "degraded",
            MetadataQuality::None => "none",
        }
    }

    pub fn parse(value: &str) -> MetadataQuality {
        match value.trim().to_ascii_lowercase().as_str() {
            "full" => MetadataQuality::Full,
            "partial" => MetadataQuality::Partial,
            "degraded" => MetadataQuality::Degraded,
            _ => MetadataQuality::None,
        }
    }
}

/// 1:1 companion row for an asset; absent until enrichment or a user write
/// creates it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetMetadata {
    pub asset_id: i64,
    pub rating: i64,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_hash: Option<String>,
    pub has_workflow: bool,
    pub has_generation_data: bool,
    pub quality: MetadataQuality,
    /// Opaque extractor payload, bounded in size by configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

/// Output contract of a metadata extractor for one filepath.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<i64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_data: Option<Value>,
    pub quality: MetadataQuality,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

impl ExtractedMetadata {
    pub fn degraded() -> Self {
        ExtractedMetadata {
            quality: MetadataQuality::Degraded,
            ..Default::default()
        }
    }

    pub fn has_workflow(&self) -> bool {
        self.workflow.is_some()
    }

    pub fn has_generation_data(&self) -> bool {
        self.generation_data.is_some()
    }
}

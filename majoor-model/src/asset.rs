use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// File classification derived from the extension. Immutable for a given
/// filepath once assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Image,
    Video,
    Audio,
    Model3d,
}

impl AssetKind {
    pub fn all() -> &'static [AssetKind] {
        use AssetKind::*;
        &[Image, Video, Audio, Model3d]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Image => "image",
            AssetKind::Video => "video",
            AssetKind::Audio => "audio",
            AssetKind::Model3d => "model3d",
        }
    }

    pub fn parse(value: &str) -> Option<AssetKind> {
        match value.trim().to_ascii_lowercase().as_str() {
            "image" => Some(AssetKind::Image),
            "video" => Some(AssetKind::Video),
            "audio" => Some(AssetKind::Audio),
            "model3d" => Some(AssetKind::Model3d),
            _ => None,
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "gif"];
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "webm", "mkv"];
pub const AUDIO_EXTENSIONS: &[&str] =
    &["wav", "mp3", "flac", "ogg", "aiff", "aif", "m4a", "aac"];
pub const MODEL3D_EXTENSIONS: &[&str] = &["obj", "fbx", "glb", "gltf", "stl"];

/// Classify a filename by extension. Unknown extensions return `None` and are
/// ignored by the indexer.
pub fn classify_file(filename: &str) -> Option<AssetKind> {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())?
        .to_ascii_lowercase();
    classify_extension(&ext)
}

pub fn classify_extension(ext: &str) -> Option<AssetKind> {
    let ext = ext.trim_start_matches('.').to_ascii_lowercase();
    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        Some(AssetKind::Image)
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Some(AssetKind::Video)
    } else if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
        Some(AssetKind::Audio)
    } else if MODEL3D_EXTENSIONS.contains(&ext.as_str()) {
        Some(AssetKind::Model3d)
    } else {
        None
    }
}

/// Which root an asset belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetSource {
    Output,
    Input,
    Custom,
}

impl AssetSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetSource::Output => "output",
            AssetSource::Input => "input",
            AssetSource::Custom => "custom",
        }
    }

    pub fn parse(value: &str) -> Option<AssetSource> {
        match value.trim().to_ascii_lowercase().as_str() {
            "output" => Some(AssetSource::Output),
            "input" => Some(AssetSource::Input),
            "custom" => Some(AssetSource::Custom),
            _ => None,
        }
    }
}

impl fmt::Display for AssetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of content/perceptual hashing for an asset.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum HashState {
    #[default]
    None,
    Computed,
    Failed,
}

impl HashState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashState::None => "none",
            HashState::Computed => "computed",
            HashState::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> HashState {
        match value.trim().to_ascii_lowercase().as_str() {
            "computed" => HashState::Computed,
            "failed" => HashState::Failed,
            _ => HashState::None,
        }
    }
}

/// One indexed file. `filepath` is canonical and case-normalized on
/// case-insensitive hosts; it is the stable unique key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetRecord {
    pub id: i64,
    pub filepath: String,
    pub filename: String,
    /// Relative to the asset's root, forward-slash normalized.
    pub subfolder: String,
    pub source: AssetSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_id: Option<String>,
    pub kind: AssetKind,
    pub ext: String,
    pub size_bytes: i64,
    /// Last-modified time, seconds since epoch.
    pub mtime: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    pub created_at: i64,
    pub updated_at: i64,
    pub indexed_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub perceptual_hash: Option<String>,
    #[serde(default)]
    pub hash_state: HashState,
    // Hydrated from asset_metadata when requested.
    #[serde(default)]
    pub rating: i64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub has_workflow: bool,
}

/// Upper bounds enforced on user-curated metadata.
pub const MAX_RATING: i64 = 5;
pub const MAX_TAGS: usize = 50;
pub const MAX_TAG_LENGTH: usize = 100;

/// Dedupe tags case-insensitively, preserving the original case of the first
/// occurrence, and enforce the count/length caps.
pub fn normalize_tags<I, S>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for tag in raw {
        let trimmed = tag.as_ref().trim();
        if trimmed.is_empty() || trimmed.len() > MAX_TAG_LENGTH {
            continue;
        }
        let key = trimmed.to_lowercase();
        if seen.insert(key) {
            out.push(trimmed.to_string());
            if out.len() >= MAX_TAGS {
                break;
            }
        }
    }
    out
}

use serde::{Deserialize, Serialize};

use crate::asset::AssetSource;

/// Counters reported by one scan pass over a directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanStats {
    pub scanned: u64,
    pub added: u64,
    pub updated: u64,
    pub skipped: u64,
    pub errors: u64,
    /// Seconds since epoch when the scan started.
    pub start_time: i64,
    /// Wall-clock duration in seconds.
    pub duration: f64,
}

impl ScanStats {
    pub fn merge(&mut self, other: &ScanStats) {
        self.scanned += other.scanned;
        self.added += other.added;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.errors += other.errors;
    }
}

/// Parameters for one indexing pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRequest {
    pub root: String,
    #[serde(default = "default_true")]
    pub recursive: bool,
    #[serde(default = "default_true")]
    pub incremental: bool,
    #[serde(default)]
    pub source: Option<AssetSource>,
    #[serde(default)]
    pub root_id: Option<String>,
    /// Skip metadata enrichment entirely.
    #[serde(default)]
    pub fast: bool,
    /// Enqueue enrichment instead of running it inline.
    #[serde(default)]
    pub background_metadata: bool,
}

fn default_true() -> bool {
    true
}

impl ScanRequest {
    pub fn new(root: impl Into<String>) -> Self {
        ScanRequest {
            root: root.into(),
            recursive: true,
            incremental: true,
            source: None,
            root_id: None,
            fast: false,
            background_metadata: false,
        }
    }
}

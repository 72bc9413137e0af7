use std::sync::OnceLock;

use majoor_model::ErrorCode;
use regex::Regex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("authentication required: {0}")]
    AuthRequired(String),

    #[error("rate limit exceeded")]
    RateLimited { retry_after: u64 },

    #[error("cross-site request blocked: {0}")]
    Csrf(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("database maintenance in progress")]
    Maintenance,

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("metadata extraction failed: {0}")]
    Metadata(String),

    #[error("delete failed: {0}")]
    DeleteFailed(String),

    #[error("rename failed: {0}")]
    RenameFailed(String),

    #[error("root overlaps: {0}")]
    Overlap(String),

    #[error("directory not found: {0}")]
    DirNotFound(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("root is offline: {0}")]
    Offline(String),

    #[error("failed to persist store: {0}")]
    StoreWriteFailed(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, AssetError>;

impl AssetError {
    /// Envelope error code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            AssetError::Io(_) => ErrorCode::DbError,
            AssetError::Db(_) => ErrorCode::DbError,
            AssetError::Serialization(_) => ErrorCode::ParseError,
            AssetError::InvalidInput(_) => ErrorCode::InvalidInput,
            AssetError::InvalidJson(_) => ErrorCode::InvalidJson,
            AssetError::NotFound(_) => ErrorCode::NotFound,
            AssetError::Forbidden(_) => ErrorCode::Forbidden,
            AssetError::Conflict(_) => ErrorCode::Conflict,
            AssetError::AuthRequired(_) => ErrorCode::AuthRequired,
            AssetError::RateLimited { .. } => ErrorCode::RateLimited,
            AssetError::Csrf(_) => ErrorCode::Csrf,
            AssetError::Timeout(_) => ErrorCode::Timeout,
            AssetError::Maintenance => ErrorCode::DbMaintenance,
            AssetError::Unavailable(_) => ErrorCode::ServiceUnavailable,
            AssetError::Metadata(_) => ErrorCode::MetadataFailed,
            AssetError::DeleteFailed(_) => ErrorCode::DeleteFailed,
            AssetError::RenameFailed(_) => ErrorCode::RenameFailed,
            AssetError::Overlap(_) => ErrorCode::Overlap,
            AssetError::DirNotFound(_) => ErrorCode::DirNotFound,
            AssetError::NotADirectory(_) => ErrorCode::NotADirectory,
            AssetError::Offline(_) => ErrorCode::Offline,
            AssetError::StoreWriteFailed(_) => ErrorCode::StoreWriteFailed,
            AssetError::Internal(_) => ErrorCode::DbError,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        AssetError::InvalidInput(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        AssetError::Internal(message.into())
    }
}

fn debug_mode() -> bool {
    std::env::var("MJR_DEBUG")
        .map(|raw| {
            matches!(
                raw.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(false)
}

fn path_patterns() -> &'static [Regex; 3] {
    static PATTERNS: OnceLock<[Regex; 3]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // Windows drive paths
            Regex::new(r"[A-Za-z]:\\[^\s]+").expect("static regex"),
            // UNC paths
            Regex::new(r"\\\\[^\s\\]+\\[^\s]+").expect("static regex"),
            // Unix absolute paths (but not protocol-relative URLs)
            Regex::new(r"(?:^|[\s:])/(?:[^\s/#?][^\s#?]*)").expect("static regex"),
        ]
    })
}

/// Mask path-looking substrings so error strings never leak filesystem
/// structure to remote clients.
pub fn mask_paths(value: &str) -> String {
    let mut cleaned = value.to_string();
    for pattern in path_patterns() {
        cleaned = pattern.replace_all(&cleaned, " [path]").into_owned();
    }
    cleaned
}

/// Build a client-safe error message. Full detail only with `MJR_DEBUG`.
pub fn sanitize_error_message(detail: &str, fallback: &str) -> String {
    let fallback = if fallback.is_empty() {
        "An error occurred"
    } else {
        fallback
    };
    if detail.is_empty() {
        return fallback.to_string();
    }
    if debug_mode() {
        return format!("{fallback}: {detail}");
    }
    let masked = mask_paths(detail);
    let collapsed: String = masked.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        fallback.to_string()
    } else {
        let truncated: String = collapsed.chars().take(200).collect();
        format!("{fallback}: {truncated}")
    }
}

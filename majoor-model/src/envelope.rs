use std::fmt;

use serde::{Deserialize, Serialize};

/// Standardized error codes carried in the response envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Client / validation
    InvalidInput,
    InvalidJson,
    NotFound,
    Forbidden,
    Csrf,
    AuthRequired,
    RateLimited,
    Conflict,

    // Feature / service availability
    Degraded,
    Unsupported,
    ToolMissing,
    ServiceUnavailable,
    DbMaintenance,

    // Server / infrastructure
    DbError,
    Timeout,

    // Operation errors
    DeleteFailed,
    RenameFailed,
    UpdateFailed,
    MetadataFailed,

    // Roots store
    Overlap,
    DirNotFound,
    NotADirectory,
    Offline,
    StoreWriteFailed,

    // Tool / parsing
    ExiftoolError,
    FfprobeError,
    ParseError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::InvalidJson => "INVALID_JSON",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::Csrf => "CSRF",
            ErrorCode::AuthRequired => "AUTH_REQUIRED",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::Degraded => "DEGRADED",
            ErrorCode::Unsupported => "UNSUPPORTED",
            ErrorCode::ToolMissing => "TOOL_MISSING",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::DbMaintenance => "DB_MAINTENANCE",
            ErrorCode::DbError => "DB_ERROR",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::DeleteFailed => "DELETE_FAILED",
            ErrorCode::RenameFailed => "RENAME_FAILED",
            ErrorCode::UpdateFailed => "UPDATE_FAILED",
            ErrorCode::MetadataFailed => "METADATA_FAILED",
            ErrorCode::Overlap => "OVERLAP",
            ErrorCode::DirNotFound => "DIR_NOT_FOUND",
            ErrorCode::NotADirectory => "NOT_A_DIRECTORY",
            ErrorCode::Offline => "OFFLINE",
            ErrorCode::StoreWriteFailed => "STORE_WRITE_FAILED",
            ErrorCode::ExiftoolError => "EXIFTOOL_ERROR",
            ErrorCode::FfprobeError => "FFPROBE_ERROR",
            ErrorCode::ParseError => "PARSE_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//! Uniform response envelope.
//!
//! Every endpoint answers `{ok, data, error, code, meta}` with HTTP 200
//! for business errors; non-200 statuses are reserved for infrastructure
//! failures outside handler control. `meta.retry_after` is echoed as the
//! `Retry-After` header.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use majoor_core::error::sanitize_error_message;
use majoor_core::AssetError;
use majoor_model::ErrorCode;
use serde::Serialize;
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub ok: bool,
    pub data: Value,
    pub error: Option<String>,
    pub code: Option<String>,
    pub meta: Value,
}

impl Envelope {
    pub fn ok(data: impl Serialize) -> Self {
        Envelope {
            ok: true,
            data: serde_json::to_value(data).unwrap_or(Value::Null),
            error: None,
            code: None,
            meta: Value::Object(Map::new()),
        }
    }

    pub fn ok_with_meta(data: impl Serialize, meta: Value) -> Self {
        Envelope {
            meta,
            ..Envelope::ok(data)
        }
    }

    pub fn err(code: ErrorCode, message: impl Into<String>) -> Self {
        Envelope {
            ok: false,
            data: Value::Null,
            error: Some(message.into()),
            code: Some(code.as_str().to_string()),
            meta: Value::Object(Map::new()),
        }
    }

    pub fn err_with_meta(
        code: ErrorCode,
        message: impl Into<String>,
        meta: Value,
    ) -> Self {
        Envelope {
            meta,
            ..Envelope::err(code, message)
        }
    }

    pub fn rate_limited(retry_after: u64) -> Self {
        Envelope::err_with_meta(
            ErrorCode::RateLimited,
            "Rate limit exceeded. Please wait before retrying.",
            json!({ "retry_after": retry_after }),
        )
    }

    pub fn with_meta_entry(mut self, key: &str, value: Value) -> Self {
        if let Value::Object(map) = &mut self.meta {
            map.insert(key.to_string(), value);
        }
        self
    }
}

impl From<AssetError> for Envelope {
    fn from(err: AssetError) -> Self {
        let code = err.code();
        match err {
            AssetError::RateLimited { retry_after } => {
                Envelope::rate_limited(retry_after)
            }
            other => {
                let fallback = match code {
                    ErrorCode::NotFound => "Not found",
                    ErrorCode::Forbidden => "Operation not allowed",
                    ErrorCode::InvalidInput => "Invalid input",
                    ErrorCode::DbMaintenance => "Database maintenance in progress",
                    _ => "Request failed",
                };
                Envelope::err(code, sanitize_error_message(&other.to_string(), fallback))
            }
        }
    }
}

impl IntoResponse for Envelope {
    fn into_response(self) -> Response {
        let retry_after = self
            .meta
            .get("retry_after")
            .and_then(Value::as_u64);
        let mut response = (StatusCode::OK, Json(self)).into_response();
        if let Some(retry_after) = retry_after {
            if let Ok(value) = retry_after.to_string().parse() {
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Shorthand for handlers: convert a core result into an envelope.
pub fn respond<T: Serialize>(result: majoor_core::Result<T>) -> Envelope {
    match result {
        Ok(data) => Envelope::ok(data),
        Err(err) => Envelope::from(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn business_errors_are_http_200() {
        let envelope = Envelope::err(ErrorCode::NotFound, "missing");
        let response = envelope.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn rate_limited_sets_retry_after_header() {
        let response = Envelope::rate_limited(30).into_response();
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            "30"
        );
    }

    #[test]
    fn asset_error_maps_code() {
        let envelope = Envelope::from(AssetError::Maintenance);
        assert!(!envelope.ok);
        assert_eq!(envelope.code.as_deref(), Some("DB_MAINTENANCE"));
    }
}

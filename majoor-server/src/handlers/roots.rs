//! Custom-root management and confined media serving.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use majoor_core::WriteOperation;
use majoor_model::ErrorCode;
use serde_json::{json, Value};
use tokio_util::io::ReaderStream;

use crate::envelope::Envelope;
use crate::state::AppState;

pub async fn list_custom_roots(State(state): State<AppState>) -> Envelope {
    Envelope::ok(state.registry.custom_roots().list())
}

pub async fn builtin_roots(State(state): State<AppState>) -> Envelope {
    let (output, input) = state.registry.allowed_directories();
    Envelope::ok(json!({
        "output": output.to_string_lossy(),
        "input": input.to_string_lossy(),
    }))
}

pub async fn add_custom_root(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Envelope {
    let ctx = state.request_context(&axum::http::Method::POST, &headers, &addr);
    if let Err(err) = state.write_guard(&ctx, WriteOperation::Write).await {
        return err.into();
    }
    let payload = match state.parse_json_body(&body) {
        Ok(payload) => payload,
        Err(err) => return err.into(),
    };
    let Some(path) = payload.get("path").and_then(Value::as_str) else {
        return Envelope::err(ErrorCode::InvalidInput, "Missing path");
    };
    let label = payload.get("label").and_then(Value::as_str);
    let (output, input) = state.registry.allowed_directories();
    crate::envelope::respond(
        state
            .registry
            .custom_roots()
            .add(path, label, &[output, input]),
    )
}

pub async fn remove_custom_root(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Envelope {
    let ctx = state.request_context(&axum::http::Method::POST, &headers, &addr);
    if let Err(err) = state.write_guard(&ctx, WriteOperation::Write).await {
        return err.into();
    }
    let payload = match state.parse_json_body(&body) {
        Ok(payload) => payload,
        Err(err) => return err.into(),
    };
    let Some(root_id) = payload.get("id").and_then(Value::as_str) else {
        return Envelope::err(ErrorCode::InvalidInput, "Missing id");
    };
    match state.registry.custom_roots().remove(root_id) {
        Ok(()) => Envelope::ok(json!({ "removed": root_id })),
        Err(err) => err.into(),
    }
}

/// Extensions the viewer is allowed to fetch through `custom-view`.
const ALLOWED_VIEW_EXTS: &[&str] = &[
    "png", "jpg", "jpeg", "webp", "gif", "bmp", "tif", "tiff", "avif", // images
    "mp4", "webm", "mov", "mkv", "avi", "m4v", // videos
    "wav", "mp3", "flac", "ogg", "aiff", "aif", "m4a", "aac", // audio
];

fn guess_content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "avif" => "image/avif",
        "mp4" => "video/mp4",
        "m4v" => "video/x-m4v",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        "wav" => "audio/wav",
        "mp3" => "audio/mpeg",
        "flac" => "audio/flac",
        "ogg" => "audio/ogg",
        "aiff" | "aif" => "audio/aiff",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        _ => "application/octet-stream",
    }
}

fn is_allowed_view_file(path: &Path) -> bool {
    let ext = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    if !ALLOWED_VIEW_EXTS.contains(&ext.as_str()) {
        return false;
    }
    // Extension and guessed content type must agree on a media family.
    let content_type = guess_content_type(path);
    content_type.starts_with("image/")
        || content_type.starts_with("video/")
        || content_type.starts_with("audio/")
}

/// Serve a confined media file with hardening headers. Plain-envelope
/// errors do not apply here; this endpoint returns binary data.
pub async fn custom_view(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let target = if let Some(filepath) = query.get("filepath") {
        match majoor_core::roots::normalize_path(filepath) {
            Some(path) => path,
            None => {
                return (StatusCode::BAD_REQUEST, "Invalid filepath").into_response()
            }
        }
    } else {
        let root_id = query.get("root_id").map(String::as_str).unwrap_or("");
        let filename = query.get("filename").map(String::as_str).unwrap_or("");
        if filename.is_empty() || filename.contains(['/', '\\', '\0']) {
            return (StatusCode::BAD_REQUEST, "Invalid filename").into_response();
        }
        let base = match state.registry.custom_roots().resolve(root_id) {
            Ok(base) => base,
            Err(_) => {
                return (StatusCode::NOT_FOUND, "Unknown root").into_response()
            }
        };
        let subfolder = query.get("subfolder").map(String::as_str).unwrap_or("");
        let rel = match majoor_core::roots::safe_rel_path(subfolder) {
            Ok(rel) => rel,
            Err(_) => {
                return (StatusCode::BAD_REQUEST, "Invalid subfolder").into_response()
            }
        };
        base.join(rel).join(filename)
    };

    let resolved = match target.canonicalize() {
        Ok(resolved) => resolved,
        Err(_) => return (StatusCode::NOT_FOUND, "File not found").into_response(),
    };
    if !(state.registry.is_path_allowed(&resolved, true)
        || state.registry.is_path_allowed_custom(&resolved))
    {
        return (StatusCode::FORBIDDEN, "Path is not within allowed roots")
            .into_response();
    }
    if !resolved.is_file() {
        return (StatusCode::NOT_FOUND, "File not found").into_response();
    }
    if !is_allowed_view_file(&resolved) {
        return (StatusCode::FORBIDDEN, "File type not allowed").into_response();
    }

    let file = match tokio::fs::File::open(&resolved).await {
        Ok(file) => file,
        Err(_) => return (StatusCode::FORBIDDEN, "File not readable").into_response(),
    };
    let stream = ReaderStream::new(file);
    let mut response = Body::from_stream(stream).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        guess_content_type(&resolved).parse().expect("static mime"),
    );
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        "nosniff".parse().expect("static header"),
    );
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        "default-src 'none'".parse().expect("static header"),
    );
    headers.insert(
        header::X_FRAME_OPTIONS,
        "DENY".parse().expect("static header"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_allowlist_is_media_only() {
        assert!(is_allowed_view_file(Path::new("/x/a.png")));
        assert!(is_allowed_view_file(Path::new("/x/clip.MP4")));
        assert!(is_allowed_view_file(Path::new("/x/voice.m4a")));
        assert!(!is_allowed_view_file(Path::new("/x/nested.html")));
        assert!(!is_allowed_view_file(Path::new("/x/model.glb")));
        assert!(!is_allowed_view_file(Path::new("/x/noext")));
    }
}

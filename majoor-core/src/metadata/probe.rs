//! Header-only media probe.
//!
//! Reads just enough of each container to recover dimensions and, for PNG,
//! the embedded workflow/generation text chunks that generation pipelines
//! write. Decoding pixel data is explicitly out of scope.

use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use async_trait::async_trait;
use majoor_model::{AssetKind, ExtractedMetadata, MetadataQuality};
use serde_json::Value;

use crate::error::{AssetError, Result};
use crate::metadata::MetadataExtractor;

/// Cap on how much of a file the probe will read while chunk-walking.
const MAX_PROBE_BYTES: u64 = 4 * 1024 * 1024;

#[derive(Debug, Default)]
pub struct HeaderProbe;

#[async_trait]
impl MetadataExtractor for HeaderProbe {
    async fn extract(&self, path: &Path) -> Result<ExtractedMetadata> {
        let path = path.to_path_buf();
        let kind = majoor_model::classify_file(
            &path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
        );
        tokio::task::spawn_blocking(move || probe_file(&path, kind))
            .await
            .map_err(|err| AssetError::internal(format!("probe task failed: {err}")))?
    }
}

fn probe_file(path: &Path, kind: Option<AssetKind>) -> Result<ExtractedMetadata> {
    match kind {
        Some(AssetKind::Image) => probe_image(path),
        Some(AssetKind::Video) | Some(AssetKind::Audio) => {
            // Durations require container parsing we deliberately skip.
            Ok(ExtractedMetadata {
                quality: MetadataQuality::Partial,
                ..Default::default()
            })
        }
        Some(AssetKind::Model3d) | None => Ok(ExtractedMetadata {
            quality: MetadataQuality::None,
            ..Default::default()
        }),
    }
}

fn probe_image(path: &Path) -> Result<ExtractedMetadata> {
    let mut file = std::fs::File::open(path)?;
    let mut magic = [0u8; 12];
    let read = file.read(&mut magic)?;
    if read < 12 {
        return Ok(ExtractedMetadata::degraded());
    }
    file.seek(SeekFrom::Start(0))?;

    let parsed = if magic.starts_with(&[0x89, b'P', b'N', b'G']) {
        parse_png(&mut file)
    } else if magic.starts_with(&[0xFF, 0xD8]) {
        parse_jpeg(&mut file)
    } else if magic.starts_with(b"GIF87a") || magic.starts_with(b"GIF89a") {
        parse_gif(&mut file)
    } else if &magic[0..4] == b"RIFF" && &magic[8..12] == b"WEBP" {
        parse_webp(&mut file)
    } else {
        return Ok(ExtractedMetadata::degraded());
    };

    match parsed {
        Ok(extracted) => Ok(extracted),
        Err(_) => Ok(ExtractedMetadata::degraded()),
    }
}

fn quality_for(width: Option<i64>, workflow: &Option<Value>) -> MetadataQuality {
    match (width.is_some(), workflow.is_some()) {
        (true, true) => MetadataQuality::Full,
        (true, false) => MetadataQuality::Partial,
        (false, _) => MetadataQuality::Degraded,
    }
}

fn parse_png(file: &mut std::fs::File) -> Result<ExtractedMetadata> {
    let mut signature = [0u8; 8];
    file.read_exact(&mut signature)?;

    let mut width = None;
    let mut height = None;
    let mut workflow: Option<Value> = None;
    let mut generation: Option<Value> = None;
    let mut raw_texts = serde_json::Map::new();
    let mut consumed: u64 = 8;

    loop {
        let mut header = [0u8; 8];
        if file.read_exact(&mut header).is_err() {
            break;
        }
        let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as u64;
        let chunk_type = [header[4], header[5], header[6], header[7]];
        consumed += 8;
        if consumed + length > MAX_PROBE_BYTES {
            break;
        }
        match &chunk_type {
            b"IHDR" => {
                let mut data = [0u8; 8];
                file.read_exact(&mut data)?;
                width = Some(u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as i64);
                height = Some(u32::from_be_bytes([data[4], data[5], data[6], data[7]]) as i64);
                file.seek(SeekFrom::Current(length as i64 - 8 + 4))?;
            }
            b"tEXt" | b"iTXt" => {
                let mut data = vec![0u8; length as usize];
                file.read_exact(&mut data)?;
                file.seek(SeekFrom::Current(4))?;
                if let Some((keyword, text)) = split_text_chunk(&chunk_type, &data) {
                    let key = keyword.to_ascii_lowercase();
                    if let Ok(value) = serde_json::from_str::<Value>(&text) {
                        match key.as_str() {
                            "workflow" => workflow = Some(value.clone()),
                            "prompt" => generation = Some(value.clone()),
                            _ => {}
                        }
                        raw_texts.insert(key, value);
                    } else if key == "parameters" {
                        generation = Some(Value::String(text.clone()));
                        raw_texts.insert(key, Value::String(text));
                    }
                }
            }
            b"IEND" => break,
            _ => {
                file.seek(SeekFrom::Current(length as i64 + 4))?;
            }
        }
        consumed += length + 4;
    }

    let quality = quality_for(width, &workflow);
    let raw = if raw_texts.is_empty() {
        None
    } else {
        Some(Value::Object(raw_texts))
    };
    Ok(ExtractedMetadata {
        width,
        height,
        workflow,
        generation_data: generation,
        quality,
        raw,
        ..Default::default()
    })
}

/// Split a PNG text chunk into (keyword, text). iTXt has three extra
/// NUL-separated fields between the keyword and the text; compressed
/// payloads are skipped.
fn split_text_chunk(chunk_type: &[u8; 4], data: &[u8]) -> Option<(String, String)> {
    let nul = data.iter().position(|b| *b == 0)?;
    let keyword = String::from_utf8_lossy(&data[..nul]).into_owned();
    let rest = &data[nul + 1..];
    let text = if chunk_type == b"iTXt" {
        if rest.first().copied().unwrap_or(1) != 0 {
            return None;
        }
        let mut remaining = &rest[2..];
        for _ in 0..2 {
            let end = remaining.iter().position(|b| *b == 0)?;
            remaining = &remaining[end + 1..];
        }
        String::from_utf8_lossy(remaining).into_owned()
    } else {
        String::from_utf8_lossy(rest).into_owned()
    };
    Some((keyword, text))
}

fn parse_jpeg(file: &mut std::fs::File) -> Result<ExtractedMetadata> {
    let mut marker = [0u8; 2];
    file.read_exact(&mut marker)?;
    let mut consumed: u64 = 2;
    loop {
        file.read_exact(&mut marker)?;
        consumed += 2;
        if marker[0] != 0xFF {
            break;
        }
        let code = marker[1];
        // Standalone markers carry no length.
        if (0xD0..=0xD9).contains(&code) {
            continue;
        }
        let mut len_bytes = [0u8; 2];
        file.read_exact(&mut len_bytes)?;
        let length = u16::from_be_bytes(len_bytes) as i64;
        consumed += length as u64;
        if consumed > MAX_PROBE_BYTES {
            break;
        }
        let is_sof = matches!(code, 0xC0..=0xCF) && !matches!(code, 0xC4 | 0xC8 | 0xCC);
        if is_sof {
            let mut data = [0u8; 5];
            file.read_exact(&mut data)?;
            let height = u16::from_be_bytes([data[1], data[2]]) as i64;
            let width = u16::from_be_bytes([data[3], data[4]]) as i64;
            return Ok(ExtractedMetadata {
                width: Some(width),
                height: Some(height),
                quality: MetadataQuality::Partial,
                ..Default::default()
            });
        }
        file.seek(SeekFrom::Current(length - 2))?;
    }
    Ok(ExtractedMetadata::degraded())
}

fn parse_gif(file: &mut std::fs::File) -> Result<ExtractedMetadata> {
    let mut header = [0u8; 10];
    file.read_exact(&mut header)?;
    let width = u16::from_le_bytes([header[6], header[7]]) as i64;
    let height = u16::from_le_bytes([header[8], header[9]]) as i64;
    Ok(ExtractedMetadata {
        width: Some(width),
        height: Some(height),
        quality: MetadataQuality::Partial,
        ..Default::default()
    })
}

fn parse_webp(file: &mut std::fs::File) -> Result<ExtractedMetadata> {
    let mut header = [0u8; 12];
    file.read_exact(&mut header)?;
    let mut chunk = [0u8; 8];
    file.read_exact(&mut chunk)?;
    let fourcc = &chunk[0..4];
    if fourcc == b"VP8X" {
        let mut data = [0u8; 10];
        file.read_exact(&mut data)?;
        let width = 1 + u32::from_le_bytes([data[4], data[5], data[6], 0]);
        let height = 1 + u32::from_le_bytes([data[7], data[8], data[9], 0]);
        return Ok(ExtractedMetadata {
            width: Some(width as i64),
            height: Some(height as i64),
            quality: MetadataQuality::Partial,
            ..Default::default()
        });
    }
    if fourcc == b"VP8L" {
        let mut data = [0u8; 5];
        file.read_exact(&mut data)?;
        if data[0] == 0x2F {
            let bits = u32::from_le_bytes([data[1], data[2], data[3], data[4]]);
            let width = (bits & 0x3FFF) + 1;
            let height = ((bits >> 14) & 0x3FFF) + 1;
            return Ok(ExtractedMetadata {
                width: Some(width as i64),
                height: Some(height as i64),
                quality: MetadataQuality::Partial,
                ..Default::default()
            });
        }
    }
    Ok(ExtractedMetadata::degraded())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal valid PNG: IHDR + one tEXt workflow chunk + IEND.
    fn png_fixture(width: u32, height: u32, workflow: Option<&str>) -> Vec<u8> {
        fn chunk(kind: &[u8; 4], data: &[u8]) -> Vec<u8> {
            let mut out = Vec::new();
            out.extend_from_slice(&(data.len() as u32).to_be_bytes());
            out.extend_from_slice(kind);
            out.extend_from_slice(data);
            out.extend_from_slice(&[0u8; 4]); // CRC unchecked by the probe
            out
        }
        let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        let mut ihdr = Vec::new();
        ihdr.extend_from_slice(&width.to_be_bytes());
        ihdr.extend_from_slice(&height.to_be_bytes());
        ihdr.extend_from_slice(&[8, 6, 0, 0, 0]);
        bytes.extend(chunk(b"IHDR", &ihdr));
        if let Some(workflow) = workflow {
            let mut text = b"workflow".to_vec();
            text.push(0);
            text.extend_from_slice(workflow.as_bytes());
            bytes.extend(chunk(b"tEXt", &text));
        }
        bytes.extend(chunk(b"IEND", &[]));
        bytes
    }

    #[tokio::test]
    async fn png_dimensions_and_workflow() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("wf.png");
        std::fs::write(&path, png_fixture(640, 480, Some(r#"{"nodes":[]}"#)))
            .expect("write");

        let probe = HeaderProbe;
        let extracted = probe.extract(&path).await.expect("extract");
        assert_eq!(extracted.width, Some(640));
        assert_eq!(extracted.height, Some(480));
        assert!(extracted.workflow.is_some());
        assert_eq!(extracted.quality, MetadataQuality::Full);
    }

    #[tokio::test]
    async fn png_without_workflow_is_partial() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("plain.png");
        std::fs::write(&path, png_fixture(32, 16, None)).expect("write");

        let extracted = HeaderProbe.extract(&path).await.expect("extract");
        assert_eq!(extracted.width, Some(32));
        assert_eq!(extracted.quality, MetadataQuality::Partial);
    }

    #[tokio::test]
    async fn gif_dimensions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tiny.gif");
        let mut bytes = b"GIF89a".to_vec();
        bytes.extend_from_slice(&100u16.to_le_bytes());
        bytes.extend_from_slice(&50u16.to_le_bytes());
        bytes.extend_from_slice(&[0, 0, 0]);
        std::fs::write(&path, bytes).expect("write");

        let extracted = HeaderProbe.extract(&path).await.expect("extract");
        assert_eq!(extracted.width, Some(100));
        assert_eq!(extracted.height, Some(50));
    }

    #[tokio::test]
    async fn truncated_file_degrades_without_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.png");
        std::fs::write(&path, [0x89, b'P', b'N', b'G']).expect("write");

        let extracted = HeaderProbe.extract(&path).await.expect("extract");
        assert_eq!(extracted.quality, MetadataQuality::Degraded);
    }

    #[tokio::test]
    async fn video_reports_partial_without_probing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, b"not really a video").expect("write");

        let extracted = HeaderProbe.extract(&path).await.expect("extract");
        assert_eq!(extracted.quality, MetadataQuality::Partial);
        assert_eq!(extracted.width, None);
    }
}

// SPDX-License-Identifier: MIT
// artifacts/server.rs — Artifact HTTP delivery server.
//
// Axum HTTP server, default port 4401 (local only).
// This is the cheap way to hand an artifact to a caller: a locator pointing
// here beats base64 in an RPC response by a wide margin for anything big.
//
// Endpoints:
//   GET /artifacts/{name}          — whole artifact (or its manifest, for
//                                    frame-capture directories)
//   GET /artifacts/{name}/{file}   — one file inside a directory artifact
//
// Byte ranges are honored (`Range: bytes=start-end`): 206 with Content-Range
// for valid partial ranges, 416 when the range misses the file entirely,
// 200 with the full body otherwise. Published artifacts are immutable, so a
// moderate Cache-Control is safe.

use std::collections::HashMap;
use std::net::SocketAddr;

use anyhow::Result;
use axum::body::Body;
use axum::extract::{Path as UrlPath, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use once_cell::sync::Lazy;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::info;

use crate::recorder::error::RecordError;
use crate::recorder::frames::MANIFEST_FILENAME;

use super::{ArtifactRecord, SharedArtifactStore};

const CACHE_CONTROL: &str = "public, max-age=3600";

static CONTENT_TYPES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("webm", "video/webm"),
        ("mp4", "video/mp4"),
        ("mkv", "video/x-matroska"),
        ("jpeg", "image/jpeg"),
        ("jpg", "image/jpeg"),
        ("png", "image/png"),
        ("gif", "image/gif"),
        ("json", "application/json"),
        ("txt", "text/plain; charset=utf-8"),
    ])
});

pub fn build_router(store: SharedArtifactStore) -> Router {
    Router::new()
        .route("/artifacts/{*name}", get(serve_artifact))
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(store)
}

pub async fn serve(store: SharedArtifactStore, bind_address: &str, port: u16) -> Result<()> {
    let addr: SocketAddr = format!("{bind_address}:{port}").parse()?;
    let router = build_router(store);
    info!("artifact server listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

async fn serve_artifact(
    State(store): State<SharedArtifactStore>,
    UrlPath(name): UrlPath<String>,
    headers: HeaderMap,
) -> Response {
    let record = match store.resolve(&name).await {
        Ok(r) => r,
        Err(e) => return error_response(&e),
    };

    // A directory artifact has no single byte stream; its entry point is the
    // manifest. Individual frames are addressed as {name}/{file}.
    let path = if record.is_dir {
        record.path.join(MANIFEST_FILENAME)
    } else {
        record.path.clone()
    };

    let size = match tokio::fs::metadata(&path).await {
        Ok(m) => m.len(),
        Err(_) => {
            return error_response(&RecordError::NotFound {
                name,
                listing: String::new(),
            })
        }
    };

    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(|v| parse_range(v, size));

    match range {
        Some(Err(_)) => {
            // Unsatisfiable range: tell the caller how big the artifact is.
            Response::builder()
                .status(StatusCode::RANGE_NOT_SATISFIABLE)
                .header(header::CONTENT_RANGE, format!("bytes */{size}"))
                .header(header::ACCEPT_RANGES, "bytes")
                .body(Body::empty())
                .unwrap_or_default()
        }
        Some(Ok(Some((start, end)))) => {
            let body = match read_range(&path, start, end).await {
                Ok(b) => b,
                Err(e) => return error_response(&e),
            };
            Response::builder()
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_TYPE, content_type_for(&record))
                .header(header::CONTENT_LENGTH, body.len())
                .header(header::CONTENT_RANGE, format!("bytes {start}-{end}/{size}"))
                .header(header::ACCEPT_RANGES, "bytes")
                .header(header::CACHE_CONTROL, CACHE_CONTROL)
                .body(Body::from(body))
                .unwrap_or_default()
        }
        // No Range header, or one we ignore as malformed: full body.
        _ => {
            let body = match tokio::fs::read(&path).await {
                Ok(b) => b,
                Err(e) => return error_response(&RecordError::from(e)),
            };
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, content_type_for(&record))
                .header(header::CONTENT_LENGTH, body.len())
                .header(header::ACCEPT_RANGES, "bytes")
                .header(header::CACHE_CONTROL, CACHE_CONTROL)
                .body(Body::from(body))
                .unwrap_or_default()
        }
    }
}

/// Parse a `Range` header value against the actual size.
///
/// `Ok(None)` means "serve the whole file" (absent or malformed header —
/// malformed ranges are ignored rather than rejected). `Err` means the range
/// is syntactically fine but unsatisfiable for this size.
fn parse_range(value: &str, size: u64) -> Result<Option<(u64, u64)>, RecordError> {
    let Some(spec) = value.strip_prefix("bytes=") else {
        return Ok(None);
    };
    // Multi-range requests are not supported; treat them as malformed.
    if spec.contains(',') {
        return Ok(None);
    }
    let Some((start_s, end_s)) = spec.split_once('-') else {
        return Ok(None);
    };

    match (start_s.is_empty(), end_s.is_empty()) {
        // "-N": the last N bytes.
        (true, false) => {
            let n: u64 = match end_s.parse() {
                Ok(n) => n,
                Err(_) => return Ok(None),
            };
            if n == 0 || size == 0 {
                return Err(RecordError::InvalidRange);
            }
            Ok(Some((size.saturating_sub(n), size - 1)))
        }
        // "N-": from N to the end.
        (false, true) => {
            let start: u64 = match start_s.parse() {
                Ok(n) => n,
                Err(_) => return Ok(None),
            };
            if start >= size {
                return Err(RecordError::InvalidRange);
            }
            Ok(Some((start, size - 1)))
        }
        // "N-M"
        (false, false) => {
            let (start, end): (u64, u64) = match (start_s.parse(), end_s.parse()) {
                (Ok(s), Ok(e)) => (s, e),
                _ => return Ok(None),
            };
            if start > end || start >= size {
                return Err(RecordError::InvalidRange);
            }
            Ok(Some((start, end.min(size - 1))))
        }
        (true, true) => Ok(None),
    }
}

async fn read_range(
    path: &std::path::Path,
    start: u64,
    end: u64,
) -> Result<Vec<u8>, RecordError> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(std::io::SeekFrom::Start(start)).await?;
    let len = (end - start + 1) as usize;
    let mut buf = vec![0u8; len];
    file.read_exact(&mut buf).await?;
    Ok(buf)
}

fn content_type_for(record: &ArtifactRecord) -> &'static str {
    if record.is_dir {
        return "application/json"; // the manifest
    }
    record
        .path
        .extension()
        .and_then(|e| e.to_str())
        .and_then(|e| CONTENT_TYPES.get(e.to_ascii_lowercase().as_str()).copied())
        .unwrap_or("application/octet-stream")
}

fn error_response(e: &RecordError) -> Response {
    let status = match e {
        RecordError::NotFound { .. } => StatusCode::NOT_FOUND,
        RecordError::TraversalAttempt => StatusCode::BAD_REQUEST,
        RecordError::InvalidRange => StatusCode::RANGE_NOT_SATISFIABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": e.to_error_object() }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_parsing_bounds() {
        assert_eq!(parse_range("bytes=0-99", 1000).unwrap(), Some((0, 99)));
        assert_eq!(parse_range("bytes=500-", 1000).unwrap(), Some((500, 999)));
        assert_eq!(parse_range("bytes=-100", 1000).unwrap(), Some((900, 999)));
        // End past EOF is clamped, not rejected.
        assert_eq!(parse_range("bytes=900-2000", 1000).unwrap(), Some((900, 999)));
        // Start past EOF is unsatisfiable.
        assert!(parse_range("bytes=2000-2100", 1000).is_err());
        assert!(parse_range("bytes=5-2", 1000).is_err());
        // Malformed ranges are ignored.
        assert_eq!(parse_range("bytes=abc-def", 1000).unwrap(), None);
        assert_eq!(parse_range("items=0-5", 1000).unwrap(), None);
        assert_eq!(parse_range("bytes=0-5,10-20", 1000).unwrap(), None);
    }

    #[test]
    fn content_types_fall_back_to_octet_stream() {
        let record = |name: &str| ArtifactRecord {
            name: name.to_string(),
            path: std::path::PathBuf::from(name),
            size_bytes: 0,
            finalized_at: chrono::Utc::now(),
            is_dir: false,
        };
        assert_eq!(content_type_for(&record("a.webm")), "video/webm");
        assert_eq!(content_type_for(&record("a.JPEG")), "image/jpeg");
        assert_eq!(content_type_for(&record("a.bin")), "application/octet-stream");
        assert_eq!(content_type_for(&record("noext")), "application/octet-stream");
    }
}

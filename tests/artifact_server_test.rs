//! Integration tests for the artifact HTTP delivery server.
//! Binds a real listener and speaks plain HTTP/1.1 over a TcpStream, so the
//! byte-range semantics are tested on the wire, headers and all.

use std::io::{Read as _, Write as _};
use std::sync::Arc;

use chrono::Utc;
use reeld::artifacts::{server, ArtifactRecord, ArtifactStore};

struct TestServer {
    addr: String,
    _tmp: tempfile::TempDir,
}

/// 1000-byte artifact `clip.webm`, a directory artifact `capture`, and a
/// running server.
async fn start_test_server() -> TestServer {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(ArtifactStore::new(tmp.path().to_path_buf()));

    let clip = tmp.path().join("clip.webm");
    let body: Vec<u8> = (0..1000u32).map(|i| (i % 256) as u8).collect();
    std::fs::write(&clip, &body).unwrap();
    store
        .publish(ArtifactRecord {
            name: "clip.webm".into(),
            path: clip,
            size_bytes: 1000,
            finalized_at: Utc::now(),
            is_dir: false,
        })
        .await;

    let frames = tmp.path().join("frames-dir");
    std::fs::create_dir_all(&frames).unwrap();
    std::fs::write(frames.join("frame-00000.jpeg"), b"jpeg-bytes").unwrap();
    std::fs::write(frames.join("manifest.json"), br#"{"frameCount":1}"#).unwrap();
    store
        .publish(ArtifactRecord {
            name: "capture".into(),
            path: frames,
            size_bytes: 10,
            finalized_at: Utc::now(),
            is_dir: true,
        })
        .await;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let router = server::build_router(store);
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    TestServer { addr, _tmp: tmp }
}

/// One blocking HTTP/1.1 request; returns (status, headers, body).
fn http_get(addr: &str, path: &str, range: Option<&str>) -> (u16, Vec<(String, String)>, Vec<u8>) {
    let mut stream = std::net::TcpStream::connect(addr).unwrap();
    let range_header = range
        .map(|r| format!("Range: {r}\r\n"))
        .unwrap_or_default();
    let request =
        format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n{range_header}Connection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).unwrap();

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).unwrap();

    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("complete response head");
    let head = String::from_utf8_lossy(&raw[..split]).to_string();
    let body = raw[split + 4..].to_vec();

    let mut lines = head.lines();
    let status: u16 = lines
        .next()
        .unwrap()
        .split_whitespace()
        .nth(1)
        .unwrap()
        .parse()
        .unwrap();
    let headers = lines
        .filter_map(|line| {
            let (k, v) = line.split_once(':')?;
            Some((k.trim().to_ascii_lowercase(), v.trim().to_string()))
        })
        .collect();
    (status, headers, body)
}

fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_body_without_range() {
    let srv = start_test_server().await;
    let (status, headers, body) = http_get(&srv.addr, "/artifacts/clip.webm", None);

    assert_eq!(status, 200);
    assert_eq!(header(&headers, "content-length"), Some("1000"));
    assert_eq!(header(&headers, "content-type"), Some("video/webm"));
    assert_eq!(header(&headers, "accept-ranges"), Some("bytes"));
    assert!(header(&headers, "cache-control").unwrap().contains("max-age"));
    assert_eq!(body.len(), 1000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn valid_partial_range() {
    let srv = start_test_server().await;
    let (status, headers, body) =
        http_get(&srv.addr, "/artifacts/clip.webm", Some("bytes=0-99"));

    assert_eq!(status, 206);
    assert_eq!(header(&headers, "content-length"), Some("100"));
    assert_eq!(header(&headers, "content-range"), Some("bytes 0-99/1000"));
    assert_eq!(body.len(), 100);
    let expected: Vec<u8> = (0..100u32).map(|i| (i % 256) as u8).collect();
    assert_eq!(body, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn out_of_bounds_range_is_unsatisfiable() {
    let srv = start_test_server().await;
    let (status, headers, _body) =
        http_get(&srv.addr, "/artifacts/clip.webm", Some("bytes=2000-2100"));

    assert_eq!(status, 416);
    assert_eq!(header(&headers, "content-range"), Some("bytes */1000"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn suffix_and_open_ended_ranges() {
    let srv = start_test_server().await;

    let (status, headers, body) =
        http_get(&srv.addr, "/artifacts/clip.webm", Some("bytes=900-"));
    assert_eq!(status, 206);
    assert_eq!(header(&headers, "content-range"), Some("bytes 900-999/1000"));
    assert_eq!(body.len(), 100);

    let (status, headers, body) =
        http_get(&srv.addr, "/artifacts/clip.webm", Some("bytes=-50"));
    assert_eq!(status, 206);
    assert_eq!(header(&headers, "content-range"), Some("bytes 950-999/1000"));
    assert_eq!(body.len(), 50);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_artifact_is_404() {
    let srv = start_test_server().await;
    // `.mp4` dodges the extension-based scan fallback (only a .webm exists).
    let (status, _headers, _body) = http_get(&srv.addr, "/artifacts/nope.mp4", None);
    assert_eq!(status, 404);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn traversal_names_are_rejected_with_400() {
    let srv = start_test_server().await;
    let (status, _headers, _body) = http_get(&srv.addr, "/artifacts/../etc/passwd", None);
    assert_eq!(status, 400);

    let (status, _headers, _body) =
        http_get(&srv.addr, "/artifacts/%2e%2e/etc/passwd", None);
    assert_eq!(status, 400);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn directory_artifact_serves_manifest_and_frames() {
    let srv = start_test_server().await;

    let (status, headers, body) = http_get(&srv.addr, "/artifacts/capture", None);
    assert_eq!(status, 200);
    assert_eq!(header(&headers, "content-type"), Some("application/json"));
    assert!(String::from_utf8_lossy(&body).contains("frameCount"));

    let (status, headers, body) =
        http_get(&srv.addr, "/artifacts/capture/frame-00000.jpeg", None);
    assert_eq!(status, 200);
    assert_eq!(header(&headers, "content-type"), Some("image/jpeg"));
    assert_eq!(body, b"jpeg-bytes");
}

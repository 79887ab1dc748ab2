use std::io::{self, Write};
use std::time::Duration;

use cacheproxy::{Cache, CacheError, Reader};
use mockito::Server;
use tempfile::TempDir;

async fn read_all(reader: &mut Reader) -> Result<Vec<u8>, CacheError> {
    let mut out = Vec::new();
    let mut buf = [0u8; 64];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(out);
        }
        out.extend_from_slice(&buf[..n]);
    }
}

fn cache_dir() -> TempDir {
    tempfile::Builder::new()
        .prefix("cacheproxy-test-")
        .tempdir()
        .unwrap()
}

#[tokio::test]
async fn cold_miss_persists_entry() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/a")
        .with_status(200)
        .with_header("content-type", "text/plain")
        .with_body("0123456789")
        .create_async()
        .await;

    let dir = cache_dir();
    let cache = Cache::new(dir.path()).await.unwrap();
    let url = format!("{}/a", server.url());

    let mut reader = cache.get_reader(&url, None).await.unwrap();
    let entry = reader.entry().await.unwrap();
    assert_eq!(entry.content_type, "text/plain");

    let bytes = read_all(&mut reader).await.unwrap();
    assert_eq!(bytes, b"0123456789");

    mock.assert_async().await;

    let fp = cacheproxy::fingerprint(&url);
    let metadata = tokio::fs::read_to_string(dir.path().join(format!("{fp}.json")))
        .await
        .unwrap();
    assert!(metadata.contains("\"complete\":true"));
    assert!(metadata.contains("\"content_length\":\"10\""));
}

#[tokio::test]
async fn warm_hit_serves_without_network() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/b")
        .with_status(200)
        .with_body("warm hit body")
        .expect(1)
        .create_async()
        .await;

    let dir = cache_dir();
    let cache = Cache::new(dir.path()).await.unwrap();
    let url = format!("{}/b", server.url());

    let mut first = cache.get_reader(&url, None).await.unwrap();
    let first_bytes = read_all(&mut first).await.unwrap();

    let mut second = cache.get_reader(&url, None).await.unwrap();
    let second_bytes = read_all(&mut second).await.unwrap();

    assert_eq!(first_bytes, second_bytes);
    assert_eq!(second_bytes, b"warm hit body");
    mock.assert_async().await;
}

#[tokio::test]
async fn concurrent_miss_single_flight() {
    let mut server = Server::new_async().await;
    let body = vec![b'x'; 64 * 1024];
    let mock = server
        .mock("GET", "/c")
        .with_status(200)
        .with_body(&body)
        .expect(1)
        .create_async()
        .await;

    let dir = cache_dir();
    let cache = Cache::new(dir.path()).await.unwrap();
    let url = format!("{}/c", server.url());

    let (a, b) = tokio::join!(cache.get_reader(&url, None), cache.get_reader(&url, None));
    let mut a = a.unwrap();
    let mut b = b.unwrap();

    let (a_bytes, b_bytes) = tokio::join!(read_all(&mut a), read_all(&mut b));
    let a_bytes = a_bytes.unwrap();
    let b_bytes = b_bytes.unwrap();

    assert_eq!(a_bytes, body);
    assert_eq!(b_bytes, body);
    mock.assert_async().await;
}

#[tokio::test]
async fn origin_404_maps_to_origin_status_error() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", "/missing")
        .with_status(404)
        .create_async()
        .await;

    let dir = cache_dir();
    let cache = Cache::new(dir.path()).await.unwrap();
    let url = format!("{}/missing", server.url());

    let mut reader = cache.get_reader(&url, None).await.unwrap();
    let err = reader.entry().await.unwrap_err();
    assert!(matches!(err, CacheError::OriginStatus { .. }));

    let fp = cacheproxy::fingerprint(&url);
    assert!(!dir.path().join(format!("{fp}.json")).exists());
}

#[tokio::test]
async fn download_error_mid_body_reports_partial_then_error() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", "/broken")
        .with_status(200)
        .with_chunked_body(|w| {
            w.write_all(b"01234")?;
            Err(io::ErrorKind::TimedOut.into())
        })
        .create_async()
        .await;

    let dir = cache_dir();
    let cache = Cache::new(dir.path()).await.unwrap();
    let url = format!("{}/broken", server.url());

    let mut reader = cache.get_reader(&url, None).await.unwrap();
    reader.entry().await.unwrap();

    let mut buf = [0u8; 64];
    let mut collected = Vec::new();
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => panic!("expected a terminal error, got clean end-of-stream"),
            Ok(n) => collected.extend_from_slice(&buf[..n]),
            Err(CacheError::Transport(_)) => break,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(collected, b"01234");
}

#[tokio::test]
async fn complete_entry_with_tight_max_age_is_still_a_hit() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/d")
        .with_status(200)
        .with_body("stale but complete")
        .expect(1)
        .create_async()
        .await;

    let dir = cache_dir();
    let cache = Cache::new(dir.path()).await.unwrap();
    let url = format!("{}/d", server.url());

    let mut first = cache.get_reader(&url, None).await.unwrap();
    read_all(&mut first).await.unwrap();

    // No `Last-Modified` header was sent, so `is_fresh` can never judge this entry fresh.
    // A complete entry must still be served without a second request.
    let tight_max_age = chrono::Duration::seconds(0);
    let mut second = cache.get_reader(&url, Some(tight_max_age)).await.unwrap();
    let bytes = read_all(&mut second).await.unwrap();

    assert_eq!(bytes, b"stale but complete");
    mock.assert_async().await;
}

#[tokio::test]
async fn partial_content_status_is_not_treated_as_success() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", "/partial")
        .with_status(206)
        .with_body("chunk")
        .create_async()
        .await;

    let dir = cache_dir();
    let cache = Cache::new(dir.path()).await.unwrap();
    let url = format!("{}/partial", server.url());

    let mut reader = cache.get_reader(&url, None).await.unwrap();
    let err = reader.entry().await.unwrap_err();
    assert!(matches!(err, CacheError::OriginStatus { .. }));
}

#[tokio::test]
async fn non_not_found_metadata_error_propagates() {
    let dir = cache_dir();
    let cache = Cache::new(dir.path()).await.unwrap();
    let url = "http://example.invalid/e";

    let fp = cacheproxy::fingerprint(url);
    // A directory where the metadata sidecar is expected fails to load with something
    // other than `NotFound`; that must surface as a real error, not a silent miss.
    tokio::fs::create_dir(dir.path().join(format!("{fp}.json"))).await.unwrap();

    let err = cache.get_reader(url, None).await.unwrap_err();
    assert!(matches!(err, CacheError::Filesystem(_)));
}

#[tokio::test]
async fn close_waits_for_in_flight_download() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", "/slow")
        .with_status(200)
        .with_chunked_body(move |w| {
            std::thread::sleep(Duration::from_millis(150));
            w.write_all(b"slow body")
        })
        .create_async()
        .await;

    let dir = cache_dir();
    let cache = Cache::new(dir.path()).await.unwrap();
    let url = format!("{}/slow", server.url());

    let _reader = cache.get_reader(&url, None).await.unwrap();
    cache.close().await;

    let fp = cacheproxy::fingerprint(&url);
    let metadata = tokio::fs::read_to_string(dir.path().join(format!("{fp}.json")))
        .await
        .unwrap();
    assert!(metadata.contains("\"complete\":true"));
}

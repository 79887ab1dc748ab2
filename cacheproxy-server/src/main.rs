//! Thin HTTP front-end over [`cacheproxy::Cache`].
//!
//! This binary is illustrative, not a complete HTTP forward proxy: it does not speak
//! absolute-URI proxy requests or `CONNECT`, only a path-based mapping of the target
//! archive URL. Its purpose is to give the cache a runnable host and a place to exercise
//! the streaming contract end to end; URL canonicalisation, argument parsing beyond what
//! `clap` derives here, and service advertisement are external collaborators this binary
//! does not attempt to replace.

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::body::Body;
use axum::extract::{Path as AxumPath, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use cacheproxy::{Cache, CacheError};
use clap::Parser;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Caching forward proxy for package-manager archive fetches.
#[derive(Debug, Parser)]
#[command(name = "cacheproxy-server", version, about)]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: SocketAddr,

    /// Directory used to persist cached archives.
    #[arg(long, default_value = "./cache")]
    cache_dir: PathBuf,

    /// Default maximum age, in seconds, a cached entry may have before it is re-fetched,
    /// used for requests that carry no `Cache-Control: max-age=N` header of their own.
    /// Unset means a completed entry is served regardless of age.
    #[arg(long)]
    max_age_secs: Option<i64>,
}

#[derive(Clone)]
struct AppState {
    cache: Cache,
    /// Fallback used when a request's own `Cache-Control` header names no max-age.
    max_age: Option<chrono::Duration>,
}

/// Parse a `max-age` directive out of a request's `Cache-Control` header, the way a
/// `Cache-Control: max-age=3600` request asks a caching proxy to bound entry age.
/// Unparsable or negative values, and a missing header, all yield `None`.
fn max_age_from_request(headers: &HeaderMap) -> Option<chrono::Duration> {
    let value = headers.get(axum::http::header::CACHE_CONTROL)?.to_str().ok()?;
    value.split(',').find_map(|directive| {
        let seconds: i64 = directive.trim().strip_prefix("max-age=")?.parse().ok()?;
        (seconds >= 0).then(|| chrono::Duration::seconds(seconds))
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let cache = Cache::new(&args.cache_dir).await?;
    let state = AppState {
        cache: cache.clone(),
        max_age: args.max_age_secs.map(chrono::Duration::seconds),
    };

    let app = Router::new().route("/{*target}", get(handle_get)).with_state(state);

    let listener = tokio::net::TcpListener::bind(args.listen).await?;
    tracing::info!(addr = %args.listen, cache_dir = %args.cache_dir.display(), "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cache))
        .await?;

    Ok(())
}

async fn shutdown_signal(cache: Cache) {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown requested, draining in-flight downloads");
    cache.close().await;
}

async fn handle_get(
    State(state): State<AppState>,
    AxumPath(target): AxumPath<String>,
    headers: HeaderMap,
) -> Response {
    let url = rewrite_url(&reconstruct_url(&target));
    let max_age = max_age_from_request(&headers).or(state.max_age);

    let mut reader = match state.cache.get_reader(&url, max_age).await {
        Ok(reader) => reader,
        Err(err) => return error_response(&url, &err),
    };

    let entry = match reader.entry().await {
        Ok(entry) => entry,
        Err(err) => return error_response(&url, &err),
    };

    let mut headers = HeaderMap::new();
    if !entry.content_type.is_empty() {
        if let Ok(v) = HeaderValue::from_str(&entry.content_type) {
            headers.insert(axum::http::header::CONTENT_TYPE, v);
        }
    }
    if let Ok(len) = entry.content_length.parse::<u64>() {
        if let Ok(v) = HeaderValue::from_str(&len.to_string()) {
            headers.insert(axum::http::header::CONTENT_LENGTH, v);
        }
    }
    if !entry.last_modified.is_empty() {
        if let Ok(v) = HeaderValue::from_str(&entry.last_modified) {
            headers.insert(axum::http::header::LAST_MODIFIED, v);
        }
    }

    tracing::info!(url = %url, "serving stream");

    let (tx, rx) = mpsc::channel::<Result<Vec<u8>, std::io::Error>>(4);
    tokio::spawn(async move {
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(Ok(buf[..n].to_vec())).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    let _ = tx
                        .send(Err(std::io::Error::other(err.to_string())))
                        .await;
                    break;
                }
            }
        }
    });

    let body = Body::from_stream(ReceiverStream::new(rx));
    (headers, body).into_response()
}

fn error_response(url: &str, err: &CacheError) -> Response {
    tracing::warn!(url = %url, error = %err, "request failed");
    let status = match err {
        CacheError::OriginStatus { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string()).into_response()
}

/// Map a request path to the archive URL it names: `/http/host/path...` or
/// `/https/host/path...`, defaulting to `http` when neither prefix is present.
fn reconstruct_url(target: &str) -> String {
    if let Some(rest) = target.strip_prefix("https/") {
        format!("https://{rest}")
    } else if let Some(rest) = target.strip_prefix("http/") {
        format!("http://{rest}")
    } else {
        format!("http://{target}")
    }
}

/// Canonicalise known regional archive mirrors to their canonical host, the way
/// `rewrite` does in the upstream this front-end takes after, so that regionally
/// prefixed mirror hostnames share a single cache entry with the canonical one.
fn rewrite_url(url: &str) -> String {
    const CANONICAL_HOST: &str = "archive.ubuntu.com";
    const SUFFIX: &str = ".archive.ubuntu.com";

    let (scheme, rest) = if let Some(rest) = url.strip_prefix("https://") {
        ("https", rest)
    } else if let Some(rest) = url.strip_prefix("http://") {
        ("http", rest)
    } else {
        return url.to_string();
    };

    let Some((host, path)) = rest.split_once('/') else {
        return url.to_string();
    };

    if host != CANONICAL_HOST && host.ends_with(SUFFIX) {
        format!("{scheme}://{CANONICAL_HOST}/{path}")
    } else {
        url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconstructs_http_by_default() {
        assert_eq!(reconstruct_url("example.com/a.deb"), "http://example.com/a.deb");
    }

    #[test]
    fn reconstructs_explicit_scheme() {
        assert_eq!(reconstruct_url("https/example.com/a.deb"), "https://example.com/a.deb");
        assert_eq!(reconstruct_url("http/example.com/a.deb"), "http://example.com/a.deb");
    }

    #[test]
    fn rewrites_regional_mirror() {
        assert_eq!(
            rewrite_url("http://us.archive.ubuntu.com/ubuntu/pool/a.deb"),
            "http://archive.ubuntu.com/ubuntu/pool/a.deb"
        );
    }

    #[test]
    fn leaves_canonical_host_unchanged() {
        assert_eq!(
            rewrite_url("http://archive.ubuntu.com/ubuntu/pool/a.deb"),
            "http://archive.ubuntu.com/ubuntu/pool/a.deb"
        );
    }

    #[test]
    fn leaves_unrelated_host_unchanged() {
        assert_eq!(
            rewrite_url("http://example.com/a.deb"),
            "http://example.com/a.deb"
        );
    }

    #[test]
    fn parses_max_age_from_cache_control() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::CACHE_CONTROL, HeaderValue::from_static("max-age=3600"));
        assert_eq!(max_age_from_request(&headers), Some(chrono::Duration::seconds(3600)));
    }

    #[test]
    fn parses_max_age_among_other_directives() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache, max-age=60"),
        );
        assert_eq!(max_age_from_request(&headers), Some(chrono::Duration::seconds(60)));
    }

    #[test]
    fn missing_cache_control_yields_no_max_age() {
        assert_eq!(max_age_from_request(&HeaderMap::new()), None);
    }

    #[test]
    fn negative_max_age_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::CACHE_CONTROL, HeaderValue::from_static("max-age=-1"));
        assert_eq!(max_age_from_request(&headers), None);
    }
}

//! Error types shared across the cache, its downloader and its readers.

use std::io;
use std::sync::Arc;

/// Errors that can terminate a download or a read.
///
/// This type is [`Clone`] because a single terminal condition (for instance a transport
/// failure partway through a body) must be observable by every reader currently tailing
/// the same download, not just the first one to notice it. Cloning an [`io::Error`] or a
/// [`reqwest::Error`] is not possible directly, so the underlying source is kept behind an
/// [`Arc`] instead of the usual [`Box`]; the trade-off is that `#[source]` cannot be used
/// here since `Arc<T>` does not implement [`std::error::Error`], only [`std::fmt::Display`].
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum CacheError {
    /// The origin could not be reached, or the connection failed mid-transfer.
    #[error("transport error: {0}")]
    Transport(Arc<reqwest::Error>),
    /// The origin responded with a non-success status.
    #[error("origin returned {status}")]
    OriginStatus {
        /// The HTTP status line as reported by the origin, e.g. `"404 Not Found"`.
        status: String,
    },
    /// A filesystem operation on a cache file failed.
    #[error("filesystem error: {0}")]
    Filesystem(Arc<io::Error>),
    /// The metadata sidecar file could not be decoded.
    #[error("corrupt cache metadata: {0}")]
    MetadataDecode(Arc<serde_json::Error>),
}

impl CacheError {
    pub(crate) fn new_io(error: io::Error) -> Self {
        Self::Filesystem(Arc::new(error))
    }

    pub(crate) fn new_reqwest(error: reqwest::Error) -> Self {
        Self::Transport(Arc::new(error))
    }

    pub(crate) fn new_json(error: serde_json::Error) -> Self {
        Self::MetadataDecode(Arc::new(error))
    }

    pub(crate) fn new_status(status: &reqwest::StatusCode) -> Self {
        Self::OriginStatus { status: status.to_string() }
    }

    /// Whether this is a filesystem error for a path that simply does not exist yet.
    ///
    /// Used to tell "no metadata sidecar on disk" (a genuine cache miss) apart from a
    /// permission error or other I/O failure while probing for one, which should propagate
    /// instead of being silently treated as a miss.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Filesystem(err) if err.kind() == io::ErrorKind::NotFound)
    }
}

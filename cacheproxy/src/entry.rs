//! The metadata record persisted alongside each cached object's body.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::error::CacheError;

/// Metadata describing one cached object, serialised as the `.json` sidecar next to its
/// `.data` body file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    /// The canonicalised URL that produced this entry.
    pub url: String,
    /// Whether the body has been fully written and the data file closed.
    pub complete: bool,
    /// Decimal byte count, `"-1"` when unknown (origin did not report a length).
    pub content_length: String,
    /// MIME type reported by the origin, empty if absent.
    #[serde(default)]
    pub content_type: String,
    /// The origin's `Last-Modified` header, verbatim, empty if absent.
    #[serde(default)]
    pub last_modified: String,
}

impl Entry {
    /// Read and decode the metadata file at `path`.
    pub async fn load(path: &Path) -> Result<Self, CacheError> {
        let bytes = tokio::fs::read(path).await.map_err(CacheError::new_io)?;
        serde_json::from_slice(&bytes).map_err(CacheError::new_json)
    }

    /// Encode and write this entry to `path`, truncating any previous contents.
    ///
    /// This is the atomicity point for the `complete: false -> true` transition: the
    /// whole file is rewritten and closed before this function returns.
    pub async fn save(&self, path: &Path) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec(self).map_err(CacheError::new_json)?;
        let mut file = tokio::fs::File::create(path).await.map_err(CacheError::new_io)?;
        file.write_all(&bytes).await.map_err(CacheError::new_io)?;
        file.flush().await.map_err(CacheError::new_io)?;
        Ok(())
    }

    /// Whether `last_modified` is no older than `max_age` relative to now.
    ///
    /// A missing or unparsable `last_modified` is treated as stale, never as fresh: an
    /// entry we cannot date is not eligible to shortcut a re-download.
    pub fn is_fresh(&self, max_age: chrono::Duration) -> bool {
        let Ok(last_modified) = chrono::DateTime::parse_from_rfc2822(&self.last_modified) else {
            return false;
        };
        let age = chrono::Utc::now().signed_duration_since(last_modified);
        age <= max_age
    }
}

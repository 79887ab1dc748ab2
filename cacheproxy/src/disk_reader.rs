//! Sequential reader over a fully-materialised cache entry.

use std::path::Path;

use tokio::io::AsyncReadExt;

use crate::entry::Entry;
use crate::error::CacheError;

/// Reads the body of a `complete` cache entry. The entry is loaded once, eagerly, at
/// construction time and never changes for the lifetime of the reader.
#[derive(Debug)]
pub struct DiskReader {
    entry: Entry,
    file: tokio::fs::File,
}

impl DiskReader {
    /// Load the metadata at `metadata_path` and open `data_path` for reading.
    pub async fn open(metadata_path: &Path, data_path: &Path) -> Result<Self, CacheError> {
        let entry = Entry::load(metadata_path).await?;
        let file = tokio::fs::File::open(data_path).await.map_err(CacheError::new_io)?;
        Ok(Self { entry, file })
    }

    /// Read the next chunk of the body. `Ok(0)` signals end-of-stream.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, CacheError> {
        self.file.read(buf).await.map_err(CacheError::new_io)
    }

    /// The entry loaded at construction time; never blocks, never fails.
    pub fn entry(&self) -> &Entry {
        &self.entry
    }
}

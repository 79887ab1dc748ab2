//! The reader handle returned by [`crate::Cache::get_reader`].

use crate::disk_reader::DiskReader;
use crate::entry::Entry;
use crate::error::CacheError;
use crate::live_reader::LiveReader;

/// A streaming reader over a cached object, either already complete on disk or still
/// being produced by an in-flight download.
///
/// Dispatches over a closed set of two concrete readers rather than a trait object:
/// there are exactly two cases and neither is extensible by downstream crates.
#[derive(Debug)]
pub enum Reader {
    Disk(DiskReader),
    Live(LiveReader),
}

impl Reader {
    /// Read the next chunk of the body. `Ok(0)` signals end-of-stream.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, CacheError> {
        match self {
            Reader::Disk(r) => r.read(buf).await,
            Reader::Live(r) => r.read(buf).await,
        }
    }

    /// The object's metadata. Never blocks for a [`DiskReader`]; may block on the
    /// origin's response headers for a [`LiveReader`].
    pub async fn entry(&mut self) -> Result<Entry, CacheError> {
        match self {
            Reader::Disk(r) => Ok(r.entry().clone()),
            Reader::Live(r) => r.entry().await,
        }
    }
}

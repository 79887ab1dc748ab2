//! Sequential reader that tails a cache entry while its [`Downloader`] is still writing it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;

use crate::downloader::Downloader;
use crate::entry::Entry;
use crate::error::CacheError;

/// Interval at which [`FileTail`] re-stats the data file while waiting for it to grow.
///
/// Stands in for a native file-change notification; the teacher's retrieval pack carries
/// no `notify`-family crate used for this purpose, and the underlying algorithm is
/// unaffected by polling versus push notification.
const TAIL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Polls a file's length until it grows past the last length this poller observed.
#[derive(Debug)]
struct FileTail {
    path: PathBuf,
    last_len: u64,
}

impl FileTail {
    fn new(path: PathBuf, initial_len: u64) -> Self {
        Self { path, last_len: initial_len }
    }

    /// Wait until the file's length exceeds the last observed length, then record the
    /// new length. Cancel-safe: dropping this future mid-wait leaves no state to repair.
    async fn wait_for_growth(&mut self) {
        loop {
            tokio::time::sleep(TAIL_POLL_INTERVAL).await;
            if let Ok(meta) = tokio::fs::metadata(&self.path).await {
                if meta.len() > self.last_len {
                    self.last_len = meta.len();
                    return;
                }
            }
        }
    }
}

/// Reads the body of a cache entry that may still be in progress, tailing the data file
/// as the owning [`Downloader`] appends to it.
#[derive(Debug)]
pub struct LiveReader {
    downloader: Arc<Downloader>,
    data_path: PathBuf,
    file: Option<tokio::fs::File>,
    tail: Option<FileTail>,
    /// Set once the downloader's `done` milestone has been observed; from then on a
    /// zero-byte read is a real end-of-stream rather than a transient gap.
    sticky_eof: bool,
    error: Option<CacheError>,
}

impl LiveReader {
    pub fn new(downloader: Arc<Downloader>, data_path: PathBuf) -> Self {
        Self {
            downloader,
            data_path,
            file: None,
            tail: None,
            sticky_eof: false,
            error: None,
        }
    }

    /// The entry as currently known; may block until response headers are observed.
    pub async fn entry(&mut self) -> Result<Entry, CacheError> {
        self.downloader.get_entry().await
    }

    /// Read the next chunk of the body. `Ok(0)` signals a real end-of-stream: the
    /// download finished and every written byte has been delivered.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, CacheError> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }

        if self.file.is_none() {
            // Waiting for headers here, rather than at construction, lets the cache
            // hand out a LiveReader without blocking on the origin's response.
            self.downloader.get_entry().await?;
            let file = tokio::fs::File::open(&self.data_path)
                .await
                .map_err(CacheError::new_io)?;
            let current_len = tokio::fs::metadata(&self.data_path)
                .await
                .map(|meta| meta.len())
                .unwrap_or(0);
            self.tail = Some(FileTail::new(self.data_path.clone(), current_len));
            self.file = Some(file);
        }

        loop {
            let file = self.file.as_mut().expect("file opened above");
            match file.read(buf).await {
                Ok(0) => {
                    if self.sticky_eof {
                        return Ok(0);
                    }
                    let tail = self.tail.as_mut().expect("tail set alongside file");
                    tokio::select! {
                        _ = tail.wait_for_growth() => continue,
                        _ = self.downloader.wait_done_signal() => {
                            self.sticky_eof = true;
                            if let Some(err) = self.downloader.terminal_error() {
                                self.error = Some(err.clone());
                                return Err(err);
                            }
                            continue;
                        }
                    }
                }
                Ok(n) => return Ok(n),
                Err(err) => {
                    let err = CacheError::new_io(err);
                    self.error = Some(err.clone());
                    return Err(err);
                }
            }
        }
    }
}

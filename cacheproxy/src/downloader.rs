//! Single-flight background fetch of one cache entry.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};

use reqwest::{Client, Response};
use tokio::io::AsyncWriteExt;

use crate::entry::Entry;
use crate::error::CacheError;
use crate::milestone::Milestone;

/// Coordinates one in-flight download: fetches `url` from the origin, writes the body to
/// `data_path` and the metadata sidecar to `metadata_path`, and publishes two milestones
/// so any number of readers can observe progress without re-issuing the request.
///
/// A `Downloader` is spawned once per cache miss and runs to completion independently of
/// any reader that observes it; it is shared between readers as an `Arc`.
#[derive(Debug)]
pub struct Downloader {
    url: String,
    metadata_path: PathBuf,
    data_path: PathBuf,
    client: Client,
    entry: StdMutex<Option<Entry>>,
    error: StdMutex<Option<CacheError>>,
    header_ready: Milestone,
    done: Milestone,
}

impl Downloader {
    /// Create a downloader for `url` and spawn its background task.
    pub fn spawn(url: String, metadata_path: PathBuf, data_path: PathBuf, client: Client) -> Arc<Self> {
        let downloader = Arc::new(Self {
            url,
            metadata_path,
            data_path,
            client,
            entry: StdMutex::new(None),
            error: StdMutex::new(None),
            header_ready: Milestone::new(),
            done: Milestone::new(),
        });
        tokio::spawn(Arc::clone(&downloader).run());
        downloader
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    /// Block until the response headers have been received and the initial metadata
    /// saved, then return the entry observed at that point (or the terminal error if the
    /// download failed before headers could be observed).
    pub async fn get_entry(&self) -> Result<Entry, CacheError> {
        self.header_ready.wait().await;
        if let Some(err) = self.error.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(self
            .entry
            .lock()
            .unwrap()
            .clone()
            .expect("entry is set before header_ready is released"))
    }

    /// Block until the download task has terminated, returning its terminal error if any.
    pub async fn wait_for_done(&self) -> Option<CacheError> {
        self.done.wait().await;
        self.error.lock().unwrap().clone()
    }

    /// Used by [`crate::live_reader::LiveReader`] to race file-tail activity against
    /// download completion without consuming the terminal error eagerly.
    pub(crate) async fn wait_done_signal(&self) {
        self.done.wait().await;
    }

    pub(crate) fn terminal_error(&self) -> Option<CacheError> {
        self.error.lock().unwrap().clone()
    }

    async fn run(self: Arc<Self>) {
        match self.fetch_headers().await {
            Ok((file, response, entry)) => {
                self.header_ready.release();
                if let Err(err) = self.copy_body(file, response, entry).await {
                    *self.error.lock().unwrap() = Some(err);
                }
            }
            Err(err) => {
                *self.error.lock().unwrap() = Some(err);
                self.header_ready.release();
            }
        }
        self.done.release();
    }

    async fn fetch_headers(&self) -> Result<(tokio::fs::File, Response, Entry), CacheError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(CacheError::new_reqwest)?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(CacheError::new_status(&response.status()));
        }

        let file = tokio::fs::File::create(&self.data_path)
            .await
            .map_err(CacheError::new_io)?;

        let content_length = response
            .content_length()
            .map(|n| n.to_string())
            .unwrap_or_else(|| "-1".to_string());
        let content_type = header_str(&response, reqwest::header::CONTENT_TYPE);
        let last_modified = header_str(&response, reqwest::header::LAST_MODIFIED);

        let entry = Entry {
            url: self.url.clone(),
            complete: false,
            content_length,
            content_type,
            last_modified,
        };
        entry.save(&self.metadata_path).await?;
        *self.entry.lock().unwrap() = Some(entry.clone());

        Ok((file, response, entry))
    }

    async fn copy_body(
        &self,
        mut file: tokio::fs::File,
        mut response: Response,
        mut entry: Entry,
    ) -> Result<(), CacheError> {
        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await.map_err(CacheError::new_reqwest)? {
            file.write_all(&chunk).await.map_err(CacheError::new_io)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(CacheError::new_io)?;

        entry.content_length = written.to_string();
        entry.complete = true;
        if let Err(err) = entry.save(&self.metadata_path).await {
            tracing::warn!(url = %self.url, error = %err, "failed to persist final cache metadata");
        }
        *self.entry.lock().unwrap() = Some(entry);

        Ok(())
    }
}

fn header_str(response: &Response, name: reqwest::header::HeaderName) -> String {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string()
}

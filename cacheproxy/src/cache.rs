//! The cache: hit/miss dispatch, single-flight coordination, and shutdown drain.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use reqwest::Client;

use crate::disk_reader::DiskReader;
use crate::downloader::Downloader;
use crate::entry::Entry;
use crate::error::CacheError;
use crate::fingerprint::fingerprint;
use crate::live_reader::LiveReader;
use crate::reader::Reader;
use crate::task_group::TaskGroup;

#[derive(Debug)]
struct Inner {
    directory: PathBuf,
    client: Client,
    registry: tokio::sync::Mutex<HashMap<String, Arc<Downloader>>>,
    tasks: TaskGroup,
}

/// A keyed registry of in-flight downloads backed by a content-addressed on-disk cache.
///
/// Cheap to clone: internally an `Arc`, so the same cache can be shared across every HTTP
/// handler task without extra synchronisation on the caller's side.
#[derive(Debug, Clone)]
pub struct Cache {
    inner: Arc<Inner>,
}

impl Cache {
    /// Open (creating if absent) a cache rooted at `directory`.
    pub async fn new(directory: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let directory = directory.into();
        tokio::fs::create_dir_all(&directory).await.map_err(CacheError::new_io)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o775);
            tokio::fs::set_permissions(&directory, perms)
                .await
                .map_err(CacheError::new_io)?;
        }

        let client = crate::http::client().map_err(CacheError::new_reqwest)?;

        Ok(Self {
            inner: Arc::new(Inner {
                directory,
                client,
                registry: tokio::sync::Mutex::new(HashMap::new()),
                tasks: TaskGroup::new(),
            }),
        })
    }

    /// Resolve `url` to a reader, either an existing in-flight download, a completed
    /// on-disk entry, or a freshly spawned download.
    ///
    /// A complete on-disk entry is always served, regardless of `max_age`: completeness
    /// alone is what makes it safe to hand out a [`DiskReader`]. `max_age` only affects
    /// whether a stale-but-complete hit is logged as such; it can never turn a complete
    /// entry into a miss.
    pub async fn get_reader(
        &self,
        url: &str,
        max_age: Option<chrono::Duration>,
    ) -> Result<Reader, CacheError> {
        let fp = fingerprint(url);
        let metadata_path = self.inner.directory.join(format!("{fp}.json"));
        let data_path = self.inner.directory.join(format!("{fp}.data"));

        let mut registry = self.inner.registry.lock().await;

        if let Some(downloader) = registry.get(&fp) {
            let downloader = Arc::clone(downloader);
            drop(registry);
            tracing::info!(url = %url, fingerprint = %fp, "cache miss, joining in-flight download");
            return Ok(Reader::Live(LiveReader::new(downloader, data_path)));
        }

        let existing = Entry::load(&metadata_path).await;
        if let Err(err) = &existing {
            if !err.is_not_found() {
                drop(registry);
                return Err(err.clone());
            }
        }

        // A complete entry is always a hit regardless of age; `max_age` has no say over
        // it. Freshness is only ever logged here, never used to reject a complete entry.
        let is_hit = matches!(&existing, Ok(entry) if entry.complete);

        if is_hit {
            drop(registry);
            if let (Ok(entry), Some(age)) = (&existing, max_age) {
                if !entry.is_fresh(age) {
                    tracing::debug!(url = %url, fingerprint = %fp, "serving stale but complete entry");
                }
            }
            tracing::info!(url = %url, fingerprint = %fp, "cache hit");
            let reader = DiskReader::open(&metadata_path, &data_path).await?;
            return Ok(Reader::Disk(reader));
        }

        let downloader = Downloader::spawn(
            url.to_string(),
            metadata_path.clone(),
            data_path.clone(),
            self.inner.client.clone(),
        );
        registry.insert(fp.clone(), Arc::clone(&downloader));
        self.inner.tasks.add();
        drop(registry);

        let inner = Arc::clone(&self.inner);
        let reaper_fp = fp.clone();
        let reaper_downloader = Arc::clone(&downloader);
        tokio::spawn(async move {
            reaper_downloader.wait_for_done().await;
            inner.registry.lock().await.remove(&reaper_fp);
            inner.tasks.done();
        });

        tracing::info!(url = %url, fingerprint = %fp, "cache miss");
        Ok(Reader::Live(LiveReader::new(downloader, data_path)))
    }

    /// Block until every in-flight download has finished and been reaped. Accepts no new
    /// downloads to wait for after it starts; the caller is expected to have already
    /// stopped routing new requests to [`Cache::get_reader`].
    pub async fn close(&self) {
        self.inner.tasks.wait().await;
    }
}

//! Content cache shared by every zone of the screen
//!
//! Handles:
//! - Deduplicated loads: concurrent callers for one URL share a single fetch
//! - Batched preloading with a bounded number of outstanding requests
//! - Media kind detection from the response `Content-Type`
//! - Per-request timeout, reported separately from transport failures
//!
//! Entries stay cached for the life of the process unless `clear()` or
//! `evict()` is called. Failed loads are not kept, so the next `load()` retries.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Failure of a single content request
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CacheError {
    #[error("Transport error for {url}: {reason}")]
    Transport { url: String, reason: String },
    #[error("Request for {url} timed out after {after_ms}ms")]
    Timeout { url: String, after_ms: u64 },
    #[error("Request for {url} returned HTTP {status}")]
    Status { url: String, status: u16 },
}

/// Coarse media classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Other,
}

impl MediaKind {
    /// Classify a `Content-Type` header value
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        let essence = content_type
            .and_then(|ct| ct.split(';').next())
            .map(|ct| ct.trim().to_ascii_lowercase())
            .unwrap_or_default();

        if essence.starts_with("image/") {
            MediaKind::Image
        } else if essence.starts_with("video/") {
            MediaKind::Video
        } else {
            MediaKind::Other
        }
    }
}

/// Raw response handed back by a [`ContentFetcher`]
#[derive(Debug, Clone)]
pub struct FetchedContent {
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// Successfully loaded content
#[derive(Debug, Clone)]
pub struct CachedContent {
    pub url: String,
    pub kind: MediaKind,
    pub content_type: Option<String>,
    pub payload: Bytes,
    pub loaded_at: DateTime<Utc>,
}

/// Summary of a `preload()` run
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PreloadReport {
    pub total: usize,
    pub loaded: usize,
    pub failed: Vec<String>,
}

/// Network seam of the cache
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedContent, CacheError>;
}

/// reqwest-backed fetcher
///
/// Media downloads get their own per-request timeout, which replaces any
/// whole-request timeout configured on the shared client.
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl ContentFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedContent, CacheError> {
        let after_ms = self.timeout.as_millis() as u64;
        let transport = |e: reqwest::Error| {
            if e.is_timeout() {
                CacheError::Timeout { url: url.to_string(), after_ms }
            } else {
                CacheError::Transport {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        };

        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(CacheError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(transport)?;

        Ok(FetchedContent { content_type, body })
    }
}

type LoadResult = Result<Arc<CachedContent>, CacheError>;
type LoadFuture = Shared<BoxFuture<'static, LoadResult>>;

enum Slot {
    Ready(Arc<CachedContent>),
    Loading { id: u64, future: LoadFuture },
}

struct CacheInner {
    fetcher: Arc<dyn ContentFetcher>,
    timeout: Duration,
    slots: Mutex<HashMap<String, Slot>>,
    next_id: AtomicU64,
}

/// Cheap to clone; all clones share one map
#[derive(Clone)]
pub struct ContentCache {
    inner: Arc<CacheInner>,
}

impl ContentCache {
    pub fn new(fetcher: Arc<dyn ContentFetcher>, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                fetcher,
                timeout,
                slots: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Return the cached entry for `url`, fetching it at most once
    pub async fn load(&self, url: &str) -> LoadResult {
        let (id, future) = {
            let mut slots = self.inner.slots.lock();
            match slots.get(url) {
                Some(Slot::Ready(entry)) => return Ok(entry.clone()),
                Some(Slot::Loading { id, future }) => (*id, future.clone()),
                None => {
                    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                    let future = self.fetch_future(url).boxed().shared();
                    slots.insert(
                        url.to_string(),
                        Slot::Loading { id, future: future.clone() },
                    );
                    (id, future)
                }
            }
        };

        let result = future.await;

        // Only the load that owns the slot may settle it; a clear() in between wins
        let mut slots = self.inner.slots.lock();
        let owns_slot = matches!(slots.get(url), Some(Slot::Loading { id: current, .. }) if *current == id);
        if owns_slot {
            match &result {
                Ok(entry) => {
                    slots.insert(url.to_string(), Slot::Ready(entry.clone()));
                }
                Err(_) => {
                    slots.remove(url);
                }
            }
        }

        result
    }

    /// Load `urls` in sequential batches of `max_concurrent` concurrent requests.
    ///
    /// `on_progress(completed, total)` fires once per URL, `on_error` once per failure.
    pub async fn preload<P, E>(
        &self,
        urls: &[String],
        max_concurrent: usize,
        mut on_progress: P,
        mut on_error: E,
    ) -> PreloadReport
    where
        P: FnMut(usize, usize),
        E: FnMut(&str, &CacheError),
    {
        let total = urls.len();
        let batch_size = max_concurrent.max(1);
        let mut report = PreloadReport { total, ..Default::default() };
        let mut completed = 0;

        debug!("Preloading {} urls in batches of {}", total, batch_size);

        for batch in urls.chunks(batch_size) {
            let mut in_flight: FuturesUnordered<_> = batch
                .iter()
                .map(|url| async move { (url, self.load(url).await) })
                .collect();

            while let Some((url, result)) = in_flight.next().await {
                completed += 1;
                match result {
                    Ok(_) => report.loaded += 1,
                    Err(e) => {
                        warn!("Preload failed: {}", e);
                        on_error(url, &e);
                        report.failed.push(url.clone());
                    }
                }
                on_progress(completed, total);
            }
        }

        report
    }

    /// Whether a completed entry exists for `url`
    pub fn contains(&self, url: &str) -> bool {
        matches!(self.inner.slots.lock().get(url), Some(Slot::Ready(_)))
    }

    /// Number of completed entries
    pub fn len(&self) -> usize {
        self.inner
            .slots
            .lock()
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget a single URL. Returns whether anything was removed.
    pub fn evict(&self, url: &str) -> bool {
        self.inner.slots.lock().remove(url).is_some()
    }

    /// Forget everything
    pub fn clear(&self) {
        self.inner.slots.lock().clear();
    }

    fn fetch_future(&self, url: &str) -> impl std::future::Future<Output = LoadResult> + Send + 'static {
        let fetcher = self.inner.fetcher.clone();
        let timeout = self.inner.timeout;
        let url = url.to_string();

        async move {
            match tokio::time::timeout(timeout, fetcher.fetch(&url)).await {
                Ok(Ok(fetched)) => {
                    let kind = MediaKind::from_content_type(fetched.content_type.as_deref());
                    debug!("Loaded {} ({:?}, {} bytes)", url, kind, fetched.body.len());
                    Ok(Arc::new(CachedContent {
                        url,
                        kind,
                        content_type: fetched.content_type,
                        payload: fetched.body,
                        loaded_at: Utc::now(),
                    }))
                }
                Ok(Err(e)) => Err(e),
                Err(_) => Err(CacheError::Timeout {
                    url,
                    after_ms: timeout.as_millis() as u64,
                }),
            }
        }
    }
}

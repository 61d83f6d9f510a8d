//! Stream URL resolution
//!
//! Catalog track ids are not playable; a resolver turns them into
//! short-lived stream URLs. The trait seam exists so tests can swap the
//! subprocess resolver for a scripted one.
//!
//! [`CachedResolver`] wraps any resolver with a TTL cache plus in-flight
//! deduplication: concurrent requests for the same track share one
//! underlying resolution instead of racing duplicate subprocesses.

use crate::error::{Error, Result};
use async_trait::async_trait;
use quaver_common::model::{Quality, StreamSource};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

/// Resolved URLs are considered unusable this many seconds before their
/// stated expiry, so a track never starts on a URL about to die.
pub const STALE_BUFFER_SECS: i64 = 300;

/// TTL assumed when the URL carries no expiry of its own
const DEFAULT_TTL_HOURS: i64 = 5;

/// Resolver subprocess hard deadline
const RESOLVE_TIMEOUT: Duration = Duration::from_secs(15);

#[async_trait]
pub trait StreamResolver: Send + Sync {
    async fn resolve(&self, track_id: &str, quality: Quality) -> Result<StreamSource>;
}

/// Default resolver: shells out to yt-dlp for the stream URL.
pub struct YtDlpResolver {
    binary: String,
}

impl YtDlpResolver {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn format_selector(quality: Quality) -> &'static str {
        match quality {
            Quality::High => "bestaudio",
            Quality::Medium => "bestaudio[abr<=128]/bestaudio",
            Quality::Low => "worstaudio",
        }
    }
}

#[async_trait]
impl StreamResolver for YtDlpResolver {
    async fn resolve(&self, track_id: &str, quality: Quality) -> Result<StreamSource> {
        let output = tokio::time::timeout(
            RESOLVE_TIMEOUT,
            tokio::process::Command::new(&self.binary)
                .arg("-f")
                .arg(Self::format_selector(quality))
                .arg("-g")
                .arg("--no-playlist")
                .arg("--")
                .arg(track_id)
                .output(),
        )
        .await
        .map_err(|_| Error::Resolve(format!("resolver timed out for {}", track_id)))?
        .map_err(|e| Error::Resolve(format!("failed to run {}: {}", self.binary, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Resolve(format!(
                "resolver failed for {}: {}",
                track_id,
                stderr.lines().last().unwrap_or("unknown error")
            )));
        }

        let url = String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .unwrap_or("")
            .trim()
            .to_string();
        if url.is_empty() {
            return Err(Error::Resolve(format!("resolver returned no URL for {}", track_id)));
        }

        Ok(StreamSource {
            expires_at: expiry_from_url(&url)
                .unwrap_or_else(|| chrono::Utc::now() + chrono::Duration::hours(DEFAULT_TTL_HOURS)),
            format: None,
            url,
        })
    }
}

/// Streaming CDNs embed the expiry as an `expire` query parameter
/// (unix seconds). Absent or unparsable, the caller falls back to the
/// default TTL.
fn expiry_from_url(url: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    let query = url.split_once('?')?.1;
    for pair in query.split('&') {
        if let Some(value) = pair.strip_prefix("expire=") {
            let secs: i64 = value.parse().ok()?;
            return chrono::DateTime::from_timestamp(secs, 0);
        }
    }
    None
}

enum Slot {
    Ready(StreamSource),
    /// A resolution is running; subscribe to hear its outcome
    Pending(broadcast::Sender<std::result::Result<StreamSource, String>>),
}

/// TTL cache + in-flight dedup over an inner resolver.
pub struct CachedResolver<R: StreamResolver> {
    inner: Arc<R>,
    slots: Mutex<HashMap<String, Slot>>,
}

impl<R: StreamResolver + 'static> CachedResolver<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: Arc::new(inner),
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot_key(track_id: &str, quality: Quality) -> String {
        format!("{}\n{}", track_id, quality.as_str())
    }

    /// Resolve via cache. A fresh cached URL is returned immediately; a
    /// stale or absent one triggers exactly one underlying resolution no
    /// matter how many callers arrive concurrently.
    pub async fn resolve(&self, track_id: &str, quality: Quality) -> Result<StreamSource> {
        let key = Self::slot_key(track_id, quality);

        let mut rx = {
            let mut slots = self.slots.lock().await;
            match slots.get(&key) {
                Some(Slot::Ready(source)) if !source.is_stale(STALE_BUFFER_SECS) => {
                    return Ok(source.clone());
                }
                Some(Slot::Pending(tx)) => Some(tx.subscribe()),
                _ => {
                    let (tx, _) = broadcast::channel(1);
                    slots.insert(key.clone(), Slot::Pending(tx));
                    None
                }
            }
        };

        if let Some(rx) = rx.as_mut() {
            return match rx.recv().await {
                Ok(Ok(source)) => Ok(source),
                Ok(Err(message)) => Err(Error::Resolve(message)),
                Err(_) => Err(Error::Resolve(format!(
                    "in-flight resolution for {} was dropped",
                    track_id
                ))),
            };
        }

        // We own the pending slot; do the real work
        let outcome = self.inner.resolve(track_id, quality).await;

        let mut slots = self.slots.lock().await;
        let tx = match slots.remove(&key) {
            Some(Slot::Pending(tx)) => Some(tx),
            other => {
                // Slot was replaced while we worked; put it back
                if let Some(slot) = other {
                    slots.insert(key.clone(), slot);
                }
                None
            }
        };

        match &outcome {
            Ok(source) => {
                debug!(track_id, "resolved stream URL");
                slots.insert(key, Slot::Ready(source.clone()));
                if let Some(tx) = tx {
                    let _ = tx.send(Ok(source.clone()));
                }
            }
            Err(e) => {
                warn!(track_id, error = %e, "stream resolution failed");
                if let Some(tx) = tx {
                    let _ = tx.send(Err(e.to_string()));
                }
            }
        }
        outcome
    }

    /// Warm the cache for an upcoming track. Failures are logged, not
    /// surfaced; the real load will retry.
    pub fn prefetch(self: &Arc<Self>, track_id: String, quality: Quality) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.resolve(&track_id, quality).await {
                debug!(track_id = %track_id, error = %e, "prefetch resolution failed");
            }
        });
    }

    /// Drop a cached entry, e.g. after the engine rejected its URL.
    pub async fn invalidate(&self, track_id: &str, quality: Quality) {
        let key = Self::slot_key(track_id, quality);
        let mut slots = self.slots.lock().await;
        if matches!(slots.get(&key), Some(Slot::Ready(_))) {
            slots.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingResolver {
        calls: AtomicUsize,
        fail: bool,
        delay: Duration,
    }

    impl CountingResolver {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: false,
                delay: Duration::from_millis(0),
            }
        }
    }

    #[async_trait]
    impl StreamResolver for CountingResolver {
        async fn resolve(&self, track_id: &str, _quality: Quality) -> Result<StreamSource> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(Error::Resolve("scripted failure".into()));
            }
            Ok(StreamSource {
                url: format!("https://cdn.test/{}", track_id),
                expires_at: chrono::Utc::now() + chrono::Duration::hours(5),
                format: None,
            })
        }
    }

    #[tokio::test]
    async fn test_cache_hit_skips_inner() {
        let cached = CachedResolver::new(CountingResolver::new());
        let first = cached.resolve("t1", Quality::High).await.unwrap();
        let second = cached.resolve("t1", Quality::High).await.unwrap();
        assert_eq!(first.url, second.url);
        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_distinct_quality_distinct_entry() {
        let cached = CachedResolver::new(CountingResolver::new());
        cached.resolve("t1", Quality::High).await.unwrap();
        cached.resolve("t1", Quality::Low).await.unwrap();
        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_resolves_dedup_to_one_call() {
        let mut inner = CountingResolver::new();
        inner.delay = Duration::from_millis(50);
        let cached = Arc::new(CachedResolver::new(inner));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cached = Arc::clone(&cached);
            handles.push(tokio::spawn(async move {
                cached.resolve("t1", Quality::High).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let mut inner = CountingResolver::new();
        inner.fail = true;
        let cached = CachedResolver::new(inner);

        assert!(cached.resolve("t1", Quality::High).await.is_err());
        assert!(cached.resolve("t1", Quality::High).await.is_err());
        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_re_resolution() {
        let cached = CachedResolver::new(CountingResolver::new());
        cached.resolve("t1", Quality::High).await.unwrap();
        cached.invalidate("t1", Quality::High).await;
        cached.resolve("t1", Quality::High).await.unwrap();
        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_expiry_from_url() {
        let url = "https://cdn.test/audio?foo=1&expire=1700000000&bar=2";
        let parsed = expiry_from_url(url).unwrap();
        assert_eq!(parsed.timestamp(), 1_700_000_000);

        assert!(expiry_from_url("https://cdn.test/audio").is_none());
        assert!(expiry_from_url("https://cdn.test/audio?expire=notanumber").is_none());
    }
}

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use super::MediaFetcher;
use crate::cache::CacheStore;
use crate::error::{CacheError, DownloadError};

type SharedDownload = Shared<BoxFuture<'static, Result<PathBuf, DownloadError>>>;
type InFlight = Arc<Mutex<HashMap<String, SharedDownload>>>;

/// Fronts the cache's disk tier with at most one network transfer per URL.
///
/// Downloads run as spawned tasks, so a waiter that goes away (its slot was
/// reassigned) does not abort a transfer other waiters, or the next visit,
/// still benefit from.
pub struct DownloadCoordinator {
    cache: Arc<CacheStore>,
    fetcher: Arc<dyn MediaFetcher>,
    in_flight: InFlight,
}

impl DownloadCoordinator {
    pub fn new(cache: Arc<CacheStore>, fetcher: Arc<dyn MediaFetcher>) -> Self {
        Self {
            cache,
            fetcher,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn is_in_flight(&self, url: &str) -> bool {
        self.in_flight.lock().contains_key(url)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Returns the cached path for `url`, downloading it first if needed.
    /// Concurrent callers for the same URL share one transfer and one result.
    pub async fn fetch(&self, url: &str) -> Result<PathBuf, DownloadError> {
        match self.cache.lookup_or_fetch(url).await {
            Ok(path) => return Ok(path),
            Err(CacheError::Uncacheable { .. }) => {
                return Err(DownloadError::Store {
                    url: url.to_owned(),
                    reason: "url is not cacheable".to_owned(),
                });
            }
            Err(err) if err.is_miss() => {}
            Err(err) => warn!(url, error = %err, "Cache lookup failed, downloading anyway"),
        }
        if !self.cache.is_enabled() {
            return Err(DownloadError::Store {
                url: url.to_owned(),
                reason: "cache disabled".to_owned(),
            });
        }

        let download = {
            let mut in_flight = self.in_flight.lock();
            if let Some(existing) = in_flight.get(url) {
                debug!(url, "Joining in-flight download");
                existing.clone()
            } else if let Some(path) = self.cache.lookup_memory(url) {
                // Finished between our disk check and taking the lock.
                return Ok(path);
            } else {
                let task = tokio::spawn(download_and_store(
                    Arc::clone(&self.cache),
                    Arc::clone(&self.fetcher),
                    Arc::clone(&self.in_flight),
                    url.to_owned(),
                ));
                let entries = Arc::clone(&self.in_flight);
                let key = url.to_owned();
                let shared = async move {
                    match task.await {
                        Ok(result) => result,
                        Err(err) => {
                            // The task never reached its own cleanup.
                            entries.lock().remove(&key);
                            warn!(url = %key, error = %err, "Download task aborted");
                            Err(DownloadError::Cancelled)
                        }
                    }
                }
                .boxed()
                .shared();
                in_flight.insert(url.to_owned(), shared.clone());
                shared
            }
        };

        download.await
    }
}

async fn download_and_store(
    cache: Arc<CacheStore>,
    fetcher: Arc<dyn MediaFetcher>,
    in_flight: InFlight,
    url: String,
) -> Result<PathBuf, DownloadError> {
    debug!(url = %url, "Download started");
    let result = match fetcher.fetch(&url).await {
        Ok(body) => cache.store(&url, body).await.map_err(|err| match err {
            CacheError::Stream { source, .. } => source,
            other => DownloadError::Store {
                url: url.clone(),
                reason: other.to_string(),
            },
        }),
        Err(err) => Err(err),
    };
    in_flight.lock().remove(&url);

    match &result {
        Ok(path) => debug!(url = %url, path = %path.display(), "Download cached"),
        Err(err) => warn!(url = %url, error = %err, "Download failed"),
    }
    result
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::download::ByteStream;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::future::join_all;
    use futures_util::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Serves `url`-derived bytes after a delay and counts transfers.
    pub(crate) struct CountingFetcher {
        pub calls: AtomicUsize,
        pub delay: Duration,
        pub order: Mutex<Vec<String>>,
        pub fail: Mutex<Vec<String>>,
    }

    impl CountingFetcher {
        pub(crate) fn new(delay: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay,
                order: Mutex::new(Vec::new()),
                fail: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl MediaFetcher for CountingFetcher {
        async fn fetch(&self, url: &str) -> Result<ByteStream, DownloadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.order.lock().push(url.to_owned());
            tokio::time::sleep(self.delay).await;
            if self.fail.lock().iter().any(|u| u == url) {
                return Err(DownloadError::network(url, "connection reset"));
            }
            let body = Bytes::from(format!("bytes of {url}"));
            Ok(tokio_stream::iter(vec![Ok(body)]).boxed())
        }
    }

    /// Panics on its first transfer, then behaves.
    struct FlakyFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MediaFetcher for FlakyFetcher {
        async fn fetch(&self, url: &str) -> Result<ByteStream, DownloadError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("decoder blew up on {url}");
            }
            Ok(tokio_stream::iter(vec![Ok(Bytes::from_static(b"ok"))]).boxed())
        }
    }

    async fn coordinator(
        dir: &std::path::Path,
        fetcher: Arc<dyn MediaFetcher>,
    ) -> DownloadCoordinator {
        let config = CacheConfig {
            cache_dir: dir.to_path_buf(),
            ..CacheConfig::default()
        };
        let cache = Arc::new(CacheStore::open(&config).await.unwrap());
        DownloadCoordinator::new(cache, fetcher)
    }

    #[tokio::test]
    async fn concurrent_requests_share_one_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(CountingFetcher::new(Duration::from_millis(50)));
        let coordinator = coordinator(dir.path(), Arc::clone(&fetcher) as Arc<dyn MediaFetcher>).await;
        let url = "http://cdn.example/v/1.mp4";

        let results = join_all((0..8).map(|_| coordinator.fetch(url))).await;

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        let first = results[0].as_ref().unwrap();
        assert!(results.iter().all(|r| r.as_ref().unwrap() == first));
        assert_eq!(
            tokio::fs::read(first).await.unwrap(),
            format!("bytes of {url}").into_bytes()
        );
        assert!(!coordinator.is_in_flight(url));
    }

    #[tokio::test]
    async fn cached_urls_skip_the_network() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(CountingFetcher::new(Duration::ZERO));
        let coordinator = coordinator(dir.path(), Arc::clone(&fetcher) as Arc<dyn MediaFetcher>).await;
        let url = "http://cdn.example/v/1.mp4";

        coordinator.fetch(url).await.unwrap();
        coordinator.fetch(url).await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_reach_every_waiter_and_are_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(CountingFetcher::new(Duration::from_millis(20)));
        let url = "http://cdn.example/v/broken.mp4";
        fetcher.fail.lock().push(url.to_owned());
        let coordinator = coordinator(dir.path(), Arc::clone(&fetcher) as Arc<dyn MediaFetcher>).await;

        let results = join_all((0..3).map(|_| coordinator.fetch(url))).await;
        assert!(results
            .iter()
            .all(|r| matches!(r, Err(DownloadError::Network { .. }))));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        fetcher.fail.lock().clear();
        coordinator.fetch(url).await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn playlists_are_rejected_without_a_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(CountingFetcher::new(Duration::ZERO));
        let coordinator = coordinator(dir.path(), Arc::clone(&fetcher) as Arc<dyn MediaFetcher>).await;

        let err = coordinator
            .fetch("http://cdn.example/live/index.m3u8")
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Store { .. }));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn a_panicked_transfer_does_not_wedge_the_url() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(FlakyFetcher {
            calls: AtomicUsize::new(0),
        });
        let shared: Arc<dyn MediaFetcher> = fetcher.clone();
        let coordinator = coordinator(dir.path(), shared).await;
        let url = "http://cdn.example/v/flaky.mp4";

        let err = coordinator.fetch(url).await.unwrap_err();
        assert_eq!(err, DownloadError::Cancelled);
        assert!(!coordinator.is_in_flight(url));
        assert_eq!(coordinator.in_flight_count(), 0);

        let path = coordinator.fetch(url).await.unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"ok");
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }
}

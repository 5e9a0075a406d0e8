use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::PrefetchItem;
use crate::cache::is_cacheable;
use crate::config::PrefetchConfig;
use crate::download::DownloadCoordinator;

#[derive(Default)]
struct QueueState {
    /// Sorted by priority, ascending; ties keep arrival order.
    queue: Vec<PrefetchItem>,
    in_flight: HashSet<String>,
    draining: bool,
}

/// Bounded priority queue of background downloads, drained in batches of
/// `max_parallel` by a single supervisor task.
///
/// Failures are logged and dropped: retrying is the foreground player's job.
pub struct PrefetchScheduler {
    coordinator: Arc<DownloadCoordinator>,
    config: PrefetchConfig,
    state: Mutex<QueueState>,
    idle: Notify,
    token: CancellationToken,
}

impl PrefetchScheduler {
    pub fn new(
        coordinator: Arc<DownloadCoordinator>,
        config: PrefetchConfig,
        token: CancellationToken,
    ) -> Self {
        Self {
            coordinator,
            config,
            state: Mutex::new(QueueState::default()),
            idle: Notify::new(),
            token,
        }
    }

    /// Queues every item that is not already queued, in flight or cached.
    /// An already-queued URL takes the more urgent of its two priorities.
    /// Returns how many items were newly accepted.
    pub fn enqueue_many(self: &Arc<Self>, items: impl IntoIterator<Item = PrefetchItem>) -> usize {
        if !self.config.enabled || self.token.is_cancelled() {
            return 0;
        }

        let mut accepted = 0;
        {
            let mut state = self.state.lock();
            for item in items {
                if !is_cacheable(&item.url) || state.in_flight.contains(&item.url) {
                    continue;
                }
                if let Some(existing) = state.queue.iter_mut().find(|q| q.url == item.url) {
                    existing.priority = existing.priority.min(item.priority);
                    continue;
                }
                if self.coordinator.cache().lookup_memory(&item.url).is_some() {
                    trace!(url = %item.url, "Already cached, not queueing");
                    continue;
                }
                if state.queue.len() >= self.config.max_queue {
                    debug!(url = %item.url, max = self.config.max_queue, "Prefetch queue full, dropping");
                    continue;
                }
                state.queue.push(item);
                accepted += 1;
            }
            state.queue.sort_by_key(|item| item.priority);
        }

        self.start_drain();
        accepted
    }

    pub fn enqueue_one(self: &Arc<Self>, url: impl Into<String>, priority: u8) -> bool {
        self.enqueue_many([PrefetchItem::new(url, priority)]) == 1
    }

    /// Makes a queued item more urgent. Returns false when the item is not
    /// queued or already at least as urgent.
    pub fn bump_priority(&self, url: &str, new_priority: u8) -> bool {
        let mut state = self.state.lock();
        let Some(item) = state.queue.iter_mut().find(|item| item.url == url) else {
            return false;
        };
        if new_priority >= item.priority {
            return false;
        }
        item.priority = new_priority;
        state.queue.sort_by_key(|item| item.priority);
        true
    }

    /// Snapshot of the pending queue in drain order.
    pub fn queued(&self) -> Vec<PrefetchItem> {
        self.state.lock().queue.clone()
    }

    pub fn is_in_flight(&self, url: &str) -> bool {
        self.state.lock().in_flight.contains(url)
    }

    pub fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.queue.is_empty() && state.in_flight.is_empty() && !state.draining
    }

    /// Resolves once the queue is empty and no batch is running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Stops taking new batches and forgets the pending queue. A batch that is
    /// already running finishes.
    pub fn shutdown(&self) {
        self.token.cancel();
        let dropped = {
            let mut state = self.state.lock();
            std::mem::take(&mut state.queue).len()
        };
        if dropped > 0 {
            info!(dropped, "Prefetch scheduler stopped");
        }
    }

    fn start_drain(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            if state.draining || state.queue.is_empty() {
                return;
            }
            state.draining = true;
        }
        tokio::spawn(Arc::clone(self).drain());
    }

    async fn drain(self: Arc<Self>) {
        let width = self.config.max_parallel.max(1);

        loop {
            let batch: Vec<PrefetchItem> = {
                let mut state = self.state.lock();
                if self.token.is_cancelled() || state.queue.is_empty() {
                    state.draining = false;
                    break;
                }
                let take = width.min(state.queue.len());
                let batch: Vec<PrefetchItem> = state.queue.drain(..take).collect();
                for item in &batch {
                    state.in_flight.insert(item.url.clone());
                }
                batch
            };

            trace!(size = batch.len(), "Draining prefetch batch");
            let results = join_all(batch.iter().map(|item| self.coordinator.fetch(&item.url))).await;

            let mut state = self.state.lock();
            for (item, result) in batch.iter().zip(results) {
                state.in_flight.remove(&item.url);
                match result {
                    Ok(_) => debug!(url = %item.url, priority = item.priority, "Prefetched"),
                    Err(err) => warn!(url = %item.url, error = %err, "Prefetch failed"),
                }
            }
        }

        self.idle.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStore;
    use crate::config::CacheConfig;
    use crate::download::CountingFetcher;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    async fn scheduler(
        dir: &std::path::Path,
        fetcher: Arc<CountingFetcher>,
        config: PrefetchConfig,
    ) -> Arc<PrefetchScheduler> {
        let cache_config = CacheConfig {
            cache_dir: dir.to_path_buf(),
            ..CacheConfig::default()
        };
        let cache = Arc::new(CacheStore::open(&cache_config).await.unwrap());
        let coordinator = Arc::new(DownloadCoordinator::new(cache, fetcher));
        Arc::new(PrefetchScheduler::new(
            coordinator,
            config,
            CancellationToken::new(),
        ))
    }

    fn serial() -> PrefetchConfig {
        PrefetchConfig {
            max_parallel: 1,
            ..PrefetchConfig::default()
        }
    }

    #[tokio::test]
    async fn drains_in_priority_order() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(CountingFetcher::new(Duration::from_millis(1)));
        let scheduler = scheduler(dir.path(), Arc::clone(&fetcher), serial()).await;

        scheduler.enqueue_many([
            PrefetchItem::new("http://cdn/p5.mp4", 5),
            PrefetchItem::new("http://cdn/p0.mp4", 0),
            PrefetchItem::new("http://cdn/p2.mp4", 2),
            PrefetchItem::new("http://cdn/p1.mp4", 1),
        ]);
        scheduler.wait_idle().await;

        assert_eq!(
            *fetcher.order.lock(),
            vec![
                "http://cdn/p0.mp4",
                "http://cdn/p1.mp4",
                "http://cdn/p2.mp4",
                "http://cdn/p5.mp4",
            ]
        );
    }

    #[tokio::test]
    async fn duplicate_requests_keep_the_more_urgent_priority() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(CountingFetcher::new(Duration::from_millis(1)));
        let scheduler = scheduler(dir.path(), Arc::clone(&fetcher), serial()).await;

        // The drain task has not run yet on this single-threaded runtime.
        assert_eq!(
            scheduler.enqueue_many([
                PrefetchItem::new("http://cdn/a.mp4", 4),
                PrefetchItem::new("http://cdn/b.mp4", 3),
                PrefetchItem::new("http://cdn/a.mp4", 1),
                PrefetchItem::new("http://cdn/b.mp4", 9),
            ]),
            2
        );
        assert_eq!(
            scheduler.queued(),
            vec![
                PrefetchItem::new("http://cdn/a.mp4", 1),
                PrefetchItem::new("http://cdn/b.mp4", 3),
            ]
        );

        scheduler.wait_idle().await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn bump_only_moves_items_forward() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(CountingFetcher::new(Duration::from_millis(1)));
        let scheduler = scheduler(dir.path(), Arc::clone(&fetcher), serial()).await;

        scheduler.enqueue_many([
            PrefetchItem::new("http://cdn/a.mp4", 2),
            PrefetchItem::new("http://cdn/b.mp4", 6),
        ]);
        assert!(!scheduler.bump_priority("http://cdn/a.mp4", 5));
        assert!(!scheduler.bump_priority("http://cdn/missing.mp4", 0));
        assert!(scheduler.bump_priority("http://cdn/b.mp4", 0));
        assert_eq!(scheduler.queued()[0].url, "http://cdn/b.mp4");

        scheduler.wait_idle().await;
        assert_eq!(fetcher.order.lock()[0], "http://cdn/b.mp4");
    }

    #[tokio::test]
    async fn queue_is_capped() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(CountingFetcher::new(Duration::from_millis(1)));
        let config = PrefetchConfig {
            max_queue: 3,
            max_parallel: 1,
            enabled: true,
        };
        let scheduler = scheduler(dir.path(), Arc::clone(&fetcher), config).await;

        let accepted =
            scheduler.enqueue_many((0..10).map(|i| PrefetchItem::new(format!("http://cdn/{i}.mp4"), i)));
        assert_eq!(accepted, 3);
        scheduler.wait_idle().await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn failures_do_not_stop_the_drain() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(CountingFetcher::new(Duration::from_millis(1)));
        fetcher.fail.lock().push("http://cdn/bad.mp4".to_owned());
        let scheduler = scheduler(dir.path(), Arc::clone(&fetcher), PrefetchConfig::default()).await;

        scheduler.enqueue_many([
            PrefetchItem::new("http://cdn/bad.mp4", 0),
            PrefetchItem::new("http://cdn/good.mp4", 1),
        ]);
        scheduler.wait_idle().await;

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        assert!(scheduler
            .coordinator
            .cache()
            .lookup_memory("http://cdn/good.mp4")
            .is_some());
        // Not retried by the scheduler.
        assert!(scheduler.queued().is_empty());
    }

    #[tokio::test]
    async fn enqueue_during_drain_joins_the_running_loop() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(CountingFetcher::new(Duration::from_millis(20)));
        let scheduler = scheduler(dir.path(), Arc::clone(&fetcher), serial()).await;

        scheduler.enqueue_one("http://cdn/first.mp4", 3);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(scheduler.is_in_flight("http://cdn/first.mp4"));

        // In flight: ignored. New: queued behind the running batch.
        assert!(!scheduler.enqueue_one("http://cdn/first.mp4", 0));
        assert!(scheduler.enqueue_one("http://cdn/second.mp4", 0));
        scheduler.wait_idle().await;

        assert_eq!(
            *fetcher.order.lock(),
            vec!["http://cdn/first.mp4", "http://cdn/second.mp4"]
        );
    }

    #[tokio::test]
    async fn cached_and_disabled_requests_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(CountingFetcher::new(Duration::ZERO));
        let scheduler = scheduler(dir.path(), Arc::clone(&fetcher), serial()).await;

        scheduler.enqueue_one("http://cdn/a.mp4", 0);
        scheduler.wait_idle().await;
        assert!(!scheduler.enqueue_one("http://cdn/a.mp4", 0));
        assert!(!scheduler.enqueue_one("http://cdn/live.m3u8", 0));

        scheduler.shutdown();
        assert!(!scheduler.enqueue_one("http://cdn/b.mp4", 0));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }
}

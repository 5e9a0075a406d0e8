use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cache::{CacheStats, CacheStore};
use crate::config::EngineConfig;
use crate::download::{DownloadCoordinator, HttpFetcher, MediaFetcher};
use crate::error::EngineError;
use crate::playback::{FeedListener, PlayerBackend, PoolManager};
use crate::prefetch::{PrefetchItem, PrefetchScheduler};

/// Composition root. Owns the process's single [`CacheStore`] and hands it,
/// by `Arc`, to the download, prefetch and playback layers.
pub struct FeedEngine {
    config: EngineConfig,
    cache: Arc<CacheStore>,
    coordinator: Arc<DownloadCoordinator>,
    prefetch: Arc<PrefetchScheduler>,
    token: CancellationToken,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl FeedEngine {
    /// Opens the cache directory and starts background maintenance, using
    /// the built-in HTTP client for downloads.
    pub async fn start(config: EngineConfig) -> Result<Self, EngineError> {
        let fetcher = Arc::new(HttpFetcher::new(config.download.clone()));
        Self::with_fetcher(config, fetcher).await
    }

    pub async fn with_fetcher(
        config: EngineConfig,
        fetcher: Arc<dyn MediaFetcher>,
    ) -> Result<Self, EngineError> {
        let cache = Arc::new(CacheStore::open(&config.cache).await?);
        let token = CancellationToken::new();
        let maintenance = cache.spawn_maintenance(token.child_token());

        let coordinator = Arc::new(DownloadCoordinator::new(Arc::clone(&cache), fetcher));
        let prefetch = Arc::new(PrefetchScheduler::new(
            Arc::clone(&coordinator),
            config.prefetch.clone(),
            token.child_token(),
        ));

        info!(
            dir = %config.cache.cache_dir.display(),
            cache_enabled = config.cache.enabled,
            max_mb = config.cache.max_disk_bytes / 1024 / 1024,
            pool_size = config.playback.pool_size,
            "Feed engine started"
        );

        Ok(Self {
            config,
            cache,
            coordinator,
            prefetch,
            token,
            maintenance: Mutex::new(Some(maintenance)),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn coordinator(&self) -> &Arc<DownloadCoordinator> {
        &self.coordinator
    }

    pub fn prefetch(&self) -> &Arc<PrefetchScheduler> {
        &self.prefetch
    }

    /// Memory tier only; never waits on the disk.
    pub fn get_cached_path_sync(&self, url: &str) -> Option<PathBuf> {
        self.cache.lookup_memory(url)
    }

    pub fn queue_prefetch(&self, items: impl IntoIterator<Item = PrefetchItem>) -> usize {
        self.prefetch.enqueue_many(items)
    }

    /// Cached path for `url`, downloading it in the foreground if needed.
    pub async fn fetch(&self, url: &str) -> Result<PathBuf, EngineError> {
        Ok(self.coordinator.fetch(url).await?)
    }

    /// A player pool sized and configured from this engine's settings.
    pub fn pool<P: PlayerBackend, L: FeedListener>(&self, player: P, listener: L) -> PoolManager<P, L> {
        PoolManager::new(
            Arc::clone(&self.cache),
            Arc::clone(&self.prefetch),
            &self.config.playback,
            player,
            listener,
        )
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Stops prefetching and cache maintenance. Downloads already running
    /// finish in the background.
    pub async fn shutdown(&self) {
        self.prefetch.shutdown();
        self.token.cancel();
        let maintenance = self.maintenance.lock().take();
        if let Some(handle) = maintenance {
            let _ = handle.await;
        }
        info!("Feed engine stopped");
    }
}

impl Drop for FeedEngine {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

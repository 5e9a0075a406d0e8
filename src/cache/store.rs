use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::Stream;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{is_cacheable, CacheEntry, DiskCache, DiskFile, MemoryCache};
use crate::config::CacheConfig;
use crate::error::{CacheError, DownloadError};

/// Temp files younger than this may still be in the middle of a write.
const STALE_TEMP_AGE: Duration = Duration::from_secs(10 * 60);

type ActiveSet = Arc<Mutex<HashMap<PathBuf, usize>>>;

/// Outcome of one eviction pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EvictionReport {
    pub scanned: usize,
    pub removed: usize,
    pub freed_bytes: u64,
    pub skipped_pinned: usize,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub memory_entries: usize,
    pub tracked_bytes: u64,
    pub max_disk_bytes: u64,
    pub pinned_paths: usize,
}

/// Keeps a cached file out of eviction while a player is reading it.
#[derive(Debug)]
pub struct PathPin {
    active: ActiveSet,
    path: PathBuf,
}

impl PathPin {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PathPin {
    fn drop(&mut self) {
        let mut active = self.active.lock();
        if let Some(count) = active.get_mut(&self.path) {
            *count -= 1;
            if *count == 0 {
                active.remove(&self.path);
            }
        }
    }
}

/// Two-tier media cache: a small in-memory URL index in front of a
/// size-capped directory of hashed files.
///
/// One instance per process, created by the composition root and shared by
/// `Arc` with the download, prefetch and playback layers.
pub struct CacheStore {
    memory: Mutex<MemoryCache>,
    disk: DiskCache,
    index: Mutex<HashMap<PathBuf, CacheEntry>>,
    active: ActiveSet,
    max_disk_bytes: u64,
    tracked_bytes: AtomicU64,
    over_cap: Notify,
    eviction_delay: Duration,
    enabled: bool,
}

impl CacheStore {
    pub async fn open(config: &CacheConfig) -> Result<Self, CacheError> {
        let disk = DiskCache::open(&config.cache_dir, &config.fallback_extension)
            .await
            .map_err(|err| CacheError::io(&config.cache_dir, err))?;
        info!(
            dir = %config.cache_dir.display(),
            max_bytes = config.max_disk_bytes,
            enabled = config.enabled,
            "Video cache opened"
        );
        Ok(Self {
            memory: Mutex::new(MemoryCache::new(config.memory_entries, config.memory_ttl)),
            disk,
            index: Mutex::new(HashMap::new()),
            active: Arc::new(Mutex::new(HashMap::new())),
            max_disk_bytes: config.max_disk_bytes,
            tracked_bytes: AtomicU64::new(0),
            over_cap: Notify::new(),
            eviction_delay: config.eviction_delay,
            enabled: config.enabled,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Where `url` would be stored. Does not touch the disk.
    pub fn path_for(&self, url: &str) -> PathBuf {
        self.disk.get_cache_path(url)
    }

    /// Memory tier only: no I/O, safe on the scroll path.
    pub fn lookup_memory(&self, url: &str) -> Option<PathBuf> {
        if !self.enabled {
            return None;
        }
        let path = self.memory.lock().get(url)?;
        self.touch(url, &path, None);
        Some(path)
    }

    /// Memory tier, then a stat of the hashed path. A miss is reported as
    /// `CacheError::NotCached`; nothing is downloaded here.
    pub async fn lookup_or_fetch(&self, url: &str) -> Result<PathBuf, CacheError> {
        if !self.enabled {
            return Err(CacheError::not_cached(url));
        }
        if !is_cacheable(url) {
            return Err(CacheError::Uncacheable {
                url: url.to_owned(),
            });
        }
        if let Some(path) = self.lookup_memory(url) {
            return Ok(path);
        }

        let path = self.disk.get_cache_path(url);
        match self.disk.stat(&path).await {
            Ok(Some(size)) => {
                self.memory.lock().insert(url, path.clone());
                self.touch(url, &path, Some(size));
                debug!(url, "Disk cache hit");
                Ok(path)
            }
            Ok(None) => Err(CacheError::not_cached(url)),
            Err(err) => {
                warn!(url, error = %err, "Cache stat failed");
                Err(CacheError::io(path, err))
            }
        }
    }

    /// Writes a downloaded stream into the cache and indexes it in both tiers.
    pub async fn store<S>(&self, url: &str, data: S) -> Result<PathBuf, CacheError>
    where
        S: Stream<Item = Result<Bytes, DownloadError>> + Send,
    {
        if !self.enabled || !is_cacheable(url) {
            return Err(CacheError::Uncacheable {
                url: url.to_owned(),
            });
        }

        let path = self.disk.get_cache_path(url);
        let size = match self.disk.save(url, &path, data).await {
            Ok(size) => size,
            Err(err) => {
                warn!(url, error = %err, "Failed to save to disk cache");
                return Err(err);
            }
        };

        let previous = self.index.lock().insert(
            path.clone(),
            CacheEntry {
                key: url.to_owned(),
                local_path: path.clone(),
                size_bytes: size,
                last_accessed_at: Utc::now(),
            },
        );
        if let Some(previous) = previous {
            self.sub_tracked(previous.size_bytes);
        }
        let total = self.tracked_bytes.fetch_add(size, Ordering::Relaxed) + size;
        self.memory.lock().insert(url, path.clone());

        debug!(url, bytes = size, total, "Stored in cache");
        if total > self.max_disk_bytes {
            self.over_cap.notify_one();
        }
        Ok(path)
    }

    /// Drops `url` from both tiers and deletes its file. Used when a cached
    /// file turned out to be undecodable.
    pub async fn invalidate(&self, url: &str) -> bool {
        self.memory.lock().remove(url);
        let path = self.disk.get_cache_path(url);
        if let Some(entry) = self.index.lock().remove(&path) {
            self.sub_tracked(entry.size_bytes);
        }
        self.memory.lock().remove_path(&path);

        match self.disk.remove(&path).await {
            Ok(removed) => {
                if removed {
                    info!(url, "Invalidated cache entry");
                }
                removed
            }
            Err(err) => {
                warn!(url, error = %err, "Failed to delete invalidated cache entry");
                false
            }
        }
    }

    pub fn pin(&self, path: &Path) -> PathPin {
        *self.active.lock().entry(path.to_path_buf()).or_insert(0) += 1;
        PathPin {
            active: Arc::clone(&self.active),
            path: path.to_path_buf(),
        }
    }

    pub fn is_pinned(&self, path: &Path) -> bool {
        self.active.lock().contains_key(path)
    }

    /// Deletes least-recently-accessed files until the directory fits the cap.
    /// Pinned files are never deleted; per-file failures are logged and skipped.
    pub async fn evict_to_cap(&self) -> EvictionReport {
        let tracked_at_scan = self.tracked_bytes.load(Ordering::Relaxed);
        let scan = match self.disk.scan().await {
            Ok(scan) => scan,
            Err(err) => {
                error!(dir = %self.disk.dir().display(), error = %err, "Cache scan failed");
                return EvictionReport::default();
            }
        };

        self.sweep_temp_files(&scan.temp_files).await;

        let candidates = self.rank(scan.files);
        let report = self.prune(candidates).await;
        self.reconcile_tracked(tracked_at_scan, report.total_bytes);
        report
    }

    /// Pairs each file with its effective access time, the later of the
    /// index's record and the on-disk modification time.
    fn rank(&self, files: Vec<DiskFile>) -> Vec<(DateTime<Utc>, DiskFile)> {
        let index = self.index.lock();
        files
            .into_iter()
            .map(|file| {
                let on_disk = DateTime::<Utc>::from(file.modified);
                let accessed = index
                    .get(&file.path)
                    .map_or(on_disk, |entry| entry.last_accessed_at.max(on_disk));
                (accessed, file)
            })
            .collect()
    }

    async fn prune(&self, mut candidates: Vec<(DateTime<Utc>, DiskFile)>) -> EvictionReport {
        let mut report = EvictionReport {
            scanned: candidates.len(),
            total_bytes: candidates.iter().map(|(_, file)| file.size).sum(),
            ..EvictionReport::default()
        };
        if report.total_bytes <= self.max_disk_bytes {
            return report;
        }

        info!(
            total_mb = report.total_bytes / 1024 / 1024,
            max_mb = self.max_disk_bytes / 1024 / 1024,
            "Pruning video cache"
        );
        candidates.sort_by_key(|(accessed, _)| *accessed);

        for (_, file) in &candidates {
            if report.total_bytes <= self.max_disk_bytes {
                break;
            }
            if self.is_pinned(&file.path) {
                report.skipped_pinned += 1;
                continue;
            }
            match self.disk.remove(&file.path).await {
                Ok(_) => {
                    report.total_bytes -= file.size;
                    report.freed_bytes += file.size;
                    report.removed += 1;
                    self.index.lock().remove(&file.path);
                    self.memory.lock().remove_path(&file.path);
                }
                Err(err) => {
                    warn!(path = %file.path.display(), error = %err, "Failed to evict cache file");
                }
            }
        }
        info!(
            removed = report.removed,
            freed_mb = report.freed_bytes / 1024 / 1024,
            "Pruned video cache"
        );
        report
    }

    /// Resets the running total to what the pass left on disk, plus whatever
    /// was stored while the pass ran.
    fn reconcile_tracked(&self, tracked_at_scan: u64, on_disk: u64) {
        let _ = self
            .tracked_bytes
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(on_disk + current.saturating_sub(tracked_at_scan))
            });
    }

    /// Runs one eviction pass after the startup delay, then again whenever a
    /// store pushes the tracked size over the cap.
    pub fn spawn_maintenance(self: &Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(store.eviction_delay) => {}
            }
            store.evict_to_cap().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = store.over_cap.notified() => {
                        store.evict_to_cap().await;
                    }
                }
            }
            debug!("Cache maintenance stopped");
        })
    }

    /// Empties both tiers and recreates the directory.
    pub async fn clear(&self) -> Result<(), CacheError> {
        self.memory.lock().clear();
        self.index.lock().clear();
        self.tracked_bytes.store(0, Ordering::Relaxed);
        self.disk
            .clear()
            .await
            .map_err(|err| CacheError::io(self.disk.dir(), err))
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            memory_entries: self.memory.lock().len(),
            tracked_bytes: self.tracked_bytes.load(Ordering::Relaxed),
            max_disk_bytes: self.max_disk_bytes,
            pinned_paths: self.active.lock().len(),
        }
    }

    fn touch(&self, url: &str, path: &Path, size: Option<u64>) {
        let now = Utc::now();
        let mut index = self.index.lock();
        match index.get_mut(path) {
            Some(entry) => {
                entry.last_accessed_at = now;
                if let Some(size) = size {
                    entry.size_bytes = size;
                }
            }
            None => {
                index.insert(
                    path.to_path_buf(),
                    CacheEntry {
                        key: url.to_owned(),
                        local_path: path.to_path_buf(),
                        size_bytes: size.unwrap_or(0),
                        last_accessed_at: now,
                    },
                );
            }
        }
    }

    fn sub_tracked(&self, bytes: u64) {
        let _ = self
            .tracked_bytes
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(current.saturating_sub(bytes))
            });
    }

    async fn sweep_temp_files(&self, temp_files: &[PathBuf]) {
        for path in temp_files {
            let stale = match tokio::fs::metadata(path).await.and_then(|m| m.modified()) {
                Ok(modified) => SystemTime::now()
                    .duration_since(modified)
                    .is_ok_and(|age| age >= STALE_TEMP_AGE),
                Err(_) => false,
            };
            if !stale {
                continue;
            }
            match self.disk.remove(path).await {
                Ok(_) => debug!(path = %path.display(), "Removed stale temp file"),
                Err(err) => warn!(path = %path.display(), error = %err, "Failed to remove temp file"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::iter;

    fn body(bytes: &'static [u8]) -> impl Stream<Item = Result<Bytes, DownloadError>> + Send {
        iter(vec![Ok(Bytes::from_static(bytes))])
    }

    fn config(dir: &Path, max_disk_bytes: u64) -> CacheConfig {
        CacheConfig {
            cache_dir: dir.to_path_buf(),
            max_disk_bytes,
            ..CacheConfig::default()
        }
    }

    fn disk_total(dir: &Path) -> u64 {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|entry| entry.ok()?.metadata().ok())
            .filter(|meta| meta.is_file())
            .map(|meta| meta.len())
            .sum()
    }

    async fn set_mtime(path: &Path, secs_ago: u64) {
        let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(secs_ago))
            .unwrap();
    }

    #[tokio::test]
    async fn stored_bytes_are_returned_by_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(&config(dir.path(), 1 << 20)).await.unwrap();
        let url = "http://cdn.example/v/1.mp4";

        assert!(store.lookup_or_fetch(url).await.unwrap_err().is_miss());
        let stored = store.store(url, body(b"frames")).await.unwrap();

        let found = store.lookup_or_fetch(url).await.unwrap();
        assert_eq!(found, stored);
        assert_eq!(tokio::fs::read(&found).await.unwrap(), b"frames");
        assert_eq!(store.lookup_memory(url), Some(stored));
    }

    #[tokio::test]
    async fn lost_memory_index_is_rebuilt_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let url = "http://cdn.example/v/1.mp4";
        {
            let store = CacheStore::open(&config(dir.path(), 1 << 20)).await.unwrap();
            store.store(url, body(b"frames")).await.unwrap();
        }

        let reopened = CacheStore::open(&config(dir.path(), 1 << 20)).await.unwrap();
        assert_eq!(reopened.lookup_memory(url), None);
        let path = reopened.lookup_or_fetch(url).await.unwrap();
        assert_eq!(reopened.lookup_memory(url), Some(path));
    }

    #[tokio::test]
    async fn invalidate_removes_both_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(&config(dir.path(), 1 << 20)).await.unwrap();
        let url = "http://cdn.example/v/1.mp4";
        let path = store.store(url, body(b"frames")).await.unwrap();

        assert!(store.invalidate(url).await);
        assert_eq!(store.lookup_memory(url), None);
        assert!(store.lookup_or_fetch(url).await.unwrap_err().is_miss());
        assert!(!path.exists());
        assert!(!store.invalidate(url).await);
    }

    #[tokio::test]
    async fn disabled_cache_always_misses() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path(), 1 << 20);
        cfg.enabled = false;
        let store = CacheStore::open(&cfg).await.unwrap();
        let url = "http://cdn.example/v/1.mp4";

        assert!(store.store(url, body(b"frames")).await.is_err());
        assert!(store.lookup_or_fetch(url).await.unwrap_err().is_miss());
        assert_eq!(store.lookup_memory(url), None);
    }

    #[tokio::test]
    async fn playlists_are_never_stored() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(&config(dir.path(), 1 << 20)).await.unwrap();
        let err = store
            .store("http://cdn.example/live/index.m3u8", body(b"#EXTM3U"))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Uncacheable { .. }));
    }

    #[tokio::test]
    async fn eviction_removes_oldest_until_under_cap() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(&config(dir.path(), 10)).await.unwrap();

        let old = store.store("http://cdn/old.mp4", body(b"aaaaaa")).await.unwrap();
        let mid = store.store("http://cdn/mid.mp4", body(b"bbbbbb")).await.unwrap();
        let new = store.store("http://cdn/new.mp4", body(b"cccccc")).await.unwrap();
        // Forget access times so the file mtimes decide the order.
        store.index.lock().clear();
        set_mtime(&old, 300).await;
        set_mtime(&mid, 200).await;
        set_mtime(&new, 100).await;

        let report = store.evict_to_cap().await;
        assert_eq!(report.scanned, 3);
        assert_eq!(report.removed, 2);
        assert!(report.total_bytes <= 10);
        assert!(!old.exists());
        assert!(!mid.exists());
        assert!(new.exists());
        assert_eq!(store.lookup_memory("http://cdn/old.mp4"), None);
        assert_eq!(store.stats().tracked_bytes, 6);
    }

    #[tokio::test]
    async fn recent_reads_protect_entries_from_eviction() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(&config(dir.path(), 10)).await.unwrap();

        let a = store.store("http://cdn/a.mp4", body(b"aaaaaa")).await.unwrap();
        let b = store.store("http://cdn/b.mp4", body(b"bbbbbb")).await.unwrap();
        set_mtime(&a, 300).await;
        set_mtime(&b, 100).await;
        store.index.lock().clear();

        // Reading `a` makes it the most recently accessed entry.
        store.lookup_or_fetch("http://cdn/a.mp4").await.unwrap();

        store.evict_to_cap().await;
        assert!(a.exists());
        assert!(!b.exists());
    }

    #[tokio::test]
    async fn pinned_files_survive_eviction() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(&config(dir.path(), 1)).await.unwrap();
        let playing = store.store("http://cdn/a.mp4", body(b"aaaa")).await.unwrap();
        let idle = store.store("http://cdn/b.mp4", body(b"bbbb")).await.unwrap();
        set_mtime(&playing, 500).await;
        set_mtime(&idle, 100).await;

        let pin = store.pin(&playing);
        let report = store.evict_to_cap().await;
        assert!(playing.exists());
        assert!(!idle.exists());
        assert_eq!(report.skipped_pinned, 1);

        drop(pin);
        assert!(!store.is_pinned(&playing));
        store.evict_to_cap().await;
        assert!(!playing.exists());
    }

    #[tokio::test]
    async fn stale_temp_files_are_swept_fresh_ones_kept() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(&config(dir.path(), 1 << 20)).await.unwrap();
        let stale = dir.path().join("abc.mp4.1-0.part");
        let fresh = dir.path().join("def.mp4.1-1.part");
        tokio::fs::write(&stale, b"x").await.unwrap();
        tokio::fs::write(&fresh, b"y").await.unwrap();
        set_mtime(&stale, 3600).await;

        store.evict_to_cap().await;
        assert!(!stale.exists());
        assert!(fresh.exists());
    }

    #[tokio::test]
    async fn an_undeletable_entry_does_not_stop_the_pass() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(&config(dir.path(), 12)).await.unwrap();
        let stuck = store.store("http://cdn/stuck.mp4", body(b"ssssss")).await.unwrap();
        let a = store.store("http://cdn/a.mp4", body(b"aaaaaa")).await.unwrap();
        let b = store.store("http://cdn/b.mp4", body(b"bbbbbb")).await.unwrap();
        let c = store.store("http://cdn/c.mp4", body(b"cccccc")).await.unwrap();
        store.index.lock().clear();
        set_mtime(&stuck, 400).await;
        set_mtime(&a, 300).await;
        set_mtime(&b, 200).await;
        set_mtime(&c, 100).await;

        let candidates = store.rank(store.disk.scan().await.unwrap().files);
        // The oldest entry becomes a directory between the scan and the delete.
        tokio::fs::remove_file(&stuck).await.unwrap();
        tokio::fs::create_dir(&stuck).await.unwrap();

        let report = store.prune(candidates).await;
        assert_eq!(report.scanned, 4);
        assert_eq!(report.removed, 2);
        assert_eq!(report.freed_bytes, 12);
        assert_eq!(report.total_bytes, 12);
        assert!(stuck.is_dir());
        assert!(!a.exists());
        assert!(!b.exists());
        assert!(c.exists());

        // Later passes only look at regular files.
        let again = store.evict_to_cap().await;
        assert_eq!(again.scanned, 1);
        assert_eq!(again.removed, 0);
    }

    #[tokio::test]
    async fn a_pass_resyncs_the_total_with_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = CacheStore::open(&config(dir.path(), 1 << 20)).await.unwrap();
            store.store("http://cdn/a.mp4", body(b"aaaaaa")).await.unwrap();
            store.store("http://cdn/b.mp4", body(b"bbbbbb")).await.unwrap();
        }

        let reopened = CacheStore::open(&config(dir.path(), 1 << 20)).await.unwrap();
        assert_eq!(reopened.stats().tracked_bytes, 0);
        reopened.evict_to_cap().await;
        assert_eq!(reopened.stats().tracked_bytes, 12);
    }

    #[tokio::test]
    async fn stores_landing_during_a_pass_stay_tracked() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(&config(dir.path(), 1 << 20)).await.unwrap();
        store.store("http://cdn/a.mp4", body(b"aaaaaa")).await.unwrap();
        let at_scan = store.stats().tracked_bytes;

        // Lands after the scan read the directory.
        store.store("http://cdn/b.mp4", body(b"bbbbbb")).await.unwrap();
        store.reconcile_tracked(at_scan, 6);
        assert_eq!(store.stats().tracked_bytes, 12);

        store.reconcile_tracked(store.stats().tracked_bytes, 12);
        assert_eq!(store.stats().tracked_bytes, 12);
    }

    #[tokio::test]
    async fn maintenance_keeps_the_directory_under_its_cap() {
        let dir = tempfile::tempdir().unwrap();
        let quick = CacheConfig {
            eviction_delay: Duration::from_millis(10),
            ..config(dir.path(), 10)
        };
        let store = Arc::new(CacheStore::open(&quick).await.unwrap());
        let token = CancellationToken::new();
        let handle = store.spawn_maintenance(token.clone());

        for i in 0..5 {
            let url = format!("http://cdn/{i}.mp4");
            store.store(&url, body(b"vvvvvv")).await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let mut settled = false;
        for _ in 0..200 {
            if disk_total(dir.path()) <= 10 {
                settled = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(settled, "directory still holds {} bytes", disk_total(dir.path()));

        // Another store over the cap wakes the task without any delay.
        store.store("http://cdn/late.mp4", body(b"llllll")).await.unwrap();
        let mut settled = false;
        for _ in 0..200 {
            if disk_total(dir.path()) <= 10 {
                settled = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(settled);

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("maintenance task kept running after cancel")
            .unwrap();
    }

    #[tokio::test]
    async fn clear_empties_everything() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(&config(dir.path(), 1 << 20)).await.unwrap();
        let path = store.store("http://cdn/a.mp4", body(b"aaaa")).await.unwrap();

        store.clear().await.unwrap();
        assert!(!path.exists());
        assert!(dir.path().exists());
        assert_eq!(store.stats().memory_entries, 0);
        assert_eq!(store.stats().tracked_bytes, 0);
    }
}

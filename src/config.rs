use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

pub const DEFAULT_CACHE_DIR: &str = "video_cache";
pub const DEFAULT_MAX_DISK_BYTES: u64 = 500 * 1024 * 1024; // 500MB
pub const DEFAULT_MEMORY_ENTRIES: usize = 100;
pub const DEFAULT_MEMORY_TTL: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_EVICTION_DELAY: Duration = Duration::from_secs(10);
pub const DEFAULT_EXTENSION: &str = "mp4";

/// Disk and memory cache settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory holding the hashed media files.
    pub cache_dir: PathBuf,
    /// Upper bound for the total size of the disk tier.
    pub max_disk_bytes: u64,
    /// Number of URL -> path entries kept in the memory tier.
    pub memory_entries: usize,
    /// How long a memory entry is trusted before the disk is consulted again.
    pub memory_ttl: Duration,
    /// Delay before the first eviction pass after startup.
    pub eviction_delay: Duration,
    /// Extension used when the URL does not carry a sane one.
    pub fallback_extension: String,
    /// Kill switch: when false every lookup misses and nothing is stored.
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            max_disk_bytes: DEFAULT_MAX_DISK_BYTES,
            memory_entries: DEFAULT_MEMORY_ENTRIES,
            memory_ttl: DEFAULT_MEMORY_TTL,
            eviction_delay: DEFAULT_EVICTION_DELAY,
            fallback_extension: DEFAULT_EXTENSION.to_owned(),
            enabled: true,
        }
    }
}

/// HTTP transport settings.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Timeout for receiving the response head.
    pub request_timeout: Duration,
    /// Transport-level retries for timeouts, connection errors and 5xx.
    pub max_retries: u32,
    /// Base delay, doubled per attempt.
    pub retry_delay: Duration,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    pub max_redirects: usize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            max_retries: 2,
            retry_delay: Duration::from_millis(500),
            max_connections: 16,
            max_redirects: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PrefetchConfig {
    /// Insertions are dropped once the queue holds this many items.
    pub max_queue: usize,
    /// Downloads run concurrently per drain batch.
    pub max_parallel: usize,
    pub enabled: bool,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            max_queue: 20,
            max_parallel: 3,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Number of recycled player slots (current, next, previous).
    pub pool_size: usize,
    /// Counted failures before an item is dropped from the feed.
    pub max_retries: u8,
    /// Plays before the replay affordance replaces auto-looping.
    pub max_loops: u8,
    /// Width / height below which the video fills the screen.
    pub cover_aspect_threshold: f32,
    /// Delay before an automatic retry after a counted failure.
    pub retry_delay: Duration,
    pub auto_retry: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            pool_size: 3,
            max_retries: 3,
            max_loops: 2,
            cover_aspect_threshold: 0.8,
            retry_delay: Duration::from_millis(300),
            auto_retry: true,
        }
    }
}

/// All engine settings, assembled by the composition root.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub cache: CacheConfig,
    pub download: DownloadConfig,
    pub prefetch: PrefetchConfig,
    pub playback: PlaybackConfig,
}

impl EngineConfig {
    /// Defaults overridden by `FEED_CACHE_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(dir) = lookup("FEED_CACHE_DIR") {
            config.cache.cache_dir = PathBuf::from(dir);
        }
        if let Some(enabled) = parse_var::<bool>(&lookup, "FEED_CACHE_ENABLED") {
            config.cache.enabled = enabled;
        }
        if let Some(bytes) = parse_var(&lookup, "FEED_CACHE_MAX_BYTES") {
            config.cache.max_disk_bytes = bytes;
        }
        if let Some(entries) = parse_var(&lookup, "FEED_CACHE_MEMORY_ENTRIES") {
            config.cache.memory_entries = entries;
        }
        if let Some(workers) = parse_var(&lookup, "FEED_CACHE_PREFETCH_WORKERS") {
            config.prefetch.max_parallel = workers;
        }
        if let Some(queue) = parse_var(&lookup, "FEED_CACHE_PREFETCH_QUEUE") {
            config.prefetch.max_queue = queue;
        }
        if let Some(pool) = parse_var(&lookup, "FEED_CACHE_POOL_SIZE") {
            config.playback.pool_size = pool;
        }
        if let Some(retries) = parse_var(&lookup, "FEED_CACHE_MAX_RETRIES") {
            config.playback.max_retries = retries;
        }

        config
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparsable environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.cache.max_disk_bytes, 500 * 1024 * 1024);
        assert_eq!(config.cache.memory_entries, 100);
        assert_eq!(config.cache.memory_ttl, Duration::from_secs(3600));
        assert_eq!(config.cache.eviction_delay, Duration::from_secs(10));
        assert_eq!(config.prefetch.max_queue, 20);
        assert_eq!(config.prefetch.max_parallel, 3);
        assert_eq!(config.playback.pool_size, 3);
        assert_eq!(config.playback.max_retries, 3);
        assert_eq!(config.playback.max_loops, 2);
    }

    #[test]
    fn env_overrides_apply_and_bad_values_are_ignored() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("FEED_CACHE_DIR", "/var/cache/feed"),
            ("FEED_CACHE_MAX_BYTES", "1048576"),
            ("FEED_CACHE_POOL_SIZE", "five"),
            ("FEED_CACHE_ENABLED", "false"),
        ]);
        let config = EngineConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.cache.cache_dir, PathBuf::from("/var/cache/feed"));
        assert_eq!(config.cache.max_disk_bytes, 1_048_576);
        assert!(!config.cache.enabled);
        assert_eq!(config.playback.pool_size, 3);
    }
}

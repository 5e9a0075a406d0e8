mod disk_cache;
mod memory_cache;
mod store;

pub use disk_cache::*;
pub use memory_cache::*;
pub use store::*;

use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// A media file in the disk tier, as tracked by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Content URL, or the file name for entries found on disk from a previous run.
    pub key: String,
    pub local_path: PathBuf,
    pub size_bytes: u64,
    pub last_accessed_at: DateTime<Utc>,
}

/// HLS playlists stream directly; only progressive files are cached.
pub fn is_cacheable(url: &str) -> bool {
    if url.trim().is_empty() {
        return false;
    }
    let path = url.split(['?', '#']).next().unwrap_or_default();
    !path.to_ascii_lowercase().ends_with(".m3u8")
}

use lru::LruCache;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// A memory-tier record: where a URL's bytes live on disk, and until when we
/// trust that without stat-ing the file again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryCacheEntry {
    pub key: String,
    pub local_path: PathBuf,
    pub expires_at: Instant,
}

/// Bounded URL -> path index in front of the disk tier.
///
/// Reads use `peek`, so the eviction order stays the insertion order: when the
/// tier is full the oldest insert goes first, regardless of how hot it is.
pub struct MemoryCache {
    store: LruCache<String, MemoryCacheEntry>,
    max_age: Duration,
}

impl MemoryCache {
    pub fn new(capacity: usize, max_age: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            store: LruCache::new(capacity),
            max_age,
        }
    }

    pub fn get(&mut self, key: &str) -> Option<PathBuf> {
        let expired = match self.store.peek(key) {
            Some(entry) if Instant::now() < entry.expires_at => {
                return Some(entry.local_path.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.store.pop(key);
        }
        None
    }

    pub fn insert(&mut self, key: &str, local_path: PathBuf) {
        let entry = MemoryCacheEntry {
            key: key.to_owned(),
            local_path,
            expires_at: Instant::now() + self.max_age,
        };
        self.store.push(key.to_owned(), entry);
    }

    pub fn remove(&mut self, key: &str) -> Option<MemoryCacheEntry> {
        self.store.pop(key)
    }

    /// Drops every entry pointing at `path`; used after the file was deleted.
    pub fn remove_path(&mut self, path: &Path) {
        let keys: Vec<String> = self
            .store
            .iter()
            .filter(|(_, entry)| entry.local_path == path)
            .map(|(key, _)| key.clone())
            .collect();
        for key in keys {
            self.store.pop(&key);
        }
    }

    pub fn clear(&mut self) {
        self.store.clear();
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

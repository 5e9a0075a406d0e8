use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{CacheError, DownloadError};

const TEMP_SUFFIX: &str = ".part";
const MAX_EXTENSION_LEN: usize = 4;

/// A file found while scanning the cache directory.
#[derive(Debug, Clone)]
pub struct DiskFile {
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
}

/// Result of a directory scan. Temp files are reported separately so the
/// caller can sweep leftovers from interrupted writes.
#[derive(Debug, Default)]
pub struct DiskScan {
    pub files: Vec<DiskFile>,
    pub temp_files: Vec<PathBuf>,
}

/// Content-addressed media files under one directory.
pub struct DiskCache {
    cache_dir: PathBuf,
    fallback_extension: String,
    temp_counter: AtomicU64,
}

impl DiskCache {
    pub async fn open(cache_dir: impl Into<PathBuf>, fallback_extension: &str) -> io::Result<Self> {
        let cache_dir = cache_dir.into();
        fs::create_dir_all(&cache_dir).await?;
        Ok(Self {
            cache_dir,
            fallback_extension: fallback_extension.to_owned(),
            temp_counter: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Stable location for a URL: sha256 of the full URL plus the URL's own
    /// extension, so `a/video.mp4` and `b/video.mp4` never collide.
    pub fn get_cache_path(&self, url: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        let hash = hex::encode(hasher.finalize());
        let ext = url_extension(url)
            .filter(|ext| TEMP_SUFFIX.strip_prefix('.') != Some(ext.as_str()))
            .unwrap_or_else(|| self.fallback_extension.clone());
        self.cache_dir.join(format!("{hash}.{ext}"))
    }

    /// Size of a complete entry, or `None` when it is missing or empty.
    pub async fn stat(&self, path: &Path) -> io::Result<Option<u64>> {
        match fs::metadata(path).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(Some(meta.len())),
            Ok(_) => Ok(None),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Streams `data` into a temp file and renames it over `path`. A partially
    /// written file is never visible under its final name.
    pub async fn save<S>(&self, url: &str, path: &Path, data: S) -> Result<u64, CacheError>
    where
        S: Stream<Item = Result<Bytes, DownloadError>> + Send,
    {
        let temp_path = self.temp_path_for(path);
        match write_stream(url, &temp_path, data).await {
            Ok(0) => {
                remove_quietly(&temp_path).await;
                Err(CacheError::EmptyStream { url: url.to_owned() })
            }
            Ok(written) => match fs::rename(&temp_path, path).await {
                Ok(()) => Ok(written),
                Err(err) => {
                    remove_quietly(&temp_path).await;
                    Err(CacheError::io(path, err))
                }
            },
            Err(err) => {
                remove_quietly(&temp_path).await;
                Err(err)
            }
        }
    }

    pub async fn remove(&self, path: &Path) -> io::Result<bool> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Lists the directory. A failed stat on one file is logged and skipped.
    pub async fn scan(&self) -> io::Result<DiskScan> {
        let mut scan = DiskScan::default();
        let mut entries = fs::read_dir(&self.cache_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if is_temp_file(&path) {
                scan.temp_files.push(path);
                continue;
            }
            let meta = match entry.metadata().await {
                Ok(meta) => meta,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Skipping unreadable cache entry");
                    continue;
                }
            };
            if !meta.is_file() {
                continue;
            }
            let modified = meta
                .modified()
                .or_else(|_| meta.accessed())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            scan.files.push(DiskFile {
                path,
                size: meta.len(),
                modified,
            });
        }

        Ok(scan)
    }

    /// Removes and recreates the directory.
    pub async fn clear(&self) -> io::Result<()> {
        match fs::remove_dir_all(&self.cache_dir).await {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
        fs::create_dir_all(&self.cache_dir).await
    }

    fn temp_path_for(&self, path: &Path) -> PathBuf {
        let n = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        let mut name = path.as_os_str().to_owned();
        name.push(format!(".{}-{n}{TEMP_SUFFIX}", std::process::id()));
        PathBuf::from(name)
    }
}

async fn write_stream<S>(url: &str, temp_path: &Path, data: S) -> Result<u64, CacheError>
where
    S: Stream<Item = Result<Bytes, DownloadError>> + Send,
{
    let mut file = fs::File::create(temp_path)
        .await
        .map_err(|err| CacheError::io(temp_path, err))?;
    let mut written = 0u64;
    futures_util::pin_mut!(data);

    while let Some(chunk) = data.next().await {
        let chunk = chunk.map_err(|source| CacheError::Stream {
            url: url.to_owned(),
            source,
        })?;
        file.write_all(&chunk)
            .await
            .map_err(|err| CacheError::io(temp_path, err))?;
        written += chunk.len() as u64;
    }

    file.flush()
        .await
        .map_err(|err| CacheError::io(temp_path, err))?;
    file.sync_all()
        .await
        .map_err(|err| CacheError::io(temp_path, err))?;
    debug!(url, bytes = written, "Wrote cache temp file");
    Ok(written)
}

async fn remove_quietly(path: &Path) {
    if let Err(err) = fs::remove_file(path).await {
        if err.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %err, "Failed to remove temp file");
        }
    }
}

pub(crate) fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.ends_with(TEMP_SUFFIX))
}

/// Extension of the URL's last path segment, ignoring query and fragment.
/// Anything longer than four characters or not alphanumeric is treated as a
/// malformed URL and rejected.
pub fn url_extension(url: &str) -> Option<String> {
    let path = match url::Url::parse(url) {
        Ok(parsed) => parsed.path().to_owned(),
        Err(_) => url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_owned(),
    };
    let segment = path.rsplit('/').next()?;
    let (stem, ext) = segment.rsplit_once('.')?;
    if stem.is_empty()
        || ext.is_empty()
        || ext.len() > MAX_EXTENSION_LEN
        || !ext.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

use std::io;
use std::path::PathBuf;

use http::StatusCode;

/// Failures of the two-tier cache. None of these are fatal to playback: callers
/// fall back to streaming from the network.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("not cached: {url}")]
    NotCached { url: String },

    #[error("url is not cacheable: {url}")]
    Uncacheable { url: String },

    #[error("download for {url} produced no bytes")]
    EmptyStream { url: String },

    #[error("download stream for {url} failed: {source}")]
    Stream {
        url: String,
        #[source]
        source: DownloadError,
    },
}

impl CacheError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn not_cached(url: impl Into<String>) -> Self {
        Self::NotCached { url: url.into() }
    }

    /// A miss is the normal "go to the network" signal, not a failure.
    pub fn is_miss(&self) -> bool {
        matches!(self, Self::NotCached { .. } | Self::Uncacheable { .. })
    }
}

/// Network-side failures. Cloneable so a single outcome can be handed to every
/// waiter of a deduplicated download.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DownloadError {
    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("unsupported scheme `{scheme}` for {url}")]
    UnsupportedScheme { scheme: String, url: String },

    #[error("network error for {url}: {reason}")]
    Network { url: String, reason: String },

    #[error("request failed with HTTP {status} for {url}")]
    HttpStatus { status: StatusCode, url: String },

    #[error("request timed out for {url}")]
    Timeout { url: String },

    #[error("too many redirects for {url}")]
    TooManyRedirects { url: String },

    #[error("failed to store {url} in cache: {reason}")]
    Store { url: String, reason: String },

    #[error("download cancelled")]
    Cancelled,
}

impl DownloadError {
    pub fn network(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Network {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } => true,
            Self::HttpStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::InvalidUrl { .. }
            | Self::UnsupportedScheme { .. }
            | Self::TooManyRedirects { .. }
            | Self::Store { .. }
            | Self::Cancelled => false,
        }
    }
}

/// What the platform player reported when it gave up on a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerErrorKind {
    /// The bytes could not be decoded.
    Decode,
    /// The player could not read from its source.
    Network,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind:?} error: {message}")]
pub struct PlayerError {
    pub kind: PlayerErrorKind,
    pub message: String,
}

impl PlayerError {
    pub fn decode(message: impl Into<String>) -> Self {
        Self {
            kind: PlayerErrorKind::Decode,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self {
            kind: PlayerErrorKind::Network,
            message: message.into(),
        }
    }
}

/// Errors surfaced by the engine to the feed layer.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    CacheIo(#[from] CacheError),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error("cannot play {video_id}: {source}")]
    Decode {
        video_id: String,
        #[source]
        source: PlayerError,
    },

    #[error("no player slot available for feed index {feed_index} (pool size {pool_size})")]
    PoolExhausted { feed_index: usize, pool_size: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_retryable_client_errors_are_not() {
        let server = DownloadError::HttpStatus {
            status: StatusCode::BAD_GATEWAY,
            url: "http://cdn/a.mp4".into(),
        };
        let client = DownloadError::HttpStatus {
            status: StatusCode::NOT_FOUND,
            url: "http://cdn/a.mp4".into(),
        };
        assert!(server.is_retryable());
        assert!(!client.is_retryable());
        assert!(DownloadError::Timeout { url: "x".into() }.is_retryable());
        assert!(!DownloadError::Cancelled.is_retryable());
    }

    #[test]
    fn misses_are_not_failures() {
        assert!(CacheError::not_cached("http://cdn/a.mp4").is_miss());
        let io = CacheError::io("/tmp/x", io::Error::other("disk gone"));
        assert!(!io.is_miss());
    }
}

pub mod cache;
pub mod config;
pub mod download;
pub mod engine;
pub mod error;
pub mod feed;
pub mod playback;
pub mod prefetch;

pub use config::EngineConfig;
pub use engine::FeedEngine;
pub use error::{CacheError, DownloadError, EngineError, PlayerError, PlayerErrorKind};
pub use feed::{FeedItem, PostType};

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use video_feed_engine::feed::{playable_indices, FeedItem};
use video_feed_engine::prefetch::{prefetch_priority, PrefetchItem, ScrollDirection};
use video_feed_engine::{EngineConfig, FeedEngine};

/// Warms the cache for a list of feed URLs, as if the viewer were sitting on
/// the first one, then trims the directory to its cap.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let urls: Vec<String> = std::env::args().skip(1).collect();
    if urls.is_empty() {
        eprintln!("usage: video-feed-engine <video-url>...");
        std::process::exit(2);
    }

    let config = EngineConfig::from_env();
    let engine = FeedEngine::start(config).await?;

    let feed: Vec<FeedItem> = urls
        .iter()
        .enumerate()
        .map(|(i, url)| FeedItem::video(format!("cli-{i}"), url.as_str()))
        .collect();
    let playable = playable_indices(&feed);
    let items: Vec<PrefetchItem> = playable
        .iter()
        .map(|&index| PrefetchItem {
            url: feed[index].video_url.clone(),
            priority: if index == 0 {
                0
            } else {
                prefetch_priority(0, index, &playable, ScrollDirection::Forward)
            },
        })
        .collect();

    let accepted = engine.queue_prefetch(items);
    if accepted < urls.len() {
        warn!(
            accepted,
            requested = urls.len(),
            "Some URLs were skipped (playlists, duplicates, already cached or queue full)"
        );
    }
    engine.prefetch().wait_idle().await;

    let report = engine.cache().evict_to_cap().await;
    let stats = engine.stats();
    info!(
        cached = stats.memory_entries,
        total_mb = report.total_bytes / 1024 / 1024,
        max_mb = stats.max_disk_bytes / 1024 / 1024,
        evicted = report.removed,
        "Warm-up finished"
    );

    engine.shutdown().await;
    Ok(())
}

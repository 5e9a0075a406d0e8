/// Kind of post in the feed. Only single videos play inline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PostType {
    #[default]
    Video,
    Carousel,
}

/// One feed entry as supplied by the data layer. Read-only to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FeedItem {
    pub id: String,
    pub video_url: String,
    pub thumbnail_url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub post_type: PostType,
}

impl FeedItem {
    pub fn video(id: impl Into<String>, video_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            video_url: video_url.into(),
            ..Self::default()
        }
    }

    pub fn carousel(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            post_type: PostType::Carousel,
            ..Self::default()
        }
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn is_playable(&self) -> bool {
        self.post_type == PostType::Video && !self.video_url.trim().is_empty()
    }
}

/// Feed positions that hold an inline-playable video, ascending.
pub fn playable_indices(feed: &[FeedItem]) -> Vec<usize> {
    feed.iter()
        .enumerate()
        .filter(|(_, item)| item.is_playable())
        .map(|(index, _)| index)
        .collect()
}

// Prefetch planning: which feed items to download ahead of the viewer, and
// with what urgency, given the scroll direction and the network type.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use super::PrefetchItem;
use crate::cache::is_cacheable;
use crate::feed::FeedItem;

/// Index changes closer together than this count as a fast swipe.
const FAST_SWIPE_WINDOW: Duration = Duration::from_millis(350);

/// Connectivity as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkKind {
    Wifi,
    Cellular,
    None,
    #[default]
    Unknown,
}

impl NetworkKind {
    /// Items to download ahead in the scroll direction.
    pub fn lookahead(self) -> usize {
        match self {
            NetworkKind::Wifi => 3,
            NetworkKind::Unknown => 2,
            NetworkKind::Cellular => 1,
            NetworkKind::None => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScrollDirection {
    #[default]
    Forward,
    Backward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScrollStep {
    pub direction: ScrollDirection,
    pub fast: bool,
}

/// Remembers the last active index to derive direction and swipe speed.
#[derive(Debug, Default)]
pub struct ScrollTracker {
    last: Option<(usize, Instant)>,
}

impl ScrollTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, index: usize) -> ScrollStep {
        self.record_at(index, Instant::now())
    }

    pub fn record_at(&mut self, index: usize, now: Instant) -> ScrollStep {
        let step = match self.last {
            None => ScrollStep::default(),
            Some((last_index, last_at)) => ScrollStep {
                direction: if index >= last_index {
                    ScrollDirection::Forward
                } else {
                    ScrollDirection::Backward
                },
                fast: index.abs_diff(last_index) > 1
                    || now.saturating_duration_since(last_at) < FAST_SWIPE_WINDOW,
            },
        };
        self.last = Some((index, now));
        step
    }
}

/// Urgency for prefetching `candidate` while `active` is on screen; lower is
/// sooner. The nearest playable item in the scroll direction gets 0, the
/// nearest one behind gets 1, everything else `2 + distance`.
pub fn prefetch_priority(
    active: usize,
    candidate: usize,
    playable: &[usize],
    direction: ScrollDirection,
) -> u8 {
    let after = playable.iter().copied().find(|&idx| idx > active);
    let before = playable.iter().rev().copied().find(|&idx| idx < active);
    let (ahead, behind) = match direction {
        ScrollDirection::Forward => (after, before),
        ScrollDirection::Backward => (before, after),
    };

    if Some(candidate) == ahead {
        0
    } else if Some(candidate) == behind {
        1
    } else {
        let distance = u8::try_from(candidate.abs_diff(active)).unwrap_or(u8::MAX);
        distance.saturating_add(2)
    }
}

/// Items worth downloading after the viewer landed on `active`: `lookahead`
/// playable items in the scroll direction (one more on a fast swipe) plus the
/// immediate playable neighbours on both sides, most urgent first.
pub fn plan_prefetch(
    feed: &[FeedItem],
    playable: &[usize],
    active: usize,
    step: ScrollStep,
    network: NetworkKind,
) -> Vec<PrefetchItem> {
    let lookahead = network.lookahead();
    if lookahead == 0 {
        return Vec::new();
    }
    let count = lookahead + usize::from(step.fast);

    let mut picked: Vec<usize> = match step.direction {
        ScrollDirection::Forward => playable
            .iter()
            .copied()
            .filter(|&idx| idx > active)
            .take(count)
            .collect(),
        ScrollDirection::Backward => playable
            .iter()
            .rev()
            .copied()
            .filter(|&idx| idx < active)
            .take(count)
            .collect(),
    };
    picked.extend(playable.iter().copied().find(|&idx| idx > active));
    picked.extend(playable.iter().rev().copied().find(|&idx| idx < active));

    let mut seen = HashSet::new();
    let mut items: Vec<PrefetchItem> = picked
        .into_iter()
        .filter(|idx| seen.insert(*idx))
        .filter_map(|idx| {
            let url = &feed.get(idx)?.video_url;
            is_cacheable(url).then(|| PrefetchItem {
                url: url.clone(),
                priority: prefetch_priority(active, idx, playable, step.direction),
            })
        })
        .collect();
    items.sort_by_key(|item| item.priority);
    items
}

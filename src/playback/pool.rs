use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use super::recycler::compute_targets;
use super::session::{
    transition, Effect, FillMode, HostState, Phase, PlayerEvent, Session, SessionEvent,
    SessionPolicy, SourceState, ViewingMode,
};
use crate::cache::{is_cacheable, CacheStore, PathPin};
use crate::config::PlaybackConfig;
use crate::error::{DownloadError, EngineError, PlayerError, PlayerErrorKind};
use crate::feed::{playable_indices, FeedItem};
use crate::prefetch::{plan_prefetch, NetworkKind, PrefetchScheduler, ScrollStep, ScrollTracker};

/// The platform's player instances, addressed by slot. Every call for a slot
/// after `mount` refers to that mount until the next `mount` or `release`.
pub trait PlayerBackend: Send {
    /// Loads `source` into a fresh player. Events for this mount must be
    /// reported with the same `generation`.
    fn mount(&mut self, slot: usize, generation: u64, source: &SourceState);
    fn play(&mut self, slot: usize);
    fn pause(&mut self, slot: usize);
    fn seek(&mut self, slot: usize, position: f64);
    fn set_fill_mode(&mut self, slot: usize, mode: FillMode);
    fn release(&mut self, slot: usize);
}

/// Feed UI callbacks. All default to no-ops.
pub trait FeedListener: Send {
    fn on_loaded(&mut self, _slot: usize) {}
    fn on_error(&mut self, _slot: usize, _error: &EngineError, _retry_count: u8) {}
    fn on_progress(&mut self, _slot: usize, _position: f64, _duration: f64) {}
    fn on_end(&mut self, _slot: usize, _show_replay: bool) {}
    /// The item failed too often and should disappear from the feed.
    fn on_remove(&mut self, _feed_index: Option<usize>, _video_id: &str) {}
    fn on_view(&mut self, _video_id: &str) {}
}

/// Results of background work, fed back through [`PoolManager::handle_message`].
#[derive(Debug, Clone, PartialEq)]
pub enum PoolMessage {
    Resolved {
        slot: usize,
        generation: u64,
        source: SourceState,
    },
    RetryDue {
        slot: usize,
        generation: u64,
    },
}

/// Read-only view of one slot.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSlot {
    pub slot_index: usize,
    pub feed_index: Option<usize>,
    pub video_id: String,
    pub source: SourceState,
    pub phase: Phase,
    pub is_loaded: bool,
    pub has_error: bool,
    pub retry_count: u8,
}

#[derive(Default)]
struct SlotState {
    session: Session,
    pin: Option<PathPin>,
    resolver: Option<JoinHandle<()>>,
}

impl SlotState {
    fn cancel_resolution(&mut self) {
        if let Some(task) = self.resolver.take() {
            task.abort();
        }
    }
}

/// Drives a fixed pool of player slots across the feed.
///
/// All methods run on the UI's context and never block; disk lookups and
/// retry timers are spawned on the tokio runtime and report back through
/// [`PoolMessage`]s, which must be handed to [`handle_message`](Self::handle_message)
/// (or consumed with [`pump`](Self::pump)).
pub struct PoolManager<P: PlayerBackend, L: FeedListener> {
    cache: Arc<CacheStore>,
    prefetch: Arc<PrefetchScheduler>,
    player: P,
    listener: L,
    policy: SessionPolicy,
    feed: Vec<FeedItem>,
    playable: Vec<usize>,
    slots: Vec<SlotState>,
    active_index: Option<usize>,
    active_slot: Option<usize>,
    host: HostState,
    tracker: ScrollTracker,
    network: NetworkKind,
    scrolling: bool,
    deferred_plan: Option<ScrollStep>,
    tx: mpsc::UnboundedSender<PoolMessage>,
    rx: mpsc::UnboundedReceiver<PoolMessage>,
}

impl<P: PlayerBackend, L: FeedListener> PoolManager<P, L> {
    pub fn new(
        cache: Arc<CacheStore>,
        prefetch: Arc<PrefetchScheduler>,
        config: &PlaybackConfig,
        player: P,
        listener: L,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            cache,
            prefetch,
            player,
            listener,
            policy: SessionPolicy::from(config),
            feed: Vec::new(),
            playable: Vec::new(),
            slots: (0..config.pool_size).map(|_| SlotState::default()).collect(),
            active_index: None,
            active_slot: None,
            host: HostState::default(),
            tracker: ScrollTracker::new(),
            network: NetworkKind::default(),
            scrolling: false,
            deferred_plan: None,
            tx,
            rx,
        }
    }

    pub fn player(&self) -> &P {
        &self.player
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    pub fn active_slot(&self) -> Option<usize> {
        self.active_slot
    }

    pub fn active_index(&self) -> Option<usize> {
        self.active_index
    }

    pub fn slots(&self) -> Vec<PlayerSlot> {
        self.slots
            .iter()
            .enumerate()
            .map(|(slot_index, state)| {
                let session = &state.session;
                PlayerSlot {
                    slot_index,
                    feed_index: session.feed_index,
                    video_id: session.video_id.clone(),
                    source: session.source.clone(),
                    phase: session.phase,
                    is_loaded: session.phase.is_loaded(),
                    has_error: matches!(session.phase, Phase::Error { .. }),
                    retry_count: session.retry_count,
                }
            })
            .collect()
    }

    /// Replaces the feed. Slots follow their video to its new index; slots
    /// whose video is gone are released. Call [`on_scroll`](Self::on_scroll)
    /// afterwards to refill them.
    pub fn set_feed(&mut self, feed: Vec<FeedItem>) {
        self.playable = playable_indices(&feed);
        for slot in 0..self.slots.len() {
            let session = &self.slots[slot].session;
            if session.feed_index.is_none() {
                continue;
            }
            let moved_to = feed.iter().position(|item| {
                item.is_playable() && item.id == session.video_id && item.video_url == session.url
            });
            match moved_to {
                Some(index) => self.slots[slot].session.feed_index = Some(index),
                None => {
                    debug!(slot, video_id = %session.video_id, "Video left the feed, releasing slot");
                    self.dispatch(slot, SessionEvent::Release);
                    if self.active_slot == Some(slot) {
                        self.active_slot = None;
                    }
                }
            }
        }
        self.feed = feed;
    }

    /// Recycles slots around `active_feed_index`, activates its slot and
    /// schedules lookahead downloads.
    pub fn on_scroll(&mut self, active_feed_index: usize) -> Result<(), EngineError> {
        let step = self.tracker.record(active_feed_index);
        self.active_index = Some(active_feed_index);

        let prior: Vec<Option<usize>> = self
            .slots
            .iter()
            .map(|state| state.session.feed_index)
            .collect();
        let result = compute_targets(active_feed_index, &self.playable, &prior, self.slots.len());

        if result.active_slot.is_none() && self.playable.binary_search(&active_feed_index).is_ok() {
            let err = EngineError::PoolExhausted {
                feed_index: active_feed_index,
                pool_size: self.slots.len(),
            };
            error!(error = %err, "Playable item has no player slot");
            return Err(err);
        }

        for (slot, (target, previous)) in result.targets.iter().zip(&prior).enumerate() {
            if target == previous {
                continue;
            }
            match target.and_then(|index| self.feed.get(index).map(|item| (index, item.clone()))) {
                Some((feed_index, item)) => {
                    debug!(slot, feed_index, video_id = %item.id, "Assigning slot");
                    self.dispatch(
                        slot,
                        SessionEvent::Assign {
                            video_id: item.id,
                            url: item.video_url,
                            feed_index,
                            width: item.width,
                            height: item.height,
                        },
                    );
                }
                None => self.dispatch(slot, SessionEvent::Release),
            }
        }

        for slot in 0..self.slots.len() {
            if Some(slot) != result.active_slot && self.slots[slot].session.is_active {
                self.dispatch(slot, SessionEvent::SetActive(false));
            }
        }
        self.active_slot = result.active_slot;
        if let Some(slot) = result.active_slot {
            self.dispatch(slot, SessionEvent::SetActive(true));
            let url = self.slots[slot].session.url.clone();
            if self.prefetch.bump_priority(&url, 0) {
                trace!(url = %url, "Active item moved to the front of the prefetch queue");
            }
        }

        if self.scrolling {
            self.deferred_plan = Some(step);
        } else {
            self.plan(step);
        }
        Ok(())
    }

    /// While scrolling, lookahead planning waits for the scroll to settle.
    pub fn set_scrolling(&mut self, scrolling: bool) {
        self.scrolling = scrolling;
        if !scrolling {
            if let Some(step) = self.deferred_plan.take() {
                self.plan(step);
            }
        }
    }

    pub fn set_network(&mut self, network: NetworkKind) {
        self.network = network;
    }

    /// Applies to items that finish after the change.
    pub fn set_viewing_mode(&mut self, mode: ViewingMode) {
        self.policy.viewing_mode = mode;
    }

    pub fn set_screen_focused(&mut self, focused: bool) {
        self.update_host(|host| host.screen_focused = focused);
    }

    pub fn set_app_foreground(&mut self, foreground: bool) {
        self.update_host(|host| host.app_foreground = foreground);
    }

    pub fn set_seeking(&mut self, seeking: bool) {
        self.update_host(|host| host.seeking = seeking);
    }

    pub fn set_user_paused(&mut self, paused: bool) {
        self.update_host(|host| host.user_paused = paused);
    }

    pub fn on_player_event(&mut self, slot: usize, generation: u64, event: PlayerEvent) {
        self.dispatch(slot, SessionEvent::Player { generation, event });
    }

    /// "Tap to retry" on an errored slot.
    pub fn retry(&mut self, slot: usize) {
        self.dispatch(slot, SessionEvent::Retry);
    }

    pub fn replay(&mut self, slot: usize) {
        self.dispatch(slot, SessionEvent::Replay);
    }

    pub fn seek(&mut self, slot: usize, position: f64) {
        self.dispatch(slot, SessionEvent::Seek(position));
    }

    pub fn handle_message(&mut self, message: PoolMessage) {
        match message {
            PoolMessage::Resolved {
                slot,
                generation,
                source,
            } => {
                if let Some(state) = self.slots.get_mut(slot) {
                    if state.session.generation == generation {
                        state.resolver = None;
                    }
                }
                self.dispatch(slot, SessionEvent::Resolved { generation, source });
            }
            PoolMessage::RetryDue { slot, generation } => {
                self.dispatch(slot, SessionEvent::RetryDue { generation });
            }
        }
    }

    /// Waits for the next background result and applies it.
    pub async fn pump(&mut self) {
        if let Some(message) = self.rx.recv().await {
            self.handle_message(message);
        }
    }

    /// Applies every result that is already waiting. Returns how many there were.
    pub fn pump_ready(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(message) = self.rx.try_recv() {
            self.handle_message(message);
            handled += 1;
        }
        handled
    }

    /// Releases every slot, e.g. when the feed screen goes away.
    pub fn release_all(&mut self) {
        for slot in 0..self.slots.len() {
            self.dispatch(slot, SessionEvent::Release);
        }
        self.active_slot = None;
    }

    fn update_host(&mut self, update: impl FnOnce(&mut HostState)) {
        update(&mut self.host);
        let host = self.host;
        for slot in 0..self.slots.len() {
            self.dispatch(slot, SessionEvent::Host(host));
        }
    }

    fn plan(&mut self, step: ScrollStep) {
        let Some(active) = self.active_index else {
            return;
        };
        let items = plan_prefetch(&self.feed, &self.playable, active, step, self.network);
        if items.is_empty() {
            return;
        }
        let accepted = self.prefetch.enqueue_many(items);
        trace!(active, accepted, network = ?self.network, "Planned lookahead");
    }

    fn dispatch(&mut self, slot: usize, event: SessionEvent) {
        let mut pending = VecDeque::from([event]);
        while let Some(event) = pending.pop_front() {
            let Some(state) = self.slots.get_mut(slot) else {
                warn!(slot, "Event for unknown slot");
                return;
            };
            let session = std::mem::take(&mut state.session);
            let (session, effects) = transition(session, event, &self.policy);
            state.session = session;

            for effect in effects {
                if let Some(follow_up) = self.apply(slot, effect) {
                    pending.push_back(follow_up);
                }
            }
        }
    }

    /// Carries out one effect. Sources that resolve without I/O come back as
    /// a follow-up event for the same slot.
    fn apply(&mut self, slot: usize, effect: Effect) -> Option<SessionEvent> {
        match effect {
            Effect::ResolveSource { generation, url } => {
                self.slots[slot].cancel_resolution();
                if !is_cacheable(&url) || !self.cache.is_enabled() {
                    return Some(SessionEvent::Resolved {
                        generation,
                        source: SourceState::Network(url),
                    });
                }
                if let Some(path) = self.cache.lookup_memory(&url) {
                    return Some(SessionEvent::Resolved {
                        generation,
                        source: SourceState::MemoryHit(path),
                    });
                }

                let cache = Arc::clone(&self.cache);
                let tx = self.tx.clone();
                self.slots[slot].resolver = Some(tokio::spawn(async move {
                    let source = match cache.lookup_or_fetch(&url).await {
                        Ok(path) => SourceState::DiskHit(path),
                        Err(err) => {
                            if !err.is_miss() {
                                warn!(url = %url, error = %err, "Cache lookup failed, streaming instead");
                            }
                            SourceState::Network(url)
                        }
                    };
                    let _ = tx.send(PoolMessage::Resolved {
                        slot,
                        generation,
                        source,
                    });
                }));
            }

            Effect::Mount { generation, source } => {
                let pin = source.local_path().map(|path| self.cache.pin(path));
                self.slots[slot].pin = pin;
                if let SourceState::Network(url) = &source {
                    // Stream now, but have it on disk for the way back.
                    if self.active_slot == Some(slot) && is_cacheable(url) {
                        self.prefetch.enqueue_one(url.clone(), 0);
                    }
                }
                debug!(slot, generation, source = ?source, "Mounting player");
                self.player.mount(slot, generation, &source);
            }

            Effect::Play => self.player.play(slot),
            Effect::Pause => self.player.pause(slot),
            Effect::Seek(position) => self.player.seek(slot, position),
            Effect::SetFillMode(mode) => self.player.set_fill_mode(slot, mode),

            Effect::Release => {
                let state = &mut self.slots[slot];
                state.cancel_resolution();
                state.pin = None;
                self.player.release(slot);
            }

            Effect::RecordView { video_id } => self.listener.on_view(&video_id),

            Effect::InvalidateCache { url } => {
                let cache = Arc::clone(&self.cache);
                let prefetch = Arc::clone(&self.prefetch);
                tokio::spawn(async move {
                    cache.invalidate(&url).await;
                    prefetch.enqueue_one(url, 1);
                });
            }

            Effect::ScheduleRetry { generation, delay } => {
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(PoolMessage::RetryDue { slot, generation });
                });
            }

            Effect::NotifyLoaded => self.listener.on_loaded(slot),
            Effect::NotifyProgress { position, duration } => {
                self.listener.on_progress(slot, position, duration)
            }
            Effect::NotifyError { retry_count, error } => {
                let err = self.playback_error(slot, error);
                warn!(slot, retry_count, error = %err, "Playback failed");
                self.listener.on_error(slot, &err, retry_count);
            }
            Effect::NotifyEnded { show_replay } => self.listener.on_end(slot, show_replay),
            Effect::RemoveFromFeed {
                video_id,
                feed_index,
            } => {
                warn!(slot, video_id = %video_id, ?feed_index, "Retries exhausted, removing item");
                self.listener.on_remove(feed_index, &video_id);
            }
        }
        None
    }

    /// A decode failure is about the file; anything else is the stream
    /// dropping and reads as a download failure.
    fn playback_error(&self, slot: usize, source: PlayerError) -> EngineError {
        let session = &self.slots[slot].session;
        match source.kind {
            PlayerErrorKind::Decode => EngineError::Decode {
                video_id: session.video_id.clone(),
                source,
            },
            PlayerErrorKind::Network => {
                EngineError::Download(DownloadError::network(session.url.as_str(), source.message))
            }
        }
    }
}

impl<P: PlayerBackend, L: FeedListener> Drop for PoolManager<P, L> {
    fn drop(&mut self) {
        for state in &mut self.slots {
            state.cancel_resolution();
        }
    }
}

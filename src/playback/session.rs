//! Playback session: one slot's lifecycle as a pure state machine.
//!
//! [`transition`] never touches a player, the cache or a clock. It returns
//! the next session together with the [`Effect`]s the pool must carry out,
//! so every rule here is testable without a runtime.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::PlaybackConfig;
use crate::error::PlayerError;

/// Where a slot's media comes from, in resolution order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SourceState {
    #[default]
    Unresolved,
    MemoryHit(PathBuf),
    DiskHit(PathBuf),
    Network(String),
}

impl SourceState {
    pub fn local_path(&self) -> Option<&Path> {
        match self {
            SourceState::MemoryHit(path) | SourceState::DiskHit(path) => Some(path),
            _ => None,
        }
    }

    pub fn is_cached(&self) -> bool {
        self.local_path().is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    SourceResolving,
    Loaded,
    Playing,
    Paused,
    Finished,
    Error {
        retry_count: u8,
    },
    /// Retries exhausted; the item is gone from the feed.
    Removed,
}

impl Phase {
    /// The player has metadata for the current source.
    pub fn is_loaded(self) -> bool {
        matches!(
            self,
            Phase::Loaded | Phase::Playing | Phase::Paused | Phase::Finished
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillMode {
    Cover,
    Contain,
}

impl FillMode {
    /// Tall videos fill the screen, everything else letterboxes.
    pub fn from_dimensions(width: Option<u32>, height: Option<u32>, threshold: f32) -> Option<Self> {
        match (width, height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => {
                if (w as f32 / h as f32) < threshold {
                    Some(FillMode::Cover)
                } else {
                    Some(FillMode::Contain)
                }
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewingMode {
    /// Loop a few times, then offer replay.
    #[default]
    Standard,
    /// Single pass; the end is reported so the feed can advance.
    Continuous,
}

/// Conditions outside the session that gate playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostState {
    pub screen_focused: bool,
    pub app_foreground: bool,
    pub seeking: bool,
    pub user_paused: bool,
}

impl Default for HostState {
    fn default() -> Self {
        Self {
            screen_focused: true,
            app_foreground: true,
            seeking: false,
            user_paused: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionPolicy {
    pub max_retries: u8,
    pub max_loops: u8,
    pub cover_aspect_threshold: f32,
    pub retry_delay: Duration,
    pub auto_retry: bool,
    pub viewing_mode: ViewingMode,
}

impl SessionPolicy {
    pub fn loops_before_finish(&self) -> u8 {
        match self.viewing_mode {
            ViewingMode::Standard => self.max_loops.max(1),
            ViewingMode::Continuous => 1,
        }
    }
}

impl From<&PlaybackConfig> for SessionPolicy {
    fn from(config: &PlaybackConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            max_loops: config.max_loops,
            cover_aspect_threshold: config.cover_aspect_threshold,
            retry_delay: config.retry_delay,
            auto_retry: config.auto_retry,
            viewing_mode: ViewingMode::Standard,
        }
    }
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self::from(&PlaybackConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Session {
    pub video_id: String,
    pub url: String,
    pub feed_index: Option<usize>,
    pub phase: Phase,
    pub source: SourceState,
    /// Bumped whenever earlier resolutions and player callbacks become stale.
    pub generation: u64,
    pub retry_count: u8,
    pub loop_count: u8,
    /// The one uncounted retry after a cached file failed to play.
    pub pardon_used: bool,
    pub fill_mode: Option<FillMode>,
    pub position: f64,
    pub duration: f64,
    pub is_active: bool,
    pub host: HostState,
    pub view_recorded: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    Loaded {
        duration: f64,
        width: Option<u32>,
        height: Option<u32>,
    },
    Progress {
        position: f64,
        duration: f64,
    },
    Ended,
    Failed(PlayerError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Assign {
        video_id: String,
        url: String,
        feed_index: usize,
        width: Option<u32>,
        height: Option<u32>,
    },
    Resolved {
        generation: u64,
        source: SourceState,
    },
    Player {
        generation: u64,
        event: PlayerEvent,
    },
    SetActive(bool),
    Host(HostState),
    Retry,
    RetryDue {
        generation: u64,
    },
    Replay,
    Seek(f64),
    Release,
}

/// Work for the pool to perform after a transition, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    ResolveSource { generation: u64, url: String },
    Mount { generation: u64, source: SourceState },
    Play,
    Pause,
    Seek(f64),
    Release,
    SetFillMode(FillMode),
    RecordView { video_id: String },
    InvalidateCache { url: String },
    ScheduleRetry { generation: u64, delay: Duration },
    NotifyLoaded,
    NotifyProgress { position: f64, duration: f64 },
    NotifyError { retry_count: u8, error: PlayerError },
    NotifyEnded { show_replay: bool },
    RemoveFromFeed { video_id: String, feed_index: Option<usize> },
}

pub fn transition(
    mut session: Session,
    event: SessionEvent,
    policy: &SessionPolicy,
) -> (Session, Vec<Effect>) {
    let mut effects = Vec::new();

    match event {
        SessionEvent::Assign {
            video_id,
            url,
            feed_index,
            width,
            height,
        } => {
            if session.phase != Phase::Idle {
                effects.push(Effect::Release);
            }
            let fill_mode = FillMode::from_dimensions(width, height, policy.cover_aspect_threshold);
            session = Session {
                video_id,
                url,
                feed_index: Some(feed_index),
                phase: Phase::SourceResolving,
                generation: session.generation + 1,
                fill_mode,
                host: session.host,
                ..Session::default()
            };
            if let Some(mode) = fill_mode {
                effects.push(Effect::SetFillMode(mode));
            }
            effects.push(Effect::ResolveSource {
                generation: session.generation,
                url: session.url.clone(),
            });
        }

        SessionEvent::Resolved { generation, source } => {
            if generation != session.generation || session.phase != Phase::SourceResolving {
                return (session, effects);
            }
            session.source = source.clone();
            effects.push(Effect::Mount { generation, source });
        }

        SessionEvent::Player { generation, event } => {
            if generation != session.generation {
                return (session, effects);
            }
            on_player_event(&mut session, event, policy, &mut effects);
        }

        SessionEvent::SetActive(active) => {
            if active && !session.is_active {
                session.is_active = true;
                if session.phase.is_loaded() {
                    // Activation always starts from the top.
                    session.position = 0.0;
                    session.loop_count = 0;
                    if session.phase == Phase::Finished {
                        session.phase = Phase::Paused;
                    }
                    effects.push(Effect::Seek(0.0));
                }
                if !session.view_recorded && session.phase != Phase::Removed {
                    session.view_recorded = true;
                    effects.push(Effect::RecordView {
                        video_id: session.video_id.clone(),
                    });
                }
            } else if !active && session.is_active {
                session.is_active = false;
                session.view_recorded = false;
            }
        }

        SessionEvent::Host(host) => {
            let unpaused = session.host.user_paused && !host.user_paused;
            session.host = host;
            if unpaused && session.is_active && session.phase == Phase::Finished {
                restart(&mut session, &mut effects);
            }
        }

        SessionEvent::Retry => {
            if matches!(session.phase, Phase::Error { .. }) {
                remount(&mut session, &mut effects);
            }
        }

        SessionEvent::RetryDue { generation } => {
            if generation == session.generation && matches!(session.phase, Phase::Error { .. }) {
                remount(&mut session, &mut effects);
            }
        }

        SessionEvent::Replay => {
            if session.phase.is_loaded() {
                session.host.user_paused = false;
                restart(&mut session, &mut effects);
            }
        }

        SessionEvent::Seek(position) => {
            if session.phase.is_loaded() {
                if session.phase == Phase::Finished {
                    session.phase = Phase::Paused;
                    session.loop_count = 0;
                }
                session.position = position;
                effects.push(Effect::Seek(position));
            }
        }

        SessionEvent::Release => {
            if session.phase != Phase::Idle {
                effects.push(Effect::Release);
            }
            session = Session {
                generation: session.generation + 1,
                host: session.host,
                ..Session::default()
            };
        }
    }

    sync_playback(&mut session, &mut effects);
    (session, effects)
}

fn on_player_event(
    session: &mut Session,
    event: PlayerEvent,
    policy: &SessionPolicy,
    effects: &mut Vec<Effect>,
) {
    match event {
        PlayerEvent::Loaded {
            duration,
            width,
            height,
        } => {
            if session.phase != Phase::SourceResolving {
                return;
            }
            session.phase = Phase::Loaded;
            session.duration = duration;
            session.position = 0.0;
            if session.fill_mode.is_none() {
                session.fill_mode =
                    FillMode::from_dimensions(width, height, policy.cover_aspect_threshold);
                if let Some(mode) = session.fill_mode {
                    effects.push(Effect::SetFillMode(mode));
                }
            }
            effects.push(Effect::NotifyLoaded);
        }

        PlayerEvent::Progress { position, duration } => {
            if !session.phase.is_loaded() {
                return;
            }
            session.position = position;
            session.duration = duration;
            effects.push(Effect::NotifyProgress { position, duration });
        }

        PlayerEvent::Ended => {
            if !matches!(session.phase, Phase::Playing | Phase::Paused | Phase::Loaded) {
                return;
            }
            session.loop_count = session.loop_count.saturating_add(1);
            if session.loop_count >= policy.loops_before_finish() {
                session.phase = Phase::Finished;
                session.position = session.duration;
                effects.push(Effect::Pause);
                effects.push(Effect::NotifyEnded {
                    show_replay: policy.viewing_mode == ViewingMode::Standard,
                });
            } else {
                session.position = 0.0;
                effects.push(Effect::Seek(0.0));
            }
        }

        PlayerEvent::Failed(error) => on_failure(session, error, policy, effects),
    }
}

fn on_failure(
    session: &mut Session,
    error: PlayerError,
    policy: &SessionPolicy,
    effects: &mut Vec<Effect>,
) {
    if matches!(
        session.phase,
        Phase::Idle | Phase::Removed | Phase::Error { .. }
    ) {
        return;
    }

    // A cached file that will not play is treated as corrupt: drop it and go
    // to the network once without charging the retry budget.
    if session.source.is_cached() && !session.pardon_used {
        session.pardon_used = true;
        session.generation += 1;
        session.phase = Phase::SourceResolving;
        session.source = SourceState::Network(session.url.clone());
        effects.push(Effect::InvalidateCache {
            url: session.url.clone(),
        });
        effects.push(Effect::Release);
        effects.push(Effect::Mount {
            generation: session.generation,
            source: session.source.clone(),
        });
        return;
    }

    let retry_count = session.retry_count.saturating_add(1);
    session.retry_count = retry_count;

    if retry_count >= policy.max_retries {
        session.phase = Phase::Removed;
        session.generation += 1;
        effects.push(Effect::Release);
        effects.push(Effect::RemoveFromFeed {
            video_id: session.video_id.clone(),
            feed_index: session.feed_index,
        });
        return;
    }

    session.phase = Phase::Error { retry_count };
    effects.push(Effect::Pause);
    effects.push(Effect::NotifyError { retry_count, error });
    if policy.auto_retry {
        effects.push(Effect::ScheduleRetry {
            generation: session.generation,
            delay: policy.retry_delay,
        });
    }
}

/// Fresh player instance through the full resolution order.
fn remount(session: &mut Session, effects: &mut Vec<Effect>) {
    session.generation += 1;
    session.phase = Phase::SourceResolving;
    session.source = SourceState::Unresolved;
    session.position = 0.0;
    session.loop_count = 0;
    effects.push(Effect::Release);
    effects.push(Effect::ResolveSource {
        generation: session.generation,
        url: session.url.clone(),
    });
}

fn restart(session: &mut Session, effects: &mut Vec<Effect>) {
    session.phase = Phase::Paused;
    session.position = 0.0;
    session.loop_count = 0;
    effects.push(Effect::Seek(0.0));
}

/// Plays exactly when every gate is open, pauses otherwise.
fn sync_playback(session: &mut Session, effects: &mut Vec<Effect>) {
    let host = session.host;
    let should_play = session.is_active
        && host.screen_focused
        && host.app_foreground
        && !host.seeking
        && !host.user_paused;

    match session.phase {
        Phase::Loaded | Phase::Paused if should_play => {
            session.phase = Phase::Playing;
            effects.push(Effect::Play);
        }
        Phase::Loaded if !should_play => {
            session.phase = Phase::Paused;
        }
        Phase::Playing if !should_play => {
            session.phase = Phase::Paused;
            effects.push(Effect::Pause);
        }
        _ => {}
    }
}

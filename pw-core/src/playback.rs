//! Playback engine for built timelines
//!
//! A single-threaded state machine over a `Timeline`. The caller drives it by
//! calling `tick()` at the configured cadence; each tick converts elapsed wall
//! time into virtual session time and applies every event due by then.
//!
//! Virtual time:
//! `session_origin + (now - wall_origin) * speed * time_compression`
//!
//! The engine keeps two states: the authoritative one, rebuilt from the static
//! baseline plus `dynamic[..cursor]`, and a warm-start preview shown while the
//! cursor is still at 0 so the first rendered frame has positions in it.

use crate::clock::{Clock, SystemClock};
use crate::merge::{BufferLimits, Snapshot, DEFAULT_POSITION_BUFFER, DEFAULT_TELEMETRY_BUFFER};
use crate::model::{Channel, TimelineEvent};
use crate::timeline::{BuildReport, Timeline};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Callback receiving each state update
pub type StateListener = Box<dyn FnMut(&Snapshot) + Send>;

/// Engine construction settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    pub playback_speed: f64,
    /// Virtual session milliseconds per wall millisecond, independent of speed
    pub time_compression: f64,
    /// Real position frames pre-applied to the preview state
    pub warm_start_frames: usize,
    pub position_buffer: usize,
    pub telemetry_buffer: usize,
    pub tick_interval_ms: u64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            playback_speed: 1.0,
            time_compression: 1.0,
            warm_start_frames: 10,
            position_buffer: DEFAULT_POSITION_BUFFER,
            telemetry_buffer: DEFAULT_TELEMETRY_BUFFER,
            tick_interval_ms: 100,
        }
    }
}

impl ReplayConfig {
    pub fn buffer_limits(&self) -> BufferLimits {
        BufferLimits {
            position: self.position_buffer,
            car_telemetry: self.telemetry_buffer,
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

/// Observable engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Initial,
    Playing,
    Paused,
    Ended,
    Destroyed,
}

/// Pairing of a virtual session time with the wall time it was valid at
#[derive(Debug, Clone, Copy)]
struct Anchor {
    session_origin: f64,
    wall_origin: u64,
}

pub struct PlaybackEngine<C: Clock = SystemClock> {
    timeline: Option<Timeline>,
    config: ReplayConfig,
    clock: C,
    listener: Option<StateListener>,
    baseline: Snapshot,
    preview: Snapshot,
    state: Snapshot,
    cursor: usize,
    playing: bool,
    anchor: Option<Anchor>,
    speed: f64,
    destroyed: bool,
}

impl PlaybackEngine<SystemClock> {
    pub fn new(timeline: Timeline, config: ReplayConfig) -> Self {
        Self::with_clock(timeline, config, SystemClock::new())
    }
}

impl<C: Clock> PlaybackEngine<C> {
    pub fn with_clock(timeline: Timeline, config: ReplayConfig, clock: C) -> Self {
        let speed = configured_speed(&config);

        let mut engine = Self {
            timeline: Some(timeline),
            config,
            clock,
            listener: None,
            baseline: Snapshot::default(),
            preview: Snapshot::default(),
            state: Snapshot::default(),
            cursor: 0,
            playing: false,
            anchor: None,
            speed,
            destroyed: false,
        };
        engine.load_initial_state();

        info!(
            "Playback engine ready: {} dynamic events, speed {}x, compression {}x",
            engine.dynamic_len(),
            engine.speed,
            engine.compression()
        );
        engine
    }

    /// Register the state subscriber; it immediately receives the current state
    pub fn set_listener(&mut self, listener: StateListener) {
        if self.destroyed {
            return;
        }
        self.listener = Some(listener);
        self.emit();
    }

    /// Load statics into the baseline and compute the warm-start preview
    fn load_initial_state(&mut self) {
        let Some(timeline) = self.timeline.as_ref() else {
            return;
        };

        let mut baseline = Snapshot::new(self.config.buffer_limits());
        for event in timeline.static_events() {
            if let Err(e) = baseline.apply(event) {
                warn!("Failed to load static {} data: {}", event.channel, e);
            }
        }

        let preview = warm_start(
            &baseline,
            timeline.dynamic_events(),
            self.config.warm_start_frames,
        );

        self.state = baseline.clone();
        self.baseline = baseline;
        self.preview = preview;
        self.cursor = 0;
        self.anchor = None;
    }

    fn dynamic(&self) -> &[TimelineEvent] {
        self.timeline
            .as_ref()
            .map(Timeline::dynamic_events)
            .unwrap_or(&[])
    }

    fn compression(&self) -> f64 {
        let c = self.config.time_compression;
        if c.is_finite() && c > 0.0 {
            c
        } else {
            1.0
        }
    }

    /// Current virtual session time in ms, or `None` before the first `play()`
    fn virtual_time(&self) -> Option<f64> {
        let anchor = self.anchor?;
        if !self.playing {
            return Some(anchor.session_origin);
        }
        let elapsed = self.clock.now_ms().saturating_sub(anchor.wall_origin) as f64;
        Some(anchor.session_origin + elapsed * self.speed * self.compression())
    }

    /// Freeze the virtual clock at its current value
    fn freeze_anchor(&mut self) {
        if let Some(vt) = self.virtual_time() {
            self.anchor = Some(Anchor {
                session_origin: vt,
                wall_origin: self.clock.now_ms(),
            });
        }
    }

    fn emit(&mut self) {
        let snapshot = if self.cursor == 0 {
            &self.preview
        } else {
            &self.state
        };
        if let Some(listener) = self.listener.as_mut() {
            listener(snapshot);
        }
    }

    pub fn play(&mut self) {
        if self.destroyed || self.playing {
            return;
        }
        if self.is_ended() {
            debug!("play() at end of timeline ignored");
            return;
        }

        let now = self.clock.now_ms();
        let session_origin = match self.anchor {
            Some(anchor) => anchor.session_origin,
            None => match self.dynamic().first() {
                Some(first) => first.timestamp as f64,
                None => return,
            },
        };
        self.anchor = Some(Anchor {
            session_origin,
            wall_origin: now,
        });
        self.playing = true;
        debug!("Playback started at virtual time {}", session_origin);
    }

    pub fn pause(&mut self) {
        if !self.playing {
            return;
        }
        self.freeze_anchor();
        self.playing = false;
        debug!("Playback paused at cursor {}", self.cursor);
    }

    /// Apply every event due by the current virtual time; returns how many were applied
    pub fn tick(&mut self) -> usize {
        if self.destroyed || !self.playing {
            return 0;
        }
        let Some(vt) = self.virtual_time() else {
            return 0;
        };

        let Some(timeline) = self.timeline.as_ref() else {
            return 0;
        };
        let dynamic = timeline.dynamic_events();

        let mut applied = 0;
        while let Some(event) = dynamic.get(self.cursor) {
            if event.timestamp as f64 > vt {
                break;
            }
            if let Err(e) = self.state.apply(event) {
                warn!(
                    "Skipping event #{} ({} at {}): {}",
                    self.cursor, event.channel, event.timestamp, e
                );
            }
            self.cursor += 1;
            applied += 1;
        }

        let ended = self.cursor >= dynamic.len();
        if ended {
            self.freeze_anchor();
            self.playing = false;
            info!("Playback reached end of timeline");
        }
        if applied > 0 || ended {
            self.emit();
        }
        applied
    }

    /// Rebuild state from the baseline up to `percentage` of the dynamic timeline
    pub fn seek(&mut self, percentage: f64) {
        if self.destroyed {
            return;
        }
        let was_playing = self.playing;
        self.pause();

        let len = self.dynamic_len();
        let pct = if percentage.is_finite() {
            percentage.clamp(0.0, 100.0)
        } else {
            0.0
        };
        let target = ((pct / 100.0) * len as f64).floor() as usize;
        let target = target.min(len.saturating_sub(1));

        let mut state = self.baseline.clone();
        let mut failures = 0;
        for event in &self.dynamic()[..target] {
            if state.apply(event).is_err() {
                failures += 1;
            }
        }
        if failures > 0 {
            warn!("{} event(s) failed to apply while seeking", failures);
        }

        let origin = match target {
            0 => self.dynamic().first(),
            n => self.dynamic().get(n - 1),
        }
        .map(|e| e.timestamp as f64);

        self.state = state;
        self.cursor = target;
        self.anchor = origin.map(|session_origin| Anchor {
            session_origin,
            wall_origin: self.clock.now_ms(),
        });
        debug!("Seeked to {:.1}% (event {} of {})", pct, target, len);

        if was_playing {
            self.play();
        }
        self.emit();
    }

    /// Change playback speed without jumping the replay position
    pub fn set_speed(&mut self, multiplier: f64) {
        if self.destroyed {
            return;
        }
        if !multiplier.is_finite() || multiplier <= 0.0 {
            warn!("Ignoring invalid playback speed {}", multiplier);
            return;
        }
        if self.playing {
            self.freeze_anchor();
        }
        self.speed = multiplier;
    }

    /// Back to the freshly constructed state, with the configured speed
    pub fn reset(&mut self) {
        if self.destroyed {
            return;
        }
        self.pause();
        self.load_initial_state();
        self.speed = configured_speed(&self.config);
        self.emit();
    }

    /// Stop and drop everything. Every later call is a no-op.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.playing = false;
        self.anchor = None;
        self.timeline = None;
        self.listener = None;
        self.baseline = Snapshot::default();
        self.preview = Snapshot::default();
        self.state = Snapshot::default();
        self.cursor = 0;
        self.destroyed = true;
        info!("Playback engine destroyed");
    }

    /// Current state; the warm-start preview until a dynamic event is applied
    pub fn snapshot(&self) -> &Snapshot {
        if self.cursor == 0 {
            &self.preview
        } else {
            &self.state
        }
    }

    /// Percentage of dynamic events consumed, 0-100
    pub fn get_progress(&self) -> f64 {
        let len = self.dynamic_len();
        if len == 0 {
            return 0.0;
        }
        self.cursor as f64 / len as f64 * 100.0
    }

    /// Timestamp of the last applied event, or the first dynamic event's
    pub fn current_timestamp(&self) -> Option<i64> {
        let dynamic = self.dynamic();
        match self.cursor {
            0 => dynamic.first(),
            n => dynamic.get(n - 1),
        }
        .map(|e| e.timestamp)
    }

    /// `current_timestamp` as RFC 3339 with milliseconds
    pub fn get_current_time(&self) -> Option<String> {
        self.current_timestamp()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn state(&self) -> PlaybackState {
        if self.destroyed {
            PlaybackState::Destroyed
        } else if self.playing {
            PlaybackState::Playing
        } else if self.is_ended() {
            PlaybackState::Ended
        } else if self.anchor.is_none() && self.cursor == 0 {
            PlaybackState::Initial
        } else {
            PlaybackState::Paused
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn is_ended(&self) -> bool {
        !self.destroyed && self.dynamic_len() > 0 && self.cursor >= self.dynamic_len()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn time_compression(&self) -> f64 {
        self.compression()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn dynamic_len(&self) -> usize {
        self.dynamic().len()
    }

    pub fn tick_interval(&self) -> Duration {
        self.config.tick_interval()
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    pub fn report(&self) -> Option<&BuildReport> {
        self.timeline.as_ref().map(Timeline::report)
    }
}

fn configured_speed(config: &ReplayConfig) -> f64 {
    if config.playback_speed.is_finite() && config.playback_speed > 0.0 {
        config.playback_speed
    } else {
        warn!(
            "Invalid playback speed {} in config, using 1.0",
            config.playback_speed
        );
        1.0
    }
}

/// Baseline plus the first `frames` real position frames and the car
/// telemetry recorded up to the last of them
fn warm_start(baseline: &Snapshot, dynamic: &[TimelineEvent], frames: usize) -> Snapshot {
    let mut preview = baseline.clone();
    if frames == 0 {
        return preview;
    }

    let Some(horizon) = dynamic
        .iter()
        .filter(|e| e.is_real_position())
        .take(frames)
        .last()
        .map(|e| e.timestamp)
    else {
        return preview;
    };

    let mut taken = 0;
    for event in dynamic.iter().take_while(|e| e.timestamp <= horizon) {
        let wanted = if event.is_real_position() {
            taken < frames
        } else {
            event.channel == Channel::CarTelemetry
        };
        if !wanted {
            continue;
        }
        if event.is_real_position() {
            taken += 1;
        }
        if let Err(e) = preview.apply(event) {
            warn!("Warm start skipped {} event: {}", event.channel, e);
        }
    }
    preview
}

//! Active replay session
//!
//! Wraps a `PlaybackEngine` with the identity of the session it replays and
//! produces the serializable info served by the API.

use chrono::{DateTime, Utc};
use pw_core::source::load_cached;
use pw_core::{
    BuildReport, PlaybackEngine, PlaybackState, QualityPreset, ReplayConfig, SessionCache,
    SessionSource, SourceError, Timeline, TimelineBuilder, TimelineError,
};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

/// Why a session could not be turned into a replay
#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Source(#[from] anyhow::Error),

    #[error(transparent)]
    Timeline(#[from] TimelineError),
}

impl LoadError {
    /// Unknown session keys surface as `SourceError::NotFound`
    pub fn is_not_found(&self) -> bool {
        match self {
            LoadError::Source(e) => matches!(
                e.downcast_ref::<SourceError>(),
                Some(SourceError::NotFound(_))
            ),
            LoadError::Timeline(_) => false,
        }
    }
}

/// Load a session through the cache and build its timeline
///
/// Synchronous and CPU-bound; run it on a blocking thread.
pub fn load_timeline(
    source: &dyn SessionSource,
    cache: &dyn SessionCache,
    session: &str,
    quality: QualityPreset,
) -> Result<Timeline, LoadError> {
    let data = load_cached(source, cache, session)?;
    let timeline = TimelineBuilder::with_preset(quality).build(&data)?;
    Ok(timeline)
}

/// State for the active replay
pub struct ReplaySession {
    engine: PlaybackEngine,
    source: String,
    session: String,
    quality: QualityPreset,
    loaded_at: DateTime<Utc>,
}

impl ReplaySession {
    pub fn new(
        source: impl Into<String>,
        session: impl Into<String>,
        quality: QualityPreset,
        timeline: Timeline,
        config: ReplayConfig,
    ) -> Self {
        let source = source.into();
        let session = session.into();
        info!(
            "Replay loaded: {}/{} at {:?} quality, {} events",
            source,
            session,
            quality,
            timeline.len()
        );

        Self {
            engine: PlaybackEngine::new(timeline, config),
            source,
            session,
            quality,
            loaded_at: Utc::now(),
        }
    }

    pub fn engine(&self) -> &PlaybackEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut PlaybackEngine {
        &mut self.engine
    }

    pub fn info(&self) -> ReplayInfo {
        let engine = &self.engine;
        ReplayInfo {
            source: self.source.clone(),
            session: self.session.clone(),
            quality: self.quality,
            loaded_at: self.loaded_at,
            state: engine.state(),
            playing: engine.is_playing(),
            progress: engine.get_progress(),
            current_time: engine.get_current_time(),
            current_timestamp: engine.current_timestamp(),
            playback_speed: engine.speed(),
            time_compression: engine.time_compression(),
            cursor: engine.cursor(),
            total_events: engine.dynamic_len(),
            report: engine.report().cloned().unwrap_or_default(),
        }
    }
}

impl Drop for ReplaySession {
    fn drop(&mut self) {
        self.engine.destroy();
    }
}

/// Serializable replay info for the API
#[derive(Debug, Clone, Serialize)]
pub struct ReplayInfo {
    pub source: String,
    pub session: String,
    pub quality: QualityPreset,
    pub loaded_at: DateTime<Utc>,
    pub state: PlaybackState,
    pub playing: bool,
    pub progress: f64,
    pub current_time: Option<String>,
    pub current_timestamp: Option<i64>,
    pub playback_speed: f64,
    pub time_compression: f64,
    pub cursor: usize,
    pub total_events: usize,
    pub report: BuildReport,
}

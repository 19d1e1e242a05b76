//! Error types for timeline construction and state merging

use thiserror::Error;

/// Conditions that stop a session from entering playback
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimelineError {
    #[error("session data must be a JSON object keyed by channel name")]
    NotAnObject,

    #[error("insufficient position data: found {found} real frame(s), at least 2 are required")]
    InsufficientData { found: usize },

    #[error(
        "degenerate position data: {degenerate} of {pairs} frame pair(s) show no movement; \
         the source looks like placeholder data"
    )]
    DegenerateData { pairs: usize, degenerate: usize },
}

/// Failure to apply one event to the engine state
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    #[error("{payload} payload cannot be applied to channel {channel}")]
    PayloadMismatch { channel: String, payload: &'static str },

    #[error("channel {channel} already holds a {existing} state")]
    StateMismatch {
        channel: String,
        existing: &'static str,
    },
}

//! Pitwall Replay Core Library
//!
//! Turns sparse, irregularly-sampled motorsport session data into a dense,
//! seekable timeline and plays it back at variable speed.
//!
//! Layers, leaves first: state merge, position interpolation, timeline
//! building, playback.

pub mod clock;
pub mod error;
pub mod interpolate;
pub mod merge;
pub mod model;
pub mod playback;
pub mod source;
pub mod timeline;
pub mod units;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{MergeError, TimelineError};
pub use interpolate::{interpolate, Easing, InterpolationSettings, QualityPreset};
pub use merge::{BufferLimits, ChannelState, Snapshot};
pub use model::{Channel, EventPayload, PositionFrame, SessionData, TimelineEvent, Vector3};
pub use playback::{PlaybackEngine, PlaybackState, ReplayConfig, StateListener};
pub use source::{SessionCache, SessionSource, SessionSummary, SourceError};
pub use timeline::{BuildReport, Diagnostic, Timeline, TimelineBuilder};

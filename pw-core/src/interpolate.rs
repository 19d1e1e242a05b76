//! Position interpolation
//!
//! Sparse position samples (one every few seconds) would render as cars
//! teleporting around the circuit. This module synthesizes in-between frames
//! for every pair of consecutive real frames, ahead of playback.

use crate::error::TimelineError;
use crate::model::{sort_timeline_by_channel, Channel, PositionFrame, TimelineEvent};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{debug, warn};

/// Displacement (in feed units) below which an entity counts as not having moved
pub const DISPLACEMENT_EPSILON: f64 = 1e-3;

/// Easing curve applied to the interpolation parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Easing {
    Linear,
    Smoothstep,
    /// Cubic ease-in-out
    Cubic,
}

impl Easing {
    /// Map `t` in [0, 1] onto the eased curve
    pub fn apply(self, t: f64) -> f64 {
        let t = t.clamp(0.0, 1.0);
        match self {
            Easing::Linear => t,
            Easing::Smoothstep => t * t * (3.0 - 2.0 * t),
            Easing::Cubic => {
                if t < 0.5 {
                    4.0 * t * t * t
                } else {
                    1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
                }
            }
        }
    }
}

/// Interpolation density and style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterpolationSettings {
    /// Number of sub-intervals per real pair; `steps - 1` frames are synthesized
    pub steps_per_interval: usize,
    pub easing: Easing,
}

impl Default for InterpolationSettings {
    fn default() -> Self {
        QualityPreset::default().settings()
    }
}

/// Named interpolation quality chosen before a timeline is built
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityPreset {
    Low,
    #[default]
    Medium,
    High,
    Ultra,
}

impl QualityPreset {
    pub const ALL: [QualityPreset; 4] = [
        QualityPreset::Low,
        QualityPreset::Medium,
        QualityPreset::High,
        QualityPreset::Ultra,
    ];

    pub fn settings(self) -> InterpolationSettings {
        let (steps_per_interval, easing) = match self {
            QualityPreset::Low => (5, Easing::Linear),
            QualityPreset::Medium => (10, Easing::Smoothstep),
            QualityPreset::High => (20, Easing::Cubic),
            QualityPreset::Ultra => (30, Easing::Cubic),
        };
        InterpolationSettings {
            steps_per_interval,
            easing,
        }
    }
}

impl FromStr for QualityPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(QualityPreset::Low),
            "medium" => Ok(QualityPreset::Medium),
            "high" => Ok(QualityPreset::High),
            "ultra" => Ok(QualityPreset::Ultra),
            other => Err(format!("unknown quality preset: {}", other)),
        }
    }
}

/// A real position frame and the time it was sampled at
#[derive(Debug, Clone, Copy)]
pub struct Keyframe<'a> {
    pub timestamp: i64,
    pub frame: &'a PositionFrame,
}

/// Frames synthesized between two keyframes
#[derive(Debug, Clone, PartialEq)]
pub struct Interpolation {
    /// `(timestamp, frame)` pairs in ascending time order
    pub frames: Vec<(i64, PositionFrame)>,

    /// Every shared entity stayed put between the two keyframes
    pub degenerate: bool,

    /// The keyframe interval was not positive (or not representable) and
    /// timestamps were fabricated as `start + i`
    pub synthetic_timestamps: bool,
}

/// Generate `steps - 1` frames strictly between `start` and `end`.
///
/// Entities present in both keyframes are eased from one to the other;
/// entities present in only one are held at their known coordinates.
/// Inputs are never modified and identical inputs produce identical output.
pub fn interpolate(
    start: Keyframe<'_>,
    end: Keyframe<'_>,
    steps: usize,
    easing: Easing,
) -> Interpolation {
    let degenerate = is_degenerate(start.frame, end.frame);
    let span = end
        .timestamp
        .checked_sub(start.timestamp)
        .filter(|span| *span > 0);
    let synthetic_timestamps = span.is_none();

    let mut frames = Vec::with_capacity(steps.saturating_sub(1));
    for i in 1..steps {
        let linear = i as f64 / steps as f64;
        let t = easing.apply(linear);

        let offset = match span {
            Some(span) => (span as f64 * linear).round() as i64,
            None => i as i64,
        };
        let timestamp = start.timestamp.saturating_add(offset);

        let mut frame = PositionFrame::new();
        for (id, from) in &start.frame.entities {
            let coords = match end.frame.get(id) {
                Some(to) => from.lerp(to, t),
                None => *from,
            };
            frame.insert(id.clone(), coords);
        }
        for (id, to) in &end.frame.entities {
            if !start.frame.entities.contains_key(id) {
                frame.insert(id.clone(), *to);
            }
        }

        frames.push((timestamp, frame));
    }

    Interpolation {
        frames,
        degenerate,
        synthetic_timestamps,
    }
}

/// True when the frames share entities and none of them moved
pub fn is_degenerate(start: &PositionFrame, end: &PositionFrame) -> bool {
    let mut shared = 0usize;
    for (id, from) in &start.entities {
        if let Some(to) = end.get(id) {
            if from.distance(to) > DISPLACEMENT_EPSILON {
                return false;
            }
            shared += 1;
        }
    }
    shared > 0
}

/// Result of densifying a timeline
#[derive(Debug, Clone)]
pub struct Expansion {
    pub events: Vec<TimelineEvent>,
    pub real_frames: usize,
    pub synthetic_frames: usize,
    pub pairs: usize,
    pub degenerate_pairs: usize,
    /// Pairs whose interval was not increasing and got fabricated timestamps
    pub retimed_pairs: Vec<RetimedPair>,
}

/// Two real position frames that were not increasing in time.
///
/// The in-between frames were stamped `start + 1 ..` and the closing frame
/// was moved to `retimed_end`, just after them, so playback order follows
/// source order and later pairs never reuse those timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetimedPair {
    pub start: i64,
    pub end: i64,
    pub retimed_end: i64,
}

/// Interpolate every consecutive pair of real position frames in an
/// already-sorted timeline and return it re-sorted with the synthetic
/// frames spliced in. Timestamp ties are broken by `channel_order`.
///
/// Fails with `InsufficientData` below two real frames and with
/// `DegenerateData` when no pair shows any movement at all.
pub fn expand_timeline(
    events: Vec<TimelineEvent>,
    settings: InterpolationSettings,
    channel_order: &[Channel],
) -> Result<Expansion, TimelineError> {
    let real: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| e.is_real_position())
        .map(|(i, _)| i)
        .collect();

    if real.len() < 2 {
        return Err(TimelineError::InsufficientData { found: real.len() });
    }

    let pairs = real.len() - 1;
    let mut generated: Vec<Vec<TimelineEvent>> = Vec::with_capacity(pairs);
    let mut degenerate_pairs = 0;
    let mut retimed_pairs = Vec::new();
    // Real frame timestamps, moved forward where a pair had to be retimed
    let mut real_ts: Vec<i64> = real.iter().map(|&i| events[i].timestamp).collect();
    let closing_offset = i64::try_from(settings.steps_per_interval.max(1)).unwrap_or(i64::MAX);

    for (k, window) in real.windows(2).enumerate() {
        let (a, b) = (&events[window[0]], &events[window[1]]);
        let (Some(from), Some(to)) = (a.position_frame(), b.position_frame()) else {
            generated.push(Vec::new());
            continue;
        };
        let (start, end) = (real_ts[k], real_ts[k + 1]);

        let result = interpolate(
            Keyframe {
                timestamp: start,
                frame: from,
            },
            Keyframe {
                timestamp: end,
                frame: to,
            },
            settings.steps_per_interval,
            settings.easing,
        );

        if result.degenerate {
            degenerate_pairs += 1;
        }
        if result.synthetic_timestamps {
            let retimed_end = start.saturating_add(closing_offset);
            warn!(
                "Position frames at {} and {} are not increasing in time; \
                 fabricated in-between timestamps and moved the later frame to {}",
                start, end, retimed_end
            );
            real_ts[k + 1] = retimed_end;
            retimed_pairs.push(RetimedPair {
                start,
                end,
                retimed_end,
            });
        }

        generated.push(
            result
                .frames
                .into_iter()
                .map(|(ts, frame)| TimelineEvent::synthetic_position(ts, frame))
                .collect(),
        );
    }

    if degenerate_pairs == pairs {
        return Err(TimelineError::DegenerateData {
            pairs,
            degenerate: degenerate_pairs,
        });
    }
    if degenerate_pairs > 0 {
        warn!(
            "{} of {} position frame pairs show no movement",
            degenerate_pairs, pairs
        );
    }

    let synthetic_frames: usize = generated.iter().map(Vec::len).sum();
    let mut expanded = Vec::with_capacity(events.len() + synthetic_frames);
    let mut pending = generated.into_iter();
    let last_real = real[real.len() - 1];
    let mut retimed = real_ts.into_iter();

    // Each pair's frames follow its first keyframe, so position frames sharing
    // a timestamp keep source order. Ties across channels go by declaration
    // order in the final sort.
    for (index, mut event) in events.into_iter().enumerate() {
        let is_real = event.is_real_position();
        if is_real {
            if let Some(ts) = retimed.next() {
                event.timestamp = ts;
            }
        }
        expanded.push(event);
        if is_real && index != last_real {
            if let Some(frames) = pending.next() {
                expanded.extend(frames);
            }
        }
    }
    sort_timeline_by_channel(&mut expanded, channel_order);

    debug!(
        "Expanded {} real position frames with {} synthetic frames",
        real.len(),
        synthetic_frames
    );

    Ok(Expansion {
        events: expanded,
        real_frames: real.len(),
        synthetic_frames,
        pairs,
        degenerate_pairs,
        retimed_pairs,
    })
}

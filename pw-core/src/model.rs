//! Timeline data model
//!
//! Defines the channel taxonomy, the per-channel payloads and the
//! `TimelineEvent` that the builder emits and the playback engine consumes.
//!
//! Timestamps are integer milliseconds since the Unix epoch. Static events
//! are pinned to timestamp 0 and always sort ahead of dynamic events.
//!
//! Coordinate system: circuit-local, as delivered by the timing feed
//! - X/Y: track plane
//! - Z: elevation

use crate::units::*;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// A fully-resolved session: channel name -> channel payload, in declaration order
pub type SessionData = Map<String, Value>;

/// Field names checked, in order, for an entry's own timestamp
pub const PRIMARY_TIMESTAMP_FIELDS: &[&str] = &["timestamp", "Timestamp"];

/// Fallback field names checked when the primary field is absent or unparsable
pub const SECONDARY_TIMESTAMP_FIELDS: &[&str] = &["date", "Date", "Utc"];

/// Logical stream of session data
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Channel {
    Position,
    CarTelemetry,
    TimingDelta,
    RaceControl,
    TeamRadio,
    /// Catch-all for channels without declared semantics (session info, roster, weather)
    Other(String),
}

impl Channel {
    /// Map an input channel key to its channel, case-insensitively
    pub fn from_key(key: &str) -> Self {
        match key.to_ascii_lowercase().as_str() {
            "position" | "location" => Channel::Position,
            "cardata" | "car_data" | "cartelemetry" | "car_telemetry" => Channel::CarTelemetry,
            "timingdata" | "intervals" | "timingdelta" | "timing_delta" => Channel::TimingDelta,
            "racecontrolmessages" | "race_control" | "racecontrol" => Channel::RaceControl,
            "teamradio" | "team_radio" => Channel::TeamRadio,
            _ => Channel::Other(key.to_string()),
        }
    }

    /// Key under which this channel's state lives in a snapshot
    pub fn as_str(&self) -> &str {
        match self {
            Channel::Position => "Position",
            Channel::CarTelemetry => "CarTelemetry",
            Channel::TimingDelta => "TimingDelta",
            Channel::RaceControl => "RaceControl",
            Channel::TeamRadio => "TeamRadio",
            Channel::Other(name) => name,
        }
    }

    /// Whether this channel keeps a bounded latest-N buffer instead of a merged tree
    pub fn is_buffered(&self) -> bool {
        matches!(self, Channel::Position | Channel::CarTelemetry)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 3D vector with typed components
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vector3<T> {
    pub x: T,
    pub y: T,
    pub z: T,
}

impl<T> Vector3<T> {
    pub fn new(x: T, y: T, z: T) -> Self {
        Self { x, y, z }
    }
}

impl Vector3<f64> {
    /// Linear interpolation towards `other` by factor `t`
    pub fn lerp(&self, other: &Self, t: f64) -> Self {
        Self {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
            z: self.z + (other.z - self.z) * t,
        }
    }

    pub fn distance(&self, other: &Self) -> f64 {
        let (dx, dy, dz) = (other.x - self.x, other.y - self.y, other.z - self.z);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Coordinates of every entity (car) at one instant
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionFrame {
    pub entities: BTreeMap<String, Vector3<f64>>,
}

impl PositionFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entity: impl Into<String>, coords: Vector3<f64>) {
        self.entities.insert(entity.into(), coords);
    }

    pub fn get(&self, entity: &str) -> Option<&Vector3<f64>> {
        self.entities.get(entity)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn entity_ids(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }
}

/// One car telemetry row
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CarSample {
    /// Driver / car number the sample belongs to
    pub driver: Option<String>,

    pub speed: Option<KilometersPerHour>,

    pub rpm: Option<Rpm>,

    /// Current gear (0 = neutral)
    pub gear: Option<i8>,

    pub throttle: Option<Percent>,

    pub brake: Option<Percent>,

    /// Raw DRS state code from the feed
    pub drs: Option<u8>,

    /// Feed-specific data that doesn't fit the declared schema
    #[serde(flatten)]
    pub extras: BTreeMap<String, Value>,
}

impl CarSample {
    const DRIVER_FIELDS: &'static [&'static str] =
        &["driver_number", "driver", "Driver", "racing_number"];
    const GEAR_FIELDS: &'static [&'static str] = &["n_gear", "gear", "Gear"];

    /// Build a sample from a raw feed row; unknown keys land in `extras`
    pub fn from_json(row: &Map<String, Value>) -> Self {
        let mut extras = BTreeMap::new();
        for (key, value) in row {
            let consumed = Self::DRIVER_FIELDS.contains(&key.as_str())
                || Self::GEAR_FIELDS.contains(&key.as_str())
                || PRIMARY_TIMESTAMP_FIELDS.contains(&key.as_str())
                || SECONDARY_TIMESTAMP_FIELDS.contains(&key.as_str())
                || matches!(key.as_str(), "speed" | "rpm" | "throttle" | "brake" | "drs");
            if !consumed {
                extras.insert(key.clone(), value.clone());
            }
        }

        Self {
            driver: field(row, Self::DRIVER_FIELDS).and_then(entity_key),
            speed: number_field(row, &["speed"]).map(KilometersPerHour),
            rpm: number_field(row, &["rpm"]).map(Rpm),
            gear: number_field(row, Self::GEAR_FIELDS).map(|g| g as i8),
            throttle: number_field(row, &["throttle"]).map(Percent::new),
            brake: number_field(row, &["brake"]).map(Percent::new),
            drs: number_field(row, &["drs"]).map(|d| d as u8),
            extras,
        }
    }
}

/// Channel-specific payload of a timeline event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    Position(PositionFrame),
    CarTelemetry(CarSample),
    /// Incremental update merged into the channel's accumulated tree
    Delta(Value),
    /// Baseline data loaded once before playback
    Static(Value),
}

impl EventPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::Position(_) => "position",
            EventPayload::CarTelemetry(_) => "car_telemetry",
            EventPayload::Delta(_) => "delta",
            EventPayload::Static(_) => "static",
        }
    }
}

/// One entry of the built timeline. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub timestamp: i64,
    pub channel: Channel,
    pub payload: EventPayload,
    pub is_static: bool,
    pub is_synthetic: bool,
}

impl TimelineEvent {
    pub fn dynamic(timestamp: i64, channel: Channel, payload: EventPayload) -> Self {
        Self {
            timestamp,
            channel,
            payload,
            is_static: false,
            is_synthetic: false,
        }
    }

    pub fn static_data(channel: Channel, value: Value) -> Self {
        Self {
            timestamp: 0,
            channel,
            payload: EventPayload::Static(value),
            is_static: true,
            is_synthetic: false,
        }
    }

    /// An interpolated position frame
    pub fn synthetic_position(timestamp: i64, frame: PositionFrame) -> Self {
        Self {
            timestamp,
            channel: Channel::Position,
            payload: EventPayload::Position(frame),
            is_static: false,
            is_synthetic: true,
        }
    }

    pub fn position_frame(&self) -> Option<&PositionFrame> {
        match &self.payload {
            EventPayload::Position(frame) => Some(frame),
            _ => None,
        }
    }

    /// A position frame that came from the source rather than the interpolator
    pub fn is_real_position(&self) -> bool {
        !self.is_synthetic && self.channel == Channel::Position && self.position_frame().is_some()
    }
}

/// Sort a timeline in place: static events first, then ascending timestamp.
///
/// The sort is stable, so events sharing a timestamp keep the order in which
/// they were produced (channel declaration order, then entry order).
pub fn sort_timeline(events: &mut [TimelineEvent]) {
    events.sort_by_key(|e| (!e.is_static, e.timestamp));
}

/// Sort like `sort_timeline`, breaking timestamp ties by the channel's
/// position in `channel_order`. Channels missing from it rank last.
pub fn sort_timeline_by_channel(events: &mut [TimelineEvent], channel_order: &[Channel]) {
    events.sort_by_cached_key(|e| {
        let rank = channel_order
            .iter()
            .position(|c| *c == e.channel)
            .unwrap_or(channel_order.len());
        (!e.is_static, e.timestamp, rank)
    });
}

/// First present field among `names`
pub(crate) fn field<'a>(map: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| map.get(*name))
}

/// First present field among `names`, read as a number
pub(crate) fn number_field(map: &Map<String, Value>, names: &[&str]) -> Option<f64> {
    field(map, names).and_then(Value::as_f64)
}

/// Render a driver / entity identifier from either a number or a string
pub(crate) fn entity_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(match n.as_i64() {
            Some(i) => i.to_string(),
            None => n.to_string(),
        }),
        _ => None,
    }
}

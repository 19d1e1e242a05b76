//! Incremental state merge
//!
//! The engine state is a map from channel name to accumulated value.
//! Position and car telemetry keep a bounded buffer of their latest entries
//! (consumers only ever read the newest one); every other channel is a JSON
//! tree that deltas are merged into recursively, the last write winning at
//! the leaves and sibling keys surviving.

use crate::error::MergeError;
use crate::model::{CarSample, Channel, EventPayload, PositionFrame, TimelineEvent};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, VecDeque};

/// Default number of position frames retained
pub const DEFAULT_POSITION_BUFFER: usize = 10;

/// Default number of car telemetry rows retained
pub const DEFAULT_TELEMETRY_BUFFER: usize = 64;

/// Recursively merge `delta` into `target`.
///
/// Objects merge key by key; anything else (arrays, scalars, null) replaces
/// the value at that position.
pub fn deep_merge(target: &mut Value, delta: &Value) {
    match (target, delta) {
        (Value::Object(target), Value::Object(delta)) => {
            for (key, value) in delta {
                match target.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, delta) => *target = delta.clone(),
    }
}

/// Append-and-trim buffer keeping the latest `capacity` entries
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoundedBuffer<T> {
    entries: VecDeque<T>,
    #[serde(skip)]
    capacity: usize,
}

impl<T> BoundedBuffer<T> {
    /// Capacity is at least one entry
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, entry: T) {
        self.entries.push_back(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn latest(&self) -> Option<&T> {
        self.entries.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// A buffered entry together with the event time it was recorded at
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stamped<T> {
    pub timestamp: i64,
    pub synthetic: bool,
    pub data: T,
}

/// Accumulated value of one channel
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ChannelState {
    Positions(BoundedBuffer<Stamped<PositionFrame>>),
    CarTelemetry(BoundedBuffer<Stamped<CarSample>>),
    Merged(Value),
}

impl ChannelState {
    fn kind(&self) -> &'static str {
        match self {
            ChannelState::Positions(_) => "position buffer",
            ChannelState::CarTelemetry(_) => "telemetry buffer",
            ChannelState::Merged(_) => "merged",
        }
    }
}

/// Capacities of the buffered channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferLimits {
    pub position: usize,
    pub car_telemetry: usize,
}

impl Default for BufferLimits {
    fn default() -> Self {
        Self {
            position: DEFAULT_POSITION_BUFFER,
            car_telemetry: DEFAULT_TELEMETRY_BUFFER,
        }
    }
}

/// Cumulative engine state: channel name -> accumulated value
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    channels: BTreeMap<String, ChannelState>,
    #[serde(skip)]
    limits: BufferLimits,
}

impl Snapshot {
    pub fn new(limits: BufferLimits) -> Self {
        Self {
            channels: BTreeMap::new(),
            limits,
        }
    }

    /// Merge one event into the state
    pub fn apply(&mut self, event: &TimelineEvent) -> Result<(), MergeError> {
        let key = event.channel.as_str();

        match (&event.channel, &event.payload) {
            (Channel::Position, EventPayload::Position(frame)) => {
                let limit = self.limits.position;
                let state = self
                    .channels
                    .entry(key.to_string())
                    .or_insert_with(|| ChannelState::Positions(BoundedBuffer::new(limit)));
                match state {
                    ChannelState::Positions(buffer) => {
                        buffer.push(stamped(event, frame.clone()));
                        Ok(())
                    }
                    other => Err(state_mismatch(key, other)),
                }
            }
            (Channel::CarTelemetry, EventPayload::CarTelemetry(sample)) => {
                let limit = self.limits.car_telemetry;
                let state = self
                    .channels
                    .entry(key.to_string())
                    .or_insert_with(|| ChannelState::CarTelemetry(BoundedBuffer::new(limit)));
                match state {
                    ChannelState::CarTelemetry(buffer) => {
                        buffer.push(stamped(event, sample.clone()));
                        Ok(())
                    }
                    other => Err(state_mismatch(key, other)),
                }
            }
            (channel, EventPayload::Delta(delta) | EventPayload::Static(delta))
                if !channel.is_buffered() =>
            {
                let state = self
                    .channels
                    .entry(key.to_string())
                    .or_insert_with(|| ChannelState::Merged(Value::Object(Map::new())));
                match state {
                    ChannelState::Merged(tree) => {
                        deep_merge(tree, delta);
                        Ok(())
                    }
                    other => Err(state_mismatch(key, other)),
                }
            }
            (channel, payload) => Err(MergeError::PayloadMismatch {
                channel: channel.to_string(),
                payload: payload.kind(),
            }),
        }
    }

    pub fn get(&self, channel: &str) -> Option<&ChannelState> {
        self.channels.get(channel)
    }

    /// Newest position frame, if any has been applied
    pub fn latest_position(&self) -> Option<&Stamped<PositionFrame>> {
        match self.channels.get(Channel::Position.as_str()) {
            Some(ChannelState::Positions(buffer)) => buffer.latest(),
            _ => None,
        }
    }

    pub fn latest_car_sample(&self) -> Option<&Stamped<CarSample>> {
        match self.channels.get(Channel::CarTelemetry.as_str()) {
            Some(ChannelState::CarTelemetry(buffer)) => buffer.latest(),
            _ => None,
        }
    }

    /// Merged tree of a non-buffered channel
    pub fn merged(&self, channel: &str) -> Option<&Value> {
        match self.channels.get(channel) {
            Some(ChannelState::Merged(tree)) => Some(tree),
            _ => None,
        }
    }

    pub fn channel_names(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }

    pub fn limits(&self) -> BufferLimits {
        self.limits
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

fn stamped<T>(event: &TimelineEvent, data: T) -> Stamped<T> {
    Stamped {
        timestamp: event.timestamp,
        synthetic: event.is_synthetic,
        data,
    }
}

fn state_mismatch(channel: &str, existing: &ChannelState) -> MergeError {
    MergeError::StateMismatch {
        channel: channel.to_string(),
        existing: existing.kind(),
    }
}

//! Timeline builder
//!
//! Flattens a channel-keyed session object into one time-sorted stream of
//! `TimelineEvent`s and densifies its position channel.
//!
//! Each channel value is classified by its structure:
//! - an array holding timestamped entries: one event per entry
//! - an object with a `Position` array: one position frame per element
//! - an object whose every key is a timestamp: one event per key
//! - anything else: loaded once as static data
//!
//! Bad entries never abort a build; they are skipped and recorded as
//! `Diagnostic`s in the `BuildReport`.

use crate::error::TimelineError;
use crate::interpolate::{expand_timeline, InterpolationSettings, QualityPreset};
use crate::model::*;
use chrono::{DateTime, NaiveDateTime};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

/// Field names that hold an entity map inside a position entry
const ENTITY_MAP_FIELDS: &[&str] = &["Entries", "entries", "entities"];

/// Field names that identify the entity of a single-entity position sample
const ENTITY_ID_FIELDS: &[&str] = &["driver_number", "driver", "entity"];

/// Smallest integer key accepted as an epoch-ms timestamp in a keyed
/// dictionary (1973-03-03). Smaller integers are roster keys, not times.
const MIN_EPOCH_MS_KEY: i64 = 100_000_000_000;

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// A recoverable problem found while flattening
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// An entry was skipped because required sub-fields were missing
    MalformedEvent {
        channel: String,
        index: usize,
        reason: String,
    },
    /// An entry had no usable timestamp and was given a fabricated one
    SyntheticTimestamp {
        channel: String,
        index: usize,
        timestamp: i64,
    },
    /// Two position frames were not increasing in time. The frames between
    /// them got fabricated timestamps and the later one moved to `retimed_end`.
    FabricatedInterval {
        start: i64,
        end: i64,
        retimed_end: i64,
    },
}

/// Summary of a build, returned alongside the timeline
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BuildReport {
    pub diagnostics: Vec<Diagnostic>,
    pub static_events: usize,
    pub dynamic_events: usize,
    pub real_position_frames: usize,
    pub synthetic_frames: usize,
    pub pairs: usize,
    pub degenerate_pairs: usize,
}

impl BuildReport {
    pub fn malformed_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| matches!(d, Diagnostic::MalformedEvent { .. }))
            .count()
    }

    pub fn synthetic_timestamp_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| matches!(d, Diagnostic::SyntheticTimestamp { .. }))
            .count()
    }

    pub fn fabricated_interval_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| matches!(d, Diagnostic::FabricatedInterval { .. }))
            .count()
    }
}

/// A built, sorted, immutable timeline
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    events: Vec<TimelineEvent>,
    static_len: usize,
    report: BuildReport,
}

impl Timeline {
    /// Wrap already-built events, sorting them into timeline order
    pub fn from_events(mut events: Vec<TimelineEvent>) -> Self {
        sort_timeline(&mut events);
        let static_len = events.iter().take_while(|e| e.is_static).count();
        let report = BuildReport {
            static_events: static_len,
            dynamic_events: events.len() - static_len,
            real_position_frames: events.iter().filter(|e| e.is_real_position()).count(),
            synthetic_frames: events.iter().filter(|e| e.is_synthetic).count(),
            ..Default::default()
        };
        Self {
            events,
            static_len,
            report,
        }
    }

    pub fn events(&self) -> &[TimelineEvent] {
        &self.events
    }

    pub fn static_events(&self) -> &[TimelineEvent] {
        &self.events[..self.static_len]
    }

    pub fn dynamic_events(&self) -> &[TimelineEvent] {
        &self.events[self.static_len..]
    }

    pub fn report(&self) -> &BuildReport {
        &self.report
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Flattened session before interpolation
#[derive(Debug, Clone, Default)]
pub struct Flattened {
    pub events: Vec<TimelineEvent>,
    pub diagnostics: Vec<Diagnostic>,
    /// Channels in the order the session declares them
    pub channel_order: Vec<Channel>,
}

/// Builds timelines at a fixed interpolation quality
#[derive(Debug, Clone, Copy, Default)]
pub struct TimelineBuilder {
    settings: InterpolationSettings,
}

impl TimelineBuilder {
    pub fn new(settings: InterpolationSettings) -> Self {
        Self { settings }
    }

    pub fn with_preset(preset: QualityPreset) -> Self {
        Self::new(preset.settings())
    }

    pub fn settings(&self) -> InterpolationSettings {
        self.settings
    }

    /// Build from an arbitrary JSON document, which must be an object
    pub fn build_value(&self, session: &Value) -> Result<Timeline, TimelineError> {
        match session {
            Value::Object(map) => self.build(map),
            _ => Err(TimelineError::NotAnObject),
        }
    }

    /// Flatten, interpolate and sort a session
    pub fn build(&self, session: &SessionData) -> Result<Timeline, TimelineError> {
        let Flattened {
            events,
            mut diagnostics,
            channel_order,
        } = flatten_session(session);
        let static_events = events.iter().filter(|e| e.is_static).count();

        let expansion = expand_timeline(events, self.settings, &channel_order)?;
        diagnostics.extend(expansion.retimed_pairs.iter().map(|pair| {
            Diagnostic::FabricatedInterval {
                start: pair.start,
                end: pair.end,
                retimed_end: pair.retimed_end,
            }
        }));

        let report = BuildReport {
            diagnostics,
            static_events,
            dynamic_events: expansion.events.len() - static_events,
            real_position_frames: expansion.real_frames,
            synthetic_frames: expansion.synthetic_frames,
            pairs: expansion.pairs,
            degenerate_pairs: expansion.degenerate_pairs,
        };

        info!(
            "Built timeline: {} events ({} static, {} real position frames, {} synthetic), {} diagnostics",
            expansion.events.len(),
            report.static_events,
            report.real_position_frames,
            report.synthetic_frames,
            report.diagnostics.len()
        );

        Ok(Timeline {
            events: expansion.events,
            static_len: static_events,
            report,
        })
    }
}

/// Flatten every channel of a session into sorted events, without interpolation.
/// Events sharing a timestamp keep the session's channel order.
pub fn flatten_session(session: &SessionData) -> Flattened {
    let mut out = Flattened::default();

    for (key, value) in session {
        let channel = Channel::from_key(key);
        let shape = detect_shape(value);
        let used = match shape {
            Shape::PositionContainer { .. } => Channel::Position,
            _ => channel.clone(),
        };
        if !out.channel_order.contains(&used) {
            out.channel_order.push(used);
        }
        match shape {
            Shape::Entries(entries) => {
                let mut flattener = ChannelFlattener::new(key, channel, &mut out);
                for (index, entry) in entries.iter().enumerate() {
                    flattener.push_entry(index, entry, None, None);
                }
            }
            Shape::PositionContainer { frames, parent } => {
                let mut flattener = ChannelFlattener::new(key, Channel::Position, &mut out);
                for (index, entry) in frames.iter().enumerate() {
                    flattener.push_entry(index, entry, parent, None);
                }
            }
            Shape::Keyed(entries) => {
                let mut flattener = ChannelFlattener::new(key, channel, &mut out);
                for (index, (timestamp, dict_key, entry)) in entries.into_iter().enumerate() {
                    flattener.push_entry(index, entry, Some(timestamp), Some(dict_key));
                }
            }
            Shape::Static if channel.is_buffered() => {
                record_malformed(
                    &mut out.diagnostics,
                    key,
                    0,
                    "no timestamped entries in a buffered channel",
                );
            }
            Shape::Static => out.events.push(TimelineEvent::static_data(channel, value.clone())),
        }
    }

    sort_timeline_by_channel(&mut out.events, &out.channel_order);
    out
}

/// Parse a timestamp value into epoch milliseconds
pub fn parse_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.round() as i64)),
        Value::String(s) => parse_date(s).or_else(|| s.trim().parse::<i64>().ok()),
        _ => None,
    }
}

fn parse_date(s: &str) -> Option<i64> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(dt.timestamp_millis());
    }
    NAIVE_FORMATS.iter().find_map(|fmt| {
        NaiveDateTime::parse_from_str(s, fmt)
            .ok()
            .map(|naive| naive.and_utc().timestamp_millis())
    })
}

/// Dictionary keys must look like real times, not small integers
fn parse_key_timestamp(key: &str) -> Option<i64> {
    parse_date(key).or_else(|| {
        key.trim()
            .parse::<i64>()
            .ok()
            .filter(|ms| *ms >= MIN_EPOCH_MS_KEY)
    })
}

fn own_timestamp(entry: &Map<String, Value>) -> Option<i64> {
    field(entry, PRIMARY_TIMESTAMP_FIELDS)
        .and_then(parse_timestamp)
        .or_else(|| field(entry, SECONDARY_TIMESTAMP_FIELDS).and_then(parse_timestamp))
}

fn has_timestamp_field(entry: &Value) -> bool {
    entry.as_object().is_some_and(|o| {
        field(o, PRIMARY_TIMESTAMP_FIELDS).is_some()
            || field(o, SECONDARY_TIMESTAMP_FIELDS).is_some()
    })
}

enum Shape<'a> {
    Entries(&'a [Value]),
    PositionContainer {
        frames: &'a [Value],
        parent: Option<i64>,
    },
    Keyed(Vec<(i64, &'a str, &'a Value)>),
    Static,
}

fn detect_shape(value: &Value) -> Shape<'_> {
    match value {
        Value::Array(entries) if entries.iter().any(has_timestamp_field) => Shape::Entries(entries),
        Value::Object(map) => {
            if let Some(Value::Array(frames)) = map.get("Position").or_else(|| map.get("position")) {
                return Shape::PositionContainer {
                    frames,
                    parent: own_timestamp(map),
                };
            }
            if map.is_empty() {
                return Shape::Static;
            }
            let keyed: Option<Vec<_>> = map
                .iter()
                .map(|(k, v)| parse_key_timestamp(k).map(|ts| (ts, k.as_str(), v)))
                .collect();
            keyed.map_or(Shape::Static, Shape::Keyed)
        }
        _ => Shape::Static,
    }
}

enum PositionEntry {
    Frame(PositionFrame),
    Single(String, Vector3<f64>),
}

enum Converted {
    /// One entity's sample, merged into a frame with the same timestamp
    Single(String, Vector3<f64>),
    Payload(EventPayload),
}

fn coordinates(obj: &Map<String, Value>) -> Option<Vector3<f64>> {
    let x = number_field(obj, &["X", "x"])?;
    let y = number_field(obj, &["Y", "y"])?;
    let z = number_field(obj, &["Z", "z"]).unwrap_or(0.0);
    Some(Vector3::new(x, y, z))
}

fn position_entry(entry: &Value) -> Result<PositionEntry, String> {
    let obj = entry
        .as_object()
        .ok_or_else(|| "position entry is not an object".to_string())?;

    if let Some(map) = field(obj, ENTITY_MAP_FIELDS) {
        let map = map
            .as_object()
            .ok_or_else(|| "entity map is not an object".to_string())?;
        let mut frame = PositionFrame::new();
        for (id, value) in map {
            if let Some(coords) = value.as_object().and_then(coordinates) {
                frame.insert(id.clone(), coords);
            }
        }
        if frame.is_empty() {
            return Err("entity map holds no usable coordinates".to_string());
        }
        return Ok(PositionEntry::Frame(frame));
    }

    match (
        field(obj, ENTITY_ID_FIELDS).and_then(entity_key),
        coordinates(obj),
    ) {
        (Some(id), Some(coords)) => Ok(PositionEntry::Single(id, coords)),
        _ => Err("missing entity map".to_string()),
    }
}

fn record_malformed(diagnostics: &mut Vec<Diagnostic>, channel: &str, index: usize, reason: &str) {
    warn!(
        "Skipping malformed {} entry #{}: {}",
        channel, index, reason
    );
    diagnostics.push(Diagnostic::MalformedEvent {
        channel: channel.to_string(),
        index,
        reason: reason.to_string(),
    });
}

/// Per-channel flattening state
struct ChannelFlattener<'a> {
    key: &'a str,
    channel: Channel,
    last_timestamp: Option<i64>,
    /// Index and time of the last frame built from single-entity samples
    open_frame: Option<(usize, i64)>,
    out: &'a mut Flattened,
}

impl<'a> ChannelFlattener<'a> {
    fn new(key: &'a str, channel: Channel, out: &'a mut Flattened) -> Self {
        Self {
            key,
            channel,
            last_timestamp: None,
            open_frame: None,
            out,
        }
    }

    fn convert(&self, entry: &Value, dict_key: Option<&str>) -> Result<Converted, String> {
        match self.channel {
            Channel::Position => Ok(match position_entry(entry)? {
                PositionEntry::Single(id, coords) => Converted::Single(id, coords),
                PositionEntry::Frame(frame) => Converted::Payload(EventPayload::Position(frame)),
            }),
            Channel::CarTelemetry => entry
                .as_object()
                .map(|row| Converted::Payload(EventPayload::CarTelemetry(CarSample::from_json(row))))
                .ok_or_else(|| "car telemetry row is not an object".to_string()),
            _ => {
                let delta = match dict_key {
                    Some(k) => {
                        let mut wrapped = Map::new();
                        wrapped.insert(k.to_string(), entry.clone());
                        Value::Object(wrapped)
                    }
                    None => entry.clone(),
                };
                Ok(Converted::Payload(EventPayload::Delta(delta)))
            }
        }
    }

    fn push_entry(
        &mut self,
        index: usize,
        entry: &Value,
        parent: Option<i64>,
        dict_key: Option<&str>,
    ) {
        let converted = match self.convert(entry, dict_key) {
            Ok(converted) => converted,
            Err(reason) => {
                record_malformed(&mut self.out.diagnostics, self.key, index, &reason);
                return;
            }
        };
        let timestamp = self.resolve_timestamp(index, entry, parent);

        match converted {
            Converted::Single(id, coords) => {
                if let Some((open, open_ts)) = self.open_frame {
                    if open_ts == timestamp {
                        if let EventPayload::Position(frame) = &mut self.out.events[open].payload {
                            frame.insert(id, coords);
                            return;
                        }
                    }
                }
                let mut frame = PositionFrame::new();
                frame.insert(id, coords);
                self.open_frame = Some((self.out.events.len(), timestamp));
                self.push(timestamp, EventPayload::Position(frame));
            }
            Converted::Payload(payload) => {
                self.open_frame = None;
                self.push(timestamp, payload);
            }
        }
    }

    /// Own field, then parent container, then `previous + 1`
    fn resolve_timestamp(&mut self, index: usize, entry: &Value, parent: Option<i64>) -> i64 {
        let resolved = entry.as_object().and_then(own_timestamp).or(parent);
        let timestamp = match resolved {
            Some(ts) => ts,
            None => {
                let fabricated = self.last_timestamp.map_or(1, |last| last.saturating_add(1));
                warn!(
                    "{} entry #{} has no usable timestamp; using synthetic {}",
                    self.key, index, fabricated
                );
                self.out.diagnostics.push(Diagnostic::SyntheticTimestamp {
                    channel: self.key.to_string(),
                    index,
                    timestamp: fabricated,
                });
                fabricated
            }
        };
        self.last_timestamp = Some(timestamp);
        timestamp
    }

    fn push(&mut self, timestamp: i64, payload: EventPayload) {
        self.out
            .events
            .push(TimelineEvent::dynamic(timestamp, self.channel.clone(), payload));
    }
}

//! Demo source that generates a synthetic race session
//!
//! Simulates a field of cars lapping a circuit made of straights, braking
//! zones, corners and acceleration phases, and renders it in the same
//! channel shapes a live-timing archive uses. Position is sampled sparsely
//! so the replay has to interpolate. Output is deterministic for a given
//! `DemoConfig`.

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use pw_core::source::{SessionSource, SessionSummary, SourceError};
use pw_core::SessionData;
use serde_json::{json, Map, Value};
use std::f64::consts::TAU;

// =============================================================================
// Track definition
// =============================================================================

#[derive(Clone, Copy, PartialEq)]
enum SegmentKind {
    Straight,
    Braking,
    Corner,
    Accel,
}

#[derive(Clone, Copy)]
struct TrackSegment {
    kind: SegmentKind,
    duration: f64,     // seconds at reference pace
    target_speed: f64, // km/h at end of segment
}

fn seg(kind: SegmentKind, duration: f64, target_speed: f64) -> TrackSegment {
    TrackSegment {
        kind,
        duration,
        target_speed,
    }
}

/// ~94.5 s lap
fn demo_track() -> Vec<TrackSegment> {
    use SegmentKind::*;
    vec![
        seg(Straight, 10.0, 315.0),
        // T1 hairpin
        seg(Braking, 2.5, 95.0),
        seg(Corner, 3.0, 90.0),
        seg(Accel, 4.0, 230.0),
        seg(Straight, 6.0, 290.0),
        // T4 medium right
        seg(Braking, 2.0, 175.0),
        seg(Corner, 4.0, 170.0),
        seg(Accel, 3.0, 240.0),
        // back straight, DRS zone
        seg(Straight, 12.0, 320.0),
        // chicane
        seg(Braking, 2.5, 120.0),
        seg(Corner, 2.0, 115.0),
        seg(Corner, 2.0, 110.0),
        seg(Accel, 4.0, 250.0),
        seg(Straight, 8.0, 300.0),
        // fast sweeper
        seg(Braking, 2.0, 200.0),
        seg(Corner, 6.0, 195.0),
        seg(Accel, 3.0, 240.0),
        // final hairpin
        seg(Braking, 3.0, 80.0),
        seg(Corner, 4.5, 75.0),
        seg(Accel, 5.0, 220.0),
        seg(Straight, 6.0, 300.0),
    ]
}

/// Point on the circuit at `fraction` of a lap, in decimetres
fn track_point(fraction: f64) -> (f64, f64, f64) {
    let theta = fraction.rem_euclid(1.0) * TAU;
    let x = 4_200.0 * theta.cos() + 900.0 * (2.0 * theta).cos();
    let y = 2_600.0 * theta.sin() - 400.0 * (3.0 * theta).sin();
    let z = 60.0 * theta.sin();
    (x, y, z)
}

// =============================================================================
// Car state derived from track position
// =============================================================================

struct LapState {
    kind: SegmentKind,
    speed: f64,
    throttle: f64,
    brake: f64,
    gear: i8,
    rpm: f64,
}

fn compute_lap_state(track: &[TrackSegment], lap_time: f64) -> LapState {
    let lap_duration: f64 = track.iter().map(|s| s.duration).sum();
    let t = lap_time.rem_euclid(lap_duration);

    let mut elapsed = 0.0;
    let mut seg_idx = track.len() - 1;
    for (i, seg) in track.iter().enumerate() {
        if elapsed + seg.duration > t {
            seg_idx = i;
            break;
        }
        elapsed += seg.duration;
    }

    let seg = track[seg_idx];
    let seg_t = ((t - elapsed) / seg.duration).clamp(0.0, 1.0);
    let prev_target = track[(seg_idx + track.len() - 1) % track.len()].target_speed;

    let smooth_t = smoothstep(seg_t);
    let speed = lerp(prev_target, seg.target_speed, smooth_t);

    let (throttle, brake) = match seg.kind {
        SegmentKind::Straight => (100.0, 0.0),
        SegmentKind::Braking => (0.0, 100.0),
        SegmentKind::Corner => (20.0 + 30.0 * seg_t, 0.0),
        SegmentKind::Accel => (50.0 + 50.0 * smooth_t, 0.0),
    };

    let gear = speed_to_gear(speed);
    LapState {
        kind: seg.kind,
        speed,
        throttle,
        brake,
        gear,
        rpm: speed_to_rpm(speed, gear),
    }
}

fn smoothstep(t: f64) -> f64 {
    let t = t.clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

/// Upshift points in km/h for gears 1..=7
const SHIFT_POINTS: [f64; 7] = [95.0, 130.0, 160.0, 190.0, 220.0, 255.0, 290.0];

fn speed_to_gear(kph: f64) -> i8 {
    SHIFT_POINTS.iter().take_while(|p| kph >= **p).count() as i8 + 1
}

fn speed_to_rpm(kph: f64, gear: i8) -> f64 {
    let idx = (gear - 1) as usize;
    let lower = if idx == 0 { 0.0 } else { SHIFT_POINTS[idx - 1] };
    let upper = SHIFT_POINTS.get(idx).copied().unwrap_or(340.0);
    let band = ((kph - lower) / (upper - lower)).clamp(0.0, 1.0);
    (9_500.0 + band * 2_500.0).clamp(4_000.0, 12_500.0)
}

/// Simple deterministic noise from a seed
fn noise(seed: f64) -> f64 {
    let x = (seed * 12.9898 + 78.233).sin() * 43_758.547;
    x - x.floor()
}

/// Small jitter centered around 0
fn jitter(seed: f64, amplitude: f64) -> f64 {
    (noise(seed) - 0.5) * 2.0 * amplitude
}

// =============================================================================
// Field
// =============================================================================

/// (number, tla, full name, team)
const ENTRY_LIST: [(&str, &str, &str, &str); 10] = [
    ("1", "RIV", "Alex Rivera", "Apex Racing"),
    ("22", "CHE", "Sam Chen", "Velocity Motorsport"),
    ("7", "MOR", "Lena Moreau", "Apex Racing"),
    ("44", "OKA", "Kenji Okafor", "Northline GP"),
    ("16", "SIL", "Marta Silva", "Velocity Motorsport"),
    ("63", "HOL", "Finn Holm", "Northline GP"),
    ("4", "DUB", "Theo Dubois", "Crestwood"),
    ("81", "PAR", "Iris Park", "Crestwood"),
    ("11", "NAV", "Diego Navarro", "Stratos Team"),
    ("55", "KOV", "Ana Kovac", "Stratos Team"),
];

/// Grid slot spacing, in laps
const GRID_SPACING: f64 = 0.004;

struct Car {
    number: &'static str,
    tla: &'static str,
    name: &'static str,
    team: &'static str,
    slot: usize,
    lap_duration: f64,
}

impl Car {
    /// Laps covered at `t` seconds after the start (negative on the grid)
    fn distance(&self, t: f64, frozen: bool) -> f64 {
        let grid = -(self.slot as f64) * GRID_SPACING;
        if frozen {
            return grid;
        }
        let race_time = (t - self.slot as f64 * 0.5).max(0.0);
        grid + race_time / self.lap_duration
    }
}

// =============================================================================
// DemoSource
// =============================================================================

/// Shape of one generated session
#[derive(Debug, Clone, PartialEq)]
pub struct DemoConfig {
    pub name: String,
    pub drivers: usize,
    pub duration_secs: u32,
    pub position_interval_ms: i64,
    pub car_data_interval_ms: i64,
    pub timing_interval_ms: i64,
    /// Session start, epoch ms
    pub start_ms: i64,
    /// Placeholder data: every car parked on its grid slot
    pub frozen: bool,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            name: "Race".to_string(),
            drivers: ENTRY_LIST.len(),
            duration_secs: 20 * 60,
            position_interval_ms: 4_000,
            car_data_interval_ms: 1_000,
            timing_interval_ms: 5_000,
            start_ms: 1_709_391_600_000, // 2024-03-02T15:00:00Z
            frozen: false,
        }
    }
}

impl DemoConfig {
    pub fn sprint() -> Self {
        Self {
            name: "Sprint".to_string(),
            drivers: 6,
            duration_secs: 5 * 60,
            ..Default::default()
        }
    }

    pub fn placeholder() -> Self {
        Self {
            name: "Placeholder".to_string(),
            drivers: 6,
            duration_secs: 2 * 60,
            frozen: true,
            ..Default::default()
        }
    }

    fn end_ms(&self) -> i64 {
        self.start_ms + i64::from(self.duration_secs) * 1_000
    }

    /// Sample times from start to end inclusive
    fn samples(&self, interval_ms: i64) -> impl Iterator<Item = i64> + '_ {
        let step = interval_ms.max(1) as usize;
        (self.start_ms..=self.end_ms()).step_by(step)
    }
}

pub struct DemoSource {
    track: Vec<TrackSegment>,
    lap_duration: f64,
    sessions: Vec<(String, DemoConfig)>,
}

impl DemoSource {
    pub fn new() -> Self {
        let track = demo_track();
        let lap_duration = track.iter().map(|s| s.duration).sum();
        Self {
            track,
            lap_duration,
            sessions: vec![
                ("race".to_string(), DemoConfig::default()),
                ("sprint".to_string(), DemoConfig::sprint()),
                ("placeholder".to_string(), DemoConfig::placeholder()),
            ],
        }
    }

    /// Register an extra session under `key`
    pub fn with_session(mut self, key: impl Into<String>, config: DemoConfig) -> Self {
        self.sessions.push((key.into(), config));
        self
    }

    fn grid(&self, config: &DemoConfig) -> Vec<Car> {
        ENTRY_LIST
            .iter()
            .take(config.drivers.min(ENTRY_LIST.len()))
            .enumerate()
            .map(|(slot, &(number, tla, name, team))| Car {
                number,
                tla,
                name,
                team,
                slot,
                lap_duration: self.lap_duration * (1.0 + 0.003 * slot as f64),
            })
            .collect()
    }

    /// Build the full channel-keyed session for `config`
    pub fn generate(&self, config: &DemoConfig) -> SessionData {
        let cars = self.grid(config);

        let mut session = SessionData::new();
        session.insert("SessionInfo".into(), session_info(config, self.lap_duration));
        session.insert("DriverList".into(), driver_list(&cars));
        session.insert(
            "Position".into(),
            json!({ "Position": self.position_frames(config, &cars) }),
        );
        session.insert("CarData".into(), Value::Array(self.car_data(config, &cars)));
        session.insert("TimingData".into(), Value::Array(timing(config, &cars)));
        session.insert("RaceControlMessages".into(), race_control(config));
        session.insert("TeamRadio".into(), Value::Array(team_radio(config, &cars)));
        session.insert("WeatherData".into(), Value::Array(weather(config)));
        session
    }

    fn position_frames(&self, config: &DemoConfig, cars: &[Car]) -> Vec<Value> {
        config
            .samples(config.position_interval_ms)
            .map(|ts| {
                let t = (ts - config.start_ms) as f64 / 1_000.0;
                let entries: Map<String, Value> = cars
                    .iter()
                    .map(|car| {
                        let (x, y, z) = track_point(car.distance(t, config.frozen));
                        let status = if config.frozen { "OnGrid" } else { "OnTrack" };
                        (
                            car.number.to_string(),
                            json!({"Status": status, "X": x.round(), "Y": y.round(), "Z": z.round()}),
                        )
                    })
                    .collect();
                json!({"Timestamp": iso(ts), "Entries": entries})
            })
            .collect()
    }

    fn car_data(&self, config: &DemoConfig, cars: &[Car]) -> Vec<Value> {
        let mut rows = Vec::new();
        for ts in config.samples(config.car_data_interval_ms) {
            let t = (ts - config.start_ms) as f64 / 1_000.0;
            for car in cars {
                let seed = ts as f64 / 1_000.0 + car.slot as f64 * 7.3;
                let distance = car.distance(t, config.frozen);
                let row = if config.frozen || distance < 0.0 {
                    json!({
                        "date": iso_offset(ts),
                        "driver_number": number(car.number),
                        "speed": 0,
                        "rpm": 4_000,
                        "n_gear": 0,
                        "throttle": 0,
                        "brake": 0,
                        "drs": 0
                    })
                } else {
                    let lap_time = distance.rem_euclid(1.0) * self.lap_duration;
                    let state = compute_lap_state(&self.track, lap_time);
                    let drs = if state.kind == SegmentKind::Straight && t > 120.0 {
                        12
                    } else {
                        0
                    };
                    json!({
                        "date": iso_offset(ts),
                        "driver_number": number(car.number),
                        "speed": (state.speed + jitter(seed, 2.0)).round().max(0.0),
                        "rpm": (state.rpm + jitter(seed * 1.1, 80.0)).round(),
                        "n_gear": state.gear,
                        "throttle": (state.throttle + jitter(seed * 1.2, 1.5)).clamp(0.0, 100.0).round(),
                        "brake": state.brake,
                        "drs": drs
                    })
                };
                rows.push(row);
            }
        }
        rows
    }
}

impl Default for DemoSource {
    fn default() -> Self {
        Self::new()
    }
}

const CHANNELS: [&str; 8] = [
    "SessionInfo",
    "DriverList",
    "Position",
    "CarData",
    "TimingData",
    "RaceControlMessages",
    "TeamRadio",
    "WeatherData",
];

impl SessionSource for DemoSource {
    fn key(&self) -> &str {
        "demo"
    }

    fn name(&self) -> &str {
        "Demo"
    }

    fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        Ok(self
            .sessions
            .iter()
            .map(|(key, config)| SessionSummary {
                source: self.key().to_string(),
                key: key.clone(),
                name: format!("Demo Grand Prix - {}", config.name),
                channels: CHANNELS.iter().map(|c| c.to_string()).collect(),
            })
            .collect())
    }

    fn load_session(&self, key: &str) -> Result<SessionData> {
        let (_, config) = self
            .sessions
            .iter()
            .find(|(k, _)| k == key)
            .ok_or_else(|| SourceError::NotFound(key.to_string()))?;
        Ok(self.generate(config))
    }
}

// =============================================================================
// Channel renderers
// =============================================================================

fn iso(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_default()
}

/// Same instant with an explicit `+00:00` offset
fn iso_offset(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Micros, false))
        .unwrap_or_default()
}

fn number(racing_number: &str) -> Value {
    racing_number
        .parse::<u64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::from(racing_number))
}

fn session_info(config: &DemoConfig, lap_duration: f64) -> Value {
    json!({
        "Meeting": {
            "Name": "Demo Grand Prix",
            "Circuit": {"ShortName": "Demo Circuit"}
        },
        "Name": config.name,
        "Type": "Race",
        "StartDate": iso(config.start_ms),
        "EndDate": iso(config.end_ms()),
        "ReferenceLapSeconds": lap_duration
    })
}

fn driver_list(cars: &[Car]) -> Value {
    let list: Map<String, Value> = cars
        .iter()
        .map(|car| {
            (
                car.number.to_string(),
                json!({
                    "RacingNumber": car.number,
                    "Tla": car.tla,
                    "FullName": car.name,
                    "TeamName": car.team,
                    "GridPosition": car.slot + 1
                }),
            )
        })
        .collect();
    Value::Object(list)
}

fn format_gap(seconds: f64) -> String {
    format!("+{:.3}", seconds.max(0.0))
}

fn timing(config: &DemoConfig, cars: &[Car]) -> Vec<Value> {
    config
        .samples(config.timing_interval_ms)
        .map(|ts| {
            let t = (ts - config.start_ms) as f64 / 1_000.0;
            let mut order: Vec<(&Car, f64)> = cars
                .iter()
                .map(|car| (car, car.distance(t, config.frozen)))
                .collect();
            order.sort_by(|a, b| b.1.total_cmp(&a.1));

            let leader = order.first().map(|(_, d)| *d).unwrap_or(0.0);
            let mut ahead = leader;
            let mut lines = Map::new();
            for (pos, (car, distance)) in order.iter().enumerate() {
                let gap = (leader - distance) * car.lap_duration;
                let interval = (ahead - distance) * car.lap_duration;
                ahead = *distance;
                let (gap, interval) = match pos {
                    0 => ("LAP".to_string(), String::new()),
                    _ => (format_gap(gap), format_gap(interval)),
                };
                lines.insert(
                    car.number.to_string(),
                    json!({
                        "Position": (pos + 1).to_string(),
                        "GapToLeader": gap,
                        "IntervalToPositionAhead": {"Value": interval},
                        "NumberOfLaps": distance.max(0.0).floor() as u32
                    }),
                );
            }
            json!({"Timestamp": iso(ts), "Lines": lines})
        })
        .collect()
}

fn race_control(config: &DemoConfig) -> Value {
    let at = |fraction: f64| {
        iso(config.start_ms + (f64::from(config.duration_secs) * 1_000.0 * fraction) as i64)
    };
    let mut messages = Map::new();
    messages.insert(
        at(0.0),
        json!({"Category": "Flag", "Flag": "GREEN", "Message": "GREEN LIGHT - PIT EXIT OPEN"}),
    );
    if !config.frozen {
        messages.insert(
            at(0.1),
            json!({"Category": "Drs", "Status": "ENABLED", "Message": "DRS ENABLED"}),
        );
        messages.insert(
            at(0.4),
            json!({"Category": "Flag", "Flag": "YELLOW", "Scope": "Sector", "Sector": 7, "Message": "YELLOW IN TRACK SECTOR 7"}),
        );
        messages.insert(
            at(0.42),
            json!({"Category": "Flag", "Flag": "CLEAR", "Scope": "Sector", "Sector": 7, "Message": "CLEAR IN TRACK SECTOR 7"}),
        );
        messages.insert(
            at(1.0),
            json!({"Category": "Flag", "Flag": "CHEQUERED", "Message": "CHEQUERED FLAG"}),
        );
    }
    Value::Object(messages)
}

fn team_radio(config: &DemoConfig, cars: &[Car]) -> Vec<Value> {
    if cars.is_empty() {
        return Vec::new();
    }
    config
        .samples(90_000)
        .skip(1)
        .enumerate()
        .map(|(i, ts)| {
            let car = &cars[i % cars.len()];
            let mut captures = Map::new();
            captures.insert(
                i.to_string(),
                json!({
                    "Utc": iso(ts),
                    "RacingNumber": car.number,
                    "Path": format!("TeamRadio/{}_{}_{}.mp3", car.tla, car.number, i)
                }),
            );
            json!({"Utc": iso(ts), "Captures": captures})
        })
        .collect()
}

fn weather(config: &DemoConfig) -> Vec<Value> {
    config
        .samples(60_000)
        .enumerate()
        .map(|(i, ts)| {
            let n = i as f64;
            json!({
                "date": iso_offset(ts),
                "air_temperature": ((24.0 + n * 0.05 + jitter(n, 0.2)) * 10.0).round() / 10.0,
                "track_temperature": ((38.0 + n * 0.1 + jitter(n * 1.3, 0.4)) * 10.0).round() / 10.0,
                "humidity": 52,
                "pressure": 1012.4,
                "rainfall": 0,
                "wind_direction": 210,
                "wind_speed": ((2.5 + jitter(n * 1.7, 0.5)) * 10.0).round() / 10.0
            })
        })
        .collect()
}

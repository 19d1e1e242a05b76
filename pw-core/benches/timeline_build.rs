//! Timeline build throughput
//!
//! Measures flatten + interpolation expansion of a synthetic race at every
//! quality preset, and the cost of a full-replay seek on the result.
//!
//! Session: 20 cars, one real position frame every 4 s for 30 minutes,
//! car telemetry every second for the leader.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use pw_core::{ManualClock, PlaybackEngine, QualityPreset, ReplayConfig, SessionData, TimelineBuilder};
use serde_json::{json, Map, Value};

const T0: i64 = 1_700_000_000_000;
const CARS: usize = 20;
const FRAME_INTERVAL_MS: i64 = 4_000;
const DURATION_MS: i64 = 30 * 60 * 1_000;

fn race_session() -> SessionData {
    let lap_length = 5_000.0;
    let frames: Vec<Value> = (0..=DURATION_MS / FRAME_INTERVAL_MS)
        .map(|i| {
            let ts = T0 + i * FRAME_INTERVAL_MS;
            let entries: Map<String, Value> = (0..CARS)
                .map(|car| {
                    let distance = (i as f64 * 300.0 - car as f64 * 40.0).rem_euclid(lap_length);
                    let angle = distance / lap_length * std::f64::consts::TAU;
                    (
                        (car + 1).to_string(),
                        json!({"X": angle.cos() * 800.0, "Y": angle.sin() * 500.0, "Z": 0.0}),
                    )
                })
                .collect();
            json!({"Timestamp": ts, "Entries": entries})
        })
        .collect();

    let car_data: Vec<Value> = (0..DURATION_MS / 1_000)
        .map(|s| {
            json!({
                "date": T0 + s * 1_000,
                "driver_number": 1,
                "speed": 250 + s % 60,
                "rpm": 10_500,
                "n_gear": 7
            })
        })
        .collect();

    let session = json!({
        "SessionInfo": {"Meeting": {"Name": "Benchmark GP"}, "Type": "Race"},
        "Position": {"Position": frames},
        "CarData": car_data
    });
    session.as_object().cloned().unwrap_or_default()
}

fn bench_build_per_preset(c: &mut Criterion) {
    let session = race_session();
    let mut group = c.benchmark_group("timeline_build");
    group.sample_size(20);

    for preset in QualityPreset::ALL {
        let builder = TimelineBuilder::with_preset(preset);
        group.bench_function(BenchmarkId::from_parameter(format!("{:?}", preset)), |b| {
            b.iter(|| {
                let timeline = builder.build(black_box(&session)).unwrap();
                black_box(timeline.len());
            });
        });
    }

    group.finish();
}

fn bench_seek(c: &mut Criterion) {
    let session = race_session();
    let timeline = TimelineBuilder::with_preset(QualityPreset::High)
        .build(&session)
        .unwrap();
    let mut engine = PlaybackEngine::with_clock(timeline, ReplayConfig::default(), ManualClock::new());

    let mut group = c.benchmark_group("seek");
    for pct in [10.0, 50.0, 99.0] {
        group.bench_function(BenchmarkId::from_parameter(pct), |b| {
            b.iter(|| {
                engine.seek(black_box(pct));
                black_box(engine.cursor());
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_build_per_preset, bench_seek);
criterion_main!(benches);

//! Integration tests for the session sources

use pw_core::source::{load_cached, SessionCache, SessionSource, SourceError};
use pw_core::{Channel, EventPayload, QualityPreset, TimelineBuilder, TimelineError};
use pw_sources::{DemoConfig, DemoSource, JsonFileSource, MemoryCache};

#[test]
fn test_demo_source_identity() {
    let source = DemoSource::new();
    assert_eq!(source.key(), "demo");
    assert_eq!(source.name(), "Demo");
}

#[test]
fn test_demo_source_lists_sessions() {
    let sessions = DemoSource::default().list_sessions().unwrap();
    let keys: Vec<&str> = sessions.iter().map(|s| s.key.as_str()).collect();
    assert_eq!(keys, vec!["race", "sprint", "placeholder"]);
    assert!(sessions.iter().all(|s| s.source == "demo"));
    assert!(sessions[0].channels.contains(&"Position".to_string()));
}

#[test]
fn test_demo_session_is_deterministic() {
    let source = DemoSource::new();
    let a = source.load_session("sprint").unwrap();
    let b = source.load_session("sprint").unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_unknown_session_is_not_found() {
    let err = DemoSource::new().load_session("qualifying").unwrap_err();
    assert!(
        matches!(err.downcast_ref::<SourceError>(), Some(SourceError::NotFound(_))),
        "expected NotFound, got {}",
        err
    );
}

#[test]
fn test_demo_race_builds_clean_timeline() {
    let session = DemoSource::new().load_session("race").unwrap();
    let timeline = TimelineBuilder::with_preset(QualityPreset::Medium)
        .build(&session)
        .expect("demo race should build");
    let report = timeline.report();

    // 20 minutes sampled every 4 s, both ends included
    assert_eq!(report.real_position_frames, 301);
    assert_eq!(report.synthetic_frames, 300 * 9);
    assert_eq!(report.degenerate_pairs, 0);
    assert!(report.diagnostics.is_empty(), "{:?}", report.diagnostics);

    // SessionInfo and DriverList
    assert_eq!(report.static_events, 2);
    let race_control = timeline
        .dynamic_events()
        .iter()
        .filter(|e| e.channel == Channel::RaceControl)
        .count();
    assert_eq!(race_control, 5);
}

#[test]
fn test_demo_car_data_in_reasonable_range() {
    let session = DemoSource::new().load_session("sprint").unwrap();
    let timeline = TimelineBuilder::with_preset(QualityPreset::Low)
        .build(&session)
        .unwrap();

    let mut samples = 0;
    for event in timeline.dynamic_events() {
        if let EventPayload::CarTelemetry(sample) = &event.payload {
            samples += 1;
            let speed = sample.speed.expect("speed should be populated").0;
            assert!((0.0..=350.0).contains(&speed), "speed {}", speed);
            let gear = sample.gear.expect("gear should be populated");
            assert!((0..=8).contains(&gear), "gear {}", gear);
            let throttle = sample.throttle.expect("throttle should be populated").0;
            assert!((0.0..=100.0).contains(&throttle), "throttle {}", throttle);
            assert!(sample.driver.is_some());
        }
    }
    // 6 cars, 1 Hz, 5 minutes inclusive
    assert_eq!(samples, 6 * 301);
}

#[test]
fn test_demo_cars_move_between_frames() {
    let session = DemoSource::new().load_session("sprint").unwrap();
    let timeline = TimelineBuilder::default().build(&session).unwrap();
    let real: Vec<_> = timeline
        .dynamic_events()
        .iter()
        .filter(|e| e.is_real_position())
        .filter_map(|e| e.position_frame())
        .collect();

    let before = real[10].get("1").expect("car 1 should be on track");
    let after = real[11].get("1").expect("car 1 should be on track");
    assert!(before.distance(after) > 100.0);
}

#[test]
fn test_placeholder_session_is_degenerate() {
    let session = DemoSource::new().load_session("placeholder").unwrap();
    let err = TimelineBuilder::default().build(&session).unwrap_err();
    assert!(
        matches!(err, TimelineError::DegenerateData { pairs, degenerate } if pairs == degenerate),
        "expected DegenerateData, got {:?}",
        err
    );
}

#[test]
fn test_custom_demo_session() {
    let source = DemoSource::new().with_session(
        "short",
        DemoConfig {
            name: "Short".to_string(),
            drivers: 2,
            duration_secs: 60,
            ..Default::default()
        },
    );
    let session = source.load_session("short").unwrap();
    let drivers = session["DriverList"].as_object().unwrap();
    assert_eq!(drivers.len(), 2);
}

#[test]
fn test_json_file_source_round_trip() {
    let dir = std::env::temp_dir().join(format!("pw-sources-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();

    let demo = DemoSource::new().load_session("sprint").unwrap();
    std::fs::write(
        dir.join("demo_sprint.json"),
        serde_json::to_vec(&demo).unwrap(),
    )
    .unwrap();
    std::fs::write(dir.join("notes.txt"), b"not a session").unwrap();
    std::fs::write(dir.join("broken.json"), b"{ nope").unwrap();
    std::fs::write(dir.join("list.json"), b"[1, 2, 3]").unwrap();

    let source = JsonFileSource::new(&dir);
    let keys: Vec<String> = source
        .list_sessions()
        .unwrap()
        .into_iter()
        .map(|s| s.key)
        .collect();
    assert_eq!(keys, vec!["broken", "demo_sprint", "list"]);

    assert_eq!(source.load_session("demo_sprint").unwrap(), demo);

    let parse_err = source.load_session("broken").unwrap_err();
    assert!(matches!(
        parse_err.downcast_ref::<SourceError>(),
        Some(SourceError::Parse { .. })
    ));
    assert!(source.load_session("list").is_err());
    assert!(matches!(
        source.load_session("missing").unwrap_err().downcast_ref::<SourceError>(),
        Some(SourceError::NotFound(_))
    ));

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_memory_cache_serves_repeat_loads() {
    let source = DemoSource::new();
    let cache = MemoryCache::new();

    let first = load_cached(&source, &cache, "sprint").unwrap();
    assert!(cache.has("demo/sprint"));
    let second = load_cached(&source, &cache, "sprint").unwrap();
    assert_eq!(first, second);

    assert!(cache.remove("demo/sprint"));
    assert!(!cache.has("demo/sprint"));
}

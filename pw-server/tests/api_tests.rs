//! Integration tests for the REST API and SSE routes

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use pw_server::api::create_router;
use pw_server::state::AppState;
use pw_sources::{DemoSource, JsonFileSource};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

// ==================== Helpers ====================

async fn app_with_state() -> (Router, AppState) {
    let state = AppState::new();
    state.register_source(Arc::new(DemoSource::new())).await;
    state
        .register_source(Arc::new(JsonFileSource::new(
            std::env::temp_dir().join("pw-server-tests-no-sessions"),
        )))
        .await;
    (create_router(state.clone()), state)
}

async fn app() -> Router {
    app_with_state().await.0
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

async fn body_json(response: axum::response::Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    String::from_utf8(body_bytes(response).await).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn delete_replay() -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri("/api/replay")
        .body(Body::empty())
        .unwrap()
}

async fn send(state: &AppState, request: Request<Body>) -> axum::response::Response {
    create_router(state.clone()).oneshot(request).await.unwrap()
}

/// App with the demo sprint already loaded
async fn loaded() -> AppState {
    let (_, state) = app_with_state().await;
    let response = send(
        &state,
        post_json(
            "/api/replay/load",
            json!({"source": "demo", "session": "sprint", "quality": "low"}),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    state
}

async fn control(state: &AppState, body: Value) -> axum::response::Response {
    send(state, post_json("/api/replay/control", body)).await
}

// ==================== GET /api/sources ====================

#[tokio::test]
async fn test_sources_returns_200_with_registered_sources() {
    let response = app().await.oneshot(get("/api/sources")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let sources = json.as_array().unwrap();
    assert_eq!(sources.len(), 2);
    assert_eq!(sources[0]["key"], "demo");
    assert_eq!(sources[0]["name"], "Demo");
    assert_eq!(sources[1]["key"], "file");
}

#[tokio::test]
async fn test_sources_empty_state_returns_empty_list() {
    let app = create_router(AppState::new());
    let response = app.oneshot(get("/api/sources")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "[]");
}

// ==================== GET /api/sessions ====================

#[tokio::test]
async fn test_sessions_lists_demo_sessions() {
    let response = app().await.oneshot(get("/api/sessions")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let keys: Vec<&str> = json
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["key"].as_str().unwrap())
        .collect();
    // the file source points at a missing directory
    assert_eq!(keys, vec!["race", "sprint", "placeholder"]);
}

#[tokio::test]
async fn test_sessions_filtered_by_source() {
    let response = app()
        .await
        .oneshot(get("/api/sessions?source=file"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "[]");
}

#[tokio::test]
async fn test_sessions_unknown_source_returns_404() {
    let response = app()
        .await
        .oneshot(get("/api/sessions?source=nope"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ==================== POST /api/replay/load ====================

#[tokio::test]
async fn test_replay_load_returns_200_with_info() {
    let (_, state) = app_with_state().await;
    let response = send(
        &state,
        post_json(
            "/api/replay/load",
            json!({"source": "demo", "session": "sprint", "quality": "low", "playback_speed": 4.0}),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["info"]["source"], "demo");
    assert_eq!(json["info"]["session"], "sprint");
    assert_eq!(json["info"]["quality"], "low");
    assert_eq!(json["info"]["state"], "initial");
    assert_eq!(json["info"]["playback_speed"], 4.0);
    assert_eq!(json["info"]["progress"], 0.0);
    assert_eq!(json["info"]["report"]["real_position_frames"], 76);
    assert!(state.replay.lock().await.is_some());
}

#[tokio::test]
async fn test_replay_load_accepts_engine_settings() {
    let (_, state) = app_with_state().await;
    let response = send(
        &state,
        post_json(
            "/api/replay/load",
            json!({"source": "demo", "session": "sprint", "tick_interval_ms": 250, "warm_start_frames": 0}),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["info"]["playback_speed"], 1.0);
    assert_eq!(json["info"]["time_compression"], 1.0);

    let replay = state.replay.lock().await;
    let engine = replay.as_ref().unwrap().engine();
    assert_eq!(engine.tick_interval(), std::time::Duration::from_millis(250));
    assert_eq!(engine.cursor(), 0);
}

#[tokio::test]
async fn test_replay_load_while_active_returns_409() {
    let state = loaded().await;
    let response = send(
        &state,
        post_json("/api/replay/load", json!({"source": "demo", "session": "race"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_replay_load_unknown_source_returns_404() {
    let response = app()
        .await
        .oneshot(post_json(
            "/api/replay/load",
            json!({"source": "f1-live", "session": "race"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(body_string(response).await.contains("f1-live"));
}

#[tokio::test]
async fn test_replay_load_unknown_session_returns_404() {
    let response = app()
        .await
        .oneshot(post_json(
            "/api/replay/load",
            json!({"source": "demo", "session": "qualifying"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_replay_load_frozen_positions_returns_422() {
    let (_, state) = app_with_state().await;
    let response = send(
        &state,
        post_json(
            "/api/replay/load",
            json!({"source": "demo", "session": "placeholder"}),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body_string(response).await.contains("degenerate"));
    assert!(state.replay.lock().await.is_none());
}

#[tokio::test]
async fn test_replay_load_bad_quality_returns_400() {
    let response = app()
        .await
        .oneshot(post_json(
            "/api/replay/load",
            json!({"source": "demo", "session": "sprint", "quality": "extreme"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_replay_load_fills_cache() {
    let state = loaded().await;
    assert!(state.cache.has("demo/sprint"));
}

// ==================== GET /api/replay/info ====================

#[tokio::test]
async fn test_replay_info_without_replay_returns_404() {
    let response = app().await.oneshot(get("/api/replay/info")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_string(response).await, "No active replay");
}

#[tokio::test]
async fn test_replay_info_reports_timeline() {
    let state = loaded().await;
    let response = send(&state, get("/api/replay/info")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["cursor"], 0);
    assert!(json["total_events"].as_u64().unwrap() > 0);
    assert!(json["current_time"].as_str().unwrap().ends_with('Z'));
    assert_eq!(json["report"]["degenerate_pairs"], 0);
    assert!(json["report"]["diagnostics"].as_array().unwrap().is_empty());
}

// ==================== GET /api/replay/state ====================

#[tokio::test]
async fn test_replay_state_without_replay_returns_404() {
    let response = app().await.oneshot(get("/api/replay/state")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_replay_state_shows_warm_start_preview() {
    let state = loaded().await;
    let response = send(&state, get("/api/replay/state")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let channels = &json["channels"];
    let positions = channels["Position"]["entries"].as_array().unwrap();
    assert!(!positions.is_empty());
    assert!(channels.get("SessionInfo").is_some());
    assert!(channels.get("DriverList").is_some());
}

// ==================== POST /api/replay/control ====================

#[tokio::test]
async fn test_replay_control_without_replay_returns_404() {
    let response = app()
        .await
        .oneshot(post_json("/api/replay/control", json!({"action": "play"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_replay_control_play_then_pause() {
    let state = loaded().await;

    let response = control(&state, json!({"action": "play"})).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "playing");
    assert_eq!(json["info"]["playing"], true);
    assert!(state.replay_cancel.read().await.is_some());

    let response = control(&state, json!({"action": "pause"})).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "paused");
    assert_eq!(json["info"]["state"], "paused");
    assert!(state.replay_cancel.read().await.is_none());
}

#[tokio::test]
async fn test_replay_control_seek_to_midpoint() {
    let state = loaded().await;

    let response = control(&state, json!({"action": "seek", "value": 50.0})).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "seeked");

    let total = json["info"]["total_events"].as_u64().unwrap();
    assert_eq!(json["info"]["cursor"].as_u64().unwrap(), total / 2);
    assert_eq!(json["info"]["state"], "paused");
}

#[tokio::test]
async fn test_replay_control_seek_without_value_returns_400() {
    let state = loaded().await;
    let response = control(&state, json!({"action": "seek"})).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_replay_control_speed() {
    let state = loaded().await;

    let response = control(&state, json!({"action": "speed", "value": 8.0})).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["info"]["playback_speed"], 8.0);

    let response = control(&state, json!({"action": "speed", "value": 0.0})).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let response = control(&state, json!({"action": "speed"})).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_replay_control_reset_restores_initial_state() {
    let state = loaded().await;
    control(&state, json!({"action": "speed", "value": 8.0})).await;
    control(&state, json!({"action": "seek", "value": 75.0})).await;

    let response = control(&state, json!({"action": "reset"})).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["info"]["cursor"], 0);
    assert_eq!(json["info"]["state"], "initial");
    assert_eq!(json["info"]["playback_speed"], 1.0);
}

#[tokio::test]
async fn test_replay_control_unknown_action_returns_400() {
    let state = loaded().await;
    let response = control(&state, json!({"action": "rewind"})).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_string(response).await.contains("rewind"));
}

#[tokio::test]
async fn test_replay_plays_to_end_with_compression() {
    let (_, state) = app_with_state().await;
    // 5 minute sprint at 1000x finishes in well under a second
    let response = send(
        &state,
        post_json(
            "/api/replay/load",
            json!({"source": "demo", "session": "sprint", "quality": "low", "time_compression": 1000.0}),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    control(&state, json!({"action": "play"})).await;

    let ended = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        loop {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            let json = body_json(send(&state, get("/api/replay/info")).await).await;
            if json["state"] == "ended" {
                return json;
            }
        }
    })
    .await
    .expect("replay should reach the end");

    assert_eq!(ended["progress"], 100.0);
    assert_eq!(ended["playing"], false);
}

// ==================== DELETE /api/replay ====================

#[tokio::test]
async fn test_replay_delete_without_replay_returns_404() {
    let response = app().await.oneshot(delete_replay()).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_replay_delete_returns_204_and_clears_replay() {
    let state = loaded().await;
    control(&state, json!({"action": "play"})).await;

    let response = send(&state, delete_replay()).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(state.replay.lock().await.is_none());
    assert!(state.replay_cancel.read().await.is_none());

    let response = send(&state, get("/api/replay/info")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // a new replay can be loaded afterwards
    let response = send(
        &state,
        post_json("/api/replay/load", json!({"source": "demo", "session": "sprint"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
}

// ==================== GET /api/replay/stream ====================

#[tokio::test]
async fn test_replay_stream_returns_sse_content_type() {
    let response = app()
        .await
        .oneshot(get("/api/replay/stream"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(
        content_type.contains("text/event-stream"),
        "SSE endpoint should return text/event-stream, got: {}",
        content_type
    );
}

#[tokio::test]
async fn test_replay_stream_starts_with_current_state() {
    let state = loaded().await;
    let response = send(&state, get("/api/replay/stream")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let mut stream = response.into_body().into_data_stream();
    let chunk = tokio::time::timeout(std::time::Duration::from_secs(3), async {
        use futures::StreamExt;
        stream.next().await
    })
    .await
    .expect("stream should yield the current state")
    .expect("stream should not end")
    .unwrap();

    let text = String::from_utf8(chunk.to_vec()).unwrap();
    assert!(
        text.starts_with("data:"),
        "SSE events are formatted as 'data: {{...}}', got: {}",
        text
    );
    assert!(text.contains("SessionInfo"));
}

#[tokio::test]
async fn test_replay_stream_receives_seek_update() {
    let state = loaded().await;
    let response = send(&state, get("/api/replay/stream")).await;
    let mut stream = response.into_body().into_data_stream();

    let seek_state = state.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        control(&seek_state, json!({"action": "seek", "value": 50.0})).await;
    });

    let received = tokio::time::timeout(std::time::Duration::from_secs(3), async {
        use futures::StreamExt;
        let mut events = 0;
        while let Some(Ok(chunk)) = stream.next().await {
            if chunk.starts_with(b"data:") {
                events += 1;
            }
            if events >= 2 {
                break;
            }
        }
        events
    })
    .await
    .expect("seek should push a state update");

    assert_eq!(received, 2);
}

// ==================== AppState unit tests ====================

#[tokio::test]
async fn test_app_state_new_has_no_sources() {
    let state = AppState::new();
    let sources = state.sources.read().await;
    assert_eq!(sources.len(), 0);
}

#[tokio::test]
async fn test_app_state_register_and_find_source() {
    let state = AppState::new();
    state.register_source(Arc::new(DemoSource::new())).await;

    let source = state.source("demo").await.unwrap();
    assert_eq!(source.name(), "Demo");
    assert!(state.source("file").await.is_none());
}

#[tokio::test]
async fn test_app_state_subscribe_receives_broadcast() {
    let state = AppState::new();
    let mut rx = state.subscribe();

    state
        .state_tx
        .send(Arc::new(pw_core::Snapshot::default()))
        .unwrap();

    let received = rx.recv().await.unwrap();
    assert!(received.is_empty());
}

#[tokio::test]
async fn test_app_state_default() {
    let state = AppState::default();
    assert!(state.replay.lock().await.is_none());
    assert!(state.replay_cancel.read().await.is_none());
}

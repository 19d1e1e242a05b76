//! REST API and SSE routes

use crate::replay::{load_timeline, LoadError, ReplayInfo, ReplaySession};
use crate::state::AppState;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{delete, get, post},
    Json, Router,
};
use futures::stream::{self, Stream, StreamExt as FuturesStreamExt};
use pw_core::{QualityPreset, ReplayConfig, SessionSummary, Snapshot};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

type ApiError = (StatusCode, String);

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/sources", get(list_sources))
        .route("/api/sessions", get(list_sessions))
        .route("/api/replay/load", post(replay_load))
        .route("/api/replay/info", get(replay_info))
        .route("/api/replay/state", get(replay_state))
        .route("/api/replay/control", post(replay_control))
        .route("/api/replay/stream", get(replay_stream))
        .route("/api/replay", delete(replay_delete))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn no_active_replay() -> ApiError {
    (StatusCode::NOT_FOUND, "No active replay".to_string())
}

// === Sources and sessions ===

#[derive(Serialize)]
struct SourceInfo {
    key: String,
    name: String,
}

async fn list_sources(State(state): State<AppState>) -> Json<Vec<SourceInfo>> {
    let sources = state.sources.read().await;
    let info: Vec<SourceInfo> = sources
        .iter()
        .map(|s| SourceInfo {
            key: s.key().to_string(),
            name: s.name().to_string(),
        })
        .collect();

    Json(info)
}

#[derive(Deserialize)]
struct SessionsQuery {
    source: Option<String>,
}

async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<SessionsQuery>,
) -> Result<Json<Vec<SessionSummary>>, ApiError> {
    let sources = state.sources.read().await;

    if let Some(key) = &query.source {
        if !sources.iter().any(|s| s.key() == key) {
            return Err((StatusCode::NOT_FOUND, format!("Unknown source: {}", key)));
        }
    }

    let mut sessions = Vec::new();
    for source in sources
        .iter()
        .filter(|s| query.source.as_deref().map_or(true, |key| s.key() == key))
    {
        match source.list_sessions() {
            Ok(list) => sessions.extend(list),
            Err(e) => tracing::warn!("Failed to list sessions of {}: {:#}", source.key(), e),
        }
    }

    Ok(Json(sessions))
}

// === Replay lifecycle ===

#[derive(Deserialize)]
struct ReplayLoadRequest {
    source: String,
    session: String,
    quality: Option<String>,
    /// Engine settings at the top level of the body; omitted fields keep defaults
    #[serde(flatten)]
    config: ReplayConfig,
}

fn load_error_response(error: LoadError) -> ApiError {
    if error.is_not_found() {
        return (StatusCode::NOT_FOUND, error.to_string());
    }
    match error {
        LoadError::Timeline(e) => (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
        LoadError::Source(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to load session: {:#}", e),
        ),
    }
}

async fn replay_load(
    State(state): State<AppState>,
    Json(request): Json<ReplayLoadRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if state.replay.lock().await.is_some() {
        return Err((
            StatusCode::CONFLICT,
            "A replay is already active. Delete it first.".to_string(),
        ));
    }

    let quality = match request.quality.as_deref() {
        Some(q) => q
            .parse::<QualityPreset>()
            .map_err(|e| (StatusCode::BAD_REQUEST, e))?,
        None => QualityPreset::default(),
    };

    let source = state.source(&request.source).await.ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            format!("Unknown source: {}", request.source),
        )
    })?;

    // Flattening and interpolation are CPU-bound
    let cache = state.cache.clone();
    let session = request.session.clone();
    let timeline = tokio::task::spawn_blocking(move || {
        load_timeline(source.as_ref(), cache.as_ref(), &session, quality)
    })
    .await
    .map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Timeline build task failed: {}", e),
        )
    })?
    .map_err(load_error_response)?;

    let mut replay = state.replay.lock().await;
    if replay.is_some() {
        return Err((
            StatusCode::CONFLICT,
            "A replay is already active. Delete it first.".to_string(),
        ));
    }

    let mut rs = ReplaySession::new(
        request.source,
        request.session,
        quality,
        timeline,
        request.config,
    );
    let tx = state.state_tx.clone();
    rs.engine_mut().set_listener(Box::new(move |snapshot: &Snapshot| {
        // No subscribers is fine
        let _ = tx.send(Arc::new(snapshot.clone()));
    }));

    let info = rs.info();
    *replay = Some(rs);

    Ok(Json(serde_json::json!({
        "status": "ok",
        "info": info
    })))
}

async fn replay_info(State(state): State<AppState>) -> Result<Json<ReplayInfo>, ApiError> {
    let replay = state.replay.lock().await;
    match &*replay {
        Some(rs) => Ok(Json(rs.info())),
        None => Err(no_active_replay()),
    }
}

async fn replay_state(State(state): State<AppState>) -> Result<Json<Snapshot>, ApiError> {
    let replay = state.replay.lock().await;
    match &*replay {
        Some(rs) => Ok(Json(rs.engine().snapshot().clone())),
        None => Err(no_active_replay()),
    }
}

#[derive(Deserialize)]
struct ReplayControlRequest {
    action: String,
    value: Option<f64>,
}

/// What the tick task should do after a control action
enum TickTask {
    Start,
    Stop,
    Keep,
}

async fn replay_control(
    State(state): State<AppState>,
    Json(request): Json<ReplayControlRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut replay = state.replay.lock().await;
    let rs = replay.as_mut().ok_or_else(no_active_replay)?;
    let engine = rs.engine_mut();

    let (status, task) = match request.action.as_str() {
        "play" => {
            engine.play();
            let task = if engine.is_playing() {
                TickTask::Start
            } else {
                TickTask::Keep
            };
            ("playing", task)
        }
        "pause" => {
            engine.pause();
            ("paused", TickTask::Stop)
        }
        "seek" => {
            let pct = request
                .value
                .filter(|v| v.is_finite())
                .ok_or((StatusCode::BAD_REQUEST, "Missing 'value' for seek".to_string()))?;
            engine.seek(pct);
            let task = if engine.is_playing() {
                TickTask::Start
            } else {
                TickTask::Keep
            };
            ("seeked", task)
        }
        "speed" => {
            let speed = request
                .value
                .ok_or((StatusCode::BAD_REQUEST, "Missing 'value' for speed".to_string()))?;
            if !speed.is_finite() || speed <= 0.0 {
                return Err((
                    StatusCode::BAD_REQUEST,
                    format!("Speed must be a positive number, got {}", speed),
                ));
            }
            engine.set_speed(speed);
            ("speed_set", TickTask::Keep)
        }
        "reset" => {
            engine.reset();
            ("reset", TickTask::Stop)
        }
        _ => {
            return Err((
                StatusCode::BAD_REQUEST,
                format!("Unknown action: {}", request.action),
            ))
        }
    };

    let info = rs.info();
    drop(replay);

    match task {
        TickTask::Start => start_tick_task(state.clone()).await,
        TickTask::Stop => state.cancel_tick_task().await,
        TickTask::Keep => {}
    }

    Ok(Json(serde_json::json!({
        "status": status,
        "info": info
    })))
}

async fn replay_delete(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.cancel_tick_task().await;

    {
        let mut replay = state.replay.lock().await;
        let mut rs = replay.take().ok_or_else(no_active_replay)?;
        rs.engine_mut().destroy();
    }

    tracing::info!("Replay stopped and cleaned up");
    Ok(StatusCode::NO_CONTENT)
}

/// SSE stream of state snapshots
///
/// A client connecting to a loaded replay first receives the current state.
async fn replay_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.subscribe();

    let current: Option<Result<Arc<Snapshot>, BroadcastStreamRecvError>> = {
        let replay = state.replay.lock().await;
        replay
            .as_ref()
            .map(|rs| Ok(Arc::new(rs.engine().snapshot().clone())))
    };

    let stream = stream::iter(current)
        .chain(BroadcastStream::new(rx))
        .filter_map(|result| async move {
            match result {
                Ok(snapshot) => match serde_json::to_string(&*snapshot) {
                    Ok(json) => Some(Ok(Event::default().data(json))),
                    Err(e) => {
                        tracing::error!("Failed to serialize snapshot: {}", e);
                        None
                    }
                },
                Err(e) => {
                    tracing::warn!("Broadcast stream error: {}", e);
                    None
                }
            }
        });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Start the task that ticks the engine at its configured interval
///
/// Any previous task is cancelled. The task exits on cancellation, when the
/// replay is dropped, or once the engine stops playing.
async fn start_tick_task(state: AppState) {
    let token = CancellationToken::new();
    {
        let mut cancel = state.replay_cancel.write().await;
        if let Some(previous) = cancel.replace(token.clone()) {
            previous.cancel();
        }
    }

    let period = match state.replay.lock().await.as_ref() {
        Some(rs) => rs.engine().tick_interval(),
        None => return,
    };
    let replay = state.replay.clone();

    tokio::spawn(async move {
        tracing::info!("Tick task started ({:?} interval)", period);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {}
            }

            let mut guard = replay.lock().await;
            let Some(rs) = guard.as_mut() else {
                break;
            };
            let engine = rs.engine_mut();
            engine.tick();
            if !engine.is_playing() {
                tracing::debug!("Engine stopped playing at cursor {}", engine.cursor());
                break;
            }
        }

        tracing::info!("Tick task ended");
    });
}

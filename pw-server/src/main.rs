//! Pitwall Replay Server
//!
//! Hosts one replay at a time behind a REST API with an SSE state stream.
//!
//! Environment:
//! - `PW_LISTEN_ADDR`: socket address to bind (default `0.0.0.0:9100`)
//! - `PW_SESSION_DIR`: directory of session JSON files
//! - `RUST_LOG`: tracing filter (default `info`)

use anyhow::{Context, Result};
use pw_server::{api, state};
use pw_sources::{DemoSource, JsonFileSource};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:9100";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting Pitwall Replay Server");

    let addr: SocketAddr = std::env::var("PW_LISTEN_ADDR")
        .unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string())
        .parse()
        .context("PW_LISTEN_ADDR is not a valid socket address")?;

    let session_dir = std::env::var_os("PW_SESSION_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(JsonFileSource::default_dir);
    info!("Session files directory: {}", session_dir.display());

    // Create application state
    let state = state::AppState::new();
    state.register_source(Arc::new(DemoSource::new())).await;
    state
        .register_source(Arc::new(JsonFileSource::new(session_dir)))
        .await;

    // Build the router
    let app = api::create_router(state);

    // Start server
    info!("Server listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}

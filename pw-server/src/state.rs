//! Application state management

use crate::replay::ReplaySession;
use pw_core::{SessionCache, SessionSource, Snapshot};
use pw_sources::MemoryCache;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// All registered session sources
    pub sources: Arc<RwLock<Vec<Arc<dyn SessionSource>>>>,

    /// Resolved sessions, keyed by `source/session`
    pub cache: Arc<dyn SessionCache>,

    /// Broadcast channel for state snapshots pushed by the engine
    pub state_tx: broadcast::Sender<Arc<Snapshot>>,

    /// Active replay (None when nothing is loaded)
    ///
    /// Behind a `Mutex`: the engine's listener is `Send` but not `Sync`.
    pub replay: Arc<Mutex<Option<ReplaySession>>>,

    /// Cancellation token for the tick task
    pub replay_cancel: Arc<RwLock<Option<CancellationToken>>>,
}

impl AppState {
    pub fn new() -> Self {
        Self::with_cache(Arc::new(MemoryCache::new()))
    }

    pub fn with_cache(cache: Arc<dyn SessionCache>) -> Self {
        let (state_tx, _) = broadcast::channel(100);

        Self {
            sources: Arc::new(RwLock::new(Vec::new())),
            cache,
            state_tx,
            replay: Arc::new(Mutex::new(None)),
            replay_cancel: Arc::new(RwLock::new(None)),
        }
    }

    /// Register a session source
    pub async fn register_source(&self, source: Arc<dyn SessionSource>) {
        let mut sources = self.sources.write().await;
        sources.push(source);
    }

    /// Look up a source by key
    pub async fn source(&self, key: &str) -> Option<Arc<dyn SessionSource>> {
        let sources = self.sources.read().await;
        sources.iter().find(|s| s.key() == key).cloned()
    }

    /// Subscribe to state snapshots
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Snapshot>> {
        self.state_tx.subscribe()
    }

    /// Cancel the running tick task, if any
    pub async fn cancel_tick_task(&self) {
        let mut cancel = self.replay_cancel.write().await;
        if let Some(token) = cancel.take() {
            token.cancel();
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

//! Session source and cache traits
//!
//! The core never fetches or stores anything itself. A `SessionSource`
//! produces fully-resolved `SessionData`, and a `SessionCache` is the only
//! storage it is handed.

use crate::model::SessionData;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Failures raised by session sources and caches
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// A loadable session as listed by a source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Key of the source that can load it
    pub source: String,
    /// Key passed to `load_session`
    pub key: String,
    pub name: String,
    /// Channel names the session carries, when known without loading it
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<String>,
}

/// Something that can list and load sessions
///
/// Implementations:
/// - must be deterministic for a given session key
/// - return `SourceError::NotFound` (wrapped in `anyhow`) for unknown keys
pub trait SessionSource: Send + Sync {
    /// Short stable identifier (e.g. "demo")
    fn key(&self) -> &str;

    /// Display name
    fn name(&self) -> &str;

    fn list_sessions(&self) -> Result<Vec<SessionSummary>>;

    /// Load one session as a channel-keyed object
    fn load_session(&self, key: &str) -> Result<SessionData>;
}

/// Key-value cache of resolved sessions
pub trait SessionCache: Send + Sync {
    fn get(&self, key: &str) -> Option<SessionData>;

    fn set(&self, key: &str, session: SessionData);

    fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Returns whether an entry was removed
    fn remove(&self, key: &str) -> bool;
}

/// Load through the cache, filling it on a miss
pub fn load_cached(
    source: &dyn SessionSource,
    cache: &dyn SessionCache,
    session: &str,
) -> Result<SessionData> {
    let cache_key = format!("{}/{}", source.key(), session);
    if let Some(hit) = cache.get(&cache_key) {
        tracing::debug!("Session cache hit: {}", cache_key);
        return Ok(hit);
    }
    let data = source.load_session(session)?;
    cache.set(&cache_key, data.clone());
    Ok(data)
}

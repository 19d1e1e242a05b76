//! Session source backed by a directory of JSON documents
//!
//! Each `<key>.json` file holds one session object keyed by channel name.

use anyhow::Result;
use pw_core::source::{SessionSource, SessionSummary, SourceError};
use pw_core::SessionData;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub struct JsonFileSource {
    dir: PathBuf,
}

impl JsonFileSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<platform data dir>/pitwall-replay/sessions`, or `./sessions` when the
    /// platform has no data dir
    pub fn default_dir() -> PathBuf {
        dirs::data_dir()
            .map(|d| d.join("pitwall-replay"))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sessions")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Option<PathBuf> {
        // keys are bare file stems; anything path-like is rejected
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            return None;
        }
        Some(self.dir.join(format!("{}.json", key)))
    }
}

impl SessionSource for JsonFileSource {
    fn key(&self) -> &str {
        "file"
    }

    fn name(&self) -> &str {
        "Session Files"
    }

    fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Session directory {} does not exist", self.dir.display());
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(SourceError::Io {
                    path: self.dir.clone(),
                    source,
                }
                .into())
            }
        };

        let mut sessions: Vec<SessionSummary> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|path| {
                let key = path.file_stem()?.to_str()?.to_string();
                Some(SessionSummary {
                    source: self.key().to_string(),
                    name: key.replace(['_', '-'], " "),
                    key,
                    channels: Vec::new(),
                })
            })
            .collect();
        sessions.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(sessions)
    }

    fn load_session(&self, key: &str) -> Result<SessionData> {
        let path = self
            .path_for(key)
            .ok_or_else(|| SourceError::NotFound(key.to_string()))?;

        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SourceError::NotFound(key.to_string()).into())
            }
            Err(source) => return Err(SourceError::Io { path, source }.into()),
        };

        let value: Value = serde_json::from_slice(&bytes).map_err(|source| SourceError::Parse {
            path: path.clone(),
            source,
        })?;

        match value {
            Value::Object(session) => {
                debug!("Loaded {} channels from {}", session.len(), path.display());
                Ok(session)
            }
            other => {
                warn!("{} is not a session object", path.display());
                anyhow::bail!(
                    "{} holds a JSON {}, expected an object keyed by channel",
                    path.display(),
                    json_kind(&other)
                )
            }
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

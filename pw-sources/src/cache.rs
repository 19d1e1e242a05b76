//! In-memory session cache

use pw_core::source::SessionCache;
use pw_core::SessionData;
use std::collections::HashMap;
use std::sync::RwLock;

/// `HashMap`-backed cache shared across threads
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, SessionData>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }
}

impl SessionCache for MemoryCache {
    fn get(&self, key: &str) -> Option<SessionData> {
        self.entries.read().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, session: SessionData) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(key.to_string(), session);
        }
    }

    fn has(&self, key: &str) -> bool {
        self.entries
            .read()
            .map(|e| e.contains_key(key))
            .unwrap_or(false)
    }

    fn remove(&self, key: &str) -> bool {
        self.entries
            .write()
            .map(|mut e| e.remove(key).is_some())
            .unwrap_or(false)
    }
}

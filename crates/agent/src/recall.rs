use std::collections::HashMap;
use std::sync::RwLock;

use keystone_core::Result;

/// Key/value memory the conversation layer reads and writes.
pub trait RecallStore: Send + Sync {
    fn remember(&self, key: &str, value: &str) -> Result<()>;
    fn recall(&self, key: &str) -> Option<String>;
    fn forget(&self, key: &str) -> bool;
    fn keys(&self) -> Vec<String>;
}

/// Process-local store. Keys are stored as given.
#[derive(Default)]
pub struct InMemoryRecallStore {
    items: RwLock<HashMap<String, String>>,
}

impl InMemoryRecallStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecallStore for InMemoryRecallStore {
    fn remember(&self, key: &str, value: &str) -> Result<()> {
        if key.is_empty() {
            return Err(keystone_core::Error::Validation("recall key must not be empty".to_string()));
        }
        self.items
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn recall(&self, key: &str) -> Option<String> {
        self.items.read().unwrap_or_else(|e| e.into_inner()).get(key).cloned()
    }

    fn forget(&self, key: &str) -> bool {
        self.items.write().unwrap_or_else(|e| e.into_inner()).remove(key).is_some()
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.items.read().unwrap_or_else(|e| e.into_inner()).keys().cloned().collect();
        keys.sort();
        keys
    }
}

/// Collapse whitespace out of a user-supplied key: "favorite color" -> "favoritecolor".
pub fn normalize_key(raw: &str) -> String {
    raw.chars().filter(|c| !c.is_whitespace()).collect::<String>().to_lowercase()
}

//! In-memory key-value store.

use crate::storage::traits::KeyValueStore;
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::RwLock;

/// Process-local store. Nothing survives a restart.
///
/// Used for ephemeral sessions and tests.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    scope: String,
    entries: RwLock<HashMap<String, String>>,
}

impl InMemoryStore {
    /// Creates an empty store bound to `scope`.
    #[must_use]
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().map_or(0, |entries| entries.len())
    }

    /// Returns true when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned(operation: &str) -> Error {
    Error::OperationFailed {
        operation: operation.to_string(),
        cause: "in-memory store lock poisoned".to_string(),
    }
}

impl KeyValueStore for InMemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().map_err(|_| poisoned("kv_get"))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.write().map_err(|_| poisoned("kv_set"))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.write().map_err(|_| poisoned("kv_remove"))?;
        Ok(entries.remove(key).is_some())
    }

    fn scope(&self) -> &str {
        &self.scope
    }
}

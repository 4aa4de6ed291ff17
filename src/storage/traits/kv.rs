//! Durable key-value store trait.

use crate::Result;

/// Trait for the durable key-value collaborator.
///
/// A store instance is scoped to one site origin; keys are only unique
/// within that scope. Implementations must survive process restarts to be
/// useful as history backing, but the in-memory store is accepted for tests
/// and ephemeral sessions.
pub trait KeyValueStore: Send + Sync {
    /// Reads a value, `None` when absent.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Writes a value, replacing any previous one.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Removes a value. Returns true if something was removed.
    fn remove(&self, key: &str) -> Result<bool>;

    /// Scope (origin) this store is bound to.
    fn scope(&self) -> &str;

    /// Checks if a key is present.
    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }
}

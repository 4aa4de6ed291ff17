//! Exact membership store.
//!
//! Confirms Bloom filter positives. The in-memory set is unbounded for the
//! session; only the most recent window is persisted.

use lru::LruCache;

/// Number of keys persisted per store.
pub const DEFAULT_PERSIST_WINDOW: usize = 1000;

/// Insertion-ordered exact key set.
///
/// Backed by an unbounded [`LruCache`] so the recency order needed for the
/// persisted window comes for free. Re-adding a key refreshes its recency.
///
/// # Example
///
/// ```rust
/// use imgdedup::services::deduplication::ExactKeySet;
///
/// let mut set = ExactKeySet::new();
/// set.add("a");
/// set.add("b");
/// set.add("c");
/// assert!(set.has("b"));
/// assert_eq!(set.window(2), vec!["b".to_string(), "c".to_string()]);
/// ```
#[derive(Debug)]
pub struct ExactKeySet {
    keys: LruCache<String, ()>,
}

impl Default for ExactKeySet {
    fn default() -> Self {
        Self::new()
    }
}

impl ExactKeySet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            keys: LruCache::unbounded(),
        }
    }

    /// Exact membership test. Does not touch recency.
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    /// Inserts `key`, or marks it most recent if already present.
    pub fn add(&mut self, key: &str) {
        if self.keys.get(key).is_none() {
            self.keys.put(key.to_string(), ());
        }
    }

    /// The `size` most recently added keys, oldest first.
    #[must_use]
    pub fn window(&self, size: usize) -> Vec<String> {
        let mut recent: Vec<String> = self
            .keys
            .iter()
            .take(size)
            .map(|(key, _)| key.clone())
            .collect();
        recent.reverse();
        recent
    }

    /// Re-inserts persisted keys. `keys` must be oldest first.
    pub fn restore<I>(&mut self, keys: I)
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        for key in keys {
            self.add(key.as_ref());
        }
    }

    /// Removes every key.
    pub fn clear(&mut self) {
        self.keys.clear();
    }

    /// Number of distinct keys held in memory.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns true when no key is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

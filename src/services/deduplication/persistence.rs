//! Snapshot persistence for the dedup stores.
//!
//! Three values are written per origin scope:
//!
//! | Key | Value |
//! |-----|-------|
//! | `imgdedup.bloom` | base64 of the serialized [`BloomFilter`] |
//! | `imgdedup.urls` | JSON array of canonical URL keys, oldest first |
//! | `imgdedup.hashes` | JSON array of content digests, oldest first |
//!
//! Writes run on the blocking pool. The first failed write disables durable
//! backing for the rest of the session.

use super::bloom::BloomFilter;
use crate::storage::KeyValueStore;
use crate::{Error, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

/// Store key holding the Bloom filter.
pub const BLOOM_KEY: &str = "imgdedup.bloom";

/// Store key holding the URL window.
pub const URLS_KEY: &str = "imgdedup.urls";

/// Store key holding the digest window.
pub const HASHES_KEY: &str = "imgdedup.hashes";

/// Result of a flush or clear.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum PersistOutcome {
    /// Snapshot written.
    Written {
        /// Encoded Bloom filter length in bytes.
        bloom_bytes: usize,
        /// URL keys written.
        url_keys: usize,
        /// Digests written.
        digests: usize,
    },
    /// Persisted history removed.
    Cleared,
    /// Durable backing was disabled by an earlier failure.
    Disabled,
    /// The store rejected the write; durable backing is now disabled.
    Failed {
        /// Store error text.
        cause: String,
    },
}

impl PersistOutcome {
    /// Label used in metrics and logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Written { .. } => "written",
            Self::Cleared => "cleared",
            Self::Disabled => "disabled",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Point-in-time copy of engine state, taken on the caller's thread.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Serialized Bloom filter.
    pub bloom: Vec<u8>,
    /// URL window, oldest first.
    pub urls: Vec<String>,
    /// Digest window, oldest first.
    pub hashes: Vec<String>,
}

/// State read back from the store.
#[derive(Debug)]
pub struct RestoredState {
    /// Restored Bloom filter.
    pub bloom: BloomFilter,
    /// URL window, oldest first.
    pub urls: Vec<String>,
    /// Digest window, oldest first.
    pub hashes: Vec<String>,
}

/// Reads and writes engine snapshots through a [`KeyValueStore`].
pub struct PersistenceAdapter<S: KeyValueStore> {
    store: Arc<S>,
    durable: bool,
}

impl<S: KeyValueStore + 'static> PersistenceAdapter<S> {
    /// Wraps `store`. Durable backing starts enabled.
    #[must_use]
    pub const fn new(store: Arc<S>) -> Self {
        Self {
            store,
            durable: true,
        }
    }

    /// Whether flushes still reach the store.
    #[must_use]
    pub const fn is_durable(&self) -> bool {
        self.durable
    }

    /// Scope of the underlying store.
    #[must_use]
    pub fn scope(&self) -> &str {
        self.store.scope()
    }

    /// Loads the persisted snapshot.
    ///
    /// Returns `Ok(None)` when nothing has been persisted for this scope.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for a corrupt snapshot and
    /// [`Error::OperationFailed`] when the store cannot be read.
    #[instrument(skip(self), fields(scope = %self.store.scope()))]
    pub fn load(&self) -> Result<Option<RestoredState>> {
        let Some(encoded) = self.store.get(BLOOM_KEY)? else {
            return Ok(None);
        };
        let raw = STANDARD
            .decode(encoded.trim())
            .map_err(|e| Error::InvalidInput(format!("bloom snapshot is not base64: {e}")))?;
        let bloom = BloomFilter::deserialize(&raw)?;
        let urls = self.load_keys(URLS_KEY)?;
        let hashes = self.load_keys(HASHES_KEY)?;

        tracing::debug!(
            bloom_bits = bloom.num_bits(),
            urls = urls.len(),
            hashes = hashes.len(),
            "Loaded dedup snapshot"
        );
        Ok(Some(RestoredState {
            bloom,
            urls,
            hashes,
        }))
    }

    fn load_keys(&self, key: &str) -> Result<Vec<String>> {
        match self.store.get(key)? {
            Some(json) => serde_json::from_str(&json)
                .map_err(|e| Error::InvalidInput(format!("{key} snapshot is not a JSON array: {e}"))),
            None => Ok(Vec::new()),
        }
    }

    /// Writes `snapshot`, replacing what was stored.
    #[instrument(skip(self, snapshot), fields(scope = %self.store.scope()))]
    pub async fn write(&mut self, snapshot: Snapshot) -> PersistOutcome {
        if !self.durable {
            return PersistOutcome::Disabled;
        }
        let store = Arc::clone(&self.store);
        let result = tokio::task::spawn_blocking(move || write_snapshot(store.as_ref(), &snapshot))
            .await
            .unwrap_or_else(|e| {
                Err(Error::OperationFailed {
                    operation: "persist_snapshot".to_string(),
                    cause: e.to_string(),
                })
            });
        self.settle(result)
    }

    /// Removes every persisted key for this scope.
    #[instrument(skip(self), fields(scope = %self.store.scope()))]
    pub async fn clear(&mut self) -> PersistOutcome {
        if !self.durable {
            return PersistOutcome::Disabled;
        }
        let store = Arc::clone(&self.store);
        let result = tokio::task::spawn_blocking(move || -> Result<PersistOutcome> {
            for key in [BLOOM_KEY, URLS_KEY, HASHES_KEY] {
                store.remove(key)?;
            }
            Ok(PersistOutcome::Cleared)
        })
        .await
        .unwrap_or_else(|e| {
            Err(Error::OperationFailed {
                operation: "clear_snapshot".to_string(),
                cause: e.to_string(),
            })
        });
        self.settle(result)
    }

    fn settle(&mut self, result: Result<PersistOutcome>) -> PersistOutcome {
        let outcome = result.unwrap_or_else(|e| {
            self.durable = false;
            tracing::warn!(
                scope = %self.store.scope(),
                error = %e,
                "Persistence failed, continuing in memory without durable backing"
            );
            PersistOutcome::Failed {
                cause: e.to_string(),
            }
        });
        metrics::counter!("dedup_flush_total", "result" => outcome.as_str()).increment(1);
        outcome
    }
}

fn write_snapshot<S: KeyValueStore + ?Sized>(store: &S, snapshot: &Snapshot) -> Result<PersistOutcome> {
    let encoded = STANDARD.encode(&snapshot.bloom);
    let urls = to_json(&snapshot.urls)?;
    let hashes = to_json(&snapshot.hashes)?;

    store.set(BLOOM_KEY, &encoded)?;
    store.set(URLS_KEY, &urls)?;
    store.set(HASHES_KEY, &hashes)?;

    Ok(PersistOutcome::Written {
        bloom_bytes: snapshot.bloom.len(),
        url_keys: snapshot.urls.len(),
        digests: snapshot.hashes.len(),
    })
}

fn to_json(keys: &[String]) -> Result<String> {
    serde_json::to_string(keys).map_err(|e| Error::OperationFailed {
        operation: "encode_snapshot".to_string(),
        cause: e.to_string(),
    })
}

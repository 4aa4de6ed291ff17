//! # imgdedup
//!
//! Image downloader with a persistent two-tier deduplication engine.
//!
//! Every candidate image URL passes two gates before it is saved:
//!
//! - **URL tier**: the URL is canonicalized (volatile query parameters
//!   dropped, parameters sorted, scheme upgraded, default port and trailing
//!   slashes removed) and looked up in an exact store, so known locations are
//!   never fetched again
//! - **Content tier**: the fetched bytes are hashed with SHA-256 and checked
//!   against a Bloom filter, with positives confirmed by an exact store, so
//!   identical images behind different URLs are saved once
//!
//! History is scoped per origin and survives restarts through a key-value
//! store (`SQLite` by default).
//!
//! ## Example
//!
//! ```rust,ignore
//! use imgdedup::services::{DedupCoordinator, DeduplicationConfig, HttpFetcher};
//! use imgdedup::storage::SqliteStore;
//! use std::sync::Arc;
//!
//! let store = Arc::new(SqliteStore::open("history.db", "https://example.com")?);
//! let mut engine = DedupCoordinator::init(DeduplicationConfig::default(), store)?;
//! let record = engine
//!     .process("https://example.com/cat.jpg?utm_source=x", &HttpFetcher::default())
//!     .await;
//! println!("{}", record.stage());
//! engine.shutdown().await;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

pub mod config;
pub mod models;
pub mod observability;
pub mod services;
pub mod storage;

pub use config::AppConfig;
pub use models::{
    CanonicalKey, ContentDigest, DedupOutcome, DedupRecord, DedupStage, EngineStatus, FailureKind,
    FetchError,
};
pub use services::{
    BatchReport, BatchRunner, DedupCoordinator, DeduplicationConfig, Fetcher, HttpFetcher,
};
pub use storage::{InMemoryStore, KeyValueStore, SqliteStore};

/// Error type for imgdedup operations.
///
/// Per-candidate fetch and hash failures are not errors; they are reported as
/// [`DedupOutcome::Failed`].
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidParameter` | Bloom filter sized with `n = 0` or `p` outside `(0, 1)` |
/// | `InvalidInput` | Corrupt snapshots, unusable file names, bad config values |
/// | `OperationFailed` | `SQLite` errors, filesystem I/O, lock poisoning |
#[derive(Debug, ThisError)]
pub enum Error {
    /// A construction parameter is out of range.
    ///
    /// Raised when:
    /// - the Bloom filter design capacity is zero
    /// - the false-positive target is not strictly between 0 and 1
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Invalid input was provided.
    ///
    /// Raised when:
    /// - a persisted Bloom snapshot has a bad magic, version, or length
    /// - a persisted key list is not a JSON string array
    /// - a file name has no usable final component
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation failed.
    ///
    /// Raised when:
    /// - `SQLite` database operations fail
    /// - filesystem I/O errors occur
    /// - a blocking task panics or a lock is poisoned
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

/// Result type alias for imgdedup operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current Unix timestamp in seconds.
///
/// Falls back to 0 if the system clock is before the Unix epoch.
///
/// # Examples
///
/// ```rust
/// use imgdedup::current_timestamp;
///
/// let ts = current_timestamp();
/// assert!(ts > 0);
/// ```
#[must_use]
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

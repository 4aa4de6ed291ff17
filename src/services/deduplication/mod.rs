//! Two-tier image deduplication engine.
//!
//! A candidate passes two gates:
//! 1. **URL tier**: the canonical URL key is checked against an exact store
//!    before anything is fetched
//! 2. **Content tier**: the SHA-256 digest of the fetched bytes is checked
//!    against a Bloom filter, and positives are confirmed by an exact store
//!
//! Both tiers are persisted per origin scope and restored on the next run.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        DedupCoordinator                          │
//! │  ┌────────────────┐  ┌─────────────────┐  ┌───────────────────┐  │
//! │  │ UrlCanonicalizer│ │ ContentHasher   │  │ PersistenceAdapter│  │
//! │  │                │  │                 │  │                   │  │
//! │  │ volatile params│  │ SHA-256 on the  │  │ base64 + JSON     │  │
//! │  │ sorted query   │  │ blocking pool   │  │ via KeyValueStore │  │
//! │  └────────────────┘  └─────────────────┘  └───────────────────┘  │
//! │  ┌────────────────┐  ┌─────────────────┐  ┌───────────────────┐  │
//! │  │ ExactKeySet    │  │ BloomFilter     │  │ ExactKeySet       │  │
//! │  │ (urls)         │  │ (digests)       │  │ (digests)         │  │
//! │  └────────────────┘  └─────────────────┘  └───────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

mod bloom;
mod canonical;
mod config;
mod coordinator;
mod exact_store;
mod hasher;
mod persistence;

pub use bloom::{BloomFilter, MAX_BITS};
pub use canonical::{
    DEFAULT_VOLATILE_PARAMS, DEFAULT_VOLATILE_PREFIXES, OPAQUE_SCOPE, UrlCanonicalizer,
    normalize_scope, origin_scope,
};
pub use config::{
    DEFAULT_BLOOM_EXPECTED_ELEMENTS, DEFAULT_BLOOM_FALSE_POSITIVE_RATE, DEFAULT_INTER_ITEM_DELAY,
    DEFAULT_PERSIST_FLUSH_INTERVAL, DeduplicationConfig, SchedulePolicy,
};
pub(crate) use config::parse_bool;
pub use coordinator::DedupCoordinator;
pub use exact_store::{DEFAULT_PERSIST_WINDOW, ExactKeySet};
pub use hasher::{ContentHasher, DigestPrimitive, Sha256Digest};
pub use persistence::{
    BLOOM_KEY, HASHES_KEY, PersistOutcome, PersistenceAdapter, RestoredState, Snapshot, URLS_KEY,
};

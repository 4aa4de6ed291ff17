//! Storage layer.
//!
//! The dedup engine persists three small snapshots per origin scope through
//! the [`KeyValueStore`] trait:
//! - **bloom**: base64 of the serialized Bloom filter
//! - **urls**: JSON array of recent canonical URL keys
//! - **hashes**: JSON array of recent content digests

// Dropping the connection guard a statement early buys nothing.
#![allow(clippy::significant_drop_tightening)]

pub mod kv;
pub mod sqlite;
pub mod traits;

pub use kv::{InMemoryStore, SqliteStore};
pub use traits::KeyValueStore;

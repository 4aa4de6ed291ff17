//! Storage backend traits.

mod kv;

pub use kv::KeyValueStore;

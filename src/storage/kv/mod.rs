//! Key-value store implementations.
//!
//! | Store | Durable | Use |
//! |-------|---------|-----|
//! | [`InMemoryStore`] | no | tests and short-lived sessions |
//! | [`SqliteStore`] | yes | default history backing |

mod memory;
mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

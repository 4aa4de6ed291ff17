//! `SQLite` helpers shared by the durable stores.

mod connection;

pub use connection::{acquire_lock, configure_connection, open_connection};

//! `SQLite`-backed key-value store.
//!
//! All scopes share one database file; rows are keyed by `(scope, key)`.

use crate::storage::sqlite::{acquire_lock, configure_connection, open_connection};
use crate::storage::traits::KeyValueStore;
use crate::{Error, Result, current_timestamp};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::instrument;

/// Durable store bound to one origin scope.
///
/// # Concurrency Model
///
/// `rusqlite::Connection` is not `Sync`, so it sits behind a `Mutex`. WAL
/// mode plus `busy_timeout` let separate processes share the file.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE kv (
///     scope      TEXT NOT NULL,
///     key        TEXT NOT NULL,
///     value      TEXT NOT NULL,
///     updated_at INTEGER NOT NULL,
///     PRIMARY KEY (scope, key)
/// );
/// ```
pub struct SqliteStore {
    conn: Mutex<Connection>,
    scope: String,
    db_path: Option<PathBuf>,
}

impl SqliteStore {
    /// Opens (or creates) the database at `db_path` and binds it to `scope`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(db_path: impl AsRef<Path>, scope: impl Into<String>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        let conn = open_connection(&db_path)?;
        let store = Self {
            conn: Mutex::new(conn),
            scope: scope.into(),
            db_path: Some(db_path),
        };
        store.initialize()?;
        Ok(store)
    }

    /// Creates an in-memory database (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub fn in_memory(scope: impl Into<String>) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::OperationFailed {
            operation: "open_sqlite_in_memory".to_string(),
            cause: e.to_string(),
        })?;
        configure_connection(&conn);
        let store = Self {
            conn: Mutex::new(conn),
            scope: scope.into(),
            db_path: None,
        };
        store.initialize()?;
        Ok(store)
    }

    /// Returns the database path (None for in-memory).
    #[must_use]
    pub const fn db_path(&self) -> Option<&PathBuf> {
        self.db_path.as_ref()
    }

    /// Lists scopes that have stored history.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn scopes(&self) -> Result<Vec<String>> {
        let conn = acquire_lock(&self.conn);
        let mut stmt = conn
            .prepare("SELECT DISTINCT scope FROM kv ORDER BY scope")
            .map_err(|e| op_failed("kv_list_scopes", &e))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| op_failed("kv_list_scopes", &e))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| op_failed("kv_list_scopes", &e))
    }

    fn initialize(&self) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                scope      TEXT NOT NULL,
                key        TEXT NOT NULL,
                value      TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (scope, key)
            );",
        )
        .map_err(|e| op_failed("kv_initialize", &e))
    }
}

fn op_failed(operation: &str, e: &rusqlite::Error) -> Error {
    Error::OperationFailed {
        operation: operation.to_string(),
        cause: e.to_string(),
    }
}

impl KeyValueStore for SqliteStore {
    #[instrument(skip(self), fields(scope = %self.scope))]
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = acquire_lock(&self.conn);
        conn.query_row(
            "SELECT value FROM kv WHERE scope = ?1 AND key = ?2",
            params![self.scope, key],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| op_failed("kv_get", &e))
    }

    #[instrument(skip(self, value), fields(scope = %self.scope, value_len = value.len()))]
    fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        let now = i64::try_from(current_timestamp()).unwrap_or(i64::MAX);
        conn.execute(
            "INSERT INTO kv (scope, key, value, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(scope, key) DO UPDATE SET value = excluded.value,
                                                   updated_at = excluded.updated_at",
            params![self.scope, key, value, now],
        )
        .map(|_| ())
        .map_err(|e| op_failed("kv_set", &e))
    }

    #[instrument(skip(self), fields(scope = %self.scope))]
    fn remove(&self, key: &str) -> Result<bool> {
        let conn = acquire_lock(&self.conn);
        conn.execute(
            "DELETE FROM kv WHERE scope = ?1 AND key = ?2",
            params![self.scope, key],
        )
        .map(|n| n > 0)
        .map_err(|e| op_failed("kv_remove", &e))
    }

    fn scope(&self) -> &str {
        &self.scope
    }
}

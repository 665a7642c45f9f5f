//! SQLite-backed signal store and account name directory.
//!
//! The database lives at `~/.dealsignal/signals.db` unless the config points
//! elsewhere. Schema creation is idempotent and runs on every open.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

pub mod accounts;
pub mod signals;
pub mod types;
pub use types::*;

/// Handle shared between the batch orchestrator and request-time lookups.
pub type SharedDb = Arc<parking_lot::Mutex<SignalDb>>;

pub struct SignalDb {
    conn: Connection,
}

impl SignalDb {
    /// Borrow the underlying connection for ad-hoc queries.
    #[cfg(test)]
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// Open (or create) the database at the default path and apply the schema.
    pub fn open() -> Result<Self, DbError> {
        Self::open_at(Self::default_path()?)
    }

    /// Open a database at an explicit path.
    pub fn open_at(path: PathBuf) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;

        // WAL lets the nightly batch write while lookups read
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        crate::migrations::run_migrations(&conn).map_err(DbError::Migration)?;

        Ok(Self { conn })
    }

    /// `~/.dealsignal/signals.db`
    pub fn default_path() -> Result<PathBuf, DbError> {
        let home = dirs::home_dir().ok_or(DbError::HomeDirNotFound)?;
        Ok(home.join(".dealsignal").join("signals.db"))
    }

    pub fn into_shared(self) -> SharedDb {
        Arc::new(parking_lot::Mutex::new(self))
    }

    /// Number of rows (fresh or stale) stored for a logical signal key.
    #[cfg(test)]
    pub fn count_rows_for_key(
        &self,
        entity_key: &str,
        source: SignalSource,
    ) -> Result<i64, DbError> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM buying_signals WHERE entity_key = ?1 AND source = ?2",
            params![entity_key, source.as_str()],
            |row| row.get(0),
        )?)
    }

    /// Number of fresh rows across the whole store.
    #[cfg(test)]
    pub fn count_fresh_at(&self, now: DateTime<Utc>) -> Result<i64, DbError> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM buying_signals WHERE expires_at IS NULL OR expires_at > ?1",
            params![to_db_timestamp(now)],
            |row| row.get(0),
        )?)
    }
}

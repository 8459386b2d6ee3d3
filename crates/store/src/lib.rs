//! The embedded relational store: sessions, turns, steps, the event log,
//! file versions and changes, permission state, and context items.
//!
//! One SQLite connection behind a mutex; every public method takes `&self`
//! and runs its statements under that lock. The event append path is the
//! only multi-statement transaction with ordering significance — it
//! allocates the global id and the per-session seq atomically.

mod context_items;
mod events;
mod files;
mod permissions;
mod rows;
mod schema;
mod sessions;

pub use rows::*;

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::Connection;

use loft_domain::error::{Error, Result};

/// Handle to the embedded database. Cheap to share via `Arc`.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database file and run schema init.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Db(format!("opening {}: {e}", db_path.display())))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(db_err)?;
        let store = Self::from_connection(conn)?;
        tracing::info!(path = %db_path.display(), "store opened");
        Ok(store)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(db_err)?;
        conn.execute_batch(schema::SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn conn(&self) -> parking_lot::MutexGuard<'_, Connection> {
        self.conn.lock()
    }
}

/// Map a rusqlite error onto the shared error type.
pub(crate) fn db_err(e: rusqlite::Error) -> Error {
    match e {
        rusqlite::Error::QueryReturnedNoRows => Error::NotFound("row not found".into()),
        other => Error::Db(other.to_string()),
    }
}

/// RFC3339 timestamp for TEXT columns.
pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

//! SQLite persistence for media, locks, the posting queue and history.
//!
//! `Database` is the only mutation point for these tables; the sync,
//! scheduling and posting engines go through the methods defined in the
//! submodules rather than issuing SQL themselves.

mod schema;
pub mod history;
pub mod locks;
pub mod media;
pub mod queue;
pub mod sync_runs;
pub mod tenants;

use anyhow::Result;
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::Connection;
use std::path::PathBuf;

pub use history::{HistoryItem, HistoryStatus, NewHistoryItem, PostingMethod};
pub use locks::{LockReason, MediaLock};
pub use media::{MediaItem, NewMediaItem};
pub use queue::{QueueItem, QueueStatus};
pub use schema::{MIGRATIONS, SCHEMA};
pub use sync_runs::SyncRunRecord;
pub use tenants::ChatSettings;

/// Storage format for every timestamp column. Fixed width and UTC, so
/// comparing the text in SQL orders chronologically.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

pub(crate) fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub(crate) fn parse_ts(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT).map(|dt| dt.and_utc())
}

/// Read a timestamp column, surfacing malformed text as a conversion error.
pub(crate) fn ts_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn opt_ts_column(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => parse_ts(&raw).map(Some).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        }),
        None => Ok(None),
    }
}

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn })
    }

    pub fn initialize(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        self.run_migrations()?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        for migration in MIGRATIONS {
            let _ = self.conn.execute(migration, []);
        }
        Ok(())
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }
}

#[cfg(test)]
pub(crate) fn test_db() -> Database {
    let db = Database::open_in_memory().unwrap();
    db.initialize().unwrap();
    db
}

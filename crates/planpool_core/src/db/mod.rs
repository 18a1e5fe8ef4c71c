//! Plan store bootstrap.
//!
//! A usable store is one SQLite connection with pragmas set and every plan
//! schema migration applied. Nothing under `repo` sees a connection before
//! that point.
//!
//! # Invariants
//! - Schema version lives in `PRAGMA user_version`.
//! - A store written by a newer build is refused, never downgraded.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory, STORE_BUSY_TIMEOUT};

pub type DbResult<T> = Result<T, DbError>;

/// Failure to bring the plan store into a usable state.
#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    /// One schema step failed; the store stays at the previous version.
    Migration {
        version: u32,
        source: rusqlite::Error,
    },
    /// The file carries plan tables from a newer build.
    SchemaTooNew { found: u32, supported: u32 },
}

impl DbError {
    /// Whether another connection held the write lock past the busy timeout.
    pub fn is_busy(&self) -> bool {
        let err = match self {
            Self::Sqlite(err) | Self::Migration { source: err, .. } => err,
            Self::SchemaTooNew { .. } => return false,
        };
        matches!(
            err.sqlite_error_code(),
            Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
        )
    }
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "plan store error: {err}"),
            Self::Migration { version, source } => {
                write!(f, "plan store migration {version} failed: {source}")
            }
            Self::SchemaTooNew { found, supported } => write!(
                f,
                "plan store was written by a newer build (schema {found}, this build reads up to {supported})"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) | Self::Migration { source: err, .. } => Some(err),
            Self::SchemaTooNew { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

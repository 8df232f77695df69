//! Repository layer: key registry, annotation store, candidate source and
//! stable human labels.
//!
//! # Responsibility
//! - Define storage contracts used by the runner and matrix loader.
//! - Keep SQL details behind those contracts.
//!
//! # Invariants
//! - Repositories are built on a migrated connection (`try_new` checks it).
//! - Every repository borrows an explicitly opened connection; none of them
//!   reaches a global handle.

use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::stable_label::StableLabelValidationError;
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod annotation_repo;
pub mod candidate_repo;
pub mod key_repo;
pub mod stable_label_repo;

pub type StoreResult<T> = Result<T, StoreError>;

/// Error for key registry, annotation store and candidate reads.
#[derive(Debug)]
pub enum StoreError {
    Db(DbError),
    /// Row payload could not be encoded for storage.
    Encode(serde_json::Error),
    /// Connection schema is not at the version this binary expects.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Required table is missing.
    MissingRequiredTable(&'static str),
    /// Key names must be non-empty.
    InvalidKeyName(String),
    /// Stable label failed model validation.
    Validation(StableLabelValidationError),
    /// Persisted data cannot be converted to a valid read model.
    InvalidData(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Encode(err) => write!(f, "failed to encode annotation row: {err}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "annotation store requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "annotation store requires table `{table}`")
            }
            Self::InvalidKeyName(name) => write!(f, "invalid annotation key name `{name}`"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted annotation data: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Encode(err) => Some(err),
            Self::UninitializedConnection { .. } => None,
            Self::MissingRequiredTable(_) => None,
            Self::InvalidKeyName(_) => None,
            Self::Validation(err) => Some(err),
            Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<StableLabelValidationError> for StoreError {
    fn from(value: StableLabelValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Encode(value)
    }
}

/// Verifies schema version and presence of the tables a repository uses.
pub(crate) fn ensure_connection_ready(
    conn: &Connection,
    tables: &[&'static str],
) -> StoreResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(StoreError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for table in tables {
        if !table_exists(conn, table)? {
            return Err(StoreError::MissingRequiredTable(table));
        }
    }
    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> StoreResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn count_to_usize(value: i64) -> StoreResult<usize> {
    usize::try_from(value)
        .map_err(|_| StoreError::InvalidData(format!("negative row count `{value}`")))
}

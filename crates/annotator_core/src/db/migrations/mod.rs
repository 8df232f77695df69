//! Embedded schema migrations.
//!
//! # Invariants
//! - Versions are strictly increasing, starting at 1.
//! - The applied version lives in `PRAGMA user_version`; all pending steps
//!   run in one transaction.

use crate::db::{DbError, DbResult};
use log::{debug, info};
use rusqlite::Connection;

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "init_candidates_keys_annotations",
        sql: include_str!("0001_init.sql"),
    },
    Migration {
        version: 2,
        name: "stable_labels",
        sql: include_str!("0002_stable_labels.sql"),
    },
];

/// Highest schema version this build knows.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |migration| migration.version)
}

fn pending(current_version: u32) -> impl Iterator<Item = &'static Migration> {
    MIGRATIONS
        .iter()
        .filter(move |migration| migration.version > current_version)
}

/// Brings the connection's schema up to `latest_version()`.
///
/// # Errors
/// - `DbError::UnsupportedSchemaVersion` when the database is newer than
///   this build.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<()> {
    let from_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    let latest = latest_version();
    if from_version > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: from_version,
            latest_supported: latest,
        });
    }
    if from_version == latest {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for migration in pending(from_version) {
        debug!(
            "event=db_migrate module=db status=start version={} name={}",
            migration.version, migration.name
        );
        tx.execute_batch(migration.sql)?;
        tx.pragma_update(None, "user_version", migration.version)?;
    }
    tx.commit()?;

    info!("event=db_migrate module=db status=ok from_version={from_version} to_version={latest}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{latest_version, pending, MIGRATIONS};

    #[test]
    fn versions_are_strictly_increasing_from_one() {
        assert_eq!(MIGRATIONS[0].version, 1);
        assert!(MIGRATIONS
            .windows(2)
            .all(|pair| pair[0].version < pair[1].version));
        assert_eq!(latest_version(), MIGRATIONS.len() as u32);
    }

    #[test]
    fn pending_skips_applied_versions() {
        assert_eq!(pending(0).count(), MIGRATIONS.len());
        assert_eq!(pending(latest_version()).count(), 0);
    }
}

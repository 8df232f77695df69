//! Annotation key registry contracts and SQLite implementation.
//!
//! # Responsibility
//! - Maintain the per-kind universe of key names, scoped by group.
//! - Provide get-or-create that is safe against concurrent creators.
//!
//! # Invariants
//! - At most one key exists per `(name, group)` within a kind; the table's
//!   uniqueness constraint enforces it and inserts never fail on it.
//! - Key ids are monotonic and never reused, so id order is a stable column
//!   order.

use crate::model::annotation::{AnnotationKey, AnnotationKind, KeyGroup};
use crate::repo::{count_to_usize, ensure_connection_ready, StoreError, StoreResult};
use log::debug;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashSet;
use std::marker::PhantomData;

/// Result of `KeyRegistry::get_or_create`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLookup {
    pub key: AnnotationKey,
    /// `true` when this call inserted the key.
    pub created: bool,
}

/// Repository interface for one kind's key registry.
pub trait KeyRegistry {
    /// Returns the key for `(name, group)`, creating it when missing.
    fn get_or_create(&self, name: &str, group: KeyGroup) -> StoreResult<KeyLookup>;
    fn get(&self, name: &str, group: KeyGroup) -> StoreResult<Option<AnnotationKey>>;
    /// Lists keys of one group ordered by id ascending.
    fn list(&self, group: KeyGroup) -> StoreResult<Vec<AnnotationKey>>;
    /// Returns the key names of one group.
    fn names(&self, group: KeyGroup) -> StoreResult<HashSet<String>>;
    fn count(&self) -> StoreResult<usize>;
    /// Deletes every key of this kind. Returns the number removed.
    fn clear(&self) -> StoreResult<usize>;
}

/// SQLite-backed key registry for annotation kind `K`.
pub struct SqliteKeyRegistry<'conn, K> {
    conn: &'conn Connection,
    kind: PhantomData<K>,
}

impl<'conn, K: AnnotationKind> SqliteKeyRegistry<'conn, K> {
    /// Creates a registry from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> StoreResult<Self> {
        ensure_connection_ready(conn, &[K::KEY_TABLE])?;
        Ok(Self {
            conn,
            kind: PhantomData,
        })
    }
}

impl<K: AnnotationKind> KeyRegistry for SqliteKeyRegistry<'_, K> {
    fn get_or_create(&self, name: &str, group: KeyGroup) -> StoreResult<KeyLookup> {
        if name.trim().is_empty() {
            return Err(StoreError::InvalidKeyName(name.to_string()));
        }

        // Insert-or-ignore then fetch: the loser of a race reads the winner's row.
        let inserted = self.conn.execute(
            &format!(
                "INSERT INTO {} (name, key_group) VALUES (?1, ?2)
                 ON CONFLICT (name, key_group) DO NOTHING;",
                K::KEY_TABLE
            ),
            params![name, group],
        )?;

        let key = self.get(name, group)?.ok_or_else(|| {
            StoreError::InvalidData(format!(
                "key `{name}` (group {group}) missing from {} after insert",
                K::KEY_TABLE
            ))
        })?;

        if inserted == 0 {
            debug!(
                "event=key_conflict_resolved module=repo status=ok kind={} key_id={} group={group}",
                K::NAME,
                key.id
            );
        }

        Ok(KeyLookup {
            key,
            created: inserted > 0,
        })
    }

    fn get(&self, name: &str, group: KeyGroup) -> StoreResult<Option<AnnotationKey>> {
        let key = self
            .conn
            .query_row(
                &format!(
                    "SELECT id, name, key_group FROM {} WHERE name = ?1 AND key_group = ?2;",
                    K::KEY_TABLE
                ),
                params![name, group],
                parse_key_row,
            )
            .optional()?;
        Ok(key)
    }

    fn list(&self, group: KeyGroup) -> StoreResult<Vec<AnnotationKey>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id, name, key_group FROM {} WHERE key_group = ?1 ORDER BY id ASC;",
            K::KEY_TABLE
        ))?;
        let keys = stmt
            .query_map([group], parse_key_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    fn names(&self, group: KeyGroup) -> StoreResult<HashSet<String>> {
        Ok(self.list(group)?.into_iter().map(|key| key.name).collect())
    }

    fn count(&self) -> StoreResult<usize> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {};", K::KEY_TABLE),
            [],
            |row| row.get(0),
        )?;
        count_to_usize(count)
    }

    fn clear(&self) -> StoreResult<usize> {
        let deleted = self
            .conn
            .execute(&format!("DELETE FROM {};", K::KEY_TABLE), [])?;
        Ok(deleted)
    }
}

fn parse_key_row(row: &Row<'_>) -> rusqlite::Result<AnnotationKey> {
    Ok(AnnotationKey {
        id: row.get("id")?,
        name: row.get("name")?,
        group: row.get("key_group")?,
    })
}

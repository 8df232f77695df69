//! Annotation store contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist one sparse annotation row per candidate and kind.
//! - Implement the replace / append-if-absent write modes and the
//!   split-scoped and global clear operations.
//!
//! # Invariants
//! - Stored `keys_json` and `values_json` arrays always have equal length.
//! - Append-if-absent compares the full encoded `(keys, values)` tuple; a
//!   different existing row is left untouched.
//! - Replacing the key set deletes every row of the kind, not only the
//!   split's rows, because column meaning may have shifted.

use crate::model::annotation::{AnnotationKind, AnnotationRow, WriteMode};
use crate::model::candidate::{CandidateId, Split};
use crate::repo::key_repo::{KeyRegistry, SqliteKeyRegistry};
use crate::repo::{count_to_usize, ensure_connection_ready, StoreError, StoreResult};
use log::info;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::marker::PhantomData;

/// What `AnnotationStore::upsert` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No row existed; one was written.
    Inserted,
    /// A different row existed and was overwritten (replace mode).
    Replaced,
    /// An identical row already existed; nothing was written.
    Unchanged,
    /// A different row existed and was kept (append-if-absent mode).
    KeptExisting,
}

/// Rows and keys removed by a clear operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClearSummary {
    pub rows_deleted: usize,
    pub keys_deleted: usize,
}

/// Repository interface for one kind's annotation rows.
pub trait AnnotationStore<K: AnnotationKind> {
    fn upsert(&self, row: &AnnotationRow<K::Value>, mode: WriteMode) -> StoreResult<UpsertOutcome>;
    fn get(&self, candidate_id: CandidateId) -> StoreResult<Option<AnnotationRow<K::Value>>>;
    /// Lists stored rows of `class_name` candidates in `split`, ordered by
    /// candidate id.
    fn rows_for(&self, class_name: &str, split: Split) -> StoreResult<Vec<AnnotationRow<K::Value>>>;
    fn count(&self) -> StoreResult<usize>;
    /// Deletes rows for `split` (limited to `class_names` when non-empty), or
    /// every row plus the key registry when `replace_key_set` is set.
    fn clear(
        &self,
        split: Split,
        class_names: &[String],
        replace_key_set: bool,
    ) -> StoreResult<ClearSummary>;
    /// Deletes every row of the kind. Keys are kept.
    fn clear_all(&self) -> StoreResult<usize>;
}

/// SQLite-backed annotation store for kind `K`.
pub struct SqliteAnnotationStore<'conn, K> {
    conn: &'conn Connection,
    kind: PhantomData<K>,
}

impl<'conn, K: AnnotationKind> SqliteAnnotationStore<'conn, K> {
    /// Creates a store from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> StoreResult<Self> {
        ensure_connection_ready(conn, &[K::ANNOTATION_TABLE, K::KEY_TABLE, "candidates"])?;
        Ok(Self {
            conn,
            kind: PhantomData,
        })
    }

    fn stored_columns(&self, candidate_id: CandidateId) -> StoreResult<Option<(String, String)>> {
        let columns = self
            .conn
            .query_row(
                &format!(
                    "SELECT keys_json, values_json FROM {} WHERE candidate_id = ?1;",
                    K::ANNOTATION_TABLE
                ),
                [candidate_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(columns)
    }
}

impl<K: AnnotationKind> AnnotationStore<K> for SqliteAnnotationStore<'_, K> {
    fn upsert(&self, row: &AnnotationRow<K::Value>, mode: WriteMode) -> StoreResult<UpsertOutcome> {
        check_pair_limit::<K>(row.candidate_id(), row.len())?;
        let keys_json = serde_json::to_string(&row.keys())?;
        let values_json = serde_json::to_string(&row.values())?;

        match (self.stored_columns(row.candidate_id())?, mode) {
            (Some((keys, values)), _) if keys == keys_json && values == values_json => {
                Ok(UpsertOutcome::Unchanged)
            }
            (Some(_), WriteMode::AppendIfAbsent) => Ok(UpsertOutcome::KeptExisting),
            (Some(_), WriteMode::Replace) => {
                self.conn.execute(
                    &format!(
                        "UPDATE {} SET keys_json = ?2, values_json = ?3 WHERE candidate_id = ?1;",
                        K::ANNOTATION_TABLE
                    ),
                    params![row.candidate_id(), keys_json, values_json],
                )?;
                Ok(UpsertOutcome::Replaced)
            }
            (None, _) => {
                self.conn.execute(
                    &format!(
                        "INSERT INTO {} (candidate_id, keys_json, values_json) VALUES (?1, ?2, ?3);",
                        K::ANNOTATION_TABLE
                    ),
                    params![row.candidate_id(), keys_json, values_json],
                )?;
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    fn get(&self, candidate_id: CandidateId) -> StoreResult<Option<AnnotationRow<K::Value>>> {
        match self.stored_columns(candidate_id)? {
            Some((keys, values)) => Ok(Some(decode_row::<K>(candidate_id, &keys, &values)?)),
            None => Ok(None),
        }
    }

    fn rows_for(&self, class_name: &str, split: Split) -> StoreResult<Vec<AnnotationRow<K::Value>>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT a.candidate_id AS candidate_id,
                    a.keys_json AS keys_json,
                    a.values_json AS values_json
             FROM {} a
             JOIN candidates c ON c.id = a.candidate_id
             WHERE c.class_name = ?1 AND c.split = ?2
             ORDER BY a.candidate_id ASC;",
            K::ANNOTATION_TABLE
        ))?;
        let mut rows = stmt.query(params![class_name, split])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_annotation_row::<K>(row)?);
        }
        Ok(items)
    }

    fn count(&self) -> StoreResult<usize> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {};", K::ANNOTATION_TABLE),
            [],
            |row| row.get(0),
        )?;
        count_to_usize(count)
    }

    fn clear(
        &self,
        split: Split,
        class_names: &[String],
        replace_key_set: bool,
    ) -> StoreResult<ClearSummary> {
        if replace_key_set {
            let rows_deleted = self.clear_all()?;
            let keys_deleted = SqliteKeyRegistry::<K>::try_new(self.conn)?.clear()?;
            info!(
                "event=annotations_clear module=repo status=ok kind={} scope=key_set rows_deleted={rows_deleted} keys_deleted={keys_deleted}",
                K::NAME
            );
            return Ok(ClearSummary {
                rows_deleted,
                keys_deleted,
            });
        }

        let mut sql = format!(
            "DELETE FROM {} WHERE candidate_id IN (
                SELECT id FROM candidates WHERE split = ?",
            K::ANNOTATION_TABLE
        );
        let mut bind_values: Vec<Value> = vec![Value::Integer(split)];
        if !class_names.is_empty() {
            let placeholders = vec!["?"; class_names.len()].join(", ");
            sql.push_str(&format!(" AND class_name IN ({placeholders})"));
            bind_values.extend(class_names.iter().cloned().map(Value::Text));
        }
        sql.push_str(");");

        let rows_deleted = self.conn.execute(&sql, params_from_iter(bind_values))?;
        info!(
            "event=annotations_clear module=repo status=ok kind={} scope=split split={split} rows_deleted={rows_deleted}",
            K::NAME
        );
        Ok(ClearSummary {
            rows_deleted,
            keys_deleted: 0,
        })
    }

    fn clear_all(&self) -> StoreResult<usize> {
        let deleted = self
            .conn
            .execute(&format!("DELETE FROM {};", K::ANNOTATION_TABLE), [])?;
        Ok(deleted)
    }
}

fn parse_annotation_row<K: AnnotationKind>(row: &Row<'_>) -> StoreResult<AnnotationRow<K::Value>> {
    let candidate_id: CandidateId = row.get("candidate_id")?;
    let keys: String = row.get("keys_json")?;
    let values: String = row.get("values_json")?;
    decode_row::<K>(candidate_id, &keys, &values)
}

pub(crate) fn decode_row<K: AnnotationKind>(
    candidate_id: CandidateId,
    keys_json: &str,
    values_json: &str,
) -> StoreResult<AnnotationRow<K::Value>> {
    let keys: Vec<String> = serde_json::from_str(keys_json).map_err(|err| {
        StoreError::InvalidData(format!(
            "invalid keys for candidate {candidate_id} in {}.keys_json: {err}",
            K::ANNOTATION_TABLE
        ))
    })?;
    let values: Vec<K::Value> = serde_json::from_str(values_json).map_err(|err| {
        StoreError::InvalidData(format!(
            "invalid values for candidate {candidate_id} in {}.values_json: {err}",
            K::ANNOTATION_TABLE
        ))
    })?;
    let (key_count, value_count) = (keys.len(), values.len());
    let row = AnnotationRow::from_columns(candidate_id, keys, values).ok_or_else(|| {
        StoreError::InvalidData(format!(
            "candidate {candidate_id} in {} has {key_count} keys but {value_count} values",
            K::ANNOTATION_TABLE
        ))
    })?;
    check_pair_limit::<K>(candidate_id, row.len())?;
    Ok(row)
}

fn check_pair_limit<K: AnnotationKind>(candidate_id: CandidateId, len: usize) -> StoreResult<()> {
    match K::MAX_PAIRS {
        Some(max) if len > max => Err(StoreError::InvalidData(format!(
            "candidate {candidate_id} has {len} {} pairs; at most {max} allowed",
            K::NAME
        ))),
        _ => Ok(()),
    }
}

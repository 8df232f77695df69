//! Stable label repository contracts and SQLite implementation.
//!
//! # Invariants
//! - At most one label exists per `(context_stable_ids, annotator_name)`.
//! - Rows have no foreign key to `candidates`; deleting candidates or
//!   clearing annotation kinds never touches them.

use crate::model::candidate::Split;
use crate::model::stable_label::{
    join_context_ids, split_context_ids, validate_context_ids, StableLabel,
};
use crate::repo::annotation_repo::UpsertOutcome;
use crate::repo::{count_to_usize, ensure_connection_ready, StoreError, StoreResult};
use log::debug;
use rusqlite::{params, Connection, OptionalExtension, Row};

/// Repository interface for stable human labels.
pub trait StableLabelStore {
    /// Writes `label`, overwriting the split and value of an existing label
    /// from the same annotator.
    fn upsert(&self, label: &StableLabel) -> StoreResult<UpsertOutcome>;
    fn get(
        &self,
        context_stable_ids: &[String],
        annotator_name: &str,
    ) -> StoreResult<Option<StableLabel>>;
    /// Lists labels of `split` ordered by context ids, then annotator.
    fn list_by_split(&self, split: Split) -> StoreResult<Vec<StableLabel>>;
    fn count(&self) -> StoreResult<usize>;
    /// Returns `true` when a label was removed.
    fn delete(&self, context_stable_ids: &[String], annotator_name: &str) -> StoreResult<bool>;
}

pub struct SqliteStableLabelRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteStableLabelRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> StoreResult<Self> {
        ensure_connection_ready(conn, &["stable_labels"])?;
        Ok(Self { conn })
    }
}

impl StableLabelStore for SqliteStableLabelRepository<'_> {
    fn upsert(&self, label: &StableLabel) -> StoreResult<UpsertOutcome> {
        let joined = label.joined_context_ids();
        let existing = self.get(label.context_stable_ids(), label.annotator_name())?;
        let outcome = match existing {
            Some(stored) if stored == *label => return Ok(UpsertOutcome::Unchanged),
            Some(_) => UpsertOutcome::Replaced,
            None => UpsertOutcome::Inserted,
        };

        self.conn.execute(
            "INSERT INTO stable_labels (context_stable_ids, annotator_name, split, value)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (context_stable_ids, annotator_name) DO UPDATE SET
                 split = excluded.split,
                 value = excluded.value;",
            params![joined, label.annotator_name(), label.split, label.value],
        )?;

        debug!(
            "event=stable_label_upsert module=repo status=ok outcome={outcome:?} split={} contexts={}",
            label.split,
            label.context_stable_ids().len()
        );
        Ok(outcome)
    }

    fn get(
        &self,
        context_stable_ids: &[String],
        annotator_name: &str,
    ) -> StoreResult<Option<StableLabel>> {
        validate_context_ids(context_stable_ids)?;
        let raw = self
            .conn
            .query_row(
                "SELECT context_stable_ids, annotator_name, split, value
                 FROM stable_labels
                 WHERE context_stable_ids = ?1 AND annotator_name = ?2;",
                params![join_context_ids(context_stable_ids), annotator_name],
                read_raw_row,
            )
            .optional()?;
        raw.map(decode_row).transpose()
    }

    fn list_by_split(&self, split: Split) -> StoreResult<Vec<StableLabel>> {
        let mut stmt = self.conn.prepare(
            "SELECT context_stable_ids, annotator_name, split, value
             FROM stable_labels
             WHERE split = ?1
             ORDER BY context_stable_ids ASC, annotator_name ASC;",
        )?;
        let raw_rows = stmt
            .query_map([split], read_raw_row)?
            .collect::<Result<Vec<_>, _>>()?;
        raw_rows.into_iter().map(decode_row).collect()
    }

    fn count(&self) -> StoreResult<usize> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM stable_labels;", [], |row| row.get(0))?;
        count_to_usize(count)
    }

    fn delete(&self, context_stable_ids: &[String], annotator_name: &str) -> StoreResult<bool> {
        validate_context_ids(context_stable_ids)?;
        let deleted = self.conn.execute(
            "DELETE FROM stable_labels WHERE context_stable_ids = ?1 AND annotator_name = ?2;",
            params![join_context_ids(context_stable_ids), annotator_name],
        )?;
        Ok(deleted > 0)
    }
}

struct RawStableLabel {
    context_stable_ids: String,
    annotator_name: String,
    split: Split,
    value: i64,
}

fn read_raw_row(row: &Row<'_>) -> rusqlite::Result<RawStableLabel> {
    Ok(RawStableLabel {
        context_stable_ids: row.get(0)?,
        annotator_name: row.get(1)?,
        split: row.get(2)?,
        value: row.get(3)?,
    })
}

fn decode_row(raw: RawStableLabel) -> StoreResult<StableLabel> {
    StableLabel::new(
        split_context_ids(&raw.context_stable_ids),
        raw.annotator_name,
        raw.split,
        raw.value,
    )
    .map_err(|err| {
        StoreError::InvalidData(format!(
            "stable label `{}`: {err}",
            raw.context_stable_ids
        ))
    })
}

//! Read-only candidate source.
//!
//! Candidates are written by the upstream generation pipeline. This module
//! only selects them by class and split.

use crate::model::candidate::{Candidate, CandidateId, Split};
use crate::repo::{count_to_usize, ensure_connection_ready, StoreError, StoreResult};
use rusqlite::{params, Connection, Row};

/// Boundary over the external candidate table.
pub trait CandidateSource {
    /// Loads every candidate of `class_name` in `split`, ordered by id.
    fn candidates(&self, class_name: &str, split: Split) -> StoreResult<Vec<Candidate>>;
    /// Returns candidate ids of `class_name` in `split`, ordered by id.
    fn candidate_ids(&self, class_name: &str, split: Split) -> StoreResult<Vec<CandidateId>>;
    fn count(&self, class_name: &str, split: Split) -> StoreResult<usize>;
}

/// SQLite-backed candidate source.
pub struct SqliteCandidateRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteCandidateRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> StoreResult<Self> {
        ensure_connection_ready(conn, &["candidates"])?;
        Ok(Self { conn })
    }
}

impl CandidateSource for SqliteCandidateRepository<'_> {
    fn candidates(&self, class_name: &str, split: Split) -> StoreResult<Vec<Candidate>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, class_name, split, data
             FROM candidates
             WHERE class_name = ?1 AND split = ?2
             ORDER BY id ASC;",
        )?;
        let mut rows = stmt.query(params![class_name, split])?;
        let mut candidates = Vec::new();
        while let Some(row) = rows.next()? {
            candidates.push(parse_candidate_row(row)?);
        }
        Ok(candidates)
    }

    fn candidate_ids(&self, class_name: &str, split: Split) -> StoreResult<Vec<CandidateId>> {
        let mut stmt = self.conn.prepare(
            "SELECT id FROM candidates
             WHERE class_name = ?1 AND split = ?2
             ORDER BY id ASC;",
        )?;
        let ids = stmt
            .query_map(params![class_name, split], |row| row.get(0))?
            .collect::<Result<Vec<CandidateId>, _>>()?;
        Ok(ids)
    }

    fn count(&self, class_name: &str, split: Split) -> StoreResult<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM candidates WHERE class_name = ?1 AND split = ?2;",
            params![class_name, split],
            |row| row.get(0),
        )?;
        count_to_usize(count)
    }
}

fn parse_candidate_row(row: &Row<'_>) -> StoreResult<Candidate> {
    let id: CandidateId = row.get("id")?;
    let data_text: String = row.get("data")?;
    let data = serde_json::from_str(&data_text).map_err(|err| {
        StoreError::InvalidData(format!(
            "invalid json payload for candidate {id} in candidates.data: {err}"
        ))
    })?;

    Ok(Candidate {
        id,
        class_name: row.get("class_name")?,
        split: row.get("split")?,
        data,
    })
}

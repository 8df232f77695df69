//! Matrix reduction over persisted annotation rows.

use crate::matrix::sparse::SparseMatrix;
use crate::model::annotation::{AnnotationKind, KeyGroup};
use crate::model::candidate::Split;
use crate::repo::annotation_repo::{AnnotationStore, SqliteAnnotationStore};
use crate::repo::candidate_repo::{CandidateSource, SqliteCandidateRepository};
use crate::repo::key_repo::{KeyRegistry, SqliteKeyRegistry};
use crate::repo::StoreResult;
use log::debug;
use rusqlite::Connection;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;

/// Builds sparse matrices for kind `K` from a migrated connection.
pub struct MatrixLoader<'conn, K> {
    conn: &'conn Connection,
    kind: PhantomData<K>,
}

impl<'conn, K: AnnotationKind> MatrixLoader<'conn, K> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self {
            conn,
            kind: PhantomData,
        }
    }

    /// Loads the matrix for `class_name` candidates in `split`, with columns
    /// taken from the registry of `group`.
    ///
    /// Stored key names missing from the registry are skipped.
    pub fn load(
        &self,
        class_name: &str,
        split: Split,
        group: KeyGroup,
    ) -> StoreResult<SparseMatrix<K::Value>> {
        let keys = SqliteKeyRegistry::<K>::try_new(self.conn)?.list(group)?;
        let candidate_ids =
            SqliteCandidateRepository::try_new(self.conn)?.candidate_ids(class_name, split)?;
        let stored = SqliteAnnotationStore::<K>::try_new(self.conn)?.rows_for(class_name, split)?;

        let columns: HashMap<&str, usize> = keys
            .iter()
            .enumerate()
            .map(|(col, key)| (key.name.as_str(), col))
            .collect();
        let mut by_candidate: HashMap<_, _> = stored
            .into_iter()
            .map(|row| (row.candidate_id(), row))
            .collect();

        let mut unknown_keys = 0_usize;
        let rows = candidate_ids
            .iter()
            .map(|candidate_id| {
                let Some(row) = by_candidate.remove(candidate_id) else {
                    return Vec::new();
                };
                row.pairs()
                    .iter()
                    .filter_map(|(name, value)| match columns.get(name.as_str()) {
                        Some(col) => Some((*col, *value)),
                        None => {
                            unknown_keys += 1;
                            None
                        }
                    })
                    .collect()
            })
            .collect();

        if unknown_keys > 0 {
            debug!(
                "event=matrix_load module=matrix status=ok kind={} class={class_name} split={split} unknown_keys_skipped={unknown_keys}",
                K::NAME
            );
        }

        Ok(SparseMatrix::new(candidate_ids, keys, rows, K::absent()))
    }
}

/// Lazy, restartable reference to one class's matrix for a split.
///
/// Holds no data; `load` re-derives the matrix from storage every time.
pub struct MatrixHandle<K> {
    class_name: String,
    split: Split,
    group: KeyGroup,
    kind: PhantomData<K>,
}

impl<K: AnnotationKind> MatrixHandle<K> {
    pub fn new(class_name: impl Into<String>, split: Split, group: KeyGroup) -> Self {
        Self {
            class_name: class_name.into(),
            split,
            group,
            kind: PhantomData,
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn split(&self) -> Split {
        self.split
    }

    pub fn load(&self, conn: &Connection) -> StoreResult<SparseMatrix<K::Value>> {
        MatrixLoader::<K>::new(conn).load(&self.class_name, self.split, self.group)
    }
}

impl<K> Clone for MatrixHandle<K> {
    fn clone(&self) -> Self {
        Self {
            class_name: self.class_name.clone(),
            split: self.split,
            group: self.group,
            kind: PhantomData,
        }
    }
}

impl<K> Debug for MatrixHandle<K> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatrixHandle")
            .field("class_name", &self.class_name)
            .field("split", &self.split)
            .field("group", &self.group)
            .finish()
    }
}

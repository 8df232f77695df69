//! Row-compressed sparse matrix over candidates and annotation keys.

use crate::model::annotation::AnnotationKey;
use crate::model::candidate::CandidateId;

/// Sparse candidate × key matrix.
///
/// Each row stores `(column, value)` entries sorted by column. Cells without
/// an entry read as the kind's absent sentinel.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseMatrix<V> {
    candidate_ids: Vec<CandidateId>,
    keys: Vec<AnnotationKey>,
    rows: Vec<Vec<(usize, V)>>,
    absent: V,
}

impl<V: Copy> SparseMatrix<V> {
    /// `rows[i]` holds the entries of `candidate_ids[i]`; entries are sorted
    /// by column here.
    pub(crate) fn new(
        candidate_ids: Vec<CandidateId>,
        keys: Vec<AnnotationKey>,
        mut rows: Vec<Vec<(usize, V)>>,
        absent: V,
    ) -> Self {
        for row in &mut rows {
            row.sort_by_key(|(col, _)| *col);
        }
        Self {
            candidate_ids,
            keys,
            rows,
            absent,
        }
    }

    /// Returns `(rows, columns)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.candidate_ids.len(), self.keys.len())
    }

    /// Cell value, or the absent sentinel for empty and out-of-range cells.
    pub fn get(&self, row: usize, col: usize) -> V {
        self.rows
            .get(row)
            .and_then(|entries| {
                entries
                    .binary_search_by_key(&col, |(entry_col, _)| *entry_col)
                    .ok()
                    .map(|index| entries[index].1)
            })
            .unwrap_or(self.absent)
    }

    /// Stored `(column, value)` entries of one row.
    pub fn row(&self, row: usize) -> &[(usize, V)] {
        self.rows.get(row).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }

    pub fn candidate_ids(&self) -> &[CandidateId] {
        &self.candidate_ids
    }

    pub fn keys(&self) -> &[AnnotationKey] {
        &self.keys
    }

    pub fn absent(&self) -> V {
        self.absent
    }

    pub fn row_index(&self, candidate_id: CandidateId) -> Option<usize> {
        self.candidate_ids.binary_search(&candidate_id).ok()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.keys.iter().position(|key| key.name == name)
    }

    pub fn to_dense(&self) -> Vec<Vec<V>> {
        let (_, cols) = self.shape();
        self.rows
            .iter()
            .map(|entries| {
                let mut dense = vec![self.absent; cols];
                for (col, value) in entries {
                    dense[*col] = *value;
                }
                dense
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::SparseMatrix;
    use crate::model::annotation::AnnotationKey;

    fn key(id: i64, name: &str) -> AnnotationKey {
        AnnotationKey {
            id,
            name: name.to_string(),
            group: 0,
        }
    }

    #[test]
    fn get_reads_entries_and_absent_cells() {
        let matrix = SparseMatrix::new(
            vec![10, 20],
            vec![key(1, "a"), key(2, "b")],
            vec![vec![(1, 4), (0, 3)], vec![]],
            0_i64,
        );

        assert_eq!(matrix.shape(), (2, 2));
        assert_eq!(matrix.get(0, 0), 3);
        assert_eq!(matrix.get(0, 1), 4);
        assert_eq!(matrix.get(1, 0), 0);
        assert_eq!(matrix.get(5, 5), 0);
        assert_eq!(matrix.row(0), &[(0, 3), (1, 4)]);
        assert_eq!(matrix.nnz(), 2);
        assert_eq!(matrix.row_index(20), Some(1));
        assert_eq!(matrix.column_index("b"), Some(1));
        assert_eq!(matrix.to_dense(), vec![vec![3, 4], vec![0, 0]]);
    }
}

//! Candidate-by-key sparse matrices.
//!
//! # Responsibility
//! - Reduce persisted annotation rows for one split into one sparse matrix
//!   per candidate class.
//!
//! # Invariants
//! - Rows are every candidate of the class in the split, ordered by id.
//! - Columns are exactly the key registry for the group, ordered by key id.
//! - Matrices are always re-derived from storage; nothing is cached.

pub mod loader;
pub mod sparse;

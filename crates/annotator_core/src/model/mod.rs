//! Domain model for candidates, annotation keys and annotation rows.
//!
//! # Responsibility
//! - Define the read-only candidate record handed to extraction functions.
//! - Define the annotation kinds (feature, label, gold label) and their
//!   absent sentinels.
//! - Define stable human labels that survive candidate regeneration.
//!
//! # Invariants
//! - An annotation row is one ordered sequence of `(key, value)` pairs; the
//!   parallel `keys`/`values` arrays only exist at the storage boundary.
//! - Absent-valued pairs are never part of a row.

pub mod annotation;
pub mod candidate;
pub mod stable_label;

//! Core annotation engine.
//!
//! Applies caller-supplied extraction functions to stored candidates in
//! parallel, persists sparse per-candidate annotation vectors with a shared
//! key registry, and reduces them into sparse matrices per candidate class.

pub mod db;
pub mod extract;
pub mod logging;
pub mod matrix;
pub mod model;
pub mod repo;
pub mod service;

pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use extract::function::{
    ExtractOutput, ExtractionError, ExtractionFunction, FnExtractor, SharedExtractor,
};
pub use logging::{default_log_level, init_logging, logging_status};
pub use matrix::loader::{MatrixHandle, MatrixLoader};
pub use matrix::sparse::SparseMatrix;
pub use model::annotation::{
    AnnotationKey, AnnotationKind, AnnotationRow, Feature, GoldLabel, KeyGroup, KeyId, Label,
    WriteMode,
};
pub use model::candidate::{Candidate, CandidateId, Split};
pub use model::stable_label::{
    join_context_ids, split_context_ids, StableLabel, StableLabelValidationError,
    STABLE_ID_DELIMITER,
};
pub use repo::annotation_repo::{
    AnnotationStore, ClearSummary, SqliteAnnotationStore, UpsertOutcome,
};
pub use repo::candidate_repo::{CandidateSource, SqliteCandidateRepository};
pub use repo::key_repo::{KeyLookup, KeyRegistry, SqliteKeyRegistry};
pub use repo::stable_label_repo::{SqliteStableLabelRepository, StableLabelStore};
pub use repo::{StoreError, StoreResult};
pub use service::annotator::{
    Annotator, ApplyOptions, ApplyOutcome, ClassRunSummary, FeatureAnnotator,
    GoldLabelAnnotator, LabelAnnotator, RunError, RunResult, RunnerState,
};
pub use service::cancel::CancellationToken;
pub use service::config::{AnnotatorConfig, ConfigError};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}

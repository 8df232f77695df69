//! Extraction function contract.
//!
//! Functions are pure: they read only the candidate's in-memory payload and
//! return `(key, value)` pairs. They must not reach the database.

use crate::model::candidate::{Candidate, CandidateId};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Output of one extraction function call.
pub type ExtractOutput<V> = Result<Vec<(String, V)>, Box<dyn Error + Send + Sync>>;

/// Shared handle to an extraction function, cloned into every worker.
pub type SharedExtractor<V> = Arc<dyn ExtractionFunction<V>>;

/// Caller-supplied candidate → `(key, value)` function.
pub trait ExtractionFunction<V>: Send + Sync {
    /// Stable name used in logs and failure reports.
    fn name(&self) -> &str;

    /// Whether this function runs for candidates of `class_name`.
    fn applies_to(&self, _class_name: &str) -> bool {
        true
    }

    fn extract(&self, candidate: &Candidate) -> ExtractOutput<V>;
}

/// Closure-backed extraction function.
pub struct FnExtractor<F> {
    name: String,
    classes: Option<Vec<String>>,
    func: F,
}

impl<F> FnExtractor<F> {
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            classes: None,
            func,
        }
    }

    /// Restricts this function to the given candidate classes.
    pub fn for_classes<I, S>(mut self, classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.classes = Some(classes.into_iter().map(Into::into).collect());
        self
    }
}

impl<V, F> ExtractionFunction<V> for FnExtractor<F>
where
    F: Fn(&Candidate) -> ExtractOutput<V> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn applies_to(&self, class_name: &str) -> bool {
        match &self.classes {
            Some(classes) => classes.iter().any(|class| class == class_name),
            None => true,
        }
    }

    fn extract(&self, candidate: &Candidate) -> ExtractOutput<V> {
        (self.func)(candidate)
    }
}

/// Per-candidate extraction failure. Never aborts a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    /// The function returned an error.
    Failed {
        candidate_id: CandidateId,
        function: String,
        message: String,
    },
    /// The function panicked.
    Panicked {
        candidate_id: CandidateId,
        function: String,
        message: String,
    },
    /// The function returned pairs that cannot be stored.
    Malformed {
        candidate_id: CandidateId,
        function: String,
        reason: String,
    },
}

impl ExtractionError {
    pub fn candidate_id(&self) -> CandidateId {
        match self {
            Self::Failed { candidate_id, .. }
            | Self::Panicked { candidate_id, .. }
            | Self::Malformed { candidate_id, .. } => *candidate_id,
        }
    }

    pub fn function(&self) -> &str {
        match self {
            Self::Failed { function, .. }
            | Self::Panicked { function, .. }
            | Self::Malformed { function, .. } => function,
        }
    }

    /// Short machine-readable code for log events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Failed { .. } => "extraction_failed",
            Self::Panicked { .. } => "extraction_panicked",
            Self::Malformed { .. } => "extraction_malformed",
        }
    }
}

impl Display for ExtractionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed {
                candidate_id,
                function,
                message,
            } => write!(
                f,
                "extraction function `{function}` failed on candidate {candidate_id}: {message}"
            ),
            Self::Panicked {
                candidate_id,
                function,
                message,
            } => write!(
                f,
                "extraction function `{function}` panicked on candidate {candidate_id}: {message}"
            ),
            Self::Malformed {
                candidate_id,
                function,
                reason,
            } => write!(
                f,
                "extraction function `{function}` returned malformed output for candidate {candidate_id}: {reason}"
            ),
        }
    }
}

impl Error for ExtractionError {}

//! Stable human labels.
//!
//! A stable label identifies its candidate by the stable ids of the
//! candidate's contexts instead of the candidate id, so it survives candidate
//! deletion and regeneration.
//!
//! # Invariants
//! - `context_stable_ids` is non-empty and no id is empty or contains the
//!   storage delimiter.
//! - `annotator_name` is non-empty after trimming.

use crate::model::candidate::Split;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Delimiter joining context stable ids in storage.
pub const STABLE_ID_DELIMITER: &str = "~~";

/// Human annotation for one candidate from one annotator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StableLabel {
    context_stable_ids: Vec<String>,
    annotator_name: String,
    pub split: Split,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StableLabelValidationError {
    NoContextIds,
    EmptyContextId,
    DelimiterInContextId(String),
    EmptyAnnotatorName,
}

impl Display for StableLabelValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoContextIds => write!(f, "stable label needs at least one context id"),
            Self::EmptyContextId => write!(f, "context stable ids cannot be empty"),
            Self::DelimiterInContextId(id) => write!(
                f,
                "context stable id `{id}` contains the delimiter `{STABLE_ID_DELIMITER}`"
            ),
            Self::EmptyAnnotatorName => write!(f, "annotator name cannot be empty"),
        }
    }
}

impl Error for StableLabelValidationError {}

impl StableLabel {
    pub fn new<I, S>(
        context_stable_ids: I,
        annotator_name: impl Into<String>,
        split: Split,
        value: i64,
    ) -> Result<Self, StableLabelValidationError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let context_stable_ids: Vec<String> =
            context_stable_ids.into_iter().map(Into::into).collect();
        validate_context_ids(&context_stable_ids)?;

        let annotator_name = annotator_name.into();
        if annotator_name.trim().is_empty() {
            return Err(StableLabelValidationError::EmptyAnnotatorName);
        }

        Ok(Self {
            context_stable_ids,
            annotator_name,
            split,
            value,
        })
    }

    pub fn context_stable_ids(&self) -> &[String] {
        &self.context_stable_ids
    }

    pub fn annotator_name(&self) -> &str {
        &self.annotator_name
    }

    /// Storage form of the context ids.
    pub fn joined_context_ids(&self) -> String {
        join_context_ids(&self.context_stable_ids)
    }
}

/// Joins context ids with `STABLE_ID_DELIMITER`.
pub fn join_context_ids<S: AsRef<str>>(ids: &[S]) -> String {
    ids.iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(STABLE_ID_DELIMITER)
}

/// Splits a stored id list back into its parts.
pub fn split_context_ids(joined: &str) -> Vec<String> {
    joined
        .split(STABLE_ID_DELIMITER)
        .map(str::to_string)
        .collect()
}

pub(crate) fn validate_context_ids<S: AsRef<str>>(
    ids: &[S],
) -> Result<(), StableLabelValidationError> {
    if ids.is_empty() {
        return Err(StableLabelValidationError::NoContextIds);
    }
    for id in ids {
        let id = id.as_ref();
        if id.is_empty() {
            return Err(StableLabelValidationError::EmptyContextId);
        }
        if id.contains(STABLE_ID_DELIMITER) {
            return Err(StableLabelValidationError::DelimiterInContextId(
                id.to_string(),
            ));
        }
    }
    Ok(())
}

//! Annotation kinds, keys and sparse rows.
//!
//! # Responsibility
//! - Describe each annotation kind (storage tables, value type, absent
//!   sentinel) through one shared trait.
//! - Keep key/value pairing structural: rows hold pairs, not two vectors.
//!
//! # Invariants
//! - `AnnotationRow` never contains a pair whose value is the kind's absent
//!   sentinel.
//! - Key identity is `(name, group)` within one kind.

use crate::model::candidate::CandidateId;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

/// Integer namespace that scopes key names inside one kind.
pub type KeyGroup = i64;

/// Store-assigned key identifier. Monotonic and never reused.
pub type KeyId = i64;

/// Shared contract for every annotation kind.
///
/// Each kind owns a key table and an annotation table with identical column
/// layout; only the value type and its sentinel differ.
pub trait AnnotationKind: Send + Sync + 'static {
    /// Value stored for one key on one candidate.
    type Value: Copy + PartialEq + Debug + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Short kind name used in log events.
    const NAME: &'static str;
    /// Table holding the key registry for this kind.
    const KEY_TABLE: &'static str;
    /// Table holding one annotation row per candidate for this kind.
    const ANNOTATION_TABLE: &'static str;
    /// Upper bound on stored pairs per candidate; `None` means unbounded.
    const MAX_PAIRS: Option<usize> = None;

    /// The "not present" value. Never stored.
    fn absent() -> Self::Value;

    fn is_absent(value: &Self::Value) -> bool {
        *value == Self::absent()
    }

    /// Rejects values that cannot be persisted faithfully.
    fn is_well_formed(_value: &Self::Value) -> bool {
        true
    }
}

/// Numeric feature produced by feature extractors.
#[derive(Debug, Clone, Copy)]
pub enum Feature {}

impl AnnotationKind for Feature {
    type Value = f64;

    const NAME: &'static str = "feature";
    const KEY_TABLE: &'static str = "feature_keys";
    const ANNOTATION_TABLE: &'static str = "features";

    fn absent() -> f64 {
        0.0
    }

    fn is_well_formed(value: &f64) -> bool {
        value.is_finite()
    }
}

/// Discrete vote produced by a labeling function. `0` means abstain.
#[derive(Debug, Clone, Copy)]
pub enum Label {}

impl AnnotationKind for Label {
    type Value = i64;

    const NAME: &'static str = "label";
    const KEY_TABLE: &'static str = "label_keys";
    const ANNOTATION_TABLE: &'static str = "labels";

    fn absent() -> i64 {
        0
    }
}

/// Human or reference label. Keys name the annotator; a candidate carries
/// at most one gold value.
#[derive(Debug, Clone, Copy)]
pub enum GoldLabel {}

impl AnnotationKind for GoldLabel {
    type Value = i64;

    const NAME: &'static str = "gold_label";
    const KEY_TABLE: &'static str = "gold_label_keys";
    const ANNOTATION_TABLE: &'static str = "gold_labels";
    const MAX_PAIRS: Option<usize> = Some(1);

    fn absent() -> i64 {
        0
    }
}

/// Persisted annotation key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AnnotationKey {
    pub id: KeyId,
    pub name: String,
    pub group: KeyGroup,
}

/// How an annotation row is written when one may already exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Always write, overwriting any existing row for the candidate.
    Replace,
    /// Write only when no row exists; an identical existing row is a no-op.
    AppendIfAbsent,
}

/// Sparse per-candidate annotation vector for one kind.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationRow<V> {
    candidate_id: CandidateId,
    pairs: Vec<(String, V)>,
}

impl<V: Copy + PartialEq> AnnotationRow<V> {
    /// Builds a row from extractor output, dropping absent-valued pairs.
    ///
    /// Pair order is preserved.
    pub fn sparse<K>(candidate_id: CandidateId, pairs: impl IntoIterator<Item = (String, V)>) -> Self
    where
        K: AnnotationKind<Value = V>,
    {
        let pairs = pairs
            .into_iter()
            .filter(|(_, value)| !K::is_absent(value))
            .collect();
        Self {
            candidate_id,
            pairs,
        }
    }

    /// Rebuilds a row from its two stored columns.
    ///
    /// Returns `None` when the columns have different lengths.
    pub fn from_columns(candidate_id: CandidateId, keys: Vec<String>, values: Vec<V>) -> Option<Self> {
        if keys.len() != values.len() {
            return None;
        }
        Some(Self {
            candidate_id,
            pairs: keys.into_iter().zip(values).collect(),
        })
    }

    pub fn candidate_id(&self) -> CandidateId {
        self.candidate_id
    }

    pub fn pairs(&self) -> &[(String, V)] {
        &self.pairs
    }

    pub fn keys(&self) -> Vec<&str> {
        self.pairs.iter().map(|(key, _)| key.as_str()).collect()
    }

    pub fn values(&self) -> Vec<V> {
        self.pairs.iter().map(|(_, value)| *value).collect()
    }

    /// Returns the value stored for `key`, if any.
    pub fn get(&self, key: &str) -> Option<V> {
        self.pairs
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| *value)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

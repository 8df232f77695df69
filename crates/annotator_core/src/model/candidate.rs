//! Candidate read model.
//!
//! Candidates are produced upstream. This crate never creates or deletes
//! them; it only reads the fields extraction functions need.

use serde_json::Value;

/// Stable candidate identifier assigned by the candidate store.
pub type CandidateId = i64;

/// Processing partition tag (train/dev/test, ...).
pub type Split = i64;

/// One domain record that annotations are computed for.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id: CandidateId,
    /// Candidate class (relation type) used to pick extraction functions and
    /// to group matrices.
    pub class_name: String,
    pub split: Split,
    /// Free-form payload carrying whatever fields extraction functions read.
    pub data: Value,
}

impl Candidate {
    pub fn new(id: CandidateId, class_name: impl Into<String>, split: Split, data: Value) -> Self {
        Self {
            id,
            class_name: class_name.into(),
            split,
            data,
        }
    }

    /// Returns one top-level payload field, if the payload is an object.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.as_object().and_then(|fields| fields.get(name))
    }

    /// Returns one top-level payload field as a string slice.
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.field(name).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::Candidate;
    use serde_json::json;

    #[test]
    fn field_reads_object_payload() {
        let candidate = Candidate::new(7, "PartTemp", 0, json!({"mention": "LM358", "page": 2}));
        assert_eq!(candidate.str_field("mention"), Some("LM358"));
        assert_eq!(candidate.field("page"), Some(&json!(2)));
        assert!(candidate.field("missing").is_none());
    }

    #[test]
    fn field_is_none_for_non_object_payload() {
        let candidate = Candidate::new(1, "PartTemp", 0, json!([1, 2, 3]));
        assert!(candidate.field("0").is_none());
    }
}

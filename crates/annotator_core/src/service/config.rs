//! Runner configuration.
//!
//! # Invariants
//! - `worker_count`, `queue_capacity` and `batch_size` are never zero after
//!   `validate()`.

use crate::model::annotation::KeyGroup;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::num::NonZeroUsize;
use std::thread;

const DEFAULT_QUEUE_CAPACITY: usize = 256;
const DEFAULT_BATCH_SIZE: usize = 64;

/// Worker pool and key-scope settings shared by every run of one annotator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotatorConfig {
    /// Number of extraction worker threads.
    pub worker_count: usize,
    /// Capacity of both the work queue and the output channel.
    pub queue_capacity: usize,
    /// Candidates enqueued between two cancellation checks.
    pub batch_size: usize,
    /// Key group new keys are created in and matrices read from.
    pub key_group: KeyGroup,
}

impl Default for AnnotatorConfig {
    fn default() -> Self {
        Self {
            worker_count: thread::available_parallelism().map_or(1, NonZeroUsize::get),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            batch_size: DEFAULT_BATCH_SIZE,
            key_group: 0,
        }
    }
}

impl AnnotatorConfig {
    /// Parses a JSON config; missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_workers(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn with_key_group(mut self, key_group: KeyGroup) -> Self {
        self.key_group = key_group;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("worker_count", self.worker_count),
            ("queue_capacity", self.queue_capacity),
            ("batch_size", self.batch_size),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero",
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Parse(serde_json::Error),
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(err) => write!(f, "invalid annotator config: {err}"),
            Self::Invalid { field, reason } => {
                write!(f, "invalid annotator config field `{field}`: {reason}")
            }
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Parse(err) => Some(err),
            Self::Invalid { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AnnotatorConfig, ConfigError};

    #[test]
    fn default_config_is_valid() {
        let config = AnnotatorConfig::default();
        assert!(config.worker_count >= 1);
        config.validate().expect("default config should validate");
    }

    #[test]
    fn from_json_fills_missing_fields() {
        let config = AnnotatorConfig::from_json(r#"{"worker_count": 3, "key_group": 2}"#)
            .expect("partial config should parse");
        assert_eq!(config.worker_count, 3);
        assert_eq!(config.key_group, 2);
        assert_eq!(config.queue_capacity, AnnotatorConfig::default().queue_capacity);
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let err = AnnotatorConfig::default()
            .with_workers(0)
            .validate()
            .expect_err("zero workers must be rejected");
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "worker_count",
                ..
            }
        ));

        let err = AnnotatorConfig::from_json(r#"{"batch_size": 0}"#)
            .expect_err("zero batch size must be rejected");
        assert!(err.to_string().contains("batch_size"));
    }
}

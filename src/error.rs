//! Error types for the risk engine.
//!
//! Configuration problems are fatal at startup, engine errors are
//! per-request and cheap to clone so a single failed computation can be
//! handed to every caller waiting on it.

use thiserror::Error;

/// Startup-time configuration errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// DQI dimension weights do not add up to 100.
    #[error("DQI dimension weights must sum to 100, got {0}")]
    WeightSum(f64),

    /// A DQI weight is negative or not a finite number.
    #[error("Invalid weight for DQI dimension {dimension}: {value}")]
    InvalidWeight { dimension: String, value: f64 },

    /// Two agents in the roster share a name.
    #[error("Duplicate agent name in roster: {0}")]
    DuplicateAgent(String),

    /// An agent entry has an empty name.
    #[error("Agent names must not be empty")]
    EmptyAgentName,

    /// An agent weight is not a finite number.
    #[error("Agent {0} has a non-finite weight")]
    InvalidAgentWeight(String),

    /// A duration or count setting is out of range.
    #[error("Invalid setting {key}: {reason}")]
    InvalidSetting { key: String, reason: String },
}

impl ConfigError {
    /// Create an invalid setting error
    pub fn setting(key: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::InvalidSetting {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised while serving an analysis request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// The study is not known to the source at all.
    #[error("Study not found: {0}")]
    StudyNotFound(String),

    /// The study source failed while loading inputs.
    #[error("Source error for study {study_id}: {message}")]
    Source { study_id: String, message: String },

    /// The background computation task panicked or was aborted.
    #[error("Computation task for study {study_id} did not complete: {message}")]
    TaskAborted { study_id: String, message: String },
}

impl EngineError {
    /// Returns true when the study does not exist (as opposed to a failure).
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::StudyNotFound(_))
    }
}

/// Errors reported by a study source.
#[derive(Error, Debug)]
pub enum SourceError {
    /// Feed file could not be read.
    #[error("Feed I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Feed file could not be parsed.
    #[error("Feed parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Upstream data is unavailable.
    #[error("Source unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_distinct() {
        assert!(EngineError::StudyNotFound("S1".to_string()).is_not_found());
        assert!(!EngineError::Source {
            study_id: "S1".to_string(),
            message: "boom".to_string()
        }
        .is_not_found());
    }

    #[test]
    fn test_config_error_messages() {
        let err = ConfigError::WeightSum(99.0);
        assert_eq!(err.to_string(), "DQI dimension weights must sum to 100, got 99");

        let err = ConfigError::setting("cache.ttl_seconds", "must be at least 1");
        assert!(err.to_string().contains("cache.ttl_seconds"));
    }
}

//! Error types for the decision core
//!
//! - [`InputError`]: an aggregate that violates its reconciliation invariants
//! - [`ConfigError`]: a configuration that must not be run

use std::path::PathBuf;

/// Malformed or inconsistent aggregate, rejected before diagnosis
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InputError {
    /// success + failure != total
    #[error("count mismatch: {success} successes + {failure} failures != {total} total")]
    CountMismatch {
        /// Reported total
        total: u64,
        /// Reported successes
        success: u64,
        /// Reported failures
        failure: u64,
    },

    /// A distribution does not sum to the count it partitions
    #[error("{field} sums to {actual}, expected {expected}")]
    DistributionMismatch {
        /// Offending field
        field: &'static str,
        /// Count the distribution must reconcile with
        expected: u64,
        /// Actual sum
        actual: u64,
    },

    /// SUCCESS bucket disagrees with success_count
    #[error("SUCCESS bucket holds {actual}, success_count is {expected}")]
    SuccessBucketMismatch {
        /// success_count
        expected: u64,
        /// SUCCESS bucket
        actual: u64,
    },

    /// Entity mapping has a zero-count key
    #[error("{field} contains entity '{entity}' with no failures")]
    EmptyEntity {
        /// Offending field
        field: &'static str,
        /// Entity name
        entity: String,
    },

    /// Rate outside [0, 1], inconsistent with counts, or defined for an empty window
    #[error("invalid success_rate: {0}")]
    InvalidRate(String),

    /// Latency negative, non-finite, or defined for an empty window
    #[error("invalid average_latency_ms: {0}")]
    InvalidLatency(String),
}

/// Configuration that prevents the control loop from starting
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Value outside its permitted range
    #[error("{field} = {value} is out of range ({expected})")]
    OutOfRange {
        /// Dotted field path
        field: &'static str,
        /// Offending value
        value: String,
        /// Human description of the permitted range
        expected: &'static str,
    },

    /// Two settings contradict each other
    #[error("inconsistent configuration: {0}")]
    Inconsistent(String),

    /// Config file could not be read
    #[error("io error reading {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// TOML parse failure
    #[error("invalid TOML: {0}")]
    InvalidToml(#[from] toml::de::Error),

    /// YAML parse failure
    #[error("invalid YAML: {0}")]
    InvalidYaml(#[from] serde_yaml::Error),

    /// Unknown config file format
    #[error("unsupported config format: '{0}' (expected .toml, .yaml or .yml)")]
    UnsupportedFormat(String),
}

impl ConfigError {
    /// Create out-of-range error
    pub fn out_of_range(
        field: &'static str,
        value: impl std::fmt::Display,
        expected: &'static str,
    ) -> Self {
        Self::OutOfRange {
            field,
            value: value.to_string(),
            expected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_error_display() {
        let err = InputError::CountMismatch {
            total: 10,
            success: 4,
            failure: 5,
        };
        assert!(err.to_string().contains("count mismatch"));
    }

    #[test]
    fn config_error_display() {
        let err = ConfigError::out_of_range("guardrail.confidence_threshold", 1.5, "0.0..=1.0");
        let text = err.to_string();
        assert!(text.contains("guardrail.confidence_threshold"));
        assert!(text.contains("1.5"));
    }
}

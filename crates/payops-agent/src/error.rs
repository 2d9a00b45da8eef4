//! Error types for the agent runtime
//!
//! One enum per collaborator so each fault can be recovered where it happens:
//! - [`SourceError`]: the signal source could not produce a window
//! - [`StoreError`]: the lesson log could not be read or written
//! - [`OpsError`]: the payment-ops system rejected a call
//! - [`DispatchError`]: an action could not be carried out
//! - [`AgentError`]: umbrella type; only configuration faults are fatal

use payops_core::{ConfigError, InputError};
use std::path::PathBuf;
use std::time::Duration;

/// Signal source failure
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Upstream feed is not reachable
    #[error("signal source unavailable: {0}")]
    Unavailable(String),

    /// Source did not answer within its budget
    #[error("signal source timed out after {0:?}")]
    Timeout(Duration),

    /// Source produced data that could not be decoded
    #[error("malformed signal: {0}")]
    Malformed(String),
}

/// Lesson store failure
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// File could not be opened, read or written
    #[error("io error on {path}: {source}")]
    Io {
        /// Log path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A lesson could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Hash chain broken at the given entry
    #[error("integrity violation at seq {seq}: {reason}")]
    IntegrityViolation {
        /// First bad entry
        seq: u64,
        /// What did not match
        reason: String,
    },

    /// Store refuses writes (injected or degraded)
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Rejection from the payment-ops system
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OpsError {
    /// Call reached the system and was refused
    #[error("rejected: {0}")]
    Rejected(String),

    /// System could not be reached
    #[error("unreachable: {0}")]
    Unreachable(String),
}

/// Failure to carry out a decided action
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// External call failed
    #[error("ops call failed: {0}")]
    Ops(#[from] OpsError),

    /// External call exceeded the dispatch timeout
    #[error("ops call timed out after {0:?}")]
    Timeout(Duration),
}

/// Umbrella error for the agent runtime
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Rejected aggregate
    #[error("input error: {0}")]
    Input(#[from] InputError),

    /// Signal source fault
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    /// Lesson store fault
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Dispatch fault
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

impl AgentError {
    /// Whether the control loop must not start (or continue) after this error
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, AgentError::Config(_))
    }
}

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, AgentError>;

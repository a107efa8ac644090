//! Error taxonomy for the harvest pipeline.
//!
//! Only [`PipelineError::Configuration`] (and the profile loading failures
//! that map onto it) is fatal. Everything else is logged by the stage that
//! hit it and the run carries on with whatever it already has.

use std::time::Duration;
use thiserror::Error;

/// Result type used across the pipeline stages.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A required secret or endpoint is missing or unusable.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The model reply could not be turned into JSON records, even after repair.
    #[error("malformed model output ({reason}): {preview}")]
    MalformedOutput { reason: String, preview: String },

    /// Connection-level failure talking to an external service.
    #[error("network error: {0}")]
    Network(String),

    /// A single request exceeded its timeout.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// The remote side answered with a non-success status.
    #[error("remote rejected request with status {status}: {body}")]
    RemoteRejection { status: u16, body: String },

    #[error("failed to read profile: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid profile: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl PipelineError {
    /// Classify a reqwest failure, keeping timeouts distinct from other
    /// transport errors.
    pub fn from_reqwest(operation: &'static str, after: Duration, e: reqwest::Error) -> Self {
        if e.is_timeout() {
            PipelineError::Timeout { operation, after }
        } else {
            PipelineError::Network(format!("{operation}: {e}"))
        }
    }

    /// Whether a bounded retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            PipelineError::Network(_) | PipelineError::Timeout { .. } => true,
            PipelineError::RemoteRejection { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

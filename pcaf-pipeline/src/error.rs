//! Error types for the `pcaf-pipeline` crate.

use std::time::Duration;

use pcaf_rag::RagError;
use thiserror::Error;

/// Errors raised by ingestion, orchestration and upload processing.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Input was rejected before any processing; every violation is listed.
    #[error("Validation failed: {}", .0.join(", "))]
    Validation(Vec<String>),

    /// A run was requested while another one is in flight.
    #[error("Pipeline is already running")]
    AlreadyRunning,

    /// A backend service answered with an error or could not be reached.
    #[error("Upstream error ({service}): {message}")]
    Upstream {
        /// The remote service.
        service: String,
        /// A description of the failure.
        message: String,
    },

    /// A backend request exceeded its client-side timeout.
    #[error("Request to {service} timed out after {after:?}")]
    Timeout {
        /// The remote service.
        service: String,
        /// The configured timeout.
        after: Duration,
    },

    /// Document store or embedding failure.
    #[error(transparent)]
    Store(#[from] RagError),

    #[error("Schedule not found: {0}")]
    ScheduleNotFound(String),

    /// An input file or payload could not be decoded.
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    /// Returns `true` when a remote service could not be reached or did not
    /// answer, so callers can tell "no data" apart from "can't reach service".
    pub fn is_upstream(&self) -> bool {
        match self {
            Self::Upstream { .. } | Self::Timeout { .. } => true,
            Self::Store(err) => err.is_upstream(),
            _ => false,
        }
    }

    pub(crate) fn upstream(service: &str, message: impl Into<String>) -> Self {
        Self::Upstream { service: service.to_string(), message: message.into() }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<csv::Error> for PipelineError {
    fn from(err: csv::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

/// A convenience result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

//! Error types for the `pcaf-rag` crate.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur in document store and retrieval operations.
#[derive(Debug, Error)]
pub enum RagError {
    /// An error occurred during embedding generation.
    #[error("Embedding error ({provider}): {message}")]
    EmbeddingError {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// A structural failure in the document store backend.
    #[error("Document store error ({backend}): {message}")]
    StoreError {
        /// The store backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// The remote vector store answered with a non-success status.
    #[error("Vector store API error ({status}): {body}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// Raw response body text.
        body: String,
    },

    /// A request to a remote service exceeded its client-side timeout.
    #[error("Request to {service} timed out after {after:?}")]
    Timeout {
        /// The remote service that did not answer in time.
        service: String,
        /// The configured timeout.
        after: Duration,
    },

    /// Connect or transport failure talking to a remote service.
    #[error("Network error ({service}): {message}")]
    Network {
        /// The remote service.
        service: String,
        /// A description of the failure.
        message: String,
    },

    /// An embedding vector did not match the store dimensionality.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Store dimensionality.
        expected: usize,
        /// Length of the offending vector.
        actual: usize,
    },

    /// A configuration validation error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// JSON encoding or decoding failed.
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl RagError {
    /// Returns `true` when the error means a remote service could not be reached
    /// or did not answer, as opposed to a local or data error.
    pub fn is_upstream(&self) -> bool {
        matches!(self, Self::HttpStatus { .. } | Self::Timeout { .. } | Self::Network { .. })
    }

    pub(crate) fn store(backend: &str, message: impl Into<String>) -> Self {
        Self::StoreError { backend: backend.to_string(), message: message.into() }
    }
}

/// A convenience result type for retrieval operations.
pub type Result<T> = std::result::Result<T, RagError>;

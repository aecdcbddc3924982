//! Error taxonomy for the ingestion and retrieval pipeline.
//!
//! Failures are classified by how callers should react:
//!
//! - `Input`: rejected before any task is created; nothing to retry.
//! - `TransientUpstream`: a dependency hiccup worth retrying with backoff.
//! - `PermanentUpstream`: a dependency rejected the request; retrying is
//!   pointless.
//! - `Consistency`: the pipeline's own invariants were violated.
//! - `Cancelled`: the task was cancelled by its owner.
//! - `Storage`: the local database failed.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Invalid caller input (empty text, unsupported content type, unknown
    /// identifiers).
    #[error("invalid input: {0}")]
    Input(String),

    /// Retryable upstream failure (rate limit, 5xx, network).
    #[error("transient upstream failure at {stage}: {message}")]
    TransientUpstream {
        stage: &'static str,
        message: String,
    },

    /// Non-retryable upstream failure (auth, malformed request, exhausted
    /// retries).
    #[error("upstream failure at {stage}: {message}")]
    PermanentUpstream {
        stage: &'static str,
        message: String,
    },

    /// Internal invariant violation (count mismatches, impossible states).
    #[error("consistency error: {0}")]
    Consistency(String),

    /// The owning user cancelled the task.
    #[error("task cancelled")]
    Cancelled,

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl Error {
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TransientUpstream { .. })
    }

    /// Demote a transient failure to permanent once retries are exhausted.
    pub fn into_permanent(self) -> Error {
        match self {
            Error::TransientUpstream { stage, message } => Error::PermanentUpstream {
                stage,
                message: format!("retries exhausted: {message}"),
            },
            other => other,
        }
    }
}

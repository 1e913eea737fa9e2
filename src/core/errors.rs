// Error taxonomy for the correction workflow
//
// Three failure classes matter to callers:
// - Transport: the remote service is unreachable or the poll loop gave up.
//   Always batch-fatal.
// - RemoteStage: the service ran but reported a named stage failure. Recorded
//   per image, never aborts a batch.
// - Precondition: rejected locally before any remote call is made.
//
// An image skipped because no chart was detected is NOT an error; it is a
// ledger outcome (`ImageStatus::Skipped`).

use std::time::Duration;
use thiserror::Error;

/// Transport-level failures talking to the remote pipeline service
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("service rejected request (status {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("malformed response from service: {0}")]
    BadResponse(String),

    #[error("circuit breaker open, remote service unavailable")]
    CircuitOpen,

    #[error("batch poll exceeded safety cap of {0:?}")]
    PollTimeout(Duration),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid service URL: {0}")]
    InvalidBaseUrl(String),

    #[error("worker count must be in [{min}, {max}], got {got}")]
    InvalidWorkerCount { min: usize, max: usize, got: usize },

    #[error("poll interval must be > 0 ms")]
    InvalidPollInterval,

    #[error("parallel threshold must be > 0")]
    InvalidParallelThreshold,

    #[error("environment variable parsing failed: {0}")]
    EnvVarError(String),
}

/// Workflow orchestration errors
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("remote stage '{stage}' failed: {detail}")]
    RemoteStage { stage: String, detail: String },

    #[error("precondition not met: {0}")]
    Precondition(String),

    #[error("another operation is already running")]
    AlreadyRunning,

    #[error("no images loaded in registry")]
    NoImages,

    #[error("image index {index} out of range (total: {total})")]
    InvalidIndex { index: usize, total: usize },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl WorkflowError {
    /// Whether this error must abort a whole batch rather than a single image.
    pub fn is_batch_fatal(&self) -> bool {
        matches!(self, WorkflowError::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, WorkflowError>;
pub type TransportResult<T> = std::result::Result<T, TransportError>;

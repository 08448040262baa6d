//! Error types for telemetry acquisition and sample storage.

use thiserror::Error;

/// Errors raised by a telemetry client.
///
/// Every transport failure is recoverable from the acquisition loop's point
/// of view; only [`ClientError::Unavailable`] stops it from retrying, whether
/// it comes from the availability check or from a connect attempt.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Connecting to, or reading from, the device failed.
    #[error("{0}")]
    Transport(String),

    /// The telemetry client cannot be used at all (missing driver, bad build).
    #[error("telemetry client unavailable: {0}")]
    Unavailable(String),

    /// A connect attempt was abandoned because the loop was asked to stop.
    #[error("connect cancelled")]
    Cancelled,
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Transport(err.to_string())
    }
}

/// Errors raised by the sample log.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A job name was empty after trimming whitespace.
    #[error("job name must not be empty")]
    EmptyJobName,

    /// No job with this id exists.
    #[error("no job with id {0}")]
    UnknownJob(cobot_types::JobId),

    /// The underlying SQLite database rejected an operation.
    #[error("sample log database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A persisted timestamp could not be parsed.
    #[error("invalid stored timestamp {0:?}")]
    InvalidTimestamp(String),

    /// Writing an export failed.
    #[error("export failed: {0}")]
    Io(#[from] std::io::Error),
}

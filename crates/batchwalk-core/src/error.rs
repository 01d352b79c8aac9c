use thiserror::Error;

use crate::domain::RecordId;

/// Operational classification of a `BatchError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected synchronously, nothing was scheduled.
    InvalidArgument,
    /// A per-record handler failed.
    Handler,
    /// Store, procedure engine, queue or config failure.
    Infrastructure,
    Cancelled,
}

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("handler failed on record {record}: {message}")]
    Handler { record: RecordId, message: String },

    #[error("record store error: {0}")]
    Store(String),

    #[error("procedure '{name}' failed: {message}")]
    Procedure { name: String, message: String },

    #[error("task queue is closed")]
    QueueClosed,

    #[error("queue worker error: {0}")]
    Worker(String),

    #[error("walk cancelled")]
    Cancelled,

    #[error("config error: {0}")]
    Config(String),
}

impl BatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BatchError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            BatchError::Handler { .. } => ErrorKind::Handler,
            BatchError::Cancelled => ErrorKind::Cancelled,
            BatchError::Store(_)
            | BatchError::Procedure { .. }
            | BatchError::QueueClosed
            | BatchError::Worker(_)
            | BatchError::Config(_) => ErrorKind::Infrastructure,
        }
    }

    /// Wrap any failure raised while handling `record`.
    ///
    /// Errors that already carry a record are passed through unchanged.
    pub fn for_record(record: RecordId, err: BatchError) -> Self {
        match err {
            BatchError::Handler { .. } | BatchError::Cancelled => err,
            other => BatchError::Handler {
                record,
                message: other.to_string(),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, BatchError>;

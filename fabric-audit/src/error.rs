//! Error types for the audit pipeline
//!
//! Errors flow freely inside the pipeline with `?`. The public recording
//! operations on [`AuditDispatcher`](crate::audit::AuditDispatcher) are the
//! only place they are absorbed; configuration-time calls return them.

use thiserror::Error;

/// Result type alias using the crate's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the crate
///
/// Large error variants are boxed to reduce stack size
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Collector host specifier could not be parsed
    #[error("Invalid collector host: {0}")]
    InvalidHost(String),

    /// Audit level name or number not recognized
    #[error("Invalid audit level: {0}")]
    InvalidLevel(String),

    /// Message could not be built or encoded
    #[error("Encode error: {0}")]
    Encode(String),

    /// Encoded message does not fit into the allowed number of chunks
    #[error("Message of {size} bytes needs {chunks} chunks (max {max})")]
    MessageTooLarge {
        /// Encoded payload size in bytes
        size: usize,
        /// Chunks the payload would need
        chunks: usize,
        /// Maximum chunks the collector accepts
        max: usize,
    },

    /// Send queue is at capacity
    #[error("Audit queue is full")]
    QueueFull,

    /// Send queue no longer accepts records
    #[error("Audit queue is closed")]
    QueueClosed,

    /// No async runtime available
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Transport failure
    #[error("Transport error: {0}")]
    Transport(String),
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(Box::new(err))
    }
}

impl<T> From<tokio::sync::mpsc::error::TrySendError<T>> for Error {
    fn from(err: tokio::sync::mpsc::error::TrySendError<T>) -> Self {
        match err {
            tokio::sync::mpsc::error::TrySendError::Full(_) => Error::QueueFull,
            tokio::sync::mpsc::error::TrySendError::Closed(_) => Error::QueueClosed,
        }
    }
}

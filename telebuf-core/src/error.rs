//! Error types for telebuf-core

use thiserror::Error;

/// Main error type for the telebuf-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Delivery to the remote collector failed
    #[error("transport error: {0}")]
    Transport(String),

    /// Durable storage error
    #[error("storage error: {0}")]
    Storage(String),

    /// Background runtime could not be created
    #[error("runtime error: {0}")]
    Runtime(String),

    /// A process-wide tracker is already running
    #[error("tracker has already been initialized")]
    AlreadyInitialized,

    /// No process-wide tracker is running
    #[error("tracker has not been initialized")]
    NotInitialized,
}

/// Result type alias for telebuf-core
pub type Result<T> = std::result::Result<T, Error>;

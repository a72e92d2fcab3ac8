//! Drover Error Types

use thiserror::Error;

/// Result type alias for drover operations
pub type Result<T> = std::result::Result<T, Error>;

/// Drover error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Request validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Query execution failed: {0}")]
    QueryExecution(String),

    // Replication errors
    #[error("Replication error: {0}")]
    Replication(String),

    #[error("Not primary: current primary is {0}")]
    NotPrimary(String),

    #[error("No primary available")]
    NoPrimary,

    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    #[error("Stale epoch {claimed}: current epoch is {current}")]
    StaleEpoch { claimed: u64, current: u64 },

    // Network errors
    #[error("Transport error to {address}: {reason}")]
    Transport { address: String, reason: String },

    #[error("Request timeout to {0}")]
    TransportTimeout(String),

    #[error("Peer {address} rejected request: {status}")]
    PeerRejected { address: String, status: u16 },

    // Election errors
    #[error("Election error: {0}")]
    Election(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Shutdown in progress")]
    ShuttingDown,
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::TransportTimeout(_)
                | Error::Transport { .. }
                | Error::PeerRejected { .. }
        )
    }

    /// Check if this error was caused by the request itself and must not be retried
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::Validation(_) | Error::StaleEpoch { .. } | Error::NotPrimary(_)
        )
    }
}

//! Error types for reveille-core

use thiserror::Error;

use crate::transport::TransportError;

/// Result type alias using reveille-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in reveille-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Alarm or record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Hub transport error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A remote apply (hub send or entity API call) did not go through
    #[error("Remote apply failed: {0}")]
    Remote(String),
}

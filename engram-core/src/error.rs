//! Error types for engram-core

use thiserror::Error;

/// Main error type for the engram-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid or missing request parameter
    #[error("invalid parameter: {0}")]
    Validation(String),

    /// Entity lookup miss
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Conflicting state (claims, locks, version mismatches)
    #[error("conflict: {0}")]
    Conflict(String),

    /// Database or backup file integrity failure
    #[error("corruption: {0}")]
    Corruption(String),
}

impl Error {
    /// Shorthand for a not-found error with a numeric id
    pub fn not_found(kind: &'static str, id: impl std::fmt::Display) -> Self {
        Error::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

/// Result type alias for engram-core
pub type Result<T> = std::result::Result<T, Error>;

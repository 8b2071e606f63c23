//! Error types for costuq-store

use thiserror::Error;

/// Errors that can occur in the persistence layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// A result file was requested that the store does not hold
    #[error("file not found: {project}/{path}")]
    FileNotFound { project: String, path: String },

    /// A chunk key string did not match any known key format
    #[error("invalid chunk key: {key}")]
    InvalidKey { key: String },

    /// A file path escapes the project directory
    #[error("invalid file path: {path}")]
    InvalidPath { path: String },

    /// Chunk payload could not be encoded or decoded
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Underlying filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

// src/error.rs

use thiserror::Error;

/// Core error types for sdkwatch
#[derive(Error, Debug)]
pub enum Error {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Database initialization error
    #[error("Failed to initialize database: {0}")]
    InitError(String),

    /// Database not found
    #[error("Database not found at path: {0}")]
    DatabaseNotFound(String),

    /// Malformed package metadata or setting value
    #[error("Parse error: {0}")]
    ParseError(String),

    /// The package source could not be read
    #[error("Package source error: {0}")]
    SourceError(String),

    /// A requested package or record does not exist
    #[error("Not found: {0}")]
    NotFoundError(String),

    /// Unknown preference key or a value of the wrong type
    #[error("Invalid preference: {0}")]
    InvalidPreference(String),
}

/// Result type alias using sdkwatch's Error type
pub type Result<T> = std::result::Result<T, Error>;

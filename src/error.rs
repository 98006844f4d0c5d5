use crate::backfill::BackfillReport;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Laana
#[derive(Error, Debug)]
pub enum LaanaError {
    /// Search mode outside the supported set, rejected before any I/O
    #[error("Unsupported search mode: {mode}")]
    UnsupportedMode { mode: String },

    /// Query text or options cannot be turned into a query
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// The embedding service could not produce a vector
    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// Vector length does not match the dimension of its model tier
    #[error("Invalid vector for entity {entity_id}: expected {expected} dimensions, got {actual}")]
    InvalidVector {
        entity_id: i64,
        expected: usize,
        actual: usize,
    },

    /// A leased cursor expired or its renewal timed out
    #[error("Cursor expired: {0}")]
    CursorExpired(String),

    /// A cursor was polled after it reported end-of-stream
    #[error("Cursor already exhausted")]
    CursorExhausted,

    /// Rows updated by a transactional bulk write did not match the submitted operations
    #[error("Write mismatch: submitted {submitted} operations, {applied} applied")]
    WriteMismatch { submitted: usize, applied: usize },

    /// A backfill run hit a fatal error; the report covers the batches finished before it
    #[error("Backfill aborted after {} batches: {}", .report.batches, .source)]
    BackfillAborted {
        report: Box<BackfillReport>,
        source: Box<LaanaError>,
    },

    /// Backend reported a failure
    #[error("Store error: {0}")]
    Store(String),

    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// HTTP transport errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LaanaError {
    /// Errors that end a backfill run rather than a single entity
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(
            self,
            LaanaError::CursorExpired(_)
                | LaanaError::CursorExhausted
                | LaanaError::BackfillAborted { .. }
                | LaanaError::Store(_)
                | LaanaError::Database(_)
                | LaanaError::Http(_)
                | LaanaError::Io { .. }
        )
    }
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for Laana operations
pub type Result<T> = std::result::Result<T, LaanaError>;

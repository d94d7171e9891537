//! Error types for labelhouse

use crate::sample::ValidationError;
use crate::store::StoreError;
use std::fmt;

/// Result type alias for labelhouse operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for labelhouse
#[derive(Debug)]
pub enum Error {
    /// The store could not be reached
    Connection(StoreError),
    /// A DDL transaction for a metric failed
    SchemaCreation { metric: String, source: StoreError },
    /// A single row failed to bind or execute
    InsertExecution { metric: String, source: StoreError },
    /// A group's transaction failed to commit
    Commit { metric: String, source: StoreError },
    /// Sample rejected before normalization
    Validation(ValidationError),
    /// Configuration errors
    Config(String),
    /// IO errors
    Io(std::io::Error),
    /// Serialization errors
    Serialization(String),
    /// Internal error
    Internal(String),
}

impl Error {
    /// Short label used as the `reason` attribute on failure counters.
    pub fn reason(&self) -> &'static str {
        match self {
            Error::Connection(_) => "connection",
            Error::SchemaCreation { .. } => "schema",
            Error::InsertExecution { .. } => "insert",
            Error::Commit { .. } => "commit",
            Error::Validation(_) => "validation",
            Error::Config(_) => "config",
            Error::Io(_) => "io",
            Error::Serialization(_) => "serialization",
            Error::Internal(_) => "internal",
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => Some(e),
            Error::SchemaCreation { source, .. } => Some(source),
            Error::InsertExecution { source, .. } => Some(source),
            Error::Commit { source, .. } => Some(source),
            Error::Validation(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e),
            Error::SchemaCreation { metric, source } => {
                write!(f, "Schema creation failed for {}: {}", metric, source)
            }
            Error::InsertExecution { metric, source } => {
                write!(f, "Insert failed for {}: {}", metric, source)
            }
            Error::Commit { metric, source } => {
                write!(f, "Commit failed for {}: {}", metric, source)
            }
            Error::Validation(e) => write!(f, "Validation error: {}", e),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl From<ValidationError> for Error {
    fn from(e: ValidationError) -> Self {
        Error::Validation(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

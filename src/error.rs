//! Error types for Docket
//!
//! Compile and connection errors are programmer/ops facing and pass through
//! unchanged. Execution failures are rewrapped at the repository boundary
//! into a [`RepositoryError`] that carries a stable status and module tag.

use crate::query::CompileError;
use crate::storage::StoreError;
use docket_query::QueryError;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for Docket operations
#[derive(Debug, Error)]
pub enum Error {
    // ==========================================================================
    // Connection Errors
    // ==========================================================================
    #[error("Failed to open connection for '{repository}': {source}")]
    ConnectionFailed {
        repository: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("Connection error: {0}")]
    Connection(#[source] StoreError),

    // ==========================================================================
    // Query Errors
    // ==========================================================================
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    // ==========================================================================
    // Repository Errors
    // ==========================================================================
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    // ==========================================================================
    // Lifecycle Errors
    // ==========================================================================
    #[error("Repository '{repository}' has no outstanding instance to release")]
    NotHeld { repository: &'static str },

    #[error("Connection pool has been shut down")]
    PoolShutDown,

    // ==========================================================================
    // Configuration Errors
    // ==========================================================================
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    #[error("Failed to read config file '{path}': {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for Docket operations
pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Config {
            message: err.to_string(),
        }
    }
}

impl Error {
    /// Status an HTTP layer can map to a response code
    pub fn status(&self) -> u16 {
        match self {
            Error::Repository(err) => err.status,
            Error::Query(_) => 400,
            _ => 500,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == 404
    }
}

// =============================================================================
// Domain errors
// =============================================================================

/// One step of context added while an error travelled up through modules
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub module: String,
    pub message: String,
}

/// Error surfaced to callers above the repositories
#[derive(Debug, Error)]
#[error("{message}")]
pub struct RepositoryError {
    pub message: String,
    pub status: u16,
    pub module: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    pub stack: Vec<StackFrame>,
}

impl RepositoryError {
    pub fn new(module: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status,
            module: module.into(),
            source: None,
            stack: Vec::new(),
        }
    }

    pub fn not_found(module: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(module, 404, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }
}

/// Wrap any failure into a [`RepositoryError`] tagged with `module`.
///
/// A `RepositoryError` keeps its message, status and module; the new context
/// is pushed onto its stack. Anything else becomes a 500 with `message`.
pub fn wrap_error<E>(err: E, module: &str, message: impl Into<String>) -> RepositoryError
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let message = message.into();
    match err.into().downcast::<RepositoryError>() {
        Ok(mut domain) => {
            domain.stack.push(StackFrame {
                module: module.to_string(),
                message,
            });
            *domain
        }
        Err(original) => RepositoryError {
            message,
            status: 500,
            module: module.to_string(),
            source: Some(original),
            stack: Vec::new(),
        },
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.module, self.message)
    }
}

//! Error types for building and reading query plans

use thiserror::Error;

/// Error raised while constructing or parsing a query plan
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("Pagination limit must be greater than zero")]
    InvalidLimit,

    #[error("Malformed query plan: {message}")]
    Malformed { message: String },
}

impl From<serde_json::Error> for QueryError {
    fn from(err: serde_json::Error) -> Self {
        QueryError::Malformed {
            message: err.to_string(),
        }
    }
}

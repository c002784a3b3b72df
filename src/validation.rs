//! Identifier validation for the file-backed store
//!
//! Database names, collection names and document ids become path components,
//! so they are restricted to a filesystem-safe alphabet.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid {kind} '{value}': {reason}")]
    InvalidIdentifier {
        kind: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("{kind} '{value}' is too long (max {max} characters)")]
    TooLong {
        kind: &'static str,
        value: String,
        max: usize,
    },

    #[error("{kind} cannot be empty")]
    Empty { kind: &'static str },

    #[error("Reserved name: '{0}'")]
    Reserved(String),
}

pub const MAX_IDENTIFIER_LENGTH: usize = 255;

/// Names Windows refuses as file names
const RESERVED_NAMES: &[&str] = &[
    "con", "prn", "aux", "nul", "com1", "com2", "com3", "com4", "com5", "com6", "com7", "com8",
    "com9", "lpt1", "lpt2", "lpt3", "lpt4", "lpt5", "lpt6", "lpt7", "lpt8", "lpt9",
];

pub fn validate_database_name(name: &str) -> Result<(), ValidationError> {
    validate_identifier(name, "database name")
}

pub fn validate_collection_name(name: &str) -> Result<(), ValidationError> {
    validate_identifier(name, "collection name")
}

/// Document ids may start with an underscore or digit but never a dot
pub fn validate_document_id(id: &str) -> Result<(), ValidationError> {
    validate_identifier(id, "document id")
}

fn validate_identifier(value: &str, kind: &'static str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::Empty { kind });
    }

    if value.len() > MAX_IDENTIFIER_LENGTH {
        return Err(ValidationError::TooLong {
            kind,
            value: value.to_string(),
            max: MAX_IDENTIFIER_LENGTH,
        });
    }

    let invalid = |reason| ValidationError::InvalidIdentifier {
        kind,
        value: value.to_string(),
        reason,
    };

    if value.starts_with('-') {
        return Err(invalid("cannot start with a hyphen"));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(invalid(
            "only alphanumeric, underscore, and hyphen are allowed",
        ));
    }

    if RESERVED_NAMES.contains(&value.to_lowercase().as_str()) {
        return Err(ValidationError::Reserved(value.to_string()));
    }

    Ok(())
}

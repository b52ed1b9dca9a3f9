//! Error types for ID parsing and validation.

use thiserror::Error;

/// Errors that can occur when parsing or validating IDs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The ID string is empty.
    #[error("{what} cannot be empty")]
    Empty { what: &'static str },

    /// The value contains a character that is reserved by the job naming scheme.
    #[error("{what} '{value}' contains reserved character {found:?}")]
    ReservedCharacter {
        what: &'static str,
        value: String,
        found: char,
    },

    /// The value is a token reserved by the job naming scheme.
    #[error("{what} '{value}' is reserved")]
    Reserved { what: &'static str, value: String },

    /// The job ID has no `.` before the random suffix.
    #[error("job ID '{0}' missing '.' before random suffix")]
    MissingSuffix(String),

    /// The job ID has no `-` between app and type token.
    #[error("job ID '{0}' missing '-' between app and type")]
    MissingSeparator(String),

    /// The random suffix is not URL-safe base64.
    #[error("job ID '{0}' has an invalid random suffix")]
    InvalidSuffix(String),

    /// The ULID portion of a request ID is invalid.
    #[error("invalid request ID: {0}")]
    InvalidRequestId(String),
}

impl IdError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, IdError::Empty { .. })
    }
}

//! Error types for name parsing and validation.

use thiserror::Error;

/// Errors that can occur when parsing or validating names.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The name is empty.
    #[error("{what} cannot be empty")]
    Empty { what: &'static str },

    /// The name exceeds the maximum length.
    #[error("{what} '{value}' is longer than {max} characters")]
    TooLong {
        what: &'static str,
        value: String,
        max: usize,
    },

    /// The name contains a character outside the allowed set.
    #[error("{what} '{value}' contains invalid character '{ch}'")]
    InvalidCharacter {
        what: &'static str,
        value: String,
        ch: char,
    },

    /// The name must start and end with an alphanumeric character.
    #[error("{what} '{value}' must start and end with an alphanumeric character")]
    InvalidBoundary { what: &'static str, value: String },

    /// A qualified reference could not be split into its parts.
    #[error("invalid reference '{0}': expected '<namespace>/<name>'")]
    InvalidReference(String),
}

impl IdError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, IdError::Empty { .. })
    }
}

//! Error types for identifier parsing and validation.

use thiserror::Error;

/// Errors that can occur when parsing or validating identifiers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The identifier string is empty.
    #[error("identifier cannot be empty")]
    Empty,

    /// The identifier is missing the underscore separator.
    #[error("identifier missing underscore separator")]
    MissingSeparator,

    /// The identifier has an invalid prefix.
    #[error("invalid identifier prefix: expected '{expected}', got '{actual}'")]
    InvalidPrefix {
        expected: &'static str,
        actual: String,
    },

    /// The ULID portion of the identifier is invalid.
    #[error("invalid ULID: {0}")]
    InvalidUlid(String),

    /// The name contains a character that is not allowed.
    #[error("'{name}' contains forbidden character '{forbidden}'")]
    ForbiddenCharacter { name: String, forbidden: char },
}

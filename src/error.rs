use std::num::{ParseFloatError, ParseIntError};

use thiserror::Error;

/// Custom Result type for JSDB operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for JSDB
///
/// Every variant is recovered per statement at the executor boundary and
/// reported through [`Error::code`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Wrong argument shape or type
    #[error("{0}")]
    Validation(String),
    /// Database, schema, table, sequence, user or entry is absent
    #[error("{0}")]
    NotFound(String),
    /// Duplicate create or unique-constraint violation
    #[error("{0}")]
    Conflict(String),
    /// notNull, length, type, enum or range violation
    #[error("{0}")]
    Constraint(String),
    /// Privilege bitmask insufficient, or authentication failed
    #[error("{0}")]
    Permission(String),
    /// Tokenizer or parser rejected the statement
    #[error("parse error: {0}")]
    Parse(String),
    /// Verb or sub-verb matches no known command
    #[error("{0}")]
    Unrecognized(String),
    /// Internal error (storage, serialization, etc.)
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Result code reported for a failed statement.
    pub fn code(&self) -> u8 {
        match self {
            Error::Parse(_) | Error::Unrecognized(_) => 2,
            _ => 1,
        }
    }
}

impl From<ParseIntError> for Error {
    fn from(value: ParseIntError) -> Self {
        Error::Parse(value.to_string())
    }
}

impl From<ParseFloatError> for Error {
    fn from(value: ParseFloatError) -> Self {
        Error::Parse(value.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::Internal(value.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::Internal(value.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(value: bincode::Error) -> Self {
        Error::Internal(value.to_string())
    }
}

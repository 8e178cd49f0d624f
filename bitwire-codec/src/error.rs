//! Codec error types and error classification.

use bitwire_bits::BitError;
use bitwire_schema::SchemaError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised while loading, encoding or decoding messages.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("validation failed for {context}: {reason}")]
    Validation { context: String, reason: String },

    #[error("value {value} of field '{field}' is out of range")]
    OutOfRange { field: String, value: String },

    #[error("malformed input: {reason}")]
    Malformed { reason: String },

    #[error("bit error: {0}")]
    Bits(#[from] BitError),

    #[error("type mismatch on field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    #[error("message type not found: {name}")]
    UnknownMessage { name: String },

    #[error("no message loaded with id {id}")]
    UnknownId { id: u32 },

    #[error("no codec '{codec}' for field '{field}'")]
    NoCodec { field: String, codec: String },

    #[error("required field '{field}' is not set")]
    MissingRequired { field: String },

    #[error("invalid value for field '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),
}

/// Broad classes of failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Bad schema or configuration; raised at load time.
    Configuration,
    /// A value outside its declared bounds in strict mode.
    Range,
    /// Wire data that cannot be decoded.
    Malformed,
    /// A value of the wrong type or a missing required value.
    TypeMismatch,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Configuration => write!(f, "CONFIGURATION"),
            ErrorKind::Range => write!(f, "RANGE"),
            ErrorKind::Malformed => write!(f, "MALFORMED"),
            ErrorKind::TypeMismatch => write!(f, "TYPE_MISMATCH"),
        }
    }
}

impl CodecError {
    pub(crate) fn validation(context: impl Into<String>, reason: impl Into<String>) -> Self {
        CodecError::Validation {
            context: context.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        CodecError::Malformed {
            reason: reason.into(),
        }
    }

    pub(crate) fn mismatch(field: &str, expected: impl Into<String>, got: &str) -> Self {
        CodecError::TypeMismatch {
            field: field.to_string(),
            expected: expected.into(),
            got: got.to_string(),
        }
    }

    /// Classifies this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CodecError::Validation { .. }
            | CodecError::NoCodec { .. }
            | CodecError::Schema(_)
            | CodecError::UnknownMessage { .. } => ErrorKind::Configuration,
            CodecError::OutOfRange { .. } => ErrorKind::Range,
            CodecError::Malformed { .. } | CodecError::UnknownId { .. } => ErrorKind::Malformed,
            CodecError::Bits(e) if e.is_malformed_input() => ErrorKind::Malformed,
            CodecError::Bits(_) => ErrorKind::Range,
            CodecError::TypeMismatch { .. }
            | CodecError::MissingRequired { .. }
            | CodecError::InvalidValue { .. } => ErrorKind::TypeMismatch,
        }
    }
}

//! Schema error types.

use thiserror::Error;

/// Errors raised while building or validating a schema.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("invalid schema: {reason}")]
    InvalidSchema { reason: String },

    #[error("unknown type '{name}' referenced by {context}")]
    UnknownType { name: String, context: String },

    #[error("duplicate name: {name}")]
    DuplicateName { name: String },

    #[error("invalid expression: {reason}")]
    InvalidExpression { reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SchemaError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        SchemaError::InvalidSchema {
            reason: reason.into(),
        }
    }

    pub(crate) fn expression(reason: impl Into<String>) -> Self {
        SchemaError::InvalidExpression {
            reason: reason.into(),
        }
    }

    /// Returns a short machine-readable code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            SchemaError::InvalidSchema { .. } => "INVALID_SCHEMA",
            SchemaError::UnknownType { .. } => "UNKNOWN_TYPE",
            SchemaError::DuplicateName { .. } => "DUPLICATE_NAME",
            SchemaError::InvalidExpression { .. } => "INVALID_EXPRESSION",
            SchemaError::Json(_) => "BAD_SCHEMA_JSON",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_and_code() {
        let err = SchemaError::UnknownType {
            name: "Pose".to_string(),
            context: "field 'nav.pose'".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "unknown type 'Pose' referenced by field 'nav.pose'"
        );
        assert_eq!(err.error_code(), "UNKNOWN_TYPE");

        let err = SchemaError::expression("expected ')'");
        assert_eq!(err.to_string(), "invalid expression: expected ')'");
        assert_eq!(err.error_code(), "INVALID_EXPRESSION");
    }
}

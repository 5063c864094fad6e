//! Error types for the domain model.

use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised while parsing or validating model values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// A stored or received value is not a member of a closed enumeration.
    #[error("invalid {kind} value: {value:?}")]
    InvalidEnumValue {
        /// Name of the enumeration.
        kind: &'static str,
        /// The offending text.
        value: String,
    },

    /// A timestamp could not be parsed as RFC 3339.
    #[error("invalid timestamp {value:?}: {reason}")]
    InvalidTimestamp {
        /// The offending text.
        value: String,
        /// Parser message.
        reason: String,
    },

    /// An identifier could not be parsed.
    #[error("invalid identifier: {0:?}")]
    InvalidId(String),

    /// A record failed local validation.
    #[error("validation failed: {0}")]
    Validation(String),
}

impl ModelError {
    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ModelError::InvalidEnumValue {
            kind: "SyncStatus",
            value: "gone".into(),
        };
        assert_eq!(err.to_string(), "invalid SyncStatus value: \"gone\"");

        let err = ModelError::validation("device id is empty");
        assert!(err.to_string().contains("device id is empty"));
    }
}

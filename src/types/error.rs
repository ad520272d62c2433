//! Error types for migrate-onwrite
//!
//! Only `AmbiguousFilter` is meant to reach the caller of a legacy mutation.
//! Everything else raised on the mirror side is logged and swallowed by the
//! interceptor and the writer.

use mongodb::error::{ErrorKind, WriteFailure};

/// Mongo server code for a unique index violation
const DUPLICATE_KEY_CODE: i32 = 11000;

/// Main error type for mirroring operations
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("No unique params in {operation}: filter {filter} does not cover a unique index")]
    AmbiguousFilter { operation: String, filter: String },

    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Mapping error: {0}")]
    Mapping(String),

    #[error("Invalid target shape: {0}")]
    InvalidShape(String),

    #[error("Immutable field: {0}")]
    ImmutableField(String),

    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl MirrorError {
    /// Whether this error is the uniqueness rejection of a query-based mutation
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::AmbiguousFilter { .. })
    }

    /// Whether this error came from a unique index violation
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, Self::DuplicateKey(_))
    }
}

impl From<mongodb::error::Error> for MirrorError {
    fn from(err: mongodb::error::Error) -> Self {
        if is_duplicate_key(&err) {
            Self::DuplicateKey(err.to_string())
        } else {
            Self::Database(err.to_string())
        }
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write_error)) => {
            write_error.code == DUPLICATE_KEY_CODE
        }
        _ => false,
    }
}

/// Result type alias for mirroring operations
pub type Result<T> = std::result::Result<T, MirrorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_is_only_ambiguous_filter() {
        let rejection = MirrorError::AmbiguousFilter {
            operation: "updateOne".into(),
            filter: "{ \"n\": \"X\" }".into(),
        };
        assert!(rejection.is_rejection());
        assert!(rejection.to_string().contains("updateOne"));

        assert!(!MirrorError::DuplicateKey("dup".into()).is_rejection());
        assert!(MirrorError::DuplicateKey("dup".into()).is_duplicate_key());
        assert!(!MirrorError::Database("down".into()).is_duplicate_key());
    }
}

//! Error types and result types for model, query and index operations.
//!
//! Use [`ModelResult<T>`] as the return type for fallible operations. Failures coming
//! from a backend are carried in [`ModelError::Driver`] with the original error as
//! their source, so callers can still downcast to the driver's own error type.

use bson::{Bson, error::Error as BsonError};
use std::error::Error as StdError;
use thiserror::Error;

/// Represents all possible errors raised by the model layer.
#[derive(Error, Debug)]
pub enum ModelError {
    /// Two constraints disagree on the same field and operator.
    ///
    /// Raised synchronously while a [`Filter`](crate::query::Filter) is being built.
    #[error("Conflicting values for {field} {operator}: {existing} != {requested}")]
    ValueConflict {
        /// The constrained field.
        field: String,
        /// The operator tag, e.g. `$eq` or `$lt`.
        operator: String,
        /// The value already present in the filter.
        existing: Bson,
        /// The value that was rejected.
        requested: Bson,
    },
    /// The model configuration is malformed.
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// A failure reported by the underlying database driver, passed through untouched.
    #[error("Driver error: {0}")]
    Driver(#[source] Box<dyn StdError + Send + Sync>),
    /// A write violated a unique index.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),
    /// The named index does not exist in the collection.
    #[error("Index not found: {0}")]
    IndexNotFound(String),
    /// An index with the same name or key pattern but different options already exists.
    #[error("Index conflict: {0}")]
    IndexConflict(String),
    /// Serialization/deserialization error when converting between models and BSON documents.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// The document has an invalid structure.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// The backend cannot evaluate the requested operator or query shape.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

impl ModelError {
    /// Wraps any backend error without altering it.
    pub fn driver<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        ModelError::Driver(Box::new(err))
    }

    /// Returns `true` if this is a [`ModelError::ValueConflict`].
    pub fn is_conflict(&self) -> bool {
        matches!(self, ModelError::ValueConflict { .. })
    }
}

/// A specialized `Result` type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

impl From<BsonError> for ModelError {
    fn from(err: BsonError) -> Self {
        ModelError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_display() {
        let err = ModelError::ValueConflict {
            field: "age".to_string(),
            operator: "$eq".to_string(),
            existing: Bson::Int32(20),
            requested: Bson::Int32(21),
        };

        assert!(err.is_conflict());
        assert_eq!(err.to_string(), "Conflicting values for age $eq: 20 != 21");
    }

    #[test]
    fn test_driver_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = ModelError::driver(io);

        let source = err.source().expect("driver errors carry a source");
        assert!(source.downcast_ref::<std::io::Error>().is_some());
        assert!(!err.is_conflict());
    }
}

//! Error types for the entity store.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised while building an entity store.
///
/// Mutation passes never fail; these cover setup only.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    /// A configuration value is out of range.
    #[error("invalid mutation config: {0}")]
    InvalidConfig(String),

    /// A mutation profile refers to a collection the generator does not produce.
    #[error("profile for unknown collection: {0}")]
    UnknownCollection(String),

    /// A mutation profile is internally inconsistent.
    #[error("invalid profile for {collection}: {message}")]
    InvalidProfile {
        /// Collection the profile belongs to.
        collection: String,
        /// What is wrong.
        message: String,
    },
}

impl StoreError {
    /// Creates an invalid-profile error.
    pub fn invalid_profile(collection: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidProfile {
            collection: collection.into(),
            message: message.into(),
        }
    }
}

//! Error taxonomy for repository operations.
//!
//! Every public operation either resolves with its documented value or fails
//! with exactly one of these variants. There are no internal retries at this
//! layer; backend retry policy (if any) belongs to the backend itself.

use thiserror::Error;

/// Boxed error type used for collaborator failures we pass through.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced by the repository and its collaborators.
#[derive(Debug, Error)]
pub enum DataError {
    /// A class/version/namespace lookup against the metadata registry failed.
    #[error("class not found: {0}")]
    ClassNotFound(String),

    /// Invalid caller input: missing identifier on edit/save, an uncastable
    /// explicit value, or an unimplemented autoassignment.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A backend storage failure, passed through with the operation context.
    #[error("storage error during {context}: {source}")]
    Storage {
        /// What the repository was doing when the backend failed.
        context: String,
        #[source]
        source: BoxError,
    },

    /// Change-log emission failed. The preceding write is NOT undone; callers
    /// observing this error must treat the write as applied.
    #[error("change log emission failed: {source}")]
    Logging {
        #[source]
        source: BoxError,
    },
}

impl DataError {
    /// Wrap a backend failure with the operation context it occurred in.
    pub fn storage(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Storage {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Build a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DataError>;

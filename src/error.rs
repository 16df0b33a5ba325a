//! Loader error types

use std::error::Error as StdError;
use thiserror::Error;

/// Boxed error for wrapping backend-specific errors
pub type BoxedError = Box<dyn StdError + Send + Sync>;

/// Result type for loader and storage operations
pub type LoaderResult<T> = Result<T, LoaderError>;

/// Errors raised by the event log feed
///
/// "Nothing to do" is never an error: queries return `Ok(None)` for that.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// A record is missing identifying fields
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// `next()` was called without a satisfied `has_next()`
    #[error("no element available; call has_next() first")]
    NoSuchElement,

    /// Backing store or table is missing. Not retried.
    #[error("storage unavailable: {message}")]
    StorageUnavailable {
        message: String,
        #[source]
        source: Option<BoxedError>,
    },

    /// A storage query failed
    #[error("query failed: {message}")]
    Query {
        message: String,
        #[source]
        source: Option<BoxedError>,
    },

    /// Bad configuration value
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LoaderError {
    /// Create a storage-unavailable error with source
    pub fn unavailable(
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::StorageUnavailable {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a query error with source
    pub fn query(message: impl Into<String>, source: impl StdError + Send + Sync + 'static) -> Self {
        Self::Query {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// True for errors that indicate a deployment problem rather than a
    /// transient condition
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LoaderError::StorageUnavailable { .. } | LoaderError::InvalidConfig(_)
        )
    }
}

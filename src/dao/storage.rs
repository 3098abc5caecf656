use std::error::Error;
use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by storage backends regardless of the underlying database.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// A path could not be addressed by the tree store.
    #[error("invalid path `{path}`: {reason}")]
    InvalidPath { path: String, reason: &'static str },
    /// The store refused to write a value of this shape at this path.
    #[error("invalid value at `{path}`: {reason}")]
    InvalidValue { path: String, reason: String },
    /// Concurrent writers kept the path busy past the retry limit.
    #[error("write to `{path}` kept conflicting with concurrent writers")]
    Contended { path: String },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Construct an invalid path error.
    pub fn invalid_path(path: impl Into<String>, reason: &'static str) -> Self {
        StorageError::InvalidPath {
            path: path.into(),
            reason,
        }
    }
}

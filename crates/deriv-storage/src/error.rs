//! Error types for deriv-storage

use thiserror::Error;

/// Errors that can occur in storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O error during storage operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Requested content was not found
    #[error("not found: {0}")]
    NotFound(String),

    /// No backend registered under the key
    #[error("unknown storage: '{0}'")]
    UnknownStorage(String),

    /// Identifier cannot be mapped onto the backend
    #[error("invalid id: '{0}'")]
    InvalidId(String),
}

impl StorageError {
    /// Create a new NotFound error
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }

    /// Whether the content was already gone
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

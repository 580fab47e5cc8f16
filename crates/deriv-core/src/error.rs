//! Error types for derivative coordination
//!
//! Provides error handling for:
//! - Processor lookup and contract failures
//! - Path navigation mistakes
//! - Malformed persisted data
//! - Storage backend failures

use deriv_storage::StorageError;
use deriv_tree::PathError;

/// Result type for derivative operations
pub type Result<T> = std::result::Result<T, DerivativesError>;

/// Main derivatives error type
#[derive(Debug, thiserror::Error)]
pub enum DerivativesError {
    /// No processor registered under the name
    #[error("processor '{0}' is not registered")]
    UnregisteredProcessor(String),

    /// Processor returned something other than a mapping-rooted tree
    #[error("processor '{processor}' must return a mapping, got a {found}")]
    ProcessorContractViolation {
        /// Processor name
        processor: String,
        /// Kind of root node returned
        found: &'static str,
    },

    /// Processor itself failed
    #[error("processor '{processor}' failed")]
    Processing {
        /// Processor name
        processor: String,
        /// Error raised by the processor
        #[source]
        source: anyhow::Error,
    },

    /// Derivatives added to the tree must be rooted in a mapping
    #[error("derivatives must be rooted in a mapping, got a {0}")]
    InvalidRoot(&'static str),

    /// Path navigation through a leaf or malformed path argument
    #[error("invalid path: {0}")]
    InvalidPath(#[from] PathError),

    /// Persisted data has an unexpected shape
    #[error("malformed persisted data: {0}")]
    MalformedPersistedData(String),

    /// Processing needs a primary artifact but none is attached
    #[error("no primary artifact attached")]
    MissingPrimary,

    /// Configuration could not be parsed
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend failure
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Local I/O failure while releasing raw sources
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DerivativesError {
    /// Create a malformed data error
    #[inline]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedPersistedData(message.into())
    }

    /// Check if the error is a caller bug rather than an environment failure
    #[inline]
    #[must_use]
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::UnregisteredProcessor(_)
                | Self::InvalidPath(_)
                | Self::InvalidRoot(_)
                | Self::MissingPrimary
        )
    }

    /// Check if the error reports content that is already gone
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_not_found(),
            Self::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

//! Derivative Storage
//!
//! Backends that derivative artifacts are uploaded to, read from and deleted
//! from, plus the [`StorageRegistry`] that addresses them by key.
//!
//! # Example
//!
//! ```rust,ignore
//! use deriv_storage::{MemoryStorage, StorageRegistry};
//! use deriv_tree::{Metadata, RawArtifact};
//!
//! let registry = StorageRegistry::new()
//!     .with("cache", MemoryStorage::new())
//!     .with("store", MemoryStorage::new());
//!
//! let mut raw = RawArtifact::from_bytes(b"bytes".to_vec());
//! let artifact = registry.upload(&mut raw, "cache", &Metadata::new())?;
//! registry.delete(&artifact)?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod error;
mod filesystem;
mod memory;
mod registry;

pub use error::StorageError;
pub use filesystem::FileSystemStorage;
pub use memory::MemoryStorage;
pub use registry::{StorageRegistry, DIGEST_KEY, SIZE_KEY};

use deriv_tree::RawSource;
use std::fmt::Debug;
use std::io::Read;

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Byte storage addressed by string ids
///
/// Implementations must be safe to share between threads; every method is
/// a blocking call.
pub trait Storage: Send + Sync + Debug {
    /// Write all of `reader` under `id`, replacing existing content
    ///
    /// Returns the number of bytes written.
    ///
    /// # Errors
    /// Returns error if reading or writing fails
    fn put(&self, id: &str, reader: &mut dyn Read) -> Result<u64>;

    /// Open the content stored under `id`
    ///
    /// # Errors
    /// `StorageError::NotFound` if nothing is stored under `id`
    fn open(&self, id: &str) -> Result<Box<dyn RawSource>>;

    /// Remove the content stored under `id`
    ///
    /// # Errors
    /// `StorageError::NotFound` if nothing is stored under `id`
    fn delete(&self, id: &str) -> Result<()>;

    /// Check whether content is stored under `id`
    ///
    /// # Errors
    /// Returns error if the backend cannot be queried
    fn exists(&self, id: &str) -> Result<bool>;
}

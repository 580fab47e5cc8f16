//! Backend registry
//!
//! Maps backend keys (`"cache"`, `"store"`, ...) to [`Storage`]
//! implementations and performs artifact-level operations on them.

use crate::error::StorageError;
use crate::Storage;
use deriv_tree::{Artifact, DigestReader, DownloadedSource, Metadata, RawArtifact, RawSource};
use indexmap::IndexMap;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Metadata key recording the uploaded size in bytes
pub const SIZE_KEY: &str = "size";
/// Metadata key recording the hex BLAKE3 digest of the uploaded content
pub const DIGEST_KEY: &str = "digest";

/// Registry of storage backends by key
///
/// Built once at configuration time and shared read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct StorageRegistry {
    backends: IndexMap<String, Arc<dyn Storage>>,
}

impl StorageRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend, returning the registry
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, storage: impl Storage + 'static) -> Self {
        self.insert(key, Arc::new(storage));
        self
    }

    /// Register a shared backend; the last registration for a key wins
    pub fn insert(&mut self, key: impl Into<String>, storage: Arc<dyn Storage>) {
        let key = key.into();
        debug!(key = %key, "Registered storage backend");
        self.backends.insert(key, storage);
    }

    /// Backend registered under `key`
    ///
    /// # Errors
    /// `StorageError::UnknownStorage` if nothing is registered
    pub fn get(&self, key: &str) -> Result<&Arc<dyn Storage>, StorageError> {
        self.backends
            .get(key)
            .ok_or_else(|| StorageError::UnknownStorage(key.to_string()))
    }

    /// Check whether `key` is registered
    #[inline]
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.backends.contains_key(key)
    }

    /// Registered keys in registration order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.backends.keys().map(String::as_str)
    }

    /// Upload raw content to backend `key`
    ///
    /// The new artifact gets a fresh id (keeping the extension of the
    /// `filename` hint) and metadata made of the raw hints, then `metadata`,
    /// then the recorded `size` and `digest`. The raw source is read but not
    /// released.
    ///
    /// # Errors
    /// Returns error if the backend is unknown or the write fails
    pub fn upload(&self, raw: &mut RawArtifact, key: &str, metadata: &Metadata) -> Result<Artifact, StorageError> {
        let storage = self.get(key)?;
        let id = generate_id(raw.filename());

        let mut reader = DigestReader::new(&mut *raw);
        let size = storage.put(&id, &mut reader)?;
        let digest = reader.digest();

        let mut combined = raw.metadata().clone();
        combined.extend(metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
        combined.insert(SIZE_KEY.to_string(), Value::from(size));
        combined.insert(DIGEST_KEY.to_string(), Value::String(digest.to_string()));

        info!(storage = key, id = %id, size, digest = %digest.short(), "Uploaded artifact");
        Ok(Artifact::new(id, key).with_metadata(combined))
    }

    /// Stream the stored content of `artifact`
    ///
    /// # Errors
    /// Returns error if the backend is unknown or the content is missing
    pub fn open(&self, artifact: &Artifact) -> Result<Box<dyn RawSource>, StorageError> {
        self.get(artifact.storage())?.open(artifact.id())
    }

    /// Copy the stored content of `artifact` into a temporary file
    ///
    /// The returned raw artifact carries the artifact's metadata as hints and
    /// removes its temporary file when released.
    ///
    /// # Errors
    /// Returns error if the content cannot be read or copied
    pub fn download(&self, artifact: &Artifact) -> Result<RawArtifact, StorageError> {
        let mut source = self.open(artifact)?;
        let copy = DownloadedSource::copy_from(&mut source)?;
        debug!(storage = artifact.storage(), id = artifact.id(), "Downloaded artifact");
        Ok(RawArtifact::new(copy).with_metadata_from(artifact.metadata()))
    }

    /// Delete the stored content of `artifact`
    ///
    /// # Errors
    /// `StorageError::NotFound` if the content is already gone; other
    /// backend failures unchanged
    pub fn delete(&self, artifact: &Artifact) -> Result<(), StorageError> {
        self.get(artifact.storage())?.delete(artifact.id())?;
        debug!(storage = artifact.storage(), id = artifact.id(), "Deleted artifact");
        Ok(())
    }

    /// Check whether the stored content of `artifact` exists
    ///
    /// # Errors
    /// Returns error if the backend is unknown or cannot be queried
    pub fn exists(&self, artifact: &Artifact) -> Result<bool, StorageError> {
        self.get(artifact.storage())?.exists(artifact.id())
    }
}

fn generate_id(filename: Option<&str>) -> String {
    let id = Uuid::new_v4().simple().to_string();
    let extension = filename
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty());
    match extension {
        Some(ext) => format!("{id}.{}", ext.to_ascii_lowercase()),
        None => id,
    }
}

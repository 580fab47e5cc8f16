//! In-memory storage backend
//!
//! Suitable for tests, staging areas and simulation.

use crate::error::StorageError;
use crate::Storage;
use dashmap::DashMap;
use deriv_tree::{BytesSource, RawSource};
use std::io::Read;
use std::sync::Arc;
use tracing::trace;

/// In-memory storage backend
///
/// Uses `DashMap` so concurrent uploads and deletes never block each other
/// for long.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    objects: DashMap<String, Arc<[u8]>>,
}

impl MemoryStorage {
    /// Create an empty backend
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Check if nothing is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Stored bytes for `id`
    #[must_use]
    pub fn read(&self, id: &str) -> Option<Vec<u8>> {
        self.objects.get(id).map(|bytes| bytes.to_vec())
    }

    /// All stored ids
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.objects.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl Storage for MemoryStorage {
    fn put(&self, id: &str, reader: &mut dyn Read) -> Result<u64, StorageError> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        let size = bytes.len() as u64;
        trace!(id, size, "Storing object in memory");
        self.objects.insert(id.to_string(), bytes.into());
        Ok(size)
    }

    fn open(&self, id: &str) -> Result<Box<dyn RawSource>, StorageError> {
        let bytes = self
            .objects
            .get(id)
            .map(|bytes| bytes.to_vec())
            .ok_or_else(|| StorageError::not_found(id))?;
        Ok(Box::new(BytesSource::new(bytes)))
    }

    fn delete(&self, id: &str) -> Result<(), StorageError> {
        self.objects
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found(id))
    }

    fn exists(&self, id: &str) -> Result<bool, StorageError> {
        Ok(self.objects.contains_key(id))
    }
}

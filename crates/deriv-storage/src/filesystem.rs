//! Filesystem storage backend
//!
//! Each id maps to a file below a root directory. Writes go to a temporary
//! file in the target directory and are renamed into place.

use crate::error::StorageError;
use crate::Storage;
use deriv_tree::{FileSource, RawSource};
use std::fs;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Directory-backed storage
#[derive(Debug, Clone)]
pub struct FileSystemStorage {
    root: PathBuf,
}

impl FileSystemStorage {
    /// Create a backend rooted at `root`, creating the directory if needed
    ///
    /// # Errors
    /// Returns error if the directory cannot be created
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        info!(path = %root.display(), "Filesystem storage initialized");
        Ok(Self { root })
    }

    /// Root directory
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of `id` below the root
    ///
    /// # Errors
    /// `StorageError::InvalidId` for empty, absolute or parent-escaping ids
    pub fn path_for(&self, id: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(id);
        let valid = !id.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !valid {
            return Err(StorageError::InvalidId(id.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

impl Storage for FileSystemStorage {
    fn put(&self, id: &str, reader: &mut dyn Read) -> Result<u64, StorageError> {
        let path = self.path_for(id)?;
        let parent = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent)?;

        let mut temp = NamedTempFile::new_in(parent)?;
        let size = io::copy(reader, &mut temp)?;
        temp.persist(&path).map_err(|e| StorageError::Io(e.error))?;

        debug!(id, size, "Stored file");
        Ok(size)
    }

    fn open(&self, id: &str) -> Result<Box<dyn RawSource>, StorageError> {
        let path = self.path_for(id)?;
        match FileSource::open(path) {
            Ok(source) => Ok(Box::new(source)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StorageError::not_found(id)),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, id: &str) -> Result<(), StorageError> {
        let path = self.path_for(id)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(id, "Deleted file");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StorageError::not_found(id)),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, id: &str) -> Result<bool, StorageError> {
        Ok(self.path_for(id)?.is_file())
    }
}

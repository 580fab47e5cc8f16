//! Lifecycle coordination for one resource instance
//!
//! [`Attacher`] runs processors, uploads raw trees, promotes staged
//! artifacts, deletes stored ones and reacts to lifecycle events of the
//! primary artifact. Storage I/O always happens outside the store lock; only
//! the in-memory swap runs under it.

use crate::config::LifecycleMode;
use crate::error::{DerivativesError, Result};
use crate::registry::{Options, ProcessEvent, Registry};
use crate::serialize::AttachmentData;
use crate::store::{ArtifactStore, ChangeListener};
use deriv_tree::{Artifact, DerivativeTree, Metadata, RawArtifact, RawTree, Tree, TreePath};
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Where new derivatives come from
#[derive(Debug)]
pub enum DerivativeSource {
    /// Run a registered processor on the primary artifact
    Processor {
        /// Processor name
        name: String,
        /// Options passed to the processor
        options: Options,
    },
    /// Upload an already produced raw tree
    Raw(RawTree),
}

impl DerivativeSource {
    /// Registered processor without options
    #[must_use]
    pub fn processor(name: impl Into<String>) -> Self {
        Self::Processor {
            name: name.into(),
            options: Options::new(),
        }
    }

    /// Registered processor with options
    #[must_use]
    pub fn processor_with(name: impl Into<String>, options: Options) -> Self {
        Self::Processor {
            name: name.into(),
            options,
        }
    }
}

impl From<RawTree> for DerivativeSource {
    fn from(tree: RawTree) -> Self {
        Self::Raw(tree)
    }
}

impl From<&str> for DerivativeSource {
    fn from(name: &str) -> Self {
        Self::processor(name)
    }
}

impl From<String> for DerivativeSource {
    fn from(name: String) -> Self {
        Self::processor(name)
    }
}

/// Options for uploading derivatives
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadOptions {
    storage: Option<String>,
    delete: Option<bool>,
    metadata: Metadata,
}

impl UploadOptions {
    /// Create default options
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Upload every leaf to `key`, bypassing the storage rule
    #[inline]
    #[must_use]
    pub fn with_storage(mut self, key: impl Into<String>) -> Self {
        self.storage = Some(key.into());
        self
    }

    /// Override whether removable raw files are deleted after upload
    #[inline]
    #[must_use]
    pub fn with_delete(mut self, delete: bool) -> Self {
        self.delete = Some(delete);
        self
    }

    /// Add metadata recorded on every uploaded artifact
    #[inline]
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Explicit storage key, if any
    #[inline]
    #[must_use]
    pub fn storage(&self) -> Option<&str> {
        self.storage.as_deref()
    }

    /// Extra upload metadata
    #[inline]
    #[must_use]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

/// Result of a lifecycle hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    /// The reaction ran in the foreground
    Ran,
    /// Background mode; the owner is responsible for running it
    Skipped,
}

/// Lifecycle coordinator for the derivatives of one resource instance
#[derive(Debug)]
pub struct Attacher {
    registry: Arc<Registry>,
    store: ArtifactStore,
}

impl Attacher {
    /// Create an attacher with no primary and no derivatives
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            store: ArtifactStore::new(),
        }
    }

    /// Create an attacher holding previously persisted data
    #[must_use]
    pub fn from_data(registry: Arc<Registry>, data: AttachmentData) -> Self {
        Self {
            registry,
            store: ArtifactStore::from_data(data),
        }
    }

    /// Create an attacher from a persisted record in any supported layout
    ///
    /// # Errors
    /// `DerivativesError::MalformedPersistedData` if the record is invalid
    pub fn load(registry: Arc<Registry>, record: &Value) -> Result<Self> {
        Ok(Self::from_data(registry, AttachmentData::from_plain(record)?))
    }

    /// Notify `listener` after every installed change
    #[must_use]
    pub fn with_listener(mut self, listener: impl ChangeListener + 'static) -> Self {
        self.store = self.store.with_listener(Arc::new(listener));
        self
    }

    /// Shared registry
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Underlying state store
    #[inline]
    #[must_use]
    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Current primary artifact
    #[must_use]
    pub fn primary(&self) -> Option<Artifact> {
        self.store.primary()
    }

    /// Current derivatives tree (root accessor)
    #[must_use]
    pub fn derivatives(&self) -> DerivativeTree {
        self.store.derivatives()
    }

    /// Node at `path`; the root path returns the whole tree
    ///
    /// `path` may be anything convertible into a [`TreePath`]: a name, an
    /// index, an array or vector of keys.
    ///
    /// # Errors
    /// `DerivativesError::InvalidPath` if `path` continues below a leaf
    pub fn get(&self, path: impl Into<TreePath>) -> Result<Option<DerivativeTree>> {
        Ok(self.store.get(&path.into())?)
    }

    /// Artifact at `path`, if that node is a leaf
    ///
    /// # Errors
    /// `DerivativesError::InvalidPath` if `path` continues below a leaf
    pub fn artifact(&self, path: impl Into<TreePath>) -> Result<Option<Artifact>> {
        Ok(self.get(path)?.and_then(Tree::into_leaf))
    }

    /// Plain-data record for persistence
    #[must_use]
    pub fn to_plain(&self) -> Value {
        self.store.snapshot().to_plain()
    }

    /// Attach a new primary, resetting derivatives in the same step
    ///
    /// Returns the previous state so the caller can delete what it held.
    pub fn attach(&self, primary: Artifact) -> AttachmentData {
        info!(id = primary.id(), storage = primary.storage(), "Attaching primary");
        self.store.replace_primary(Some(primary))
    }

    /// Detach the primary, resetting derivatives in the same step
    pub fn detach(&self) -> AttachmentData {
        self.store.replace_primary(None)
    }

    /// Run processor `name`
    ///
    /// Without an explicit `source` the attached primary is downloaded into a
    /// temporary copy that is released once the processor returns.
    ///
    /// # Errors
    /// - `UnregisteredProcessor` for unknown names
    /// - `MissingPrimary` when nothing is attached and no source is given
    /// - `Processing` when the processor fails
    /// - `ProcessorContractViolation` when the result is not mapping-rooted
    #[instrument(skip(self, source, options), fields(explicit_source = source.is_some()))]
    pub fn process(&self, name: &str, source: Option<&mut RawArtifact>, options: &Options) -> Result<RawTree> {
        let processor = self.registry.processors().lookup(name)?;

        let started = Instant::now();
        let result = match source {
            Some(source) => processor.process(source, options),
            None => {
                let primary = self.primary().ok_or(DerivativesError::MissingPrimary)?;
                let mut copy = self.registry.storages().download(&primary)?;
                let result = processor.process(&mut copy, options);
                if let Err(e) = copy.release(true) {
                    warn!(error = %e, "Failed to release downloaded primary");
                }
                result
            }
        };
        self.registry.instrument(&ProcessEvent {
            processor: name,
            options,
            duration: started.elapsed(),
            succeeded: result.is_ok(),
        });

        let tree = result.map_err(|source| DerivativesError::Processing {
            processor: name.to_string(),
            source,
        })?;
        match tree {
            Tree::Map(_) => Ok(tree),
            other => {
                let found = other.kind();
                self.release_unconsumed(other);
                Err(DerivativesError::ProcessorContractViolation {
                    processor: name.to_string(),
                    found,
                })
            }
        }
    }

    /// Upload every raw leaf, returning the resolved tree without installing it
    ///
    /// Each leaf goes to `options.storage()` or, failing that, to the backend
    /// the storage rule resolves for its path. Removable raw files are
    /// deleted afterwards unless disabled. If any upload fails, artifacts
    /// already uploaded by this call are deleted again.
    ///
    /// # Errors
    /// Processing errors, or the first storage/release failure
    #[instrument(skip_all)]
    pub fn upload_all(&self, source: impl Into<DerivativeSource>, options: &UploadOptions) -> Result<DerivativeTree> {
        let raw = self.resolve_source(source.into())?;
        self.upload_tree(raw, &TreePath::root(), options)
    }

    /// Upload and merge new derivatives into the tree
    ///
    /// Top-level keys of the new tree overwrite existing keys of the same
    /// name; other existing keys are kept. Returns only the new subtree.
    ///
    /// # Errors
    /// `InvalidRoot` when a raw tree is not mapping-rooted, plus everything
    /// [`upload_all`](Self::upload_all) returns
    #[instrument(skip_all)]
    pub fn add(&self, source: impl Into<DerivativeSource>, options: &UploadOptions) -> Result<DerivativeTree> {
        let raw = self.resolve_source(source.into())?;
        if !matches!(raw, Tree::Map(_)) {
            let found = raw.kind();
            self.release_unconsumed(raw);
            return Err(DerivativesError::InvalidRoot(found));
        }

        let added = self.upload_tree(raw, &TreePath::root(), options)?;
        if let Tree::Map(entries) = &added {
            self.merge(entries.clone());
        }
        Ok(added)
    }

    /// Upload one raw artifact under the top-level `name`
    ///
    /// # Errors
    /// Storage or release failures
    #[instrument(skip(self, raw, options))]
    pub fn add_one(&self, name: &str, mut raw: RawArtifact, options: &UploadOptions) -> Result<Artifact> {
        let artifact = self.upload_leaf(&TreePath::single(name), &mut raw, options)?;
        self.merge(IndexMap::from([(name.to_string(), Tree::Leaf(artifact.clone()))]));
        Ok(artifact)
    }

    /// Detach the node at `path` from the tree and return it
    ///
    /// Stored content is left alone; pass the result to
    /// [`delete_tree`](Self::delete_tree) to remove it.
    ///
    /// # Errors
    /// `InvalidPath` for the root path or a path below a leaf
    pub fn remove(&self, path: impl Into<TreePath>) -> Result<Option<DerivativeTree>> {
        let path = path.into();
        let mut removed = None;
        self.store.try_set_if(|current| {
            let mut next = current.clone();
            removed = next.remove(&path)?;
            Ok::<_, DerivativesError>(removed.is_some().then_some(next))
        })?;
        debug!(path = %path, removed = removed.is_some(), "Removed derivative");
        Ok(removed)
    }

    /// Delete every artifact of the current tree from storage
    ///
    /// The tree itself is not changed. Returns how many artifacts were
    /// actually deleted.
    ///
    /// # Errors
    /// The first storage failure other than not-found
    pub fn delete_all(&self) -> Result<usize> {
        self.delete_tree(&self.derivatives())
    }

    /// Delete every artifact of `tree` from storage
    ///
    /// Content that is already gone counts as deleted, so running this twice
    /// succeeds.
    ///
    /// # Errors
    /// The first storage failure other than not-found
    #[instrument(skip_all, fields(leaves = tree.leaf_count()))]
    pub fn delete_tree(&self, tree: &DerivativeTree) -> Result<usize> {
        let storages = self.registry.storages();
        let mut deleted = 0;
        for (path, artifact) in tree.leaves() {
            match storages.delete(artifact) {
                Ok(()) => deleted += 1,
                Err(e) if e.is_not_found() => {
                    debug!(path = %path, id = artifact.id(), "Artifact already deleted");
                }
                Err(e) => return Err(e.into()),
            }
        }
        info!(deleted, "Deleted derivatives");
        Ok(deleted)
    }

    /// Copy every staged artifact to permanent storage
    ///
    /// Copies are made outside the lock. A leaf is swapped only if it still
    /// holds the staged artifact it was copied from; copies whose leaf
    /// changed meanwhile are deleted. Nothing is installed when no leaf was
    /// swapped. Returns the number of promoted leaves.
    ///
    /// # Errors
    /// The first storage failure; copies made so far are deleted
    #[instrument(skip_all)]
    pub fn promote_all(&self, options: &UploadOptions) -> Result<usize> {
        let config = self.registry.config();
        let snapshot = self.derivatives();

        let mut copies: HashMap<TreePath, (Artifact, Artifact)> = HashMap::new();
        for (path, staged) in snapshot.leaves().filter(|(_, a)| config.is_cache(a.storage())) {
            match self.copy_to_permanent(&path, staged, options) {
                Ok(promoted) => {
                    copies.insert(path, (staged.clone(), promoted));
                }
                Err(e) => {
                    self.discard(copies.values().map(|(_, promoted)| promoted));
                    return Err(e);
                }
            }
        }
        if copies.is_empty() {
            debug!("Nothing to promote");
            return Ok(0);
        }

        let mut swapped = HashSet::new();
        self.store.set_if(|current| {
            let next = current.clone().map(|path, artifact| match copies.get(path) {
                Some((staged, promoted)) if *staged == artifact => {
                    swapped.insert(path.clone());
                    promoted.clone()
                }
                _ => artifact,
            });
            (!swapped.is_empty()).then_some(next)
        });

        let lost: Vec<_> = copies
            .iter()
            .filter(|(path, _)| !swapped.contains(*path))
            .map(|(_, (_, promoted))| promoted)
            .collect();
        if !lost.is_empty() {
            debug!(lost = lost.len(), "Promoted copies lost to concurrent updates");
            self.discard(lost.into_iter());
        }

        info!(promoted = swapped.len(), "Promoted derivatives");
        Ok(swapped.len())
    }

    /// React to the primary being promoted
    ///
    /// # Errors
    /// Errors of [`promote_all`](Self::promote_all) in foreground mode
    pub fn on_promote(&self) -> Result<HookOutcome> {
        match self.registry.config().promote {
            LifecycleMode::Foreground => {
                self.promote_all(&UploadOptions::default())?;
                Ok(HookOutcome::Ran)
            }
            LifecycleMode::Background => {
                debug!("Promotion left to background processing");
                Ok(HookOutcome::Skipped)
            }
        }
    }

    /// React to the primary being destroyed
    ///
    /// # Errors
    /// Errors of [`delete_all`](Self::delete_all) in foreground mode
    pub fn on_destroy(&self) -> Result<HookOutcome> {
        match self.registry.config().destroy {
            LifecycleMode::Foreground => {
                self.delete_all()?;
                Ok(HookOutcome::Ran)
            }
            LifecycleMode::Background => {
                debug!("Deletion left to background processing");
                Ok(HookOutcome::Skipped)
            }
        }
    }

    /// React to the primary being reassigned: reset derivatives to empty
    ///
    /// Returns the tree that was replaced.
    pub fn on_primary_changed(&self) -> DerivativeTree {
        let mut previous = Tree::empty();
        self.store.set(|current| {
            previous = current.clone();
            Tree::empty()
        });
        previous
    }

    fn resolve_source(&self, source: DerivativeSource) -> Result<RawTree> {
        match source {
            DerivativeSource::Processor { name, options } => self.process(&name, None, &options),
            DerivativeSource::Raw(tree) => Ok(tree),
        }
    }

    fn upload_tree(&self, raw: RawTree, prefix: &TreePath, options: &UploadOptions) -> Result<DerivativeTree> {
        let mut uploaded = Vec::new();
        let result = raw.try_map(prefix, |path, mut raw| {
            let artifact = self.upload_leaf(path, &mut raw, options)?;
            uploaded.push(artifact.clone());
            Ok(artifact)
        });
        if result.is_err() {
            self.discard(uploaded.iter());
        }
        result
    }

    fn upload_leaf(&self, path: &TreePath, raw: &mut RawArtifact, options: &UploadOptions) -> Result<Artifact> {
        let key = options
            .storage()
            .map_or_else(|| self.registry.resolve_storage(path), ToString::to_string);
        let delete = options.delete.unwrap_or(self.registry.config().delete_raw);

        let uploaded = self.registry.storages().upload(raw, &key, options.metadata());
        let released = raw.release(delete);
        match (uploaded, released) {
            (Ok(artifact), Ok(())) => {
                debug!(path = %path, storage = %key, id = artifact.id(), "Uploaded derivative");
                Ok(artifact)
            }
            (Ok(artifact), Err(e)) => {
                self.discard(std::iter::once(&artifact));
                Err(e.into())
            }
            (Err(e), _) => Err(e.into()),
        }
    }

    fn copy_to_permanent(&self, path: &TreePath, staged: &Artifact, options: &UploadOptions) -> Result<Artifact> {
        let storages = self.registry.storages();
        let key = options
            .storage()
            .map_or_else(|| self.registry.resolve_storage(path), ToString::to_string);

        let mut raw = RawArtifact::from_boxed(storages.open(staged)?).with_metadata_from(staged.metadata());
        let uploaded = storages.upload(&mut raw, &key, options.metadata());
        if let Err(e) = raw.release(false) {
            warn!(error = %e, "Failed to close staged content");
        }
        Ok(uploaded?)
    }

    fn merge(&self, entries: IndexMap<String, DerivativeTree>) {
        self.store.set(|current| current.clone().merged(entries));
    }

    fn discard<'a>(&self, artifacts: impl Iterator<Item = &'a Artifact>) {
        let storages = self.registry.storages();
        for artifact in artifacts {
            if let Err(e) = storages.delete(artifact) {
                if !e.is_not_found() {
                    warn!(id = artifact.id(), storage = artifact.storage(), error = %e, "Failed to delete orphaned artifact");
                }
            }
        }
    }

    fn release_unconsumed(&self, tree: RawTree) {
        let delete = self.registry.config().delete_raw;
        let _ = tree.map(|path, mut raw| {
            if let Err(e) = raw.release(delete) {
                warn!(path = %path, error = %e, "Failed to release raw derivative");
            }
        });
    }
}

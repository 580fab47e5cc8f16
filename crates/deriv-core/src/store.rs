//! Per-instance attachment state
//!
//! [`ArtifactStore`] owns the primary artifact and the derivatives tree of
//! one resource instance behind a single lock. Every mutation of the tree
//! goes through [`ArtifactStore::set`] or one of its conditional variants,
//! so concurrent callers observe a linear history of whole-tree states.

use crate::serialize::AttachmentData;
use deriv_tree::{Artifact, DerivativeTree, PathError, Tree, TreePath};
use parking_lot::Mutex;
use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Hook telling the persistence layer the attachment changed
///
/// Called while the store lock is held, once per installed state and in
/// commit order. Implementations must not call back into the store.
pub trait ChangeListener: Send + Sync {
    /// Mark the owning resource dirty
    fn mark_dirty(&self, data: &AttachmentData);
}

impl<F> ChangeListener for F
where
    F: Fn(&AttachmentData) + Send + Sync,
{
    fn mark_dirty(&self, data: &AttachmentData) {
        self(data);
    }
}

/// Attachment state guarded by one mutex
#[derive(Default)]
pub struct ArtifactStore {
    state: Mutex<AttachmentData>,
    listener: Option<Arc<dyn ChangeListener>>,
}

impl ArtifactStore {
    /// Create an empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding previously persisted data
    #[must_use]
    pub fn from_data(data: AttachmentData) -> Self {
        Self {
            state: Mutex::new(data),
            listener: None,
        }
    }

    /// Notify `listener` after every installed change
    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn ChangeListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Copy of the whole attachment state
    #[must_use]
    pub fn snapshot(&self) -> AttachmentData {
        self.state.lock().clone()
    }

    /// Current primary artifact
    #[must_use]
    pub fn primary(&self) -> Option<Artifact> {
        self.state.lock().primary.clone()
    }

    /// Current derivatives tree
    #[must_use]
    pub fn derivatives(&self) -> DerivativeTree {
        self.state.lock().derivatives.clone()
    }

    /// Copy of the node at `path`; the root path returns the whole tree
    ///
    /// # Errors
    /// `PathError::ThroughLeaf` if `path` continues below a leaf
    pub fn get(&self, path: &TreePath) -> Result<Option<DerivativeTree>, PathError> {
        Ok(self.state.lock().derivatives.get(path)?.cloned())
    }

    /// Replace the primary and reset the derivatives in one step
    ///
    /// Returns the previous state.
    pub fn replace_primary(&self, primary: Option<Artifact>) -> AttachmentData {
        let mut state = self.state.lock();
        let previous = state.clone();
        state.primary = primary;
        self.install(&mut state, Tree::empty());
        previous
    }

    /// Atomically install `update(current)` as the new tree
    ///
    /// Returns the installed tree.
    pub fn set<F>(&self, update: F) -> DerivativeTree
    where
        F: FnOnce(&DerivativeTree) -> DerivativeTree,
    {
        let mut state = self.state.lock();
        let next = update(&state.derivatives);
        self.install(&mut state, next)
    }

    /// Like [`set`](Self::set), but `update` may decline by returning `None`
    ///
    /// A declined update installs nothing and notifies nobody.
    pub fn set_if<F>(&self, update: F) -> Option<DerivativeTree>
    where
        F: FnOnce(&DerivativeTree) -> Option<DerivativeTree>,
    {
        match self.try_set_if(|current| Ok::<_, Infallible>(update(current))) {
            Ok(installed) => installed,
            Err(never) => match never {},
        }
    }

    /// Fallible [`set_if`](Self::set_if); an error installs nothing
    ///
    /// # Errors
    /// Returns the error produced by `update`
    pub fn try_set_if<F, E>(&self, update: F) -> Result<Option<DerivativeTree>, E>
    where
        F: FnOnce(&DerivativeTree) -> Result<Option<DerivativeTree>, E>,
    {
        let mut state = self.state.lock();
        match update(&state.derivatives)? {
            Some(next) => Ok(Some(self.install(&mut state, next))),
            None => {
                trace!("Update declined, tree unchanged");
                Ok(None)
            }
        }
    }

    fn install(&self, state: &mut AttachmentData, next: DerivativeTree) -> DerivativeTree {
        state.derivatives = next;
        trace!(leaves = state.derivatives.leaf_count(), "Installed derivatives");
        self.notify(state);
        state.derivatives.clone()
    }

    fn notify(&self, state: &AttachmentData) {
        if let Some(listener) = &self.listener {
            listener.mark_dirty(state);
        }
    }
}

impl fmt::Debug for ArtifactStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactStore")
            .field("state", &*self.state.lock())
            .field("listening", &self.listener.is_some())
            .finish()
    }
}

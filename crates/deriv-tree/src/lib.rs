//! Derivative Tree
//!
//! Data model for nested derivatives of a primary artifact.
//!
//! # Core Concepts
//!
//! - [`Tree<L>`]: mapping / list / leaf tree with insertion-ordered names
//! - [`TreePath`]: ordered [`Key`]s addressing one node; the empty path is the root
//! - [`Artifact`]: handle to content already in a storage backend
//! - [`RawArtifact`]: content awaiting upload, consumed exactly once
//! - [`Tree::map_nodes`] / [`Tree::leaves`]: the one traversal every
//!   tree-wide operation is built on
//!
//! # Example
//!
//! ```rust,ignore
//! use deriv_tree::{Artifact, DerivativeTree, Tree, TreePath};
//!
//! let tree: DerivativeTree = Tree::map_of([
//!     ("thumb", Tree::Leaf(Artifact::new("t1", "store"))),
//! ]);
//!
//! let thumb = tree.get_leaf(&TreePath::from("thumb"))?;
//! for (path, artifact) in tree.leaves() {
//!     println!("{path}: {}", artifact.id());
//! }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

// Core modules
mod artifact;
mod digest;
mod mapper;
mod path;
mod raw;
mod tree;

// Re-exports
pub use artifact::{Artifact, ArtifactError, Metadata, ID_FIELD, METADATA_FIELD, STORAGE_FIELD};
pub use digest::{ContentDigest, DigestReader};
pub use mapper::Leaves;
pub use path::{Key, PathError, TreePath};
pub use raw::{BytesSource, Closeable, DownloadedSource, FileSource, RawArtifact, RawSource};
pub use tree::Tree;

/// Resolved tree: every leaf is an uploaded artifact
pub type DerivativeTree = Tree<Artifact>;

/// Unresolved tree produced by processors
pub type RawTree = Tree<RawArtifact>;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

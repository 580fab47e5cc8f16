//! Derivatives Core
//!
//! Coordinates nested derivative artifacts bound to the lifecycle of one
//! primary artifact.
//!
//! # Architecture
//!
//! ```text
//! caller → Attacher ──process──→ ProcessorRegistry → RawTree
//!             │  └──upload────→ StorageRule + StorageRegistry → DerivativeTree
//!             └──set(update)──→ ArtifactStore (one lock per instance)
//!                                   └──mark_dirty──→ ChangeListener
//! persisted record ⇄ AttachmentData (current and legacy layouts)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use deriv_core::{Attacher, Options, Registry, UploadOptions};
//! use deriv_storage::MemoryStorage;
//! use deriv_tree::{RawArtifact, RawTree, Tree};
//!
//! let registry = Registry::builder()
//!     .with_storage("cache", MemoryStorage::new())
//!     .with_storage("store", MemoryStorage::new())
//!     .with_processor("thumbs", |_: &mut RawArtifact, _: &Options| -> anyhow::Result<RawTree> {
//!         Ok(Tree::map_of([("small", Tree::Leaf(RawArtifact::from_bytes(b"s".to_vec())))]))
//!     })
//!     .build();
//!
//! let attacher = Attacher::new(registry);
//! attacher.attach(primary);
//! attacher.add("thumbs", &UploadOptions::default())?;
//! let small = attacher.artifact("small")?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod attacher;
mod config;
mod error;
mod registry;
mod serialize;
mod store;

pub use attacher::{Attacher, DerivativeSource, HookOutcome, UploadOptions};
pub use config::{DerivativesConfig, LifecycleMode};
pub use error::{DerivativesError, Result};
pub use registry::{
    InstrumentationSink, Options, ProcessEvent, Processor, ProcessorRegistry, Registry,
    RegistryBuilder, StorageRule,
};
pub use serialize::{
    derivatives_from_plain, derivatives_to_plain, AttachmentData, Format, DERIVATIVES_FIELD,
    LEGACY_ORIGINAL_KEY,
};
pub use store::{ArtifactStore, ChangeListener};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

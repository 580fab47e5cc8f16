//! Testing utilities for the derivatives workspace
//!
//! Shared fixtures: tracked raw sources, in-memory backends and prebuilt
//! registries, recording listeners and proptest strategies.

#![allow(missing_docs)]

use deriv_core::{
    AttachmentData, Attacher, ChangeListener, DerivativesConfig, InstrumentationSink, Options,
    ProcessEvent, Registry, RegistryBuilder,
};
use deriv_storage::MemoryStorage;
use deriv_tree::{
    Artifact, Closeable, DerivativeTree, Metadata, RawArtifact, RawSource, RawTree, Tree,
};
use parking_lot::Mutex;
use proptest::prelude::*;
use std::io::{self, Cursor, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Observes whether a [`TrackedSource`] was closed
#[derive(Debug, Clone, Default)]
pub struct ReleaseTracker(Arc<AtomicBool>);

impl ReleaseTracker {
    pub fn is_released(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Closeable in-memory source that reports its release to a tracker
#[derive(Debug)]
pub struct TrackedSource {
    data: Cursor<Vec<u8>>,
    tracker: ReleaseTracker,
}

impl Read for TrackedSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.data.read(buf)
    }
}

impl Closeable for TrackedSource {
    fn close(&mut self) -> io::Result<()> {
        self.tracker.0.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl RawSource for TrackedSource {
    fn closeable(&mut self) -> Option<&mut dyn Closeable> {
        Some(self)
    }
}

/// Raw artifact whose release can be observed
pub fn tracked_raw(bytes: &[u8]) -> (RawArtifact, ReleaseTracker) {
    let tracker = ReleaseTracker::default();
    let source = TrackedSource {
        data: Cursor::new(bytes.to_vec()),
        tracker: tracker.clone(),
    };
    (RawArtifact::new(source), tracker)
}

/// In-memory staging and permanent backends with the registry pieces that use them
#[derive(Debug, Clone)]
pub struct Backends {
    pub cache: Arc<MemoryStorage>,
    pub store: Arc<MemoryStorage>,
}

impl Backends {
    pub fn new() -> Self {
        Self {
            cache: Arc::new(MemoryStorage::new()),
            store: Arc::new(MemoryStorage::new()),
        }
    }

    /// Builder with both backends registered under the default keys
    pub fn builder(&self) -> RegistryBuilder {
        Registry::builder()
            .with_config(DerivativesConfig::default())
            .with_shared_storage("cache", self.cache.clone())
            .with_shared_storage("store", self.store.clone())
    }

    /// Put `bytes` into the staging backend as a primary artifact
    pub fn cached_primary(&self, registry: &Registry, bytes: &[u8]) -> Artifact {
        let mut raw = RawArtifact::from_bytes(bytes.to_vec()).with_filename("original.jpg");
        registry
            .storages()
            .upload(&mut raw, "cache", &Metadata::new())
            .unwrap()
    }
}

impl Default for Backends {
    fn default() -> Self {
        Self::new()
    }
}

/// Processor producing `{small, large}` from the source bytes
pub fn thumbs_processor(source: &mut RawArtifact, _options: &Options) -> anyhow::Result<RawTree> {
    let mut bytes = Vec::new();
    source.read_to_end(&mut bytes)?;
    let small = RawArtifact::from_bytes(bytes.iter().take(4).copied().collect::<Vec<_>>())
        .with_filename("small.jpg");
    let large = RawArtifact::from_bytes(bytes).with_filename("large.jpg");
    Ok(Tree::map_of([
        ("small", Tree::Leaf(small)),
        ("large", Tree::Leaf(large)),
    ]))
}

/// Attacher with a cached primary and the `thumbs` processor registered
pub fn thumbs_attacher(backends: &Backends) -> Attacher {
    let registry = backends.builder().with_processor("thumbs", thumbs_processor).build();
    let primary = backends.cached_primary(&registry, b"primary image bytes");
    let attacher = Attacher::new(registry);
    attacher.attach(primary);
    attacher
}

/// Change listener recording every state it was shown
#[derive(Debug, Clone, Default)]
pub struct RecordingListener(Arc<Mutex<Vec<AttachmentData>>>);

impl RecordingListener {
    pub fn count(&self) -> usize {
        self.0.lock().len()
    }

    pub fn last(&self) -> Option<AttachmentData> {
        self.0.lock().last().cloned()
    }
}

impl ChangeListener for RecordingListener {
    fn mark_dirty(&self, data: &AttachmentData) {
        self.0.lock().push(data.clone());
    }
}

/// Instrumentation sink recording processor names and durations
#[derive(Debug, Clone, Default)]
pub struct RecordingSink(Arc<Mutex<Vec<(String, Duration, bool)>>>);

impl RecordingSink {
    pub fn events(&self) -> Vec<(String, Duration, bool)> {
        self.0.lock().clone()
    }
}

impl InstrumentationSink for RecordingSink {
    fn processed(&self, event: &ProcessEvent<'_>) {
        self.0
            .lock()
            .push((event.processor.to_string(), event.duration, event.succeeded));
    }
}

/// Strategy for stored artifacts with small scalar metadata
pub fn arb_artifact() -> impl Strategy<Value = Artifact> {
    (
        "[a-z0-9]{1,12}",
        prop_oneof![Just("cache"), Just("store")],
        prop::option::of(0u64..10_000),
    )
        .prop_map(|(id, storage, size)| {
            let artifact = Artifact::new(id, storage);
            match size {
                Some(size) => {
                    let mut metadata = Metadata::new();
                    metadata.insert("size".to_string(), serde_json::Value::from(size));
                    artifact.with_metadata(metadata)
                }
                None => artifact,
            }
        })
}

/// Strategy for mapping-rooted derivative trees mixing maps and lists
pub fn arb_derivative_tree() -> impl Strategy<Value = DerivativeTree> {
    let leaf = arb_artifact().prop_map(Tree::Leaf);
    let node = leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Tree::List),
            prop::collection::vec(("[a-z_]{1,8}", inner), 0..4)
                .prop_map(|entries| entries.into_iter().collect::<DerivativeTree>()),
        ]
    });
    prop::collection::vec(("[a-z_]{1,8}", node), 0..5)
        .prop_map(|entries| entries.into_iter().collect::<DerivativeTree>())
}

//! Concurrent updates against one attacher

use deriv_core::{Attacher, UploadOptions};
use deriv_storage::{MemoryStorage, Storage, StorageError};
use deriv_test_utils::{Backends, RecordingListener};
use deriv_tree::{Artifact, RawArtifact, RawSource, Tree};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::fmt;
use std::io::Read;
use std::sync::Arc;
use std::thread;

#[test]
fn concurrent_adds_of_distinct_keys_all_survive() {
    for n in [1usize, 2, 8, 32] {
        let backends = Backends::new();
        let listener = RecordingListener::default();
        let attacher = Attacher::new(backends.builder().build()).with_listener(listener.clone());

        thread::scope(|scope| {
            for i in 0..n {
                let attacher = &attacher;
                scope.spawn(move || {
                    let raw = Tree::map_of([(
                        format!("key{i}"),
                        Tree::Leaf(RawArtifact::from_bytes(format!("content{i}").into_bytes())),
                    )]);
                    attacher.add(raw, &UploadOptions::default()).unwrap();
                });
            }
        });

        let tree = attacher.derivatives();
        assert_eq!(tree.as_map().map(|m| m.len()), Some(n));
        for i in 0..n {
            let artifact = attacher.artifact(format!("key{i}").as_str()).unwrap().unwrap();
            assert_eq!(
                backends.store.read(artifact.id()),
                Some(format!("content{i}").into_bytes())
            );
        }
        assert_eq!(listener.count(), n);
    }
}

#[test]
fn concurrent_add_and_remove_keep_a_linear_history() {
    let backends = Backends::new();
    let attacher = Attacher::new(backends.builder().build());
    attacher
        .add_one("keep", RawArtifact::from_bytes(b"k".to_vec()), &UploadOptions::default())
        .unwrap();

    thread::scope(|scope| {
        for i in 0..8 {
            let attacher = &attacher;
            scope.spawn(move || {
                let name = format!("tmp{i}");
                attacher
                    .add_one(&name, RawArtifact::from_bytes(vec![0; 8]), &UploadOptions::default())
                    .unwrap();
                let removed = attacher.remove(name.as_str()).unwrap();
                assert!(removed.is_some());
            });
        }
    });

    let names: Vec<_> = attacher.derivatives().as_map().unwrap().keys().cloned().collect();
    assert_eq!(names, vec!["keep".to_string()]);
}

#[test]
fn concurrent_promotions_promote_each_leaf_once() {
    let backends = Backends::new();
    let attacher = Attacher::new(backends.builder().build());
    for name in ["a", "b", "c"] {
        attacher
            .add_one(name, RawArtifact::from_bytes(name.as_bytes()), &UploadOptions::new().with_storage("cache"))
            .unwrap();
    }

    let promoted: usize = thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| attacher.promote_all(&UploadOptions::default()).unwrap()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).sum()
    });

    assert_eq!(promoted, 3);
    assert!(attacher.derivatives().leaves().all(|(_, a)| a.storage() == "store"));
    // Copies that lost the race were deleted again.
    assert_eq!(backends.store.len(), 3);
}

/// Store backend that runs a one-shot callback before its first write
struct Interfering {
    inner: Arc<MemoryStorage>,
    before_put: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl fmt::Debug for Interfering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interfering").field("inner", &self.inner).finish()
    }
}

impl Storage for Interfering {
    fn put(&self, id: &str, reader: &mut dyn Read) -> Result<u64, StorageError> {
        let hook = self.before_put.lock().take();
        if let Some(hook) = hook {
            hook();
        }
        self.inner.put(id, reader)
    }

    fn open(&self, id: &str) -> Result<Box<dyn RawSource>, StorageError> {
        self.inner.open(id)
    }

    fn delete(&self, id: &str) -> Result<(), StorageError> {
        self.inner.delete(id)
    }

    fn exists(&self, id: &str) -> Result<bool, StorageError> {
        self.inner.exists(id)
    }
}

#[test]
fn promotion_does_not_clobber_a_concurrent_replacement() {
    let backends = Backends::new();
    let interfering = Arc::new(Interfering {
        inner: Arc::clone(&backends.store),
        before_put: Mutex::new(None),
    });
    let registry = backends
        .builder()
        .with_shared_storage("store", interfering.clone())
        .build();
    let attacher = Arc::new(Attacher::new(registry));
    attacher
        .add_one("a", RawArtifact::from_bytes(b"old".to_vec()), &UploadOptions::new().with_storage("cache"))
        .unwrap();
    attacher
        .add_one("b", RawArtifact::from_bytes(b"keep".to_vec()), &UploadOptions::new().with_storage("cache"))
        .unwrap();

    // While the first leaf is being copied, another writer replaces "a".
    let replacement = Artifact::new("newer", "store");
    let writer = Arc::clone(&attacher);
    let installed = replacement.clone();
    *interfering.before_put.lock() = Some(Box::new(move || {
        writer.store().set(|current| {
            current
                .clone()
                .merged([("a".to_string(), Tree::Leaf(installed))].into())
        });
    }));

    assert_eq!(attacher.promote_all(&UploadOptions::default()).unwrap(), 1);
    assert_eq!(attacher.artifact("a").unwrap(), Some(replacement));
    let b = attacher.artifact("b").unwrap().unwrap();
    assert_eq!(b.storage(), "store");
    // Only the copy that was swapped in survives in permanent storage.
    assert_eq!(backends.store.ids(), vec![b.id().to_string()]);
}

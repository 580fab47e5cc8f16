//! End-to-end lifecycle tests for the attacher

use deriv_core::{
    Attacher, DerivativeSource, DerivativesConfig, DerivativesError, HookOutcome, LifecycleMode,
    Options, UploadOptions,
};
use deriv_storage::{FileSystemStorage, StorageError};
use deriv_test_utils::{
    thumbs_attacher, tracked_raw, Backends, RecordingListener, RecordingSink,
    ReleaseTracker,
};
use deriv_tree::{Artifact, Key, RawArtifact, RawTree, Tree, TreePath};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

fn raw_tree(entries: &[(&str, &str)]) -> RawTree {
    Tree::map_of(
        entries
            .iter()
            .map(|(name, content)| (*name, Tree::Leaf(RawArtifact::from_bytes(content.as_bytes())))),
    )
}

#[test]
fn thumbs_scenario() {
    let backends = Backends::new();
    let trackers = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&trackers);
    let registry = backends
        .builder()
        .with_processor("thumbs", move |_: &mut RawArtifact, _: &Options| -> anyhow::Result<RawTree> {
            let (raw1, tracker1) = tracked_raw(b"small");
            let (raw2, tracker2) = tracked_raw(b"large");
            seen.lock().extend([tracker1, tracker2]);
            Ok(Tree::map_of([("small", Tree::Leaf(raw1)), ("large", Tree::Leaf(raw2))]))
        })
        .build();
    let primary = backends.cached_primary(&registry, b"primary image bytes");
    let attacher = Attacher::new(registry);
    attacher.attach(primary);

    attacher.add("thumbs", &UploadOptions::default()).unwrap();

    let trackers = trackers.lock();
    assert_eq!(trackers.len(), 2);
    assert!(trackers.iter().all(ReleaseTracker::is_released));

    let small = attacher.artifact([Key::from("small")]).unwrap().unwrap();
    let large = attacher.artifact("large").unwrap().unwrap();
    assert_eq!(small.storage(), "store");
    assert_eq!(large.storage(), "store");
    assert_eq!(backends.store.read(small.id()), Some(b"small".to_vec()));
    assert_eq!(attacher.derivatives().leaf_count(), 2);
}

#[test]
fn add_by_processor_name() {
    let backends = Backends::new();
    let attacher = thumbs_attacher(&backends);

    let added = attacher.add("thumbs", &UploadOptions::default()).unwrap();

    let paths: Vec<_> = added.leaves().map(|(path, _)| path.to_string()).collect();
    assert_eq!(paths, vec!["small", "large"]);
    let small = attacher.artifact("small").unwrap().unwrap();
    assert!(small.id().ends_with(".jpg"));
    assert_eq!(small.metadata_value("filename"), Some(&json!("small.jpg")));
    assert_eq!(small.size(), Some(4));
    assert_eq!(backends.store.len(), 2);
}

#[test]
fn processor_with_options_and_instrumentation() {
    let backends = Backends::new();
    let sink = RecordingSink::default();
    let registry = backends
        .builder()
        .with_processor("sized", |source: &mut RawArtifact, options: &Options| -> anyhow::Result<RawTree> {
            let width = options.get("width").and_then(serde_json::Value::as_u64).unwrap_or(0);
            let mut bytes = Vec::new();
            std::io::Read::read_to_end(source, &mut bytes)?;
            let raw = RawArtifact::from_bytes(bytes).with_metadata("width", width);
            Ok(Tree::map_of([("resized", Tree::Leaf(raw))]))
        })
        .with_instrumentation(sink.clone())
        .build();
    let primary = backends.cached_primary(&registry, b"img");
    let attacher = Attacher::new(registry);
    attacher.attach(primary);

    let mut options = Options::new();
    options.insert("width".into(), json!(300));
    attacher
        .add(DerivativeSource::processor_with("sized", options), &UploadOptions::default())
        .unwrap();

    let resized = attacher.artifact("resized").unwrap().unwrap();
    assert_eq!(resized.metadata_value("width"), Some(&json!(300)));
    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, "sized");
    assert!(events[0].2);
}

#[test]
fn failing_processor_is_reported_and_instrumented() {
    let backends = Backends::new();
    let sink = RecordingSink::default();
    let registry = backends
        .builder()
        .with_processor("broken", |_: &mut RawArtifact, _: &Options| -> anyhow::Result<RawTree> {
            anyhow::bail!("cannot decode")
        })
        .with_instrumentation(sink.clone())
        .build();
    let primary = backends.cached_primary(&registry, b"img");
    let attacher = Attacher::new(registry);
    attacher.attach(primary);

    let result = attacher.add("broken", &UploadOptions::default());
    assert!(matches!(result, Err(DerivativesError::Processing { ref processor, .. }) if processor == "broken"));
    assert_eq!(sink.events().len(), 1);
    assert!(!sink.events()[0].2);
    assert!(attacher.derivatives().is_empty());
}

/// Records where the processor saw its input and whether the file existed
fn path_recording_processor(
    seen: Arc<Mutex<Vec<(PathBuf, bool)>>>,
    fail: bool,
) -> impl Fn(&mut RawArtifact, &Options) -> anyhow::Result<RawTree> + Send + Sync {
    move |source: &mut RawArtifact, _: &Options| -> anyhow::Result<RawTree> {
        let path = source.local_path().map(Path::to_path_buf);
        let path = path.ok_or_else(|| anyhow::anyhow!("primary copy has no local file"))?;
        let existed = path.exists();
        seen.lock().push((path, existed));
        if fail {
            anyhow::bail!("cannot decode");
        }
        Ok(raw_tree(&[("copy", "c")]))
    }
}

#[test]
fn downloaded_primary_released_after_processing() {
    for fail in [false, true] {
        let backends = Backends::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let registry = backends
            .builder()
            .with_processor("inspect", path_recording_processor(Arc::clone(&seen), fail))
            .build();
        let primary = backends.cached_primary(&registry, b"primary image bytes");
        let attacher = Attacher::new(registry);
        attacher.attach(primary);

        let result = attacher.process("inspect", None, &Options::new());
        assert_eq!(result.is_err(), fail);

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        let (path, existed) = &seen[0];
        assert!(*existed, "copy missing while processing");
        assert!(!path.exists(), "copy left behind at {}", path.display());
    }
}

#[test]
fn unregistered_processor() {
    let backends = Backends::new();
    let attacher = thumbs_attacher(&backends);
    assert!(matches!(
        attacher.add("missing", &UploadOptions::default()),
        Err(DerivativesError::UnregisteredProcessor(name)) if name == "missing"
    ));
}

#[test]
fn add_overwrites_same_key() {
    let backends = Backends::new();
    let attacher = Attacher::new(backends.builder().build());

    attacher.add(raw_tree(&[("a", "x")]), &UploadOptions::default()).unwrap();
    let second = attacher.add(raw_tree(&[("a", "y")]), &UploadOptions::default()).unwrap();

    let a = attacher.artifact("a").unwrap().unwrap();
    assert_eq!(Some(&a), second.get_leaf(&TreePath::from("a")).unwrap());
    assert_eq!(backends.store.read(a.id()), Some(b"y".to_vec()));
    assert_eq!(attacher.derivatives().leaf_count(), 1);
}

#[test]
fn add_keeps_other_keys() {
    let backends = Backends::new();
    let attacher = Attacher::new(backends.builder().build());

    let first = attacher.add(raw_tree(&[("a", "x")]), &UploadOptions::default()).unwrap();
    let second = attacher.add(raw_tree(&[("b", "y")]), &UploadOptions::default()).unwrap();

    assert_eq!(second.leaf_count(), 1);
    let names: Vec<_> = attacher.derivatives().as_map().unwrap().keys().cloned().collect();
    assert_eq!(names, vec!["a", "b"]);
    assert_eq!(
        attacher.get("a").unwrap(),
        first.get(&TreePath::from("a")).unwrap().cloned()
    );
}

#[test]
fn add_one_returns_artifact() {
    let backends = Backends::new();
    let attacher = Attacher::new(backends.builder().build());
    let (raw, tracker) = tracked_raw(b"one");

    let artifact = attacher
        .add_one("single", raw, &UploadOptions::new().with_metadata("role", "cover"))
        .unwrap();

    assert!(tracker.is_released());
    assert_eq!(artifact.metadata_value("role"), Some(&json!("cover")));
    assert_eq!(attacher.artifact("single").unwrap(), Some(artifact));
}

#[test]
fn nested_paths_and_storage_rule() {
    let backends = Backends::new();
    let registry = backends
        .builder()
        .with_storage_fn(|path| match path.first().and_then(Key::as_name) {
            Some("previews") => "cache".to_string(),
            _ => "store".to_string(),
        })
        .build();
    let attacher = Attacher::new(registry);

    let raw: RawTree = Tree::map_of([
        (
            "previews",
            Tree::List(vec![
                Tree::Leaf(RawArtifact::from_bytes(b"p0".to_vec())),
                Tree::map_of([("hd", Tree::Leaf(RawArtifact::from_bytes(b"p1".to_vec())))]),
            ]),
        ),
        ("cover", Tree::Leaf(RawArtifact::from_bytes(b"c".to_vec()))),
    ]);
    attacher.add(raw, &UploadOptions::default()).unwrap();

    let hd = attacher
        .artifact(TreePath::from([Key::from("previews"), Key::from(1usize), Key::from("hd")]))
        .unwrap()
        .unwrap();
    assert_eq!(hd.storage(), "cache");
    assert_eq!(attacher.artifact("cover").unwrap().unwrap().storage(), "store");
    assert_eq!(
        attacher.artifact("previews.0".parse::<TreePath>().unwrap()).unwrap().unwrap().storage(),
        "cache"
    );
    assert!(matches!(
        attacher.get(["cover", "deeper"]),
        Err(DerivativesError::InvalidPath(_))
    ));
}

#[test]
fn failed_upload_rolls_back_uploaded_leaves() {
    let backends = Backends::new();
    let attacher = Attacher::new(
        backends
            .builder()
            .with_storage_fn(|path| match path.first().and_then(Key::as_name) {
                Some("bad") => "nowhere".to_string(),
                _ => "store".to_string(),
            })
            .build(),
    );

    let result = attacher.add(raw_tree(&[("good", "1"), ("bad", "2")]), &UploadOptions::default());

    assert!(matches!(
        result,
        Err(DerivativesError::Storage(StorageError::UnknownStorage(_)))
    ));
    assert!(backends.store.is_empty());
    assert!(attacher.derivatives().is_empty());
}

#[test]
fn remove_detaches_without_deleting() {
    let backends = Backends::new();
    let attacher = thumbs_attacher(&backends);
    attacher.add("thumbs", &UploadOptions::default()).unwrap();

    let removed = attacher.remove("small").unwrap().unwrap();
    let artifact = removed.as_leaf().unwrap().clone();

    assert!(attacher.artifact("small").unwrap().is_none());
    assert!(backends.store.read(artifact.id()).is_some());
    assert_eq!(attacher.remove("small").unwrap(), None);

    attacher.delete_tree(&removed).unwrap();
    assert!(backends.store.read(artifact.id()).is_none());
}

#[test]
fn remove_nested_key() {
    let backends = Backends::new();
    let attacher = Attacher::new(backends.builder().build());
    let raw: RawTree = Tree::map_of([(
        "video",
        Tree::map_of([
            ("hd", Tree::Leaf(RawArtifact::from_bytes(b"hd".to_vec()))),
            ("sd", Tree::Leaf(RawArtifact::from_bytes(b"sd".to_vec()))),
        ]),
    )]);
    attacher.add(raw, &UploadOptions::default()).unwrap();

    let removed = attacher.remove(["video", "hd"]).unwrap();
    assert!(removed.is_some());
    let video = attacher.get("video").unwrap().unwrap();
    assert_eq!(video.as_map().unwrap().keys().collect::<Vec<_>>(), vec!["sd"]);
}

#[test]
fn delete_all_is_idempotent() {
    let backends = Backends::new();
    let attacher = thumbs_attacher(&backends);
    attacher.add("thumbs", &UploadOptions::default()).unwrap();

    assert_eq!(attacher.delete_all().unwrap(), 2);
    assert!(backends.store.is_empty());
    assert_eq!(attacher.delete_all().unwrap(), 0);
    assert_eq!(attacher.derivatives().leaf_count(), 2);
}

#[test]
fn promote_only_touches_staged_leaves() {
    let backends = Backends::new();
    let attacher = Attacher::new(backends.builder().build());
    let staged = attacher
        .add_one("staged", RawArtifact::from_bytes(b"s".to_vec()), &UploadOptions::new().with_storage("cache"))
        .unwrap();
    let stored = attacher
        .add_one("stored", RawArtifact::from_bytes(b"p".to_vec()), &UploadOptions::default())
        .unwrap();

    assert_eq!(attacher.promote_all(&UploadOptions::default()).unwrap(), 1);

    let promoted = attacher.artifact("staged").unwrap().unwrap();
    assert_eq!(promoted.storage(), "store");
    assert_ne!(promoted.id(), staged.id());
    assert_eq!(backends.store.read(promoted.id()), Some(b"s".to_vec()));
    assert_eq!(attacher.artifact("stored").unwrap(), Some(stored));
}

#[test]
fn promote_without_staged_leaves_is_silent() {
    let backends = Backends::new();
    let listener = RecordingListener::default();
    let attacher = Attacher::new(backends.builder().build()).with_listener(listener.clone());
    attacher
        .add_one("stored", RawArtifact::from_bytes(b"p".to_vec()), &UploadOptions::default())
        .unwrap();
    let before = listener.count();

    assert_eq!(attacher.promote_all(&UploadOptions::default()).unwrap(), 0);
    assert_eq!(listener.count(), before);
}

#[test]
fn hooks_respect_lifecycle_modes() {
    let backends = Backends::new();
    let config = DerivativesConfig::new()
        .with_promote_mode(LifecycleMode::Background)
        .with_destroy_mode(LifecycleMode::Background);
    let attacher = Attacher::new(backends.builder().with_config(config).build());
    attacher
        .add_one("a", RawArtifact::from_bytes(b"a".to_vec()), &UploadOptions::new().with_storage("cache"))
        .unwrap();

    assert_eq!(attacher.on_promote().unwrap(), HookOutcome::Skipped);
    assert_eq!(attacher.on_destroy().unwrap(), HookOutcome::Skipped);
    assert_eq!(attacher.artifact("a").unwrap().unwrap().storage(), "cache");
    assert_eq!(backends.cache.len(), 1);
}

#[test]
fn foreground_hooks_promote_and_destroy() {
    let backends = Backends::new();
    let attacher = thumbs_attacher(&backends);
    attacher
        .add("thumbs", &UploadOptions::new().with_storage("cache"))
        .unwrap();

    assert_eq!(attacher.on_promote().unwrap(), HookOutcome::Ran);
    assert!(attacher.derivatives().leaves().all(|(_, a)| a.storage() == "store"));

    assert_eq!(attacher.on_destroy().unwrap(), HookOutcome::Ran);
    assert!(backends.store.is_empty());
}

#[test]
fn primary_change_resets_derivatives() {
    let backends = Backends::new();
    let listener = RecordingListener::default();
    let attacher = thumbs_attacher(&backends).with_listener(listener.clone());
    attacher.add("thumbs", &UploadOptions::default()).unwrap();

    let previous = attacher.on_primary_changed();
    assert_eq!(previous.leaf_count(), 2);
    assert!(attacher.derivatives().is_empty());
    assert!(listener.last().unwrap().derivatives.is_empty());

    attacher.add("thumbs", &UploadOptions::default()).unwrap();
    let replaced = attacher.attach(Artifact::new("other", "store"));
    assert_eq!(replaced.derivatives.leaf_count(), 2);
    assert!(attacher.derivatives().is_empty());
    assert_eq!(attacher.primary().unwrap().id(), "other");
}

#[test]
fn listener_sees_every_commit() {
    let backends = Backends::new();
    let listener = RecordingListener::default();
    let attacher = Attacher::new(backends.builder().build()).with_listener(listener.clone());

    attacher.add(raw_tree(&[("a", "1")]), &UploadOptions::default()).unwrap();
    attacher.add(raw_tree(&[("b", "2")]), &UploadOptions::default()).unwrap();
    attacher.remove("missing").unwrap();
    attacher.remove("a").unwrap();

    assert_eq!(listener.count(), 3);
    let last = listener.last().unwrap();
    assert_eq!(last.derivatives.as_map().unwrap().keys().collect::<Vec<_>>(), vec!["b"]);
}

#[test]
fn temporary_files_removed_unless_disabled() {
    let dir = TempDir::new().unwrap();
    let backends = Backends::new();
    let registry = backends
        .builder()
        .with_storage("disk", FileSystemStorage::new(dir.path().join("disk")).unwrap())
        .build();
    let attacher = Attacher::new(registry);

    let scratch = |name: &str| {
        let path = dir.path().join(name);
        std::fs::File::create(&path).unwrap().write_all(b"scratch").unwrap();
        path
    };

    let removed = scratch("a.tmp");
    attacher
        .add_one("a", RawArtifact::temporary(&removed).unwrap(), &UploadOptions::new().with_storage("disk"))
        .unwrap();
    assert!(!removed.exists());

    let kept = scratch("b.tmp");
    attacher
        .add_one(
            "b",
            RawArtifact::temporary(&kept).unwrap(),
            &UploadOptions::new().with_storage("disk").with_delete(false),
        )
        .unwrap();
    assert!(kept.exists());

    let opened = scratch("c.bin");
    attacher
        .add_one("c", RawArtifact::open(&opened).unwrap(), &UploadOptions::default())
        .unwrap();
    assert!(opened.exists());

    let stored = attacher.artifact("a").unwrap().unwrap();
    assert!(stored.id().ends_with(".tmp"));
    assert!(attacher.registry().storages().exists(&stored).unwrap());
}

mod common;

use std::{cell::Cell, fs, path::Path, rc::Rc};

use common::*;
use pesync::{constants::*, *};

const SOURCE: &str = "source.exe";
const DEST: &str = "dest.exe";

/// Source holds icon 1 with data B, destination holds icon 1 with data A and an extra icon 2.
fn scenario() -> MemoryStore {
    let store = MemoryStore::new();
    store.insert_container(SOURCE, [(icon(1), b"B".to_vec())]);
    store.insert_container(DEST, [(icon(1), b"A".to_vec()), (icon(2), b"C".to_vec())]);
    store
}

fn options(remove_extra: bool, dry_run: bool) -> SyncOptions {
    SyncOptions {
        remove_extra,
        dry_run,
        ..SyncOptions::default()
    }
}

#[test]
fn sync_remove_extra() {
    init_logger();

    let store = scenario();
    let synchronizer = Synchronizer::new(store.clone(), options(true, false));
    let report = synchronizer.synchronize(SOURCE, DEST).unwrap();

    assert_eq!(report.plan.patch.operations(), &[
        Operation::write(icon(1), b"B".to_vec()),
        Operation::delete(icon(2)),
    ]);
    assert_eq!(report.plan.extra, vec![icon(2)]);
    assert!(report.plan.identical.is_empty());
    assert!(report.applied);
    assert_eq!(store.container(DEST).unwrap(), vec![(icon(1), b"B".to_vec())]);
    assert_eq!(store.container(SOURCE).unwrap(), vec![(icon(1), b"B".to_vec())], "source untouched");
}

#[test]
fn sync_keep_extra() {
    init_logger();

    let store = scenario();
    let synchronizer = Synchronizer::new(store.clone(), options(false, false));
    let report = synchronizer.synchronize(SOURCE, DEST).unwrap();

    assert_eq!(report.plan.patch.operations(), &[Operation::write(icon(1), b"B".to_vec())]);
    assert_eq!(report.plan.patch.deletes(), 0);
    assert_eq!(report.plan.extra, vec![icon(2)], "extra resources are reported but kept");
    assert_eq!(store.container(DEST).unwrap(), vec![
        (icon(1), b"B".to_vec()),
        (icon(2), b"C".to_vec())
    ]);
}

#[test]
fn sync_twice() {
    init_logger();

    for remove_extra in [false, true] {
        let store = scenario();
        let synchronizer = Synchronizer::new(store.clone(), options(remove_extra, false));
        synchronizer.synchronize(SOURCE, DEST).unwrap();
        let report = synchronizer.synchronize(SOURCE, DEST).unwrap();
        assert!(report.plan.patch.is_empty(), "second synchronization has nothing to do");
        assert!(!report.applied);
    }
}

#[test]
fn sync_reaches_source_snapshot() {
    init_logger();

    let store = MemoryStore::new();
    store.insert_container(SOURCE, [
        (icon_group(1), b"group".to_vec()),
        (icon(1), b"first".to_vec()),
        (icon(2), b"second".to_vec()),
        (version(), b"version".to_vec()),
    ]);
    store.insert_container(DEST, [
        (icon_group(1), b"other group".to_vec()),
        (icon_group(2), b"extra group".to_vec()),
        (icon(1), b"first".to_vec()),
        (ResourceKey::new(RT_ICON, 1u32, LANGUAGE_ID_NEUTRAL), b"neutral".to_vec()),
        (ResourceKey::new(RT_MANIFEST, 1u32, LANGUAGE_ID_EN_US), b"manifest".to_vec()),
    ]);

    let synchronizer = Synchronizer::new(store.clone(), SyncOptions {
        remove_extra: true,
        ..SyncOptions::with_version(true)
    });
    let report = synchronizer.synchronize(SOURCE, DEST).unwrap();
    assert_eq!(report.plan.identical, vec![icon(1)]);
    assert_eq!(report.plan.extra, vec![
        ResourceKey::new(RT_ICON, 1u32, LANGUAGE_ID_NEUTRAL),
        icon_group(2)
    ]);

    let destination = synchronizer.describe(DEST).unwrap();
    assert_eq!(destination, report.source, "destination snapshot equals source snapshot");
    let manifest = ResourceKey::new(RT_MANIFEST, 1u32, LANGUAGE_ID_EN_US);
    assert!(
        store.container(DEST).unwrap().iter().any(|(key, _)| key == &manifest),
        "types outside the synchronized set are untouched"
    );
}

#[test]
fn sync_identical_containers() {
    init_logger();

    for remove_extra in [false, true] {
        let store = MemoryStore::new();
        let resources = [(icon_group(1), b"group".to_vec()), (icon(1), b"icon".to_vec())];
        store.insert_container(SOURCE, resources.clone());
        store.insert_container(DEST, resources);

        let synchronizer = Synchronizer::new(store.clone(), options(remove_extra, false));
        let report = synchronizer.synchronize(SOURCE, DEST).unwrap();
        assert!(report.plan.patch.is_empty());
        assert_eq!(report.plan.identical, vec![icon(1), icon_group(1)]);
        assert!(!report.applied);
    }
}

#[test]
fn sync_dry_run() {
    init_logger();

    let store = scenario();
    let before = store.container(DEST).unwrap();
    let synchronizer = Synchronizer::new(store.clone(), options(true, true));
    let report = synchronizer.synchronize(SOURCE, DEST).unwrap();
    assert!(!report.applied);
    assert_eq!(store.container(DEST).unwrap(), before, "dry run leaves the destination unchanged");

    let expected = Synchronizer::new(scenario(), options(true, false)).synchronize(SOURCE, DEST).unwrap();
    assert_eq!(report.plan, expected.plan, "dry run reports the patch a real run applies");
}

#[test]
fn sync_missing_containers() {
    init_logger();

    let store = scenario();
    let synchronizer = Synchronizer::new(store, SyncOptions::default());
    let error = synchronizer.synchronize(SOURCE, "missing.exe").unwrap_err();
    assert!(matches!(error, SyncError::Open { access: Access::Read, .. }));

    // the source is read first
    let error = synchronizer.synchronize("missing-source.exe", "missing.exe").unwrap_err();
    match error {
        SyncError::Open { path, .. } => assert_eq!(path, Path::new("missing-source.exe")),
        error => panic!("unexpected error: {}", error),
    }
}

#[test]
fn delete_missing_resource() {
    init_logger();

    let store = scenario();
    let patch = Patch::new(vec![Operation::write(icon(5), b"new".to_vec()), Operation::delete(icon(9))]);
    let error = apply(&store, Path::new(DEST), &patch).unwrap_err();
    assert!(matches!(error, SyncError::Update { key, .. } if key == icon(9)));
    assert_eq!(store.container(DEST).unwrap().len(), 2, "failed transaction leaves the destination unchanged");
}


#[derive(Debug, Clone, Default)]
struct Events {
    aborted:   Rc<Cell<usize>>,
    committed: Rc<Cell<usize>>,
}

/// Memory store that fails staging a specific key or committing.
#[derive(Debug, Clone, Default)]
struct FailingStore {
    inner:       MemoryStore,
    fail_stage:  Option<ResourceKey>,
    fail_commit: bool,
    events:      Events,
}

struct FailingUpdate {
    inner:       MemoryUpdate,
    fail_stage:  Option<ResourceKey>,
    fail_commit: bool,
    events:      Events,
}

impl ResourceStore for FailingStore {
    type Reader = MemoryReader;
    type Update = FailingUpdate;

    fn open_for_read(&self, path: &Path) -> Result<MemoryReader, SyncError> { self.inner.open_for_read(path) }

    fn begin_update(&self, path: &Path) -> Result<FailingUpdate, SyncError> {
        Ok(FailingUpdate {
            inner:       self.inner.begin_update(path)?,
            fail_stage:  self.fail_stage.clone(),
            fail_commit: self.fail_commit,
            events:      self.events.clone(),
        })
    }
}

impl ResourceUpdate for FailingUpdate {
    fn stage(&mut self, key: &ResourceKey, payload: Option<&[u8]>) -> Result<(), SyncError> {
        if self.fail_stage.as_ref() == Some(key) {
            return Err(SyncError::Update {
                key:    key.clone(),
                reason: "rejected".to_string(),
            });
        }
        self.inner.stage(key, payload)
    }

    fn commit(self) -> Result<(), SyncError> {
        if self.fail_commit {
            return Err(SyncError::Commit {
                path:   DEST.into(),
                reason: "disk full".to_string(),
            });
        }
        self.events.committed.set(self.events.committed.get() + 1);
        self.inner.commit()
    }

    fn abort(self) {
        self.events.aborted.set(self.events.aborted.get() + 1);
        self.inner.abort()
    }
}

#[test]
fn stage_failure_aborts() {
    init_logger();

    let store = FailingStore {
        inner: scenario(),
        fail_stage: Some(icon(2)),
        ..Default::default()
    };
    let synchronizer = Synchronizer::new(store.clone(), options(true, false));
    let error = synchronizer.synchronize(SOURCE, DEST).unwrap_err();

    assert!(matches!(error, SyncError::Update { key, .. } if key == icon(2)));
    assert_eq!(store.events.aborted.get(), 1);
    assert_eq!(store.events.committed.get(), 0);
    assert_eq!(store.inner.container(DEST).unwrap(), vec![
        (icon(1), b"A".to_vec()),
        (icon(2), b"C".to_vec())
    ]);
}

#[test]
fn commit_failure_surfaces() {
    init_logger();

    let store = FailingStore {
        inner: scenario(),
        fail_commit: true,
        ..Default::default()
    };
    let synchronizer = Synchronizer::new(store.clone(), options(false, false));
    let error = synchronizer.synchronize(SOURCE, DEST).unwrap_err();

    assert!(matches!(error, SyncError::Commit { .. }));
    assert_eq!(error.to_string(), "cannot commit update of \"dest.exe\": disk full");
    assert_eq!(store.events.aborted.get(), 0, "a failed commit is not followed by an abort");
    assert_eq!(store.inner.container(DEST).unwrap()[0], (icon(1), b"A".to_vec()));
}

#[test]
fn empty_patch_skips_update() {
    init_logger();

    // a failing commit would surface if the container were opened for updating
    let store = FailingStore {
        inner: scenario(),
        fail_commit: true,
        ..Default::default()
    };
    apply(&store, Path::new(DEST), &Patch::default()).unwrap();
    apply(&store, Path::new("missing.exe"), &Patch::default()).unwrap();
    assert_eq!(store.events.aborted.get(), 0);
}

#[test]
fn transaction_aborts_on_drop() {
    init_logger();

    let store = FailingStore {
        inner: scenario(),
        ..Default::default()
    };
    let mut transaction = Transaction::begin(&store, Path::new(DEST)).unwrap();
    transaction.stage(&Operation::delete(icon(1))).unwrap();
    transaction.stage(&Operation::write(icon(7), b"new".to_vec())).unwrap();
    drop(transaction);

    assert_eq!(store.events.aborted.get(), 1);
    assert_eq!(store.events.committed.get(), 0);
    assert_eq!(store.inner.container(DEST).unwrap().len(), 2);

    let mut transaction = Transaction::begin(&store, Path::new(DEST)).unwrap();
    transaction.stage(&Operation::write(icon(7), b"new".to_vec())).unwrap();
    transaction.commit().unwrap();
    assert_eq!(store.events.aborted.get(), 1, "committed transaction is not aborted");
    assert_eq!(store.events.committed.get(), 1);
    assert_eq!(store.inner.container(DEST).unwrap().len(), 3);
}


/// Reader reporting fixed names and languages for icons.
#[derive(Default)]
struct ScriptedReader {
    names:         Vec<Identifier>,
    languages:     Vec<LANGID>,
    broken:        bool,
    unextractable: Option<ResourceKey>,
}

impl ResourceReader for ScriptedReader {
    fn names(&self, kind: &Identifier) -> Result<Vec<Identifier>, SyncError> {
        if self.broken {
            return Err(SyncError::Enumeration {
                kind:   kind.clone(),
                name:   None,
                reason: "access denied".to_string(),
            });
        }
        Ok(if kind == &Identifier::from(RT_ICON) { self.names.clone() } else { Vec::new() })
    }

    fn languages(&self, _kind: &Identifier, _name: &Identifier) -> Result<Vec<LANGID>, SyncError> {
        Ok(self.languages.clone())
    }

    fn extract(&self, key: &ResourceKey) -> Result<Vec<u8>, SyncError> {
        if self.unextractable.as_ref() == Some(key) {
            return Err(SyncError::NotFound(key.clone()));
        }
        Ok(key.to_string().into_bytes())
    }
}

#[test]
fn snapshot_walks_types_names_and_languages() {
    init_logger();

    let reader = ScriptedReader {
        names: vec![Identifier::from(1u32), Identifier::from("NAMED")],
        languages: vec![LANGUAGE_ID_EN_US, LANGUAGE_ID_NEUTRAL],
        ..Default::default()
    };
    let snapshot = Snapshot::build(&reader, &SyncOptions::default().types).unwrap();
    assert_eq!(snapshot.len(), 4);
    assert_eq!(snapshot.get(&icon(1)), Some(icon(1).to_string().as_bytes()));
    assert!(snapshot.contains_key(&ResourceKey::new(RT_ICON, "named", LANGUAGE_ID_NEUTRAL)));
    assert_eq!(snapshot.keys().next(), Some(&icon(1)), "enumeration order kept");
}

#[test]
fn snapshot_fails_on_extraction_failure() {
    init_logger();

    let reader = ScriptedReader {
        names: vec![Identifier::from(1u32), Identifier::from(2u32)],
        languages: vec![LANGUAGE_ID_EN_US],
        unextractable: Some(icon(2)),
        ..Default::default()
    };
    let snapshot = Snapshot::build(&reader, &SyncOptions::default().types);
    assert!(matches!(snapshot, Err(SyncError::NotFound(key)) if key == icon(2)));
}

#[test]
fn snapshot_fails_on_duplicate_keys() {
    init_logger();

    let reader = ScriptedReader {
        names: vec![Identifier::from(1u32), Identifier::from("#1")],
        languages: vec![LANGUAGE_ID_EN_US],
        ..Default::default()
    };
    let snapshot = Snapshot::build(&reader, &SyncOptions::default().types);
    assert!(matches!(snapshot, Err(SyncError::DuplicateKey(key)) if key == icon(1)));

    let mut snapshot = Snapshot::new();
    snapshot.insert(icon(1), b"first".to_vec()).unwrap();
    assert!(snapshot.insert(icon(1), b"second".to_vec()).is_err());
    assert_eq!(snapshot.get(&icon(1)), Some(&b"first"[..]), "existing data is kept");
}

#[test]
fn snapshot_fails_on_enumeration_failure() {
    init_logger();

    let reader = ScriptedReader {
        broken: true,
        ..Default::default()
    };
    let error = Snapshot::build(&reader, &SyncOptions::default().types).unwrap_err();
    assert_eq!(error.to_string(), "cannot enumerate names of resource type #14: access denied");
}

#[test]
fn snapshot_equality_ignores_order() {
    init_logger();

    let forward = Snapshot::try_from(vec![(icon(1), b"a".to_vec()), (icon(2), b"b".to_vec())]).unwrap();
    let backward = Snapshot::try_from(vec![(icon(2), b"b".to_vec()), (icon(1), b"a".to_vec())]).unwrap();
    assert_eq!(forward, backward);
    assert_ne!(forward, Snapshot::try_from(vec![(icon(1), b"a".to_vec())]).unwrap());
}

#[test]
fn snapshot_from_duplicate_resources() {
    init_logger();

    let snapshot = Snapshot::try_from(vec![(icon(1), b"a".to_vec()), (icon(1), b"b".to_vec())]);
    assert!(matches!(snapshot, Err(SyncError::DuplicateKey(key)) if key == icon(1)));
}

#[test]
fn plan_preview() {
    init_logger();

    assert_eq!(preview(b"\x00\x01ab"), "b\"\\x00\\x01ab\" (4 bytes)");
    assert_eq!(preview(&[b'x'; 30]), format!("b\"{}\"... (30 bytes)", "x".repeat(20)));
    assert_eq!(
        Operation::write(icon(1), b"B".to_vec()).to_string(),
        "(RT_ICON, 1, 1033): b\"B\" (1 bytes)"
    );
    assert_eq!(Operation::delete(icon(2)).to_string(), "(RT_ICON, 2, 1033): None");
}


/// Write source and destination images into a scratch directory.
fn image_pair(
    source: &[(ResourceKey, &[u8])], destination: &[(ResourceKey, &[u8])],
) -> (tempfile::TempDir, std::path::PathBuf, std::path::PathBuf) {
    let directory = tempfile::tempdir().unwrap();
    let source_path = directory.path().join(SOURCE);
    let destination_path = directory.path().join(DEST);
    fs::write(&source_path, image_with_resources(source)).unwrap();
    fs::write(&destination_path, image_with_resources(destination)).unwrap();
    (directory, source_path, destination_path)
}

#[test]
fn sync_images() {
    init_logger();

    let custom = ResourceKey::new("CUSTOM", 1u32, LANGUAGE_ID_EN_US);
    let (directory, source, destination) = image_pair(
        &[(icon_group(1), b"group"), (icon(1), &[0x11; 0x300]), (icon(2), &[0x22; 0x500]), (version(), b"version")],
        &[(icon_group(1), b"old group"), (icon(1), b"old icon"), (icon(3), b"extra icon"), (custom.clone(), b"custom")],
    );
    let original_source = fs::read(&source).unwrap();

    let synchronizer = Synchronizer::new(ImageStore, SyncOptions {
        remove_extra: true,
        ..SyncOptions::with_version(true)
    });
    let report = synchronizer.synchronize(&source, &destination).unwrap();
    assert!(report.applied);
    assert_eq!(report.plan.patch.writes(), 4);
    assert_eq!(report.plan.patch.deletes(), 1);

    let snapshot = synchronizer.describe(&destination).unwrap();
    assert_eq!(snapshot, report.source, "destination snapshot equals source snapshot");
    assert_eq!(fs::read(&source).unwrap(), original_source, "source untouched");

    let image = Image::parse_file(&destination).unwrap();
    let resources = image.resource_directory().unwrap();
    assert_eq!(resources.get(&custom).unwrap().data(), b"custom", "other resource types kept");
    assert_eq!(&image.data()[0x200..0x400], &minimal_image()[0x200..0x400], "code section kept");

    // nothing left to do, and the file is not rewritten
    let written = fs::read(&destination).unwrap();
    let report = synchronizer.synchronize(&source, &destination).unwrap();
    assert!(report.plan.patch.is_empty());
    assert!(!report.applied);
    assert_eq!(fs::read(&destination).unwrap(), written);

    let leftovers = fs::read_dir(directory.path()).unwrap().count();
    assert_eq!(leftovers, 2, "no temporary files left behind");
}

#[test]
fn sync_image_without_resources() {
    init_logger();

    let directory = tempfile::tempdir().unwrap();
    let source = directory.path().join(SOURCE);
    let destination = directory.path().join(DEST);
    fs::write(&source, image_with_resources(&[(icon_group(1), b"group"), (icon(1), b"icon")])).unwrap();
    fs::write(&destination, minimal_image()).unwrap();

    let synchronizer = Synchronizer::new(ImageStore, SyncOptions::default());
    assert!(synchronizer.describe(&destination).unwrap().is_empty());
    let report = synchronizer.synchronize(&source, &destination).unwrap();
    assert_eq!(report.plan.patch.writes(), 2);
    assert_eq!(synchronizer.describe(&destination).unwrap(), report.source);
}

#[test]
fn sync_invalid_image() {
    init_logger();

    let (directory, source, _) = image_pair(&[(icon(1), b"icon")], &[]);
    let destination = directory.path().join("text.exe");
    fs::write(&destination, b"definitely not an executable").unwrap();

    let synchronizer = Synchronizer::new(ImageStore, SyncOptions::default());
    let error = synchronizer.synchronize(&source, &destination).unwrap_err();
    assert!(matches!(error, SyncError::Open { access: Access::Read, .. }));
    assert_eq!(fs::read(&destination).unwrap(), b"definitely not an executable");

    let error = ImageStore.begin_update(&destination).unwrap_err();
    assert!(matches!(error, SyncError::Open { access: Access::Update, .. }));
}

#[test]
fn enumerate_malformed_directory() {
    init_logger();

    let mut resources = ResourceDirectory::default();
    resources.root_mut().insert(Identifier::from(RT_ICON), ResourceEntry::Data(ResourceData::new(vec![1, 2])));
    let mut image = Image::parse(minimal_image()).unwrap();
    image.set_resource_directory(resources).unwrap();

    let directory = tempfile::tempdir().unwrap();
    let path = directory.path().join(DEST);
    image.write_file(&path).unwrap();

    let reader = ImageStore.open_for_read(&path).unwrap();
    let error = Snapshot::build(&reader, &SyncOptions::default().types).unwrap_err();
    assert!(matches!(error, SyncError::Enumeration { name: None, .. }));
}

#[test]
fn write_out_of_range_identifier() {
    init_logger();

    let key = ResourceKey::new(RT_ICON, 0x80000001u32, LANGUAGE_ID_EN_US);
    let patch = Patch::new(vec![Operation::write(key.clone(), b"data".to_vec())]);

    let directory = tempfile::tempdir().unwrap();
    let path = directory.path().join(DEST);
    fs::write(&path, minimal_image()).unwrap();
    let error = apply(&ImageStore, &path, &patch).unwrap_err();
    assert!(matches!(&error, SyncError::Update { key: failed, .. } if failed == &key));
    assert_eq!(fs::read(&path).unwrap(), minimal_image(), "destination unchanged");

    let store = scenario();
    let error = apply(&store, Path::new(DEST), &patch).unwrap_err();
    assert!(matches!(error, SyncError::Update { .. }));
    assert_eq!(store.container(DEST).unwrap().len(), 2);
}

#[cfg(unix)]
#[test]
fn sync_through_symlink() {
    init_logger();

    let (directory, source, destination) = image_pair(&[(icon(1), b"new")], &[(icon(1), b"old")]);
    let link = directory.path().join("link.exe");
    std::os::unix::fs::symlink(&destination, &link).unwrap();

    let synchronizer = Synchronizer::new(ImageStore, SyncOptions::default());
    let report = synchronizer.synchronize(&source, &link).unwrap();
    assert!(report.applied);

    assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink(), "link kept");
    let image = Image::parse_file(&destination).unwrap();
    assert_eq!(image.resource_directory().unwrap().get(&icon(1)).unwrap().data(), b"new");
    assert_eq!(fs::read_dir(directory.path()).unwrap().count(), 3, "no temporary files left behind");
}

#[cfg(unix)]
#[test]
fn sync_keeps_permissions() {
    use std::os::unix::fs::PermissionsExt;

    init_logger();

    let (_directory, source, destination) = image_pair(&[(icon(1), b"new")], &[(icon(1), b"old")]);
    fs::set_permissions(&destination, fs::Permissions::from_mode(0o755)).unwrap();

    let synchronizer = Synchronizer::new(ImageStore, SyncOptions::default());
    assert!(synchronizer.synchronize(&source, &destination).unwrap().applied);

    let mode = fs::metadata(&destination).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o755);
    assert_eq!(synchronizer.describe(&destination).unwrap().get(&icon(1)), Some(&b"new"[..]));
}

//! File-backed store and lock behind a full index.

mod common;

use common::{group, ids, temp_file};
use message_index::config::Config;
use message_index::core::runtime::{load_registry, open_index};
use message_index::error::IndexError;
use message_index::groups::StaticRegistry;
use message_index::jobs::{MemoryQueue, TaskQueue};
use message_index::storage::{FileLock, FileStore, IndexLock, IndexStore};
use message_index::{IndexComponents, IndexSettings, MessageIndex};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn file_index(dir: &TempDir, registry: StaticRegistry) -> (MessageIndex, Arc<FileLock>) {
    let lock = Arc::new(
        FileLock::new(
            dir.path().join("index.lock"),
            Duration::from_millis(100),
            Duration::from_secs(60),
        )
        .with_poll_interval(Duration::from_millis(10)),
    );
    let components = IndexComponents::in_memory(Arc::new(registry))
        .with_store(Arc::new(FileStore::new(dir.path().join("index.bin"))))
        .with_lock(lock.clone());
    (MessageIndex::new(IndexSettings::default(), components), lock)
}

#[test]
fn snapshot_survives_reopening() {
    let dir = TempDir::new().unwrap();
    let registry = StaticRegistry::with_groups(vec![
        group("core", 8, &["Mainpage"]),
        group("ext", 8, &["Mainpage", "Ext-name"]),
    ]);
    let (first, _) = file_index(&dir, registry);
    first.rebuild(None).unwrap();
    drop(first);

    let (reopened, _) = file_index(&dir, StaticRegistry::new());
    assert_eq!(reopened.lookup_group_ids(8, "Mainpage"), ids(&["core", "ext"]));
    assert_eq!(reopened.lookup_group_ids(8, "Ext-name"), ids(&["ext"]));
    assert_eq!(reopened.snapshot(true).unwrap().len(), 2);
}

#[test]
fn file_lock_is_released_after_rebuild() {
    let dir = TempDir::new().unwrap();
    let (index, lock) = file_index(&dir, StaticRegistry::with_groups(vec![group("core", 8, &["A"])]));

    index.rebuild(None).unwrap();

    assert!(!lock.path().exists());
}

#[test]
fn held_file_lock_fails_rebuild_and_keeps_store() {
    let dir = TempDir::new().unwrap();
    let (index, lock) = file_index(&dir, StaticRegistry::with_groups(vec![group("core", 8, &["A"])]));

    // A second process holding the same lock file.
    let other = FileLock::new(lock.path(), Duration::from_millis(10), Duration::from_secs(60));
    assert!(other.acquire().unwrap());

    let err = index.rebuild(None).unwrap_err();
    assert!(matches!(err, IndexError::LockUnavailable { .. }));
    assert!(!dir.path().join("index.bin").exists());

    other.release().unwrap();
    index.rebuild(None).unwrap();
    assert!(dir.path().join("index.bin").exists());
}

#[test]
fn corrupt_snapshot_is_a_storage_error() {
    let file = temp_file("not a snapshot");
    let store = FileStore::new(file.path());
    assert!(matches!(
        store.read(true),
        Err(IndexError::Storage { .. })
    ));
}

#[test]
fn runtime_assembles_file_backed_index() {
    let dir = TempDir::new().unwrap();
    let groups = dir.path().join("groups.toml");
    std::fs::write(
        &groups,
        r#"
[[group]]
id = "core"
namespace = 8
keys = ["Mainpage"]
"#,
    )
    .unwrap();

    let mut config = Config::default();
    config.storage.path = dir.path().join("index.bin");
    config.lock.path = dir.path().join("index.lock");
    config.groups.definitions = groups;

    let queue = Arc::new(MemoryQueue::new());
    let registry = load_registry(&config, true).unwrap();
    let index = open_index(&config, registry, queue.clone() as Arc<dyn TaskQueue>).unwrap();
    index.rebuild(None).unwrap();

    assert_eq!(index.lookup_group_ids(8, "Mainpage"), ids(&["core"]));
    assert_eq!(queue.len(), 1);
    assert!(config.storage.path.exists());
}

//! Common test utilities.
//!
//! This module contains shared helpers for integration tests.
//! Import with `mod common;` in test files.

#![allow(dead_code)]

use message_index::core::time::{ManualClock, Timestamp};
use message_index::groups::{MessageGroup, StaticGroup, StaticRegistry};
use message_index::index::{GroupId, IndexComponents, IndexSettings, MessageIndex};
use message_index::jobs::{IndexTask, MemoryQueue, RecordingObserver};
use message_index::storage::{MemoryInterimStore, MemoryLock, MemoryStore, MemoryTokens};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

/// Start time of every harness clock.
pub const T0: f64 = 1_700_000_000.0;

/// An index over in-memory collaborators, with handles to each of them.
pub struct Harness {
    pub index: Arc<MessageIndex>,
    pub registry: Arc<StaticRegistry>,
    pub store: Arc<MemoryStore>,
    pub interim: Arc<MemoryInterimStore>,
    pub lock: Arc<MemoryLock>,
    pub tokens: Arc<MemoryTokens>,
    pub queue: Arc<MemoryQueue>,
    pub observer: Arc<RecordingObserver>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    /// Queued follow-up rebuilds.
    pub fn queued_rebuilds(&self) -> usize {
        self.queue
            .pending()
            .iter()
            .filter(|t| matches!(t, IndexTask::Rebuild { .. }))
            .count()
    }
}

/// Harness over the given groups with default settings.
pub fn harness(groups: Vec<Arc<dyn MessageGroup>>) -> Harness {
    harness_with(groups, MemoryStore::new(), IndexSettings::default())
}

/// Harness with an explicit store and settings.
pub fn harness_with(
    groups: Vec<Arc<dyn MessageGroup>>,
    store: MemoryStore,
    settings: IndexSettings,
) -> Harness {
    let clock = Arc::new(ManualClock::new(Timestamp::from_secs_f64(T0)));
    let registry = Arc::new(StaticRegistry::with_groups(groups));
    let store = Arc::new(store);
    let interim = Arc::new(MemoryInterimStore::new(clock.clone()));
    let lock = Arc::new(MemoryLock::new(Duration::from_millis(50)));
    let tokens = Arc::new(MemoryTokens::new());
    let queue = Arc::new(MemoryQueue::new());
    let observer = Arc::new(RecordingObserver::new());

    let components = IndexComponents {
        registry: registry.clone(),
        store: store.clone(),
        interim: interim.clone(),
        lock: lock.clone(),
        tokens: tokens.clone(),
        queue: queue.clone(),
        observer: observer.clone(),
        clock: clock.clone(),
    };
    let index = Arc::new(MessageIndex::new(settings, components));

    Harness {
        index,
        registry,
        store,
        interim,
        lock,
        tokens,
        queue,
        observer,
        clock,
    }
}

/// A plain group.
pub fn group(id: &str, namespace: i32, keys: &[&str]) -> Arc<dyn MessageGroup> {
    Arc::new(StaticGroup::new(id, namespace, keys.iter().copied()))
}

/// Group ids from string literals.
pub fn ids(list: &[&str]) -> Vec<GroupId> {
    list.iter().map(|id| GroupId::from(*id)).collect()
}

/// Write `content` to a temporary file.
pub fn temp_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("Failed to write temp file");
    file
}

//! Deferred work and change notifications.
//!
//! A rebuild hands two kinds of work to the outside world:
//! - tasks on a [`TaskQueue`] (follow-up rebuilds, statistics refresh),
//!   delivered at least once, asynchronously and in no particular order
//! - per-key membership changes to a [`MembershipObserver`]

use crate::core::error::{IndexError, IndexResult};
use crate::core::time::Timestamp;
use crate::index::key::{GroupId, PageIdentity};
use crate::index::service::MessageIndex;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use tokio::sync::mpsc;

/// Work enqueued by a rebuild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IndexTask {
    /// Run another full rebuild. `None` purges up to the rebuild's own
    /// start time.
    Rebuild { purge_timestamp: Option<Timestamp> },
    /// Cached statistics of these groups are stale.
    RefreshGroupStats { group_ids: BTreeSet<GroupId> },
}

impl IndexTask {
    /// Short task name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            IndexTask::Rebuild { .. } => "rebuild",
            IndexTask::RefreshGroupStats { .. } => "refresh_group_stats",
        }
    }
}

/// Asynchronous task sink.
pub trait TaskQueue: Send + Sync {
    /// Hand a task off for later execution.
    fn enqueue(&self, task: IndexTask) -> IndexResult<()>;
}

/// Queue that holds tasks until drained.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    tasks: Mutex<VecDeque<IndexTask>>,
}

impl MemoryQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return every queued task in enqueue order.
    pub fn drain(&self) -> Vec<IndexTask> {
        self.tasks.lock().drain(..).collect()
    }

    /// Copy of the queued tasks.
    pub fn pending(&self) -> Vec<IndexTask> {
        self.tasks.lock().iter().cloned().collect()
    }

    /// Number of queued tasks.
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Check if no task is queued.
    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }
}

impl TaskQueue for MemoryQueue {
    fn enqueue(&self, task: IndexTask) -> IndexResult<()> {
        self.tasks.lock().push_back(task);
        Ok(())
    }
}

/// Queue feeding a tokio channel consumed by the maintenance runtime.
#[derive(Debug, Clone)]
pub struct ChannelQueue {
    sender: mpsc::UnboundedSender<IndexTask>,
}

impl ChannelQueue {
    /// Create a queue and the receiver draining it.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<IndexTask>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl TaskQueue for ChannelQueue {
    fn enqueue(&self, task: IndexTask) -> IndexResult<()> {
        self.sender
            .send(task)
            .map_err(|e| IndexError::QueueUnavailable {
                message: format!("task worker stopped, dropped {} task", e.0.name()),
            })
    }
}

/// Receiver of per-key group membership changes.
pub trait MembershipObserver: Send + Sync {
    /// `key` moved from the `old` claimants to the `new` claimants. Either
    /// side is empty for additions and deletions.
    fn membership_changed(&self, key: &PageIdentity, old: &[GroupId], new: &[GroupId]);
}

/// Observer that logs each change at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl MembershipObserver for TracingObserver {
    fn membership_changed(&self, key: &PageIdentity, old: &[GroupId], new: &[GroupId]) {
        tracing::debug!(
            page = %key,
            old = ?old,
            new = ?new,
            "message group membership changed"
        );
    }
}

/// One recorded membership change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipChange {
    pub key: PageIdentity,
    pub old: Vec<GroupId>,
    pub new: Vec<GroupId>,
}

/// Observer that keeps every change in memory.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    changes: Mutex<Vec<MembershipChange>>,
}

impl RecordingObserver {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Changes recorded so far.
    pub fn changes(&self) -> Vec<MembershipChange> {
        self.changes.lock().clone()
    }

    /// Number of recorded changes.
    pub fn len(&self) -> usize {
        self.changes.lock().len()
    }

    /// Check if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.changes.lock().is_empty()
    }
}

impl MembershipObserver for RecordingObserver {
    fn membership_changed(&self, key: &PageIdentity, old: &[GroupId], new: &[GroupId]) {
        self.changes.lock().push(MembershipChange {
            key: key.clone(),
            old: old.to_vec(),
            new: new.to_vec(),
        });
    }
}

/// Run one dequeued task against an index.
///
/// Statistics refresh belongs to the statistics subsystem; this crate only
/// records that the refresh was requested.
pub fn execute(index: &MessageIndex, task: IndexTask) -> IndexResult<()> {
    match task {
        IndexTask::Rebuild { purge_timestamp } => {
            let report = index.rebuild_with_report(purge_timestamp)?;
            tracing::info!(
                keys = report.snapshot.len(),
                changed = report.diff.keys.len(),
                skipped = report.skipped,
                "deferred rebuild finished"
            );
            Ok(())
        }
        IndexTask::RefreshGroupStats { group_ids } => {
            tracing::info!(
                groups = group_ids.len(),
                group_ids = ?group_ids,
                "group statistics refresh requested"
            );
            Ok(())
        }
    }
}

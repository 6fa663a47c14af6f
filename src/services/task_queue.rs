//! In-memory priority queue over queued tasks.
//!
//! The queue is a projection; canonical truth lives in the database and the
//! queue is rebuilt from `get_queued_tasks()` on startup and refreshed each
//! tick. Ordering is a strict total order `(priority DESC, created_at ASC,
//! id ASC)` so ties are deterministic.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::models::{Complexity, ModelTier, Task};

/// Ordering key. `BTreeMap` iterates ascending, so the smallest key is the
/// highest-priority, oldest entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueueKey {
    priority: i64,
    created_at: DateTime<Utc>,
    id: Uuid,
}

impl Ord for QueueKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.created_at.cmp(&other.created_at))
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for QueueKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// A task projected into the queue.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub task_id: Uuid,
    pub project_id: Uuid,
    pub summary: String,
    pub priority: i64,
    pub complexity: Complexity,
    pub estimated_sessions_opus: u32,
    pub estimated_sessions_sonnet: u32,
    pub created_at: DateTime<Utc>,
}

impl QueueEntry {
    fn key(&self) -> QueueKey {
        QueueKey {
            priority: self.priority,
            created_at: self.created_at,
            id: self.task_id,
        }
    }

    /// Whether this entry's estimation is compatible with a tier.
    ///
    /// Sonnet accepts anything; opus only entries that prefer it. The
    /// scheduler's opus-fallback path goes through `peek` instead, so a
    /// sonnet-preferring head can still land on opus when sonnet is full.
    pub fn compatible_with(&self, tier: ModelTier) -> bool {
        match tier {
            ModelTier::Sonnet => true,
            ModelTier::Opus => {
                self.estimated_sessions_opus > 0 && self.complexity.warrants_opus()
            }
        }
    }
}

impl From<&Task> for QueueEntry {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id,
            project_id: task.project_id,
            summary: task.summary.clone(),
            priority: task.priority,
            complexity: task.complexity,
            estimated_sessions_opus: task.estimated_sessions_opus,
            estimated_sessions_sonnet: task.estimated_sessions_sonnet,
            created_at: task.created_at,
        }
    }
}

#[derive(Debug, Default)]
struct QueueInner {
    order: BTreeMap<QueueKey, Uuid>,
    entries: HashMap<Uuid, QueueEntry>,
}

/// Priority-ordered bag of queued work items.
///
/// At most one entry per task id; enqueueing an already-present id replaces
/// the entry in place. All operations are O(log n) except
/// `get_next_for_model`, which is O(k) in the entries skipped.
#[derive(Debug, Default)]
pub struct TaskQueue {
    inner: Mutex<QueueInner>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a task, or replace its entry if already queued.
    pub fn enqueue(&self, task: &Task) {
        let entry = QueueEntry::from(task);
        let mut inner = self.inner.lock().expect("task queue lock poisoned");
        if let Some(old) = inner.entries.remove(&entry.task_id) {
            inner.order.remove(&old.key());
        }
        inner.order.insert(entry.key(), entry.task_id);
        inner.entries.insert(entry.task_id, entry);
    }

    /// Remove a task by id. Idempotent.
    pub fn remove(&self, task_id: Uuid) {
        let mut inner = self.inner.lock().expect("task queue lock poisoned");
        if let Some(entry) = inner.entries.remove(&task_id) {
            inner.order.remove(&entry.key());
        }
    }

    /// Remove and return the highest-priority entry.
    pub fn dequeue(&self) -> Option<QueueEntry> {
        let mut inner = self.inner.lock().expect("task queue lock poisoned");
        let (&key, &task_id) = inner.order.iter().next()?;
        inner.order.remove(&key);
        inner.entries.remove(&task_id)
    }

    /// The highest-priority entry, without removing it.
    pub fn peek(&self) -> Option<QueueEntry> {
        let inner = self.inner.lock().expect("task queue lock poisoned");
        let (_, task_id) = inner.order.iter().next()?;
        inner.entries.get(task_id).cloned()
    }

    /// The highest-priority entry compatible with `tier`, without removing it.
    pub fn get_next_for_model(&self, tier: ModelTier) -> Option<QueueEntry> {
        let inner = self.inner.lock().expect("task queue lock poisoned");
        inner
            .order
            .values()
            .filter_map(|id| inner.entries.get(id))
            .find(|entry| entry.compatible_with(tier))
            .cloned()
    }

    pub fn contains(&self, task_id: Uuid) -> bool {
        self.inner
            .lock()
            .expect("task queue lock poisoned")
            .entries
            .contains_key(&task_id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("task queue lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ordered copy of the queue for diagnostics.
    pub fn snapshot(&self) -> Vec<QueueEntry> {
        let inner = self.inner.lock().expect("task queue lock poisoned");
        inner
            .order
            .values()
            .filter_map(|id| inner.entries.get(id))
            .cloned()
            .collect()
    }
}

//! Task repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DatabaseError;
use crate::domain::models::{Task, TaskStatus};

/// Usage counters added to a task's accounting columns.
///
/// All fields are deltas; the repository adds them to the monotonic totals.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsageDelta {
    pub tokens_opus: u64,
    pub tokens_sonnet: u64,
    pub sessions_opus: u32,
    pub sessions_sonnet: u32,
}

/// Repository interface for Task persistence.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Insert a new task.
    async fn insert(&self, task: &Task) -> Result<(), DatabaseError>;

    /// Get a task by id.
    async fn get(&self, id: Uuid) -> Result<Option<Task>, DatabaseError>;

    /// List every task currently queued, in `(priority DESC, created_at ASC)` order.
    async fn get_queued_tasks(&self) -> Result<Vec<Task>, DatabaseError>;

    /// List tasks by status.
    async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, DatabaseError>;

    /// Update only the status column (and the matching lifecycle timestamp).
    async fn update_task_status(&self, id: Uuid, status: TaskStatus) -> Result<(), DatabaseError>;

    /// Set a task's blocker.
    async fn set_blocked_by(
        &self,
        id: Uuid,
        blocked_by: Option<Uuid>,
    ) -> Result<(), DatabaseError>;

    /// Add usage deltas to the task's accounting counters.
    async fn record_usage(&self, id: Uuid, usage: UsageDelta) -> Result<(), DatabaseError>;

    /// Record an agent assignment. Implies a non-queued status.
    async fn assign_agent(&self, id: Uuid, session_id: &str) -> Result<(), DatabaseError>;

    /// Clear the agent assignment.
    async fn unassign_agent(&self, id: Uuid) -> Result<(), DatabaseError>;

    /// Delete a task row.
    async fn delete(&self, id: Uuid) -> Result<(), DatabaseError>;

    /// Cheap liveness probe for the health monitor (`SELECT 1`).
    async fn health_check(&self) -> Result<(), DatabaseError>;
}

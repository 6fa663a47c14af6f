//! Agent runtime port.
//!
//! The runtime is the external system that actually executes agents. It is
//! the sole source of `AgentEvent`s; the orchestrator receives them through
//! the mpsc stream handed over by `take_event_stream`.

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::domain::errors::OrchestratorError;
use crate::domain::models::{AgentEvent, AgentSession, ModelTier, Task};

/// Everything the runtime needs to launch one agent session.
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub task_id: Uuid,
    pub summary: String,
    pub model: ModelTier,
}

impl SpawnRequest {
    pub fn for_task(task: &Task, model: ModelTier) -> Self {
        Self {
            task_id: task.id,
            summary: task.summary.clone(),
            model,
        }
    }
}

/// Interface to the external agent runtime.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Launch an agent for a task; returns the new session id.
    async fn spawn_agent(&self, request: SpawnRequest) -> Result<String, OrchestratorError>;

    /// Request termination of a session. Idempotent.
    async fn terminate_session(&self, session_id: &str) -> Result<(), OrchestratorError>;

    /// Push a text message into a running session (e.g. an operator answer).
    async fn inject_message(&self, session_id: &str, text: &str)
        -> Result<(), OrchestratorError>;

    /// Snapshot of sessions the runtime believes are alive.
    async fn get_active_sessions(&self) -> Result<Vec<AgentSession>, OrchestratorError>;

    /// Hand over the event stream. Callable once; later calls return `None`.
    fn take_event_stream(&self) -> Option<mpsc::Receiver<AgentEvent>>;
}

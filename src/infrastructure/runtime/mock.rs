//! Mock agent runtime for local runs and integration tests.
//!
//! Simulates agent sessions: each spawn is accepted, held for a configured
//! delay, then resolved with a completion event carrying synthetic usage
//! numbers. Useful for exercising the whole scheduling and event pipeline
//! without any real agent infrastructure.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::info;

use crate::domain::errors::OrchestratorError;
use crate::domain::models::{AgentEvent, AgentSession, SessionStatus};
use crate::domain::ports::{AgentRuntime, SpawnRequest};

pub struct MockAgentRuntime {
    /// Simulated task duration.
    completion_delay: Duration,
    /// Synthetic usage attached to each completion.
    tokens_per_task: u64,
    cost_per_task: f64,
    next_session: AtomicU64,
    sessions: Mutex<HashMap<String, AgentSession>>,
    event_tx: mpsc::Sender<AgentEvent>,
    event_rx: Mutex<Option<mpsc::Receiver<AgentEvent>>>,
}

impl MockAgentRuntime {
    pub fn new(completion_delay: Duration) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            completion_delay,
            tokens_per_task: 1500,
            cost_per_task: 0.05,
            next_session: AtomicU64::new(0),
            sessions: Mutex::new(HashMap::new()),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
        }
    }
}

#[async_trait]
impl AgentRuntime for MockAgentRuntime {
    async fn spawn_agent(&self, request: SpawnRequest) -> Result<String, OrchestratorError> {
        let n = self.next_session.fetch_add(1, Ordering::SeqCst);
        let session_id = format!("mock-{n}");
        info!(
            session_id = %session_id,
            task_id = %request.task_id,
            model = %request.model,
            "Mock runtime spawned agent"
        );

        let session = AgentSession {
            id: session_id.clone(),
            model: request.model,
            status: SessionStatus::Running,
            task_id: request.task_id,
            started_at: Utc::now(),
            tokens_used: 0,
            cost_usd: 0.0,
        };
        self.sessions
            .lock()
            .expect("mock sessions lock poisoned")
            .insert(session_id.clone(), session);

        let event_tx = self.event_tx.clone();
        let delay = self.completion_delay;
        let tokens = self.tokens_per_task;
        let cost = self.cost_per_task;
        let task_id = request.task_id;
        let id = session_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = event_tx
                .send(AgentEvent::completion(id, task_id, tokens, cost))
                .await;
        });

        Ok(session_id)
    }

    async fn terminate_session(&self, session_id: &str) -> Result<(), OrchestratorError> {
        self.sessions
            .lock()
            .expect("mock sessions lock poisoned")
            .remove(session_id);
        Ok(())
    }

    async fn inject_message(
        &self,
        session_id: &str,
        _text: &str,
    ) -> Result<(), OrchestratorError> {
        if self
            .sessions
            .lock()
            .expect("mock sessions lock poisoned")
            .contains_key(session_id)
        {
            Ok(())
        } else {
            Err(OrchestratorError::Validation(format!(
                "no such session: {session_id}"
            )))
        }
    }

    async fn get_active_sessions(&self) -> Result<Vec<AgentSession>, OrchestratorError> {
        Ok(self
            .sessions
            .lock()
            .expect("mock sessions lock poisoned")
            .values()
            .cloned()
            .collect())
    }

    fn take_event_stream(&self) -> Option<mpsc::Receiver<AgentEvent>> {
        self.event_rx
            .lock()
            .expect("mock sessions lock poisoned")
            .take()
    }
}

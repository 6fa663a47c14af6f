//! Shared test fixtures: in-memory fakes wired through the ports.
//!
//! Each integration test binary uses a subset of these helpers.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use foreman::domain::errors::{DatabaseError, OrchestratorError};
use foreman::domain::models::{
    AgentEvent, AgentSession, ModelTier, Notification, Task, TaskStatus,
};
use foreman::domain::ports::{
    AgentRuntime, Notifier, SafetyNotifier, SpawnRequest, TaskRepository, TripAlert, UsageDelta,
};

/// Task repository fake with switchable failure injection.
#[derive(Default)]
pub struct InMemoryTaskRepository {
    tasks: Mutex<HashMap<Uuid, Task>>,
    fail: AtomicBool,
}

impl InMemoryTaskRepository {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    pub fn task(&self, id: Uuid) -> Option<Task> {
        self.tasks.lock().unwrap().get(&id).cloned()
    }

    pub fn seed(&self, task: Task) {
        self.tasks.lock().unwrap().insert(task.id, task);
    }

    fn check(&self) -> Result<(), DatabaseError> {
        if self.fail.load(Ordering::SeqCst) {
            Err(DatabaseError::Query("injected failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn insert(&self, task: &Task) -> Result<(), DatabaseError> {
        self.check()?;
        self.tasks.lock().unwrap().insert(task.id, task.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Task>, DatabaseError> {
        self.check()?;
        Ok(self.tasks.lock().unwrap().get(&id).cloned())
    }

    async fn get_queued_tasks(&self) -> Result<Vec<Task>, DatabaseError> {
        self.check()?;
        let mut queued: Vec<Task> = self
            .tasks
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.status == TaskStatus::Queued)
            .cloned()
            .collect();
        queued.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        Ok(queued)
    }

    async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, DatabaseError> {
        self.check()?;
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect())
    }

    async fn update_task_status(&self, id: Uuid, status: TaskStatus) -> Result<(), DatabaseError> {
        self.check()?;
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks.get_mut(&id).ok_or(DatabaseError::NotFound {
            entity: "task",
            id: id.to_string(),
        })?;
        task.status = status;
        Ok(())
    }

    async fn set_blocked_by(
        &self,
        id: Uuid,
        blocked_by: Option<Uuid>,
    ) -> Result<(), DatabaseError> {
        self.check()?;
        if let Some(task) = self.tasks.lock().unwrap().get_mut(&id) {
            task.blocked_by_task_id = blocked_by;
        }
        Ok(())
    }

    async fn record_usage(&self, id: Uuid, usage: UsageDelta) -> Result<(), DatabaseError> {
        self.check()?;
        if let Some(task) = self.tasks.lock().unwrap().get_mut(&id) {
            task.actual_tokens_opus += usage.tokens_opus;
            task.actual_tokens_sonnet += usage.tokens_sonnet;
            task.actual_sessions_opus += usage.sessions_opus;
            task.actual_sessions_sonnet += usage.sessions_sonnet;
        }
        Ok(())
    }

    async fn assign_agent(&self, id: Uuid, session_id: &str) -> Result<(), DatabaseError> {
        self.check()?;
        if let Some(task) = self.tasks.lock().unwrap().get_mut(&id) {
            task.assigned_agent_id = Some(session_id.to_string());
        }
        Ok(())
    }

    async fn unassign_agent(&self, id: Uuid) -> Result<(), DatabaseError> {
        self.check()?;
        if let Some(task) = self.tasks.lock().unwrap().get_mut(&id) {
            task.assigned_agent_id = None;
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), DatabaseError> {
        self.check()?;
        self.tasks.lock().unwrap().remove(&id);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), DatabaseError> {
        self.check()
    }
}

/// Runtime fake: spawns succeed (or fail on demand), tests push events into
/// the stream through `emit`.
pub struct ScriptedRuntime {
    next_session: AtomicU64,
    pub spawned: Mutex<Vec<(Uuid, ModelTier, String)>>,
    pub terminated: Mutex<Vec<String>>,
    fail_spawns: AtomicBool,
    event_tx: mpsc::Sender<AgentEvent>,
    event_rx: Mutex<Option<mpsc::Receiver<AgentEvent>>>,
}

impl ScriptedRuntime {
    pub fn new() -> Arc<Self> {
        let (event_tx, event_rx) = mpsc::channel(256);
        Arc::new(Self {
            next_session: AtomicU64::new(0),
            spawned: Mutex::new(Vec::new()),
            terminated: Mutex::new(Vec::new()),
            fail_spawns: AtomicBool::new(false),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
        })
    }

    pub fn set_fail_spawns(&self, failing: bool) {
        self.fail_spawns.store(failing, Ordering::SeqCst);
    }

    pub async fn emit(&self, event: AgentEvent) {
        self.event_tx.send(event).await.expect("event channel closed");
    }

    pub fn spawn_count(&self) -> usize {
        self.spawned.lock().unwrap().len()
    }

    pub fn session_for_task(&self, task_id: Uuid) -> Option<String> {
        self.spawned
            .lock()
            .unwrap()
            .iter()
            .find(|(t, _, _)| *t == task_id)
            .map(|(_, _, s)| s.clone())
    }
}

#[async_trait]
impl AgentRuntime for ScriptedRuntime {
    async fn spawn_agent(&self, request: SpawnRequest) -> Result<String, OrchestratorError> {
        if self.fail_spawns.load(Ordering::SeqCst) {
            return Err(OrchestratorError::Spawn {
                task_id: request.task_id,
                message: "scripted spawn failure".to_string(),
            });
        }
        let n = self.next_session.fetch_add(1, Ordering::SeqCst);
        let session_id = format!("agent-{n}");
        self.spawned
            .lock()
            .unwrap()
            .push((request.task_id, request.model, session_id.clone()));
        Ok(session_id)
    }

    async fn terminate_session(&self, session_id: &str) -> Result<(), OrchestratorError> {
        self.terminated.lock().unwrap().push(session_id.to_string());
        Ok(())
    }

    async fn inject_message(
        &self,
        _session_id: &str,
        _text: &str,
    ) -> Result<(), OrchestratorError> {
        Ok(())
    }

    async fn get_active_sessions(&self) -> Result<Vec<AgentSession>, OrchestratorError> {
        Ok(vec![])
    }

    fn take_event_stream(&self) -> Option<mpsc::Receiver<AgentEvent>> {
        self.event_rx.lock().unwrap().take()
    }
}

/// Notifier fake collecting every batch.
#[derive(Default)]
pub struct CollectingNotifier {
    pub batches: Mutex<Vec<Vec<Notification>>>,
}

impl CollectingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn batch_count(&self) -> usize {
        self.batches.lock().unwrap().len()
    }

    pub fn all_notifications(&self) -> Vec<Notification> {
        self.batches.lock().unwrap().iter().flatten().cloned().collect()
    }
}

#[async_trait]
impl Notifier for CollectingNotifier {
    async fn send(&self, batch: Vec<Notification>) -> Result<(), OrchestratorError> {
        self.batches.lock().unwrap().push(batch);
        Ok(())
    }
}

/// Safety notifier fake counting trips.
#[derive(Default)]
pub struct CountingSafetyNotifier {
    pub trips: Mutex<Vec<TripAlert>>,
}

impl CountingSafetyNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl SafetyNotifier for CountingSafetyNotifier {
    async fn on_trip(&self, alert: TripAlert) {
        self.trips.lock().unwrap().push(alert);
    }

    async fn alert(&self, _message: String) {}
}

/// Poll `predicate` until it holds or `timeout` elapses.
pub async fn wait_until<F: Fn() -> bool>(predicate: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    predicate()
}

pub fn queued_task(priority: i64) -> Task {
    Task::new(Uuid::new_v4(), format!("task p{priority}")).with_priority(priority)
}

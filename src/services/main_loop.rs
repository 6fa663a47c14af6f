//! The main loop: tick timer, event pipeline, and shutdown coordination.
//!
//! The loop owns construction of every core service (no reference cycles:
//! the scheduler points at the capacity tracker, nothing points back) and
//! is the single place where agent events mutate task state, capacity, and
//! the circuit breaker. Events are consumed one at a time, which preserves
//! per-agent ordering by construction.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::Local;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::errors::{DatabaseError, OrchestratorError, OrchestratorResult};
use crate::domain::models::notification::{filter_for_quiet_hours, QuietHoursWindow};
use crate::domain::models::{
    AgentEvent, AgentEventKind, ModelTier, Notification, NotificationKind, NotificationPriority,
    OrchestratorConfig, SessionStatus, TaskStatus,
};
use crate::domain::ports::{
    AgentRuntime, Notifier, ProjectRepository, SafetyNotifier, TaskRepository, UsageDelta,
};
use crate::services::capacity_tracker::CapacityTracker;
use crate::services::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, ErrorReport, SuccessReport,
};
use crate::services::db_health::DatabaseHealthMonitor;
use crate::services::event_dispatcher::EventDispatcher;
use crate::services::scheduler::Scheduler;
use crate::services::state_manager::{ActiveAgent, StateManager};
use crate::services::task_queue::TaskQueue;

/// Lifecycle of the loop itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }
}

/// The orchestrator control plane.
pub struct MainLoop {
    config: OrchestratorConfig,
    task_repo: Arc<dyn TaskRepository>,
    project_repo: Option<Arc<dyn ProjectRepository>>,
    runtime: Arc<dyn AgentRuntime>,
    notifier: Option<Arc<dyn Notifier>>,

    queue: Arc<TaskQueue>,
    capacity: Arc<CapacityTracker>,
    scheduler: Arc<Scheduler>,
    breaker: Arc<CircuitBreaker>,
    db_health: Arc<DatabaseHealthMonitor>,
    dispatcher: Arc<EventDispatcher>,
    state: Arc<StateManager>,

    lifecycle: Mutex<LifecycleState>,
    shutdown_tx: broadcast::Sender<()>,
    tick_handle: Mutex<Option<JoinHandle<()>>>,
    event_handle: Mutex<Option<JoinHandle<()>>>,
    pending_notifications: Mutex<Vec<Notification>>,
    tick_count: AtomicU64,
    /// Self-handle for the spawned tick and event tasks.
    weak_self: Weak<MainLoop>,
}

impl MainLoop {
    pub fn new(
        config: OrchestratorConfig,
        task_repo: Arc<dyn TaskRepository>,
        runtime: Arc<dyn AgentRuntime>,
        notifier: Option<Arc<dyn Notifier>>,
        safety_notifier: Option<Arc<dyn SafetyNotifier>>,
        project_repo: Option<Arc<dyn ProjectRepository>>,
    ) -> Arc<Self> {
        let queue = Arc::new(TaskQueue::new());
        let capacity = Arc::new(CapacityTracker::new(
            config.capacity.opus_session_limit,
            config.capacity.sonnet_session_limit,
        ));

        let mut breaker = CircuitBreaker::new(breaker_config(&config));
        if let Some(safety) = safety_notifier {
            breaker = breaker.with_notifier(safety);
        }
        let breaker = Arc::new(breaker);

        let scheduler = Arc::new(
            Scheduler::new(
                Arc::clone(&queue),
                Arc::clone(&capacity),
                Arc::clone(&runtime),
                Arc::clone(&breaker),
            )
            .with_max_concurrent(config.max_concurrent_agents),
        );
        let db_health = Arc::new(DatabaseHealthMonitor::new(
            Arc::clone(&task_repo),
            config.max_consecutive_db_failures,
        ));
        let (shutdown_tx, _) = broadcast::channel(4);

        Arc::new_cyclic(|weak_self| Self {
            config,
            task_repo,
            project_repo,
            runtime,
            notifier,
            queue,
            capacity,
            scheduler,
            breaker,
            db_health,
            dispatcher: Arc::new(EventDispatcher::default()),
            state: Arc::new(StateManager::new()),
            lifecycle: Mutex::new(LifecycleState::Stopped),
            shutdown_tx,
            tick_handle: Mutex::new(None),
            event_handle: Mutex::new(None),
            pending_notifications: Mutex::new(Vec::new()),
            tick_count: AtomicU64::new(0),
            weak_self: weak_self.clone(),
        })
    }

    /// Strong self-handle for spawned tasks. The loop is always held in an
    /// `Arc` (the constructor only hands one out), so the upgrade holds.
    fn strong_self(&self) -> Arc<MainLoop> {
        self.weak_self
            .upgrade()
            .expect("main loop dropped while in use")
    }

    pub fn lifecycle(&self) -> LifecycleState {
        *self.lifecycle.lock().expect("lifecycle lock poisoned")
    }

    fn set_lifecycle(&self, state: LifecycleState) {
        *self.lifecycle.lock().expect("lifecycle lock poisoned") = state;
        debug!(state = state.as_str(), "Lifecycle transition");
    }

    /// Start the loop: validate the database, restore state, run pre-flight
    /// checks, warm the queue, and arm the tick and event tasks.
    ///
    /// Calling `start` while already running is a warn-and-no-op.
    pub async fn start(&self) -> OrchestratorResult<()> {
        {
            let mut lifecycle = self.lifecycle.lock().expect("lifecycle lock poisoned");
            if *lifecycle != LifecycleState::Stopped {
                warn!(state = lifecycle.as_str(), "start() ignored: loop is not stopped");
                return Ok(());
            }
            *lifecycle = LifecycleState::Starting;
        }

        if self.config.validate_database_on_startup {
            let gate = self
                .db_health
                .validate_on_startup(&self.config.db_retry, |attempt, delay, err| {
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = err,
                        "Waiting for database"
                    );
                })
                .await;
            if let Err(e) = gate {
                self.set_lifecycle(LifecycleState::Stopped);
                return Err(e);
            }
        }

        if let Some(path) = &self.config.state_file_path {
            let restored = self.state.load(path);
            if restored > 0 {
                self.reconcile_restored_state().await;
            }
        }

        if self.config.run_pre_flight_checks {
            self.pre_flight_checks()?;
        }

        self.refresh_queue().await;

        self.set_lifecycle(LifecycleState::Running);
        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            opus_limit = self.config.capacity.opus_session_limit,
            sonnet_limit = self.config.capacity.sonnet_session_limit,
            "Orchestrator running"
        );

        self.spawn_tick_task();
        self.spawn_event_task();
        Ok(())
    }

    /// Pre-flight checks: configuration issues that would wedge the loop are
    /// fatal, everything else is a warning.
    fn pre_flight_checks(&self) -> OrchestratorResult<()> {
        if self.config.poll_interval_ms == 0 {
            self.set_lifecycle(LifecycleState::Stopped);
            return Err(OrchestratorError::Configuration(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.config.capacity.opus_session_limit == 0
            && self.config.capacity.sonnet_session_limit == 0
        {
            warn!("Both session limits are zero; nothing will ever be scheduled");
        }
        if self.config.graceful_shutdown_timeout_ms == 0 {
            warn!("graceful_shutdown_timeout_ms is zero; stop() will force-terminate immediately");
        }
        Ok(())
    }

    /// Re-reserve capacity for restored agents and drop the ones the runtime
    /// no longer knows about.
    async fn reconcile_restored_state(&self) {
        for agent in self.state.snapshot() {
            if !self.capacity.reserve(agent.model, &agent.session_id) {
                warn!(
                    session_id = %agent.session_id,
                    "Restored agent exceeds the current capacity limit"
                );
            }
        }

        match self.runtime.get_active_sessions().await {
            Ok(live) => {
                let live_pairs: Vec<(ModelTier, String)> =
                    live.iter().map(|s| (s.model, s.id.clone())).collect();
                self.capacity.sync_with_runtime(&live_pairs);
                let live_ids: std::collections::HashSet<&str> =
                    live.iter().map(|s| s.id.as_str()).collect();
                self.state.retain(|id| live_ids.contains(id));
            }
            Err(e) => {
                warn!(error = %e, "Could not reconcile restored state with the runtime");
            }
        }
    }

    fn spawn_tick_task(&self) {
        let this = self.strong_self();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_millis(this.config.poll_interval_ms));
            // The first tick fires immediately; skip it so startup completes
            // before scheduling begins.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        this.run_tick().await;
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Tick task stopping");
                        break;
                    }
                }
            }
        });
        *self.tick_handle.lock().expect("handle lock poisoned") = Some(handle);
    }

    fn spawn_event_task(&self) {
        let Some(mut events) = self.runtime.take_event_stream() else {
            warn!("Agent runtime did not provide an event stream");
            return;
        };
        let this = self.strong_self();
        let handle = tokio::spawn(async move {
            // One event at a time: per-agent delivery order is preserved.
            while let Some(event) = events.recv().await {
                this.dispatcher.dispatch(event.clone()).await;
                this.handle_agent_event(event).await;
            }
            debug!("Event stream closed");
        });
        *self.event_handle.lock().expect("handle lock poisoned") = Some(handle);
    }

    /// One tick: consult the gates, refresh the queue, schedule, notify.
    pub async fn run_tick(&self) {
        let tick = self.tick_count.fetch_add(1, Ordering::SeqCst) + 1;

        if self.breaker.is_tripped() {
            debug!(tick, "Tick skipped: circuit breaker is tripped");
            return;
        }

        if self.db_health.is_degraded() {
            if !self.db_health.attempt_recovery().await {
                debug!(tick, "Tick skipped: database degraded");
                return;
            }
        }

        self.refresh_queue().await;

        let report = self.scheduler.schedule_all().await;
        for launched in &report.launched {
            self.commit_launch(launched.task_id, &launched.session_id, launched.model)
                .await;
        }

        self.flush_notifications().await;

        if self.config.status_check_in_interval_ms > 0 {
            let every = self
                .config
                .status_check_in_interval_ms
                .div_ceil(self.config.poll_interval_ms.max(1))
                .max(1);
            if tick % every == 0 {
                let stats = self.scheduler.stats();
                info!(
                    tick,
                    queued = stats.queued,
                    opus = stats.capacity.opus.current,
                    sonnet = stats.capacity.sonnet.current,
                    active_agents = self.state.active_count(),
                    "Status check-in"
                );
            }
        }
    }

    /// Rebuild the in-memory queue from the store. One bad refresh must not
    /// stop the loop; database failures feed the health monitor instead.
    async fn refresh_queue(&self) {
        match self.task_repo.get_queued_tasks().await {
            Ok(tasks) => {
                self.db_health.on_db_success();
                let queued_ids: std::collections::HashSet<Uuid> =
                    tasks.iter().map(|t| t.id).collect();
                for entry in self.queue.snapshot() {
                    if !queued_ids.contains(&entry.task_id) {
                        self.queue.remove(entry.task_id);
                    }
                }
                for task in &tasks {
                    self.queue.enqueue(task);
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to refresh the queue from the store");
                self.db_health.on_db_failure(&e);
            }
        }
    }

    /// Persist the outcome of one successful launch.
    async fn commit_launch(&self, task_id: Uuid, session_id: &str, model: ModelTier) {
        self.state.insert(ActiveAgent {
            session_id: session_id.to_string(),
            task_id,
            model,
            status: SessionStatus::Running,
            started_at: chrono::Utc::now(),
        });

        if let Err(e) = self.task_repo.assign_agent(task_id, session_id).await {
            warn!(task_id = %task_id, error = %e, "Failed to persist agent assignment");
            self.db_health.on_db_failure(&e);
            return;
        }
        if let Err(e) = self
            .task_repo
            .update_task_status(task_id, TaskStatus::Assigned)
            .await
        {
            warn!(task_id = %task_id, error = %e, "Failed to persist task status");
            self.db_health.on_db_failure(&e);
            return;
        }
        self.db_health.on_db_success();
    }

    /// React to one agent event. Called from the single event-consumer task.
    pub async fn handle_agent_event(&self, event: AgentEvent) {
        match event.kind {
            AgentEventKind::Completion => self.on_completion(&event).await,
            AgentEventKind::Error => self.on_error(&event).await,
            AgentEventKind::Blocker => self.on_blocker(&event).await,
            AgentEventKind::Question => self.on_question(&event).await,
            AgentEventKind::SubagentSpawn => {
                info!(
                    agent_id = %event.agent_id,
                    subagent = event.payload.subagent_id.as_deref().unwrap_or("unknown"),
                    "Agent spawned a subagent"
                );
            }
        }
    }

    async fn on_completion(&self, event: &AgentEvent) {
        let agent = self.state.remove(&event.agent_id);
        let model = agent.as_ref().map(|a| a.model);
        match model {
            Some(tier) => self.capacity.release(tier, &event.agent_id),
            None => warn!(agent_id = %event.agent_id, "Completion from an untracked agent"),
        }

        let usage = match model.unwrap_or(ModelTier::Sonnet) {
            ModelTier::Opus => UsageDelta {
                tokens_opus: event.payload.tokens_used,
                sessions_opus: 1,
                ..UsageDelta::default()
            },
            ModelTier::Sonnet => UsageDelta {
                tokens_sonnet: event.payload.tokens_used,
                sessions_sonnet: 1,
                ..UsageDelta::default()
            },
        };

        let store_result = async {
            self.task_repo
                .update_task_status(event.task_id, TaskStatus::Complete)
                .await?;
            self.task_repo.record_usage(event.task_id, usage).await?;
            self.task_repo.unassign_agent(event.task_id).await
        }
        .await;
        self.observe_db(store_result, "persist completion");

        self.breaker.record_success(
            &event.agent_id,
            SuccessReport {
                tokens_used: event.payload.tokens_used,
                cost_usd: event.payload.cost_usd,
                has_meaningful_output: event.payload.has_meaningful_output,
            },
        );

        let message = event
            .payload
            .message
            .clone()
            .unwrap_or_else(|| "task complete".to_string());
        self.queue_notification(
            NotificationKind::Completion,
            event,
            message,
            NotificationPriority::Normal,
        )
        .await;

        info!(
            agent_id = %event.agent_id,
            task_id = %event.task_id,
            tokens = event.payload.tokens_used,
            "Task completed"
        );
    }

    async fn on_error(&self, event: &AgentEvent) {
        let agent = self.state.remove(&event.agent_id);
        match agent.as_ref().map(|a| a.model) {
            Some(tier) => self.capacity.release(tier, &event.agent_id),
            None => warn!(agent_id = %event.agent_id, "Error from an untracked agent"),
        }

        // Fatal-classified failures park the task; everything else goes back
        // into the queue for the next tick.
        let next_status = if event.payload.fatal {
            TaskStatus::Blocked
        } else {
            TaskStatus::Queued
        };
        let store_result = async {
            self.task_repo
                .update_task_status(event.task_id, next_status)
                .await?;
            self.task_repo.unassign_agent(event.task_id).await
        }
        .await;
        self.observe_db(store_result, "persist agent error");

        let error_text = event.payload.error.as_deref().unwrap_or("unknown error");
        self.breaker.record_error(
            &event.agent_id,
            error_text,
            ErrorReport {
                tokens_used: event.payload.tokens_used,
                cost_usd: event.payload.cost_usd,
            },
        );

        warn!(
            agent_id = %event.agent_id,
            task_id = %event.task_id,
            fatal = event.payload.fatal,
            error = error_text,
            "Agent reported an error"
        );
    }

    async fn on_blocker(&self, event: &AgentEvent) {
        // The session stays alive and keeps its capacity slot.
        let store_result = async {
            self.task_repo
                .update_task_status(event.task_id, TaskStatus::Blocked)
                .await?;
            self.task_repo
                .set_blocked_by(event.task_id, event.payload.blocking_task_id)
                .await
        }
        .await;
        self.observe_db(store_result, "persist blocker");

        let message = match event.payload.blocking_task_id {
            Some(blocker) => format!("blocked by task {blocker}"),
            None => "blocked".to_string(),
        };
        self.queue_notification(
            NotificationKind::Blocker,
            event,
            message,
            NotificationPriority::High,
        )
        .await;
    }

    async fn on_question(&self, event: &AgentEvent) {
        let text = event
            .payload
            .message
            .clone()
            .unwrap_or_else(|| "agent is waiting for input".to_string());
        self.state.record_question(&event.agent_id, text.clone());
        self.queue_notification(
            NotificationKind::Question,
            event,
            text,
            NotificationPriority::Normal,
        )
        .await;
    }

    fn observe_db(&self, result: Result<(), DatabaseError>, action: &str) {
        match result {
            Ok(()) => self.db_health.on_db_success(),
            Err(e) => {
                warn!(error = %e, "Failed to {action}");
                self.db_health.on_db_failure(&e);
            }
        }
    }

    async fn queue_notification(
        &self,
        kind: NotificationKind,
        event: &AgentEvent,
        message: String,
        priority: NotificationPriority,
    ) {
        let project_name = self.project_name_for(event.task_id).await;
        let notification = Notification {
            kind,
            agent_id: event.agent_id.clone(),
            task_id: event.task_id,
            project_name,
            message,
            priority,
        };
        self.pending_notifications
            .lock()
            .expect("notification lock poisoned")
            .push(notification);
    }

    async fn project_name_for(&self, task_id: Uuid) -> String {
        let Some(project_repo) = &self.project_repo else {
            return String::new();
        };
        let Ok(Some(task)) = self.task_repo.get(task_id).await else {
            return String::new();
        };
        match project_repo.get(task.project_id).await {
            Ok(Some(project)) => project.name,
            _ => task.project_id.to_string(),
        }
    }

    /// Send at most one notification batch per tick, honoring quiet hours.
    async fn flush_notifications(&self) {
        let batch: Vec<Notification> = std::mem::take(
            &mut *self
                .pending_notifications
                .lock()
                .expect("notification lock poisoned"),
        );
        if batch.is_empty() {
            return;
        }

        let window = self
            .config
            .quiet_hours
            .and_then(|q| QuietHoursWindow::from_hours(q.start_hour, q.end_hour));
        let batch = filter_for_quiet_hours(batch, window, Local::now().time());
        if batch.is_empty() {
            return;
        }

        if let Some(notifier) = &self.notifier {
            if let Err(e) = notifier.send(batch).await {
                warn!(error = %e, "Notification batch failed");
            }
        }
    }

    /// Stop the loop: cancel the tick timer, wait for agents to finish,
    /// force-terminate stragglers, persist state.
    ///
    /// Calling `stop` while already stopped is a warn-and-no-op.
    pub async fn stop(&self) -> OrchestratorResult<()> {
        {
            let mut lifecycle = self.lifecycle.lock().expect("lifecycle lock poisoned");
            match *lifecycle {
                LifecycleState::Running => *lifecycle = LifecycleState::Stopping,
                state => {
                    warn!(state = state.as_str(), "stop() ignored: loop is not running");
                    return Ok(());
                }
            }
        }

        // Stop ticking first; keep the event consumer alive so completions
        // arriving during the grace period still release capacity.
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.tick_handle.lock().expect("handle lock poisoned").take() {
            let _ = handle.await;
        }

        let deadline = Duration::from_millis(self.config.graceful_shutdown_timeout_ms);
        let waited = tokio::time::timeout(deadline, async {
            while !self.state.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;

        if waited.is_err() {
            let stragglers = self.state.snapshot();
            warn!(
                count = stragglers.len(),
                "Graceful shutdown timed out; force-terminating remaining agents"
            );
            for agent in stragglers {
                if let Err(e) = self.runtime.terminate_session(&agent.session_id).await {
                    error!(session_id = %agent.session_id, error = %e, "Force-terminate failed");
                }
            }
        }

        if let Some(handle) = self.event_handle.lock().expect("handle lock poisoned").take() {
            handle.abort();
            let _ = handle.await;
        }

        if let Some(path) = &self.config.state_file_path {
            if let Err(e) = self.state.save(path) {
                error!(error = %e, "Failed to persist state on shutdown");
            }
        }

        self.set_lifecycle(LifecycleState::Stopped);
        info!("Orchestrator stopped");
        Ok(())
    }

    /// Operator action: close the breaker again after a trip.
    pub fn reset_circuit_breaker(&self) {
        self.breaker.reset();
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn db_health(&self) -> &Arc<DatabaseHealthMonitor> {
        &self.db_health
    }

    pub fn state_manager(&self) -> &Arc<StateManager> {
        &self.state
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn ticks(&self) -> u64 {
        self.tick_count.load(Ordering::SeqCst)
    }
}

/// Map the orchestrator-level settings onto the breaker's config. With
/// hard-stop enabled, the daily and weekly budgets both tighten the
/// breaker's spend ceiling; the breaker keeps one running total (no
/// day/week windowing), so the tightest figure wins.
fn breaker_config(config: &OrchestratorConfig) -> CircuitBreakerConfig {
    let mut hard_limit = config.circuit_breaker.hard_budget_limit_usd;
    if config.budget.hard_stop_at_budget_limit {
        if let Some(daily) = config.budget.daily_budget_usd {
            hard_limit = hard_limit.min(daily);
        }
        if let Some(weekly) = config.budget.weekly_budget_usd {
            hard_limit = hard_limit.min(weekly);
        }
    }
    CircuitBreakerConfig {
        max_consecutive_agent_errors: config.circuit_breaker.max_consecutive_agent_errors,
        error_rate_threshold: config.circuit_breaker.error_rate_threshold,
        error_rate_window: config.circuit_breaker.error_rate_window,
        hard_budget_limit_usd: hard_limit,
        token_limit_without_output: config.circuit_breaker.token_limit_without_output,
    }
}

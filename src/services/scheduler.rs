//! Scheduling: decide which task runs next and launch it.
//!
//! The scheduler composes the task queue, the capacity tracker, and the
//! agent runtime. A coarse async mutex brackets `schedule_next` end-to-end
//! so two concurrent ticks can never double-schedule the same queue head;
//! the capacity lock itself is only held for the reservation step, and
//! spawn I/O happens outside it.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::models::{ModelTier, Task};
use crate::domain::ports::{AgentRuntime, SpawnRequest};
use crate::services::capacity_tracker::{CapacityStats, CapacityTracker};
use crate::services::circuit_breaker::{CircuitBreaker, ErrorReport};
use crate::services::task_queue::{QueueEntry, TaskQueue};

/// One successful launch.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduledTask {
    pub task_id: Uuid,
    pub session_id: String,
    pub model: ModelTier,
}

/// Result of a single `schedule_next` call.
#[derive(Debug, Clone)]
pub enum ScheduleOutcome {
    Scheduled(ScheduledTask),
    /// Queue is empty.
    Idle,
    /// No tier can take the head task right now.
    NoCapacity,
    /// The runtime rejected the spawn; the task stays queued.
    SpawnFailed { task_id: Uuid, message: String },
}

/// Result of draining `schedule_next` until it stops making progress.
#[derive(Debug)]
pub struct ScheduleReport {
    pub launched: Vec<ScheduledTask>,
    pub terminal: ScheduleOutcome,
}

/// Queue depth plus a capacity snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub queued: usize,
    pub capacity: CapacityStats,
}

pub struct Scheduler {
    queue: Arc<TaskQueue>,
    capacity: Arc<CapacityTracker>,
    runtime: Arc<dyn AgentRuntime>,
    breaker: Arc<CircuitBreaker>,
    /// Global cap across both tiers; 0 disables it.
    max_concurrent_agents: usize,
    schedule_lock: tokio::sync::Mutex<()>,
}

impl Scheduler {
    pub fn new(
        queue: Arc<TaskQueue>,
        capacity: Arc<CapacityTracker>,
        runtime: Arc<dyn AgentRuntime>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            queue,
            capacity,
            runtime,
            breaker,
            max_concurrent_agents: 0,
            schedule_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Cap total concurrency across both tiers.
    pub fn with_max_concurrent(mut self, max_concurrent_agents: usize) -> Self {
        self.max_concurrent_agents = max_concurrent_agents;
        self
    }

    fn at_global_cap(&self) -> bool {
        self.max_concurrent_agents > 0
            && self.capacity.current_session_count(ModelTier::Opus)
                + self.capacity.current_session_count(ModelTier::Sonnet)
                >= self.max_concurrent_agents
    }

    /// Enqueue a task. Idempotent: an already-queued id is replaced in place.
    pub fn add_task(&self, task: &Task) {
        self.queue.enqueue(task);
    }

    /// Drop a task from the queue. Idempotent.
    pub fn remove_task(&self, task_id: Uuid) {
        self.queue.remove(task_id);
    }

    /// True when the queue is non-empty and at least one tier has a free slot.
    pub fn can_schedule(&self) -> bool {
        !self.queue.is_empty()
            && (self.capacity.has_capacity(ModelTier::Opus)
                || self.capacity.has_capacity(ModelTier::Sonnet))
    }

    /// Model selection rule for a queue entry.
    ///
    /// 1. Opus when estimated for it, complexity warrants it, and a slot is free.
    /// 2. Otherwise sonnet when a slot is free.
    /// 3. Otherwise opus regardless of complexity when a slot is free.
    /// 4. Otherwise no tier right now.
    fn select_tier(&self, entry: &QueueEntry) -> Option<ModelTier> {
        if entry.estimated_sessions_opus > 0
            && entry.complexity.warrants_opus()
            && self.capacity.has_capacity(ModelTier::Opus)
        {
            return Some(ModelTier::Opus);
        }
        if self.capacity.has_capacity(ModelTier::Sonnet) {
            return Some(ModelTier::Sonnet);
        }
        if self.capacity.has_capacity(ModelTier::Opus) {
            return Some(ModelTier::Opus);
        }
        None
    }

    /// Schedule the highest-priority task if capacity allows.
    pub async fn schedule_next(&self) -> ScheduleOutcome {
        let _guard = self.schedule_lock.lock().await;

        let Some(entry) = self.queue.peek() else {
            return ScheduleOutcome::Idle;
        };

        if self.at_global_cap() {
            return ScheduleOutcome::NoCapacity;
        }

        let Some(tier) = self.select_tier(&entry) else {
            return ScheduleOutcome::NoCapacity;
        };

        // Hold the slot under a provisional id while spawn I/O runs.
        let provisional_id = format!("pending-{}", Uuid::new_v4());
        if !self.capacity.reserve(tier, &provisional_id) {
            // An event handler consumed the slot between the check and the
            // reservation.
            return ScheduleOutcome::NoCapacity;
        }

        let request = SpawnRequest {
            task_id: entry.task_id,
            summary: entry.summary.clone(),
            model: tier,
        };
        match self.runtime.spawn_agent(request).await {
            Ok(session_id) => {
                if session_id != provisional_id {
                    self.capacity.rename_session(tier, &provisional_id, &session_id);
                }
                self.queue.remove(entry.task_id);
                info!(
                    task_id = %entry.task_id,
                    session_id = %session_id,
                    model = %tier,
                    "Scheduled task"
                );
                ScheduleOutcome::Scheduled(ScheduledTask {
                    task_id: entry.task_id,
                    session_id,
                    model: tier,
                })
            }
            Err(e) => {
                self.capacity.release(tier, &provisional_id);
                let message = e.to_string();
                warn!(task_id = %entry.task_id, error = %message, "Agent spawn failed; task stays queued");
                // Keyed by task so repeated spawn failures of a poisoned
                // queue head accumulate toward the consecutive-error trip.
                self.breaker.record_error(
                    &format!("spawn:{}", entry.task_id),
                    &message,
                    ErrorReport::default(),
                );
                ScheduleOutcome::SpawnFailed {
                    task_id: entry.task_id,
                    message,
                }
            }
        }
    }

    /// Schedule until the queue drains, capacity runs out, or a spawn fails.
    pub async fn schedule_all(&self) -> ScheduleReport {
        let mut launched = Vec::new();
        loop {
            match self.schedule_next().await {
                ScheduleOutcome::Scheduled(task) => launched.push(task),
                terminal => {
                    return ScheduleReport { launched, terminal };
                }
            }
        }
    }

    /// Forwarded to the capacity tracker.
    pub fn release_capacity(&self, tier: ModelTier, session_id: &str) {
        self.capacity.release(tier, session_id);
    }

    /// Forwarded to the capacity tracker.
    pub fn sync_capacity(&self, live: &[(ModelTier, String)]) {
        self.capacity.sync_with_runtime(live);
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            queued: self.queue.len(),
            capacity: self.capacity.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    use crate::domain::errors::OrchestratorError;
    use crate::domain::models::{AgentEvent, AgentSession, Complexity};

    /// Runtime fake: counts spawns, optionally failing each one.
    struct FakeRuntime {
        spawns: AtomicUsize,
        fail_spawns: bool,
        spawned_models: Mutex<Vec<ModelTier>>,
    }

    impl FakeRuntime {
        fn new(fail_spawns: bool) -> Arc<Self> {
            Arc::new(Self {
                spawns: AtomicUsize::new(0),
                fail_spawns,
                spawned_models: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl AgentRuntime for FakeRuntime {
        async fn spawn_agent(&self, request: SpawnRequest) -> Result<String, OrchestratorError> {
            let n = self.spawns.fetch_add(1, Ordering::SeqCst);
            if self.fail_spawns {
                return Err(OrchestratorError::Spawn {
                    task_id: request.task_id,
                    message: "runtime refused".to_string(),
                });
            }
            self.spawned_models.lock().unwrap().push(request.model);
            Ok(format!("sess-{n}"))
        }

        async fn terminate_session(&self, _session_id: &str) -> Result<(), OrchestratorError> {
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
            None
        }
    }

    fn scheduler(opus: usize, sonnet: usize, fail_spawns: bool) -> (Scheduler, Arc<FakeRuntime>) {
        let runtime = FakeRuntime::new(fail_spawns);
        let scheduler = Scheduler::new(
            Arc::new(TaskQueue::new()),
            Arc::new(CapacityTracker::new(opus, sonnet)),
            Arc::clone(&runtime) as Arc<dyn AgentRuntime>,
            Arc::new(CircuitBreaker::with_defaults()),
        );
        (scheduler, runtime)
    }

    fn sonnet_task(priority: i64) -> Task {
        Task::new(Uuid::new_v4(), "sonnet work")
            .with_priority(priority)
            .with_estimates(0, 1)
    }

    fn opus_task(priority: i64) -> Task {
        Task::new(Uuid::new_v4(), "opus work")
            .with_priority(priority)
            .with_estimates(1, 0)
            .with_complexity(Complexity::Complex)
    }

    #[tokio::test]
    async fn schedules_sonnet_task_under_capacity() {
        let (scheduler, _) = scheduler(2, 5, false);
        let task = sonnet_task(7);
        scheduler.add_task(&task);

        let outcome = scheduler.schedule_next().await;
        let ScheduleOutcome::Scheduled(scheduled) = outcome else {
            panic!("expected a schedule, got {outcome:?}");
        };
        assert_eq!(scheduled.task_id, task.id);
        assert_eq!(scheduled.model, ModelTier::Sonnet);

        let stats = scheduler.stats();
        assert_eq!(stats.queued, 0);
        assert_eq!(stats.capacity.opus.current, 0);
        assert_eq!(stats.capacity.sonnet.current, 1);
    }

    #[tokio::test]
    async fn empty_queue_is_idle() {
        let (scheduler, _) = scheduler(1, 1, false);
        assert!(matches!(scheduler.schedule_next().await, ScheduleOutcome::Idle));
    }

    #[tokio::test]
    async fn full_capacity_returns_no_capacity_unchanged() {
        let (scheduler, _) = scheduler(1, 1, false);
        scheduler.add_task(&sonnet_task(1));
        scheduler.add_task(&sonnet_task(2));
        // Fill both tiers.
        let ScheduleOutcome::Scheduled(_) = scheduler.schedule_next().await else {
            panic!()
        };
        let ScheduleOutcome::Scheduled(_) = scheduler.schedule_next().await else {
            panic!()
        };

        let remaining = sonnet_task(3);
        scheduler.add_task(&remaining);
        let before = scheduler.stats();
        assert!(matches!(
            scheduler.schedule_next().await,
            ScheduleOutcome::NoCapacity
        ));
        let after = scheduler.stats();
        assert_eq!(after.queued, before.queued);
        assert_eq!(after.capacity.opus.current, before.capacity.opus.current);
        assert_eq!(after.capacity.sonnet.current, before.capacity.sonnet.current);
    }

    #[tokio::test]
    async fn complex_estimated_task_prefers_opus() {
        let (scheduler, runtime) = scheduler(1, 1, false);
        scheduler.add_task(&opus_task(5));
        let ScheduleOutcome::Scheduled(s) = scheduler.schedule_next().await else {
            panic!()
        };
        assert_eq!(s.model, ModelTier::Opus);
        assert_eq!(runtime.spawned_models.lock().unwrap()[0], ModelTier::Opus);
    }

    #[tokio::test]
    async fn sonnet_full_falls_through_to_opus() {
        let (scheduler, _) = scheduler(1, 1, false);
        scheduler.add_task(&sonnet_task(9));
        scheduler.add_task(&sonnet_task(8));

        let ScheduleOutcome::Scheduled(first) = scheduler.schedule_next().await else {
            panic!()
        };
        assert_eq!(first.model, ModelTier::Sonnet);

        // Rule 3: sonnet saturated, a sonnet-preferring task takes opus.
        let ScheduleOutcome::Scheduled(second) = scheduler.schedule_next().await else {
            panic!()
        };
        assert_eq!(second.model, ModelTier::Opus);
    }

    #[tokio::test]
    async fn opus_estimate_without_high_complexity_goes_to_sonnet() {
        let (scheduler, _) = scheduler(1, 1, false);
        let task = Task::new(Uuid::new_v4(), "estimated but medium")
            .with_estimates(1, 0)
            .with_complexity(Complexity::Medium);
        scheduler.add_task(&task);

        let ScheduleOutcome::Scheduled(s) = scheduler.schedule_next().await else {
            panic!()
        };
        assert_eq!(s.model, ModelTier::Sonnet);
    }

    #[tokio::test]
    async fn spawn_failure_releases_capacity_and_keeps_task_queued() {
        let (scheduler, _) = scheduler(1, 1, true);
        let task = sonnet_task(1);
        scheduler.add_task(&task);

        let outcome = scheduler.schedule_next().await;
        assert!(matches!(
            outcome,
            ScheduleOutcome::SpawnFailed { task_id, .. } if task_id == task.id
        ));

        let stats = scheduler.stats();
        assert_eq!(stats.queued, 1, "task remains queued for the next tick");
        assert_eq!(stats.capacity.sonnet.current, 0, "slot was released");
    }

    #[tokio::test]
    async fn repeated_spawn_failures_trip_the_breaker() {
        let runtime = FakeRuntime::new(true);
        let breaker = Arc::new(CircuitBreaker::with_defaults());
        let scheduler = Scheduler::new(
            Arc::new(TaskQueue::new()),
            Arc::new(CapacityTracker::new(1, 1)),
            Arc::clone(&runtime) as Arc<dyn AgentRuntime>,
            Arc::clone(&breaker),
        );
        scheduler.add_task(&sonnet_task(1));

        for _ in 0..3 {
            let _ = scheduler.schedule_next().await;
        }
        assert!(breaker.is_tripped());
    }

    #[tokio::test]
    async fn schedule_all_drains_until_no_capacity() {
        let (scheduler, _) = scheduler(1, 2, false);
        for i in 0..5 {
            scheduler.add_task(&sonnet_task(i));
        }

        let report = scheduler.schedule_all().await;
        assert_eq!(report.launched.len(), 3, "2 sonnet + 1 opus fallback");
        assert!(matches!(report.terminal, ScheduleOutcome::NoCapacity));
        assert_eq!(scheduler.stats().queued, 2);
    }

    #[tokio::test]
    async fn schedule_all_reports_idle_when_drained() {
        let (scheduler, _) = scheduler(2, 5, false);
        scheduler.add_task(&sonnet_task(1));
        scheduler.add_task(&sonnet_task(2));

        let report = scheduler.schedule_all().await;
        assert_eq!(report.launched.len(), 2);
        assert!(matches!(report.terminal, ScheduleOutcome::Idle));
    }

    #[tokio::test]
    async fn higher_priority_schedules_first() {
        let (scheduler, _) = scheduler(0, 1, false);
        let low = sonnet_task(1);
        let high = sonnet_task(10);
        scheduler.add_task(&low);
        scheduler.add_task(&high);

        let ScheduleOutcome::Scheduled(s) = scheduler.schedule_next().await else {
            panic!()
        };
        assert_eq!(s.task_id, high.id);
    }

    #[tokio::test]
    async fn global_cap_overrides_per_tier_headroom() {
        let runtime = FakeRuntime::new(false);
        let scheduler = Scheduler::new(
            Arc::new(TaskQueue::new()),
            Arc::new(CapacityTracker::new(2, 5)),
            Arc::clone(&runtime) as Arc<dyn AgentRuntime>,
            Arc::new(CircuitBreaker::with_defaults()),
        )
        .with_max_concurrent(2);

        for i in 0..4 {
            scheduler.add_task(&sonnet_task(i));
        }
        let report = scheduler.schedule_all().await;
        assert_eq!(report.launched.len(), 2, "global cap binds before tier limits");
        assert!(matches!(report.terminal, ScheduleOutcome::NoCapacity));
    }

    #[tokio::test]
    async fn can_schedule_requires_queue_and_capacity() {
        let (sched, _) = scheduler(1, 1, false);
        assert!(!sched.can_schedule(), "empty queue");

        sched.add_task(&sonnet_task(1));
        assert!(sched.can_schedule());

        let (full, _) = scheduler(0, 0, false);
        full.add_task(&sonnet_task(1));
        assert!(!full.can_schedule(), "no capacity anywhere");
    }
}

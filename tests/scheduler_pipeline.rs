//! End-to-end scheduling pipeline: tick → spawn → event → state.
//!
//! These tests drive the loop tick-by-tick with injected fakes, so every
//! assertion is deterministic.

mod common;

use std::sync::Arc;

use common::{
    queued_task, CollectingNotifier, CountingSafetyNotifier, InMemoryTaskRepository,
    ScriptedRuntime,
};
use foreman::domain::models::{
    AgentEvent, Complexity, DbRetryConfig, ModelTier, NotificationKind, NotificationPriority,
    OrchestratorConfig, TaskStatus,
};
use foreman::domain::ports::{AgentRuntime, Notifier, SafetyNotifier, TaskRepository};
use foreman::services::MainLoop;

fn fast_config(opus: usize, sonnet: usize) -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.poll_interval_ms = 20;
    config.capacity.opus_session_limit = opus;
    config.capacity.sonnet_session_limit = sonnet;
    config.graceful_shutdown_timeout_ms = 200;
    config.db_retry = DbRetryConfig {
        max_retries: 2,
        initial_delay_ms: 1,
        max_delay_ms: 5,
        backoff_multiplier: 2.0,
    };
    config
}

struct Harness {
    main_loop: Arc<MainLoop>,
    repo: Arc<InMemoryTaskRepository>,
    runtime: Arc<ScriptedRuntime>,
    notifier: Arc<CollectingNotifier>,
}

fn harness(config: OrchestratorConfig) -> Harness {
    let repo = InMemoryTaskRepository::new();
    let runtime = ScriptedRuntime::new();
    let notifier = CollectingNotifier::new();
    let safety = CountingSafetyNotifier::new();
    let main_loop = MainLoop::new(
        config,
        Arc::clone(&repo) as Arc<dyn TaskRepository>,
        Arc::clone(&runtime) as Arc<dyn AgentRuntime>,
        Some(Arc::clone(&notifier) as Arc<dyn Notifier>),
        Some(safety as Arc<dyn SafetyNotifier>),
        None,
    );
    Harness {
        main_loop,
        repo,
        runtime,
        notifier,
    }
}

#[tokio::test]
async fn schedules_queued_task_onto_sonnet_under_capacity() {
    let h = harness(fast_config(2, 5));
    let task = queued_task(7).with_estimates(0, 1);
    h.repo.seed(task.clone());

    h.main_loop.run_tick().await;

    let spawned = h.runtime.spawned.lock().unwrap().clone();
    assert_eq!(spawned.len(), 1);
    assert_eq!(spawned[0].0, task.id);
    assert_eq!(spawned[0].1, ModelTier::Sonnet);

    let stats = h.main_loop.scheduler().stats();
    assert_eq!(stats.queued, 0);
    assert_eq!(stats.capacity.opus.current, 0);
    assert_eq!(stats.capacity.sonnet.current, 1);

    let stored = h.repo.task(task.id).unwrap();
    assert_eq!(stored.status, TaskStatus::Assigned);
    assert_eq!(
        stored.assigned_agent_id,
        h.runtime.session_for_task(task.id)
    );
}

#[tokio::test]
async fn saturated_tiers_leave_queue_and_capacity_unchanged() {
    let h = harness(fast_config(1, 1));
    h.repo.seed(queued_task(3).with_estimates(0, 1));
    h.repo.seed(queued_task(2).with_estimates(0, 1));
    h.repo.seed(queued_task(1).with_estimates(0, 1));

    h.main_loop.run_tick().await;
    assert_eq!(h.runtime.spawn_count(), 2, "one sonnet, one opus fallback");

    let before = h.main_loop.scheduler().stats();
    assert_eq!(before.queued, 1);

    h.main_loop.run_tick().await;
    let after = h.main_loop.scheduler().stats();
    assert_eq!(h.runtime.spawn_count(), 2, "no new spawns at capacity");
    assert_eq!(after.queued, before.queued);
    assert_eq!(after.capacity.opus.current, 1);
    assert_eq!(after.capacity.sonnet.current, 1);
}

#[tokio::test]
async fn completion_releases_capacity_and_completes_task() {
    let h = harness(fast_config(2, 5));
    let task = queued_task(5).with_estimates(0, 1);
    h.repo.seed(task.clone());

    h.main_loop.run_tick().await;
    let session = h.runtime.session_for_task(task.id).unwrap();

    h.main_loop
        .handle_agent_event(AgentEvent::completion(&session, task.id, 1200, 0.25))
        .await;

    let stored = h.repo.task(task.id).unwrap();
    assert_eq!(stored.status, TaskStatus::Complete);
    assert!(stored.assigned_agent_id.is_none());
    assert_eq!(stored.actual_tokens_sonnet, 1200);
    assert_eq!(stored.actual_sessions_sonnet, 1);

    let stats = h.main_loop.scheduler().stats();
    assert_eq!(stats.capacity.sonnet.current, 0);
    assert!(h.main_loop.state_manager().is_empty());

    let breaker = h.main_loop.circuit_breaker().status();
    assert_eq!(breaker.total_tokens, 1200);
    assert!((breaker.total_cost_usd - 0.25).abs() < f64::EPSILON);

    // The next tick flushes the completion notification as one batch.
    h.main_loop.run_tick().await;
    assert_eq!(h.notifier.batch_count(), 1);
    let notes = h.notifier.all_notifications();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].kind, NotificationKind::Completion);
    assert_eq!(notes[0].agent_id, session);
}

#[tokio::test]
async fn error_event_requeues_task_and_releases_capacity() {
    let h = harness(fast_config(2, 5));
    let task = queued_task(5).with_estimates(0, 1);
    h.repo.seed(task.clone());

    h.main_loop.run_tick().await;
    let session = h.runtime.session_for_task(task.id).unwrap();

    h.main_loop
        .handle_agent_event(AgentEvent::error(&session, task.id, "agent crashed"))
        .await;

    let stored = h.repo.task(task.id).unwrap();
    assert_eq!(stored.status, TaskStatus::Queued);
    assert!(stored.assigned_agent_id.is_none());
    assert_eq!(h.main_loop.scheduler().stats().capacity.sonnet.current, 0);
    assert_eq!(h.main_loop.circuit_breaker().agent_error_count(&session), 1);
}

#[tokio::test]
async fn fatal_error_parks_task_as_blocked() {
    let h = harness(fast_config(2, 5));
    let task = queued_task(5).with_estimates(0, 1);
    h.repo.seed(task.clone());

    h.main_loop.run_tick().await;
    let session = h.runtime.session_for_task(task.id).unwrap();

    let mut event = AgentEvent::error(&session, task.id, "unrecoverable");
    event.payload.fatal = true;
    h.main_loop.handle_agent_event(event).await;

    assert_eq!(h.repo.task(task.id).unwrap().status, TaskStatus::Blocked);

    // A blocked task is not rescheduled on the next tick.
    h.main_loop.run_tick().await;
    assert_eq!(h.runtime.spawn_count(), 1);
}

#[tokio::test]
async fn blocker_keeps_the_session_and_its_capacity_slot() {
    let h = harness(fast_config(2, 5));
    let task = queued_task(5).with_estimates(0, 1);
    let blocking = queued_task(1);
    h.repo.seed(task.clone());

    h.main_loop.run_tick().await;
    let session = h.runtime.session_for_task(task.id).unwrap();

    h.main_loop
        .handle_agent_event(AgentEvent::blocker(&session, task.id, blocking.id))
        .await;

    let stored = h.repo.task(task.id).unwrap();
    assert_eq!(stored.status, TaskStatus::Blocked);
    assert_eq!(stored.blocked_by_task_id, Some(blocking.id));

    // Session still alive: capacity held, state retained.
    assert_eq!(h.main_loop.scheduler().stats().capacity.sonnet.current, 1);
    assert_eq!(h.main_loop.state_manager().active_count(), 1);

    // Blocker notifications are high priority.
    h.main_loop.run_tick().await;
    let notes = h.notifier.all_notifications();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].kind, NotificationKind::Blocker);
    assert_eq!(notes[0].priority, NotificationPriority::High);
}

#[tokio::test]
async fn question_is_recorded_and_notified_without_capacity_change() {
    let h = harness(fast_config(2, 5));
    let task = queued_task(5).with_estimates(0, 1);
    h.repo.seed(task.clone());

    h.main_loop.run_tick().await;
    let session = h.runtime.session_for_task(task.id).unwrap();

    h.main_loop
        .handle_agent_event(AgentEvent::question(&session, task.id, "which database?"))
        .await;

    assert_eq!(h.main_loop.scheduler().stats().capacity.sonnet.current, 1);
    assert_eq!(
        h.main_loop.state_manager().last_question(&session).unwrap(),
        "which database?"
    );

    h.main_loop.run_tick().await;
    let notes = h.notifier.all_notifications();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].kind, NotificationKind::Question);
    assert_eq!(notes[0].message, "which database?");
}

#[tokio::test]
async fn spawn_failure_keeps_task_queued_and_releases_slot() {
    let h = harness(fast_config(2, 5));
    let task = queued_task(5).with_estimates(0, 1);
    h.repo.seed(task.clone());
    h.runtime.set_fail_spawns(true);

    h.main_loop.run_tick().await;

    assert_eq!(h.runtime.spawn_count(), 0);
    assert_eq!(h.repo.task(task.id).unwrap().status, TaskStatus::Queued);
    let stats = h.main_loop.scheduler().stats();
    assert_eq!(stats.queued, 1);
    assert_eq!(stats.capacity.sonnet.current, 0);

    // The same head is retried on the next tick once spawns recover.
    h.runtime.set_fail_spawns(false);
    h.main_loop.run_tick().await;
    assert_eq!(h.runtime.spawn_count(), 1);
    assert_eq!(h.repo.task(task.id).unwrap().status, TaskStatus::Assigned);
}

#[tokio::test]
async fn opus_preferring_task_takes_opus_first() {
    let h = harness(fast_config(1, 1));
    let opus_work = queued_task(9)
        .with_estimates(2, 0)
        .with_complexity(Complexity::Complex);
    h.repo.seed(opus_work.clone());

    h.main_loop.run_tick().await;
    let spawned = h.runtime.spawned.lock().unwrap().clone();
    assert_eq!(spawned.len(), 1);
    assert_eq!(spawned[0].1, ModelTier::Opus);
}

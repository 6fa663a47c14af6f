//! Composite safety-stop for agent misbehavior.
//!
//! A single latched breaker observing every success/error report. Any of
//! four triggers moves it `Closed -> Tripped`; it never auto-recovers and
//! only an explicit `reset()` closes it again. While tripped, the main loop
//! skips all scheduling.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, warn};

use crate::domain::ports::{SafetyNotifier, TripAlert};

/// Configuration for the circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Per-agent consecutive error count that trips the breaker.
    pub max_consecutive_agent_errors: u32,
    /// Failure fraction over a full window that trips the breaker.
    pub error_rate_threshold: f64,
    /// Number of recent operations considered for the error rate.
    pub error_rate_window: usize,
    /// Cumulative spend in USD that trips the breaker.
    pub hard_budget_limit_usd: f64,
    /// Tokens accumulated since the last meaningful output that trip the breaker.
    pub token_limit_without_output: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_consecutive_agent_errors: 3,
            error_rate_threshold: 0.5,
            error_rate_window: 10,
            hard_budget_limit_usd: 100.0,
            token_limit_without_output: 100_000,
        }
    }
}

/// Why the breaker tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TripReason {
    ConsecutiveAgentErrors,
    GlobalErrorRate,
    BudgetExceeded,
    TokenLimitExceeded,
    Manual,
}

impl TripReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConsecutiveAgentErrors => "consecutive_agent_errors",
            Self::GlobalErrorRate => "global_error_rate",
            Self::BudgetExceeded => "budget_exceeded",
            Self::TokenLimitExceeded => "token_limit_exceeded",
            Self::Manual => "manual",
        }
    }
}

/// Usage attached to a success report.
#[derive(Debug, Clone, Copy)]
pub struct SuccessReport {
    pub tokens_used: u64,
    pub cost_usd: f64,
    pub has_meaningful_output: bool,
}

impl Default for SuccessReport {
    fn default() -> Self {
        Self {
            tokens_used: 0,
            cost_usd: 0.0,
            has_meaningful_output: true,
        }
    }
}

/// Usage attached to an error report.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorReport {
    pub tokens_used: u64,
    pub cost_usd: f64,
}

/// Point-in-time snapshot for operators.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub tripped: bool,
    pub trip_reason: Option<TripReason>,
    pub trip_message: Option<String>,
    pub tripped_at: Option<DateTime<Utc>>,
    pub error_rate: f64,
    pub window_fill: usize,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    pub meaningful_outputs: u64,
    pub tokens_since_meaningful_output: u64,
    pub agent_error_counts: HashMap<String, u32>,
}

#[derive(Debug)]
enum BreakerState {
    Closed,
    Tripped {
        reason: TripReason,
        message: String,
        at: DateTime<Utc>,
    },
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    agent_errors: HashMap<String, u32>,
    /// true = success, false = failure; bounded by the window size.
    recent: VecDeque<bool>,
    total_tokens: u64,
    total_cost_usd: f64,
    meaningful_outputs: u64,
    tokens_since_meaningful: u64,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            agent_errors: HashMap::new(),
            recent: VecDeque::new(),
            total_tokens: 0,
            total_cost_usd: 0.0,
            meaningful_outputs: 0,
            tokens_since_meaningful: 0,
        }
    }

    fn push_outcome(&mut self, success: bool, window: usize) {
        if self.recent.len() == window && window > 0 {
            self.recent.pop_front();
        }
        if window > 0 {
            self.recent.push_back(success);
        }
    }

    fn failure_fraction(&self) -> f64 {
        if self.recent.is_empty() {
            return 0.0;
        }
        let failures = self.recent.iter().filter(|s| !**s).count();
        failures as f64 / self.recent.len() as f64
    }
}

/// Latched safety-stop state machine.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    notifier: Option<Arc<dyn SafetyNotifier>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner::new()),
            notifier: None,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }

    /// Attach the capability invoked on trip (pause-all + operator alert).
    pub fn with_notifier(mut self, notifier: Arc<dyn SafetyNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Record a successful agent operation.
    ///
    /// No-ops with a warning if the breaker is already tripped.
    pub fn record_success(&self, agent_id: &str, report: SuccessReport) {
        let pending_trip = {
            let mut inner = self.inner.lock().expect("breaker lock poisoned");
            if matches!(inner.state, BreakerState::Tripped { .. }) {
                warn!(agent_id, "Circuit breaker tripped; ignoring success report");
                return;
            }

            inner.agent_errors.insert(agent_id.to_string(), 0);
            inner.total_tokens += report.tokens_used;
            inner.total_cost_usd += report.cost_usd;
            inner.push_outcome(true, self.config.error_rate_window);
            if report.has_meaningful_output {
                inner.meaningful_outputs += 1;
                inner.tokens_since_meaningful = 0;
            } else {
                inner.tokens_since_meaningful += report.tokens_used;
            }

            self.evaluate_triggers(&mut inner, agent_id)
        };
        self.fire_notifications(pending_trip);
    }

    /// Record a failed agent operation, then evaluate all trip triggers.
    pub fn record_error(&self, agent_id: &str, error: &str, report: ErrorReport) {
        let pending_trip = {
            let mut inner = self.inner.lock().expect("breaker lock poisoned");
            if matches!(inner.state, BreakerState::Tripped { .. }) {
                warn!(agent_id, error, "Circuit breaker tripped; ignoring error report");
                return;
            }

            *inner.agent_errors.entry(agent_id.to_string()).or_insert(0) += 1;
            inner.total_tokens += report.tokens_used;
            inner.total_cost_usd += report.cost_usd;
            inner.tokens_since_meaningful += report.tokens_used;
            inner.push_outcome(false, self.config.error_rate_window);

            self.evaluate_triggers(&mut inner, agent_id)
        };
        self.fire_notifications(pending_trip);
    }

    /// Manually trip the breaker.
    pub fn trip(&self, reason: TripReason, message: impl Into<String>, agent_id: Option<&str>) {
        let message = message.into();
        let alert = {
            let mut inner = self.inner.lock().expect("breaker lock poisoned");
            Self::latch(&mut inner, reason, &message, agent_id)
        };
        self.fire_notifications(alert);
    }

    /// Return the breaker to its initial closed state, zeroing all counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        *inner = BreakerInner::new();
        warn!("Circuit breaker reset by operator");
    }

    pub fn is_tripped(&self) -> bool {
        matches!(
            self.inner.lock().expect("breaker lock poisoned").state,
            BreakerState::Tripped { .. }
        )
    }

    pub fn trip_reason(&self) -> Option<TripReason> {
        match self.inner.lock().expect("breaker lock poisoned").state {
            BreakerState::Tripped { reason, .. } => Some(reason),
            BreakerState::Closed => None,
        }
    }

    /// Failure fraction over the current window (0.0 when empty).
    pub fn error_rate(&self) -> f64 {
        self.inner
            .lock()
            .expect("breaker lock poisoned")
            .failure_fraction()
    }

    pub fn agent_error_count(&self, agent_id: &str) -> u32 {
        self.inner
            .lock()
            .expect("breaker lock poisoned")
            .agent_errors
            .get(agent_id)
            .copied()
            .unwrap_or(0)
    }

    /// Consistent full snapshot.
    pub fn status(&self) -> BreakerStatus {
        let inner = self.inner.lock().expect("breaker lock poisoned");
        let (tripped, reason, message, at) = match &inner.state {
            BreakerState::Closed => (false, None, None, None),
            BreakerState::Tripped {
                reason,
                message,
                at,
            } => (true, Some(*reason), Some(message.clone()), Some(*at)),
        };
        BreakerStatus {
            tripped,
            trip_reason: reason,
            trip_message: message,
            tripped_at: at,
            error_rate: inner.failure_fraction(),
            window_fill: inner.recent.len(),
            total_tokens: inner.total_tokens,
            total_cost_usd: inner.total_cost_usd,
            meaningful_outputs: inner.meaningful_outputs,
            tokens_since_meaningful_output: inner.tokens_since_meaningful,
            agent_error_counts: inner.agent_errors.clone(),
        }
    }

    /// Evaluate the four triggers in order. Must be called with the lock held;
    /// returns the alert to deliver once the lock is released.
    fn evaluate_triggers(&self, inner: &mut BreakerInner, agent_id: &str) -> Option<TripAlert> {
        // 1. Consecutive errors by any single agent.
        if let Some((worst_agent, count)) = inner
            .agent_errors
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(id, count)| (id.clone(), *count))
        {
            if count >= self.config.max_consecutive_agent_errors {
                return Self::latch(
                    inner,
                    TripReason::ConsecutiveAgentErrors,
                    &format!("agent {worst_agent} failed {count} consecutive times"),
                    Some(&worst_agent),
                );
            }
        }

        // 2. Global error rate over a full window.
        if inner.recent.len() == self.config.error_rate_window
            && inner.failure_fraction() > self.config.error_rate_threshold
        {
            return Self::latch(
                inner,
                TripReason::GlobalErrorRate,
                &format!(
                    "error rate {:.0}% over the last {} operations",
                    inner.failure_fraction() * 100.0,
                    self.config.error_rate_window
                ),
                Some(agent_id),
            );
        }

        // 3. Hard budget ceiling.
        if inner.total_cost_usd >= self.config.hard_budget_limit_usd {
            return Self::latch(
                inner,
                TripReason::BudgetExceeded,
                &format!(
                    "spend ${:.2} reached the ${:.2} hard limit",
                    inner.total_cost_usd, self.config.hard_budget_limit_usd
                ),
                None,
            );
        }

        // 4. Token burn without meaningful output.
        if inner.tokens_since_meaningful >= self.config.token_limit_without_output {
            return Self::latch(
                inner,
                TripReason::TokenLimitExceeded,
                &format!(
                    "{} tokens since the last meaningful output",
                    inner.tokens_since_meaningful
                ),
                None,
            );
        }

        None
    }

    fn latch(
        inner: &mut BreakerInner,
        reason: TripReason,
        message: &str,
        agent_id: Option<&str>,
    ) -> Option<TripAlert> {
        if matches!(inner.state, BreakerState::Tripped { .. }) {
            warn!(reason = reason.as_str(), "Circuit breaker already tripped");
            return None;
        }
        error!(
            reason = reason.as_str(),
            message, "Circuit breaker tripped; all scheduling paused"
        );
        inner.state = BreakerState::Tripped {
            reason,
            message: message.to_string(),
            at: Utc::now(),
        };
        Some(TripAlert {
            reason: reason.as_str().to_string(),
            message: message.to_string(),
            triggering_agent_id: agent_id.map(str::to_string),
        })
    }

    /// Deliver trip notifications fire-and-forget. Failures (including a
    /// panicking notifier) are confined to the spawned task.
    fn fire_notifications(&self, alert: Option<TripAlert>) {
        let Some(alert) = alert else { return };
        let Some(notifier) = self.notifier.clone() else {
            return;
        };
        tokio::spawn(async move {
            notifier.on_trip(alert.clone()).await;
            notifier
                .alert(format!("Circuit breaker tripped: {}", alert.message))
                .await;
        });
    }
}

//! Database health monitoring and degraded-mode detection.
//!
//! Watches the outcome of every database call the main loop makes. After
//! `max_consecutive_failures` failures the monitor flips to degraded and
//! scheduling pauses; a later successful call or recovery probe flips it
//! back. Startup runs a blocking probe gate under exponential backoff so a
//! briefly-unavailable database does not kill the process.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use serde::Serialize;
use tracing::{info, warn};

use crate::domain::errors::{DatabaseError, OrchestratorError};
use crate::domain::models::DbRetryConfig;
use crate::domain::ports::TaskRepository;

/// Health transitions reported to the injected callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthEvent {
    /// Startup probe succeeded.
    Healthy,
    /// Consecutive failures crossed the threshold.
    Degraded,
    /// A success or recovery probe ended a degraded period.
    Recovered,
}

impl HealthEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "database:healthy",
            Self::Degraded => "database:degraded",
            Self::Recovered => "database:recovered",
        }
    }
}

/// Observer callback for health transitions.
pub type HealthEventFn = Arc<dyn Fn(HealthEvent) + Send + Sync>;

/// Snapshot of the monitor's scalars.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStats {
    pub healthy: bool,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_latency_ms: Option<u64>,
}

#[derive(Debug, Default)]
struct HealthInner {
    degraded: bool,
    consecutive_failures: u32,
    last_error: Option<String>,
    last_latency_ms: Option<u64>,
}

/// Degraded-mode detector for the persistence boundary.
pub struct DatabaseHealthMonitor {
    repo: Arc<dyn TaskRepository>,
    max_consecutive_failures: u32,
    inner: Mutex<HealthInner>,
    on_event: Option<HealthEventFn>,
}

impl DatabaseHealthMonitor {
    pub fn new(repo: Arc<dyn TaskRepository>, max_consecutive_failures: u32) -> Self {
        Self {
            repo,
            max_consecutive_failures,
            inner: Mutex::new(HealthInner::default()),
            on_event: None,
        }
    }

    /// Attach a transition observer.
    pub fn with_event_fn(mut self, on_event: HealthEventFn) -> Self {
        self.on_event = Some(on_event);
        self
    }

    fn emit(&self, event: HealthEvent) {
        if let Some(cb) = &self.on_event {
            cb(event);
        }
    }

    /// One health probe; returns the observed latency.
    async fn probe(&self) -> Result<u64, DatabaseError> {
        let started = Instant::now();
        self.repo.health_check().await?;
        Ok(u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX))
    }

    /// Startup gate: probe under exponential backoff with jitter.
    ///
    /// `on_retry(attempt, delay, last_error)` fires before each sleep.
    /// Returns on the first healthy probe; fails with the last error after
    /// `max_retries` unsuccessful probes (a hard ceiling).
    pub async fn validate_on_startup<F>(
        &self,
        retry: &DbRetryConfig,
        mut on_retry: F,
    ) -> Result<(), OrchestratorError>
    where
        F: FnMut(u32, Duration, &str) + Send,
    {
        let mut backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(retry.initial_delay_ms),
            max_interval: Duration::from_millis(retry.max_delay_ms),
            multiplier: retry.backoff_multiplier,
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        };
        backoff.reset();

        let mut attempt: u32 = 0;
        loop {
            match self.probe().await {
                Ok(latency_ms) => {
                    {
                        let mut inner = self.inner.lock().expect("health lock poisoned");
                        inner.degraded = false;
                        inner.consecutive_failures = 0;
                        inner.last_latency_ms = Some(latency_ms);
                        inner.last_error = None;
                    }
                    info!(latency_ms, "Database healthy at startup");
                    self.emit(HealthEvent::Healthy);
                    return Ok(());
                }
                Err(e) => {
                    attempt += 1;
                    let message = e.to_string();
                    {
                        let mut inner = self.inner.lock().expect("health lock poisoned");
                        inner.last_error = Some(message.clone());
                    }
                    if attempt >= retry.max_retries {
                        return Err(OrchestratorError::Database(DatabaseError::ConnectionPool(
                            format!(
                                "database unreachable after {} startup probes: {message}",
                                retry.max_retries
                            ),
                        )));
                    }
                    let delay = backoff
                        .next_backoff()
                        .unwrap_or(Duration::from_millis(retry.max_delay_ms));
                    warn!(attempt, delay_ms = delay.as_millis() as u64, error = %message, "Database startup probe failed; retrying");
                    on_retry(attempt, delay, &message);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Report a failed database call from the tick path.
    pub fn on_db_failure(&self, error: &DatabaseError) {
        let transition = {
            let mut inner = self.inner.lock().expect("health lock poisoned");
            inner.consecutive_failures += 1;
            inner.last_error = Some(error.to_string());
            if !inner.degraded && inner.consecutive_failures >= self.max_consecutive_failures {
                inner.degraded = true;
                true
            } else {
                false
            }
        };
        if transition {
            warn!(error = %error, "Database degraded; scheduling paused until recovery");
            self.emit(HealthEvent::Degraded);
        }
    }

    /// Report a successful database call from the tick path.
    pub fn on_db_success(&self) {
        let recovered = {
            let mut inner = self.inner.lock().expect("health lock poisoned");
            inner.consecutive_failures = 0;
            std::mem::take(&mut inner.degraded)
        };
        if recovered {
            info!("Database recovered");
            self.emit(HealthEvent::Recovered);
        }
    }

    /// Single recovery probe while degraded. Returns the post-probe health.
    pub async fn attempt_recovery(&self) -> bool {
        if !self.is_degraded() {
            return true;
        }
        match self.probe().await {
            Ok(latency_ms) => {
                {
                    let mut inner = self.inner.lock().expect("health lock poisoned");
                    inner.degraded = false;
                    inner.consecutive_failures = 0;
                    inner.last_latency_ms = Some(latency_ms);
                    inner.last_error = None;
                }
                info!(latency_ms, "Database recovered");
                self.emit(HealthEvent::Recovered);
                true
            }
            Err(e) => {
                let mut inner = self.inner.lock().expect("health lock poisoned");
                inner.last_error = Some(e.to_string());
                false
            }
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.inner.lock().expect("health lock poisoned").degraded
    }

    pub fn stats(&self) -> HealthStats {
        let inner = self.inner.lock().expect("health lock poisoned");
        HealthStats {
            healthy: !inner.degraded,
            consecutive_failures: inner.consecutive_failures,
            last_error: inner.last_error.clone(),
            last_latency_ms: inner.last_latency_ms,
        }
    }
}

//! Notification adapters.
//!
//! The chat integration proper lives behind the `Notifier` port in a
//! separate deployment component; these adapters route notification
//! batches and safety alerts into the structured log so a bare install
//! still surfaces them.

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::domain::errors::OrchestratorError;
use crate::domain::models::{Notification, NotificationPriority};
use crate::domain::ports::{Notifier, SafetyNotifier, TripAlert};

/// Writes each notification batch to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, batch: Vec<Notification>) -> Result<(), OrchestratorError> {
        for item in batch {
            match item.priority {
                NotificationPriority::High => warn!(
                    kind = ?item.kind,
                    agent_id = %item.agent_id,
                    task_id = %item.task_id,
                    project = %item.project_name,
                    message = %item.message,
                    "Notification"
                ),
                NotificationPriority::Normal => info!(
                    kind = ?item.kind,
                    agent_id = %item.agent_id,
                    task_id = %item.task_id,
                    project = %item.project_name,
                    message = %item.message,
                    "Notification"
                ),
            }
        }
        Ok(())
    }
}

/// Logs circuit breaker trips and alerts.
#[derive(Debug, Default)]
pub struct LogSafetyNotifier;

#[async_trait]
impl SafetyNotifier for LogSafetyNotifier {
    async fn on_trip(&self, alert: TripAlert) {
        error!(
            reason = %alert.reason,
            agent_id = alert.triggering_agent_id.as_deref().unwrap_or("-"),
            message = %alert.message,
            "CIRCUIT BREAKER TRIPPED"
        );
    }

    async fn alert(&self, message: String) {
        error!(message = %message, "Operator alert");
    }
}

//! Notification ports.

use async_trait::async_trait;

use crate::domain::errors::OrchestratorError;
use crate::domain::models::Notification;

/// Outbound notification channel (chat integration lives behind this).
///
/// The main loop sends at most one batch per tick.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, batch: Vec<Notification>) -> Result<(), OrchestratorError>;
}

/// Details of a circuit breaker trip, handed to the safety notifier.
#[derive(Debug, Clone)]
pub struct TripAlert {
    pub reason: String,
    pub message: String,
    pub triggering_agent_id: Option<String>,
}

/// Capability invoked when the circuit breaker trips.
///
/// Both methods are fire-and-forget from the breaker's point of view:
/// failures are logged, never propagated.
#[async_trait]
pub trait SafetyNotifier: Send + Sync {
    /// Expected to pause all running agents.
    async fn on_trip(&self, alert: TripAlert);

    /// Out-of-band operator alert.
    async fn alert(&self, message: String);
}

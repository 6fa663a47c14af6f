//! Domain errors for the Foreman orchestrator.
//!
//! Errors are tagged values, never control flow: capacity-full and
//! empty-queue are return statuses on the relevant operations, not errors.

use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the persistence layer.
///
/// Every variant carries the underlying message so repository callers can
/// log it; the `DatabaseHealthMonitor` consumes these to drive the
/// healthy/degraded transition.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    ConnectionPool(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Row not found: {entity} {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DatabaseError::Query("row not found".to_string()),
            other => DatabaseError::Query(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for DatabaseError {
    fn from(err: serde_json::Error) -> Self {
        DatabaseError::Serialization(err.to_string())
    }
}

/// Top-level error type for the orchestrator core.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Missing or invalid configuration. Fatal at startup (exit code 2).
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    /// The agent runtime rejected a spawn. Single-task failure: the task
    /// stays queued and the circuit breaker is informed.
    #[error("Agent spawn failed for task {task_id}: {message}")]
    Spawn { task_id: Uuid, message: String },

    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("Validation failed: {0}")]
    Validation(String),

    /// Typed timeout, produced by `wait_for` and shutdown paths.
    #[error("Timed out after {waited_ms}ms waiting for {what}")]
    Timeout { what: String, waited_ms: u64 },
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_error_wraps_into_orchestrator_error() {
        let err: OrchestratorError = DatabaseError::Query("no such table".to_string()).into();
        assert!(matches!(err, OrchestratorError::Database(_)));
        assert!(err.to_string().contains("no such table"));
    }

    #[test]
    fn timeout_error_reports_duration() {
        let err = OrchestratorError::Timeout {
            what: "completion event".to_string(),
            waited_ms: 250,
        };
        assert!(err.to_string().contains("250ms"));
    }
}

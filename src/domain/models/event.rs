//! Agent event model.
//!
//! Events are emitted by the external agent runtime and are the only way
//! the orchestrator learns about agent progress. They are value types,
//! immutable once dispatched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Discriminant for the kinds of events an agent can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentEventKind {
    /// The agent needs human input to proceed.
    Question,
    /// The agent finished its task.
    Completion,
    /// The agent failed.
    Error,
    /// The agent discovered it is blocked on another task.
    Blocker,
    /// The agent spawned a subagent. Informational.
    SubagentSpawn,
}

impl AgentEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Question => "question",
            Self::Completion => "completion",
            Self::Error => "error",
            Self::Blocker => "blocker",
            Self::SubagentSpawn => "subagent_spawn",
        }
    }

    pub const ALL: [AgentEventKind; 5] = [
        Self::Question,
        Self::Completion,
        Self::Error,
        Self::Blocker,
        Self::SubagentSpawn,
    ];
}

/// Kind-specific event payload fields.
///
/// Kept as one struct of optionals rather than a payload-per-kind enum so
/// dispatch filters and history queries stay uniform; the handlers for a
/// kind know which fields to expect.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventPayload {
    /// Human-readable summary or question text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Error description for `Error` events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether the error is fatal (task parks as blocked instead of requeueing).
    #[serde(default)]
    pub fatal: bool,
    #[serde(default)]
    pub tokens_used: u64,
    #[serde(default)]
    pub cost_usd: f64,
    /// Set on completions that produced user-visible progress.
    #[serde(default = "default_meaningful")]
    pub has_meaningful_output: bool,
    /// Task this agent is blocked on, for `Blocker` events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocking_task_id: Option<Uuid>,
    /// Child session id, for `SubagentSpawn` events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subagent_id: Option<String>,
}

fn default_meaningful() -> bool {
    true
}

/// An event emitted by the agent runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEvent {
    pub kind: AgentEventKind,
    /// Session id of the emitting agent.
    pub agent_id: String,
    pub task_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl AgentEvent {
    pub fn new(kind: AgentEventKind, agent_id: impl Into<String>, task_id: Uuid) -> Self {
        Self {
            kind,
            agent_id: agent_id.into(),
            task_id,
            timestamp: Utc::now(),
            payload: EventPayload::default(),
        }
    }

    pub fn with_payload(mut self, payload: EventPayload) -> Self {
        self.payload = payload;
        self
    }

    pub fn completion(
        agent_id: impl Into<String>,
        task_id: Uuid,
        tokens_used: u64,
        cost_usd: f64,
    ) -> Self {
        Self::new(AgentEventKind::Completion, agent_id, task_id).with_payload(EventPayload {
            tokens_used,
            cost_usd,
            ..EventPayload::default()
        })
    }

    pub fn error(agent_id: impl Into<String>, task_id: Uuid, error: impl Into<String>) -> Self {
        Self::new(AgentEventKind::Error, agent_id, task_id).with_payload(EventPayload {
            error: Some(error.into()),
            has_meaningful_output: false,
            ..EventPayload::default()
        })
    }

    pub fn question(agent_id: impl Into<String>, task_id: Uuid, text: impl Into<String>) -> Self {
        Self::new(AgentEventKind::Question, agent_id, task_id).with_payload(EventPayload {
            message: Some(text.into()),
            has_meaningful_output: false,
            ..EventPayload::default()
        })
    }

    pub fn blocker(agent_id: impl Into<String>, task_id: Uuid, blocking_task_id: Uuid) -> Self {
        Self::new(AgentEventKind::Blocker, agent_id, task_id).with_payload(EventPayload {
            blocking_task_id: Some(blocking_task_id),
            has_meaningful_output: false,
            ..EventPayload::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_the_kind() {
        let task_id = Uuid::new_v4();
        assert_eq!(
            AgentEvent::completion("a1", task_id, 10, 0.1).kind,
            AgentEventKind::Completion
        );
        assert_eq!(
            AgentEvent::error("a1", task_id, "boom").kind,
            AgentEventKind::Error
        );
        assert_eq!(
            AgentEvent::blocker("a1", task_id, Uuid::new_v4()).kind,
            AgentEventKind::Blocker
        );
    }

    #[test]
    fn payload_meaningful_defaults_true_for_completions() {
        let event = AgentEvent::completion("a1", Uuid::new_v4(), 100, 0.5);
        assert!(event.payload.has_meaningful_output);
        assert_eq!(event.payload.tokens_used, 100);
    }

    #[test]
    fn payload_deserializes_with_missing_fields() {
        let payload: EventPayload = serde_json::from_str("{}").unwrap();
        assert!(payload.has_meaningful_output);
        assert_eq!(payload.tokens_used, 0);
        assert!(payload.error.is_none());
    }
}

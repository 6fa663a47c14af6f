//! Agent session domain model.
//!
//! A session is one run of one agent. Its id is the canonical `agent_id`
//! carried by every event the runtime emits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The resource class an agent session consumes.
///
/// A deliberate fixed enum rather than a string: capacity accounting keys
/// on it and the scheduler's selection rule matches on it exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Opus,
    Sonnet,
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Opus => "opus",
            Self::Sonnet => "sonnet",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "opus" => Some(Self::Opus),
            "sonnet" => Some(Self::Sonnet),
            _ => None,
        }
    }

    /// All tiers, cheapest last.
    pub const ALL: [ModelTier; 2] = [ModelTier::Opus, ModelTier::Sonnet];
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of an agent session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Spawning,
    Running,
    Completing,
    Terminated,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spawning => "spawning",
            Self::Running => "running",
            Self::Completing => "completing",
            Self::Terminated => "terminated",
        }
    }

    /// While non-terminated, the session holds exactly one capacity slot.
    pub fn holds_capacity(&self) -> bool {
        !matches!(self, Self::Terminated)
    }
}

/// A running (or recently running) agent worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSession {
    /// Opaque session id; equals the `agent_id` in all events.
    pub id: String,
    pub model: ModelTier,
    pub status: SessionStatus,
    pub task_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub tokens_used: u64,
    pub cost_usd: f64,
}

impl AgentSession {
    pub fn new(id: impl Into<String>, model: ModelTier, task_id: Uuid) -> Self {
        Self {
            id: id.into(),
            model,
            status: SessionStatus::Spawning,
            task_id,
            started_at: Utc::now(),
            tokens_used: 0,
            cost_usd: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_round_trips() {
        assert_eq!(ModelTier::from_str("opus"), Some(ModelTier::Opus));
        assert_eq!(ModelTier::from_str("SONNET"), Some(ModelTier::Sonnet));
        assert_eq!(ModelTier::from_str("haiku"), None);
    }

    #[test]
    fn only_terminated_sessions_release_capacity() {
        assert!(SessionStatus::Spawning.holds_capacity());
        assert!(SessionStatus::Running.holds_capacity());
        assert!(SessionStatus::Completing.holds_capacity());
        assert!(!SessionStatus::Terminated.holds_capacity());
    }
}

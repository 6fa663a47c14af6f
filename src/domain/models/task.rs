//! Task domain model.
//!
//! Tasks are the unit of work pulled from the persisted queue. The
//! orchestrator never executes them itself; it decides when a task runs
//! and on which model tier.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a task in the scheduling pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in the queue for capacity.
    Queued,
    /// Handed to an agent session, not yet started.
    Assigned,
    /// An agent is actively working on it.
    InProgress,
    /// Work finished, awaiting review.
    Review,
    /// Done.
    Complete,
    /// Parked behind another task or a fatal error.
    Blocked,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Queued
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Assigned => "assigned",
            Self::InProgress => "in_progress",
            Self::Review => "review",
            Self::Complete => "complete",
            Self::Blocked => "blocked",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "queued" => Some(Self::Queued),
            "assigned" => Some(Self::Assigned),
            "in_progress" => Some(Self::InProgress),
            "review" => Some(Self::Review),
            "complete" | "completed" => Some(Self::Complete),
            "blocked" => Some(Self::Blocked),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete)
    }

    /// States in which the task may hold an agent assignment.
    pub fn allows_assignment(&self) -> bool {
        !matches!(self, Self::Queued | Self::Blocked)
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(&self) -> &'static [TaskStatus] {
        match self {
            Self::Queued => &[Self::Assigned, Self::Blocked],
            Self::Assigned => &[Self::InProgress, Self::Queued, Self::Blocked],
            Self::InProgress => &[Self::Review, Self::Complete, Self::Queued, Self::Blocked],
            Self::Review => &[Self::Complete, Self::Queued],
            Self::Complete => &[],
            Self::Blocked => &[Self::Queued],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

/// Where a task originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskSource {
    /// Submitted directly by a human.
    User,
    /// Proposed by a running agent.
    AgentProposal,
    /// Produced by decomposing a larger task.
    Decomposition,
}

impl Default for TaskSource {
    fn default() -> Self {
        Self::User
    }
}

impl TaskSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::AgentProposal => "agent_proposal",
            Self::Decomposition => "decomposition",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "user" => Some(Self::User),
            "agent_proposal" => Some(Self::AgentProposal),
            "decomposition" => Some(Self::Decomposition),
            _ => None,
        }
    }
}

/// Complexity estimate used by the model selection rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    Medium,
    High,
    Complex,
}

impl Default for Complexity {
    fn default() -> Self {
        Self::Medium
    }
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Complex => "complex",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "complex" => Some(Self::Complex),
            _ => None,
        }
    }

    /// Whether this estimate justifies the expensive tier.
    pub fn warrants_opus(&self) -> bool {
        matches!(self, Self::High | Self::Complex)
    }
}

/// A unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub project_id: Uuid,
    pub summary: String,
    /// Higher is scheduled sooner.
    pub priority: i64,
    pub status: TaskStatus,
    pub source: TaskSource,
    pub complexity: Complexity,
    pub tags: Vec<String>,
    pub blocked_by_task_id: Option<Uuid>,
    pub parent_task_id: Option<Uuid>,
    /// Session id of the agent currently assigned, if any.
    pub assigned_agent_id: Option<String>,
    /// Estimated sessions per tier; zero means "prefer the cheaper tier".
    pub estimated_sessions_opus: u32,
    pub estimated_sessions_sonnet: u32,
    /// Monotonic usage counters.
    pub actual_tokens_opus: u64,
    pub actual_tokens_sonnet: u64,
    pub actual_sessions_opus: u32,
    pub actual_sessions_sonnet: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(project_id: Uuid, summary: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            project_id,
            summary: summary.into(),
            priority: 0,
            status: TaskStatus::Queued,
            source: TaskSource::default(),
            complexity: Complexity::default(),
            tags: Vec::new(),
            blocked_by_task_id: None,
            parent_task_id: None,
            assigned_agent_id: None,
            estimated_sessions_opus: 0,
            estimated_sessions_sonnet: 0,
            actual_tokens_opus: 0,
            actual_tokens_sonnet: 0,
            actual_sessions_opus: 0,
            actual_sessions_sonnet: 0,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_complexity(mut self, complexity: Complexity) -> Self {
        self.complexity = complexity;
        self
    }

    pub fn with_estimates(mut self, opus: u32, sonnet: u32) -> Self {
        self.estimated_sessions_opus = opus;
        self.estimated_sessions_sonnet = sonnet;
        self
    }

    /// Summary length cap; anything longer is rejected at submission.
    pub const MAX_SUMMARY_LEN: usize = 200;

    pub fn validate_summary(&self) -> Result<(), String> {
        if self.summary.trim().is_empty() {
            return Err("task summary cannot be empty".to_string());
        }
        if self.summary.len() > Self::MAX_SUMMARY_LEN {
            return Err(format!(
                "task summary exceeds {} characters",
                Self::MAX_SUMMARY_LEN
            ));
        }
        Ok(())
    }

    /// An agent assignment implies a non-queued, non-blocked status.
    pub fn assignment_consistent(&self) -> bool {
        self.assigned_agent_id.is_none() || self.status.allows_assignment()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            TaskStatus::Queued,
            TaskStatus::Assigned,
            TaskStatus::InProgress,
            TaskStatus::Review,
            TaskStatus::Complete,
            TaskStatus::Blocked,
        ] {
            assert_eq!(TaskStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::from_str("bogus"), None);
    }

    #[test]
    fn queued_cannot_jump_to_complete() {
        assert!(!TaskStatus::Queued.can_transition_to(TaskStatus::Complete));
        assert!(TaskStatus::Queued.can_transition_to(TaskStatus::Assigned));
        assert!(TaskStatus::InProgress.can_transition_to(TaskStatus::Complete));
    }

    #[test]
    fn complete_is_terminal() {
        assert!(TaskStatus::Complete.is_terminal());
        assert!(TaskStatus::Complete.valid_transitions().is_empty());
    }

    #[test]
    fn assignment_invariant() {
        let mut task = Task::new(Uuid::new_v4(), "build the thing");
        assert!(task.assignment_consistent());

        task.assigned_agent_id = Some("sess-1".to_string());
        assert!(!task.assignment_consistent(), "queued + assigned is invalid");

        task.status = TaskStatus::InProgress;
        assert!(task.assignment_consistent());

        task.status = TaskStatus::Blocked;
        assert!(!task.assignment_consistent());
    }

    #[test]
    fn complexity_gates_opus() {
        assert!(!Complexity::Low.warrants_opus());
        assert!(!Complexity::Medium.warrants_opus());
        assert!(Complexity::High.warrants_opus());
        assert!(Complexity::Complex.warrants_opus());
    }

    #[test]
    fn summary_validation() {
        let mut task = Task::new(Uuid::new_v4(), "ok");
        assert!(task.validate_summary().is_ok());

        task.summary = String::new();
        assert!(task.validate_summary().is_err());

        task.summary = "a".repeat(Task::MAX_SUMMARY_LEN + 1);
        assert!(task.validate_summary().is_err());
    }
}

//! Active-agent state tracking and best-effort persistence.
//!
//! The state manager owns the in-memory set of running agents plus the
//! versioned JSON snapshot written on shutdown and read back on startup.
//! Persistence is best-effort: a missing file, unknown fields, or a version
//! mismatch never fail startup.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::models::{ModelTier, SessionStatus};

/// One running agent, as tracked by the main loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveAgent {
    pub session_id: String,
    pub task_id: Uuid,
    pub model: ModelTier,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
}

const STATE_VERSION: u32 = 1;

/// On-disk snapshot format. Unknown fields are ignored on load.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedState {
    version: u32,
    saved_at: DateTime<Utc>,
    active_agents: Vec<ActiveAgent>,
}

#[derive(Debug, Default)]
struct StateInner {
    agents: HashMap<String, ActiveAgent>,
    /// Last question text per agent, for the status surface.
    questions: HashMap<String, String>,
}

/// Owner of the active-agents set.
#[derive(Debug, Default)]
pub struct StateManager {
    inner: Mutex<StateInner>,
}

impl StateManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, agent: ActiveAgent) {
        let mut inner = self.inner.lock().expect("state lock poisoned");
        inner.agents.insert(agent.session_id.clone(), agent);
    }

    pub fn remove(&self, session_id: &str) -> Option<ActiveAgent> {
        let mut inner = self.inner.lock().expect("state lock poisoned");
        inner.questions.remove(session_id);
        inner.agents.remove(session_id)
    }

    pub fn get(&self, session_id: &str) -> Option<ActiveAgent> {
        self.inner
            .lock()
            .expect("state lock poisoned")
            .agents
            .get(session_id)
            .cloned()
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock().expect("state lock poisoned").agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active_count() == 0
    }

    pub fn snapshot(&self) -> Vec<ActiveAgent> {
        self.inner
            .lock()
            .expect("state lock poisoned")
            .agents
            .values()
            .cloned()
            .collect()
    }

    /// Retain only agents whose session id passes the predicate.
    pub fn retain<F: Fn(&str) -> bool>(&self, keep: F) {
        let mut inner = self.inner.lock().expect("state lock poisoned");
        inner.agents.retain(|id, _| keep(id));
        inner.questions.retain(|id, _| keep(id));
    }

    pub fn record_question(&self, session_id: &str, text: impl Into<String>) {
        let mut inner = self.inner.lock().expect("state lock poisoned");
        inner.questions.insert(session_id.to_string(), text.into());
    }

    pub fn last_question(&self, session_id: &str) -> Option<String> {
        self.inner
            .lock()
            .expect("state lock poisoned")
            .questions
            .get(session_id)
            .cloned()
    }

    /// Write the active-agents snapshot.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let state = PersistedState {
            version: STATE_VERSION,
            saved_at: Utc::now(),
            active_agents: self.snapshot(),
        };
        let json = serde_json::to_string_pretty(&state).context("failed to serialize state")?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write state file {}", path.display()))?;
        info!(path = %path.display(), agents = state.active_agents.len(), "Persisted orchestrator state");
        Ok(())
    }

    /// Read a previous snapshot into the manager.
    ///
    /// Missing file means a fresh start. A schema version mismatch or a
    /// parse failure aborts the load with a warning and leaves the manager
    /// empty; state is best-effort.
    pub fn load(&self, path: impl AsRef<Path>) -> usize {
        let path = path.as_ref();
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not read state file; starting empty");
                return 0;
            }
        };

        let state: PersistedState = match serde_json::from_str(&raw) {
            Ok(state) => state,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not parse state file; starting empty");
                return 0;
            }
        };

        if state.version != STATE_VERSION {
            warn!(
                found = state.version,
                expected = STATE_VERSION,
                "State file schema version mismatch; starting empty"
            );
            return 0;
        }

        let count = state.active_agents.len();
        let mut inner = self.inner.lock().expect("state lock poisoned");
        for agent in state.active_agents {
            inner.agents.insert(agent.session_id.clone(), agent);
        }
        info!(path = %path.display(), agents = count, "Restored orchestrator state");
        count
    }
}

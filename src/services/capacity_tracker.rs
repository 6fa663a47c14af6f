//! Per-tier concurrent-session accounting.
//!
//! The tracker is the authoritative answer to "can another agent start on
//! this tier right now". State is a fixed-size record keyed by the tier
//! enum, one active-session set per tier, all mutations serialized under a
//! single mutex. Critical sections are O(1); the lock is never held across
//! an await.

use std::collections::HashSet;
use std::sync::Mutex;

use serde::Serialize;
use tracing::warn;

use crate::domain::models::ModelTier;

#[derive(Debug, Default)]
struct TierState {
    limit: usize,
    active: HashSet<String>,
}

impl TierState {
    fn with_limit(limit: usize) -> Self {
        Self {
            limit,
            active: HashSet::new(),
        }
    }
}

#[derive(Debug, Default)]
struct CapacityState {
    opus: TierState,
    sonnet: TierState,
}

impl CapacityState {
    fn tier(&self, tier: ModelTier) -> &TierState {
        match tier {
            ModelTier::Opus => &self.opus,
            ModelTier::Sonnet => &self.sonnet,
        }
    }

    fn tier_mut(&mut self, tier: ModelTier) -> &mut TierState {
        match tier {
            ModelTier::Opus => &mut self.opus,
            ModelTier::Sonnet => &mut self.sonnet,
        }
    }
}

/// Usage statistics for one tier.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TierStats {
    pub current: usize,
    pub limit: usize,
    pub available: usize,
    pub utilization: f64,
}

/// Usage statistics for all tiers.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CapacityStats {
    pub opus: TierStats,
    pub sonnet: TierStats,
}

impl CapacityStats {
    pub fn tier(&self, tier: ModelTier) -> &TierStats {
        match tier {
            ModelTier::Opus => &self.opus,
            ModelTier::Sonnet => &self.sonnet,
        }
    }
}

/// Authoritative per-tier concurrency limiter.
#[derive(Debug)]
pub struct CapacityTracker {
    state: Mutex<CapacityState>,
}

impl CapacityTracker {
    pub fn new(opus_limit: usize, sonnet_limit: usize) -> Self {
        Self {
            state: Mutex::new(CapacityState {
                opus: TierState::with_limit(opus_limit),
                sonnet: TierState::with_limit(sonnet_limit),
            }),
        }
    }

    /// Reserve a slot for a session.
    ///
    /// Returns false without side effect when the tier is at its limit.
    /// Re-reserving an id already present succeeds as a no-op.
    pub fn reserve(&self, tier: ModelTier, session_id: &str) -> bool {
        let mut state = self.state.lock().expect("capacity lock poisoned");
        let tier_state = state.tier_mut(tier);
        if tier_state.active.contains(session_id) {
            return true;
        }
        if tier_state.active.len() >= tier_state.limit {
            return false;
        }
        tier_state.active.insert(session_id.to_string());
        true
    }

    /// Release a session's slot. Idempotent on absent ids.
    pub fn release(&self, tier: ModelTier, session_id: &str) {
        let mut state = self.state.lock().expect("capacity lock poisoned");
        state.tier_mut(tier).active.remove(session_id);
    }

    /// Atomically rewrite a reservation from a provisional id to the real
    /// session id. No-op if the provisional id is not tracked.
    pub fn rename_session(&self, tier: ModelTier, from: &str, to: &str) {
        let mut state = self.state.lock().expect("capacity lock poisoned");
        let tier_state = state.tier_mut(tier);
        if tier_state.active.remove(from) {
            tier_state.active.insert(to.to_string());
        }
    }

    pub fn has_capacity(&self, tier: ModelTier) -> bool {
        let state = self.state.lock().expect("capacity lock poisoned");
        let tier_state = state.tier(tier);
        tier_state.active.len() < tier_state.limit
    }

    pub fn current_session_count(&self, tier: ModelTier) -> usize {
        self.state
            .lock()
            .expect("capacity lock poisoned")
            .tier(tier)
            .active
            .len()
    }

    pub fn tracked_sessions(&self, tier: ModelTier) -> HashSet<String> {
        self.state
            .lock()
            .expect("capacity lock poisoned")
            .tier(tier)
            .active
            .clone()
    }

    /// Consistent snapshot across both tiers.
    pub fn stats(&self) -> CapacityStats {
        let state = self.state.lock().expect("capacity lock poisoned");
        CapacityStats {
            opus: tier_stats(&state.opus),
            sonnet: tier_stats(&state.sonnet),
        }
    }

    /// Reconcile with the runtime's view of live sessions.
    ///
    /// Tracked ids with no live counterpart are dropped; live sessions the
    /// tracker never saw are logged but never reserved on their behalf.
    pub fn sync_with_runtime(&self, live: &[(ModelTier, String)]) {
        let mut state = self.state.lock().expect("capacity lock poisoned");
        for tier in ModelTier::ALL {
            let live_ids: HashSet<&str> = live
                .iter()
                .filter(|(t, _)| *t == tier)
                .map(|(_, id)| id.as_str())
                .collect();

            let tier_state = state.tier_mut(tier);
            let stale: Vec<String> = tier_state
                .active
                .iter()
                .filter(|id| !live_ids.contains(id.as_str()))
                .cloned()
                .collect();
            for id in stale {
                warn!(tier = %tier, session_id = %id, "Dropping tracked session not reported live by the runtime");
                tier_state.active.remove(&id);
            }

            for id in live_ids {
                if !tier_state.active.contains(id) {
                    warn!(tier = %tier, session_id = %id, "Runtime reports live session the tracker never reserved");
                }
            }
        }
    }
}

fn tier_stats(tier: &TierState) -> TierStats {
    let current = tier.active.len();
    let available = tier.limit.saturating_sub(current);
    let utilization = if tier.limit == 0 {
        0.0
    } else {
        current as f64 / tier.limit as f64
    };
    TierStats {
        current,
        limit: tier.limit,
        available,
        utilization,
    }
}

//! Notification batch items and the quiet-hours window.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Question,
    Completion,
    Blocker,
}

/// Delivery priority. High bypasses quiet hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Normal,
    High,
}

/// One item in a per-tick notification batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub agent_id: String,
    pub task_id: Uuid,
    pub project_name: String,
    pub message: String,
    pub priority: NotificationPriority,
}

/// Daily window during which normal-priority notifications are suppressed.
///
/// The window may wrap midnight (e.g. 22:00-07:00).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuietHoursWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl QuietHoursWindow {
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start <= self.end {
            time >= self.start && time < self.end
        } else {
            time >= self.start || time < self.end
        }
    }

    /// Whether a notification should be delivered at `time`.
    pub fn allows(&self, priority: NotificationPriority, time: NaiveTime) -> bool {
        priority == NotificationPriority::High || !self.contains(time)
    }

    pub fn from_hours(start_hour: u32, end_hour: u32) -> Option<Self> {
        Some(Self {
            start: NaiveTime::from_hms_opt(start_hour.min(23), 0, 0)?,
            end: NaiveTime::from_hms_opt(end_hour.min(23), 0, 0)?,
        })
    }
}

/// Drop normal-priority items that fall inside the quiet-hours window.
pub fn filter_for_quiet_hours(
    batch: Vec<Notification>,
    window: Option<QuietHoursWindow>,
    now: NaiveTime,
) -> Vec<Notification> {
    match window {
        None => batch,
        Some(w) => batch
            .into_iter()
            .filter(|n| w.allows(n.priority, now))
            .collect(),
    }
}

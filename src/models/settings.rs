// src/models/settings.rs

//! Per-user notification preferences.

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Lead times used when a user has never touched their settings.
pub const DEFAULT_DAYS_BEFORE: [u32; 2] = [1, 3];

/// Notification preferences, one row per user, created lazily.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSettings {
    pub user_id: i64,
    pub enable_deadline_notifications: bool,
    pub enable_news_notifications: bool,
    /// Ascending, without duplicates
    pub deadline_days_before: Vec<u32>,
}

impl NotificationSettings {
    pub fn defaults_for(user_id: i64) -> Self {
        Self {
            user_id,
            enable_deadline_notifications: true,
            enable_news_notifications: true,
            deadline_days_before: DEFAULT_DAYS_BEFORE.to_vec(),
        }
    }

    /// Replace the lead times, keeping them ordered and unique.
    pub fn set_days_before(&mut self, days: impl IntoIterator<Item = u32>) {
        let mut days: Vec<u32> = days.into_iter().filter(|d| *d > 0).collect();
        days.sort_unstable();
        days.dedup();
        self.deadline_days_before = days;
    }

    /// Reject lead times the deadline cycle can never reach.
    ///
    /// The cycle only looks `max_lead_days` ahead, so anything further out
    /// would be stored and silently never reminded.
    pub fn check_days_before(&self, max_lead_days: u32) -> Result<()> {
        let unreachable: Vec<u32> = self
            .deadline_days_before
            .iter()
            .copied()
            .filter(|d| *d > max_lead_days)
            .collect();
        if unreachable.is_empty() {
            Ok(())
        } else {
            Err(AppError::validation(format!(
                "Reminder lead times {:?} exceed the {}-day horizon",
                unreachable, max_lead_days
            )))
        }
    }

    /// Whether a deadline `days_until` away should produce a reminder.
    pub fn wants_deadline_reminder(&self, days_until: u32) -> bool {
        self.enable_deadline_notifications && self.deadline_days_before.contains(&days_until)
    }
}

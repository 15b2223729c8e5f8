//! Notification content and delivery contract
//!
//! The engine decides what to say; delivering it is the dispatcher's job.

use chrono::{NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Mutex;
use tracing::{info, warn};

use crate::achievements::UnlockEvent;
use crate::preferences::NotificationSettings;
use crate::streak::FreezeOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    AchievementUnlocked,
    SessionReminder,
    StreakFrozen,
    FreezeEarned,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
}

pub trait NotificationDispatcher: Send + Sync {
    fn dispatch(&self, notification: &Notification);
}

/// Writes notifications to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDispatcher;

impl NotificationDispatcher for TracingDispatcher {
    fn dispatch(&self, notification: &Notification) {
        info!(kind = ?notification.kind, title = %notification.title, "{}", notification.body);
    }
}

/// Keeps every dispatched notification, for tests
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl NotificationDispatcher for RecordingDispatcher {
    fn dispatch(&self, notification: &Notification) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(notification.clone());
        }
    }
}

/// Toasts for newly unlocked achievements
pub fn unlock_toasts(events: &[UnlockEvent], settings: &NotificationSettings) -> Vec<Notification> {
    if !settings.achievement_toasts {
        return Vec::new();
    }

    events
        .iter()
        .map(|e| Notification {
            kind: NotificationKind::AchievementUnlocked,
            title: format!("Achievement unlocked: {}", e.name),
            body: format!("+{} XP", e.xp),
        })
        .collect()
}

/// Messages for freeze consumption or replenishment
pub fn freeze_notices(outcome: &FreezeOutcome, freezes_left: u32) -> Vec<Notification> {
    let mut notices = Vec::new();
    if outcome.consumed {
        notices.push(Notification {
            kind: NotificationKind::StreakFrozen,
            title: "Streak saved".to_string(),
            body: format!(
                "A streak freeze covered yesterday. {} freeze(s) left.",
                freezes_left
            ),
        });
    }
    if outcome.replenished {
        notices.push(Notification {
            kind: NotificationKind::FreezeEarned,
            title: "Streak freeze earned".to_string(),
            body: format!("{} days in a row earned you a freeze.", outcome.display_streak),
        });
    }
    notices
}

/// A scheduled session whose time has passed without a log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionReminder {
    pub slot: u8,
    pub scheduled: NaiveTime,
}

impl SessionReminder {
    pub fn to_notification(&self) -> Notification {
        Notification {
            kind: NotificationKind::SessionReminder,
            title: format!("Session {} is due", self.slot),
            body: format!(
                "Your {} session hasn't been logged yet.",
                self.scheduled.format("%H:%M")
            ),
        }
    }
}

/// Scheduled sessions that are due and not yet logged.
///
/// `session_times[i]` is the schedule for slot `i + 1`. Unparseable times
/// are skipped with a warning.
pub fn pending_session_reminders(
    settings: &NotificationSettings,
    now: NaiveDateTime,
    logged_slots: &BTreeSet<u8>,
) -> Vec<SessionReminder> {
    if !settings.enabled {
        return Vec::new();
    }

    settings
        .session_times
        .iter()
        .enumerate()
        .filter_map(|(i, time)| {
            let slot = i as u8 + 1;
            match NaiveTime::parse_from_str(time.trim(), "%H:%M") {
                Ok(scheduled) => Some(SessionReminder { slot, scheduled }),
                Err(e) => {
                    warn!(slot, time = %time, error = %e, "Ignoring unparseable session time");
                    None
                }
            }
        })
        .filter(|r| r.scheduled <= now.time() && !logged_slots.contains(&r.slot))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::achievements::AchievementCategory;
    use chrono::{NaiveDate, Utc};

    fn at(hour: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 2, 2)
            .unwrap()
            .and_hms_opt(hour, min, 0)
            .unwrap()
    }

    #[test]
    fn test_reminders_only_for_due_unlogged_slots() {
        let settings = NotificationSettings::default();
        let logged: BTreeSet<u8> = [1].into_iter().collect();

        let due = pending_session_reminders(&settings, at(14, 30), &logged);
        let slots: Vec<u8> = due.iter().map(|r| r.slot).collect();
        assert_eq!(slots, vec![2, 3]);
    }

    #[test]
    fn test_reminders_disabled() {
        let settings = NotificationSettings {
            enabled: false,
            ..NotificationSettings::default()
        };
        assert!(pending_session_reminders(&settings, at(23, 0), &BTreeSet::new()).is_empty());
    }

    #[test]
    fn test_bad_time_is_skipped() {
        let settings = NotificationSettings {
            session_times: vec!["7am".to_string(), "09:00".to_string()],
            ..NotificationSettings::default()
        };
        let due = pending_session_reminders(&settings, at(10, 0), &BTreeSet::new());
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].slot, 2);
    }

    #[test]
    fn test_unlock_toasts_respect_setting() {
        let events = vec![UnlockEvent {
            id: "streak_3".to_string(),
            name: "Warming Up".to_string(),
            category: AchievementCategory::Streak,
            xp: 25,
            unlocked_at: Utc::now(),
        }];

        let toasts = unlock_toasts(&events, &NotificationSettings::default());
        assert_eq!(toasts.len(), 1);
        assert_eq!(toasts[0].body, "+25 XP");

        let muted = NotificationSettings {
            achievement_toasts: false,
            ..NotificationSettings::default()
        };
        assert!(unlock_toasts(&events, &muted).is_empty());
    }

    #[test]
    fn test_recording_dispatcher() {
        let dispatcher = RecordingDispatcher::new();
        let reminder = SessionReminder {
            slot: 2,
            scheduled: NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
        };
        dispatcher.dispatch(&reminder.to_notification());
        assert_eq!(dispatcher.sent()[0].title, "Session 2 is due");
    }
}

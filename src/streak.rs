//! Consecutive-day activity streak and streak freezes
//!
//! # Streak
//!
//! A day is active when at least one exercise session was logged on it. The
//! streak counts consecutive active days walking backwards from today. If
//! today has no session yet the walk starts at yesterday, so an unlogged
//! morning never breaks an otherwise continuing streak.
//!
//! # Freezes
//!
//! A freeze is a consumable credit that hides one missed day. When yesterday
//! was missed right after an active day, one freeze is spent automatically and
//! the streak is shown one day longer than computed. Every run that reaches a
//! multiple of seven days earns a freeze back. Both effects are recorded in a
//! [`FreezeLedger`] so recomputing on the same data never spends or earns
//! twice.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::dates::{days_ago, trailing_window, DateRange};
use crate::models::ExerciseSessionLog;

/// Streak calculation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreakConfig {
    /// Trailing window of session history considered (default: 120)
    pub window_days: u64,

    /// A freeze is earned each time the streak is a multiple of this (default: 7)
    pub replenish_every: u32,
}

impl Default for StreakConfig {
    fn default() -> Self {
        StreakConfig {
            window_days: 120,
            replenish_every: 7,
        }
    }
}

/// Result of a streak calculation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakStats {
    /// Consecutive active days
    pub streak: u32,

    /// Sessions in the window, not deduplicated by day
    pub total_sessions: u32,

    /// Distinct active dates in the window
    pub active_days: u32,

    /// Whether a session was logged today
    pub has_today: bool,

    /// First day of the current run, `None` when the streak is 0
    pub run_start: Option<NaiveDate>,

    pub active_dates: BTreeSet<NaiveDate>,
}

impl StreakStats {
    pub fn is_active(&self, date: NaiveDate) -> bool {
        self.active_dates.contains(&date)
    }
}

pub struct StreakCalculator {
    config: StreakConfig,
}

impl StreakCalculator {
    /// Create a streak calculator with default configuration
    pub fn new() -> Self {
        StreakCalculator {
            config: StreakConfig::default(),
        }
    }

    pub fn with_config(config: StreakConfig) -> Self {
        StreakCalculator { config }
    }

    pub fn config(&self) -> &StreakConfig {
        &self.config
    }

    /// Session window that should be queried for `today`
    pub fn window(&self, today: NaiveDate) -> DateRange {
        trailing_window(today, self.config.window_days)
    }

    /// Compute the streak from session logs.
    ///
    /// Sessions outside the trailing window (including future-dated ones)
    /// are ignored.
    pub fn calculate(&self, sessions: &[ExerciseSessionLog], today: NaiveDate) -> StreakStats {
        let window = self.window(today);
        let in_window: Vec<&ExerciseSessionLog> = sessions
            .iter()
            .filter(|s| window.contains(s.date))
            .collect();

        let active_dates: BTreeSet<NaiveDate> = in_window.iter().map(|s| s.date).collect();
        let has_today = active_dates.contains(&today);

        let start_offset = if has_today { 0 } else { 1 };
        let mut streak = 0u32;
        let mut offset = start_offset;
        while (offset as u64) < self.config.window_days
            && active_dates.contains(&days_ago(today, offset as u64))
        {
            streak += 1;
            offset += 1;
        }

        let run_start = if streak > 0 {
            Some(days_ago(today, (start_offset + streak - 1) as u64))
        } else {
            None
        };

        StreakStats {
            streak,
            total_sessions: in_window.len() as u32,
            active_days: active_dates.len() as u32,
            has_today,
            run_start,
            active_dates,
        }
    }
}

impl Default for StreakCalculator {
    fn default() -> Self {
        Self::new()
    }
}

/// Idempotency keys for freeze side effects, kept in the Preference Store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FreezeLedger {
    /// Missed day a freeze was already spent on
    pub consumed_for_break: Option<NaiveDate>,

    /// Last streak milestone that earned a freeze
    pub last_replenish: Option<ReplenishMarker>,
}

/// A replenishment is earned once per streak value per run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplenishMarker {
    pub streak: u32,
    pub run_start: NaiveDate,
}

/// What the freeze policy did during one evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreezeOutcome {
    /// Yesterday's gap is covered by a freeze
    pub frozen: bool,

    /// A freeze was spent during this evaluation
    pub consumed: bool,

    /// A freeze was earned during this evaluation
    pub replenished: bool,

    /// Streak shown to the user
    pub display_streak: u32,
}

/// Freeze consumption and replenishment rules
#[derive(Debug, Clone)]
pub struct FreezePolicy {
    replenish_every: u32,
}

impl FreezePolicy {
    pub fn new(replenish_every: u32) -> Self {
        FreezePolicy { replenish_every }
    }

    /// Yesterday was missed right after an active day
    pub fn is_broken(stats: &StreakStats, today: NaiveDate) -> bool {
        !stats.is_active(days_ago(today, 1)) && stats.is_active(days_ago(today, 2))
    }

    /// Spend a freeze on yesterday's gap if one is needed and available.
    ///
    /// Must run with exclusive access to `freezes` and `ledger`.
    pub fn consume(
        &self,
        stats: &StreakStats,
        today: NaiveDate,
        freezes: &mut u32,
        ledger: &mut FreezeLedger,
    ) -> (bool, bool) {
        if !Self::is_broken(stats, today) {
            return (false, false);
        }

        let gap = days_ago(today, 1);
        if ledger.consumed_for_break == Some(gap) {
            return (true, false);
        }

        if *freezes == 0 {
            return (false, false);
        }

        *freezes -= 1;
        ledger.consumed_for_break = Some(gap);
        (true, true)
    }

    /// Earn a freeze when the streak sits on a multiple of the interval
    pub fn replenish(&self, stats: &StreakStats, freezes: &mut u32, ledger: &mut FreezeLedger) -> bool {
        if stats.streak == 0 || self.replenish_every == 0 || stats.streak % self.replenish_every != 0 {
            return false;
        }

        let Some(run_start) = stats.run_start else {
            return false;
        };
        let marker = ReplenishMarker {
            streak: stats.streak,
            run_start,
        };
        if ledger.last_replenish == Some(marker) {
            return false;
        }

        *freezes += 1;
        ledger.last_replenish = Some(marker);
        true
    }

    /// Run both rules and compute the displayed streak
    pub fn apply(
        &self,
        stats: &StreakStats,
        today: NaiveDate,
        freezes: &mut u32,
        ledger: &mut FreezeLedger,
    ) -> FreezeOutcome {
        let (frozen, consumed) = self.consume(stats, today, freezes, ledger);
        let replenished = self.replenish(stats, freezes, ledger);

        FreezeOutcome {
            frozen,
            consumed,
            replenished,
            display_streak: stats.streak + u32::from(frozen),
        }
    }
}

impl Default for FreezePolicy {
    fn default() -> Self {
        FreezePolicy::new(StreakConfig::default().replenish_every)
    }
}

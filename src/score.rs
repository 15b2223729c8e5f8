//! Daily Recovery Score
//!
//! A 0-100 composite describing how well today's plan was followed. It is
//! scoped to the current local date only and recomputed from the logs every
//! time; nothing is persisted.
//!
//! # Components
//!
//! | Component   | Max | Rule |
//! |-------------|-----|------|
//! | Sessions    | 30  | distinct session slots logged today, out of 5 |
//! | Supplements | 20  | distinct planned doses taken today, out of the catalog |
//! | Sleep       | 20  | 20 for a night of 7h or more, 10 for a shorter night |
//! | Pain        | 15  | banded by today's mean pain level; 15 when none logged |
//! | ROM         | 15  | 15 when a range-of-motion measurement exists today |
//!
//! Fractions are rounded half-up, so 1 slot of 5 scores `round(6.0) = 6` and
//! 1 supplement of 3 scores `round(6.67) = 7`.
//!
//! # Loading
//!
//! While the underlying queries are unresolved the score is reported with
//! `is_loading = true`. Consumers must check [`RecoveryScore::value`] instead
//! of reading a zero total.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;

use crate::models::{
    ExerciseSessionLog, PainEntry, RomMeasurement, SleepLog, SupplementLog, SupplementSlot,
    SESSION_SLOTS,
};
use crate::sanitize::{pain_level, round_half_up, sleep_hours};

pub const SESSIONS_MAX: u8 = 30;
pub const SUPPLEMENTS_MAX: u8 = 20;
pub const SLEEP_MAX: u8 = 20;
pub const PAIN_MAX: u8 = 15;
pub const ROM_MAX: u8 = 15;

/// Hours of sleep that earn the full sleep component
pub const RESTFUL_SLEEP_HOURS: f64 = 7.0;

/// Planned `(slot, supplement)` doses; only these count toward adherence
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplementCatalog {
    doses: BTreeSet<(SupplementSlot, String)>,
}

impl SupplementCatalog {
    pub fn new(doses: impl IntoIterator<Item = (SupplementSlot, String)>) -> Self {
        SupplementCatalog {
            doses: doses.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.doses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doses.is_empty()
    }

    pub fn contains(&self, slot: SupplementSlot, supplement_id: &str) -> bool {
        self.doses
            .iter()
            .any(|(s, id)| *s == slot && id == supplement_id)
    }

    /// Distinct planned doses marked as taken
    pub fn doses_taken<'a>(&self, logs: impl IntoIterator<Item = &'a SupplementLog>) -> usize {
        logs.into_iter()
            .filter(|s| s.taken && self.contains(s.slot, &s.supplement_id))
            .map(|s| (s.slot, s.supplement_id.as_str()))
            .collect::<HashSet<_>>()
            .len()
    }

    /// Every planned dose taken; never true for an empty catalog
    pub fn is_complete<'a>(&self, logs: impl IntoIterator<Item = &'a SupplementLog>) -> bool {
        !self.is_empty() && self.doses_taken(logs) >= self.len()
    }
}

/// Today's logs across the five scored record types
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DayLogs {
    pub sessions: Vec<ExerciseSessionLog>,
    pub supplements: Vec<SupplementLog>,
    pub sleep: Vec<SleepLog>,
    pub pain: Vec<PainEntry>,
    pub rom: Vec<RomMeasurement>,
}

impl DayLogs {
    /// Number of distinct scheduled session slots with at least one exercise
    pub fn distinct_session_slots(&self) -> usize {
        self.sessions
            .iter()
            .map(|s| s.session_slot)
            .collect::<HashSet<_>>()
            .len()
    }

    /// Longest sleep logged for the day, clamped to [0, 24]
    pub fn longest_sleep(&self) -> Option<f64> {
        self.sleep
            .iter()
            .map(|s| sleep_hours(s.total_hours))
            .fold(None, |best: Option<f64>, h| Some(best.map_or(h, |b| b.max(h))))
    }

    /// Mean of the day's pain levels, `None` when nothing was logged
    pub fn mean_pain(&self) -> Option<f64> {
        if self.pain.is_empty() {
            return None;
        }
        let sum: f64 = self.pain.iter().map(|p| pain_level(p.level) as f64).sum();
        Some(sum / self.pain.len() as f64)
    }
}

/// Composite recovery score for one day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryScore {
    pub total: u8,
    pub sessions: u8,
    pub supplements: u8,
    pub sleep: u8,
    pub pain: u8,
    pub rom: u8,
    pub is_loading: bool,
}

impl RecoveryScore {
    /// Placeholder reported while queries are unresolved
    pub fn loading() -> Self {
        RecoveryScore {
            total: 0,
            sessions: 0,
            supplements: 0,
            sleep: 0,
            pain: 0,
            rom: 0,
            is_loading: true,
        }
    }

    /// The total, or `None` while loading
    pub fn value(&self) -> Option<u8> {
        if self.is_loading {
            None
        } else {
            Some(self.total)
        }
    }
}

impl fmt::Display for RecoveryScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value() {
            Some(total) => write!(f, "{}/100", total),
            None => write!(f, "loading"),
        }
    }
}

/// Recovery score calculator
pub struct RecoveryScoreCalculator {
    catalog: SupplementCatalog,
}

impl RecoveryScoreCalculator {
    /// Create a calculator scoring adherence against the given supplement plan
    pub fn new(catalog: SupplementCatalog) -> Self {
        RecoveryScoreCalculator { catalog }
    }

    /// Calculate today's score
    ///
    /// # Arguments
    ///
    /// * `today` - Logs dated today across all five scored record types
    ///
    /// # Returns
    ///
    /// A loaded [`RecoveryScore`] whose total is the sum of its components
    pub fn calculate(&self, today: &DayLogs) -> RecoveryScore {
        let sessions = self.session_score(today);
        let supplements = self.supplement_score(today);
        let sleep = self.sleep_score(today);
        let pain = self.pain_score(today);
        let rom = self.rom_score(today);

        RecoveryScore {
            total: sessions + supplements + sleep + pain + rom,
            sessions,
            supplements,
            sleep,
            pain,
            rom,
            is_loading: false,
        }
    }

    fn session_score(&self, today: &DayLogs) -> u8 {
        let slots = today.distinct_session_slots().min(SESSION_SLOTS as usize);
        scaled(slots as f64 / SESSION_SLOTS as f64, SESSIONS_MAX)
    }

    fn supplement_score(&self, today: &DayLogs) -> u8 {
        if self.catalog.is_empty() {
            return 0;
        }
        let ratio = self.catalog.doses_taken(&today.supplements) as f64 / self.catalog.len() as f64;
        scaled(ratio.min(1.0), SUPPLEMENTS_MAX)
    }

    fn sleep_score(&self, today: &DayLogs) -> u8 {
        match today.longest_sleep() {
            Some(hours) if hours >= RESTFUL_SLEEP_HOURS => SLEEP_MAX,
            Some(_) => SLEEP_MAX / 2,
            None => 0,
        }
    }

    fn pain_score(&self, today: &DayLogs) -> u8 {
        match today.mean_pain() {
            None => PAIN_MAX,
            Some(avg) if avg <= 3.0 => PAIN_MAX,
            Some(avg) if avg <= 5.0 => 10,
            Some(avg) if avg <= 7.0 => 5,
            Some(_) => 0,
        }
    }

    fn rom_score(&self, today: &DayLogs) -> u8 {
        if today.rom.is_empty() {
            0
        } else {
            ROM_MAX
        }
    }
}

fn scaled(ratio: f64, max: u8) -> u8 {
    round_half_up(ratio * max as f64).clamp(0.0, max as f64) as u8
}

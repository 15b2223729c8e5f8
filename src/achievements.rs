//! Achievements, XP and levels
//!
//! Achievements are a monotonic unlock set kept in the Preference Store.
//! Evaluating the catalog against fresh metrics adds every newly satisfied
//! achievement with the current timestamp and credits its XP. Unlocks are
//! never revoked or re-stamped, and evaluating twice on the same metrics
//! changes nothing the second time.
//!
//! # Levels
//!
//! The level is derived from total XP through a fixed threshold table:
//!
//! | Level | XP    | Title             |
//! |-------|-------|-------------------|
//! | 1     | 0     | First Steps       |
//! | 2     | 100   | Getting Moving    |
//! | 3     | 250   | Committed         |
//! | 4     | 500   | Consistent        |
//! | 5     | 1000  | Resilient         |
//! | 6     | 1750  | Determined        |
//! | 7     | 2750  | Strong Arm        |
//! | 8     | 4000  | Rehab Veteran     |
//! | 9     | 5500  | Champion          |
//! | 10    | 7500  | Fully Recovered   |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

use crate::models::SESSION_SLOTS;
use crate::preferences::{PreferenceState, Preferences};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AchievementCategory {
    Streak,
    Sessions,
    Supplements,
    Rom,
    Sleep,
    Score,
}

impl fmt::Display for AchievementCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AchievementCategory::Streak => write!(f, "Streak"),
            AchievementCategory::Sessions => write!(f, "Sessions"),
            AchievementCategory::Supplements => write!(f, "Supplements"),
            AchievementCategory::Rom => write!(f, "Range of motion"),
            AchievementCategory::Sleep => write!(f, "Sleep"),
            AchievementCategory::Score => write!(f, "Recovery score"),
        }
    }
}

/// Inputs the unlock predicates are evaluated against
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AchievementMetrics {
    /// Any underlying query is unresolved; nothing is evaluated
    pub is_loading: bool,
    pub streak: u32,
    pub total_sessions: u32,
    /// Distinct session slots logged today
    pub slots_today: usize,
    /// Every catalog supplement taken today
    pub supplements_complete_today: bool,
    /// Days in the trailing week with every catalog supplement taken
    pub full_supplement_days: u32,
    pub rom_measurements: usize,
    pub rom_today: bool,
    /// Best flexion ever measured, degrees
    pub max_flexion: f64,
    /// Nights of 7h or more in the trailing week, one per date
    pub restful_nights: u32,
    /// Today's recovery score when loaded
    pub recovery_score: Option<u8>,
}

impl AchievementMetrics {
    pub fn loading() -> Self {
        AchievementMetrics {
            is_loading: true,
            ..Self::default()
        }
    }
}

/// Static catalog entry
#[derive(Clone)]
pub struct AchievementDef {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub category: AchievementCategory,
    pub xp: u32,
    pub unlocked_when: fn(&AchievementMetrics) -> bool,
}

impl fmt::Debug for AchievementDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AchievementDef")
            .field("id", &self.id)
            .field("category", &self.category)
            .field("xp", &self.xp)
            .finish()
    }
}

/// The built-in achievement catalog
pub fn default_catalog() -> Vec<AchievementDef> {
    use AchievementCategory::*;

    vec![
        AchievementDef {
            id: "streak_3",
            name: "Warming Up",
            description: "Exercise 3 days in a row",
            category: Streak,
            xp: 25,
            unlocked_when: |m| m.streak >= 3,
        },
        AchievementDef {
            id: "streak_7",
            name: "One Week Strong",
            description: "Exercise 7 days in a row",
            category: Streak,
            xp: 50,
            unlocked_when: |m| m.streak >= 7,
        },
        AchievementDef {
            id: "streak_14",
            name: "Fortnight Focus",
            description: "Exercise 14 days in a row",
            category: Streak,
            xp: 100,
            unlocked_when: |m| m.streak >= 14,
        },
        AchievementDef {
            id: "streak_30",
            name: "Unbreakable",
            description: "Exercise 30 days in a row",
            category: Streak,
            xp: 250,
            unlocked_when: |m| m.streak >= 30,
        },
        AchievementDef {
            id: "first_session",
            name: "First Rep",
            description: "Log your first exercise",
            category: Sessions,
            xp: 10,
            unlocked_when: |m| m.total_sessions >= 1,
        },
        AchievementDef {
            id: "sessions_50",
            name: "Half Century",
            description: "Log 50 exercises",
            category: Sessions,
            xp: 150,
            unlocked_when: |m| m.total_sessions >= 50,
        },
        AchievementDef {
            id: "full_day",
            name: "Full Schedule",
            description: "Complete all five sessions in one day",
            category: Sessions,
            xp: 50,
            unlocked_when: |m| m.slots_today >= SESSION_SLOTS as usize,
        },
        AchievementDef {
            id: "supplements_today",
            name: "Well Stocked",
            description: "Take every supplement today",
            category: Supplements,
            xp: 20,
            unlocked_when: |m| m.supplements_complete_today,
        },
        AchievementDef {
            id: "supplements_week",
            name: "Perfect Week of Supplements",
            description: "Take every supplement for 7 days",
            category: Supplements,
            xp: 75,
            unlocked_when: |m| m.full_supplement_days >= 7,
        },
        AchievementDef {
            id: "first_rom",
            name: "Baseline",
            description: "Record your first range-of-motion measurement",
            category: Rom,
            xp: 15,
            unlocked_when: |m| m.rom_measurements >= 1,
        },
        AchievementDef {
            id: "rom_today",
            name: "Daily Check",
            description: "Measure your range of motion today",
            category: Rom,
            xp: 10,
            unlocked_when: |m| m.rom_today,
        },
        AchievementDef {
            id: "flexion_90",
            name: "Right Angle",
            description: "Reach 90° of flexion",
            category: Rom,
            xp: 100,
            unlocked_when: |m| m.max_flexion >= 90.0,
        },
        AchievementDef {
            id: "flexion_120",
            name: "Almost There",
            description: "Reach 120° of flexion",
            category: Rom,
            xp: 200,
            unlocked_when: |m| m.max_flexion >= 120.0,
        },
        AchievementDef {
            id: "sleep_week",
            name: "Well Rested",
            description: "Sleep 7 hours or more every night for a week",
            category: Sleep,
            xp: 75,
            unlocked_when: |m| m.restful_nights >= 7,
        },
        AchievementDef {
            id: "score_80",
            name: "Great Day",
            description: "Reach a recovery score of 80",
            category: Score,
            xp: 50,
            unlocked_when: |m| m.recovery_score.is_some_and(|s| s >= 80),
        },
        AchievementDef {
            id: "score_100",
            name: "Perfect Day",
            description: "Reach a recovery score of 100",
            category: Score,
            xp: 100,
            unlocked_when: |m| m.recovery_score == Some(100),
        },
    ]
}

/// Emitted once per newly unlocked achievement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnlockEvent {
    pub id: String,
    pub name: String,
    pub category: AchievementCategory,
    pub xp: u32,
    pub unlocked_at: DateTime<Utc>,
}

pub struct AchievementEngine {
    catalog: Vec<AchievementDef>,
}

impl AchievementEngine {
    pub fn new() -> Self {
        Self::with_catalog(default_catalog())
    }

    pub fn with_catalog(catalog: Vec<AchievementDef>) -> Self {
        AchievementEngine { catalog }
    }

    pub fn catalog(&self) -> &[AchievementDef] {
        &self.catalog
    }

    pub fn get(&self, id: &str) -> Option<&AchievementDef> {
        self.catalog.iter().find(|a| a.id == id)
    }

    /// Unlock newly satisfied achievements in `prefs`.
    ///
    /// Callers must hold the preference writer lock, see
    /// [`PreferenceState::transaction`].
    pub fn apply(
        &self,
        prefs: &mut Preferences,
        metrics: &AchievementMetrics,
        now: DateTime<Utc>,
    ) -> Vec<UnlockEvent> {
        if metrics.is_loading {
            return Vec::new();
        }

        let mut events = Vec::new();
        for def in &self.catalog {
            if prefs.unlocked_achievements.contains_key(def.id) || !(def.unlocked_when)(metrics) {
                continue;
            }

            prefs.unlocked_achievements.insert(def.id.to_string(), now);
            prefs.total_xp = prefs.total_xp.saturating_add(def.xp);
            info!(achievement = def.id, xp = def.xp, total_xp = prefs.total_xp, "Achievement unlocked");

            events.push(UnlockEvent {
                id: def.id.to_string(),
                name: def.name.to_string(),
                category: def.category,
                xp: def.xp,
                unlocked_at: now,
            });
        }

        events
    }

    /// Evaluate the catalog in its own preference transaction
    pub fn evaluate(
        &self,
        state: &PreferenceState,
        metrics: &AchievementMetrics,
        now: DateTime<Utc>,
    ) -> Vec<UnlockEvent> {
        state.transaction(|prefs| self.apply(prefs, metrics, now))
    }
}

impl Default for AchievementEngine {
    fn default() -> Self {
        Self::new()
    }
}

const LEVEL_THRESHOLDS: [u32; 10] = [0, 100, 250, 500, 1000, 1750, 2750, 4000, 5500, 7500];

const LEVEL_TITLES: [&str; 10] = [
    "First Steps",
    "Getting Moving",
    "Committed",
    "Consistent",
    "Resilient",
    "Determined",
    "Strong Arm",
    "Rehab Veteran",
    "Champion",
    "Fully Recovered",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelInfo {
    /// 1-based level
    pub level: u32,
    pub title: String,
    pub total_xp: u32,
    pub xp_into_level: u32,
    /// XP still needed for the next level, `None` at the top level
    pub xp_to_next: Option<u32>,
}

impl LevelInfo {
    pub fn from_xp(total_xp: u32) -> Self {
        let index = LEVEL_THRESHOLDS
            .iter()
            .rposition(|&t| total_xp >= t)
            .unwrap_or(0);

        LevelInfo {
            level: index as u32 + 1,
            title: LEVEL_TITLES[index].to_string(),
            total_xp,
            xp_into_level: total_xp - LEVEL_THRESHOLDS[index],
            xp_to_next: LEVEL_THRESHOLDS.get(index + 1).map(|next| next - total_xp),
        }
    }
}

impl fmt::Display for LevelInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Level {} ({})", self.level, self.title)
    }
}

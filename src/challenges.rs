//! Daily challenge rotation
//!
//! Three challenges are picked from a fixed catalog for each calendar day.
//! The pick is a pure function of the date, so every screen and every
//! recomputation on the same day agrees without storing anything.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::dates::day_of_year;
use crate::models::SESSION_SLOTS;
use crate::score::{DayLogs, SupplementCatalog};

/// Challenges offered per day
pub const CHALLENGES_PER_DAY: usize = 3;

/// Completion condition attached to a catalog entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeCondition {
    AllSessions,
    SupplementsFull,
    EarlyBed,
    RomCheck,
    PainLog,
    MoodCheck,
    JournalEntry,
    Breathing,
    Sleep8h,
    MorningSession,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyChallengeDef {
    pub id: String,
    pub title: String,
    pub xp: u32,
    pub condition: ChallengeCondition,
}

impl DailyChallengeDef {
    fn new(id: &str, title: &str, xp: u32, condition: ChallengeCondition) -> Self {
        DailyChallengeDef {
            id: id.to_string(),
            title: title.to_string(),
            xp,
            condition,
        }
    }
}

pub fn default_catalog() -> Vec<DailyChallengeDef> {
    use ChallengeCondition::*;

    vec![
        DailyChallengeDef::new("all_sessions", "Complete all 5 sessions", 50, AllSessions),
        DailyChallengeDef::new("supplements_full", "Take every supplement", 30, SupplementsFull),
        DailyChallengeDef::new("early_bed", "Lights out before 23:00", 25, EarlyBed),
        DailyChallengeDef::new("rom_check", "Measure your range of motion", 20, RomCheck),
        DailyChallengeDef::new("pain_log", "Log your pain level", 10, PainLog),
        DailyChallengeDef::new("mood_check", "Record mood and energy", 10, MoodCheck),
        DailyChallengeDef::new("journal_entry", "Write a journal entry", 15, JournalEntry),
        DailyChallengeDef::new("breathing", "Do a breathing exercise", 15, Breathing),
        DailyChallengeDef::new("sleep_8h", "Sleep 8 hours", 25, Sleep8h),
        DailyChallengeDef::new("morning_session", "Finish the first session", 20, MorningSession),
    ]
}

/// Today's aggregates challenges are completed against
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChallengeInput {
    pub slots_today: usize,
    pub first_slot_done: bool,
    pub supplements_complete: bool,
    /// A sleep log today with a bedtime before 23:00
    pub early_bedtime: bool,
    pub longest_sleep: Option<f64>,
    pub rom_today: bool,
    pub pain_today: bool,
    pub mood_today: bool,
    pub journal_today: bool,
    /// Tracked outside the Log Store
    pub breathing_done: bool,
}

impl ChallengeInput {
    /// Fill the fields derivable from today's scored logs
    pub fn from_day(day: &DayLogs, catalog: &SupplementCatalog) -> Self {
        ChallengeInput {
            slots_today: day.distinct_session_slots(),
            first_slot_done: day.sessions.iter().any(|s| s.session_slot == 1),
            supplements_complete: catalog.is_complete(&day.supplements),
            early_bedtime: day
                .sleep
                .iter()
                .any(|s| s.bed_hour().is_some() && !s.is_late_bedtime()),
            longest_sleep: day.longest_sleep(),
            rom_today: !day.rom.is_empty(),
            pain_today: !day.pain.is_empty(),
            ..ChallengeInput::default()
        }
    }

    pub fn is_met(&self, condition: ChallengeCondition) -> bool {
        match condition {
            ChallengeCondition::AllSessions => self.slots_today >= SESSION_SLOTS as usize,
            ChallengeCondition::SupplementsFull => self.supplements_complete,
            ChallengeCondition::EarlyBed => self.early_bedtime,
            ChallengeCondition::RomCheck => self.rom_today,
            ChallengeCondition::PainLog => self.pain_today,
            ChallengeCondition::MoodCheck => self.mood_today,
            ChallengeCondition::JournalEntry => self.journal_today,
            ChallengeCondition::Breathing => self.breathing_done,
            ChallengeCondition::Sleep8h => self.longest_sleep.is_some_and(|h| h >= 8.0),
            ChallengeCondition::MorningSession => self.first_slot_done,
        }
    }
}

/// A selected challenge and whether it is already done
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyChallenge {
    pub id: String,
    pub title: String,
    pub xp: u32,
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyChallenges {
    pub date: NaiveDate,
    pub challenges: Vec<DailyChallenge>,
}

impl DailyChallenges {
    pub fn completion(&self) -> BTreeMap<String, bool> {
        self.challenges
            .iter()
            .map(|c| (c.id.clone(), c.completed))
            .collect()
    }

    pub fn earned_xp(&self) -> u32 {
        self.challenges
            .iter()
            .filter(|c| c.completed)
            .map(|c| c.xp)
            .sum()
    }
}

pub struct DailyChallengeSelector {
    catalog: Vec<DailyChallengeDef>,
}

impl DailyChallengeSelector {
    pub fn new() -> Self {
        Self::with_catalog(default_catalog())
    }

    pub fn with_catalog(catalog: Vec<DailyChallengeDef>) -> Self {
        DailyChallengeSelector { catalog }
    }

    /// Rotation hash of one catalog id on a given day of year
    pub fn rotation_hash(day_of_year: u32, id: &str) -> u32 {
        let code = id.as_bytes().get(3).copied().unwrap_or(0) as u32;
        (day_of_year * 31 + code) % 100
    }

    /// The day's challenges, in rotation order
    pub fn select(&self, date: NaiveDate) -> Vec<&DailyChallengeDef> {
        let doy = day_of_year(date);
        let mut ranked: Vec<&DailyChallengeDef> = self.catalog.iter().collect();
        ranked.sort_by_key(|c| Self::rotation_hash(doy, &c.id));
        ranked.truncate(CHALLENGES_PER_DAY);
        ranked
    }

    /// Select the day's challenges and mark the completed ones
    pub fn evaluate(&self, date: NaiveDate, input: &ChallengeInput) -> DailyChallenges {
        let challenges = self
            .select(date)
            .into_iter()
            .map(|def| DailyChallenge {
                id: def.id.clone(),
                title: def.title.clone(),
                xp: def.xp,
                completed: input.is_met(def.condition),
            })
            .collect();

        DailyChallenges { date, challenges }
    }
}

impl Default for DailyChallengeSelector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SleepLog;

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, m, day).unwrap()
    }

    fn ids(selected: &[&DailyChallengeDef]) -> Vec<String> {
        selected.iter().map(|c| c.id.clone()).collect()
    }

    #[test]
    fn test_new_year_rotation() {
        let selector = DailyChallengeSelector::new();
        // Hashes on day 1: all_sessions 26, rom_check 26, breathing 28
        assert_eq!(
            ids(&selector.select(d(1, 1))),
            vec!["all_sessions", "rom_check", "breathing"]
        );
    }

    #[test]
    fn test_selection_is_deterministic() {
        let selector = DailyChallengeSelector::new();
        for day in 1..=28 {
            let date = d(2, day);
            assert_eq!(ids(&selector.select(date)), ids(&selector.select(date)));
            assert_eq!(selector.select(date).len(), CHALLENGES_PER_DAY);
        }
    }

    #[test]
    fn test_short_ids_hash_with_zero() {
        assert_eq!(DailyChallengeSelector::rotation_hash(3, "ab"), 93);
        assert_eq!(DailyChallengeSelector::rotation_hash(1, "abc_"), (31 + 95) % 100);
    }

    #[test]
    fn test_completion_uses_breathing_flag() {
        let selector = DailyChallengeSelector::new();
        let mut input = ChallengeInput::default();
        let before = selector.evaluate(d(1, 1), &input);
        assert!(!before.completion()["breathing"]);

        input.breathing_done = true;
        let after = selector.evaluate(d(1, 1), &input);
        assert!(after.completion()["breathing"]);
        assert_eq!(after.earned_xp(), 15);
    }

    #[test]
    fn test_input_from_day() {
        let day = DayLogs {
            sleep: vec![SleepLog {
                date: d(1, 1),
                total_hours: 8.5,
                bed_time: "22:15".to_string(),
            }],
            ..DayLogs::default()
        };
        let input = ChallengeInput::from_day(&day, &SupplementCatalog::default());
        assert!(input.early_bedtime);
        assert!(input.is_met(ChallengeCondition::Sleep8h));
        assert!(!input.is_met(ChallengeCondition::SupplementsFull));
    }
}

//! Smart Tips rule engine
//!
//! Each tip is produced by an independent [`TipRule`] evaluated over a
//! [`TipContext`] of recent aggregates. The engine evaluates every rule,
//! stable-sorts the hits by ascending priority (1 is most urgent) and keeps
//! the first three. No memory of previously shown tips is kept, so the same
//! context always yields the same list.
//!
//! | id                   | fires when                                         | priority |
//! |----------------------|----------------------------------------------------|----------|
//! | `low_sleep`          | mean sleep < 6.5h over at least 3 nights            | 1 |
//! | `high_pain`          | mean pain > 5 over at least 3 values                | 1 |
//! | `pain_rising`        | second-half mean exceeds first-half mean by > 1.5   | 1 |
//! | `late_bedtime`       | 3+ bedtimes between 23:00 and 06:00                 | 2 |
//! | `low_consistency`    | < 4 active days this week, more than 14 days in     | 2 |
//! | `rom_plateau`        | mean change over last 3 ROM < 2°, more than 30 days in | 2 |
//! | `low_score`          | loaded recovery score below 40                      | 2 |
//! | `streak_almost_week` | streak of 5 or 6 days                               | 3 |
//! | `no_sleep_today`     | no sleep logged today                               | 3 |
//! | `no_rom_today`       | no ROM today, more than 14 days in                  | 3 |

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::HashSet;
use std::fmt;
use tracing::debug;

use crate::models::{ExerciseSessionLog, PainEntry, RomMeasurement, SleepLog};
use crate::protocol::PhaseDef;
use crate::sanitize::{angle, pain_level, sleep_hours};
use crate::score::RecoveryScore;

/// Maximum number of tips returned
pub const MAX_TIPS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TipCategory {
    Sleep,
    Pain,
    Exercise,
    Progress,
    Motivation,
}

impl fmt::Display for TipCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TipCategory::Sleep => write!(f, "Sleep"),
            TipCategory::Pain => write!(f, "Pain"),
            TipCategory::Exercise => write!(f, "Exercise"),
            TipCategory::Progress => write!(f, "Progress"),
            TipCategory::Motivation => write!(f, "Motivation"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmartTip {
    pub id: String,
    pub text: String,
    pub category: TipCategory,
    /// 1 is most urgent
    pub priority: u8,
    pub icon: String,
}

impl SmartTip {
    pub fn new(id: &str, text: impl Into<String>, category: TipCategory, priority: u8, icon: &str) -> Self {
        SmartTip {
            id: id.to_string(),
            text: text.into(),
            category,
            priority,
            icon: icon.to_string(),
        }
    }
}

/// Aggregates the rules are evaluated against
#[derive(Debug, Clone, PartialEq)]
pub struct TipContext {
    pub today: NaiveDate,
    /// Sleep logs from the trailing 7 days
    pub sleep: Vec<SleepLog>,
    /// Pain entries from the trailing 7 days
    pub pain: Vec<PainEntry>,
    /// Exercise sessions from the trailing 7 days
    pub sessions: Vec<ExerciseSessionLog>,
    /// Up to 3 most recent ROM measurements, oldest first
    pub recent_rom: Vec<RomMeasurement>,
    pub streak: u32,
    pub score: RecoveryScore,
    /// Days since the program start date
    pub days_since_start: i64,
    pub phase: Option<PhaseDef>,
}

impl TipContext {
    /// Empty context for `today`
    pub fn new(today: NaiveDate) -> Self {
        TipContext {
            today,
            sleep: Vec::new(),
            pain: Vec::new(),
            sessions: Vec::new(),
            recent_rom: Vec::new(),
            streak: 0,
            score: RecoveryScore::loading(),
            days_since_start: 0,
            phase: None,
        }
    }

    /// Pain values from pain entries and session before/after ratings,
    /// ordered by date
    pub fn pooled_pain(&self) -> Vec<f64> {
        let mut values: Vec<(NaiveDate, f64)> = self
            .pain
            .iter()
            .map(|p| (p.date, pain_level(p.level) as f64))
            .collect();

        for session in &self.sessions {
            for level in [session.pain_before, session.pain_after].into_iter().flatten() {
                values.push((session.date, pain_level(level) as f64));
            }
        }

        values.sort_by_key(|(date, _)| *date);
        values.into_iter().map(|(_, v)| v).collect()
    }

    fn active_days(&self) -> usize {
        self.sessions.iter().map(|s| s.date).collect::<HashSet<_>>().len()
    }
}

/// One independently testable tip condition
pub trait TipRule: Send + Sync {
    fn id(&self) -> &'static str;

    /// The tip to show, or `None` when the condition does not hold
    fn evaluate(&self, ctx: &TipContext) -> Option<SmartTip>;
}

pub struct LowSleepRule;

impl TipRule for LowSleepRule {
    fn id(&self) -> &'static str {
        "low_sleep"
    }

    fn evaluate(&self, ctx: &TipContext) -> Option<SmartTip> {
        if ctx.sleep.len() < 3 {
            return None;
        }
        let avg = ctx.sleep.iter().map(|s| sleep_hours(s.total_hours)).mean();
        (avg < 6.5).then(|| {
            SmartTip::new(
                self.id(),
                format!(
                    "You're averaging {:.1}h of sleep this week. Tissue repair happens during deep sleep, aim for 7-8 hours.",
                    avg
                ),
                TipCategory::Sleep,
                1,
                "moon",
            )
        })
    }
}

pub struct LateBedtimeRule;

impl TipRule for LateBedtimeRule {
    fn id(&self) -> &'static str {
        "late_bedtime"
    }

    fn evaluate(&self, ctx: &TipContext) -> Option<SmartTip> {
        let late = ctx.sleep.iter().filter(|s| s.is_late_bedtime()).count();
        (late >= 3).then(|| {
            SmartTip::new(
                self.id(),
                format!(
                    "{} late nights this week. Going to bed before 23:00 helps inflammation settle.",
                    late
                ),
                TipCategory::Sleep,
                2,
                "clock",
            )
        })
    }
}

pub struct HighPainRule;

impl TipRule for HighPainRule {
    fn id(&self) -> &'static str {
        "high_pain"
    }

    fn evaluate(&self, ctx: &TipContext) -> Option<SmartTip> {
        let values = ctx.pooled_pain();
        if values.len() < 3 {
            return None;
        }
        let avg = values.iter().mean();
        (avg > 5.0).then(|| {
            SmartTip::new(
                self.id(),
                format!(
                    "Average pain is {:.1}/10 this week. Ease the intensity and mention it to your physiotherapist.",
                    avg
                ),
                TipCategory::Pain,
                1,
                "alert",
            )
        })
    }
}

pub struct PainRisingRule;

impl TipRule for PainRisingRule {
    fn id(&self) -> &'static str {
        "pain_rising"
    }

    fn evaluate(&self, ctx: &TipContext) -> Option<SmartTip> {
        let values = ctx.pooled_pain();
        if values.len() < 4 {
            return None;
        }
        let (first, second) = values.split_at(values.len() / 2);
        let rise = second.iter().mean() - first.iter().mean();
        (rise > 1.5).then(|| {
            SmartTip::new(
                self.id(),
                "Pain has been climbing over the last few days. Check your exercise load and rest if needed.",
                TipCategory::Pain,
                1,
                "trending-up",
            )
        })
    }
}

pub struct LowConsistencyRule;

impl TipRule for LowConsistencyRule {
    fn id(&self) -> &'static str {
        "low_consistency"
    }

    fn evaluate(&self, ctx: &TipContext) -> Option<SmartTip> {
        let active = ctx.active_days();
        (active < 4 && ctx.days_since_start > 14).then(|| {
            SmartTip::new(
                self.id(),
                format!(
                    "Only {} active days this week. Short daily sessions beat occasional long ones.",
                    active
                ),
                TipCategory::Exercise,
                2,
                "calendar",
            )
        })
    }
}

pub struct RomPlateauRule;

impl TipRule for RomPlateauRule {
    fn id(&self) -> &'static str {
        "rom_plateau"
    }

    fn evaluate(&self, ctx: &TipContext) -> Option<SmartTip> {
        if ctx.recent_rom.len() < 3 || ctx.days_since_start <= 30 {
            return None;
        }
        let recent = &ctx.recent_rom[ctx.recent_rom.len() - 3..];
        let deltas: Vec<f64> = recent
            .windows(2)
            .map(|pair| angle(pair[1].arc) - angle(pair[0].arc))
            .collect();
        let avg_delta = deltas.iter().mean();

        (avg_delta.abs() < 2.0).then(|| {
            let text = match &ctx.phase {
                Some(phase) => format!(
                    "Range of motion has levelled off. {} targets {}, ask your therapist about progressing stretches.",
                    phase.name, phase.target
                ),
                None => "Range of motion has levelled off. Ask your therapist about progressing stretches."
                    .to_string(),
            };
            SmartTip::new(self.id(), text, TipCategory::Progress, 2, "activity")
        })
    }
}

pub struct LowScoreRule;

impl TipRule for LowScoreRule {
    fn id(&self) -> &'static str {
        "low_score"
    }

    fn evaluate(&self, ctx: &TipContext) -> Option<SmartTip> {
        let total = ctx.score.value()?;
        (total < 40).then(|| {
            SmartTip::new(
                self.id(),
                format!(
                    "Today's recovery score is {}. A session and your supplements would lift it quickly.",
                    total
                ),
                TipCategory::Motivation,
                2,
                "gauge",
            )
        })
    }
}

pub struct StreakAlmostWeekRule;

impl TipRule for StreakAlmostWeekRule {
    fn id(&self) -> &'static str {
        "streak_almost_week"
    }

    fn evaluate(&self, ctx: &TipContext) -> Option<SmartTip> {
        (5..7).contains(&ctx.streak).then(|| {
            SmartTip::new(
                self.id(),
                format!(
                    "{} days in a row! {} more to complete a full week.",
                    ctx.streak,
                    7 - ctx.streak
                ),
                TipCategory::Motivation,
                3,
                "flame",
            )
        })
    }
}

pub struct NoSleepTodayRule;

impl TipRule for NoSleepTodayRule {
    fn id(&self) -> &'static str {
        "no_sleep_today"
    }

    fn evaluate(&self, ctx: &TipContext) -> Option<SmartTip> {
        let logged = ctx.sleep.iter().any(|s| s.date == ctx.today);
        (!logged).then(|| {
            SmartTip::new(
                self.id(),
                "Log last night's sleep to keep your recovery score accurate.",
                TipCategory::Sleep,
                3,
                "bed",
            )
        })
    }
}

pub struct NoRomTodayRule;

impl TipRule for NoRomTodayRule {
    fn id(&self) -> &'static str {
        "no_rom_today"
    }

    fn evaluate(&self, ctx: &TipContext) -> Option<SmartTip> {
        let measured = ctx.recent_rom.iter().any(|m| m.date == ctx.today);
        (!measured && ctx.days_since_start > 14).then(|| {
            SmartTip::new(
                self.id(),
                "No range-of-motion check yet today. A quick measurement keeps the forecast current.",
                TipCategory::Progress,
                3,
                "ruler",
            )
        })
    }
}

/// The built-in rule set, in evaluation order
pub fn default_rules() -> Vec<Box<dyn TipRule>> {
    vec![
        Box::new(LowSleepRule),
        Box::new(LateBedtimeRule),
        Box::new(HighPainRule),
        Box::new(PainRisingRule),
        Box::new(LowConsistencyRule),
        Box::new(RomPlateauRule),
        Box::new(StreakAlmostWeekRule),
        Box::new(NoSleepTodayRule),
        Box::new(NoRomTodayRule),
        Box::new(LowScoreRule),
    ]
}

pub struct SmartTipsEngine {
    rules: Vec<Box<dyn TipRule>>,
    max_tips: usize,
}

impl SmartTipsEngine {
    pub fn new() -> Self {
        Self::with_rules(default_rules())
    }

    pub fn with_rules(rules: Vec<Box<dyn TipRule>>) -> Self {
        SmartTipsEngine {
            rules,
            max_tips: MAX_TIPS,
        }
    }

    pub fn rule_ids(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.id()).collect()
    }

    /// Evaluate every rule and return the most urgent tips
    pub fn generate(&self, ctx: &TipContext) -> Vec<SmartTip> {
        let mut tips: Vec<SmartTip> = self.rules.iter().filter_map(|r| r.evaluate(ctx)).collect();
        debug!(matched = tips.len(), "Tip rules evaluated");

        // Vec::sort_by_key is stable, rule order breaks ties
        tips.sort_by_key(|t| t.priority);
        tips.truncate(self.max_tips);
        tips
    }
}

impl Default for SmartTipsEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::days_ago;
    use crate::models::MeasuredBy;
    use crate::protocol::RehabProtocol;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 8, 15).unwrap()
    }

    fn sleep(offset: u64, hours: f64, bed: &str) -> SleepLog {
        SleepLog {
            date: days_ago(today(), offset),
            total_hours: hours,
            bed_time: bed.to_string(),
        }
    }

    fn pain(offset: u64, level: u8) -> PainEntry {
        PainEntry {
            date: days_ago(today(), offset),
            level,
            crepitation: None,
            triggers: vec![],
            numbness_45: None,
        }
    }

    fn session(offset: u64) -> ExerciseSessionLog {
        ExerciseSessionLog {
            date: days_ago(today(), offset),
            session_slot: 1,
            exercise_id: "pronation".to_string(),
            pain_before: None,
            pain_after: None,
        }
    }

    fn rom(offset: u64, arc: f64) -> RomMeasurement {
        RomMeasurement::from_angles(days_ago(today(), offset), arc, 0.0, MeasuredBy::Manual)
    }

    struct FixedRule {
        id: &'static str,
        priority: u8,
    }

    impl TipRule for FixedRule {
        fn id(&self) -> &'static str {
            self.id
        }

        fn evaluate(&self, _ctx: &TipContext) -> Option<SmartTip> {
            Some(SmartTip::new(self.id, "fixed", TipCategory::Motivation, self.priority, "i"))
        }
    }

    #[test]
    fn test_cap_and_stable_priority_order() {
        let rules: Vec<Box<dyn TipRule>> = [("a", 3), ("b", 1), ("c", 2), ("d", 1), ("e", 2)]
            .into_iter()
            .map(|(id, priority)| Box::new(FixedRule { id, priority }) as Box<dyn TipRule>)
            .collect();
        let tips = SmartTipsEngine::with_rules(rules).generate(&TipContext::new(today()));

        assert_eq!(tips.len(), 3);
        let ids: Vec<&str> = tips.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "d", "c"]);
        assert_eq!(tips[0].priority, 1);
    }

    #[test]
    fn test_low_sleep_needs_three_nights() {
        let mut ctx = TipContext::new(today());
        ctx.sleep = vec![sleep(1, 5.0, "22:00"), sleep(2, 5.5, "22:00")];
        assert!(LowSleepRule.evaluate(&ctx).is_none());

        ctx.sleep.push(sleep(3, 7.0, "22:00"));
        assert!(LowSleepRule.evaluate(&ctx).is_some());
    }

    #[test]
    fn test_late_bedtime() {
        let mut ctx = TipContext::new(today());
        ctx.sleep = vec![
            sleep(1, 7.0, "23:30"),
            sleep(2, 7.0, "00:45"),
            sleep(3, 7.0, "22:00"),
        ];
        assert!(LateBedtimeRule.evaluate(&ctx).is_none());

        ctx.sleep.push(sleep(4, 7.0, "02:10"));
        assert_eq!(LateBedtimeRule.evaluate(&ctx).unwrap().priority, 2);
    }

    #[test]
    fn test_pain_pools_session_ratings() {
        let mut ctx = TipContext::new(today());
        ctx.pain = vec![pain(3, 6)];
        let mut s = session(2);
        s.pain_before = Some(6);
        s.pain_after = Some(7);
        ctx.sessions = vec![s];

        assert_eq!(ctx.pooled_pain(), vec![6.0, 6.0, 7.0]);
        assert!(HighPainRule.evaluate(&ctx).is_some());
    }

    #[test]
    fn test_pain_rising_halves() {
        let mut ctx = TipContext::new(today());
        ctx.pain = vec![pain(6, 2), pain(5, 2), pain(2, 4), pain(1, 5)];
        // first half 2.0, second half 4.5
        assert!(PainRisingRule.evaluate(&ctx).is_some());

        ctx.pain = vec![pain(6, 3), pain(5, 3), pain(2, 4), pain(1, 4)];
        assert!(PainRisingRule.evaluate(&ctx).is_none());

        ctx.pain = vec![pain(3, 1), pain(1, 9)];
        assert!(PainRisingRule.evaluate(&ctx).is_none());
    }

    #[test]
    fn test_low_consistency_waits_two_weeks() {
        let mut ctx = TipContext::new(today());
        ctx.sessions = vec![session(0), session(0), session(3)];
        ctx.days_since_start = 10;
        assert!(LowConsistencyRule.evaluate(&ctx).is_none());

        ctx.days_since_start = 15;
        assert!(LowConsistencyRule.evaluate(&ctx).is_some());
    }

    #[test]
    fn test_rom_plateau_mentions_phase() {
        let mut ctx = TipContext::new(today());
        ctx.days_since_start = 45;
        ctx.recent_rom = vec![rom(6, 95.0), rom(3, 96.0), rom(0, 97.5)];
        ctx.phase = Some(RehabProtocol::default().phases()[2].clone());

        let tip = RomPlateauRule.evaluate(&ctx).unwrap();
        assert!(tip.text.contains("Active range"));

        ctx.recent_rom = vec![rom(6, 90.0), rom(3, 95.0), rom(0, 100.0)];
        assert!(RomPlateauRule.evaluate(&ctx).is_none());
    }

    #[test]
    fn test_low_score_ignores_loading() {
        let mut ctx = TipContext::new(today());
        assert!(LowScoreRule.evaluate(&ctx).is_none());

        ctx.score = RecoveryScore {
            total: 25,
            sessions: 0,
            supplements: 0,
            sleep: 10,
            pain: 15,
            rom: 0,
            is_loading: false,
        };
        assert!(LowScoreRule.evaluate(&ctx).is_some());
    }

    #[test]
    fn test_default_engine_is_deterministic() {
        let mut ctx = TipContext::new(today());
        ctx.streak = 5;
        ctx.days_since_start = 20;
        ctx.sleep = vec![sleep(1, 5.0, "23:30"), sleep(2, 5.0, "23:30"), sleep(3, 5.0, "23:30")];

        let engine = SmartTipsEngine::new();
        let first = engine.generate(&ctx);
        assert_eq!(first, engine.generate(&ctx));
        assert_eq!(first.len(), 3);
        assert_eq!(first[0].id, "low_sleep");
        assert_eq!(engine.rule_ids().len(), 10);
    }
}

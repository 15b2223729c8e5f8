//! Recovery engine orchestration
//!
//! Runs the windowed Log Store queries, feeds the calculators, applies the
//! preference side effects in one transaction and publishes an
//! [`EngineSnapshot`].
//!
//! ```text
//! StoreChange ──► Subscription ──► refresh()
//!                                    │  token = issue()
//!                                    │  spawn_blocking(load_inputs)
//!                                    ▼
//!                                 commit(token, inputs)
//!                                    │  stale token → discard
//!                                    │  derive (pure)
//!                                    │  transaction: freezes + unlocks
//!                                    │  dispatch notifications
//!                                    ▼
//!                                 watch::Sender<EngineSnapshot>
//! ```
//!
//! Every derived value is recomputed from the logs on each pass. Only the
//! unlock set, XP and freeze state live in the Preference Store.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{watch, Notify};
use tracing::{debug, info, instrument, warn};

use crate::achievements::{AchievementEngine, AchievementMetrics, LevelInfo, UnlockEvent};
use crate::challenges::{ChallengeInput, DailyChallengeSelector, DailyChallenges};
use crate::config::ProgramConfig;
use crate::dates::{days_between, trailing_window, Clock, DateFilter};
use crate::error::{RehabError, Result};
use crate::forecast::{ForecastProjector, RecoveryForecast};
use crate::models::{
    ExerciseSessionLog, JournalEntry, MoodEntry, PainEntry, RomMeasurement, SleepLog,
    SupplementLog,
};
use crate::notify::{
    freeze_notices, pending_session_reminders, unlock_toasts, NotificationDispatcher,
    SessionReminder,
};
use crate::preferences::{NotificationSettings, PreferenceState};
use crate::protocol::{PhaseDef, RehabProtocol};
use crate::sanitize::{angle, sleep_hours};
use crate::score::{
    DayLogs, RecoveryScore, RecoveryScoreCalculator, SupplementCatalog, RESTFUL_SLEEP_HOURS,
};
use crate::store::{ChangeSignal, LogStore, LogStoreExt, QueryShape};
use crate::streak::{FreezeOutcome, FreezePolicy, StreakCalculator, StreakConfig, StreakStats};
use crate::tips::{SmartTip, SmartTipsEngine, TipContext};

/// Trailing window used by tips and weekly achievements
pub const WEEK_DAYS: u64 = 7;

/// ROM measurements handed to the plateau rule
pub const RECENT_ROM: usize = 3;

/// Program settings the engine evaluates against
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub surgery_date: Option<NaiveDate>,
    pub program_start: Option<NaiveDate>,
    pub supplement_catalog: SupplementCatalog,
    pub protocol: RehabProtocol,
    pub streak: StreakConfig,
}

impl EngineSettings {
    pub fn from_program(program: &ProgramConfig) -> Result<Self> {
        Ok(EngineSettings {
            surgery_date: program.surgery_date,
            program_start: program.program_start(),
            supplement_catalog: program.supplement_catalog(),
            protocol: program.protocol()?,
            streak: program.streak.clone(),
        })
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            surgery_date: None,
            program_start: None,
            supplement_catalog: SupplementCatalog::default(),
            protocol: RehabProtocol::default(),
            streak: StreakConfig::default(),
        }
    }
}

/// Identifies one recomputation; later tokens supersede earlier ones
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryToken(u64);

impl QueryToken {
    pub fn value(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Default)]
struct TokenTracker {
    latest: AtomicU64,
}

impl TokenTracker {
    fn issue(&self) -> QueryToken {
        QueryToken(self.latest.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn is_current(&self, token: QueryToken) -> bool {
        self.latest.load(Ordering::SeqCst) == token.0
    }
}

/// Raw query results for one recomputation
#[derive(Debug, Clone, PartialEq)]
pub struct EngineInputs {
    pub today: NaiveDate,
    pub now: NaiveDateTime,
    /// Sessions in the streak window
    pub sessions: Vec<ExerciseSessionLog>,
    /// Supplement logs of the trailing week
    pub supplements: Vec<SupplementLog>,
    /// Sleep logs of the trailing week
    pub sleep: Vec<SleepLog>,
    /// Pain entries of the trailing week
    pub pain: Vec<PainEntry>,
    /// Full ROM history, oldest first
    pub rom: Vec<RomMeasurement>,
    pub mood_today: Vec<MoodEntry>,
    pub journal_today: Vec<JournalEntry>,
}

impl EngineInputs {
    /// Today's slice of the scored record types
    pub fn day_logs(&self) -> DayLogs {
        let today = self.today;
        DayLogs {
            sessions: on_day(&self.sessions, today, |s| s.date),
            supplements: on_day(&self.supplements, today, |s| s.date),
            sleep: on_day(&self.sleep, today, |s| s.date),
            pain: on_day(&self.pain, today, |p| p.date),
            rom: on_day(&self.rom, today, |r| r.date),
        }
    }
}

fn on_day<T: Clone>(records: &[T], day: NaiveDate, date: impl Fn(&T) -> NaiveDate) -> Vec<T> {
    records.iter().filter(|r| date(r) == day).cloned().collect()
}

/// Streak figures as shown to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakSnapshot {
    pub streak: u32,
    pub display_streak: u32,
    pub frozen: bool,
    pub freezes_available: u32,
    pub total_sessions: u32,
    pub active_days: u32,
    pub has_today: bool,
}

/// Everything a UI needs after one recomputation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub today: NaiveDate,
    pub token: Option<QueryToken>,
    pub recovery_score: RecoveryScore,
    pub forecast: RecoveryForecast,
    pub phase: Option<PhaseDef>,
    pub tips: Vec<SmartTip>,
    pub challenges: DailyChallenges,
    pub challenge_completion: BTreeMap<String, bool>,
    pub streak: StreakSnapshot,
    /// Achievements unlocked by this recomputation only
    pub unlocks: Vec<UnlockEvent>,
    pub level: LevelInfo,
    pub reminders: Vec<SessionReminder>,
}

impl EngineSnapshot {
    /// Placeholder published before the first recomputation completes
    pub fn loading(today: NaiveDate) -> Self {
        EngineSnapshot {
            today,
            token: None,
            recovery_score: RecoveryScore::loading(),
            forecast: RecoveryForecast::unknown(),
            phase: None,
            tips: Vec::new(),
            challenges: DailyChallenges {
                date: today,
                challenges: Vec::new(),
            },
            challenge_completion: BTreeMap::new(),
            streak: StreakSnapshot {
                streak: 0,
                display_streak: 0,
                frozen: false,
                freezes_available: 0,
                total_sessions: 0,
                active_days: 0,
                has_today: false,
            },
            unlocks: Vec::new(),
            level: LevelInfo::from_xp(0),
            reminders: Vec::new(),
        }
    }

    pub fn is_loading(&self) -> bool {
        self.recovery_score.is_loading
    }
}

/// Pure results derived from one set of inputs
#[derive(Debug, Clone, PartialEq)]
pub struct Derived {
    pub stats: StreakStats,
    pub score: RecoveryScore,
    pub forecast: RecoveryForecast,
    pub phase: Option<PhaseDef>,
    pub tips: Vec<SmartTip>,
    pub challenges: DailyChallenges,
    pub metrics: AchievementMetrics,
    pub logged_slots: BTreeSet<u8>,
}

pub struct RecoveryEngine {
    store: Arc<dyn LogStore>,
    prefs: Arc<PreferenceState>,
    clock: Arc<dyn Clock>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    settings: EngineSettings,
    streaks: StreakCalculator,
    scores: RecoveryScoreCalculator,
    projector: ForecastProjector,
    tips: SmartTipsEngine,
    achievements: AchievementEngine,
    challenges: DailyChallengeSelector,
    freezes: FreezePolicy,
    breathing_done_on: Mutex<Option<NaiveDate>>,
    tokens: TokenTracker,
    refresh: Notify,
}

impl RecoveryEngine {
    pub fn new(
        store: Arc<dyn LogStore>,
        prefs: Arc<PreferenceState>,
        clock: Arc<dyn Clock>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        settings: EngineSettings,
    ) -> Self {
        RecoveryEngine {
            store,
            prefs,
            clock,
            dispatcher,
            streaks: StreakCalculator::with_config(settings.streak.clone()),
            scores: RecoveryScoreCalculator::new(settings.supplement_catalog.clone()),
            projector: ForecastProjector::new(),
            tips: SmartTipsEngine::new(),
            achievements: AchievementEngine::new(),
            challenges: DailyChallengeSelector::new(),
            freezes: FreezePolicy::new(settings.streak.replenish_every),
            settings,
            breathing_done_on: Mutex::new(None),
            tokens: TokenTracker::default(),
            refresh: Notify::new(),
        }
    }

    /// Replace the tips engine, e.g. with a custom rule set
    pub fn with_tips(mut self, tips: SmartTipsEngine) -> Self {
        self.tips = tips;
        self
    }

    pub fn preferences(&self) -> &PreferenceState {
        &self.prefs
    }

    pub fn store(&self) -> &Arc<dyn LogStore> {
        &self.store
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// Record whether today's breathing exercise is done and wake the loop
    pub fn set_breathing_done(&self, done: bool) {
        let today = self.clock.today();
        if let Ok(mut flag) = self.breathing_done_on.lock() {
            *flag = done.then_some(today);
        }
        debug!(done, %today, "Breathing flag updated");
        self.request_refresh();
    }

    pub fn breathing_done(&self, today: NaiveDate) -> bool {
        self.breathing_done_on
            .lock()
            .map(|flag| *flag == Some(today))
            .unwrap_or(false)
    }

    /// Ask a running loop to recompute without a store change
    pub fn request_refresh(&self) {
        self.refresh.notify_one();
    }

    /// Start a recomputation, superseding any in flight
    pub fn begin(&self) -> QueryToken {
        self.tokens.issue()
    }

    /// Run every windowed query for `today`
    pub fn load_inputs(&self, today: NaiveDate) -> Result<EngineInputs> {
        let week: DateFilter = trailing_window(today, WEEK_DAYS).into();
        let streak_window: DateFilter = self.streaks.window(today).into();

        Ok(EngineInputs {
            today,
            now: self.clock.now(),
            sessions: self.store.fetch(streak_window)?,
            supplements: self.store.fetch(week)?,
            sleep: self.store.fetch(week)?,
            pain: self.store.fetch(week)?,
            rom: self.store.fetch(DateFilter::All)?,
            mood_today: self.store.fetch(DateFilter::On(today))?,
            journal_today: self.store.fetch(DateFilter::On(today))?,
        })
    }

    /// Compute every pure result from one set of inputs
    pub fn derive(&self, inputs: &EngineInputs) -> Derived {
        let today = inputs.today;
        let day = inputs.day_logs();
        let week = trailing_window(today, WEEK_DAYS);

        let stats = self.streaks.calculate(&inputs.sessions, today);
        let score = self.scores.calculate(&day);

        let phase = self
            .settings
            .surgery_date
            .map(|surgery| self.settings.protocol.current_phase(surgery, today).clone());
        let forecast = self
            .projector
            .project(&inputs.rom, phase.as_ref().map(|p| p.target));

        let days_since_start = self
            .settings
            .program_start
            .map(|start| days_between(start, today))
            .unwrap_or(0);

        let recent_rom_start = inputs.rom.len().saturating_sub(RECENT_ROM);
        let tip_context = TipContext {
            today,
            sleep: inputs.sleep.clone(),
            pain: inputs.pain.clone(),
            sessions: inputs
                .sessions
                .iter()
                .filter(|s| week.contains(s.date))
                .cloned()
                .collect(),
            recent_rom: inputs.rom[recent_rom_start..].to_vec(),
            streak: stats.streak,
            score,
            days_since_start,
            phase: phase.clone(),
        };
        let tips = self.tips.generate(&tip_context);

        let mut challenge_input = ChallengeInput::from_day(&day, &self.settings.supplement_catalog);
        challenge_input.mood_today = !inputs.mood_today.is_empty();
        challenge_input.journal_today = !inputs.journal_today.is_empty();
        challenge_input.breathing_done = self.breathing_done(today);
        let challenges = self.challenges.evaluate(today, &challenge_input);

        let metrics = AchievementMetrics {
            is_loading: false,
            streak: stats.streak,
            total_sessions: stats.total_sessions,
            slots_today: day.distinct_session_slots(),
            supplements_complete_today: challenge_input.supplements_complete,
            full_supplement_days: self.full_supplement_days(inputs),
            rom_measurements: inputs.rom.len(),
            rom_today: !day.rom.is_empty(),
            max_flexion: inputs
                .rom
                .iter()
                .map(|m| angle(m.flexion))
                .fold(0.0, f64::max),
            restful_nights: restful_nights(&inputs.sleep),
            recovery_score: score.value(),
        };

        Derived {
            logged_slots: day.sessions.iter().map(|s| s.session_slot).collect(),
            stats,
            score,
            forecast,
            phase,
            tips,
            challenges,
            metrics,
        }
    }

    fn full_supplement_days(&self, inputs: &EngineInputs) -> u32 {
        let catalog = &self.settings.supplement_catalog;
        let mut by_day: BTreeMap<NaiveDate, Vec<&SupplementLog>> = BTreeMap::new();
        for log in &inputs.supplements {
            by_day.entry(log.date).or_default().push(log);
        }
        by_day
            .into_values()
            .filter(|logs| catalog.is_complete(logs.iter().copied()))
            .count() as u32
    }

    /// Apply side effects for a finished query and build the snapshot.
    ///
    /// Returns `None` when a newer recomputation has started since `token`
    /// was issued; its results are dropped without touching preferences.
    #[instrument(skip_all, fields(token = token.0, today = %inputs.today))]
    pub fn commit(&self, token: QueryToken, inputs: EngineInputs) -> Option<EngineSnapshot> {
        if !self.tokens.is_current(token) {
            debug!("Discarding stale query result");
            return None;
        }

        let derived = self.derive(&inputs);
        let now_utc = self.clock.now_utc();

        let (outcome, unlocks, prefs) = self.prefs.transaction(|prefs| {
            let outcome = self.freezes.apply(
                &derived.stats,
                inputs.today,
                &mut prefs.streak_freezes,
                &mut prefs.freeze_ledger,
            );
            let unlocks = self.achievements.apply(prefs, &derived.metrics, now_utc);
            (outcome, unlocks, prefs.clone())
        });

        self.notify(&outcome, prefs.streak_freezes, &unlocks, &prefs.notification_settings);

        info!(
            score = derived.score.total,
            streak = outcome.display_streak,
            unlocked = unlocks.len(),
            "Recomputed recovery state"
        );

        Some(EngineSnapshot {
            today: inputs.today,
            token: Some(token),
            recovery_score: derived.score,
            forecast: derived.forecast,
            phase: derived.phase,
            tips: derived.tips,
            challenge_completion: derived.challenges.completion(),
            challenges: derived.challenges,
            streak: StreakSnapshot {
                streak: derived.stats.streak,
                display_streak: outcome.display_streak,
                frozen: outcome.frozen,
                freezes_available: prefs.streak_freezes,
                total_sessions: derived.stats.total_sessions,
                active_days: derived.stats.active_days,
                has_today: derived.stats.has_today,
            },
            unlocks,
            level: LevelInfo::from_xp(prefs.total_xp),
            reminders: pending_session_reminders(
                &prefs.notification_settings,
                inputs.now,
                &derived.logged_slots,
            ),
        })
    }

    fn notify(
        &self,
        outcome: &FreezeOutcome,
        freezes_left: u32,
        unlocks: &[UnlockEvent],
        settings: &NotificationSettings,
    ) {
        if outcome.consumed {
            info!(freezes_left, "Streak freeze consumed");
        }
        if outcome.replenished {
            info!(freezes_left, "Streak freeze replenished");
        }

        for notification in freeze_notices(outcome, freezes_left)
            .into_iter()
            .chain(unlock_toasts(unlocks, settings))
        {
            self.dispatcher.dispatch(&notification);
        }
    }

    /// Recompute synchronously on the caller's thread
    pub fn recompute(&self) -> Result<EngineSnapshot> {
        let token = self.begin();
        let inputs = self.load_inputs(self.clock.today())?;
        self.commit(token, inputs).ok_or_else(|| {
            RehabError::Internal("recomputation superseded by a newer one".to_string())
        })
    }

    /// Recompute with the store queries on the blocking pool
    pub async fn refresh(self: &Arc<Self>) -> Result<Option<EngineSnapshot>> {
        let token = self.begin();
        let today = self.clock.today();
        let engine = Arc::clone(self);

        let inputs = tokio::task::spawn_blocking(move || engine.load_inputs(today))
            .await
            .map_err(|e| RehabError::Internal(format!("query task failed: {}", e)))??;

        Ok(self.commit(token, inputs))
    }

    /// Recompute on every relevant store change until `shutdown` resolves or
    /// the store goes away.
    ///
    /// A loading snapshot is published first. Bursts of changes are
    /// collapsed into one recomputation; a failed recomputation keeps the
    /// previous snapshot.
    pub async fn run(
        self: Arc<Self>,
        snapshots: watch::Sender<EngineSnapshot>,
        shutdown: impl Future<Output = ()>,
    ) {
        let mut changes = self.store.watch(QueryShape::everything());
        snapshots.send_replace(EngineSnapshot::loading(self.clock.today()));
        tokio::pin!(shutdown);

        info!("Recovery engine started");
        self.publish(&snapshots).await;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Recovery engine shutting down");
                    break;
                }
                change = changes.next() => match change {
                    Some(ChangeSignal::Changed(change)) => {
                        debug!(record_type = %change.record_type, date = %change.date, "Log store changed");
                        while changes.try_next().is_some() {}
                    }
                    Some(ChangeSignal::Resync { skipped }) => {
                        debug!(skipped, "Resyncing after missed changes");
                        while changes.try_next().is_some() {}
                    }
                    None => {
                        info!("Log store closed, stopping engine");
                        break;
                    }
                },
                _ = self.refresh.notified() => {
                    debug!("Refresh requested");
                }
            }

            self.publish(&snapshots).await;
        }
    }

    async fn publish(self: &Arc<Self>, snapshots: &watch::Sender<EngineSnapshot>) {
        match self.refresh().await {
            Ok(Some(snapshot)) => {
                snapshots.send_replace(snapshot);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Recomputation failed, keeping previous snapshot"),
        }
    }
}

/// Distinct dates with a night of at least seven hours
fn restful_nights(sleep: &[SleepLog]) -> u32 {
    sleep
        .iter()
        .filter(|s| sleep_hours(s.total_hours) >= RESTFUL_SLEEP_HOURS)
        .map(|s| s.date)
        .collect::<BTreeSet<_>>()
        .len() as u32
}

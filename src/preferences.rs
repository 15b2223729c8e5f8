//! Persistent Preference Store
//!
//! Holds the small amount of durable state the engine owns (unlocked
//! achievements, XP, streak freezes and their idempotency ledger) next to
//! user settings. [`PreferenceState`] is the only way to mutate it: every
//! read-decide-write cycle runs inside [`PreferenceState::transaction`] under
//! one lock, so rapid recomputations cannot double-unlock or double-spend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::error::PreferenceError;
use crate::streak::FreezeLedger;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    #[default]
    System,
}

/// Reminder preferences consumed by the notification planner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    pub enabled: bool,
    /// Local "HH:MM" time of each of the five daily sessions
    pub session_times: Vec<String>,
    pub achievement_toasts: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        NotificationSettings {
            enabled: true,
            session_times: ["08:00", "11:00", "14:00", "17:00", "20:00"]
                .iter()
                .map(|t| t.to_string())
                .collect(),
            achievement_toasts: true,
        }
    }
}

/// Everything kept in the Preference Store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Preferences {
    pub theme: Theme,
    pub onboarding_done: bool,
    /// Achievement id to first-unlock instant; entries are never removed
    pub unlocked_achievements: BTreeMap<String, DateTime<Utc>>,
    pub total_xp: u32,
    pub streak_freezes: u32,
    pub notification_settings: NotificationSettings,
    pub freeze_ledger: FreezeLedger,
}

/// User-editable subset of [`Preferences`].
///
/// Engine-owned fields (unlocks, XP, freezes) are changed only through
/// [`PreferenceState::transaction`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreferencePatch {
    pub theme: Option<Theme>,
    pub onboarding_done: Option<bool>,
    pub notification_settings: Option<NotificationSettings>,
}

impl PreferencePatch {
    fn apply(self, prefs: &mut Preferences) {
        if let Some(theme) = self.theme {
            prefs.theme = theme;
        }
        if let Some(done) = self.onboarding_done {
            prefs.onboarding_done = done;
        }
        if let Some(settings) = self.notification_settings {
            prefs.notification_settings = settings;
        }
    }
}

/// Durable backing for [`Preferences`]
pub trait PreferenceStore: Send + Sync {
    /// Previously saved preferences, `None` on first run
    fn load(&self) -> Result<Option<Preferences>, PreferenceError>;

    fn save(&self, prefs: &Preferences) -> Result<(), PreferenceError>;
}

impl<T: PreferenceStore + ?Sized> PreferenceStore for Arc<T> {
    fn load(&self) -> Result<Option<Preferences>, PreferenceError> {
        (**self).load()
    }

    fn save(&self, prefs: &Preferences) -> Result<(), PreferenceError> {
        (**self).save(prefs)
    }
}

/// Preferences kept as a JSON document on disk
#[derive(Debug, Clone)]
pub struct JsonFilePreferenceStore {
    path: PathBuf,
}

impl JsonFilePreferenceStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        JsonFilePreferenceStore {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PreferenceStore for JsonFilePreferenceStore {
    fn load(&self) -> Result<Option<Preferences>, PreferenceError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn save(&self, prefs: &Preferences) -> Result<(), PreferenceError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write then rename so a crash never leaves a half-written file
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(prefs)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// In-memory store, mainly for tests
#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    saved: Mutex<Option<Preferences>>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_preferences(prefs: Preferences) -> Self {
        MemoryPreferenceStore {
            saved: Mutex::new(Some(prefs)),
        }
    }

    /// Last saved snapshot
    pub fn saved(&self) -> Option<Preferences> {
        self.saved.lock().ok().and_then(|s| s.clone())
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn load(&self) -> Result<Option<Preferences>, PreferenceError> {
        Ok(self.saved())
    }

    fn save(&self, prefs: &Preferences) -> Result<(), PreferenceError> {
        if let Ok(mut saved) = self.saved.lock() {
            *saved = Some(prefs.clone());
        }
        Ok(())
    }
}

/// Store used when no durable storage is available; saves are dropped
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPreferenceStore;

impl PreferenceStore for NoopPreferenceStore {
    fn load(&self) -> Result<Option<Preferences>, PreferenceError> {
        Ok(None)
    }

    fn save(&self, _prefs: &Preferences) -> Result<(), PreferenceError> {
        Ok(())
    }
}

/// Shared, transactional handle on the current preferences
pub struct PreferenceState {
    store: Box<dyn PreferenceStore>,
    current: Mutex<Preferences>,
}

impl PreferenceState {
    /// Load preferences from the store, falling back to defaults when the
    /// store is unreadable
    pub fn open(store: Box<dyn PreferenceStore>) -> Self {
        let current = match store.load() {
            Ok(Some(prefs)) => prefs,
            Ok(None) => Preferences::default(),
            Err(e) => {
                warn!(error = %e, "Preference store unavailable, using defaults");
                Preferences::default()
            }
        };

        PreferenceState {
            store,
            current: Mutex::new(current),
        }
    }

    /// Session-only preferences
    pub fn in_memory() -> Self {
        Self::open(Box::new(NoopPreferenceStore))
    }

    fn lock(&self) -> MutexGuard<'_, Preferences> {
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of the current preferences
    pub fn get(&self) -> Preferences {
        self.lock().clone()
    }

    /// Apply a user settings patch
    pub fn set(&self, patch: PreferencePatch) {
        self.transaction(|prefs| patch.apply(prefs));
    }

    /// Run a read-decide-write cycle under the single writer lock.
    ///
    /// The closure works on a copy; the copy is committed and persisted only
    /// if it differs from the current state. A failed save keeps the new
    /// state in memory and logs a warning.
    pub fn transaction<R>(&self, f: impl FnOnce(&mut Preferences) -> R) -> R {
        let mut guard = self.lock();
        let mut draft = guard.clone();
        let result = f(&mut draft);

        if draft != *guard {
            if let Err(e) = self.store.save(&draft) {
                warn!(error = %e, "Failed to persist preferences, keeping them for this session");
            } else {
                debug!("Preferences persisted");
            }
            *guard = draft;
        }

        result
    }
}

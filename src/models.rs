use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::StoreError;
use crate::sanitize::finite_or_zero;

/// Number of scheduled exercise sessions per day
pub const SESSION_SLOTS: u8 = 5;

/// Identifier assigned by the Log Store when a record is added
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(Uuid);

impl RecordId {
    pub fn new() -> Self {
        RecordId(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        Uuid::parse_str(s)
            .map(RecordId)
            .map_err(|e| StoreError::InvalidRecord {
                reason: format!("bad record id '{}': {}", s, e),
            })
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kinds of records held by the Log Store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    ExerciseSession,
    Supplement,
    Sleep,
    Rom,
    Pain,
    Mood,
    Journal,
}

impl RecordType {
    pub const ALL: [RecordType; 7] = [
        RecordType::ExerciseSession,
        RecordType::Supplement,
        RecordType::Sleep,
        RecordType::Rom,
        RecordType::Pain,
        RecordType::Mood,
        RecordType::Journal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::ExerciseSession => "exercise_session",
            RecordType::Supplement => "supplement",
            RecordType::Sleep => "sleep",
            RecordType::Rom => "rom",
            RecordType::Pain => "pain",
            RecordType::Mood => "mood",
            RecordType::Journal => "journal",
        }
    }
}

impl std::str::FromStr for RecordType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecordType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| StoreError::InvalidRecord {
                reason: format!("unknown record type '{}'", s),
            })
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supplement timing buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupplementSlot {
    Fasting,
    Breakfast,
    Lunch,
    Dinner,
    Bedtime,
}

impl std::str::FromStr for SupplementSlot {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fasting" => Ok(SupplementSlot::Fasting),
            "breakfast" => Ok(SupplementSlot::Breakfast),
            "lunch" => Ok(SupplementSlot::Lunch),
            "dinner" => Ok(SupplementSlot::Dinner),
            "bedtime" => Ok(SupplementSlot::Bedtime),
            _ => Err(format!("Invalid supplement slot: {}", s)),
        }
    }
}

/// Who took a range-of-motion measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MeasuredBy {
    #[default]
    Manual,
    Camera,
    Therapist,
}

impl std::str::FromStr for MeasuredBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "manual" | "self" => Ok(MeasuredBy::Manual),
            "camera" => Ok(MeasuredBy::Camera),
            "therapist" | "pt" => Ok(MeasuredBy::Therapist),
            _ => Err(format!("Invalid measurement source: {}", s)),
        }
    }
}

/// One exercise performed within a scheduled daily session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseSessionLog {
    pub date: NaiveDate,
    /// Scheduled session this exercise belongs to (1..=5)
    pub session_slot: u8,
    pub exercise_id: String,
    pub pain_before: Option<u8>,
    pub pain_after: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplementLog {
    pub date: NaiveDate,
    pub slot: SupplementSlot,
    pub supplement_id: String,
    pub taken: bool,
    pub taken_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepLog {
    pub date: NaiveDate,
    pub total_hours: f64,
    /// Local bedtime as "HH:MM"
    pub bed_time: String,
}

impl SleepLog {
    /// Hour component of the bedtime, `None` when unparseable
    pub fn bed_hour(&self) -> Option<u32> {
        NaiveTime::parse_from_str(self.bed_time.trim(), "%H:%M")
            .ok()
            .map(|t| t.hour())
    }

    /// Bedtime falls between 23:00 and 06:00
    pub fn is_late_bedtime(&self) -> bool {
        matches!(self.bed_hour(), Some(h) if h >= 23 || h < 6)
    }
}

/// Elbow range-of-motion measurement, angles in degrees
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RomMeasurement {
    pub date: NaiveDate,
    /// Total arc: flexion minus extension deficit
    pub arc: f64,
    pub flexion: f64,
    pub extension_deficit: f64,
    pub pronation: Option<f64>,
    pub supination: Option<f64>,
    pub measured_by: MeasuredBy,
}

impl RomMeasurement {
    /// Build a measurement from flexion and extension deficit, deriving the arc
    pub fn from_angles(
        date: NaiveDate,
        flexion: f64,
        extension_deficit: f64,
        measured_by: MeasuredBy,
    ) -> Self {
        RomMeasurement {
            date,
            arc: flexion - extension_deficit,
            flexion,
            extension_deficit,
            pronation: None,
            supination: None,
            measured_by,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PainEntry {
    pub date: NaiveDate,
    /// 0 (none) to 10 (worst)
    pub level: u8,
    pub crepitation: Option<bool>,
    #[serde(default)]
    pub triggers: Vec<String>,
    pub numbness_45: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoodEntry {
    pub date: NaiveDate,
    /// 1..=5
    pub mood: u8,
    /// 1..=5
    pub energy: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub date: NaiveDate,
    pub text: String,
}

/// Any record the Log Store can hold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogRecord {
    ExerciseSession(ExerciseSessionLog),
    Supplement(SupplementLog),
    Sleep(SleepLog),
    Rom(RomMeasurement),
    Pain(PainEntry),
    Mood(MoodEntry),
    Journal(JournalEntry),
}

impl LogRecord {
    pub fn record_type(&self) -> RecordType {
        match self {
            LogRecord::ExerciseSession(_) => RecordType::ExerciseSession,
            LogRecord::Supplement(_) => RecordType::Supplement,
            LogRecord::Sleep(_) => RecordType::Sleep,
            LogRecord::Rom(_) => RecordType::Rom,
            LogRecord::Pain(_) => RecordType::Pain,
            LogRecord::Mood(_) => RecordType::Mood,
            LogRecord::Journal(_) => RecordType::Journal,
        }
    }

    pub fn date(&self) -> NaiveDate {
        match self {
            LogRecord::ExerciseSession(r) => r.date,
            LogRecord::Supplement(r) => r.date,
            LogRecord::Sleep(r) => r.date,
            LogRecord::Rom(r) => r.date,
            LogRecord::Pain(r) => r.date,
            LogRecord::Mood(r) => r.date,
            LogRecord::Journal(r) => r.date,
        }
    }

    /// Structural checks applied before a record enters the store.
    ///
    /// Out-of-range measurements (angles, hours, pain) are accepted here and
    /// clamped when read; only values that make the record meaningless are
    /// rejected.
    pub fn validate(&self) -> Result<(), StoreError> {
        let invalid = |reason: String| Err(StoreError::InvalidRecord { reason });

        match self {
            LogRecord::ExerciseSession(s) => {
                if s.session_slot == 0 || s.session_slot > SESSION_SLOTS {
                    return invalid(format!(
                        "session slot {} outside 1..={}",
                        s.session_slot, SESSION_SLOTS
                    ));
                }
                if s.exercise_id.trim().is_empty() {
                    return invalid("exercise id is empty".to_string());
                }
            }
            LogRecord::Supplement(s) if s.supplement_id.trim().is_empty() => {
                return invalid("supplement id is empty".to_string());
            }
            LogRecord::Mood(m) => {
                if !(1..=5).contains(&m.mood) || !(1..=5).contains(&m.energy) {
                    return invalid(format!(
                        "mood {} / energy {} outside 1..=5",
                        m.mood, m.energy
                    ));
                }
            }
            _ => {}
        }

        Ok(())
    }

    /// Replace NaN and infinite measurements with 0.
    ///
    /// JSON has no encoding for non-finite numbers, so stores call this before
    /// persisting a record.
    pub fn sanitized(self) -> LogRecord {
        match self {
            LogRecord::Sleep(mut s) => {
                s.total_hours = finite_or_zero(s.total_hours);
                LogRecord::Sleep(s)
            }
            LogRecord::Rom(mut m) => {
                m.arc = finite_or_zero(m.arc);
                m.flexion = finite_or_zero(m.flexion);
                m.extension_deficit = finite_or_zero(m.extension_deficit);
                m.pronation = m.pronation.map(finite_or_zero);
                m.supination = m.supination.map(finite_or_zero);
                LogRecord::Rom(m)
            }
            other => other,
        }
    }

    /// Apply a partial JSON object on top of this record.
    ///
    /// The record kind and its date are fixed at creation time; a patch that
    /// changes either is rejected.
    pub fn with_patch(&self, patch: &serde_json::Value) -> Result<LogRecord, StoreError> {
        let patch = patch.as_object().ok_or_else(|| StoreError::InvalidRecord {
            reason: "patch must be a JSON object".to_string(),
        })?;

        let mut current = serde_json::to_value(self)?;
        let fields = current
            .as_object_mut()
            .ok_or_else(|| StoreError::InvalidRecord {
                reason: "record did not serialize to an object".to_string(),
            })?;

        for (key, value) in patch {
            if (key == "date" || key == "type") && fields.get(key) != Some(value) {
                return Err(StoreError::ImmutableField { field: key.clone() });
            }
            fields.insert(key.clone(), value.clone());
        }

        let updated = serde_json::from_value::<LogRecord>(current)?.sanitized();
        updated.validate()?;
        Ok(updated)
    }
}

/// Typed view over one kind of [`LogRecord`]
pub trait Record: Clone + Sized {
    const TYPE: RecordType;

    fn date(&self) -> NaiveDate;

    fn from_log(record: LogRecord) -> Option<Self>;

    fn into_log(self) -> LogRecord;
}

macro_rules! impl_record {
    ($ty:ty, $variant:ident, $record_type:expr) => {
        impl Record for $ty {
            const TYPE: RecordType = $record_type;

            fn date(&self) -> NaiveDate {
                self.date
            }

            fn from_log(record: LogRecord) -> Option<Self> {
                match record {
                    LogRecord::$variant(r) => Some(r),
                    _ => None,
                }
            }

            fn into_log(self) -> LogRecord {
                LogRecord::$variant(self)
            }
        }

        impl From<$ty> for LogRecord {
            fn from(record: $ty) -> Self {
                LogRecord::$variant(record)
            }
        }
    };
}

impl_record!(ExerciseSessionLog, ExerciseSession, RecordType::ExerciseSession);
impl_record!(SupplementLog, Supplement, RecordType::Supplement);
impl_record!(SleepLog, Sleep, RecordType::Sleep);
impl_record!(RomMeasurement, Rom, RecordType::Rom);
impl_record!(PainEntry, Pain, RecordType::Pain);
impl_record!(MoodEntry, Mood, RecordType::Mood);
impl_record!(JournalEntry, Journal, RecordType::Journal);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn test_record_type_round_trip_through_str() {
        for t in RecordType::ALL {
            assert_eq!(t.as_str().parse::<RecordType>().unwrap(), t);
        }
        assert!("workout".parse::<RecordType>().is_err());
    }

    #[test]
    fn test_rom_arc_from_angles() {
        let m = RomMeasurement::from_angles(date(1), 120.0, 25.0, MeasuredBy::Manual);
        assert_eq!(m.arc, 95.0);
    }

    #[test]
    fn test_late_bedtime_window() {
        let mut sleep = SleepLog {
            date: date(1),
            total_hours: 7.0,
            bed_time: "23:15".to_string(),
        };
        assert!(sleep.is_late_bedtime());

        sleep.bed_time = "01:30".to_string();
        assert!(sleep.is_late_bedtime());

        sleep.bed_time = "22:59".to_string();
        assert!(!sleep.is_late_bedtime());

        sleep.bed_time = "06:00".to_string();
        assert!(!sleep.is_late_bedtime());

        sleep.bed_time = "late".to_string();
        assert!(!sleep.is_late_bedtime());
    }

    #[test]
    fn test_session_slot_validation() {
        let record = LogRecord::ExerciseSession(ExerciseSessionLog {
            date: date(1),
            session_slot: 6,
            exercise_id: "wrist_flex".to_string(),
            pain_before: None,
            pain_after: None,
        });
        assert!(matches!(
            record.validate(),
            Err(StoreError::InvalidRecord { .. })
        ));
    }

    #[test]
    fn test_patch_updates_fields_but_not_date() {
        let record = LogRecord::Sleep(SleepLog {
            date: date(2),
            total_hours: 6.0,
            bed_time: "22:30".to_string(),
        });

        let updated = record.with_patch(&json!({ "total_hours": 7.5 })).unwrap();
        match updated {
            LogRecord::Sleep(s) => {
                assert_eq!(s.total_hours, 7.5);
                assert_eq!(s.date, date(2));
            }
            other => panic!("unexpected record {:?}", other),
        }

        let err = record.with_patch(&json!({ "date": "2024-03-05" })).unwrap_err();
        assert!(matches!(err, StoreError::ImmutableField { .. }));

        // Re-sending the same date is not a change
        assert!(record.with_patch(&json!({ "date": "2024-03-02" })).is_ok());
    }

    #[test]
    fn test_sanitized_zeroes_non_finite_measurements() {
        let mut rom = RomMeasurement::from_angles(date(4), f64::NAN, 10.0, MeasuredBy::Manual);
        rom.supination = Some(f64::INFINITY);
        match LogRecord::Rom(rom).sanitized() {
            LogRecord::Rom(m) => {
                assert_eq!(m.arc, 0.0);
                assert_eq!(m.flexion, 0.0);
                assert_eq!(m.extension_deficit, 10.0);
                assert_eq!(m.supination, Some(0.0));
                assert_eq!(m.pronation, None);
            }
            other => panic!("unexpected record {:?}", other),
        }

        let sleep = LogRecord::Sleep(SleepLog {
            date: date(4),
            total_hours: f64::NEG_INFINITY,
            bed_time: "22:00".to_string(),
        });
        let json = serde_json::to_string(&sleep.sanitized()).unwrap();
        let back: LogRecord = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, LogRecord::Sleep(s) if s.total_hours == 0.0));
    }

    #[test]
    fn test_typed_conversion() {
        let entry = PainEntry {
            date: date(3),
            level: 4,
            crepitation: None,
            triggers: vec!["lifting".to_string()],
            numbness_45: Some(false),
        };
        let log: LogRecord = entry.clone().into();
        assert_eq!(log.record_type(), RecordType::Pain);
        assert_eq!(PainEntry::from_log(log.clone()), Some(entry));
        assert_eq!(SleepLog::from_log(log), None);
    }
}

use chrono::NaiveDate;
use rehabrs::dates::{DateFilter, FixedClock};
use rehabrs::engine::{EngineSettings, RecoveryEngine};
use rehabrs::error::StoreError;
use rehabrs::models::{
    LogRecord, MeasuredBy, MoodEntry, RecordType, RomMeasurement, SleepLog, SupplementLog,
    SupplementSlot,
};
use rehabrs::notify::TracingDispatcher;
use rehabrs::preferences::PreferenceState;
use rehabrs::store::{
    ChangeSignal, LogStore, LogStoreExt, MemoryLogStore, QueryShape, SqliteLogStore,
};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

// Log store contract tests, run against both backends

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 8, d).unwrap()
}

fn supplement(d: u32, id: &str) -> LogRecord {
    LogRecord::Supplement(SupplementLog {
        date: day(d),
        slot: SupplementSlot::Breakfast,
        supplement_id: id.to_string(),
        taken: true,
        taken_at: day(d).and_hms_opt(8, 15, 0),
    })
}

fn rom(d: u32, flexion: f64) -> LogRecord {
    LogRecord::Rom(RomMeasurement::from_angles(
        day(d),
        flexion,
        15.0,
        MeasuredBy::Camera,
    ))
}

fn assert_store_contract(store: &dyn LogStore) {
    store.add(supplement(3, "vitamin_c")).unwrap();
    store.add(supplement(1, "collagen")).unwrap();
    store.add(supplement(3, "vitamin_d")).unwrap();
    store.add(rom(2, 95.0)).unwrap();

    // Ordered by date, then insertion order within a date
    let all: Vec<SupplementLog> = store.fetch(DateFilter::All).unwrap();
    let ids: Vec<&str> = all.iter().map(|s| s.supplement_id.as_str()).collect();
    assert_eq!(ids, ["collagen", "vitamin_c", "vitamin_d"]);

    let on_day: Vec<SupplementLog> = store.fetch(DateFilter::On(day(3))).unwrap();
    assert_eq!(on_day.len(), 2);

    let range: Vec<SupplementLog> = store.fetch(DateFilter::Between(day(1), day(2))).unwrap();
    assert_eq!(range.len(), 1);

    let measurements: Vec<RomMeasurement> = store.fetch(DateFilter::All).unwrap();
    assert_eq!(measurements.len(), 1);
    assert_eq!(measurements[0].arc, 80.0);

    let invalid = LogRecord::Mood(MoodEntry {
        date: day(4),
        mood: 0,
        energy: 3,
    });
    assert!(matches!(
        store.add(invalid),
        Err(StoreError::InvalidRecord { .. })
    ));
}

#[test]
fn test_memory_store_contract() {
    assert_store_contract(&MemoryLogStore::new());
}

#[test]
fn test_sqlite_store_contract() {
    assert_store_contract(&SqliteLogStore::open_in_memory().unwrap());
}

#[test]
fn test_sqlite_records_persist_across_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("logs.db");

    let id = {
        let store = SqliteLogStore::open(&path).unwrap();
        store.add(rom(5, 100.0)).unwrap();
        store.add(supplement(5, "omega_3")).unwrap()
    };

    let reopened = SqliteLogStore::open(&path).unwrap();
    assert_eq!(reopened.count().unwrap(), 2);

    reopened.update(id, json!({ "taken": false })).unwrap();
    let logs: Vec<SupplementLog> = reopened.fetch(DateFilter::On(day(5))).unwrap();
    assert!(!logs[0].taken);
}

#[test]
fn test_sqlite_update_rejects_unknown_id_and_date_change() {
    let store = SqliteLogStore::open_in_memory().unwrap();
    let id = store.add(rom(6, 90.0)).unwrap();

    assert!(matches!(
        store.update(id, json!({ "date": "2024-08-07" })),
        Err(StoreError::ImmutableField { .. })
    ));

    let other = rehabrs::models::RecordId::new();
    assert!(matches!(
        store.update(other, json!({ "flexion": 91.0 })),
        Err(StoreError::NotFound { .. })
    ));
}

#[test]
fn test_sqlite_change_feed_respects_shape() {
    let store = SqliteLogStore::open_in_memory().unwrap();
    let mut rom_changes = store.watch(QueryShape::new([RecordType::Rom], DateFilter::All));

    store.add(supplement(8, "magnesium")).unwrap();
    assert!(rom_changes.try_next().is_none());

    store.add(rom(8, 105.0)).unwrap();
    let change = rom_changes
        .try_next()
        .and_then(ChangeSignal::into_change)
        .unwrap();
    assert_eq!(change.record_type, RecordType::Rom);
    assert_eq!(change.date, day(8));
}

#[test]
fn test_engine_over_sqlite_store() {
    let dir = TempDir::new().unwrap();
    let store = SqliteLogStore::open(dir.path().join("logs.db")).unwrap();
    store.add(rom(1, 85.0)).unwrap();
    store.add(rom(8, 95.0)).unwrap();

    let engine = RecoveryEngine::new(
        Arc::new(store),
        Arc::new(PreferenceState::in_memory()),
        Arc::new(FixedClock::at_date(day(8))),
        Arc::new(TracingDispatcher),
        EngineSettings::default(),
    );

    let snapshot = engine.recompute().unwrap();
    assert_eq!(snapshot.forecast.current_arc, Some(80.0));
    assert_eq!(snapshot.forecast.weekly_gain, 10.0);
    assert_eq!(snapshot.forecast.measurements, 2);
    assert!(snapshot.phase.is_none());
    assert!(snapshot
        .unlocks
        .iter()
        .any(|u| u.id == "first_rom" || u.id == "flexion_90"));
}

fn assert_non_finite_values_are_zeroed(store: Arc<dyn LogStore>) {
    let mut measurement = RomMeasurement::from_angles(day(9), f64::NAN, 15.0, MeasuredBy::Manual);
    measurement.pronation = Some(f64::INFINITY);
    store.add(LogRecord::Rom(measurement)).unwrap();
    store
        .add(LogRecord::Sleep(SleepLog {
            date: day(9),
            total_hours: f64::NAN,
            bed_time: "23:10".to_string(),
        }))
        .unwrap();

    let measurements: Vec<RomMeasurement> = store.fetch(DateFilter::All).unwrap();
    assert_eq!(measurements[0].arc, 0.0);
    assert_eq!(measurements[0].flexion, 0.0);
    assert_eq!(measurements[0].pronation, Some(0.0));

    let nights: Vec<SleepLog> = store.fetch(DateFilter::On(day(9))).unwrap();
    assert_eq!(nights[0].total_hours, 0.0);

    let engine = RecoveryEngine::new(
        store,
        Arc::new(PreferenceState::in_memory()),
        Arc::new(FixedClock::at_date(day(9))),
        Arc::new(TracingDispatcher),
        EngineSettings::default(),
    );
    let snapshot = engine.recompute().unwrap();
    assert_eq!(snapshot.forecast.current_arc, Some(0.0));
}

#[test]
fn test_memory_store_zeroes_non_finite_values() {
    assert_non_finite_values_are_zeroed(Arc::new(MemoryLogStore::new()));
}

#[test]
fn test_sqlite_store_zeroes_non_finite_values() {
    assert_non_finite_values_are_zeroed(Arc::new(SqliteLogStore::open_in_memory().unwrap()));
}

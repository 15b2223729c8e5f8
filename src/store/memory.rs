use std::collections::BTreeMap;
use std::sync::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

use super::{ChangeKind, LogQuery, LogStore, StoreChange, CHANGE_CHANNEL_CAPACITY};
use crate::error::StoreError;
use crate::models::{LogRecord, RecordId};

struct StoredRecord {
    /// Insertion sequence, breaks ties between records on the same date
    seq: u64,
    record: LogRecord,
}

#[derive(Default)]
struct Inner {
    records: BTreeMap<RecordId, StoredRecord>,
    next_seq: u64,
}

/// In-process Log Store, used by tests and as a scratch store
pub struct MemoryLogStore {
    inner: RwLock<Inner>,
    changes: broadcast::Sender<StoreChange>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        MemoryLogStore {
            inner: RwLock::new(Inner::default()),
            changes,
        }
    }

    /// Store pre-populated with records, without emitting change events
    pub fn with_records(records: impl IntoIterator<Item = LogRecord>) -> Self {
        let store = Self::new();
        if let Ok(mut inner) = store.inner.write() {
            for record in records {
                let seq = inner.next_seq;
                inner.next_seq += 1;
                inner.records.insert(
                    RecordId::new(),
                    StoredRecord {
                        seq,
                        record: record.sanitized(),
                    },
                );
            }
        }
        store
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|i| i.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn emit(&self, change: StoreChange) {
        // No subscribers is fine
        let _ = self.changes.send(change);
    }
}

impl Default for MemoryLogStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LogStore for MemoryLogStore {
    fn query(&self, query: &LogQuery) -> Result<Vec<LogRecord>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;

        let mut matches: Vec<&StoredRecord> = inner
            .records
            .values()
            .filter(|stored| {
                stored.record.record_type() == query.record_type
                    && query.filter.matches(stored.record.date())
            })
            .collect();
        matches.sort_by_key(|stored| (stored.record.date(), stored.seq));

        Ok(matches.into_iter().map(|s| s.record.clone()).collect())
    }

    fn add(&self, record: LogRecord) -> Result<RecordId, StoreError> {
        let record = record.sanitized();
        record.validate()?;

        let id = RecordId::new();
        let change = StoreChange {
            id,
            record_type: record.record_type(),
            date: record.date(),
            kind: ChangeKind::Added,
        };

        {
            let mut inner = self.inner.write().map_err(|_| StoreError::Poisoned)?;
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.records.insert(id, StoredRecord { seq, record });
        }

        debug!(%id, record_type = %change.record_type, date = %change.date, "Record added");
        self.emit(change);
        Ok(id)
    }

    fn update(&self, id: RecordId, patch: serde_json::Value) -> Result<(), StoreError> {
        let change = {
            let mut inner = self.inner.write().map_err(|_| StoreError::Poisoned)?;
            let stored = inner
                .records
                .get_mut(&id)
                .ok_or(StoreError::NotFound { id })?;

            let updated = stored.record.with_patch(&patch)?;
            stored.record = updated;

            StoreChange {
                id,
                record_type: stored.record.record_type(),
                date: stored.record.date(),
                kind: ChangeKind::Updated,
            }
        };

        debug!(%id, "Record updated");
        self.emit(change);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}

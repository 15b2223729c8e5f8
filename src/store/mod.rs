//! Log Store contract
//!
//! The Log Store is the single source of truth for health logs. It supports
//! date-filtered queries, appends and partial updates, and broadcasts a
//! [`StoreChange`] for every mutation so consumers can recompute whatever
//! depends on the affected record type and date.
//!
//! ```text
//! add / update ──► LogStore ──► broadcast::Sender<StoreChange>
//!                                   │
//!                                   └─► Subscription (filtered by QueryShape)
//!                                           │
//!                                           └─► RecoveryEngine recompute
//! ```

pub mod memory;
pub mod sqlite;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::dates::DateFilter;
use crate::error::StoreError;
use crate::models::{LogRecord, Record, RecordId, RecordType};

pub use memory::MemoryLogStore;
pub use sqlite::SqliteLogStore;

/// Capacity of the change broadcast channel
pub const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// A query against one record type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogQuery {
    pub record_type: RecordType,
    pub filter: DateFilter,
}

impl LogQuery {
    pub fn new(record_type: RecordType, filter: DateFilter) -> Self {
        LogQuery {
            record_type,
            filter,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Updated,
}

/// Notification emitted after every successful mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreChange {
    pub id: RecordId,
    pub record_type: RecordType,
    pub date: NaiveDate,
    pub kind: ChangeKind,
}

/// What a [`Subscription`] yields
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeSignal {
    /// A mutation matching the subscription's shape
    Changed(StoreChange),
    /// The receiver fell behind and dropped changes; reload everything
    Resync { skipped: u64 },
}

impl ChangeSignal {
    pub fn into_change(self) -> Option<StoreChange> {
        match self {
            ChangeSignal::Changed(change) => Some(change),
            ChangeSignal::Resync { .. } => None,
        }
    }
}

/// Record types and dates a consumer depends on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryShape {
    pub record_types: Vec<RecordType>,
    pub filter: DateFilter,
}

impl QueryShape {
    pub fn new(record_types: impl IntoIterator<Item = RecordType>, filter: DateFilter) -> Self {
        QueryShape {
            record_types: record_types.into_iter().collect(),
            filter,
        }
    }

    /// Every record type, every date
    pub fn everything() -> Self {
        QueryShape::new(RecordType::ALL, DateFilter::All)
    }

    pub fn matches(&self, change: &StoreChange) -> bool {
        self.record_types.contains(&change.record_type) && self.filter.matches(change.date)
    }
}

/// Append/query interface for time-stamped records
pub trait LogStore: Send + Sync {
    /// Records of one type whose date matches the filter, oldest first
    fn query(&self, query: &LogQuery) -> Result<Vec<LogRecord>, StoreError>;

    /// Append a record and return its new id
    fn add(&self, record: LogRecord) -> Result<RecordId, StoreError>;

    /// Merge a partial JSON object into an existing record
    fn update(&self, id: RecordId, patch: serde_json::Value) -> Result<(), StoreError>;

    /// Receive every change made after this call
    fn subscribe(&self) -> broadcast::Receiver<StoreChange>;
}

/// Typed helpers on top of [`LogStore`]
pub trait LogStoreExt: LogStore {
    /// Query one typed record kind
    fn fetch<T: Record>(&self, filter: DateFilter) -> Result<Vec<T>, StoreError> {
        let records = self.query(&LogQuery::new(T::TYPE, filter))?;
        Ok(records.into_iter().filter_map(T::from_log).collect())
    }

    /// Subscribe to changes matching a query shape
    fn watch(&self, shape: QueryShape) -> Subscription {
        Subscription::new(self.subscribe(), shape)
    }
}

impl<S: LogStore + ?Sized> LogStoreExt for S {}

/// Change feed filtered to one query shape
pub struct Subscription {
    receiver: broadcast::Receiver<StoreChange>,
    shape: QueryShape,
}

impl Subscription {
    pub fn new(receiver: broadcast::Receiver<StoreChange>, shape: QueryShape) -> Self {
        Subscription { receiver, shape }
    }

    pub fn shape(&self) -> &QueryShape {
        &self.shape
    }

    /// Wait for the next relevant change.
    ///
    /// Returns `None` once the store is dropped. A lagged receiver yields
    /// [`ChangeSignal::Resync`] so the consumer reloads instead of missing an
    /// update.
    pub async fn next(&mut self) -> Option<ChangeSignal> {
        loop {
            match self.receiver.recv().await {
                Ok(change) if self.shape.matches(&change) => {
                    return Some(ChangeSignal::Changed(change))
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Change subscription lagged, forcing refresh");
                    return Some(ChangeSignal::Resync { skipped });
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next already-queued relevant change, without waiting
    pub fn try_next(&mut self) -> Option<ChangeSignal> {
        loop {
            match self.receiver.try_recv() {
                Ok(change) if self.shape.matches(&change) => {
                    return Some(ChangeSignal::Changed(change))
                }
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    return Some(ChangeSignal::Resync { skipped })
                }
                Err(_) => return None,
            }
        }
    }
}

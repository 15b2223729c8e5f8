use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::{ChangeKind, LogQuery, LogStore, StoreChange, CHANGE_CHANNEL_CAPACITY};
use crate::dates::{format_local_date, DateFilter};
use crate::error::StoreError;
use crate::models::{LogRecord, RecordId};

/// SQLite-backed Log Store.
///
/// Records are kept as JSON payloads next to their type and local date, so
/// new record fields never need a schema migration.
pub struct SqliteLogStore {
    conn: Mutex<Connection>,
    changes: broadcast::Sender<StoreChange>,
}

impl SqliteLogStore {
    /// Create or open a database at the specified path
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path.as_ref())?;
        info!(path = %db_path.as_ref().display(), "Opened log database");
        Self::with_connection(conn)
    }

    /// Private in-memory database
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        Self::init_schema(&conn)?;
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(SqliteLogStore {
            conn: Mutex::new(conn),
            changes,
        })
    }

    /// Initialize database schema with tables and indexes
    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        // journal_mode reports the resulting mode as a row
        let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS log_records (
                id TEXT PRIMARY KEY,
                record_type TEXT NOT NULL,
                date DATE NOT NULL,
                payload TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_log_records_type_date ON log_records (record_type, date)",
            [],
        )?;

        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn emit(&self, change: StoreChange) {
        let _ = self.changes.send(change);
    }

    /// Count of stored records
    pub fn count(&self) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM log_records", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

impl LogStore for SqliteLogStore {
    fn query(&self, query: &LogQuery) -> Result<Vec<LogRecord>, StoreError> {
        let conn = self.lock()?;
        let record_type = query.record_type.as_str();

        let payloads: Vec<String> = match query.filter {
            DateFilter::All => {
                let mut stmt = conn.prepare(
                    "SELECT payload FROM log_records WHERE record_type = ?1 ORDER BY date, rowid",
                )?;
                let rows = stmt.query_map(params![record_type], |row| row.get(0))?;
                rows.collect::<Result<_, _>>()?
            }
            DateFilter::On(date) => {
                let mut stmt = conn.prepare(
                    "SELECT payload FROM log_records WHERE record_type = ?1 AND date = ?2 ORDER BY rowid",
                )?;
                let rows = stmt.query_map(params![record_type, format_local_date(date)], |row| {
                    row.get(0)
                })?;
                rows.collect::<Result<_, _>>()?
            }
            DateFilter::Between(from, to) => {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT payload FROM log_records
                    WHERE record_type = ?1 AND date >= ?2 AND date <= ?3
                    ORDER BY date, rowid
                    "#,
                )?;
                let rows = stmt.query_map(
                    params![record_type, format_local_date(from), format_local_date(to)],
                    |row| row.get(0),
                )?;
                rows.collect::<Result<_, _>>()?
            }
        };

        payloads
            .iter()
            .map(|payload| serde_json::from_str(payload).map_err(StoreError::from))
            .collect()
    }

    fn add(&self, record: LogRecord) -> Result<RecordId, StoreError> {
        let record = record.sanitized();
        record.validate()?;

        let id = RecordId::new();
        let payload = serde_json::to_string(&record)?;
        {
            let conn = self.lock()?;
            conn.execute(
                "INSERT INTO log_records (id, record_type, date, payload) VALUES (?1, ?2, ?3, ?4)",
                params![
                    id.to_string(),
                    record.record_type().as_str(),
                    format_local_date(record.date()),
                    payload,
                ],
            )?;
        }

        debug!(%id, record_type = %record.record_type(), "Record stored");
        self.emit(StoreChange {
            id,
            record_type: record.record_type(),
            date: record.date(),
            kind: ChangeKind::Added,
        });
        Ok(id)
    }

    fn update(&self, id: RecordId, patch: serde_json::Value) -> Result<(), StoreError> {
        let updated = {
            let mut conn = self.lock()?;
            let tx = conn.transaction()?;

            let payload: Option<String> = tx
                .query_row(
                    "SELECT payload FROM log_records WHERE id = ?1",
                    params![id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            let payload = payload.ok_or(StoreError::NotFound { id })?;

            let current: LogRecord = serde_json::from_str(&payload)?;
            let updated = current.with_patch(&patch)?;

            tx.execute(
                "UPDATE log_records SET payload = ?1, updated_at = CURRENT_TIMESTAMP WHERE id = ?2",
                params![serde_json::to_string(&updated)?, id.to_string()],
            )?;
            tx.commit()?;
            updated
        };

        debug!(%id, "Record updated");
        self.emit(StoreChange {
            id,
            record_type: updated.record_type(),
            date: updated.date(),
            kind: ChangeKind::Updated,
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}

//! Durable WAL sidecar
//!
//! A small SQLite database co-located with the shard holds serialized event
//! batches between buffer flush and Parquet checkpoint. Rows are
//! insert-ordered and never rewritten; they are deleted only after a
//! checkpoint covers their `last_seq`.

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;

use crate::error::Result;
use crate::event::EventBatch;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS events_wal (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ns TEXT NOT NULL,
    first_seq INTEGER NOT NULL,
    last_seq INTEGER NOT NULL,
    bytes BLOB NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_events_wal_ns ON events_wal (ns, first_seq);

CREATE TABLE IF NOT EXISTS rels_wal (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ns TEXT NOT NULL,
    first_seq INTEGER NOT NULL,
    last_seq INTEGER NOT NULL,
    bytes BLOB NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_rels_wal_ns ON rels_wal (ns, first_seq);

CREATE TABLE IF NOT EXISTS pending_row_groups (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ns TEXT NOT NULL,
    last_seq INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS checkpoints (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ts INTEGER NOT NULL,
    ns TEXT NOT NULL,
    event_count INTEGER NOT NULL,
    first_event_id TEXT NOT NULL,
    last_event_id TEXT NOT NULL,
    parquet_path TEXT NOT NULL,
    last_seq INTEGER NOT NULL,
    last_entity_seq INTEGER NOT NULL
);
";

/// Checkpoint bookkeeping row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointRow {
    pub ts: i64,
    pub ns: String,
    pub event_count: u64,
    pub first_event_id: String,
    pub last_event_id: String,
    pub parquet_path: String,
    pub last_seq: u64,
    /// Entity id counter at checkpoint time, for recovery.
    pub last_entity_seq: u64,
}

pub struct Wal {
    conn: Mutex<Connection>,
}

impl Wal {
    pub fn open(path: &str) -> Result<Self> {
        Self::init(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn append(&self, table: &str, batch: &EventBatch) -> Result<()> {
        let bytes = serde_json::to_vec(batch)
            .map_err(|e| crate::error::EngineError::Fatal(format!("batch serialization: {e}")))?;
        let conn = self.conn.lock();
        conn.execute(
            &format!(
                "INSERT INTO {table} (ns, first_seq, last_seq, bytes, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)"
            ),
            params![
                batch.ns,
                batch.first_seq as i64,
                batch.last_seq as i64,
                bytes,
                chrono::Utc::now().timestamp_millis(),
            ],
        )?;
        tracing::debug!(
            "wal append {}: ns '{}' seq [{}, {}] ({} events)",
            table,
            batch.ns,
            batch.first_seq,
            batch.last_seq,
            batch.events.len()
        );
        Ok(())
    }

    fn batches(&self, table: &str, ns: &str) -> Result<Vec<EventBatch>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT bytes FROM {table} WHERE ns = ?1 ORDER BY first_seq ASC"
        ))?;
        let rows = stmt.query_map(params![ns], |row| row.get::<_, Vec<u8>>(0))?;

        let mut batches = Vec::new();
        for bytes in rows {
            let bytes = bytes?;
            let batch: EventBatch = serde_json::from_slice(&bytes).map_err(|e| {
                crate::error::EngineError::Fatal(format!("corrupt wal batch: {e}"))
            })?;
            batches.push(batch);
        }
        Ok(batches)
    }

    fn delete_up_to(&self, table: &str, ns: &str, last_seq: u64) -> Result<usize> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            &format!("DELETE FROM {table} WHERE ns = ?1 AND last_seq <= ?2"),
            params![ns, last_seq as i64],
        )?;
        Ok(deleted)
    }

    pub fn append_events(&self, batch: &EventBatch) -> Result<()> {
        self.append("events_wal", batch)
    }

    pub fn append_rels(&self, batch: &EventBatch) -> Result<()> {
        self.append("rels_wal", batch)
    }

    /// Event batches for a namespace, ascending by `first_seq`.
    pub fn event_batches(&self, ns: &str) -> Result<Vec<EventBatch>> {
        self.batches("events_wal", ns)
    }

    pub fn rel_batches(&self, ns: &str) -> Result<Vec<EventBatch>> {
        self.batches("rels_wal", ns)
    }

    pub fn delete_events_up_to(&self, ns: &str, last_seq: u64) -> Result<usize> {
        self.delete_up_to("events_wal", ns, last_seq)
    }

    pub fn delete_rels_up_to(&self, ns: &str, last_seq: u64) -> Result<usize> {
        self.delete_up_to("rels_wal", ns, last_seq)
    }

    /// Namespaces with any WAL rows, entity or relationship.
    pub fn namespaces(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut out = BTreeSet::new();
        for table in ["events_wal", "rels_wal"] {
            let mut stmt = conn.prepare(&format!("SELECT DISTINCT ns FROM {table}"))?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            for ns in rows {
                out.insert(ns?);
            }
        }
        Ok(out.into_iter().collect())
    }

    /// Highest event sequence durably recorded for a namespace.
    pub fn max_event_seq(&self, ns: &str) -> Result<u64> {
        let conn = self.conn.lock();
        let max: Option<i64> = conn
            .query_row(
                "SELECT MAX(last_seq) FROM events_wal WHERE ns = ?1",
                params![ns],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        Ok(max.unwrap_or(0) as u64)
    }

    pub fn add_pending_row_group(&self, ns: &str, last_seq: u64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO pending_row_groups (ns, last_seq, created_at) VALUES (?1, ?2, ?3)",
            params![ns, last_seq as i64, chrono::Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }

    pub fn pending_row_groups(&self, ns: &str) -> Result<Vec<u64>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT last_seq FROM pending_row_groups WHERE ns = ?1 ORDER BY last_seq")?;
        let rows = stmt.query_map(params![ns], |row| row.get::<_, i64>(0))?;
        let mut out = Vec::new();
        for seq in rows {
            out.push(seq? as u64);
        }
        Ok(out)
    }

    pub fn delete_pending_up_to(&self, ns: &str, last_seq: u64) -> Result<usize> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM pending_row_groups WHERE ns = ?1 AND last_seq <= ?2",
            params![ns, last_seq as i64],
        )?;
        Ok(deleted)
    }

    pub fn record_checkpoint(&self, row: &CheckpointRow) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO checkpoints \
             (ts, ns, event_count, first_event_id, last_event_id, parquet_path, last_seq, last_entity_seq) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                row.ts,
                row.ns,
                row.event_count as i64,
                row.first_event_id,
                row.last_event_id,
                row.parquet_path,
                row.last_seq as i64,
                row.last_entity_seq as i64,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Latest checkpoint for a namespace, if any.
    pub fn latest_checkpoint(&self, ns: &str) -> Result<Option<CheckpointRow>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT ts, ns, event_count, first_event_id, last_event_id, parquet_path, last_seq, last_entity_seq \
             FROM checkpoints WHERE ns = ?1 ORDER BY id DESC LIMIT 1",
            params![ns],
            |row| {
                Ok(CheckpointRow {
                    ts: row.get(0)?,
                    ns: row.get(1)?,
                    event_count: row.get::<_, i64>(2)? as u64,
                    first_event_id: row.get(3)?,
                    last_event_id: row.get(4)?,
                    parquet_path: row.get(5)?,
                    last_seq: row.get::<_, i64>(6)? as u64,
                    last_entity_seq: row.get::<_, i64>(7)? as u64,
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, EventOp};

    fn batch(ns: &str, first: u64, last: u64) -> EventBatch {
        EventBatch {
            ns: ns.to_string(),
            first_seq: first,
            last_seq: last,
            events: (first..=last)
                .map(|seq| Event::new(EventOp::Create, format!("{ns}:id{seq}"), seq, "u1"))
                .collect(),
        }
    }

    #[test]
    fn batches_come_back_in_sequence_order() {
        let wal = Wal::in_memory().unwrap();
        wal.append_events(&batch("posts", 4, 6)).unwrap();
        wal.append_events(&batch("posts", 1, 3)).unwrap();
        wal.append_events(&batch("users", 1, 2)).unwrap();

        let batches = wal.event_batches("posts").unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].first_seq, 1);
        assert_eq!(batches[1].first_seq, 4);
        assert_eq!(batches[1].events.len(), 3);

        assert_eq!(wal.namespaces().unwrap(), ["posts", "users"]);
        assert_eq!(wal.max_event_seq("posts").unwrap(), 6);
        assert_eq!(wal.max_event_seq("ghost").unwrap(), 0);
    }

    #[test]
    fn delete_up_to_trims_covered_batches() {
        let wal = Wal::in_memory().unwrap();
        wal.append_events(&batch("posts", 1, 3)).unwrap();
        wal.append_events(&batch("posts", 4, 6)).unwrap();

        let deleted = wal.delete_events_up_to("posts", 3).unwrap();
        assert_eq!(deleted, 1);
        let remaining = wal.event_batches("posts").unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].first_seq, 4);
    }

    #[test]
    fn pending_row_groups_lifecycle() {
        let wal = Wal::in_memory().unwrap();
        wal.add_pending_row_group("posts", 3).unwrap();
        wal.add_pending_row_group("posts", 6).unwrap();
        assert_eq!(wal.pending_row_groups("posts").unwrap(), [3, 6]);

        wal.delete_pending_up_to("posts", 3).unwrap();
        assert_eq!(wal.pending_row_groups("posts").unwrap(), [6]);
    }

    #[test]
    fn checkpoint_rows_round_trip() {
        let wal = Wal::in_memory().unwrap();
        assert!(wal.latest_checkpoint("posts").unwrap().is_none());

        let row = CheckpointRow {
            ts: 1_000,
            ns: "posts".to_string(),
            event_count: 10,
            first_event_id: "e1".to_string(),
            last_event_id: "e10".to_string(),
            parquet_path: "data/posts/data.parquet".to_string(),
            last_seq: 10,
            last_entity_seq: 7,
        };
        wal.record_checkpoint(&row).unwrap();
        assert_eq!(wal.latest_checkpoint("posts").unwrap(), Some(row));
    }
}

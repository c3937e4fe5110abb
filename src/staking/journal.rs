//! SQLite event journal.
//!
//! Persists emitted [`ProtocolEvent`]s for audit and replay. Rows are
//! append-only; `seq` preserves emission order across appends.

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use super::events::ProtocolEvent;

#[derive(Clone)]
pub struct EventJournal {
    conn: Arc<Mutex<Connection>>,
}

impl EventJournal {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref()).context("open event journal")?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory event journal")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS protocol_events (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL,
                recorded_at INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_protocol_events_kind ON protocol_events(kind, seq)",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Append all events in one transaction. Returns the number written.
    pub fn append(&self, events: &[ProtocolEvent]) -> Result<usize> {
        if events.is_empty() {
            return Ok(0);
        }
        let now = Utc::now().timestamp();
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO protocol_events (id, kind, payload, recorded_at)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for event in events {
                let payload = serde_json::to_string(event).context("serialize event")?;
                stmt.execute(params![
                    Uuid::new_v4().to_string(),
                    event.kind(),
                    payload,
                    now
                ])?;
            }
        }
        tx.commit()?;
        Ok(events.len())
    }

    pub fn count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM protocol_events", [], |row| {
            row.get(0)
        })?;
        Ok(n.max(0) as u64)
    }

    /// Count of events of one kind (e.g. `"finalized"`).
    pub fn count_kind(&self, kind: &str) -> Result<u64> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM protocol_events WHERE kind = ?1",
            [kind],
            |row| row.get(0),
        )?;
        Ok(n.max(0) as u64)
    }

    /// Every stored event in emission order.
    pub fn load_all(&self) -> Result<Vec<ProtocolEvent>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare_cached("SELECT payload FROM protocol_events ORDER BY seq ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut out = Vec::new();
        for row in rows {
            let payload = row?;
            let event: ProtocolEvent =
                serde_json::from_str(&payload).context("deserialize stored event")?;
            out.push(event);
        }
        Ok(out)
    }
}

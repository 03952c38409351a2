// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! SQLite journal backend

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::journal::{JournalEvent, JournalStore};
use crate::{Result, WardenError};

/// Database manager (thread-safe wrapper)
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    location: PathBuf,
}

/// Journal statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JournalStats {
    pub event_count: i64,
    pub entry_count: i64,
    pub first_event: Option<DateTime<Utc>>,
    pub last_event: Option<DateTime<Utc>>,
}

impl Database {
    /// Open or create the database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            location: path.as_ref().to_path_buf(),
        };
        db.initialize()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            location: PathBuf::from(":memory:"),
        };
        db.initialize()?;
        Ok(db)
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| WardenError::Journal("Database lock poisoned".to_string()))
    }

    /// Initialize database schema
    fn initialize(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS journal_events (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                entry_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL,
                recorded_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_journal_entry ON journal_events(entry_id);
        "#,
        )?;
        Ok(())
    }

    /// Number of events and distinct entries
    pub fn stats(&self) -> Result<JournalStats> {
        let conn = self.lock_conn()?;
        let (event_count, entry_count, first, last): (i64, i64, Option<String>, Option<String>) =
            conn.query_row(
                "SELECT COUNT(*), COUNT(DISTINCT entry_id), MIN(recorded_at), MAX(recorded_at)
                 FROM journal_events",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?;

        let parse = |s: Option<String>| {
            s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.with_timezone(&Utc))
        };

        Ok(JournalStats {
            event_count,
            entry_count,
            first_event: parse(first),
            last_event: parse(last),
        })
    }
}

impl JournalStore for Database {
    fn append(&self, event: &JournalEvent) -> Result<()> {
        let conn = self.lock_conn()?;
        let payload = serde_json::to_string(event)?;
        conn.execute(
            "INSERT INTO journal_events (entry_id, kind, payload, recorded_at) VALUES (?1, ?2, ?3, ?4)",
            params![event.entry_id(), event.kind(), payload, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<JournalEvent>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare("SELECT payload FROM journal_events ORDER BY seq")?;
        let payloads = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut events = Vec::with_capacity(payloads.len());
        for payload in payloads {
            match serde_json::from_str(&payload) {
                Ok(event) => events.push(event),
                Err(e) => tracing::warn!("Skipping unreadable journal row: {}", e),
            }
        }
        Ok(events)
    }

    fn location(&self) -> String {
        format!("sqlite:{}", self.location.display())
    }
}

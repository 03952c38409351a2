// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Write-ahead undo journal
//!
//! The journal is an append-only list of events. An entry is `Recorded`
//! before its file is moved and later gains `Committed`, `Unresolved`,
//! `Reverted` or `Abandoned` events. The current state of an entry is a
//! fold over its events; nothing already written is ever rewritten.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{JournalBackend, JournalConfig};
use crate::db::Database;
use crate::{Result, WardenError};

/// A single move operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UndoEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub original_path: PathBuf,
    pub new_path: PathBuf,
    pub size_bytes: u64,
    #[serde(default)]
    pub category: Option<String>,
}

/// One line of the journal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JournalEvent {
    Recorded { entry: UndoEntry },
    Committed { id: String },
    Unresolved { id: String, error: String },
    Reverted { id: String, restored_to: PathBuf },
    Abandoned { id: String },
}

impl JournalEvent {
    pub fn entry_id(&self) -> &str {
        match self {
            JournalEvent::Recorded { entry } => &entry.id,
            JournalEvent::Committed { id }
            | JournalEvent::Unresolved { id, .. }
            | JournalEvent::Reverted { id, .. }
            | JournalEvent::Abandoned { id } => id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            JournalEvent::Recorded { .. } => "recorded",
            JournalEvent::Committed { .. } => "committed",
            JournalEvent::Unresolved { .. } => "unresolved",
            JournalEvent::Reverted { .. } => "reverted",
            JournalEvent::Abandoned { .. } => "abandoned",
        }
    }
}

/// State of an entry after folding its events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    /// Written before the move; no outcome yet
    Pending,
    Committed,
    /// The move failed after the entry was written
    Unresolved,
    Reverted,
    Abandoned,
}

/// An entry together with its folded state
#[derive(Debug, Clone, Serialize)]
pub struct JournalRecord {
    pub entry: UndoEntry,
    pub state: EntryState,
    pub error: Option<String>,
    pub restored_to: Option<PathBuf>,
}

impl JournalRecord {
    pub fn is_undoable(&self) -> bool {
        self.state == EntryState::Committed
    }

    /// Entries a reconciliation pass should look at
    pub fn needs_reconcile(&self) -> bool {
        matches!(self.state, EntryState::Pending | EntryState::Unresolved)
    }
}

/// Persistence for journal events
pub trait JournalStore: Send + Sync {
    fn append(&self, event: &JournalEvent) -> Result<()>;

    /// All events in the order they were appended
    fn read_all(&self) -> Result<Vec<JournalEvent>>;

    /// Where the events live, for display
    fn location(&self) -> String;
}

/// JSON lines file, one event per line
pub struct JsonlJournal {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl JournalStore for JsonlJournal {
    fn append(&self, event: &JournalEvent) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let json = serde_json::to_string(event)?;
        writeln!(file, "{}", json)?;
        file.sync_data()?;
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<JournalEvent>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(&self.path)?);
        let mut events = Vec::new();
        for (n, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(event) => events.push(event),
                // A torn final line after a crash is skipped, not fatal
                Err(e) => warn!("Skipping journal line {} in {:?}: {}", n + 1, self.path, e),
            }
        }
        Ok(events)
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// Journal kept in memory only
#[derive(Default)]
pub struct MemoryJournal {
    events: Mutex<Vec<JournalEvent>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<JournalEvent>> {
        self.events.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl JournalStore for MemoryJournal {
    fn append(&self, event: &JournalEvent) -> Result<()> {
        self.lock().push(event.clone());
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<JournalEvent>> {
        Ok(self.lock().clone())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}

/// Fold events into one record per entry, in the order entries were recorded
pub fn fold(events: &[JournalEvent]) -> Vec<JournalRecord> {
    let mut records: Vec<JournalRecord> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for event in events {
        if let JournalEvent::Recorded { entry } = event {
            if index.contains_key(&entry.id) {
                warn!("Duplicate journal entry {} ignored", entry.id);
                continue;
            }
            index.insert(entry.id.clone(), records.len());
            records.push(JournalRecord {
                entry: entry.clone(),
                state: EntryState::Pending,
                error: None,
                restored_to: None,
            });
            continue;
        }

        let Some(&i) = index.get(event.entry_id()) else {
            warn!("Journal event for unknown entry {} ignored", event.entry_id());
            continue;
        };
        let record = &mut records[i];
        let from = record.state;

        let applied = match (event, from) {
            (JournalEvent::Committed { .. }, EntryState::Pending | EntryState::Unresolved) => {
                record.state = EntryState::Committed;
                record.error = None;
                true
            }
            (JournalEvent::Unresolved { error, .. }, EntryState::Pending) => {
                record.state = EntryState::Unresolved;
                record.error = Some(error.clone());
                true
            }
            (JournalEvent::Reverted { restored_to, .. }, EntryState::Committed) => {
                record.state = EntryState::Reverted;
                record.restored_to = Some(restored_to.clone());
                true
            }
            (JournalEvent::Abandoned { .. }, EntryState::Pending | EntryState::Unresolved) => {
                record.state = EntryState::Abandoned;
                true
            }
            _ => false,
        };

        if !applied {
            debug!("Ignoring {} event for entry {} in state {:?}", event.kind(), record.entry.id, from);
        }
    }

    records
}

/// Typed access to a [`JournalStore`]
pub struct Journal {
    store: Box<dyn JournalStore>,
}

impl Journal {
    pub fn new(store: impl JournalStore + 'static) -> Self {
        Self {
            store: Box::new(store),
        }
    }

    /// In-memory journal
    pub fn in_memory() -> Self {
        Self::new(MemoryJournal::new())
    }

    /// Open the backend named in the configuration
    pub fn open(config: &JournalConfig) -> Result<Self> {
        match config.backend {
            JournalBackend::Jsonl => Ok(Self::new(JsonlJournal::new(&config.path))),
            JournalBackend::Sqlite => Ok(Self::new(Database::open(&config.path)?)),
        }
    }

    pub fn location(&self) -> String {
        self.store.location()
    }

    /// Write a new pending entry. Must happen before the move.
    pub fn record(
        &self,
        original_path: &Path,
        new_path: &Path,
        size_bytes: u64,
        category: Option<&str>,
    ) -> Result<UndoEntry> {
        let entry = UndoEntry {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            original_path: original_path.to_path_buf(),
            new_path: new_path.to_path_buf(),
            size_bytes,
            category: category.map(str::to_string),
        };
        self.store.append(&JournalEvent::Recorded {
            entry: entry.clone(),
        })?;
        Ok(entry)
    }

    pub fn commit(&self, id: &str) -> Result<()> {
        self.store.append(&JournalEvent::Committed { id: id.to_string() })
    }

    pub fn mark_unresolved(&self, id: &str, error: &str) -> Result<()> {
        self.store.append(&JournalEvent::Unresolved {
            id: id.to_string(),
            error: error.to_string(),
        })
    }

    pub fn mark_reverted(&self, id: &str, restored_to: &Path) -> Result<()> {
        self.store.append(&JournalEvent::Reverted {
            id: id.to_string(),
            restored_to: restored_to.to_path_buf(),
        })
    }

    pub fn mark_abandoned(&self, id: &str) -> Result<()> {
        self.store.append(&JournalEvent::Abandoned { id: id.to_string() })
    }

    /// Every entry with its current state, oldest first
    pub fn entries(&self) -> Result<Vec<JournalRecord>> {
        Ok(fold(&self.store.read_all()?))
    }

    /// Committed entries that can still be undone, oldest first
    pub fn undoable(&self) -> Result<Vec<UndoEntry>> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(JournalRecord::is_undoable)
            .map(|r| r.entry)
            .collect())
    }

    /// Most recent entries, newest first
    pub fn recent(&self, count: usize) -> Result<Vec<JournalRecord>> {
        let mut entries = self.entries()?;
        entries.reverse();
        entries.truncate(count);
        Ok(entries)
    }

    /// Pending or unresolved entries
    pub fn unresolved(&self) -> Result<Vec<JournalRecord>> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(JournalRecord::needs_reconcile)
            .collect())
    }

    pub fn find(&self, id: &str) -> Result<JournalRecord> {
        self.entries()?
            .into_iter()
            .find(|r| r.entry.id == id)
            .ok_or_else(|| WardenError::Journal(format!("No journal entry with id {}", id)))
    }
}

// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Moving files into the organized tree and back
//!
//! Every move is journaled before it happens. A move that fails after its
//! entry was written leaves the entry unresolved; [`OrganizeEngine::reconcile`]
//! settles such entries by looking at where the file actually is.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::events::EventBus;
use crate::journal::{EntryState, Journal, UndoEntry};
use crate::record::{Classification, FileRecord, SkipReason, FALLBACK_SUB_CATEGORY};
use crate::store::RecordStore;
use crate::{Result, WardenError};

/// Highest numeric suffix tried before giving up on a destination
const MAX_DISAMBIGUATOR: u32 = 9999;

/// Computes where a classified file belongs
#[derive(Debug, Clone)]
pub struct DestinationPlanner {
    root: Option<PathBuf>,
    date_categories: BTreeSet<String>,
}

impl DestinationPlanner {
    pub fn new(root: Option<PathBuf>, date_categories: BTreeSet<String>) -> Self {
        Self {
            root,
            date_categories,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.organization_root_folder.clone(),
            config.date_organized_categories.clone(),
        )
    }

    /// The organization root; the watched folder when none is configured
    pub fn root_for(&self, watch_root: &Path) -> PathBuf {
        self.root.clone().unwrap_or_else(|| watch_root.to_path_buf())
    }

    /// `root/category/sub_category[/YYYY/MM-Month]/file_name`
    pub fn destination(
        &self,
        record: &FileRecord,
        classification: &Classification,
        watch_root: &Path,
    ) -> PathBuf {
        let mut path = self.root_for(watch_root);
        path.push(sanitize_segment(&classification.category));
        path.push(sanitize_segment(&classification.sub_category));

        if self.date_categories.contains(&classification.category) {
            let date = record
                .created_at
                .or(record.modified_at)
                .unwrap_or_else(Utc::now);
            path.push(date.format("%Y").to_string());
            path.push(month_segment(&date));
        }

        path.push(&record.file_name);
        path
    }
}

/// Two-digit month plus month name, e.g. `03-March`
fn month_segment(date: &DateTime<Utc>) -> String {
    date.format("%m-%B").to_string()
}

/// Make a category name safe to use as one directory name
pub fn sanitize_segment(segment: &str) -> String {
    let cleaned: String = segment
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_matches('.').trim();

    if cleaned.is_empty() {
        FALLBACK_SUB_CATEGORY.to_string()
    } else {
        cleaned.to_string()
    }
}

/// `<stem>_<n>.<ext>` next to `path`
fn disambiguated(path: &Path, n: u32) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}_{}.{}", stem, n, ext.to_string_lossy()),
        None => format!("{}_{}", stem, n),
    };
    path.with_file_name(name)
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Move without ever replacing an existing `to`.
///
/// Hard link then unlink; where linking is not possible (another volume,
/// a filesystem without links) copy into a newly created file instead.
fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    match std::fs::hard_link(from, to) {
        Ok(()) => {}
        Err(e) if matches!(e.kind(), ErrorKind::AlreadyExists | ErrorKind::NotFound) => return Err(e),
        Err(e) => {
            debug!("hard link {:?} -> {:?} failed ({}), copying instead", from, to, e);
            copy_new(from, to)?;
        }
    }

    if let Err(e) = std::fs::remove_file(from) {
        // Leave exactly one copy behind
        let _ = std::fs::remove_file(to);
        return Err(e);
    }
    Ok(())
}

/// Copy into a file that must not exist yet; a partial copy is removed
fn copy_new(from: &Path, to: &Path) -> std::io::Result<()> {
    let mut source = std::fs::File::open(from)?;
    let mut target = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(to)?;

    if let Err(e) = copy_contents(&mut source, &mut target) {
        drop(target);
        let _ = std::fs::remove_file(to);
        return Err(e);
    }
    Ok(())
}

fn copy_contents(source: &mut std::fs::File, target: &mut std::fs::File) -> std::io::Result<()> {
    std::io::copy(source, target)?;
    target.set_permissions(source.metadata()?.permissions())?;
    target.sync_all()
}

/// First of `target`, `target_1`, `target_2`, ... that is neither on disk
/// nor in `reserved`. Creates the parent directory.
fn free_destination(source: &Path, target: &Path, reserved: &HashSet<PathBuf>) -> Result<PathBuf> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let is_free = |candidate: &Path| {
        !reserved.contains(candidate)
            && (std::fs::symlink_metadata(candidate).is_err() || same_file(source, candidate))
    };

    if is_free(target) {
        return Ok(target.to_path_buf());
    }
    for n in 1..=MAX_DISAMBIGUATOR {
        let candidate = disambiguated(target, n);
        if is_free(&candidate) {
            debug!("{:?} is taken, using {:?}", target, candidate);
            return Ok(candidate);
        }
    }

    Err(WardenError::ConflictUnresolved(target.to_path_buf()))
}

fn task_failed(e: tokio::task::JoinError) -> std::io::Error {
    std::io::Error::new(ErrorKind::Other, e.to_string())
}

/// Outcome counts of a batch
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub succeeded: usize,
    pub failed: usize,
    /// Path and reason for every failure
    pub failures: Vec<(PathBuf, String)>,
}

impl BatchReport {
    fn success(&mut self) {
        self.succeeded += 1;
    }

    fn failure(&mut self, path: &Path, reason: impl Into<String>) {
        self.failed += 1;
        self.failures.push((path.to_path_buf(), reason.into()));
    }
}

/// Result of a reconciliation pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub rolled_forward: usize,
    pub abandoned: usize,
    pub left_alone: usize,
}

/// Moves analyzed files to their destinations and reverses journaled moves
pub struct OrganizeEngine {
    store: Arc<dyn RecordStore>,
    journal: Arc<Journal>,
    events: EventBus,
    dir_lock: tokio::sync::Mutex<()>,
    reserved: Mutex<HashSet<PathBuf>>,
}

impl OrganizeEngine {
    pub fn new(store: Arc<dyn RecordStore>, journal: Arc<Journal>, events: EventBus) -> Self {
        Self {
            store,
            journal,
            events,
            dir_lock: tokio::sync::Mutex::new(()),
            reserved: Mutex::new(HashSet::new()),
        }
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Organize analyzed records; one failure never stops the batch
    pub async fn organize(&self, records: &[FileRecord]) -> BatchReport {
        let mut report = BatchReport::default();
        let total = records.len();

        for (i, record) in records.iter().enumerate() {
            match self.organize_one(record).await {
                Ok(dest) => {
                    debug!("Organized {:?} -> {:?}", record.path, dest);
                    report.success();
                }
                Err(reason) => {
                    warn!("Could not organize {:?}: {}", record.path, reason);
                    report.failure(&record.path, reason);
                }
            }
            self.events.progress("organize", i + 1, total);
        }

        if total > 0 {
            self.events.status(format!(
                "Organized {} file(s), {} failed",
                report.succeeded, report.failed
            ));
        }
        report
    }

    async fn organize_one(&self, given: &FileRecord) -> std::result::Result<PathBuf, String> {
        let path = given.path.clone();
        let mut not_ready = None;
        let started = self.store.update(&path, &mut |current| {
            let mut record = current.cloned().unwrap_or_else(|| given.clone());
            if record.begin_organize() {
                Some(record)
            } else {
                not_ready = Some(if record.ai_pending() {
                    "AI analysis still pending".to_string()
                } else {
                    format!("status is {}, not analyzed", record.status())
                });
                None
            }
        });

        let Some(record) = started else {
            return Err(not_ready.unwrap_or_else(|| "not ready to organize".to_string()));
        };

        match self.move_record(&record).await {
            Ok(dest) => {
                if let Some(updated) = self.store.update(&path, &mut |current| {
                    let mut r = current?.clone();
                    r.mark_organized(dest.clone()).then_some(r)
                }) {
                    self.events.record_updated(&updated);
                }
                Ok(dest)
            }
            Err(reason) => {
                self.store.update(&path, &mut |current| {
                    let mut r = current?.clone();
                    r.mark_failed(reason.clone()).then_some(r)
                });
                Err(reason)
            }
        }
    }

    async fn move_record(&self, record: &FileRecord) -> std::result::Result<PathBuf, String> {
        let source = record.path.clone();
        let target = record
            .suggested_path()
            .map(Path::to_path_buf)
            .ok_or_else(|| "no destination computed".to_string())?;

        match tokio::fs::symlink_metadata(&source).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err("source file no longer exists".to_string())
            }
            Err(e) => return Err(e.to_string()),
        }

        let (a, b) = (source.clone(), target.clone());
        let in_place = source == target
            || tokio::task::spawn_blocking(move || same_file(&a, &b))
                .await
                .unwrap_or(false);
        if in_place {
            return Ok(source);
        }

        let dest = self
            .reserve_destination(&source, &target)
            .await
            .map_err(|e| e.to_string())?;

        let result = self.journaled_move(record, &source, &dest).await;
        self.release(&dest);
        result.map(|()| dest)
    }

    async fn journaled_move(
        &self,
        record: &FileRecord,
        source: &Path,
        dest: &Path,
    ) -> std::result::Result<(), String> {
        let (from, to) = (source.to_path_buf(), dest.to_path_buf());
        let (size, category) = (record.size_bytes, record.category.clone());
        let entry = self
            .with_journal(move |journal| journal.record(&from, &to, size, Some(&category)))
            .await
            .map_err(|e| format!("journal write failed: {}", e))?;

        let (from, to) = (source.to_path_buf(), dest.to_path_buf());
        let moved = tokio::task::spawn_blocking(move || move_file(&from, &to))
            .await
            .unwrap_or_else(|e| Err(task_failed(e)));

        match moved {
            Ok(()) => {
                let id = entry.id.clone();
                if let Err(e) = self.with_journal(move |journal| journal.commit(&id)).await {
                    // File is in place; reconcile will roll this entry forward
                    warn!("Could not commit journal entry {}: {}", entry.id, e);
                }
                info!("Moved {:?} -> {:?}", source, dest);
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                let (id, error) = (entry.id.clone(), reason.clone());
                if let Err(je) = self
                    .with_journal(move |journal| journal.mark_unresolved(&id, &error))
                    .await
                {
                    warn!("Could not mark journal entry {} unresolved: {}", entry.id, je);
                }
                Err(reason)
            }
        }
    }

    /// Run a journal operation off the async runtime
    async fn with_journal<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&Journal) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let journal = self.journal.clone();
        tokio::task::spawn_blocking(move || op(&journal))
            .await
            .map_err(|e| WardenError::Journal(format!("journal task failed: {}", e)))?
    }

    /// Pick a free destination at or next to `target` and reserve it
    async fn reserve_destination(&self, source: &Path, target: &Path) -> Result<PathBuf> {
        let _guard = self.dir_lock.lock().await;

        // Reservations are only added under `dir_lock`
        let reserved = self.lock_reserved().clone();
        let (source, target) = (source.to_path_buf(), target.to_path_buf());
        let chosen = tokio::task::spawn_blocking(move || free_destination(&source, &target, &reserved))
            .await
            .unwrap_or_else(|e| Err(WardenError::FileSystem(task_failed(e))))?;

        self.lock_reserved().insert(chosen.clone());
        Ok(chosen)
    }

    fn release(&self, dest: &Path) {
        self.lock_reserved().remove(dest);
    }

    fn lock_reserved(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        self.reserved.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Reverse journal entries, newest first; one failure never stops the batch
    pub async fn undo(&self, entries: &[UndoEntry]) -> BatchReport {
        let mut report = BatchReport::default();
        let states: HashMap<String, EntryState> = match self.with_journal(|j| j.entries()).await {
            Ok(all) => all.into_iter().map(|r| (r.entry.id, r.state)).collect(),
            Err(e) => {
                for entry in entries {
                    report.failure(&entry.new_path, format!("journal unreadable: {}", e));
                }
                return report;
            }
        };

        let total = entries.len();
        for (i, entry) in entries.iter().rev().enumerate() {
            let state = states.get(&entry.id).copied();
            let result = match state {
                Some(EntryState::Committed) => self.undo_one(entry).await,
                Some(other) => Err(format!("entry is {:?}, nothing to undo", other).to_lowercase()),
                None => Err("entry not found in journal".to_string()),
            };

            match result {
                Ok(restored) => {
                    info!("Restored {:?} -> {:?}", entry.new_path, restored);
                    report.success();
                }
                Err(reason) => {
                    warn!("Could not undo {:?}: {}", entry.new_path, reason);
                    report.failure(&entry.new_path, reason);
                }
            }
            self.events.progress("undo", i + 1, total);
        }

        if total > 0 {
            self.events.status(format!(
                "Undid {} move(s), {} failed",
                report.succeeded, report.failed
            ));
        }
        report
    }

    /// Undo the `count` most recent undoable entries
    pub async fn undo_last(&self, count: usize) -> Result<BatchReport> {
        let undoable = self.with_journal(|j| j.undoable()).await?;
        let start = undoable.len().saturating_sub(count);
        Ok(self.undo(&undoable[start..]).await)
    }

    async fn undo_one(&self, entry: &UndoEntry) -> std::result::Result<PathBuf, String> {
        if tokio::fs::symlink_metadata(&entry.new_path).await.is_err() {
            return Err(format!("{} no longer exists", entry.new_path.display()));
        }

        let dest = self
            .reserve_destination(&entry.new_path, &entry.original_path)
            .await
            .map_err(|e| e.to_string())?;

        let (from, to) = (entry.new_path.clone(), dest.clone());
        let moved = tokio::task::spawn_blocking(move || move_file(&from, &to))
            .await
            .unwrap_or_else(|e| Err(task_failed(e)));
        self.release(&dest);
        moved.map_err(|e| e.to_string())?;

        let (id, restored_to) = (entry.id.clone(), dest.clone());
        if let Err(e) = self
            .with_journal(move |journal| journal.mark_reverted(&id, &restored_to))
            .await
        {
            warn!("Could not mark journal entry {} reverted: {}", entry.id, e);
        }

        // The old record is keyed by the original path; the file now lives at `dest`
        self.store.remove(&entry.original_path);
        let mut restored = FileRecord::from_path(&dest).unwrap_or_else(|_| FileRecord::new(&dest));
        restored.mark_skipped(SkipReason::Restored);
        self.store.upsert(restored);

        Ok(dest)
    }

    /// Settle pending and unresolved entries by checking the filesystem
    pub fn reconcile(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        for record in self.journal.unresolved()? {
            let entry = &record.entry;
            let at_new = entry.new_path.exists();
            let at_original = entry.original_path.exists();

            match (at_new, at_original) {
                (true, false) => {
                    self.journal.commit(&entry.id)?;
                    info!("Rolled forward journal entry {} ({:?})", entry.id, entry.new_path);
                    report.rolled_forward += 1;
                }
                (false, true) => {
                    self.journal.mark_abandoned(&entry.id)?;
                    info!("Abandoned journal entry {} ({:?})", entry.id, entry.original_path);
                    report.abandoned += 1;
                }
                _ => {
                    warn!(
                        "Journal entry {} needs manual attention: file at new path: {}, at original path: {}",
                        entry.id, at_new, at_original
                    );
                    report.left_alone += 1;
                }
            }
        }

        Ok(report)
    }
}

// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! The tracked-file collection
//!
//! Components share one store through the [`RecordStore`] trait. Every
//! mutation replaces a whole record under the write lock, so readers only
//! ever see complete records.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::warn;

use crate::record::FileRecord;

/// Keyed storage for [`FileRecord`]s, one per absolute source path
pub trait RecordStore: Send + Sync {
    /// Owned copy of the record for a path
    fn get(&self, path: &Path) -> Option<FileRecord>;

    /// Insert or replace the record keyed by `record.path`
    fn upsert(&self, record: FileRecord);

    /// Atomic read-modify-write for one path.
    ///
    /// The closure sees the current record (if any) and returns the
    /// replacement, or `None` to leave the store untouched. Returns the
    /// stored replacement.
    fn update(
        &self,
        path: &Path,
        f: &mut dyn FnMut(Option<&FileRecord>) -> Option<FileRecord>,
    ) -> Option<FileRecord>;

    fn remove(&self, path: &Path) -> Option<FileRecord>;

    /// Remove the record for a path only if `keep_out` holds for it, under one lock
    fn remove_if(&self, path: &Path, keep_out: &dyn Fn(&FileRecord) -> bool) -> Option<FileRecord>;

    /// Owned copies of every record, sorted by path
    fn snapshot(&self) -> Vec<FileRecord>;

    fn clear(&self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory [`RecordStore`]
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<PathBuf, FileRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<PathBuf, FileRecord>> {
        self.records.read().unwrap_or_else(|poisoned| {
            warn!("Record store lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<PathBuf, FileRecord>> {
        self.records.write().unwrap_or_else(|poisoned| {
            warn!("Record store lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

impl RecordStore for MemoryStore {
    fn get(&self, path: &Path) -> Option<FileRecord> {
        self.read().get(path).cloned()
    }

    fn upsert(&self, record: FileRecord) {
        self.write().insert(record.path.clone(), record);
    }

    fn update(
        &self,
        path: &Path,
        f: &mut dyn FnMut(Option<&FileRecord>) -> Option<FileRecord>,
    ) -> Option<FileRecord> {
        let mut records = self.write();
        let mut replacement = f(records.get(path))?;
        // The key is the path the caller asked about, whatever the closure returned
        replacement.path = path.to_path_buf();
        records.insert(path.to_path_buf(), replacement.clone());
        Some(replacement)
    }

    fn remove(&self, path: &Path) -> Option<FileRecord> {
        self.write().remove(path)
    }

    fn remove_if(&self, path: &Path, keep_out: &dyn Fn(&FileRecord) -> bool) -> Option<FileRecord> {
        let mut records = self.write();
        if records.get(path).is_some_and(|r| keep_out(r)) {
            records.remove(path)
        } else {
            None
        }
    }

    fn snapshot(&self) -> Vec<FileRecord> {
        let mut records: Vec<FileRecord> = self.read().values().cloned().collect();
        records.sort_by(|a, b| a.path.cmp(&b.path));
        records
    }

    fn clear(&self) {
        self.write().clear();
    }

    fn len(&self) -> usize {
        self.read().len()
    }
}

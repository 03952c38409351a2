// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Folder watching with per-path stabilization
//!
//! Each watched root gets a notify watcher whose events are handed over a
//! channel to one debounce task. A path is ready once no event arrived for
//! the stabilization window and its size stopped changing. Ready paths are
//! classified on a bounded worker pool; a path is never dispatched twice at
//! the same time. AI refinement runs after the worker slot is released.
//! Records of files that vanish or are organized out of the root are dropped.

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::events::EventBus;
use crate::organize::OrganizeEngine;
use crate::pipeline::ClassificationPipeline;
use crate::record::{FileRecord, FileStatus};
use crate::scanner::walk_files;
use crate::{Result, WardenError};

/// Watcher timing and auto-organize policy
#[derive(Debug, Clone)]
pub struct WatcherSettings {
    pub stabilization: Duration,
    pub scan_interval: Duration,
    pub workers: usize,
    pub auto_organize: bool,
    /// Auto-organize only at or above this confidence
    pub auto_organize_floor: Option<f64>,
}

impl WatcherSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            stabilization: config.watcher.stabilization(),
            scan_interval: config.watcher.scan_interval(),
            workers: config.watcher.workers.max(1),
            auto_organize: config.auto_organize_enabled,
            auto_organize_floor: config.organize.auto_organize_min_confidence,
        }
    }
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// A path seen by notify but not yet stable
#[derive(Debug)]
struct PendingFile {
    last_event: Instant,
    last_size: Option<u64>,
}

struct RootHandle {
    _watcher: RecommendedWatcher,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct Shared {
    pipeline: Arc<ClassificationPipeline>,
    organizer: Arc<OrganizeEngine>,
    settings: WatcherSettings,
    events: EventBus,
    workers: Arc<Semaphore>,
    roots: Mutex<HashMap<PathBuf, RootHandle>>,
    in_flight: Mutex<HashSet<PathBuf>>,
}

/// Watches any number of root folders
#[derive(Clone)]
pub struct FolderWatcher {
    shared: Arc<Shared>,
}

impl FolderWatcher {
    pub fn new(
        pipeline: Arc<ClassificationPipeline>,
        organizer: Arc<OrganizeEngine>,
        settings: WatcherSettings,
        events: EventBus,
    ) -> Self {
        let workers = Arc::new(Semaphore::new(settings.workers.max(1)));
        Self {
            shared: Arc::new(Shared {
                pipeline,
                organizer,
                settings,
                events,
                workers,
                roots: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Start watching a directory.
    ///
    /// Returns false if the path is not an existing directory, is already
    /// watched, or the OS watcher could not be set up. Must be called from
    /// within a tokio runtime.
    pub fn start_watching(&self, root: &Path) -> bool {
        let root = match root.canonicalize() {
            Ok(p) if p.is_dir() => p,
            _ => {
                warn!("Cannot watch {:?}: not an existing directory", root);
                return false;
            }
        };

        let mut roots = self.shared.lock_roots();
        if roots.contains_key(&root) {
            debug!("Already watching {:?}", root);
            return false;
        }

        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                // Receiver gone means the root is being torn down
                let _ = raw_tx.send(res);
            },
            Config::default(),
        )
        .and_then(|mut w| w.watch(&root, RecursiveMode::NonRecursive).map(|()| w));

        let watcher = match watcher {
            Ok(w) => w,
            Err(e) => {
                warn!("Failed to watch {:?}: {}", root, e);
                return false;
            }
        };

        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(debounce_loop(self.shared.clone(), root.clone(), raw_rx, stop_rx));

        roots.insert(
            root.clone(),
            RootHandle {
                _watcher: watcher,
                stop_tx,
                task,
            },
        );
        drop(roots);

        self.shared.events.status(format!("Watching {}", root.display()));
        true
    }

    /// Stop watching one root. Pending debounce timers are dropped; files
    /// already being classified or moved finish normally.
    pub async fn stop_watching(&self, root: &Path) -> bool {
        let key = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        let Some(handle) = self.shared.lock_roots().remove(&key) else {
            return false;
        };

        let _ = handle.stop_tx.send(true);
        if let Err(e) = handle.task.await {
            warn!("Debounce task for {:?} ended abnormally: {}", key, e);
        }
        self.shared.events.status(format!("Stopped watching {}", key.display()));
        true
    }

    pub async fn stop_all(&self) {
        for root in self.watched_roots() {
            self.stop_watching(&root).await;
        }
    }

    pub fn watched_roots(&self) -> Vec<PathBuf> {
        let mut roots: Vec<PathBuf> = self.shared.lock_roots().keys().cloned().collect();
        roots.sort();
        roots
    }

    pub fn is_watching(&self, root: &Path) -> bool {
        let key = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        self.shared.lock_roots().contains_key(&key)
    }

    /// Classify files already in a root, on the worker pool, and wait for them
    pub async fn scan_existing(&self, root: &Path) -> Result<usize> {
        let root = root.canonicalize()?;
        let files = walk_files(&root, false)?;
        let count = files.len();

        let mut tasks = JoinSet::new();
        for path in files {
            if !self.shared.begin(&path) {
                continue;
            }
            let shared = self.shared.clone();
            let root = root.clone();
            tasks.spawn(async move { shared.work(path, root).await });
        }
        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                warn!("Classification task failed: {}", e);
            }
        }

        Ok(count)
    }
}

impl Shared {
    fn lock_roots(&self) -> MutexGuard<'_, HashMap<PathBuf, RootHandle>> {
        self.roots.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        self.in_flight.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn is_in_flight(&self, path: &Path) -> bool {
        self.lock_in_flight().contains(path)
    }

    /// Claim a path for processing; false if already claimed
    fn begin(&self, path: &Path) -> bool {
        self.lock_in_flight().insert(path.to_path_buf())
    }

    fn dispatch(self: &Arc<Self>, path: PathBuf, root: PathBuf) {
        if !self.begin(&path) {
            return;
        }
        let shared = self.clone();
        tokio::spawn(async move { shared.work(path, root).await });
    }

    async fn work(self: Arc<Self>, path: PathBuf, root: PathBuf) {
        let mut record = match self.workers.clone().acquire_owned().await {
            Ok(_permit) => self.pipeline.process_rules(&path, &root).await,
            Err(_) => None,
        };

        // The worker slot is already released; only the AI admission limit applies
        if record.as_ref().is_some_and(FileRecord::ai_pending) {
            record = self.pipeline.refine(&path, &root).await;
        }

        if let Some(record) = record.filter(|r| self.should_auto_organize(r)) {
            if let Ok(_permit) = self.workers.clone().acquire_owned().await {
                self.auto_organize(&record, &root).await;
            }
        }

        self.lock_in_flight().remove(&path);
    }

    async fn auto_organize(&self, record: &FileRecord, root: &Path) {
        let report = self.organizer.organize(std::slice::from_ref(record)).await;
        if report.failed > 0 {
            warn!("Auto-organize of {:?} failed", record.path);
            return;
        }

        // Moved out of the watched folder: no longer tracked
        let left_root = |r: &FileRecord| {
            r.status() == FileStatus::Organized
                && r.suggested_path().and_then(Path::parent).is_some_and(|dir| dir != root)
        };
        if self.pipeline.store().remove_if(&record.path, &left_root).is_some() {
            debug!("{:?} left {:?}, record dropped", record.path, root);
        }
    }

    /// Drop the record of a file that disappeared, unless it is mid-operation
    fn forget_path(&self, path: &Path) {
        let idle = |r: &FileRecord| !r.status().is_busy();
        if let Some(record) = self.pipeline.store().remove_if(path, &idle) {
            debug!("{:?} is gone, dropped its {} record", path, record.status());
        }
    }

    fn should_auto_organize(&self, record: &FileRecord) -> bool {
        self.settings.auto_organize
            && record.status() == FileStatus::Analyzed
            && !record.ai_pending()
            && self
                .settings
                .auto_organize_floor
                .map_or(true, |floor| record.confidence >= floor)
    }

    /// Drop a root whose folder disappeared
    fn forget_root(&self, root: &Path) {
        // The handle's task is the caller; dropping the JoinHandle only detaches it
        self.lock_roots().remove(root);
    }
}

async fn debounce_loop(
    shared: Arc<Shared>,
    root: PathBuf,
    mut raw_rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let interval = shared.settings.scan_interval;
    let stabilization = shared.settings.stabilization;
    let mut pending: HashMap<PathBuf, PendingFile> = HashMap::new();
    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop_rx.changed() => {
                debug!("Debounce loop for {:?} stopping, {} pending dropped", root, pending.len());
                break;
            }
            Some(res) = raw_rx.recv() => match res {
                Ok(event) => {
                    for path in note_event(&mut pending, event).await {
                        shared.forget_path(&path);
                    }
                }
                Err(e) => warn!("{:?}: {}", root, WardenError::Watch(e)),
            },
            _ = ticker.tick() => {
                if !root.is_dir() {
                    shared.forget_root(&root);
                    let lost = WardenError::RootLost(root.clone());
                    warn!("{}", lost);
                    shared.events.status(lost.to_string());
                    break;
                }

                for path in take_ready(&mut pending, stabilization, |p| shared.is_in_flight(p)).await {
                    shared.dispatch(path, root.clone());
                }
            }
        }
    }
}

/// Record a raw notify event against the pending set.
///
/// Returns the paths that no longer exist: removals and the source side of
/// a rename.
async fn note_event(pending: &mut HashMap<PathBuf, PendingFile>, event: Event) -> Vec<PathBuf> {
    let mut vanished = Vec::new();
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) => {
            for path in event.paths {
                match tokio::fs::metadata(&path).await {
                    Ok(meta) if meta.is_file() => {
                        let entry = pending.entry(path).or_insert(PendingFile {
                            last_event: Instant::now(),
                            last_size: None,
                        });
                        entry.last_event = Instant::now();
                        entry.last_size = Some(meta.len());
                    }
                    Err(e) if e.kind() == ErrorKind::NotFound => {
                        pending.remove(&path);
                        vanished.push(path);
                    }
                    // Directories and unreadable entries
                    _ => {
                        pending.remove(&path);
                    }
                }
            }
        }
        EventKind::Remove(_) => {
            for path in event.paths {
                pending.remove(&path);
                vanished.push(path);
            }
        }
        _ => {}
    }
    vanished
}

/// Remove and return paths that have been quiet for `stabilization`.
///
/// A file whose size changed since its last event is re-armed instead.
/// Paths still being processed stay pending until they are released.
async fn take_ready(
    pending: &mut HashMap<PathBuf, PendingFile>,
    stabilization: Duration,
    in_flight: impl Fn(&Path) -> bool,
) -> Vec<PathBuf> {
    let now = Instant::now();
    let due: Vec<PathBuf> = pending
        .iter()
        .filter(|(path, file)| {
            now.duration_since(file.last_event) >= stabilization && !in_flight(path.as_path())
        })
        .map(|(path, _)| path.clone())
        .collect();

    let mut ready = Vec::new();
    for path in due {
        let size = tokio::fs::metadata(&path).await.map(|meta| meta.len());
        let Some(file) = pending.get_mut(&path) else {
            continue;
        };
        match size {
            Ok(len) if Some(len) == file.last_size => {
                pending.remove(&path);
                ready.push(path);
            }
            Ok(len) => {
                debug!("{:?} still growing ({} bytes)", path, len);
                file.last_size = Some(len);
                file.last_event = now;
            }
            Err(_) => {
                pending.remove(&path);
            }
        }
    }

    if !ready.is_empty() {
        info!("{} file(s) ready for classification", ready.len());
    }
    ready.sort();
    ready
}

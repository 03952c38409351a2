// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Classification pipeline
//!
//! Drives a record from PENDING through SCANNING to ANALYZED (or FAILED /
//! SKIPPED). Rule results below the AI threshold are refined by the AI
//! adapter when one is configured; the record stays ANALYZED with its
//! `ai_pending` marker set until the answer is merged. The rule stage and
//! the AI stage can be driven separately so callers can schedule them on
//! different limits.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::ai::{merge_verdict, AiAdapter, AiOutcome, AiVerdict};
use crate::classifier::{filename_keywords, RuleClassifier, HIGH_CONFIDENCE, MEDIUM_CONFIDENCE};
use crate::config::AppConfig;
use crate::events::EventBus;
use crate::organize::DestinationPlanner;
use crate::record::{Classification, FileRecord, FileStatus, SkipReason};
use crate::scanner::walk_files;
use crate::store::RecordStore;

/// Partial-download suffixes
const TEMP_SUFFIXES: &[&str] = &[".tmp", ".part", ".crdownload", ".partial", ".download"];

/// OS bookkeeping files
const SYSTEM_NAMES: &[&str] = &["desktop.ini", "thumbs.db", ".ds_store"];

/// Policy exclusion for a path, `None` if it should be classified
pub fn skip_reason_for(path: &Path) -> Option<SkipReason> {
    let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
        return Some(SkipReason::SystemFile);
    };

    if SYSTEM_NAMES.iter().any(|n| filename.eq_ignore_ascii_case(n)) {
        return Some(SkipReason::SystemFile);
    }
    if filename.starts_with('.') {
        return Some(SkipReason::Hidden);
    }

    let lower = filename.to_lowercase();
    if lower.starts_with("~$") || TEMP_SUFFIXES.iter().any(|s| lower.ends_with(s)) {
        return Some(SkipReason::Temporary);
    }

    None
}

/// Pipeline knobs taken from [`AppConfig`]
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub ai_enabled: bool,
    /// Rule confidence below which the AI is consulted
    pub ai_threshold: f64,
    pub show_notifications: bool,
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            ai_enabled: config.ai_analysis_enabled,
            ai_threshold: config.ai_confidence_threshold,
            show_notifications: config.show_notifications,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            ai_enabled: false,
            ai_threshold: HIGH_CONFIDENCE,
            show_notifications: true,
        }
    }
}

/// Counts from a directory scan
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ScanReport {
    pub analyzed: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Paths that were busy and left alone
    pub unchanged: usize,
}

pub struct ClassificationPipeline {
    store: Arc<dyn RecordStore>,
    rules: RuleClassifier,
    ai: Option<Arc<AiAdapter>>,
    planner: DestinationPlanner,
    settings: PipelineSettings,
    events: EventBus,
}

impl ClassificationPipeline {
    pub fn new(
        store: Arc<dyn RecordStore>,
        planner: DestinationPlanner,
        settings: PipelineSettings,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            rules: RuleClassifier::new(),
            ai: None,
            planner,
            settings,
            events,
        }
    }

    pub fn with_ai(mut self, adapter: Arc<AiAdapter>) -> Self {
        self.ai = Some(adapter);
        self
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn ai(&self) -> Option<&Arc<AiAdapter>> {
        self.ai.as_ref()
    }

    pub fn planner(&self) -> &DestinationPlanner {
        &self.planner
    }

    /// Classify one file that was found under `watch_root`, waiting for any
    /// AI refinement.
    ///
    /// Returns the stored record, or `None` when the path is busy, waiting on
    /// the AI, or carries a sticky skip.
    pub async fn process(&self, path: &Path, watch_root: &Path) -> Option<FileRecord> {
        let record = self.run(path, watch_root, false).await?;
        self.settle(record, watch_root).await
    }

    /// Like [`process`](Self::process), but also clears a sticky skip
    pub async fn reclassify(&self, path: &Path, watch_root: &Path) -> Option<FileRecord> {
        let record = self.run(path, watch_root, true).await?;
        self.settle(record, watch_root).await
    }

    /// Rule stage only.
    ///
    /// A record that wants the AI is stored ANALYZED with `ai_pending` set
    /// and returned as is; [`refine`](Self::refine) finishes it.
    pub async fn process_rules(&self, path: &Path, watch_root: &Path) -> Option<FileRecord> {
        self.run(path, watch_root, false).await
    }

    /// Ask the AI about a stored record that is waiting for it.
    ///
    /// Returns the finished record, or `None` if the path is not waiting on
    /// the AI.
    pub async fn refine(&self, path: &Path, watch_root: &Path) -> Option<FileRecord> {
        let ai = self.ai.as_ref()?;
        let record = self
            .store
            .get(path)
            .filter(|r| r.status() == FileStatus::Analyzed && r.ai_pending())?;

        debug!("Rule confidence {:.2} for {:?}, asking AI", record.confidence, path);
        let outcome = ai.analyze(&record).await;
        self.finish_ai(path, watch_root, &outcome).map(|(record, _)| record)
    }

    async fn settle(&self, record: FileRecord, watch_root: &Path) -> Option<FileRecord> {
        if record.ai_pending() {
            self.refine(&record.path, watch_root).await
        } else {
            Some(record)
        }
    }

    /// Exclude a path from processing until it is reclassified
    pub fn exclude(&self, path: &Path) -> Option<FileRecord> {
        self.store.update(path, &mut |current| {
            let mut record = current.cloned().unwrap_or_else(|| FileRecord::new(path));
            if record.status().is_busy() {
                return None;
            }
            record.mark_skipped(SkipReason::Excluded).then_some(record)
        })
    }

    /// Classify every file in a directory
    pub async fn scan_directory(&self, root: &Path, recursive: bool) -> crate::Result<ScanReport> {
        let files = walk_files(root, recursive)?;
        let total = files.len();
        let mut report = ScanReport::default();

        for (i, file) in files.iter().enumerate() {
            match self.process(file, root).await.map(|r| r.status()) {
                Some(FileStatus::Analyzed) => report.analyzed += 1,
                Some(FileStatus::Skipped) => report.skipped += 1,
                Some(FileStatus::Failed) => report.failed += 1,
                _ => report.unchanged += 1,
            }
            self.events.progress("classify", i + 1, total);
        }

        self.events.status(format!(
            "Scanned {}: {} analyzed, {} skipped, {} failed",
            root.display(),
            report.analyzed,
            report.skipped,
            report.failed
        ));
        Ok(report)
    }

    /// Send analyzed records below the AI threshold through the adapter one at a time.
    ///
    /// Returns how many records took the AI's answer.
    pub async fn refine_batch(&self, paths: &[PathBuf], watch_root: &Path) -> usize {
        let Some(ai) = &self.ai else {
            return 0;
        };

        let mut queued = Vec::new();
        for path in paths {
            let marked = self.store.update(path, &mut |current| {
                let mut record = current?.clone();
                if record.status() != FileStatus::Analyzed
                    || record.ai_pending()
                    || record.confidence >= self.settings.ai_threshold
                {
                    return None;
                }
                record.set_ai_pending(true);
                Some(record)
            });
            queued.extend(marked);
        }

        let mut merged = 0;
        for item in ai.analyze_batch(&queued).await {
            if let Some((_, true)) = self.finish_ai(&item.path, watch_root, &item.outcome) {
                merged += 1;
            }
        }
        merged
    }

    async fn run(&self, path: &Path, watch_root: &Path, force: bool) -> Option<FileRecord> {
        if let Some(reason) = skip_reason_for(path) {
            return self.skip(path, reason);
        }

        let begun = self.store.update(path, &mut |current| {
            if let Some(existing) = current {
                if existing.status().is_busy() || existing.ai_pending() {
                    return None;
                }
                if !force && existing.skip_reason().is_some_and(SkipReason::is_sticky) {
                    return None;
                }
            }
            let mut record = FileRecord::new(path);
            record.begin_scan();
            Some(record)
        });

        let Some(mut record) = begun else {
            debug!("Not processing {:?}: busy or excluded", path);
            return None;
        };

        if let Err(reason) = self.inspect(&mut record).await {
            if reason.is_empty() {
                // Directories are not tracked
                self.store.remove(path);
                return None;
            }
            warn!("Analysis of {:?} failed: {}", path, reason);
            record.mark_failed(reason);
            self.store.upsert(record.clone());
            return Some(record);
        }

        let mut classification =
            self.rules
                .classify(&record.file_name, &record.extension, record.size_bytes);
        if classification.confidence < MEDIUM_CONFIDENCE {
            classification = Classification::fallback(classification.confidence);
        }

        record.keywords = filename_keywords(&record.file_name);
        record.description = None;

        let destination = self.planner.destination(&record, &classification, watch_root);
        let wants_ai = self.settings.ai_enabled
            && self.ai.is_some()
            && classification.confidence < self.settings.ai_threshold;

        record.mark_analyzed(classification, destination);
        record.set_ai_pending(wants_ai);
        self.store.upsert(record.clone());

        if !wants_ai {
            self.announce(&record);
        }
        Some(record)
    }

    /// Metadata and readability check; an empty error means "not a file"
    async fn inspect(&self, record: &mut FileRecord) -> std::result::Result<(), String> {
        let metadata = match tokio::fs::metadata(&record.path).await {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err("file disappeared before analysis".to_string())
            }
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                return Err(format!("permission denied: {}", e))
            }
            Err(e) => return Err(e.to_string()),
        };

        if !metadata.is_file() {
            return Err(String::new());
        }

        if let Err(e) = tokio::fs::File::open(&record.path).await {
            return Err(match e.kind() {
                ErrorKind::NotFound => "file disappeared before analysis".to_string(),
                ErrorKind::PermissionDenied => format!("permission denied: {}", e),
                _ => format!("unreadable: {}", e),
            });
        }

        record.refresh_metadata(&metadata);
        Ok(())
    }

    /// Merge an AI outcome into the stored record and clear its marker.
    ///
    /// The flag tells whether the AI verdict was taken.
    fn finish_ai(
        &self,
        path: &Path,
        watch_root: &Path,
        outcome: &AiOutcome,
    ) -> Option<(FileRecord, bool)> {
        let verdict: Option<&AiVerdict> = outcome.verdict();
        let mut accepted = false;
        if let Some(msg) = outcome.failure_message() {
            warn!("Keeping rule result for {:?}: {}", path, msg);
        }

        let finished = self.store.update(path, &mut |current| {
            let mut record = current?.clone();
            if record.status() != FileStatus::Analyzed || !record.ai_pending() {
                return None;
            }

            if let Some(v) = verdict {
                if v.confidence >= record.confidence {
                    accepted = true;
                    merge_verdict(&mut record, v);
                    let classification = record.classification();
                    let destination = self.planner.destination(&record, &classification, watch_root);
                    record.mark_analyzed(classification, destination);
                } else {
                    debug!(
                        "AI confidence {:.2} below rule confidence {:.2} for {:?}",
                        v.confidence, record.confidence, path
                    );
                }
            }

            record.set_ai_pending(false);
            Some(record)
        });

        let record = finished?;
        self.announce(&record);
        Some((record, accepted))
    }

    fn skip(&self, path: &Path, reason: SkipReason) -> Option<FileRecord> {
        self.store.update(path, &mut |current| {
            let mut record = current.cloned().unwrap_or_else(|| FileRecord::new(path));
            if record.status().is_busy() || record.skip_reason() == Some(reason) {
                return None;
            }
            debug!("Skipping {:?}: {}", path, reason);
            record.mark_skipped(reason).then_some(record)
        })
    }

    fn announce(&self, record: &FileRecord) {
        if self.settings.show_notifications {
            info!(
                "Analyzed {} as {}/{} ({:.0}%)",
                record.file_name,
                record.category,
                record.sub_category,
                record.confidence * 100.0
            );
        }
        self.events.record_updated(record);
    }
}

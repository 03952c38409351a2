// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Tracked file records and their lifecycle
//!
//! A [`FileRecord`] is keyed by its absolute source path. Status changes go
//! through the transition methods so that the suggested path, error message
//! and skip reason always agree with the status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::Metadata;
use std::path::{Path, PathBuf};

use crate::Result;

/// Category used when nothing better is known
pub const FALLBACK_CATEGORY: &str = "Others";

/// Sub-category used when nothing better is known
pub const FALLBACK_SUB_CATEGORY: &str = "Unknown";

/// Processing status of a tracked file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileStatus {
    Pending,
    Scanning,
    Analyzed,
    Organizing,
    Organized,
    Failed,
    Skipped,
}

impl FileStatus {
    /// A record in this state is being worked on and must not be re-entered
    pub fn is_busy(self) -> bool {
        matches!(self, FileStatus::Scanning | FileStatus::Organizing)
    }

    /// Statuses that carry a suggested destination
    pub fn has_destination(self) -> bool {
        matches!(
            self,
            FileStatus::Analyzed | FileStatus::Organizing | FileStatus::Organized
        )
    }

    pub fn is_terminal(self) -> bool {
        self == FileStatus::Organized
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileStatus::Pending => "pending",
            FileStatus::Scanning => "scanning",
            FileStatus::Analyzed => "analyzed",
            FileStatus::Organizing => "organizing",
            FileStatus::Organized => "organized",
            FileStatus::Failed => "failed",
            FileStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Why a record was skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Dot-file
    Hidden,
    /// OS bookkeeping files such as `desktop.ini`
    SystemFile,
    /// Partial downloads and files still being written
    Temporary,
    /// Excluded by the user
    Excluded,
    /// Moved back into place by an undo
    Restored,
}

impl SkipReason {
    /// Sticky reasons survive re-detection by the watcher
    pub fn is_sticky(self) -> bool {
        matches!(self, SkipReason::Excluded | SkipReason::Restored)
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::Hidden => "hidden file",
            SkipReason::SystemFile => "system file",
            SkipReason::Temporary => "temporary or incomplete file",
            SkipReason::Excluded => "excluded by user",
            SkipReason::Restored => "restored by undo",
        };
        f.write_str(s)
    }
}

/// A category guess with its confidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: String,
    pub sub_category: String,
    /// Confidence score (0.0 - 1.0)
    pub confidence: f64,
}

impl Classification {
    pub fn new(category: impl Into<String>, sub_category: impl Into<String>, confidence: f64) -> Self {
        Self {
            category: category.into(),
            sub_category: sub_category.into(),
            confidence: clamp_confidence(confidence),
        }
    }

    /// The catch-all bucket at the given confidence
    pub fn fallback(confidence: f64) -> Self {
        Self::new(FALLBACK_CATEGORY, FALLBACK_SUB_CATEGORY, confidence)
    }

    pub fn is_fallback(&self) -> bool {
        self.category == FALLBACK_CATEGORY
    }
}

/// One tracked file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: PathBuf,
    pub file_name: String,
    /// Lowercase extension without the dot, empty when absent
    pub extension: String,
    pub size_bytes: u64,
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
    pub category: String,
    pub sub_category: String,
    pub confidence: f64,
    pub keywords: Vec<String>,
    pub description: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    status: FileStatus,
    suggested_path: Option<PathBuf>,
    error_message: Option<String>,
    skip_reason: Option<SkipReason>,
    ai_pending: bool,
}

impl FileRecord {
    /// Create a pending record for a path without touching the filesystem
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        Self {
            path,
            file_name,
            extension,
            size_bytes: 0,
            created_at: None,
            modified_at: None,
            category: String::new(),
            sub_category: String::new(),
            confidence: 0.0,
            keywords: Vec::new(),
            description: None,
            processed_at: None,
            status: FileStatus::Pending,
            suggested_path: None,
            error_message: None,
            skip_reason: None,
            ai_pending: false,
        }
    }

    /// Create a pending record populated from the file's metadata
    pub fn from_path(path: &Path) -> Result<Self> {
        let metadata = std::fs::metadata(path)?;
        let mut record = Self::new(path);
        record.refresh_metadata(&metadata);
        Ok(record)
    }

    /// Copy size and timestamps from filesystem metadata
    pub fn refresh_metadata(&mut self, metadata: &Metadata) {
        self.size_bytes = metadata.len();
        self.modified_at = metadata.modified().ok().map(DateTime::<Utc>::from);
        // Not every filesystem records a birth time
        self.created_at = metadata
            .created()
            .ok()
            .map(DateTime::<Utc>::from)
            .or(self.modified_at);
    }

    pub fn status(&self) -> FileStatus {
        self.status
    }

    pub fn suggested_path(&self) -> Option<&Path> {
        self.suggested_path.as_deref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        self.skip_reason
    }

    /// True while an AI refinement for this record is outstanding
    pub fn ai_pending(&self) -> bool {
        self.ai_pending
    }

    pub fn classification(&self) -> Classification {
        Classification {
            category: self.category.clone(),
            sub_category: self.sub_category.clone(),
            confidence: self.confidence,
        }
    }

    /// Start (or restart) classification of this path
    pub fn begin_scan(&mut self) {
        self.status = FileStatus::Scanning;
        self.suggested_path = None;
        self.error_message = None;
        self.skip_reason = None;
        self.ai_pending = false;
        self.processed_at = None;
    }

    /// Accept a classification and its destination
    pub fn mark_analyzed(&mut self, classification: Classification, suggested_path: PathBuf) {
        let classification = if classification.category.trim().is_empty() {
            Classification::fallback(classification.confidence)
        } else {
            classification
        };
        self.category = classification.category;
        self.sub_category = classification.sub_category;
        self.confidence = clamp_confidence(classification.confidence);
        self.status = FileStatus::Analyzed;
        self.suggested_path = Some(suggested_path);
        self.error_message = None;
        self.skip_reason = None;
    }

    pub fn set_ai_pending(&mut self, pending: bool) {
        self.ai_pending = pending && self.status == FileStatus::Analyzed;
    }

    /// Move to ORGANIZING; only an analyzed record with no AI work outstanding qualifies
    pub fn begin_organize(&mut self) -> bool {
        if self.status != FileStatus::Analyzed || self.ai_pending {
            return false;
        }
        self.status = FileStatus::Organizing;
        true
    }

    /// Record the final location of a moved file; only valid while organizing
    pub fn mark_organized(&mut self, final_path: PathBuf) -> bool {
        if self.status != FileStatus::Organizing {
            return false;
        }
        self.status = FileStatus::Organized;
        self.suggested_path = Some(final_path);
        self.error_message = None;
        self.skip_reason = None;
        self.ai_pending = false;
        self.processed_at = Some(Utc::now());
        true
    }

    /// Fail the record; returns false if the record is already terminal
    pub fn mark_failed(&mut self, message: impl Into<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let mut message = message.into();
        if message.trim().is_empty() {
            message = "unknown error".to_string();
        }
        self.status = FileStatus::Failed;
        self.error_message = Some(message);
        self.suggested_path = None;
        self.skip_reason = None;
        self.ai_pending = false;
        true
    }

    /// Skip the record; returns false if the record is already terminal
    pub fn mark_skipped(&mut self, reason: SkipReason) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = FileStatus::Skipped;
        self.skip_reason = Some(reason);
        self.suggested_path = None;
        self.error_message = None;
        self.ai_pending = false;
        true
    }

    /// Lists every violated invariant; empty means consistent
    pub fn check_invariants(&self) -> Vec<&'static str> {
        let mut violations = Vec::new();

        if !(0.0..=1.0).contains(&self.confidence) {
            violations.push("confidence outside [0, 1]");
        }
        if self.status.has_destination() && self.category.is_empty() {
            violations.push("category empty after analysis");
        }
        if self.status.has_destination() != self.suggested_path.is_some() {
            violations.push("suggested path does not match status");
        }
        let has_error = self
            .error_message
            .as_deref()
            .is_some_and(|m| !m.is_empty());
        if (self.status == FileStatus::Failed) != has_error {
            violations.push("error message does not match status");
        }
        if (self.status == FileStatus::Skipped) != self.skip_reason.is_some() {
            violations.push("skip reason does not match status");
        }
        if self.ai_pending && self.status != FileStatus::Analyzed {
            violations.push("AI marker outside analyzed state");
        }

        violations
    }
}

/// Clamp to [0, 1], mapping NaN to 0
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyzed(path: &str) -> FileRecord {
        let mut record = FileRecord::new(path);
        record.begin_scan();
        record.mark_analyzed(
            Classification::new("Documents", "Reports", 0.94),
            PathBuf::from("/dest/Documents/Reports/report.pdf"),
        );
        record
    }

    #[test]
    fn test_new_record_derives_name_and_extension() {
        let record = FileRecord::new("/tmp/in/Report_Q1.PDF");
        assert_eq!(record.file_name, "Report_Q1.PDF");
        assert_eq!(record.extension, "pdf");
        assert_eq!(record.status(), FileStatus::Pending);
        assert!(record.check_invariants().is_empty());
    }

    #[test]
    fn test_failed_cannot_follow_organized() {
        let mut record = analyzed("/tmp/in/report.pdf");
        assert!(record.begin_organize());
        assert!(record.mark_organized(PathBuf::from("/dest/report.pdf")));
        assert!(!record.mark_failed("late error"));
        assert!(!record.mark_skipped(SkipReason::Excluded));
        assert_eq!(record.status(), FileStatus::Organized);
        assert!(record.processed_at.is_some());
    }

    #[test]
    fn test_begin_organize_waits_for_ai() {
        let mut record = analyzed("/tmp/in/report.pdf");
        record.set_ai_pending(true);
        assert!(!record.begin_organize());
        record.set_ai_pending(false);
        assert!(record.begin_organize());
    }

    #[test]
    fn test_empty_error_message_is_replaced() {
        let mut record = FileRecord::new("/tmp/in/a.txt");
        record.begin_scan();
        record.mark_failed("  ");
        assert_eq!(record.error_message(), Some("unknown error"));
    }

    #[test]
    fn test_invariants_hold_across_transition_sequences() {
        // Walk every short sequence of transitions and check the invariants after each step
        let steps: [fn(&mut FileRecord); 8] = [
            |r| r.begin_scan(),
            |r| r.mark_analyzed(Classification::new("Images", "Photos", 0.7), PathBuf::from("/d/x.jpg")),
            |r| r.set_ai_pending(true),
            |r| r.set_ai_pending(false),
            |r| {
                r.begin_organize();
            },
            |r| {
                r.mark_organized(PathBuf::from("/d/x_1.jpg"));
            },
            |r| {
                r.mark_failed("permission denied");
            },
            |r| {
                r.mark_skipped(SkipReason::Temporary);
            },
        ];

        for a in 0..steps.len() {
            for b in 0..steps.len() {
                for c in 0..steps.len() {
                    let mut record = FileRecord::new("/src/x.jpg");
                    for step in [a, b, c] {
                        steps[step](&mut record);
                        assert!(
                            record.check_invariants().is_empty(),
                            "sequence {:?} broke {:?}",
                            [a, b, c],
                            record.check_invariants()
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_confidence_is_clamped() {
        assert_eq!(Classification::new("A", "B", 1.7).confidence, 1.0);
        assert_eq!(Classification::new("A", "B", -0.2).confidence, 0.0);
        assert_eq!(clamp_confidence(f64::NAN), 0.0);
    }
}

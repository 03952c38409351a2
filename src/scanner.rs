// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Duplicate and cleanup candidate detection
//!
//! Nothing here deletes or moves files. Callers decide what to do with the
//! groups and candidates.

use chrono::{DateTime, Utc};
use glob::{MatchOptions, Pattern};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::CleanupConfig;
use crate::record::FileRecord;
use crate::{Result, WardenError};

/// Which copy of a duplicate group to keep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeeperPolicy {
    #[default]
    EarliestCreated,
    LatestModified,
    ShortestPath,
}

/// Files with identical content
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateGroup {
    /// blake3 hex digest
    pub hash: String,
    pub size_bytes: u64,
    pub keeper: PathBuf,
    /// Every member, keeper included, sorted
    pub paths: Vec<PathBuf>,
}

impl DuplicateGroup {
    /// Members other than the keeper
    pub fn redundant(&self) -> impl Iterator<Item = &Path> {
        self.paths
            .iter()
            .filter(move |p| **p != self.keeper)
            .map(PathBuf::as_path)
    }

    pub fn wasted_bytes(&self) -> u64 {
        self.size_bytes * (self.paths.len() as u64).saturating_sub(1)
    }
}

/// Stream a file through blake3
pub fn hash_file(path: &Path) -> Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = blake3::Hasher::new();
    std::io::copy(&mut reader, &mut hasher)?;
    Ok(hasher.finalize().to_hex().to_string())
}

/// Group records by content. Groups of one are never reported.
///
/// Files are pre-grouped by size so only possible duplicates get hashed.
/// Unreadable files are left out with a warning.
pub fn find_duplicates(records: &[FileRecord], policy: KeeperPolicy) -> Vec<DuplicateGroup> {
    let mut by_size: HashMap<u64, Vec<&FileRecord>> = HashMap::new();
    for record in records.iter().filter(|r| r.size_bytes > 0) {
        by_size.entry(record.size_bytes).or_default().push(record);
    }

    let mut by_hash: BTreeMap<(u64, String), Vec<&FileRecord>> = BTreeMap::new();
    for (size, candidates) in by_size {
        if candidates.len() < 2 {
            continue;
        }
        for record in candidates {
            match hash_file(&record.path) {
                Ok(hash) => by_hash.entry((size, hash)).or_default().push(record),
                Err(e) => warn!("Skipping {:?} in duplicate scan: {}", record.path, e),
            }
        }
    }

    let mut groups: Vec<DuplicateGroup> = by_hash
        .into_iter()
        .filter(|(_, members)| members.len() >= 2)
        .map(|((size_bytes, hash), members)| {
            let keeper = pick_keeper(&members, policy);
            let mut paths: Vec<PathBuf> = members.iter().map(|r| r.path.clone()).collect();
            paths.sort();
            DuplicateGroup {
                hash,
                size_bytes,
                keeper,
                paths,
            }
        })
        .collect();

    groups.sort_by(|a, b| a.keeper.cmp(&b.keeper));
    debug!("Found {} duplicate group(s)", groups.len());
    groups
}

fn pick_keeper(members: &[&FileRecord], policy: KeeperPolicy) -> PathBuf {
    let mut sorted: Vec<&FileRecord> = members.to_vec();
    match policy {
        // Unknown dates sort last
        KeeperPolicy::EarliestCreated => sorted.sort_by(|a, b| {
            (a.created_at.is_none(), a.created_at, &a.path)
                .cmp(&(b.created_at.is_none(), b.created_at, &b.path))
        }),
        KeeperPolicy::LatestModified => sorted.sort_by(|a, b| {
            b.modified_at
                .cmp(&a.modified_at)
                .then_with(|| a.path.cmp(&b.path))
        }),
        KeeperPolicy::ShortestPath => sorted.sort_by(|a, b| {
            a.path
                .as_os_str()
                .len()
                .cmp(&b.path.as_os_str().len())
                .then_with(|| a.path.cmp(&b.path))
        }),
    }
    sorted
        .first()
        .map(|r| r.path.clone())
        .unwrap_or_default()
}

/// Why a file was flagged for cleanup
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum CleanupReason {
    ZeroByte,
    TemporaryName { pattern: String },
    StaleInLowValueLocation { age_days: i64 },
}

impl fmt::Display for CleanupReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CleanupReason::ZeroByte => write!(f, "empty file"),
            CleanupReason::TemporaryName { pattern } => write!(f, "temporary name ({})", pattern),
            CleanupReason::StaleInLowValueLocation { age_days } => {
                write!(f, "untouched for {} days in a cache/temp folder", age_days)
            }
        }
    }
}

/// A file worth reviewing for deletion
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanupCandidate {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub reasons: Vec<CleanupReason>,
}

/// Compiled cleanup heuristics
#[derive(Debug, Clone)]
pub struct CleanupPolicy {
    patterns: Vec<Pattern>,
    max_age_days: i64,
    low_value_dirs: Vec<String>,
}

impl CleanupPolicy {
    pub fn from_config(config: &CleanupConfig) -> Result<Self> {
        let patterns = config
            .temp_patterns
            .iter()
            .map(|p| {
                Pattern::new(p)
                    .map_err(|e| WardenError::Config(format!("Invalid temp pattern '{}': {}", p, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            patterns,
            max_age_days: i64::try_from(config.max_age_days).unwrap_or(i64::MAX),
            low_value_dirs: config.low_value_dirs.iter().map(|d| d.to_lowercase()).collect(),
        })
    }

    fn temp_pattern(&self, file_name: &str) -> Option<&Pattern> {
        let options = MatchOptions {
            case_sensitive: false,
            require_literal_separator: true,
            require_literal_leading_dot: false,
        };
        self.patterns
            .iter()
            .find(|p| p.matches_with(file_name, options))
    }

    fn in_low_value_dir(&self, path: &Path) -> bool {
        path.parent().is_some_and(|parent| {
            parent.components().any(|c| {
                let name = c.as_os_str().to_string_lossy().to_lowercase();
                self.low_value_dirs.contains(&name)
            })
        })
    }
}

/// Flag records by the cleanup heuristics; each candidate lists every matched reason
pub fn find_cleanup_candidates(
    records: &[FileRecord],
    policy: &CleanupPolicy,
    now: DateTime<Utc>,
) -> Vec<CleanupCandidate> {
    let mut candidates: Vec<CleanupCandidate> = records
        .iter()
        .filter_map(|record| {
            let mut reasons = Vec::new();

            if record.size_bytes == 0 {
                reasons.push(CleanupReason::ZeroByte);
            }
            if let Some(pattern) = policy.temp_pattern(&record.file_name) {
                reasons.push(CleanupReason::TemporaryName {
                    pattern: pattern.as_str().to_string(),
                });
            }
            if let Some(modified) = record.modified_at {
                let age_days = (now - modified).num_days();
                if age_days > policy.max_age_days && policy.in_low_value_dir(&record.path) {
                    reasons.push(CleanupReason::StaleInLowValueLocation { age_days });
                }
            }

            (!reasons.is_empty()).then(|| CleanupCandidate {
                path: record.path.clone(),
                size_bytes: record.size_bytes,
                reasons,
            })
        })
        .collect();

    candidates.sort_by(|a, b| a.path.cmp(&b.path));
    candidates
}

/// List regular files under `root`, sorted. Symlinked directories are not followed.
pub fn walk_files(root: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    let mut first = true;

    while let Some(dir) = pending.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if first => return Err(e.into()),
            Err(e) => {
                warn!("Cannot read directory {:?}: {}", dir, e);
                continue;
            }
        };
        first = false;

        for entry in entries.flatten() {
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_file() {
                files.push(entry.path());
            } else if recursive && file_type.is_dir() {
                pending.push(entry.path());
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Records for every file under `root`, skipping files that vanish mid-walk
pub fn records_under(root: &Path, recursive: bool) -> Result<Vec<FileRecord>> {
    Ok(walk_files(root, recursive)?
        .into_iter()
        .filter_map(|p| FileRecord::from_path(&p).ok())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(path: &Path) -> FileRecord {
        FileRecord::from_path(path).unwrap()
    }

    #[test]
    fn test_identical_content_is_grouped() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("copy of a.txt");
        let c = dir.path().join("different.txt");
        let d = dir.path().join("same-size.txt");
        std::fs::write(&a, b"hello world").unwrap();
        std::fs::write(&b, b"hello world").unwrap();
        std::fs::write(&c, b"something else entirely").unwrap();
        std::fs::write(&d, b"hello_world").unwrap();

        let records: Vec<_> = [&a, &b, &c, &d].iter().map(|p| record(p)).collect();
        let groups = find_duplicates(&records, KeeperPolicy::ShortestPath);

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].paths, vec![a.clone(), b.clone()]);
        assert_eq!(groups[0].keeper, a);
        assert_eq!(groups[0].redundant().collect::<Vec<_>>(), vec![b.as_path()]);
        assert_eq!(groups[0].wasted_bytes(), 11);
        assert!(!groups.iter().any(|g| g.paths.contains(&c) || g.paths.contains(&d)));
    }

    #[test]
    fn test_keeper_policies_are_deterministic() {
        let now = Utc::now();
        let mut old = FileRecord::new("/z/old.txt");
        old.created_at = Some(now - Duration::days(10));
        old.modified_at = Some(now - Duration::days(1));
        let mut new = FileRecord::new("/a/new.txt");
        new.created_at = Some(now);
        new.modified_at = Some(now - Duration::days(5));
        let undated = FileRecord::new("/b.txt");

        let members = [&old, &new, &undated];
        assert_eq!(pick_keeper(&members, KeeperPolicy::EarliestCreated), old.path);
        assert_eq!(pick_keeper(&members, KeeperPolicy::LatestModified), old.path);
        assert_eq!(pick_keeper(&members, KeeperPolicy::ShortestPath), undated.path);
    }

    #[test]
    fn test_cleanup_reasons() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("Cache");
        std::fs::create_dir(&cache).unwrap();

        let empty = dir.path().join("empty.log");
        let partial = dir.path().join("Movie.CRDOWNLOAD");
        let stale = cache.join("blob.bin");
        let fresh = dir.path().join("fresh.bin");
        std::fs::write(&empty, b"").unwrap();
        std::fs::write(&partial, b"x").unwrap();
        std::fs::write(&stale, b"x").unwrap();
        std::fs::write(&fresh, b"x").unwrap();

        let mut records: Vec<_> = [&empty, &partial, &stale, &fresh].iter().map(|p| record(p)).collect();
        let now = Utc::now();
        records[2].modified_at = Some(now - Duration::days(60));

        let policy = CleanupPolicy::from_config(&CleanupConfig::default()).unwrap();
        let candidates = find_cleanup_candidates(&records, &policy, now);
        let by_path: HashMap<_, _> = candidates.iter().map(|c| (c.path.clone(), c.reasons.clone())).collect();

        assert_eq!(by_path[&empty], vec![CleanupReason::ZeroByte]);
        assert_eq!(
            by_path[&partial],
            vec![CleanupReason::TemporaryName { pattern: "*.crdownload".to_string() }]
        );
        assert!(matches!(
            by_path[&stale][..],
            [CleanupReason::StaleInLowValueLocation { age_days }] if age_days >= 59
        ));
        assert!(!by_path.contains_key(&fresh));
    }

    #[test]
    fn test_walk_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("top.txt"), b"t").unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("a/b/deep.txt"), b"d").unwrap();

        assert_eq!(walk_files(dir.path(), false).unwrap(), vec![dir.path().join("top.txt")]);
        assert_eq!(walk_files(dir.path(), true).unwrap().len(), 2);
        assert!(walk_files(&dir.path().join("missing"), true).is_err());
    }
}

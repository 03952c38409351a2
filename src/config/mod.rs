// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Configuration management for filewarden

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::classifier::{HIGH_CONFIDENCE, MEDIUM_CONFIDENCE};

/// Main application configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    /// Directories to watch
    #[serde(default = "default_watch_paths")]
    pub watch_paths: Vec<String>,

    /// Move files as soon as they are analyzed
    #[serde(default)]
    pub auto_organize_enabled: bool,

    /// Log a line for every analyzed or organized file
    #[serde(default = "default_true")]
    pub show_notifications: bool,

    /// Root of the organized tree; the watched folder is used when unset
    #[serde(default)]
    pub organization_root_folder: Option<PathBuf>,

    /// Consult the AI classifier for low-confidence files
    #[serde(default)]
    pub ai_analysis_enabled: bool,

    /// Credential sent to the AI service, if it needs one
    #[serde(default)]
    pub api_key: Option<String>,

    /// Rule confidence below which the AI classifier is consulted
    #[serde(default = "default_ai_threshold")]
    pub ai_confidence_threshold: f64,

    /// Categories whose destination nests by year and month
    #[serde(default = "default_date_categories")]
    pub date_organized_categories: BTreeSet<String>,

    /// AI engine configuration
    #[serde(default)]
    pub ai_engine: EngineConfig,

    /// Watcher timing
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// Organize policy
    #[serde(default)]
    pub organize: OrganizeConfig,

    /// Cleanup heuristics
    #[serde(default)]
    pub cleanup: CleanupConfig,

    /// Undo journal settings
    #[serde(default)]
    pub journal: JournalConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EngineConfig {
    #[serde(default = "default_engine_url")]
    pub url: String,
    #[serde(default = "default_text_model")]
    pub model: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Simultaneous AI requests across the whole engine
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Minimum gap between two AI requests
    #[serde(default = "default_request_delay")]
    pub request_delay_ms: u64,
    /// Characters of extracted text sent along with a request
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatcherConfig {
    /// Quiet period after the last write before a file is ready
    #[serde(default = "default_stabilization")]
    pub stabilization_ms: u64,
    /// Delay between two passes over pending files
    #[serde(default = "default_scan_interval")]
    pub scan_interval_ms: u64,
    /// Files classified or organized at the same time
    #[serde(default = "default_workers")]
    pub workers: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OrganizeConfig {
    /// Files below this confidence are left for the user to organize
    #[serde(default = "default_auto_floor")]
    pub auto_organize_min_confidence: Option<f64>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CleanupConfig {
    /// Age after which files in low-value folders are flagged
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u64,
    /// Folder names considered low value (caches, temp folders)
    #[serde(default = "default_low_value_dirs")]
    pub low_value_dirs: Vec<String>,
    /// Glob patterns for temporary file names
    #[serde(default = "default_temp_patterns")]
    pub temp_patterns: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JournalBackend {
    Jsonl,
    Sqlite,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct JournalConfig {
    #[serde(default = "default_journal_backend")]
    pub backend: JournalBackend,
    #[serde(default = "default_journal_path")]
    pub path: PathBuf,
}

// Default value functions
fn default_watch_paths() -> Vec<String> { vec!["./watch".to_string()] }
fn default_true() -> bool { true }
fn default_ai_threshold() -> f64 { HIGH_CONFIDENCE }
fn default_engine_url() -> String { "http://localhost:11434".to_string() }
fn default_text_model() -> String { "llama3.2:3b".to_string() }
fn default_timeout() -> u64 { 60 }
fn default_max_concurrent() -> usize { 1 }
fn default_request_delay() -> u64 { 500 }
fn default_excerpt_chars() -> usize { 2000 }
fn default_stabilization() -> u64 { 2000 }
fn default_scan_interval() -> u64 { 250 }
fn default_workers() -> usize { 4 }
fn default_auto_floor() -> Option<f64> { Some(MEDIUM_CONFIDENCE) }
fn default_max_age_days() -> u64 { 30 }
fn default_journal_backend() -> JournalBackend { JournalBackend::Jsonl }
fn default_journal_path() -> PathBuf { PathBuf::from("filewarden_journal.jsonl") }

fn default_date_categories() -> BTreeSet<String> {
    ["Images", "Videos"].into_iter().map(String::from).collect()
}

fn default_low_value_dirs() -> Vec<String> {
    vec!["cache", ".cache", "caches", "tmp", "temp", "logs"]
        .into_iter().map(String::from).collect()
}

fn default_temp_patterns() -> Vec<String> {
    vec![
        "*.tmp", "*.temp", "~$*", "*~", "*.swp", "*.bak", "*.part", "*.partial",
        "*.crdownload", "*.download", ".ds_store", "thumbs.db", "desktop.ini",
    ].into_iter().map(String::from).collect()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            watch_paths: default_watch_paths(),
            auto_organize_enabled: false,
            show_notifications: true,
            organization_root_folder: None,
            ai_analysis_enabled: false,
            api_key: None,
            ai_confidence_threshold: default_ai_threshold(),
            date_organized_categories: default_date_categories(),
            ai_engine: EngineConfig::default(),
            watcher: WatcherConfig::default(),
            organize: OrganizeConfig::default(),
            cleanup: CleanupConfig::default(),
            journal: JournalConfig::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            url: default_engine_url(),
            model: default_text_model(),
            timeout_secs: default_timeout(),
            max_concurrent: default_max_concurrent(),
            request_delay_ms: default_request_delay(),
            excerpt_chars: default_excerpt_chars(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            stabilization_ms: default_stabilization(),
            scan_interval_ms: default_scan_interval(),
            workers: default_workers(),
        }
    }
}

impl Default for OrganizeConfig {
    fn default() -> Self {
        Self {
            auto_organize_min_confidence: default_auto_floor(),
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            max_age_days: default_max_age_days(),
            low_value_dirs: default_low_value_dirs(),
            temp_patterns: default_temp_patterns(),
        }
    }
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            backend: default_journal_backend(),
            path: default_journal_path(),
        }
    }
}

impl WatcherConfig {
    pub fn stabilization(&self) -> Duration {
        Duration::from_millis(self.stabilization_ms)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms.max(10))
    }
}

impl AppConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> crate::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = serde_json::from_str(&content)
                .map_err(|e| crate::WardenError::Config(format!("Failed to parse config: {}", e)))?;
            config.validate()?;
            Ok(config)
        } else {
            tracing::info!("Config file not found at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> crate::Result<()> {
        let in_unit = |v: f64| (0.0..=1.0).contains(&v);

        if !in_unit(self.ai_confidence_threshold) {
            return Err(crate::WardenError::Config(format!(
                "ai_confidence_threshold must be within 0.0-1.0, got {}",
                self.ai_confidence_threshold
            )));
        }
        if let Some(floor) = self.organize.auto_organize_min_confidence {
            if !in_unit(floor) {
                return Err(crate::WardenError::Config(format!(
                    "auto_organize_min_confidence must be within 0.0-1.0, got {}",
                    floor
                )));
            }
        }
        if self.ai_engine.max_concurrent == 0 {
            return Err(crate::WardenError::Config(
                "ai_engine.max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.watcher.workers == 0 {
            return Err(crate::WardenError::Config(
                "watcher.workers must be at least 1".to_string(),
            ));
        }
        for pattern in &self.cleanup.temp_patterns {
            glob::Pattern::new(pattern).map_err(|e| {
                crate::WardenError::Config(format!("Invalid temp pattern '{}': {}", pattern, e))
            })?;
        }
        Ok(())
    }

    /// API key with surrounding whitespace removed; blank counts as none
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: AppConfig = serde_json::from_str(
            r#"{ "auto_organize_enabled": true, "watcher": { "stabilization_ms": 500 } }"#,
        )
        .unwrap();

        assert!(config.auto_organize_enabled);
        assert_eq!(config.watcher.stabilization_ms, 500);
        assert_eq!(config.watcher.scan_interval_ms, 250);
        assert_eq!(config.ai_confidence_threshold, HIGH_CONFIDENCE);
        assert!(config.date_organized_categories.contains("Images"));
        assert_eq!(config.journal.backend, JournalBackend::Jsonl);
    }

    #[test]
    fn test_validate_rejects_out_of_range_threshold() {
        let config = AppConfig {
            ai_confidence_threshold: 1.5,
            ..AppConfig::default()
        };
        tokio_test::assert_err!(config.validate());
        tokio_test::assert_ok!(AppConfig::default().validate());
    }

    #[test]
    fn test_validate_rejects_zero_limits_and_bad_patterns() {
        let mut config = AppConfig::default();
        config.watcher.workers = 0;
        tokio_test::assert_err!(config.validate());

        let mut config = AppConfig::default();
        config.ai_engine.max_concurrent = 0;
        tokio_test::assert_err!(config.validate());

        let mut config = AppConfig::default();
        config.cleanup.temp_patterns.push("[unclosed".to_string());
        tokio_test::assert_err!(config.validate());

        let mut config = AppConfig::default();
        config.organize.auto_organize_min_confidence = None;
        tokio_test::assert_ok!(config.validate());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = AppConfig::default();
        config.api_key = Some("  secret ".to_string());
        config.journal.backend = JournalBackend::Sqlite;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.api_key(), Some("secret"));
        assert_eq!(loaded.journal.backend, JournalBackend::Sqlite);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.watch_paths, vec!["./watch".to_string()]);
    }
}

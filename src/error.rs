// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Error types for filewarden

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for filewarden operations
pub type Result<T> = std::result::Result<T, WardenError>;

/// filewarden error types
#[derive(Error, Debug)]
pub enum WardenError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("API error: {0}")]
    Api(#[from] reqwest::Error),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Watched folder is no longer accessible: {0:?}")]
    RootLost(PathBuf),

    #[error("AI service not available: {0}")]
    AiUnavailable(String),

    #[error("AI request timed out: {0}")]
    AiTimeout(String),

    #[error("AI quota exceeded: {0}")]
    AiQuotaExceeded(String),

    #[error("AI credentials rejected: {0}")]
    AiUnauthorized(String),

    #[error("Malformed AI response: {0}")]
    MalformedResponse(String),

    #[error("Could not find a free destination for {0:?}")]
    ConflictUnresolved(PathBuf),

    #[error("Journal error: {0}")]
    Journal(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

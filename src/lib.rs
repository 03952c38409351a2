// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! filewarden: folder watching, file classification and reversible organization
//!
//! Files dropped into a watched folder are classified by extension and
//! filename rules, optionally refined by a local AI model, and moved into
//! a `Category/SubCategory` tree. Every move is written to an undo journal
//! before it happens.

pub mod ai;
pub mod classifier;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod events;
pub mod extract;
pub mod journal;
pub mod organize;
pub mod pipeline;
pub mod record;
pub mod scanner;
pub mod store;
pub mod watcher;

pub use config::AppConfig;
pub use engine::Engine;
pub use error::{Result, WardenError};
pub use record::{FileRecord, FileStatus};

// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! filewarden Undo Utility
//!
//! Reverses moves recorded in the undo journal without loading a config.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use filewarden::config::{JournalBackend, JournalConfig};
use filewarden::events::EventBus;
use filewarden::journal::Journal;
use filewarden::organize::OrganizeEngine;
use filewarden::store::MemoryStore;

#[derive(Parser, Debug)]
#[command(name = "filewarden-undo")]
#[command(version)]
#[command(about = "Undo filewarden moves")]
struct Args {
    /// Path to the journal
    #[arg(short, long, default_value = "filewarden_journal.jsonl")]
    journal: PathBuf,

    /// The journal is a SQLite database
    #[arg(long)]
    sqlite: bool,

    /// Number of moves to undo (use 0 for all)
    #[arg(short, long, default_value = "1")]
    count: usize,

    /// Show what would be undone without doing it
    #[arg(long)]
    dry_run: bool,

    /// List all entries in the journal
    #[arg(long)]
    list: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if !args.journal.exists() {
        eprintln!("Journal not found: {:?}", args.journal);
        eprintln!("No moves to undo.");
        return Ok(());
    }

    let config = JournalConfig {
        backend: if args.sqlite { JournalBackend::Sqlite } else { JournalBackend::Jsonl },
        path: args.journal.clone(),
    };
    let journal = Journal::open(&config)
        .with_context(|| format!("opening journal {:?}", args.journal))?;

    if args.list {
        let records = journal.recent(usize::MAX)?;
        println!("Move history ({} entries):", records.len());
        println!("{:-<80}", "");
        for (i, record) in records.iter().enumerate() {
            println!(
                "{:3}. [{}] {:?} {} -> {}",
                i + 1,
                record.entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                record.state,
                record.entry.original_path.display(),
                record.entry.new_path.display()
            );
            if let Some(error) = &record.error {
                println!("     error: {}", error);
            }
        }
        return Ok(());
    }

    let undoable = journal.undoable()?;
    let count = if args.count == 0 {
        undoable.len()
    } else {
        args.count.min(undoable.len())
    };

    if count == 0 {
        println!("No moves to undo.");
        return Ok(());
    }

    if args.dry_run {
        println!("[DRY RUN] Undoing {} move(s)...", count);
        for entry in undoable.iter().rev().take(count) {
            println!(
                "  Would move: {} -> {}",
                entry.new_path.display(),
                entry.original_path.display()
            );
        }
        return Ok(());
    }

    let engine = OrganizeEngine::new(Arc::new(MemoryStore::new()), Arc::new(journal), EventBus::new());
    let report = engine.undo_last(count).await?;

    for (path, reason) in &report.failures {
        eprintln!("  Failed: {} ({})", path.display(), reason);
    }
    println!();
    println!("Done. {} undone, {} failed.", report.succeeded, report.failed);

    Ok(())
}

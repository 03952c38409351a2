// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! filewarden: watch folders, classify incoming files, organize them reversibly

use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use filewarden::ai::OllamaClassifier;
use filewarden::config::{AppConfig, JournalBackend};
use filewarden::db::Database;
use filewarden::engine::Engine;
use filewarden::events::EngineEvent;
use filewarden::journal::Journal;
use filewarden::organize::BatchReport;
use filewarden::record::{FileRecord, FileStatus};
use filewarden::scanner::{
    find_cleanup_candidates, find_duplicates, records_under, CleanupPolicy, KeeperPolicy,
};
use filewarden::{Result, WardenError};

/// filewarden CLI - watch, classify and organize files
#[derive(Parser, Debug)]
#[command(name = "filewarden")]
#[command(author = "Jonathan D. A. Jewell <hyperpolymath>")]
#[command(version)]
#[command(about = "Classifies incoming files and organizes them into a reversible tree", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (JSON format)
    #[arg(short, long, default_value = "config.json", global = true)]
    config: PathBuf,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable trace logging (most verbose)
    #[arg(long, global = true)]
    trace: bool,

    /// Output format for results
    #[arg(long, global = true, default_value = "text", value_parser = ["text", "json"])]
    format: String,

    /// Suppress non-essential output (quiet mode)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch folders and classify files as they settle
    Watch {
        /// Folders to watch (overrides config)
        #[arg(short, long)]
        dir: Vec<PathBuf>,

        /// Classify files already present before watching
        #[arg(long)]
        process_existing: bool,

        /// Skip the AI credential check on startup
        #[arg(long)]
        skip_health_check: bool,
    },

    /// Classify a file or every file in a folder
    Classify {
        /// File or folder
        path: PathBuf,

        /// Descend into sub-folders
        #[arg(short, long)]
        recursive: bool,

        /// Send low-confidence results through the AI classifier
        #[arg(long)]
        ai: bool,
    },

    /// Classify and move files into the organized tree
    Organize {
        /// File or folder
        path: PathBuf,

        /// Descend into sub-folders
        #[arg(short, long)]
        recursive: bool,

        /// Show destinations without moving anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Reverse the most recent moves
    Undo {
        /// Number of moves to undo
        #[arg(short = 'n', long, default_value = "1")]
        count: usize,

        /// Show what would be undone
        #[arg(long)]
        dry_run: bool,
    },

    /// Undo journal
    Journal {
        #[command(subcommand)]
        action: JournalCommands,
    },

    /// Find files with identical content
    Duplicates {
        /// Folder to scan
        path: PathBuf,

        /// Descend into sub-folders
        #[arg(short, long)]
        recursive: bool,

        /// Which copy to keep
        #[arg(long, default_value = "earliest-created",
              value_parser = ["earliest-created", "latest-modified", "shortest-path"])]
        keeper: String,
    },

    /// Find temporary, empty and stale files
    Cleanup {
        /// Folder to scan
        path: PathBuf,

        /// Descend into sub-folders
        #[arg(short, long)]
        recursive: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Show AI service and journal status
    Status,

    /// Initialize a new filewarden folder
    Init {
        /// Directory to initialize
        #[arg(default_value = ".")]
        dir: Option<PathBuf>,

        /// Overwrite existing config
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
enum JournalCommands {
    /// Show recent entries
    List {
        /// Number of entries to show
        #[arg(short = 'n', long, default_value = "20")]
        count: usize,
    },

    /// Settle entries left by an interrupted move
    Reconcile,
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Generate default configuration file
    Generate {
        /// Output file path
        #[arg(short, long, default_value = "config.json")]
        output: PathBuf,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = AppConfig::load(&cli.config)?;
    let json = cli.format == "json";

    match cli.command {
        Some(Commands::Watch { dir, process_existing, skip_health_check }) => {
            run_watch(config, dir, process_existing, skip_health_check).await
        }
        Some(Commands::Classify { path, recursive, ai }) => {
            run_classify(config, path, recursive, ai, json).await
        }
        Some(Commands::Organize { path, recursive, dry_run }) => {
            run_organize(config, path, recursive, dry_run, json).await
        }
        Some(Commands::Undo { count, dry_run }) => run_undo(config, count, dry_run, json).await,
        Some(Commands::Journal { action }) => run_journal_command(config, action, json),
        Some(Commands::Duplicates { path, recursive, keeper }) => {
            run_duplicates(path, recursive, &keeper, json)
        }
        Some(Commands::Cleanup { path, recursive }) => run_cleanup(config, path, recursive, json),
        Some(Commands::Config { action }) => run_config_command(config, action, &cli.config),
        Some(Commands::Status) => run_status(config).await,
        Some(Commands::Init { dir, force }) => run_init(dir, force),
        None => run_watch(config, vec![], false, false).await,
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_batch(verb: &str, report: &BatchReport) {
    println!("{} {} file(s), {} failed", verb, report.succeeded, report.failed);
    for (path, reason) in &report.failures {
        println!("  ✗ {}: {}", path.display(), reason);
    }
}

/// Folder a single path is classified against
fn root_of(path: &Path) -> PathBuf {
    if path.is_dir() {
        path.to_path_buf()
    } else {
        path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Run the watch mode until Ctrl+C or SIGTERM
async fn run_watch(
    mut config: AppConfig,
    dir_overrides: Vec<PathBuf>,
    process_existing: bool,
    skip_health_check: bool,
) -> Result<()> {
    if !dir_overrides.is_empty() {
        config.watch_paths = dir_overrides
            .iter()
            .map(|p| p.to_string_lossy().to_string())
            .collect();
    }
    info!("Watch directories: {:?}", config.watch_paths);

    let engine = Engine::from_config(&config)?;

    let reconciled = engine.organizer.reconcile()?;
    if reconciled.rolled_forward + reconciled.abandoned > 0 {
        info!(
            "Journal reconciled: {} rolled forward, {} abandoned",
            reconciled.rolled_forward, reconciled.abandoned
        );
    }

    if engine.ai.is_some() {
        if skip_health_check {
            warn!("Skipping AI credential check");
        } else if !engine.check_ai().await {
            warn!("AI classifier unavailable; files will keep their rule-based category");
        }
    }

    let mut events = engine.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(EngineEvent::Status(message)) => info!("{}", message),
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => warn!("Event log lagged by {} events", missed),
                Err(RecvError::Closed) => break,
            }
        }
    });

    if engine.watch_configured() == 0 {
        return Err(WardenError::Config("No watch folder could be opened".to_string()));
    }

    if process_existing {
        for root in engine.watcher.watched_roots() {
            match engine.watcher.scan_existing(&root).await {
                Ok(n) => info!("Processed {} existing file(s) in {:?}", n, root),
                Err(e) => error!("Failed to scan {:?}: {}", root, e),
            }
        }
    }

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Cannot listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    info!("Watching. Press Ctrl+C to stop.");
    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }

    engine.watcher.stop_all().await;
    info!("filewarden stopped.");
    Ok(())
}

/// Classify one file or a folder and print the results
async fn run_classify(
    mut config: AppConfig,
    path: PathBuf,
    recursive: bool,
    ai: bool,
    json: bool,
) -> Result<()> {
    config.ai_analysis_enabled |= ai;
    let engine = Engine::from_config(&config)?;
    let records = classify_path(&engine, &path, recursive).await?;

    if json {
        return print_json(&records);
    }

    for record in &records {
        print_record(record);
    }
    Ok(())
}

async fn classify_path(engine: &Engine, path: &Path, recursive: bool) -> Result<Vec<FileRecord>> {
    let root = root_of(path);

    if path.is_dir() {
        let report = engine.pipeline.scan_directory(path, recursive).await?;
        info!(
            "{} analyzed, {} skipped, {} failed",
            report.analyzed, report.skipped, report.failed
        );
    } else if engine.pipeline.process(path, &root).await.is_none() {
        return Err(WardenError::FileSystem(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} is not a file", path.display()),
        )));
    }

    Ok(engine.store.snapshot())
}

fn print_record(record: &FileRecord) {
    match record.status() {
        FileStatus::Analyzed | FileStatus::Organized => println!(
            "{} -> {}/{} ({:.0}%){}",
            record.path.display(),
            record.category,
            record.sub_category,
            record.confidence * 100.0,
            record
                .suggested_path()
                .map(|p| format!("\n    {}", p.display()))
                .unwrap_or_default()
        ),
        FileStatus::Skipped => println!(
            "{} skipped ({})",
            record.path.display(),
            record.skip_reason().map(|r| r.to_string()).unwrap_or_default()
        ),
        status => println!(
            "{} {}{}",
            record.path.display(),
            status,
            record.error_message().map(|m| format!(": {}", m)).unwrap_or_default()
        ),
    }
}

async fn run_organize(
    config: AppConfig,
    path: PathBuf,
    recursive: bool,
    dry_run: bool,
    json: bool,
) -> Result<()> {
    let engine = Engine::from_config(&config)?;
    let records: Vec<FileRecord> = classify_path(&engine, &path, recursive)
        .await?
        .into_iter()
        .filter(|r| r.status() == FileStatus::Analyzed)
        .collect();

    if dry_run {
        if json {
            return print_json(&records);
        }
        for record in &records {
            if let Some(dest) = record.suggested_path() {
                println!("Would move: {} -> {}", record.path.display(), dest.display());
            }
        }
        return Ok(());
    }

    let report = engine.organizer.organize(&records).await;
    if json {
        print_json(&report)
    } else {
        print_batch("Organized", &report);
        Ok(())
    }
}

async fn run_undo(config: AppConfig, count: usize, dry_run: bool, json: bool) -> Result<()> {
    let engine = Engine::from_config(&config)?;

    if dry_run {
        let undoable = engine.journal.undoable()?;
        let start = undoable.len().saturating_sub(count);
        for entry in undoable[start..].iter().rev() {
            println!(
                "Would undo: {} -> {}",
                entry.new_path.display(),
                entry.original_path.display()
            );
        }
        return Ok(());
    }

    let report = engine.organizer.undo_last(count).await?;
    if json {
        print_json(&report)
    } else if report.succeeded + report.failed == 0 {
        println!("No moves to undo");
        Ok(())
    } else {
        print_batch("Restored", &report);
        Ok(())
    }
}

fn run_journal_command(config: AppConfig, action: JournalCommands, json: bool) -> Result<()> {
    let journal = Journal::open(&config.journal)?;

    match action {
        JournalCommands::List { count } => {
            let records = journal.recent(count)?;
            if json {
                return print_json(&records);
            }
            println!("Journal {} ({} entries):", journal.location(), records.len());
            for record in records {
                println!(
                    "  {} [{:?}] {} -> {}",
                    record.entry.timestamp.format("%Y-%m-%d %H:%M"),
                    record.state,
                    record.entry.original_path.display(),
                    record.entry.new_path.display()
                );
            }
        }
        JournalCommands::Reconcile => {
            let engine = Engine::with_parts(&config, journal, None)?;
            let report = engine.organizer.reconcile()?;
            if json {
                return print_json(&report);
            }
            println!(
                "Rolled forward: {}, abandoned: {}, left alone: {}",
                report.rolled_forward, report.abandoned, report.left_alone
            );
        }
    }

    Ok(())
}

fn run_duplicates(path: PathBuf, recursive: bool, keeper: &str, json: bool) -> Result<()> {
    let policy = match keeper {
        "latest-modified" => KeeperPolicy::LatestModified,
        "shortest-path" => KeeperPolicy::ShortestPath,
        _ => KeeperPolicy::EarliestCreated,
    };

    let records = records_under(&path, recursive)?;
    let groups = find_duplicates(&records, policy);
    if json {
        return print_json(&groups);
    }

    let wasted: u64 = groups.iter().map(|g| g.wasted_bytes()).sum();
    println!("{} duplicate group(s), {} bytes reclaimable", groups.len(), wasted);
    for group in &groups {
        println!("  keep {}", group.keeper.display());
        for dup in group.redundant() {
            println!("    dup {}", dup.display());
        }
    }
    Ok(())
}

fn run_cleanup(config: AppConfig, path: PathBuf, recursive: bool, json: bool) -> Result<()> {
    let policy = CleanupPolicy::from_config(&config.cleanup)?;
    let records = records_under(&path, recursive)?;
    let candidates = find_cleanup_candidates(&records, &policy, Utc::now());
    if json {
        return print_json(&candidates);
    }

    println!("{} cleanup candidate(s):", candidates.len());
    for candidate in &candidates {
        let reasons: Vec<String> = candidate.reasons.iter().map(|r| r.to_string()).collect();
        println!("  {} ({})", candidate.path.display(), reasons.join(", "));
    }
    Ok(())
}

fn run_config_command(config: AppConfig, action: ConfigCommands, config_path: &Path) -> Result<()> {
    match action {
        ConfigCommands::Show => print_json(&config)?,
        ConfigCommands::Generate { output } => {
            AppConfig::default().save(&output)?;
            println!("Generated config at {:?}", output);
        }
        ConfigCommands::Validate => {
            config.validate()?;
            println!("Configuration at {:?} is valid", config_path);
            println!("  Watch paths: {:?}", config.watch_paths);
            println!("  AI analysis: {}", config.ai_analysis_enabled);
            println!("  Journal: {:?} ({:?})", config.journal.path, config.journal.backend);
        }
    }

    Ok(())
}

async fn run_status(config: AppConfig) -> Result<()> {
    println!("filewarden v{} Status", env!("CARGO_PKG_VERSION"));
    println!("======================");

    let client = OllamaClassifier::new(
        &config.ai_engine.url,
        &config.ai_engine.model,
        config.api_key(),
        Duration::from_secs(config.ai_engine.timeout_secs.max(1)),
    )?;

    match client.health_check().await {
        Ok(()) => println!("AI service: Running ({})", config.ai_engine.url),
        Err(e) => println!("AI service: Error - {}", e),
    }
    match client.model_available().await {
        Ok(true) => println!("  Model {}: available", client.model()),
        Ok(false) => println!("  Model {}: not pulled", client.model()),
        Err(e) => println!("  Model {}: unknown ({})", client.model(), e),
    }

    match config.journal.backend {
        JournalBackend::Sqlite => match Database::open(&config.journal.path) {
            Ok(db) => {
                let stats = db.stats()?;
                println!("\nJournal ({:?}):", config.journal.path);
                println!("  Entries: {}", stats.entry_count);
                println!("  Events: {}", stats.event_count);
            }
            Err(e) => println!("\nJournal: Error - {}", e),
        },
        JournalBackend::Jsonl => match Journal::open(&config.journal).and_then(|j| j.entries()) {
            Ok(entries) => {
                println!("\nJournal ({:?}):", config.journal.path);
                println!("  Entries: {}", entries.len());
                println!("  Undoable: {}", entries.iter().filter(|e| e.is_undoable()).count());
            }
            Err(e) => println!("\nJournal: Error - {}", e),
        },
    }

    println!("\nConfiguration:");
    println!("  Watch paths: {:?}", config.watch_paths);
    println!("  AI analysis: {}", config.ai_analysis_enabled);
    println!("  Auto organize: {}", config.auto_organize_enabled);

    Ok(())
}

fn run_init(dir: Option<PathBuf>, force: bool) -> Result<()> {
    let target = dir.unwrap_or_else(|| PathBuf::from("."));
    let config_path = target.join("config.json");

    if config_path.exists() && !force {
        return Err(WardenError::Config(
            "config.json already exists. Use --force to overwrite".to_string(),
        ));
    }

    let watch_dir = target.join("watch");
    std::fs::create_dir_all(&watch_dir)?;

    let config = AppConfig {
        watch_paths: vec![watch_dir.to_string_lossy().to_string()],
        ..AppConfig::default()
    };
    config.save(&config_path)?;

    println!("filewarden initialized in {:?}", target);
    println!("\nCreated:");
    println!("  - config.json");
    println!("  - watch/");
    println!("\nNext: filewarden watch");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["filewarden"]).unwrap();
        assert!(!cli.verbose);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_watch_command() {
        let cli = Cli::try_parse_from([
            "filewarden", "watch", "--process-existing", "--dir", "/tmp/test"
        ]).unwrap();

        match cli.command {
            Some(Commands::Watch { process_existing, dir, .. }) => {
                assert!(process_existing);
                assert_eq!(dir, vec![PathBuf::from("/tmp/test")]);
            }
            _ => panic!("Expected Watch command"),
        }
    }

    #[test]
    fn test_cli_organize_command() {
        let cli = Cli::try_parse_from([
            "filewarden", "organize", "/tmp/inbox", "--dry-run", "-r"
        ]).unwrap();

        match cli.command {
            Some(Commands::Organize { path, dry_run, recursive }) => {
                assert!(dry_run);
                assert!(recursive);
                assert_eq!(path, PathBuf::from("/tmp/inbox"));
            }
            _ => panic!("Expected Organize command"),
        }
    }

    #[test]
    fn test_cli_rejects_unknown_keeper() {
        let parsed = Cli::try_parse_from([
            "filewarden", "duplicates", "/tmp", "--keeper", "largest"
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_cli_journal_list() {
        let cli = Cli::try_parse_from(["filewarden", "--format", "json", "journal", "list", "-n", "5"])
            .unwrap();
        assert_eq!(cli.format, "json");
        match cli.command {
            Some(Commands::Journal { action: JournalCommands::List { count } }) => assert_eq!(count, 5),
            _ => panic!("Expected journal list"),
        }
    }
}

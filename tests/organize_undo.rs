// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Organize, journal and undo against a real directory tree

use std::path::Path;

use filewarden::config::{JournalBackend, JournalConfig};
use filewarden::journal::{EntryState, Journal};
use filewarden::record::SkipReason;
use filewarden::{AppConfig, Engine, FileStatus};

fn config(sorted: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.organization_root_folder = Some(sorted.to_path_buf());
    config.date_organized_categories.clear();
    config
}

fn jsonl(path: &Path) -> JournalConfig {
    JournalConfig {
        backend: JournalBackend::Jsonl,
        path: path.to_path_buf(),
    }
}

#[tokio::test]
async fn test_organize_then_undo_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let inbox = dir.path().join("inbox");
    let sorted = dir.path().join("sorted");
    std::fs::create_dir_all(&inbox).unwrap();
    std::fs::write(inbox.join("report_Q1.pdf"), b"quarterly").unwrap();
    std::fs::write(inbox.join("invoice_march.pdf"), b"invoice").unwrap();
    std::fs::write(inbox.join(".hidden"), b"x").unwrap();

    let journal_path = dir.path().join("journal.jsonl");
    let engine = Engine::with_parts(&config(&sorted), Journal::open(&jsonl(&journal_path)).unwrap(), None)
        .unwrap();

    let scan = engine.pipeline.scan_directory(&inbox, false).await.unwrap();
    assert_eq!((scan.analyzed, scan.skipped), (2, 1));

    let analyzed: Vec<_> = engine
        .store
        .snapshot()
        .into_iter()
        .filter(|r| r.status() == FileStatus::Analyzed)
        .collect();
    let report = engine.organizer.organize(&analyzed).await;
    assert_eq!((report.succeeded, report.failed), (2, 0));

    let report_dest = sorted.join("Documents/Reports/report_Q1.pdf");
    let invoice_dest = sorted.join("Documents/Invoices/invoice_march.pdf");
    assert_eq!(std::fs::read(&report_dest).unwrap(), b"quarterly");
    assert_eq!(std::fs::read(&invoice_dest).unwrap(), b"invoice");
    assert!(!inbox.join("report_Q1.pdf").exists());

    // The journal is durable: a fresh handle sees both committed moves
    let reopened = Journal::open(&jsonl(&journal_path)).unwrap();
    let entries = reopened.entries().unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.state == EntryState::Committed));

    let undone = engine.organizer.undo_last(2).await.unwrap();
    assert_eq!((undone.succeeded, undone.failed), (2, 0));
    assert_eq!(std::fs::read(inbox.join("report_Q1.pdf")).unwrap(), b"quarterly");
    assert_eq!(std::fs::read(inbox.join("invoice_march.pdf")).unwrap(), b"invoice");
    assert!(!report_dest.exists());

    let restored = engine.store.get(&inbox.join("report_Q1.pdf")).unwrap();
    assert_eq!(restored.status(), FileStatus::Skipped);
    assert_eq!(restored.skip_reason(), Some(SkipReason::Restored));

    // Restored files are not picked up again on their own
    assert!(engine.pipeline.process(&inbox.join("report_Q1.pdf"), &inbox).await.is_none());

    assert!(reopened.undoable().unwrap().is_empty());
    assert!(reopened
        .entries()
        .unwrap()
        .iter()
        .all(|e| e.state == EntryState::Reverted));
}

#[tokio::test]
async fn test_undo_does_not_overwrite_a_new_file_at_the_original_path() {
    let dir = tempfile::tempdir().unwrap();
    let inbox = dir.path().join("inbox");
    let sorted = dir.path().join("sorted");
    std::fs::create_dir_all(&inbox).unwrap();
    let source = inbox.join("report_Q1.pdf");
    std::fs::write(&source, b"first").unwrap();

    let engine = Engine::with_parts(&config(&sorted), Journal::in_memory(), None).unwrap();
    let record = engine.pipeline.process(&source, &inbox).await.unwrap();
    let report = engine.organizer.organize(&[record]).await;
    assert_eq!(report.succeeded, 1);

    std::fs::write(&source, b"second").unwrap();
    let undone = engine.organizer.undo_last(1).await.unwrap();
    assert_eq!(undone.succeeded, 1);

    assert_eq!(std::fs::read(&source).unwrap(), b"second");
    assert_eq!(std::fs::read(inbox.join("report_Q1_1.pdf")).unwrap(), b"first");

    let entry = &engine.journal.entries().unwrap()[0];
    assert_eq!(entry.state, EntryState::Reverted);
    assert_eq!(entry.restored_to.as_deref(), Some(inbox.join("report_Q1_1.pdf").as_path()));
}

#[tokio::test]
async fn test_concurrent_organizes_to_one_destination_both_survive() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a");
    let b = dir.path().join("b");
    let sorted = dir.path().join("sorted");
    std::fs::create_dir_all(&a).unwrap();
    std::fs::create_dir_all(&b).unwrap();
    std::fs::write(a.join("report_Q1.pdf"), b"from a").unwrap();
    std::fs::write(b.join("report_Q1.pdf"), b"from b").unwrap();

    let engine = Engine::with_parts(&config(&sorted), Journal::in_memory(), None).unwrap();
    let ra = engine.pipeline.process(&a.join("report_Q1.pdf"), &a).await.unwrap();
    let rb = engine.pipeline.process(&b.join("report_Q1.pdf"), &b).await.unwrap();
    assert_eq!(ra.suggested_path(), rb.suggested_path());

    let first = {
        let organizer = engine.organizer.clone();
        tokio::spawn(async move { organizer.organize(&[ra]).await })
    };
    let second = {
        let organizer = engine.organizer.clone();
        tokio::spawn(async move { organizer.organize(&[rb]).await })
    };
    assert_eq!(first.await.unwrap().succeeded, 1);
    assert_eq!(second.await.unwrap().succeeded, 1);

    let target = sorted.join("Documents/Reports");
    let mut contents: Vec<Vec<u8>> = ["report_Q1.pdf", "report_Q1_1.pdf"]
        .iter()
        .map(|name| std::fs::read(target.join(name)).unwrap())
        .collect();
    contents.sort();
    assert_eq!(contents, vec![b"from a".to_vec(), b"from b".to_vec()]);

    let finals: Vec<_> = engine
        .store
        .snapshot()
        .into_iter()
        .map(|r| {
            assert_eq!(r.status(), FileStatus::Organized);
            r.suggested_path().unwrap().to_path_buf()
        })
        .collect();
    assert_ne!(finals[0], finals[1]);
}

#[tokio::test]
async fn test_sqlite_journal_backend() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("report_Q1.pdf");
    std::fs::write(&source, b"pdf").unwrap();

    let journal = Journal::open(&JournalConfig {
        backend: JournalBackend::Sqlite,
        path: dir.path().join("journal.db"),
    })
    .unwrap();
    let engine = Engine::with_parts(&config(&dir.path().join("sorted")), journal, None).unwrap();

    let record = engine.pipeline.process(&source, dir.path()).await.unwrap();
    assert_eq!(engine.organizer.organize(&[record]).await.succeeded, 1);

    let entries = engine.journal.entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].entry.category.as_deref(), Some("Documents"));
    assert!(engine.journal.location().starts_with("sqlite:"));
}

// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Classification pipeline with a scripted AI service

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use filewarden::ai::{AiClassifier, AiRequest};
use filewarden::events::EngineEvent;
use filewarden::journal::Journal;
use filewarden::{AppConfig, Engine, FileStatus, Result, WardenError};

struct ScriptedAi {
    reply: std::result::Result<String, ()>,
    calls: AtomicUsize,
}

impl ScriptedAi {
    fn replying(raw: &str) -> Arc<Self> {
        Arc::new(Self { reply: Ok(raw.to_string()), calls: AtomicUsize::new(0) })
    }

    fn offline() -> Arc<Self> {
        Arc::new(Self { reply: Err(()), calls: AtomicUsize::new(0) })
    }
}

#[async_trait]
impl AiClassifier for ScriptedAi {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn validate_credentials(&self) -> Result<bool> {
        Ok(true)
    }

    async fn analyze(&self, request: &AiRequest) -> Result<String> {
        assert!(!request.file_name.is_empty());
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.reply {
            Ok(raw) => Ok(raw.clone()),
            Err(()) => Err(WardenError::AiUnavailable("connection refused".to_string())),
        }
    }
}

fn config() -> AppConfig {
    let mut config = AppConfig::default();
    config.ai_analysis_enabled = true;
    config.ai_engine.request_delay_ms = 0;
    config.date_organized_categories.clear();
    config
}

fn engine(ai: Arc<ScriptedAi>) -> Engine {
    Engine::with_parts(&config(), Journal::in_memory(), Some(ai)).unwrap()
}

#[tokio::test]
async fn test_confident_ai_verdict_replaces_medium_rule_result() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("holiday.jpg");
    std::fs::write(&path, b"not really a jpeg").unwrap();

    let ai = ScriptedAi::replying(
        r#"Sure! {"category":"Documents","sub_category":"Invoices","confidence":0.92,"keywords":["Invoice"]}"#,
    );
    let engine = engine(ai.clone());
    let mut events = engine.subscribe();

    let record = engine.pipeline.process(&path, dir.path()).await.unwrap();
    assert_eq!(ai.calls.load(Ordering::SeqCst), 1);
    assert_eq!(record.status(), FileStatus::Analyzed);
    assert_eq!((record.category.as_str(), record.sub_category.as_str()), ("Documents", "Invoices"));
    assert_eq!(record.confidence, 0.92);
    assert!(!record.ai_pending());
    assert_eq!(
        record.suggested_path(),
        Some(dir.path().join("Documents/Invoices/holiday.jpg").as_path())
    );

    let mut updates = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let EngineEvent::RecordUpdated(r) = event {
            updates.push(r);
        }
    }
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].category, "Documents");
}

#[tokio::test]
async fn test_less_confident_ai_verdict_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("holiday.jpg");
    std::fs::write(&path, b"jpeg").unwrap();

    let ai = ScriptedAi::replying(r#"{"category":"Music","confidence":0.2}"#);
    let engine = engine(ai.clone());

    let record = engine.pipeline.process(&path, dir.path()).await.unwrap();
    assert_eq!(ai.calls.load(Ordering::SeqCst), 1);
    assert_eq!((record.category.as_str(), record.sub_category.as_str()), ("Images", "Photos"));
    assert!(!record.ai_pending());
    assert_eq!(engine.store.get(&path).unwrap(), record);
}

#[tokio::test]
async fn test_high_confidence_rule_result_skips_ai() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report_Q1.pdf");
    std::fs::write(&path, b"%PDF").unwrap();

    let ai = ScriptedAi::replying(r#"{"category":"Music","confidence":1.0}"#);
    let engine = engine(ai.clone());

    let record = engine.pipeline.process(&path, dir.path()).await.unwrap();
    assert_eq!(ai.calls.load(Ordering::SeqCst), 0);
    assert_eq!(record.sub_category, "Reports");
    assert_eq!(
        record.suggested_path(),
        Some(dir.path().join("Documents/Reports/report_Q1.pdf").as_path())
    );
}

#[tokio::test]
async fn test_unusable_ai_answers_keep_rule_result() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blob.xyz");
    std::fs::write(&path, b"???").unwrap();

    for ai in [ScriptedAi::replying("I cannot tell, sorry."), ScriptedAi::offline()] {
        let engine = engine(ai.clone());
        let record = engine.pipeline.process(&path, dir.path()).await.unwrap();

        assert_eq!(ai.calls.load(Ordering::SeqCst), 1);
        assert_eq!(record.status(), FileStatus::Analyzed);
        assert_eq!((record.category.as_str(), record.sub_category.as_str()), ("Others", "Unknown"));
        assert!(!record.ai_pending());
        assert!(record.check_invariants().is_empty());
    }
}

#[tokio::test]
async fn test_refine_batch_only_touches_low_confidence_records() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["a.xyz", "b.xyz", "report_Q1.pdf"] {
        std::fs::write(dir.path().join(name), b"data").unwrap();
    }

    // Classify without AI first, then refine the batch
    let engine = Engine::with_parts(&AppConfig::default(), Journal::in_memory(), None).unwrap();
    engine.pipeline.scan_directory(dir.path(), false).await.unwrap();

    let ai = ScriptedAi::replying(r#"{"category":"Archives","sub_category":"Backups","confidence":0.7}"#);
    let refining = Engine::with_parts(&config(), Journal::in_memory(), Some(ai.clone())).unwrap();
    for record in engine.store.snapshot() {
        refining.store.upsert(record);
    }

    let paths: Vec<_> = refining.store.snapshot().into_iter().map(|r| r.path).collect();
    let merged = refining.pipeline.refine_batch(&paths, dir.path()).await;

    assert_eq!(merged, 2);
    assert_eq!(ai.calls.load(Ordering::SeqCst), 2);
    let a = refining.store.get(&dir.path().join("a.xyz")).unwrap();
    assert_eq!(a.category, "Archives");
    let report = refining.store.get(&dir.path().join("report_Q1.pdf")).unwrap();
    assert_eq!(report.category, "Documents");
}

#[tokio::test]
async fn test_excluded_file_stays_excluded_until_reclassified() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report_Q1.pdf");
    std::fs::write(&path, b"%PDF").unwrap();

    let engine = Engine::with_parts(&AppConfig::default(), Journal::in_memory(), None).unwrap();
    engine.pipeline.process(&path, dir.path()).await.unwrap();
    let excluded = engine.pipeline.exclude(&path).unwrap();
    assert_eq!(excluded.status(), FileStatus::Skipped);

    assert!(engine.pipeline.process(&path, dir.path()).await.is_none());
    let again = engine.pipeline.reclassify(&path, dir.path()).await.unwrap();
    assert_eq!(again.status(), FileStatus::Analyzed);
}

#[tokio::test]
async fn test_rule_stage_defers_ai_until_refined() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blob.xyz");
    std::fs::write(&path, b"???").unwrap();

    let ai = ScriptedAi::replying(r#"{"category":"Archives","sub_category":"Backups","confidence":0.7}"#);
    let engine = engine(ai.clone());

    let staged = engine.pipeline.process_rules(&path, dir.path()).await.unwrap();
    assert_eq!(ai.calls.load(Ordering::SeqCst), 0);
    assert_eq!(staged.status(), FileStatus::Analyzed);
    assert!(staged.ai_pending());
    assert!(engine.pipeline.process_rules(&path, dir.path()).await.is_none(), "waiting on the AI");

    let refined = engine.pipeline.refine(&path, dir.path()).await.unwrap();
    assert_eq!(ai.calls.load(Ordering::SeqCst), 1);
    assert_eq!(refined.category, "Archives");
    assert!(!refined.ai_pending());

    // Nothing left to refine
    assert!(engine.pipeline.refine(&path, dir.path()).await.is_none());
    assert_eq!(ai.calls.load(Ordering::SeqCst), 1);
}

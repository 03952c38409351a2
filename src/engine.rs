// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Wiring of all components from one configuration

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::ai::{AiAdapter, AiClassifier, AiSettings, OllamaClassifier};
use crate::config::AppConfig;
use crate::events::{EngineEvent, EventBus};
use crate::journal::Journal;
use crate::organize::{DestinationPlanner, OrganizeEngine};
use crate::pipeline::{ClassificationPipeline, PipelineSettings};
use crate::store::{MemoryStore, RecordStore};
use crate::watcher::{FolderWatcher, WatcherSettings};
use crate::Result;

/// Every component, sharing one record store and event bus
pub struct Engine {
    pub config: AppConfig,
    pub store: Arc<dyn RecordStore>,
    pub events: EventBus,
    pub journal: Arc<Journal>,
    pub ai: Option<Arc<AiAdapter>>,
    pub pipeline: Arc<ClassificationPipeline>,
    pub organizer: Arc<OrganizeEngine>,
    pub watcher: FolderWatcher,
}

impl Engine {
    /// Build the engine with the configured journal backend and AI service
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        config.validate()?;
        let journal = Journal::open(&config.journal)?;

        let classifier: Option<Arc<dyn AiClassifier>> = if config.ai_analysis_enabled {
            let ollama = OllamaClassifier::new(
                &config.ai_engine.url,
                &config.ai_engine.model,
                config.api_key(),
                Duration::from_secs(config.ai_engine.timeout_secs.max(1)),
            )?;
            Some(Arc::new(ollama))
        } else {
            None
        };

        Self::with_parts(config, journal, classifier)
    }

    /// Build the engine around an explicit journal and AI classifier
    pub fn with_parts(
        config: &AppConfig,
        journal: Journal,
        classifier: Option<Arc<dyn AiClassifier>>,
    ) -> Result<Self> {
        let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
        let events = EventBus::new();
        let journal = Arc::new(journal);

        let ai = classifier.map(|c| {
            Arc::new(AiAdapter::new(c, AiSettings::from_config(config)).with_events(events.clone()))
        });

        let mut pipeline = ClassificationPipeline::new(
            store.clone(),
            DestinationPlanner::from_config(config),
            PipelineSettings::from_config(config),
            events.clone(),
        );
        if let Some(adapter) = &ai {
            pipeline = pipeline.with_ai(adapter.clone());
        }
        let pipeline = Arc::new(pipeline);

        let organizer = Arc::new(OrganizeEngine::new(store.clone(), journal.clone(), events.clone()));
        let watcher = FolderWatcher::new(
            pipeline.clone(),
            organizer.clone(),
            WatcherSettings::from_config(config),
            events.clone(),
        );

        info!(
            "Engine ready (journal: {}, AI: {})",
            journal.location(),
            ai.as_ref().map_or("off", |a| a.classifier_name())
        );

        Ok(Self {
            config: config.clone(),
            store,
            events,
            journal,
            ai,
            pipeline,
            organizer,
            watcher,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Validate AI credentials up front so a bad key is reported once
    pub async fn check_ai(&self) -> bool {
        match &self.ai {
            Some(adapter) => adapter.validate_credentials().await,
            None => false,
        }
    }

    /// Start watching every configured folder, creating missing ones.
    ///
    /// Returns how many roots are now watched.
    pub fn watch_configured(&self) -> usize {
        for path in &self.config.watch_paths {
            let path = Path::new(path);
            if !path.exists() {
                match std::fs::create_dir_all(path) {
                    Ok(()) => info!("Created watch directory: {:?}", path),
                    Err(e) => {
                        warn!("Cannot create watch directory {:?}: {}", path, e);
                        continue;
                    }
                }
            }
            self.watcher.start_watching(path);
        }
        self.watcher.watched_roots().len()
    }
}

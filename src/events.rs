// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Status, progress and record notifications for observers

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::record::FileRecord;

const EVENT_CAPACITY: usize = 256;

/// Events emitted by the engine
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Human-readable status line
    Status(String),
    /// Batch progress
    Progress {
        stage: &'static str,
        processed: usize,
        total: usize,
    },
    /// A record finished analysis or was organized
    RecordUpdated(FileRecord),
}

/// Fan-out of [`EngineEvent`]s to any number of subscribers
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// Register a new observer
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn status(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.send(EngineEvent::Status(message));
    }

    pub fn progress(&self, stage: &'static str, processed: usize, total: usize) {
        debug!("{}: {}/{}", stage, processed, total);
        self.send(EngineEvent::Progress { stage, processed, total });
    }

    pub fn record_updated(&self, record: &FileRecord) {
        self.send(EngineEvent::RecordUpdated(record.clone()));
    }

    fn send(&self, event: EngineEvent) {
        // No subscribers is fine
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Boundary to an external AI text classifier
//!
//! [`AiClassifier`] is the raw transport. [`AiAdapter`] wraps it with the
//! credential gate, per-path serialization, the global admission limit and
//! the inter-call delay, and always answers with an [`AiOutcome`] instead of
//! an error.

pub mod ollama;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::events::EventBus;
use crate::extract;
use crate::record::{clamp_confidence, FileRecord, FALLBACK_SUB_CATEGORY};
use crate::{Result, WardenError};

pub use ollama::OllamaClassifier;

/// Keywords kept from a response
const MAX_KEYWORDS: usize = 10;

/// What the classifier is told about a file
#[derive(Debug, Clone, Serialize)]
pub struct AiRequest {
    pub path: PathBuf,
    pub file_name: String,
    pub extension: String,
    pub size_bytes: u64,
    pub keywords: Vec<String>,
    pub excerpt: Option<String>,
}

/// A well-formed classification from the AI service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiVerdict {
    pub category: String,
    pub sub_category: String,
    pub confidence: f64,
    pub keywords: Vec<String>,
    pub description: Option<String>,
}

/// Transport-level failure kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiFailure {
    Unavailable,
    Timeout,
    QuotaExceeded,
    /// The service rejected the credentials on this call
    Unauthorized,
    /// Credentials were rejected earlier; no request was sent
    CredentialsInvalid,
}

/// Result of one AI analysis
#[derive(Debug, Clone, PartialEq)]
pub enum AiOutcome {
    Classified(AiVerdict),
    ParseError(String),
    TransportError { kind: AiFailure, message: String },
}

impl AiOutcome {
    pub fn verdict(&self) -> Option<&AiVerdict> {
        match self {
            AiOutcome::Classified(v) => Some(v),
            _ => None,
        }
    }

    /// Short failure description, `None` on success
    pub fn failure_message(&self) -> Option<String> {
        match self {
            AiOutcome::Classified(_) => None,
            AiOutcome::ParseError(msg) => Some(format!("malformed response: {}", msg)),
            AiOutcome::TransportError { kind, message } => Some(format!("{:?}: {}", kind, message)),
        }
    }

    fn transport(kind: AiFailure, message: impl Into<String>) -> Self {
        AiOutcome::TransportError { kind, message: message.into() }
    }
}

/// Raw transport to a text classification service
#[async_trait]
pub trait AiClassifier: Send + Sync {
    /// Name of this classifier
    fn name(&self) -> &'static str;

    /// Check the configured credentials against the service.
    ///
    /// `Ok(false)` means the service answered and rejected them.
    async fn validate_credentials(&self) -> Result<bool>;

    /// Send one request and return the raw response text
    async fn analyze(&self, request: &AiRequest) -> Result<String>;
}

/// Parse a raw response into a verdict.
///
/// Tolerates prose or code fences around the JSON object. Never returns
/// [`AiOutcome::TransportError`].
pub fn parse_response(raw: &str) -> AiOutcome {
    #[derive(Deserialize)]
    struct RawVerdict {
        category: Option<String>,
        #[serde(default, alias = "subCategory", alias = "subcategory")]
        sub_category: Option<String>,
        confidence: Option<f64>,
        #[serde(default)]
        keywords: Vec<String>,
        #[serde(default)]
        description: Option<String>,
    }

    let json = match (raw.find('{'), raw.rfind('}')) {
        (Some(start), Some(end)) if start < end => &raw[start..=end],
        _ => return AiOutcome::ParseError("no JSON object in response".to_string()),
    };

    let parsed: RawVerdict = match serde_json::from_str(json) {
        Ok(v) => v,
        Err(e) => return AiOutcome::ParseError(e.to_string()),
    };

    let category = parsed.category.as_deref().map(str::trim).unwrap_or("");
    if category.is_empty() {
        return AiOutcome::ParseError("missing category".to_string());
    }

    let confidence = match parsed.confidence {
        Some(c) if c.is_finite() && (0.0..=1.0).contains(&c) => c,
        Some(c) => return AiOutcome::ParseError(format!("confidence {} outside 0.0-1.0", c)),
        None => return AiOutcome::ParseError("missing confidence".to_string()),
    };

    let sub_category = parsed
        .sub_category
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(FALLBACK_SUB_CATEGORY)
        .to_string();

    let mut keywords: Vec<String> = Vec::new();
    for kw in parsed.keywords {
        let kw = kw.trim().to_lowercase();
        if !kw.is_empty() && !keywords.contains(&kw) {
            keywords.push(kw);
        }
    }
    keywords.truncate(MAX_KEYWORDS);

    let description = parsed
        .description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty());

    AiOutcome::Classified(AiVerdict {
        category: category.to_string(),
        sub_category,
        confidence: clamp_confidence(confidence),
        keywords,
        description,
    })
}

/// Merge a verdict into a record's classification fields
pub fn merge_verdict(record: &mut FileRecord, verdict: &AiVerdict) {
    record.category = verdict.category.clone();
    record.sub_category = verdict.sub_category.clone();
    record.confidence = verdict.confidence;
    if !verdict.keywords.is_empty() {
        record.keywords = verdict.keywords.clone();
    }
    record.description = verdict.description.clone();
}

/// Where the adapter stands with the service's credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState {
    Unknown,
    Valid,
    Invalid,
}

/// Tuning for [`AiAdapter`]
#[derive(Debug, Clone)]
pub struct AiSettings {
    pub timeout: Duration,
    pub max_concurrent: usize,
    pub request_delay: Duration,
    pub excerpt_chars: usize,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            max_concurrent: 1,
            request_delay: Duration::from_millis(500),
            excerpt_chars: 2000,
        }
    }
}

impl AiSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.ai_engine.timeout_secs.max(1)),
            max_concurrent: config.ai_engine.max_concurrent.max(1),
            request_delay: Duration::from_millis(config.ai_engine.request_delay_ms),
            excerpt_chars: config.ai_engine.excerpt_chars,
        }
    }
}

/// One entry of a batch result
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub path: PathBuf,
    pub outcome: AiOutcome,
}

/// Admission-controlled access to an [`AiClassifier`]
pub struct AiAdapter {
    classifier: Arc<dyn AiClassifier>,
    settings: AiSettings,
    permits: Semaphore,
    credentials: Mutex<CredentialState>,
    validation: tokio::sync::Mutex<()>,
    path_locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
    last_call: tokio::sync::Mutex<Option<Instant>>,
    events: Option<EventBus>,
}

impl AiAdapter {
    pub fn new(classifier: Arc<dyn AiClassifier>, settings: AiSettings) -> Self {
        let permits = Semaphore::new(settings.max_concurrent.max(1));
        Self {
            classifier,
            settings,
            permits,
            credentials: Mutex::new(CredentialState::Unknown),
            validation: tokio::sync::Mutex::new(()),
            path_locks: Mutex::new(HashMap::new()),
            last_call: tokio::sync::Mutex::new(None),
            events: None,
        }
    }

    /// Report credential problems and batch progress on this bus
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn classifier_name(&self) -> &'static str {
        self.classifier.name()
    }

    pub fn credential_state(&self) -> CredentialState {
        *self.lock_credentials()
    }

    /// Forget an earlier verdict so the next call validates again
    pub fn revalidate(&self) {
        *self.lock_credentials() = CredentialState::Unknown;
    }

    /// Validate credentials against the service and remember the answer
    pub async fn validate_credentials(&self) -> bool {
        let _guard = self.validation.lock().await;
        self.validate_locked().await == CredentialState::Valid
    }

    async fn validate_locked(&self) -> CredentialState {
        match self.classifier.validate_credentials().await {
            Ok(true) => {
                info!("AI credentials accepted by {}", self.classifier.name());
                self.set_credentials(CredentialState::Valid);
                CredentialState::Valid
            }
            Ok(false) => {
                self.invalidate("credentials rejected during validation");
                CredentialState::Invalid
            }
            Err(e) => {
                // Service unreachable says nothing about the credentials
                warn!("Could not validate AI credentials: {}", e);
                CredentialState::Unknown
            }
        }
    }

    /// Analyze one record. Concurrent calls for the same path run one after another.
    pub async fn analyze(&self, record: &FileRecord) -> AiOutcome {
        let lock = self.path_lock(&record.path);
        let outcome = {
            let _path_guard = lock.lock().await;
            self.analyze_serialized(record).await
        };
        self.release_path_lock(&record.path, lock);
        outcome
    }

    /// Parse `raw` and merge it into `record` if well-formed
    pub fn apply(record: &mut FileRecord, raw: &str) -> bool {
        match parse_response(raw) {
            AiOutcome::Classified(verdict) => {
                merge_verdict(record, &verdict);
                true
            }
            other => {
                debug!("Not applying AI response for {:?}: {:?}", record.path, other);
                false
            }
        }
    }

    /// Analyze records one at a time; a failure is recorded and the batch moves on
    pub async fn analyze_batch(&self, records: &[FileRecord]) -> Vec<BatchItem> {
        let total = records.len();
        let mut results = Vec::with_capacity(total);

        for (i, record) in records.iter().enumerate() {
            let outcome = self.analyze(record).await;
            if let Some(msg) = outcome.failure_message() {
                warn!("AI analysis failed for {:?}: {}", record.path, msg);
            }
            results.push(BatchItem {
                path: record.path.clone(),
                outcome,
            });
            if let Some(events) = &self.events {
                events.progress("ai-analysis", i + 1, total);
            }
        }

        results
    }

    async fn analyze_serialized(&self, record: &FileRecord) -> AiOutcome {
        if let Err(outcome) = self.ensure_credentials().await {
            return outcome;
        }

        let Ok(_permit) = self.permits.acquire().await else {
            return AiOutcome::transport(AiFailure::Unavailable, "AI admission closed");
        };

        self.pace().await;

        let request = self.build_request(record).await;
        debug!("AI request for {:?} via {}", record.path, self.classifier.name());

        match tokio::time::timeout(self.settings.timeout, self.classifier.analyze(&request)).await {
            Err(_) => AiOutcome::transport(
                AiFailure::Timeout,
                format!("no answer within {:?}", self.settings.timeout),
            ),
            Ok(Ok(raw)) => parse_response(&raw),
            Ok(Err(WardenError::MalformedResponse(msg))) => AiOutcome::ParseError(msg),
            Ok(Err(e)) => {
                let kind = failure_kind(&e);
                if kind == AiFailure::Unauthorized {
                    self.invalidate("credentials rejected by the service");
                }
                AiOutcome::transport(kind, e.to_string())
            }
        }
    }

    /// Short-circuits with an outcome when credentials are known bad or cannot be checked
    async fn ensure_credentials(&self) -> std::result::Result<(), AiOutcome> {
        match self.credential_state() {
            CredentialState::Valid => return Ok(()),
            CredentialState::Invalid => {
                return Err(AiOutcome::transport(
                    AiFailure::CredentialsInvalid,
                    "AI disabled until credentials are revalidated",
                ))
            }
            CredentialState::Unknown => {}
        }

        let _guard = self.validation.lock().await;
        // Another caller may have validated while we waited
        let state = match self.credential_state() {
            CredentialState::Unknown => self.validate_locked().await,
            known => known,
        };

        match state {
            CredentialState::Valid => Ok(()),
            CredentialState::Invalid => Err(AiOutcome::transport(
                AiFailure::CredentialsInvalid,
                "AI disabled until credentials are revalidated",
            )),
            CredentialState::Unknown => Err(AiOutcome::transport(
                AiFailure::Unavailable,
                "could not reach the AI service to validate credentials",
            )),
        }
    }

    /// Wait until the minimum gap since the previous request has passed
    async fn pace(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.settings.request_delay {
                tokio::time::sleep(self.settings.request_delay - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn build_request(&self, record: &FileRecord) -> AiRequest {
        let path = record.path.clone();
        let max_chars = self.settings.excerpt_chars;
        let excerpt = tokio::task::spawn_blocking(move || extract::excerpt(&path, max_chars))
            .await
            .unwrap_or_else(|e| {
                warn!("Excerpt extraction task failed: {}", e);
                None
            });

        let mut keywords = record.keywords.clone();
        if let Some(text) = &excerpt {
            for kw in extract::top_keywords(text, 5) {
                if !keywords.contains(&kw) {
                    keywords.push(kw);
                }
            }
        }

        AiRequest {
            path: record.path.clone(),
            file_name: record.file_name.clone(),
            extension: record.extension.clone(),
            size_bytes: record.size_bytes,
            keywords,
            excerpt,
        }
    }

    fn invalidate(&self, reason: &str) {
        let mut state = self.lock_credentials();
        if *state != CredentialState::Invalid {
            *state = CredentialState::Invalid;
            drop(state);
            warn!("AI analysis disabled: {}", reason);
            if let Some(events) = &self.events {
                events.status(format!(
                    "AI analysis disabled ({}); rule-based classification continues",
                    reason
                ));
            }
        }
    }

    fn set_credentials(&self, state: CredentialState) {
        *self.lock_credentials() = state;
    }

    fn lock_credentials(&self) -> MutexGuard<'_, CredentialState> {
        self.credentials.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn path_lock(&self, path: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.path_locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(path.to_path_buf()).or_default().clone()
    }

    fn release_path_lock(&self, path: &Path, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.path_locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // Map entry plus ours means nobody else is waiting
        if Arc::strong_count(&lock) <= 2 {
            locks.remove(path);
        }
    }
}

/// Map an error from an [`AiClassifier`] to a failure kind
pub fn failure_kind(error: &WardenError) -> AiFailure {
    match error {
        WardenError::AiTimeout(_) => AiFailure::Timeout,
        WardenError::AiQuotaExceeded(_) => AiFailure::QuotaExceeded,
        WardenError::AiUnauthorized(_) => AiFailure::Unauthorized,
        WardenError::Api(e) if e.is_timeout() => AiFailure::Timeout,
        _ => AiFailure::Unavailable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Classifier that replays canned answers
    struct Scripted {
        valid: bool,
        answer: std::result::Result<String, fn() -> WardenError>,
        delay: Duration,
        calls: AtomicUsize,
        validations: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl Scripted {
        fn answering(raw: &str) -> Self {
            Self {
                valid: true,
                answer: Ok(raw.to_string()),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
                validations: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl AiClassifier for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn validate_credentials(&self) -> Result<bool> {
            self.validations.fetch_add(1, Ordering::SeqCst);
            Ok(self.valid)
        }

        async fn analyze(&self, _request: &AiRequest) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            match &self.answer {
                Ok(raw) => Ok(raw.clone()),
                Err(make) => Err(make()),
            }
        }
    }

    fn fast_settings() -> AiSettings {
        AiSettings {
            timeout: Duration::from_secs(5),
            max_concurrent: 4,
            request_delay: Duration::ZERO,
            excerpt_chars: 200,
        }
    }

    const GOOD: &str = r#"{"category":"Documents","sub_category":"Invoices","confidence":0.91,
        "keywords":["Invoice","ACME","invoice"],"description":"An invoice from ACME."}"#;

    #[test]
    fn test_parse_response_accepts_wrapped_json() {
        let raw = format!("Sure! Here is the result:\n```json\n{}\n```", GOOD);
        let verdict = parse_response(&raw);
        let verdict = verdict.verdict().unwrap();
        assert_eq!(verdict.category, "Documents");
        assert_eq!(verdict.sub_category, "Invoices");
        assert_eq!(verdict.keywords, vec!["invoice", "acme"]);
        assert_eq!(verdict.description.as_deref(), Some("An invoice from ACME."));
    }

    #[test]
    fn test_parse_response_rejects_malformed() {
        assert!(matches!(parse_response(""), AiOutcome::ParseError(_)));
        assert!(matches!(parse_response("I think it's a photo"), AiOutcome::ParseError(_)));
        assert!(matches!(
            parse_response(r#"{"category":"","confidence":0.9}"#),
            AiOutcome::ParseError(_)
        ));
        assert!(matches!(
            parse_response(r#"{"category":"Images","confidence":87}"#),
            AiOutcome::ParseError(_)
        ));
        assert!(matches!(parse_response(r#"{"category":"Images"}"#), AiOutcome::ParseError(_)));
    }

    #[test]
    fn test_parse_response_defaults_sub_category() {
        let outcome = parse_response(r#"{"category":"Images","subCategory":" ","confidence":0.7}"#);
        assert_eq!(outcome.verdict().unwrap().sub_category, "Unknown");
    }

    #[test]
    fn test_apply_leaves_record_untouched_on_malformed() {
        let mut record = FileRecord::new("/in/scan.pdf");
        record.category = "Documents".to_string();
        record.confidence = 0.7;
        let before = record.clone();

        assert!(!AiAdapter::apply(&mut record, "{not json"));
        assert_eq!(record, before);

        assert!(AiAdapter::apply(&mut record, GOOD));
        assert_eq!(record.sub_category, "Invoices");
        assert_eq!(record.confidence, 0.91);
    }

    #[tokio::test]
    async fn test_invalid_credentials_short_circuit() {
        let mut scripted = Scripted::answering(GOOD);
        scripted.valid = false;
        let scripted = Arc::new(scripted);
        let adapter = AiAdapter::new(scripted.clone(), fast_settings());

        let records = vec![FileRecord::new("/in/a.pdf"), FileRecord::new("/in/b.pdf")];
        let results = adapter.analyze_batch(&records).await;

        assert_eq!(results.len(), 2);
        for item in &results {
            assert!(matches!(
                item.outcome,
                AiOutcome::TransportError { kind: AiFailure::CredentialsInvalid, .. }
            ));
        }
        assert_eq!(scripted.validations.load(Ordering::SeqCst), 1);
        assert_eq!(scripted.calls.load(Ordering::SeqCst), 0);
        assert_eq!(adapter.credential_state(), CredentialState::Invalid);

        adapter.revalidate();
        assert_eq!(adapter.credential_state(), CredentialState::Unknown);
    }

    #[tokio::test]
    async fn test_unauthorized_answer_disables_further_calls() {
        let mut scripted = Scripted::answering(GOOD);
        scripted.answer = Err(|| WardenError::AiUnauthorized("401".to_string()));
        let scripted = Arc::new(scripted);
        let adapter = AiAdapter::new(scripted.clone(), fast_settings());

        let first = adapter.analyze(&FileRecord::new("/in/a.pdf")).await;
        assert!(matches!(first, AiOutcome::TransportError { kind: AiFailure::Unauthorized, .. }));

        let second = adapter.analyze(&FileRecord::new("/in/b.pdf")).await;
        assert!(matches!(
            second,
            AiOutcome::TransportError { kind: AiFailure::CredentialsInvalid, .. }
        ));
        assert_eq!(scripted.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_batch_continues_after_failure() {
        let mut scripted = Scripted::answering(GOOD);
        scripted.answer = Err(|| WardenError::AiQuotaExceeded("429".to_string()));
        let adapter = AiAdapter::new(Arc::new(scripted), fast_settings());

        let records = vec![FileRecord::new("/in/a.pdf"), FileRecord::new("/in/b.pdf")];
        let results = adapter.analyze_batch(&records).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| matches!(
            r.outcome,
            AiOutcome::TransportError { kind: AiFailure::QuotaExceeded, .. }
        )));
    }

    #[tokio::test]
    async fn test_slow_service_times_out() {
        let mut scripted = Scripted::answering(GOOD);
        scripted.delay = Duration::from_secs(2);
        let mut settings = fast_settings();
        settings.timeout = Duration::from_millis(50);
        let adapter = AiAdapter::new(Arc::new(scripted), settings);

        let outcome = adapter.analyze(&FileRecord::new("/in/a.pdf")).await;
        assert!(matches!(outcome, AiOutcome::TransportError { kind: AiFailure::Timeout, .. }));
    }

    #[tokio::test]
    async fn test_same_path_is_serialized() {
        let mut scripted = Scripted::answering(GOOD);
        scripted.delay = Duration::from_millis(50);
        let scripted = Arc::new(scripted);
        let adapter = Arc::new(AiAdapter::new(scripted.clone(), fast_settings()));

        let record = FileRecord::new("/in/same.pdf");
        let mut handles = Vec::new();
        for _ in 0..3 {
            let adapter = adapter.clone();
            let record = record.clone();
            handles.push(tokio::spawn(async move { adapter.analyze(&record).await }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().verdict().is_some());
        }

        assert_eq!(scripted.calls.load(Ordering::SeqCst), 3);
        assert_eq!(scripted.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_settings_from_config_floor_zero_limits() {
        let mut config = AppConfig::default();
        config.ai_engine.timeout_secs = 0;
        config.ai_engine.max_concurrent = 0;
        config.ai_engine.request_delay_ms = 250;

        let settings = AiSettings::from_config(&config);
        assert_eq!(settings.timeout, Duration::from_secs(1));
        assert_eq!(settings.max_concurrent, 1);
        assert_eq!(settings.request_delay, Duration::from_millis(250));
        assert_eq!(settings.excerpt_chars, config.ai_engine.excerpt_chars);
    }
}

// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Ollama-compatible HTTP classifier

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{AiClassifier, AiRequest};
use crate::{Result, WardenError};

/// Categories the model is asked to choose from
const KNOWN_CATEGORIES: &[&str] = &[
    "Documents", "Images", "Videos", "Audio", "Archives", "Code", "Installers", "Books",
    "Fonts", "Others",
];

/// Ollama API client
pub struct OllamaClassifier {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
    format: &'static str,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    models: Vec<ModelInfo>,
}

#[derive(Deserialize)]
struct ModelInfo {
    name: String,
}

impl OllamaClassifier {
    pub fn new(base_url: &str, model: &str, api_key: Option<&str>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        // Accept a full endpoint URL as well as the server root
        let base_url = base_url
            .trim_end_matches('/')
            .replace("/api/generate", "")
            .replace("/api/chat", "");

        Ok(Self {
            client,
            base_url,
            model: model.to_string(),
            api_key: api_key.map(str::to_string),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Check if the server answers at all
    pub async fn health_check(&self) -> Result<()> {
        let url = format!("{}/api/tags", self.base_url);
        self.authorize(self.client.get(&url))
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| self.send_error(e))?;
        Ok(())
    }

    /// List available models
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| self.send_error(e))?;
        check_status(response.status())?;

        let tags: TagsResponse = response.json().await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// Check if the configured model is installed
    pub async fn model_available(&self) -> Result<bool> {
        let models = self.list_models().await?;
        Ok(models
            .iter()
            .any(|m| m.starts_with(&self.model) || m == &format!("{}:latest", self.model)))
    }

    /// Generate a JSON completion
    pub async fn generate(&self, prompt: String) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            format: "json",
            options: GenerateOptions { temperature: 0.0 },
        };

        debug!("Sending request to Ollama: model={}", self.model);

        let response = self
            .authorize(self.client.post(&url).json(&request))
            .send()
            .await
            .map_err(|e| self.send_error(e))?;
        check_status(response.status())?;

        let result: GenerateResponse = response
            .json()
            .await
            .map_err(|e| WardenError::MalformedResponse(format!("unexpected response body: {}", e)))?;
        Ok(result.response)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    fn send_error(&self, e: reqwest::Error) -> WardenError {
        if e.is_timeout() {
            WardenError::AiTimeout(format!("{} did not answer: {}", self.base_url, e))
        } else if e.is_connect() {
            WardenError::AiUnavailable(format!("Cannot connect to Ollama at {}: {}", self.base_url, e))
        } else {
            WardenError::Api(e)
        }
    }
}

#[async_trait]
impl AiClassifier for OllamaClassifier {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn validate_credentials(&self) -> Result<bool> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .authorize(self.client.get(&url))
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| self.send_error(e))?;

        match check_status(response.status()) {
            Ok(()) => Ok(true),
            Err(WardenError::AiUnauthorized(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn analyze(&self, request: &AiRequest) -> Result<String> {
        self.generate(build_prompt(request)).await
    }
}

/// Map a non-success HTTP status to an error
fn check_status(status: StatusCode) -> Result<()> {
    match status {
        s if s.is_success() => Ok(()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(WardenError::AiUnauthorized(format!("service returned {}", status)))
        }
        StatusCode::TOO_MANY_REQUESTS => {
            Err(WardenError::AiQuotaExceeded(format!("service returned {}", status)))
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            Err(WardenError::AiTimeout(format!("service returned {}", status)))
        }
        _ => Err(WardenError::AiUnavailable(format!("Ollama returned status {}", status))),
    }
}

fn build_prompt(request: &AiRequest) -> String {
    let mut prompt = format!(
        "Classify the file described below so it can be filed into a folder.\n\
         Respond with only a JSON object with these keys:\n\
         \"category\": one of {},\n\
         \"sub_category\": a short folder name inside the category,\n\
         \"confidence\": a number between 0 and 1,\n\
         \"keywords\": up to 5 lowercase words describing the content,\n\
         \"description\": one sentence describing the file.\n\n\
         File name: {}\n\
         Extension: {}\n\
         Size: {} bytes\n",
        KNOWN_CATEGORIES.join(", "),
        request.file_name,
        if request.extension.is_empty() { "(none)" } else { &request.extension },
        request.size_bytes,
    );

    if !request.keywords.is_empty() {
        prompt.push_str(&format!("Keywords: {}\n", request.keywords.join(", ")));
    }
    if let Some(excerpt) = &request.excerpt {
        prompt.push_str(&format!("Content excerpt:\n{}\n", excerpt));
    }

    prompt
}

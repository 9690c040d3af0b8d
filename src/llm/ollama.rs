//! Ollama `/api/generate` client.

use super::ReasoningService;
use crate::config::AnalysisConfig;
use crate::error::AnalysisError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Settings for talking to a local Ollama server.
#[derive(Debug, Clone)]
pub struct OllamaSettings {
    pub url: String,
    pub model: String,
    pub temperature: f32,
    pub num_ctx: u32,
    pub timeout_seconds: u64,
}

impl From<&AnalysisConfig> for OllamaSettings {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            url: config.ollama_url.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            num_ctx: config.num_ctx,
            timeout_seconds: config.timeout_seconds,
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_ctx: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default)]
    eval_count: Option<u32>,
}

pub struct OllamaClient {
    settings: OllamaSettings,
    http_client: reqwest::Client,
}

impl OllamaClient {
    pub fn new(settings: OllamaSettings) -> Self {
        info!(
            "Using model {} at {}",
            settings.model, settings.url
        );

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            settings,
            http_client,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.settings.url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ReasoningService for OllamaClient {
    async fn complete(&self, prompt: &str) -> Result<String, AnalysisError> {
        let request = GenerateRequest {
            model: &self.settings.model,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: self.settings.temperature,
                num_ctx: self.settings.num_ctx,
            },
        };

        debug!("Sending {} char prompt to {}", prompt.len(), self.endpoint());

        let response = self
            .http_client
            .post(self.endpoint())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AnalysisError::Timeout(self.settings.timeout_seconds)
                } else if e.is_connect() {
                    AnalysisError::ServiceUnavailable(format!(
                        "cannot connect to Ollama at {}",
                        self.settings.url
                    ))
                } else {
                    AnalysisError::ServiceUnavailable(format!("request failed: {}", e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::ServiceUnavailable(format!(
                "Ollama API error {}: {}",
                status,
                body.trim()
            )));
        }

        let generated: GenerateResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                AnalysisError::Timeout(self.settings.timeout_seconds)
            } else {
                AnalysisError::Parse(format!("malformed Ollama response: {}", e))
            }
        })?;

        debug!(
            "Received {} chars ({} tokens)",
            generated.response.len(),
            generated.eval_count.unwrap_or(0)
        );
        Ok(generated.response)
    }

    fn model(&self) -> &str {
        &self.settings.model
    }
}

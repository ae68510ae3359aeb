//! Structured extractor backed by an OpenAI-compatible chat-completions service.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tally_core::ExtractedData;

use crate::normalize::parse_model_output;
use crate::prompt::{system_prompt, user_message};
use crate::sanitize::sanitize_receipt_text;

const API_KEY_HEADER: &str = "x-litellm-api-key";

#[async_trait]
pub trait StructuredExtractor: Send + Sync {
    /// Always returns a well-formed result; failures become the empty result.
    async fn extract(&self, text: &str) -> ExtractedData;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct LlmStructuredExtractor {
    http_client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl LlmStructuredExtractor {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client for structured extractor")?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
        })
    }

    async fn complete(&self, user_content: String) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            temperature: 0.0,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt(),
                },
                ChatMessage {
                    role: "user",
                    content: user_content,
                },
            ],
        };

        let mut request = self
            .http_client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .json(&body);
        if let Some(ref key) = self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }

        let response = request
            .send()
            .await
            .context("Failed to send request to LLM service")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow::anyhow!(
                "LLM request failed: {} - {}",
                status,
                error_text
            ));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .context("Failed to parse LLM response")?;

        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}

#[async_trait]
impl StructuredExtractor for LlmStructuredExtractor {
    async fn extract(&self, text: &str) -> ExtractedData {
        let sanitized = sanitize_receipt_text(text);
        if sanitized.removed_lines > 0 {
            tracing::warn!(
                removed_lines = sanitized.removed_lines,
                "Injection patterns removed from extraction input"
            );
        }
        if sanitized.text.is_empty() {
            tracing::debug!("Nothing to extract, using empty result");
            return ExtractedData::empty();
        }

        let start = Instant::now();
        match self.complete(user_message(&sanitized.text)).await {
            Ok(content) => {
                let data = parse_model_output(&content);
                tracing::info!(
                    model = %self.model,
                    items = data.items.len(),
                    total = data.total,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Structured extraction finished"
                );
                data
            }
            Err(e) => {
                tracing::warn!(
                    model = %self.model,
                    error = %e,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Structured extraction failed, using empty result"
                );
                ExtractedData::empty()
            }
        }
    }
}

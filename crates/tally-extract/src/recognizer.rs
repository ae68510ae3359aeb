//! Text recognizer: ask the OCR service to read an image by URL.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::time::{Duration, Instant};

#[async_trait]
pub trait TextRecognizer: Send + Sync {
    /// Recognized text, or `None` when recognition failed for any reason.
    async fn recognize(&self, image_url: &str) -> Option<String>;
}

#[derive(Serialize)]
struct RecognizeRequest<'a> {
    url: &'a str,
}

pub struct HttpTextRecognizer {
    http_client: reqwest::Client,
    endpoint: String,
}

impl HttpTextRecognizer {
    /// `base_url` and `path` are joined as-is, e.g. `http://ocr:8000` + `/ocr/tesseract/url`.
    pub fn new(base_url: &str, path: &str, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client for text recognizer")?;

        Ok(Self {
            http_client,
            endpoint: format!("{}{}", base_url.trim_end_matches('/'), path),
        })
    }

    async fn request_text(&self, image_url: &str) -> Result<String> {
        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&RecognizeRequest { url: image_url })
            .send()
            .await
            .context("Failed to send request to OCR service")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow::anyhow!(
                "OCR request failed: {} - {}",
                status,
                error_text
            ));
        }

        let body: Value = response
            .json()
            .await
            .context("Failed to parse OCR response")?;

        extract_text(&body).ok_or_else(|| anyhow::anyhow!("OCR response has no text field"))
    }
}

/// Reads `content`, falling back to `text`.
fn extract_text(body: &Value) -> Option<String> {
    body.get("content")
        .and_then(Value::as_str)
        .or_else(|| body.get("text").and_then(Value::as_str))
        .map(str::to_string)
}

#[async_trait]
impl TextRecognizer for HttpTextRecognizer {
    async fn recognize(&self, image_url: &str) -> Option<String> {
        let start = Instant::now();
        match self.request_text(image_url).await {
            Ok(text) => {
                tracing::info!(
                    image_url = %image_url,
                    chars = text.chars().count(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Text recognized"
                );
                Some(text)
            }
            Err(e) => {
                tracing::warn!(
                    image_url = %image_url,
                    error = %e,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Text recognition failed"
                );
                None
            }
        }
    }
}

//! Image archiver: copy a user-supplied image into durable object storage.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tally_storage::keys::receipt_key;
use tally_storage::Storage;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[async_trait]
pub trait ImageArchiver: Send + Sync {
    /// Public URL of the archived copy, or `None` when the image contributes nothing.
    async fn archive(&self, url: &str) -> Option<String>;
}

pub struct HttpImageArchiver {
    http_client: reqwest::Client,
    storage: Arc<dyn Storage>,
    max_size_bytes: usize,
}

impl HttpImageArchiver {
    pub fn new(storage: Arc<dyn Storage>, timeout: Duration, max_size_bytes: usize) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client for image archiver")?;

        Ok(Self {
            http_client,
            storage,
            max_size_bytes,
        })
    }

    async fn fetch_and_store(&self, url: &str) -> Result<String> {
        let mut response = self
            .http_client
            .get(url)
            .send()
            .await
            .context("Failed to fetch image")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow::anyhow!("Image fetch returned {}", status));
        }

        if let Some(len) = response.content_length() {
            if len as usize > self.max_size_bytes {
                return Err(anyhow::anyhow!(
                    "Image too large: {} bytes (max {})",
                    len,
                    self.max_size_bytes
                ));
            }
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();

        // Content-Length may be missing or wrong, so the cap is enforced while reading
        let mut data: Vec<u8> = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .context("Failed to read image body")?
        {
            if data.len() + chunk.len() > self.max_size_bytes {
                return Err(anyhow::anyhow!(
                    "Image too large: more than {} bytes",
                    self.max_size_bytes
                ));
            }
            data.extend_from_slice(&chunk);
        }

        let key = receipt_key(url, Utc::now().timestamp_millis());
        let stored_url = self
            .storage
            .upload_with_key(&key, data, &content_type)
            .await
            .context("Failed to store image")?;

        Ok(stored_url)
    }
}

#[async_trait]
impl ImageArchiver for HttpImageArchiver {
    async fn archive(&self, url: &str) -> Option<String> {
        let start = Instant::now();
        match self.fetch_and_store(url).await {
            Ok(stored) => {
                tracing::info!(
                    source = %url,
                    stored = %stored,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Image archived"
                );
                Some(stored)
            }
            Err(e) => {
                tracing::warn!(
                    source = %url,
                    error = %e,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Image archiving failed, skipping"
                );
                None
            }
        }
    }
}

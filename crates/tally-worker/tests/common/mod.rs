//! Fakes shared by the worker integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tally_core::{Expense, ExpenseStatus, ExtractedData, LineItem, SubmissionMessage};
use tally_db::MockExpenseRepository;
use tally_extract::{ImageArchiver, StructuredExtractor, TextRecognizer};
use tally_worker::ExpenseWorker;
use uuid::Uuid;

pub const SUBMISSIONS: &str = "expense_processing";
pub const RESULTS: &str = "expense_results";

/// Archives every URL except those listed as broken.
#[derive(Default)]
pub struct FakeArchiver {
    pub broken: Vec<String>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeArchiver {
    pub fn failing_all() -> Self {
        Self {
            broken: vec!["*".to_string()],
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ImageArchiver for FakeArchiver {
    async fn archive(&self, url: &str) -> Option<String> {
        self.calls.lock().unwrap().push(url.to_string());
        if self.broken.iter().any(|b| b == "*" || b == url) {
            return None;
        }
        let name = url.rsplit('/').next().unwrap_or("receipt");
        Some(format!("http://storage.test/expenses/receipts/1-{}", name))
    }
}

/// Returns canned text per URL; unknown URLs fail.
#[derive(Default)]
pub struct FakeRecognizer {
    pub texts: HashMap<String, String>,
}

impl FakeRecognizer {
    pub fn with(pairs: &[(&str, &str)]) -> Self {
        Self {
            texts: pairs
                .iter()
                .map(|(u, t)| (u.to_string(), t.to_string()))
                .collect(),
        }
    }
}

#[async_trait]
impl TextRecognizer for FakeRecognizer {
    async fn recognize(&self, image_url: &str) -> Option<String> {
        self.texts.get(image_url).cloned()
    }
}

/// Records its input and returns a fixed result, optionally after a delay.
pub struct FakeExtractor {
    pub result: ExtractedData,
    pub delay: Option<Duration>,
    pub inputs: Mutex<Vec<String>>,
}

impl FakeExtractor {
    pub fn returning(result: ExtractedData) -> Self {
        Self {
            result,
            delay: None,
            inputs: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl StructuredExtractor for FakeExtractor {
    async fn extract(&self, text: &str) -> ExtractedData {
        self.inputs.lock().unwrap().push(text.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.result.clone()
    }
}

pub fn lunch() -> ExtractedData {
    ExtractedData {
        items: vec![
            LineItem::new("Nasi goreng", 25000, 1),
            LineItem::new("Es teh", 5000, 2),
        ],
        tax: 3500,
        total: 38500,
    }
}

/// Store with one `unprocessed` record, plus a submission for it.
pub fn seeded(text: &str, image_urls: &[&str]) -> (MockExpenseRepository, SubmissionMessage) {
    let store = MockExpenseRepository::new();
    let id = Uuid::new_v4();
    let now = Utc::now();
    let urls: Vec<String> = image_urls.iter().map(|u| u.to_string()).collect();

    store.insert(Expense {
        id,
        message_id: format!("msg-{}", id),
        interaction_token: format!("tok-{}", id),
        user_id: "user-1".to_string(),
        user_tag: "alice#0001".to_string(),
        text: text.to_string(),
        image_urls: urls.clone(),
        channel_id: Some("chan-1".to_string()),
        is_dm: false,
        ocr_text: None,
        extracted_data: None,
        status: ExpenseStatus::Unprocessed,
        timestamp: now,
        created_at: now,
        updated_at: now,
    });

    let submission = SubmissionMessage {
        expense_id: id,
        message_id: format!("msg-{}", id),
        interaction_token: format!("tok-{}", id),
        text: text.to_string(),
        image_urls: urls,
    };
    (store, submission)
}

pub fn worker(
    store: &MockExpenseRepository,
    archiver: Arc<FakeArchiver>,
    recognizer: Arc<FakeRecognizer>,
    extractor: Arc<FakeExtractor>,
) -> ExpenseWorker {
    ExpenseWorker::new(
        Arc::new(store.clone()),
        archiver,
        recognizer,
        extractor,
        Duration::from_secs(5),
    )
}

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

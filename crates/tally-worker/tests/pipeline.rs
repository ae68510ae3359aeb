mod common;

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::*;
use tally_core::{ExpenseStatus, ExtractedData, ResultStatus};
use tally_db::{ExpenseStore, MockExpenseRepository};
use tally_extract::{ImageArchiver, StructuredExtractor, TextRecognizer};
use tally_worker::ExpenseWorker;
use uuid::Uuid;

const IMG_A: &str = "https://cdn.test/attachments/a.png";
const IMG_B: &str = "https://cdn.test/attachments/b.png";

#[tokio::test]
async fn completes_with_archived_urls_text_and_extraction() {
    let (store, submission) = seeded("lunch with team", &[IMG_A, IMG_B]);
    let archiver = Arc::new(FakeArchiver::default());
    let recognizer = Arc::new(FakeRecognizer::with(&[
        (IMG_A, "NASI GORENG 25.000"),
        (IMG_B, "ES TEH x2 5.000\n"),
    ]));
    let extractor = Arc::new(FakeExtractor::returning(lunch()));

    let result = worker(&store, archiver.clone(), recognizer, extractor.clone())
        .process(&submission)
        .await;

    assert_eq!(result.status, ResultStatus::Success);
    assert_eq!(result.interaction_token, submission.interaction_token);
    assert_eq!(
        result.result.as_ref().unwrap()["expenseId"],
        submission.expense_id.to_string()
    );

    let expense = store.snapshot(submission.expense_id).unwrap();
    assert_eq!(expense.status, ExpenseStatus::Completed);
    assert_eq!(
        expense.image_urls,
        vec![
            "http://storage.test/expenses/receipts/1-a.png".to_string(),
            "http://storage.test/expenses/receipts/1-b.png".to_string(),
        ]
    );
    assert_eq!(
        expense.ocr_text.as_deref(),
        Some("NASI GORENG 25.000\nES TEH x2 5.000")
    );
    assert_eq!(expense.extracted(), Some(lunch()));

    // Archiving sees images in submission order
    assert_eq!(*archiver.calls.lock().unwrap(), vec![IMG_A, IMG_B]);
    // Extraction input is free text, newline, then the untrimmed recognized blob
    assert_eq!(
        *extractor.inputs.lock().unwrap(),
        vec!["lunch with team\nNASI GORENG 25.000\nES TEH x2 5.000\n".to_string()]
    );
}

#[tokio::test]
async fn all_images_failing_still_completes() {
    let (store, submission) = seeded("", &[IMG_A, IMG_B]);
    let archiver = Arc::new(FakeArchiver::failing_all());
    let recognizer = Arc::new(FakeRecognizer::default());
    let extractor = Arc::new(FakeExtractor::returning(ExtractedData::empty()));

    let result = worker(&store, archiver, recognizer, extractor.clone())
        .process(&submission)
        .await;

    assert!(result.is_success());
    let expense = store.snapshot(submission.expense_id).unwrap();
    assert_eq!(expense.status, ExpenseStatus::Completed);
    assert!(expense.image_urls.is_empty());
    assert_eq!(expense.ocr_text.as_deref(), Some(""));
    assert_eq!(
        expense.extracted_data.as_deref(),
        Some(r#"{"items":[],"tax":0,"total":0}"#)
    );
    // Two failed recognitions contribute two empty blocks
    assert_eq!(*extractor.inputs.lock().unwrap(), vec!["\n\n".to_string()]);
}

#[tokio::test]
async fn one_broken_image_is_skipped() {
    let (store, submission) = seeded("", &[IMG_A, IMG_B]);
    let archiver = Arc::new(FakeArchiver {
        broken: vec![IMG_A.to_string()],
        ..FakeArchiver::default()
    });
    let recognizer = Arc::new(FakeRecognizer::with(&[(IMG_B, "TOTAL 10.000")]));
    let extractor = Arc::new(FakeExtractor::returning(ExtractedData::empty()));

    worker(&store, archiver, recognizer, extractor)
        .process(&submission)
        .await;

    let expense = store.snapshot(submission.expense_id).unwrap();
    assert_eq!(
        expense.image_urls,
        vec!["http://storage.test/expenses/receipts/1-b.png".to_string()]
    );
    assert_eq!(expense.ocr_text.as_deref(), Some("TOTAL 10.000"));
}

#[tokio::test]
async fn redelivery_after_completion_stays_completed() {
    let (store, submission) = seeded("coffee 30k", &[IMG_A]);
    let archiver = Arc::new(FakeArchiver::default());
    let recognizer = Arc::new(FakeRecognizer::with(&[(IMG_A, "KOPI 30.000")]));
    let extractor = Arc::new(FakeExtractor::returning(lunch()));
    let worker = worker(&store, archiver, recognizer, extractor);

    let first = worker.process(&submission).await;
    let after_first = store.snapshot(submission.expense_id).unwrap();
    let second = worker.process(&submission).await;
    let after_second = store.snapshot(submission.expense_id).unwrap();

    assert!(first.is_success());
    assert!(second.is_success());
    assert_eq!(after_second.status, ExpenseStatus::Completed);
    // Overwritten, not appended
    assert_eq!(after_second.image_urls, after_first.image_urls);
    assert_eq!(after_second.ocr_text, after_first.ocr_text);
    assert_eq!(after_second.extracted_data, after_first.extracted_data);
}

#[tokio::test]
async fn persistence_failure_marks_failed() {
    let (store, submission) = seeded("taxi 50k", &[]);
    store.fail_complete(true);
    let worker = worker(
        &store,
        Arc::new(FakeArchiver::default()),
        Arc::new(FakeRecognizer::default()),
        Arc::new(FakeExtractor::returning(lunch())),
    );

    let result = worker.process(&submission).await;

    assert_eq!(result.status, ResultStatus::Failed);
    assert!(result.result.is_none());
    let error = result.error.unwrap();
    assert!(!error.contains("connection reset"), "leaked detail: {}", error);
    assert_eq!(
        store.snapshot(submission.expense_id).unwrap().status,
        ExpenseStatus::Failed
    );
}

#[tokio::test]
async fn failure_to_mark_failed_is_swallowed() {
    let (store, submission) = seeded("taxi 50k", &[]);
    store.fail_complete(true);
    store.fail_mark_failed(true);
    let worker = worker(
        &store,
        Arc::new(FakeArchiver::default()),
        Arc::new(FakeRecognizer::default()),
        Arc::new(FakeExtractor::returning(lunch())),
    );

    let result = worker.process(&submission).await;

    assert_eq!(result.status, ResultStatus::Failed);
    assert_eq!(
        store.snapshot(submission.expense_id).unwrap().status,
        ExpenseStatus::Processing
    );
}

#[tokio::test]
async fn redelivery_after_failure_stays_failed() {
    let (store, submission) = seeded("taxi 50k", &[]);
    store.fail_complete(true);
    let worker = worker(
        &store,
        Arc::new(FakeArchiver::default()),
        Arc::new(FakeRecognizer::default()),
        Arc::new(FakeExtractor::returning(lunch())),
    );
    worker.process(&submission).await;

    store.fail_complete(false);
    let again = worker.process(&submission).await;

    assert_eq!(again.status, ResultStatus::Failed);
    let expense = store.snapshot(submission.expense_id).unwrap();
    assert_eq!(expense.status, ExpenseStatus::Failed);
    assert!(expense.extracted_data.is_none());
}

#[tokio::test]
async fn missing_record_yields_failed_result() {
    let (store, mut submission) = seeded("ghost", &[]);
    submission.expense_id = Uuid::new_v4();
    let worker = worker(
        &store,
        Arc::new(FakeArchiver::default()),
        Arc::new(FakeRecognizer::default()),
        Arc::new(FakeExtractor::returning(lunch())),
    );

    let result = worker.process(&submission).await;
    assert_eq!(result.status, ResultStatus::Failed);
    assert_eq!(result.error.as_deref(), Some("expense record not found"));
}

#[tokio::test]
async fn slow_pipeline_times_out_as_failure() {
    let (store, submission) = seeded("slow", &[]);
    let extractor = Arc::new(FakeExtractor {
        delay: Some(Duration::from_secs(5)),
        ..FakeExtractor::returning(lunch())
    });
    let worker = ExpenseWorker::new(
        Arc::new(store.clone()),
        Arc::new(FakeArchiver::default()),
        Arc::new(FakeRecognizer::default()),
        extractor,
        Duration::from_millis(50),
    );

    let result = worker.process(&submission).await;

    assert_eq!(result.status, ResultStatus::Failed);
    assert_eq!(result.error.as_deref(), Some("expense processing timed out"));
    let expense = store.get(submission.expense_id).await.unwrap().unwrap();
    assert_eq!(expense.status, ExpenseStatus::Failed);
}

/// Notes the stored status of the expense whenever a stage runs.
struct StageStatusRecorder {
    store: MockExpenseRepository,
    id: Uuid,
    seen: Mutex<Vec<(&'static str, ExpenseStatus)>>,
}

impl StageStatusRecorder {
    fn record(&self, stage: &'static str) {
        let status = self.store.snapshot(self.id).unwrap().status;
        self.seen.lock().unwrap().push((stage, status));
    }
}

#[async_trait]
impl ImageArchiver for StageStatusRecorder {
    async fn archive(&self, url: &str) -> Option<String> {
        self.record("archive");
        Some(url.to_string())
    }
}

#[async_trait]
impl TextRecognizer for StageStatusRecorder {
    async fn recognize(&self, _image_url: &str) -> Option<String> {
        self.record("recognize");
        Some("TOTAL 38.500".to_string())
    }
}

#[async_trait]
impl StructuredExtractor for StageStatusRecorder {
    async fn extract(&self, _text: &str) -> ExtractedData {
        self.record("extract");
        lunch()
    }
}

#[tokio::test]
async fn processing_is_stored_before_any_stage_runs() {
    let (store, submission) = seeded("lunch", &[IMG_A]);
    let recorder = Arc::new(StageStatusRecorder {
        store: store.clone(),
        id: submission.expense_id,
        seen: Mutex::new(Vec::new()),
    });
    let worker = ExpenseWorker::new(
        Arc::new(store.clone()),
        recorder.clone(),
        recorder.clone(),
        recorder.clone(),
        Duration::from_secs(5),
    );

    let result = worker.process(&submission).await;

    assert!(result.is_success());
    assert_eq!(
        *recorder.seen.lock().unwrap(),
        vec![
            ("archive", ExpenseStatus::Processing),
            ("recognize", ExpenseStatus::Processing),
            ("extract", ExpenseStatus::Processing),
        ]
    );
    assert_eq!(
        store.snapshot(submission.expense_id).unwrap().status,
        ExpenseStatus::Completed
    );
}

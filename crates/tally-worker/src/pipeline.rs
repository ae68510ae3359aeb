//! Per-message expense pipeline

use std::sync::Arc;
use std::time::{Duration, Instant};

use tally_core::{AppError, Expense, ResultMessage, SubmissionMessage};
use tally_db::ExpenseStore;
use tally_extract::{ImageArchiver, StructuredExtractor, TextRecognizer};

pub struct ExpenseWorker {
    store: Arc<dyn ExpenseStore>,
    archiver: Arc<dyn ImageArchiver>,
    recognizer: Arc<dyn TextRecognizer>,
    extractor: Arc<dyn StructuredExtractor>,
    message_timeout: Duration,
}

/// Short description sent back to the submitter. Details stay in the logs.
fn public_error(err: &AppError) -> &'static str {
    match err {
        AppError::NotFound(_) => "expense record not found",
        AppError::InvalidTransition { .. } => "expense was already finalized",
        _ => "expense processing failed",
    }
}

impl ExpenseWorker {
    pub fn new(
        store: Arc<dyn ExpenseStore>,
        archiver: Arc<dyn ImageArchiver>,
        recognizer: Arc<dyn TextRecognizer>,
        extractor: Arc<dyn StructuredExtractor>,
        message_timeout: Duration,
    ) -> Self {
        Self {
            store,
            archiver,
            recognizer,
            extractor,
            message_timeout,
        }
    }

    /// Run the pipeline for one submission. Never fails: every outcome is a result message.
    #[tracing::instrument(
        skip(self, submission),
        fields(expense_id = %submission.expense_id, message_id = %submission.message_id)
    )]
    pub async fn process(&self, submission: &SubmissionMessage) -> ResultMessage {
        let start = Instant::now();
        let outcome = tokio::time::timeout(self.message_timeout, self.run(submission)).await;

        let error = match outcome {
            Ok(Ok(expense)) => {
                tracing::info!(
                    status = %expense.status,
                    images = expense.image_urls.len(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Expense processed"
                );
                return ResultMessage::success(submission);
            }
            Ok(Err(e)) => {
                tracing::error!(
                    error = %e,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Expense processing failed"
                );
                public_error(&e).to_string()
            }
            Err(_) => {
                tracing::error!(
                    timeout_secs = self.message_timeout.as_secs(),
                    "Expense processing timed out"
                );
                "expense processing timed out".to_string()
            }
        };

        if let Err(e) = self.store.mark_failed(submission.expense_id).await {
            tracing::warn!(error = %e, "Could not mark expense as failed");
        }

        ResultMessage::failed(submission, error)
    }

    async fn run(&self, submission: &SubmissionMessage) -> Result<Expense, AppError> {
        let id = submission.expense_id;

        match self.store.mark_processing(id).await {
            Ok(_) => {}
            // Redelivery of a finished message: re-run and overwrite
            Err(e) if e.is_invalid_transition() => {
                tracing::warn!(error = %e, "Expense already finalized, re-running pipeline");
            }
            Err(e) => return Err(e),
        }

        let mut stored_urls = Vec::with_capacity(submission.image_urls.len());
        for url in &submission.image_urls {
            if let Some(stored) = self.archiver.archive(url).await {
                stored_urls.push(stored);
            }
        }

        let mut blocks = Vec::with_capacity(submission.image_urls.len());
        for url in &submission.image_urls {
            blocks.push(self.recognizer.recognize(url).await.unwrap_or_default());
        }
        let recognized = blocks.join("\n");

        let combined = format!("{}\n{}", submission.text, recognized);
        let extracted = self.extractor.extract(&combined).await;

        tracing::debug!(
            archived = stored_urls.len(),
            submitted = submission.image_urls.len(),
            items = extracted.items.len(),
            "Pipeline stages finished, persisting"
        );

        self.store
            .complete(id, stored_urls, recognized.trim().to_string(), &extracted)
            .await
    }
}

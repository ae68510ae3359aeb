//! Store trait for expense persistence
//!
//! Narrow interface over the expense table so the pipeline can be exercised
//! without a database.

use async_trait::async_trait;
use tally_core::{AppError, Expense, ExtractedData, NewExpense};
use uuid::Uuid;

#[async_trait]
pub trait ExpenseStore: Send + Sync {
    /// Insert a new record in `unprocessed`.
    async fn create(&self, expense: NewExpense) -> Result<Expense, AppError>;

    async fn get(&self, id: Uuid) -> Result<Option<Expense>, AppError>;

    /// Move a record to `processing`.
    ///
    /// Returns `AppError::InvalidTransition` when the record is already terminal
    /// and `AppError::NotFound` when it does not exist.
    async fn mark_processing(&self, id: Uuid) -> Result<Expense, AppError>;

    /// Write the pipeline outputs and move the record to `completed` in one step.
    async fn complete(
        &self,
        id: Uuid,
        image_urls: Vec<String>,
        ocr_text: String,
        extracted: &ExtractedData,
    ) -> Result<Expense, AppError>;

    async fn mark_failed(&self, id: Uuid) -> Result<Expense, AppError>;
}

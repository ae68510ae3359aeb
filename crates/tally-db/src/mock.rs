//! In-memory expense store for tests
//!
//! Applies the same transition rules as the SQL repository and can be told
//! to fail specific operations.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tally_core::{AppError, Expense, ExpenseStatus, ExtractedData, NewExpense};
use uuid::Uuid;

use crate::store::ExpenseStore;

#[derive(Clone, Default)]
pub struct MockExpenseRepository {
    expenses: Arc<Mutex<HashMap<Uuid, Expense>>>,
    fail_complete: Arc<Mutex<bool>>,
    fail_mark_failed: Arc<Mutex<bool>>,
}

impl MockExpenseRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record directly, bypassing `create`.
    pub fn insert(&self, expense: Expense) {
        self.expenses.lock().unwrap().insert(expense.id, expense);
    }

    pub fn snapshot(&self, id: Uuid) -> Option<Expense> {
        self.expenses.lock().unwrap().get(&id).cloned()
    }

    pub fn fail_complete(&self, fail: bool) {
        *self.fail_complete.lock().unwrap() = fail;
    }

    pub fn fail_mark_failed(&self, fail: bool) {
        *self.fail_mark_failed.lock().unwrap() = fail;
    }

    fn transition<F>(&self, id: Uuid, to: ExpenseStatus, apply: F) -> Result<Expense, AppError>
    where
        F: FnOnce(&mut Expense),
    {
        let mut expenses = self.expenses.lock().unwrap();
        let expense = expenses
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Expense {} not found", id)))?;
        if !expense.status.can_transition_to(to) {
            return Err(AppError::InvalidTransition {
                id,
                from: expense.status,
                to,
            });
        }
        apply(expense);
        expense.status = to;
        expense.updated_at = Utc::now();
        Ok(expense.clone())
    }
}

/// Build a stored record from intake fields, as the SQL insert would.
pub fn expense_from_new(new: NewExpense) -> Expense {
    let now = Utc::now();
    Expense {
        id: new.id,
        message_id: new.message_id,
        interaction_token: new.interaction_token,
        user_id: new.user_id,
        user_tag: new.user_tag,
        text: new.text,
        image_urls: new.image_urls,
        channel_id: new.channel_id,
        is_dm: new.is_dm,
        ocr_text: None,
        extracted_data: None,
        status: ExpenseStatus::Unprocessed,
        timestamp: new.timestamp,
        created_at: now,
        updated_at: now,
    }
}

#[async_trait]
impl ExpenseStore for MockExpenseRepository {
    async fn create(&self, expense: NewExpense) -> Result<Expense, AppError> {
        let mut expenses = self.expenses.lock().unwrap();
        if expenses.contains_key(&expense.id) {
            return Err(AppError::InvalidInput(format!(
                "Expense {} already exists",
                expense.id
            )));
        }
        let record = expense_from_new(expense);
        expenses.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Expense>, AppError> {
        Ok(self.snapshot(id))
    }

    async fn mark_processing(&self, id: Uuid) -> Result<Expense, AppError> {
        self.transition(id, ExpenseStatus::Processing, |_| {})
    }

    async fn complete(
        &self,
        id: Uuid,
        image_urls: Vec<String>,
        ocr_text: String,
        extracted: &ExtractedData,
    ) -> Result<Expense, AppError> {
        if *self.fail_complete.lock().unwrap() {
            return Err(AppError::Internal("connection reset by peer".to_string()));
        }
        let extracted_json = serde_json::to_string(extracted)?;
        self.transition(id, ExpenseStatus::Completed, |expense| {
            expense.image_urls = image_urls;
            expense.ocr_text = Some(ocr_text);
            expense.extracted_data = Some(extracted_json);
        })
    }

    async fn mark_failed(&self, id: Uuid) -> Result<Expense, AppError> {
        if *self.fail_mark_failed.lock().unwrap() {
            return Err(AppError::Internal("connection reset by peer".to_string()));
        }
        self.transition(id, ExpenseStatus::Failed, |_| {})
    }
}

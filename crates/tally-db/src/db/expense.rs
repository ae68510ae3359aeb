//! Expense repository: CRUD and status transitions for the expenses table.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres};
use tally_core::{AppError, Expense, ExpenseStatus, ExtractedData, NewExpense};
use uuid::Uuid;

use crate::store::ExpenseStore;

const EXPENSE_COLUMNS: &str = "id, message_id, interaction_token, user_id, user_tag, text, \
     image_urls, channel_id, is_dm, ocr_text, extracted_data, status, timestamp, \
     created_at, updated_at";

/// Source states accepted by a move to `target`, as text for `status::text = ANY($n)`.
fn sources_for(target: ExpenseStatus) -> Vec<String> {
    ExpenseStatus::allowed_sources(target)
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Clone)]
pub struct ExpenseRepository {
    pool: PgPool,
}

impl ExpenseRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[tracing::instrument(skip(self, expense), fields(db.table = "expenses", db.record_id = %expense.id))]
    pub async fn create(&self, expense: NewExpense) -> Result<Expense, AppError> {
        let sql = format!(
            r#"
            INSERT INTO expenses (
                id, message_id, interaction_token, user_id, user_tag, text,
                image_urls, channel_id, is_dm, status, timestamp
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {}
            "#,
            EXPENSE_COLUMNS
        );
        let row = sqlx::query_as::<Postgres, Expense>(&sql)
            .bind(expense.id)
            .bind(&expense.message_id)
            .bind(&expense.interaction_token)
            .bind(&expense.user_id)
            .bind(&expense.user_tag)
            .bind(&expense.text)
            .bind(&expense.image_urls)
            .bind(&expense.channel_id)
            .bind(expense.is_dm)
            .bind(ExpenseStatus::Unprocessed)
            .bind(expense.timestamp)
            .fetch_one(&self.pool)
            .await?;
        Ok(row)
    }

    #[tracing::instrument(skip(self), fields(db.table = "expenses", db.record_id = %id))]
    pub async fn get(&self, id: Uuid) -> Result<Option<Expense>, AppError> {
        let sql = format!("SELECT {} FROM expenses WHERE id = $1", EXPENSE_COLUMNS);
        let row = sqlx::query_as::<Postgres, Expense>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Tell a missing record apart from one in the wrong state after a guarded update matched nothing.
    async fn rejected_transition(&self, id: Uuid, to: ExpenseStatus) -> AppError {
        match self.get(id).await {
            Ok(Some(current)) => AppError::InvalidTransition {
                id,
                from: current.status,
                to,
            },
            Ok(None) => AppError::NotFound(format!("Expense {} not found", id)),
            Err(e) => e,
        }
    }

    #[tracing::instrument(skip(self), fields(db.table = "expenses", db.record_id = %id))]
    pub async fn mark_processing(&self, id: Uuid) -> Result<Expense, AppError> {
        self.set_status(id, ExpenseStatus::Processing).await
    }

    #[tracing::instrument(skip(self), fields(db.table = "expenses", db.record_id = %id))]
    pub async fn mark_failed(&self, id: Uuid) -> Result<Expense, AppError> {
        self.set_status(id, ExpenseStatus::Failed).await
    }

    async fn set_status(&self, id: Uuid, to: ExpenseStatus) -> Result<Expense, AppError> {
        let sql = format!(
            r#"
            UPDATE expenses
            SET status = $2, updated_at = NOW()
            WHERE id = $1 AND status::text = ANY($3)
            RETURNING {}
            "#,
            EXPENSE_COLUMNS
        );
        let row = sqlx::query_as::<Postgres, Expense>(&sql)
            .bind(id)
            .bind(to)
            .bind(sources_for(to))
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(expense) => Ok(expense),
            None => Err(self.rejected_transition(id, to).await),
        }
    }

    #[tracing::instrument(
        skip(self, image_urls, ocr_text, extracted),
        fields(db.table = "expenses", db.record_id = %id, images = image_urls.len())
    )]
    pub async fn complete(
        &self,
        id: Uuid,
        image_urls: Vec<String>,
        ocr_text: String,
        extracted: &ExtractedData,
    ) -> Result<Expense, AppError> {
        let extracted_json = serde_json::to_string(extracted)?;
        let sql = format!(
            r#"
            UPDATE expenses
            SET status = $2, image_urls = $3, ocr_text = $4, extracted_data = $5, updated_at = NOW()
            WHERE id = $1 AND status::text = ANY($6)
            RETURNING {}
            "#,
            EXPENSE_COLUMNS
        );
        let row = sqlx::query_as::<Postgres, Expense>(&sql)
            .bind(id)
            .bind(ExpenseStatus::Completed)
            .bind(&image_urls)
            .bind(&ocr_text)
            .bind(&extracted_json)
            .bind(sources_for(ExpenseStatus::Completed))
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(expense) => Ok(expense),
            None => Err(self.rejected_transition(id, ExpenseStatus::Completed).await),
        }
    }
}

#[async_trait]
impl ExpenseStore for ExpenseRepository {
    async fn create(&self, expense: NewExpense) -> Result<Expense, AppError> {
        ExpenseRepository::create(self, expense).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Expense>, AppError> {
        ExpenseRepository::get(self, id).await
    }

    async fn mark_processing(&self, id: Uuid) -> Result<Expense, AppError> {
        ExpenseRepository::mark_processing(self, id).await
    }

    async fn complete(
        &self,
        id: Uuid,
        image_urls: Vec<String>,
        ocr_text: String,
        extracted: &ExtractedData,
    ) -> Result<Expense, AppError> {
        ExpenseRepository::complete(self, id, image_urls, ocr_text, extracted).await
    }

    async fn mark_failed(&self, id: Uuid) -> Result<Expense, AppError> {
        ExpenseRepository::mark_failed(self, id).await
    }
}

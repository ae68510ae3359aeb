use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

use super::extraction::ExtractedData;

/// Processing status of an expense.
///
/// The only legal paths are `unprocessed -> processing -> completed` and
/// `unprocessed -> processing -> failed`. Terminal states accept a
/// self-transition so a redelivered message can overwrite its own outcome,
/// but a terminal record never moves to a different state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "expense_status", rename_all = "lowercase")
)]
#[serde(rename_all = "lowercase")]
pub enum ExpenseStatus {
    Unprocessed,
    Processing,
    Completed,
    Failed,
}

impl ExpenseStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExpenseStatus::Completed | ExpenseStatus::Failed)
    }

    /// States a record may be in for a move to `target` to be accepted.
    pub fn allowed_sources(target: ExpenseStatus) -> &'static [ExpenseStatus] {
        match target {
            ExpenseStatus::Unprocessed => &[],
            ExpenseStatus::Processing => &[ExpenseStatus::Unprocessed, ExpenseStatus::Processing],
            ExpenseStatus::Completed => &[ExpenseStatus::Processing, ExpenseStatus::Completed],
            ExpenseStatus::Failed => &[ExpenseStatus::Processing, ExpenseStatus::Failed],
        }
    }

    pub fn can_transition_to(&self, target: ExpenseStatus) -> bool {
        Self::allowed_sources(target).contains(self)
    }
}

impl Display for ExpenseStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ExpenseStatus::Unprocessed => write!(f, "unprocessed"),
            ExpenseStatus::Processing => write!(f, "processing"),
            ExpenseStatus::Completed => write!(f, "completed"),
            ExpenseStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for ExpenseStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unprocessed" => Ok(ExpenseStatus::Unprocessed),
            "processing" => Ok(ExpenseStatus::Processing),
            "completed" => Ok(ExpenseStatus::Completed),
            "failed" => Ok(ExpenseStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid expense status: {}", s)),
        }
    }
}

/// A persisted expense submission.
///
/// Identity fields (`id`, `message_id`, `interaction_token`, submitter, text,
/// `timestamp`) are written once by intake. The worker owns `status`,
/// `ocr_text`, `extracted_data` and the rewrite of `image_urls`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    pub id: Uuid,
    pub message_id: String,
    pub interaction_token: String,
    pub user_id: String,
    pub user_tag: String,
    pub text: String,
    pub image_urls: Vec<String>,
    pub channel_id: Option<String>,
    pub is_dm: bool,
    pub ocr_text: Option<String>,
    /// Serialized [`ExtractedData`]
    pub extracted_data: Option<String>,
    pub status: ExpenseStatus,
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Expense {
    /// Decode the stored extraction result, if any.
    pub fn extracted(&self) -> Option<ExtractedData> {
        self.extracted_data
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
    }
}

/// Intake-owned fields of a new expense. The record starts `unprocessed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewExpense {
    pub id: Uuid,
    pub message_id: String,
    pub interaction_token: String,
    pub user_id: String,
    pub user_tag: String,
    pub text: String,
    pub image_urls: Vec<String>,
    pub channel_id: Option<String>,
    pub is_dm: bool,
    pub timestamp: DateTime<Utc>,
}

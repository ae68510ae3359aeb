//! Queue message contracts shared with the intake side and the reply dispatcher.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt::{Display, Formatter, Result as FmtResult};
use uuid::Uuid;

/// Payload of the submission queue: one entry per user submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionMessage {
    pub expense_id: Uuid,
    pub message_id: String,
    pub interaction_token: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub image_urls: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Success,
    Failed,
}

impl Display for ResultStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ResultStatus::Success => write!(f, "success"),
            ResultStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Payload of the result queue, routed back by `interaction_token`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMessage {
    pub message_id: String,
    pub interaction_token: String,
    pub status: ResultStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl ResultMessage {
    /// Success carries the expense id so the dispatcher can look the record up.
    pub fn success(submission: &SubmissionMessage) -> Self {
        Self {
            message_id: submission.message_id.clone(),
            interaction_token: submission.interaction_token.clone(),
            status: ResultStatus::Success,
            result: Some(json!({ "expenseId": submission.expense_id })),
            error: None,
        }
    }

    pub fn failed(submission: &SubmissionMessage, error: impl Into<String>) -> Self {
        Self {
            message_id: submission.message_id.clone(),
            interaction_token: submission.interaction_token.clone(),
            status: ResultStatus::Failed,
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }
}

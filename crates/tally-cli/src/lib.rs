use chrono::Utc;
use tally_core::{NewExpense, ResultMessage, SubmissionMessage};
use uuid::Uuid;

/// Intake fields for one submission, as typed on the command line.
#[derive(Debug, Clone, Default)]
pub struct SubmitRequest {
    pub user_id: String,
    pub user_tag: String,
    pub text: String,
    pub image_urls: Vec<String>,
    pub channel_id: Option<String>,
    pub is_dm: bool,
}

/// Build the `unprocessed` record and the queue message that points at it.
///
/// A submission needs free text, at least one image, or both.
pub fn build_submission(request: SubmitRequest) -> anyhow::Result<(NewExpense, SubmissionMessage)> {
    let text = request.text.trim().to_string();
    let image_urls: Vec<String> = request
        .image_urls
        .into_iter()
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .collect();

    if text.is_empty() && image_urls.is_empty() {
        anyhow::bail!("Nothing to submit: provide --text, --image-url, or both");
    }
    if request.user_id.trim().is_empty() {
        anyhow::bail!("--user-id must not be empty");
    }

    let id = Uuid::new_v4();
    let message_id = Uuid::new_v4().to_string();
    let interaction_token = Uuid::new_v4().simple().to_string();

    let expense = NewExpense {
        id,
        message_id: message_id.clone(),
        interaction_token: interaction_token.clone(),
        user_id: request.user_id,
        user_tag: request.user_tag,
        text: text.clone(),
        image_urls: image_urls.clone(),
        channel_id: request.channel_id,
        is_dm: request.is_dm,
        timestamp: Utc::now(),
    };
    let submission = SubmissionMessage {
        expense_id: id,
        message_id,
        interaction_token,
        text,
        image_urls,
    };
    Ok((expense, submission))
}

/// The line a requester would see. Failure detail is never shown.
pub fn describe_result(result: &ResultMessage) -> String {
    let expense_id = result
        .result
        .as_ref()
        .and_then(|r| r.get("expenseId"))
        .and_then(|v| v.as_str());

    match (result.is_success(), expense_id) {
        (true, Some(id)) => format!("[{}] expense {} recorded", result.interaction_token, id),
        (true, None) => format!("[{}] expense recorded", result.interaction_token),
        (false, _) => format!(
            "[{}] sorry, that expense could not be processed",
            result.interaction_token
        ),
    }
}

/// Initialize tracing for the CLI.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

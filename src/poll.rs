use chrono::{Datelike, NaiveDate, Weekday};
use tracing::{error, info, warn};

use crate::schedule::next_weekday;
use crate::telegram::TelegramApi;

/// Weekday the poll's date label points at. Deliberately a separate constant
/// from the scheduler's firing weekday: the label names the session day, the
/// scheduler decides when the poll is posted.
pub const POLL_WEEKDAY: Weekday = Weekday::Tue;

const QUESTION_SUFFIX: &str = "London Valley";
const OPTIONS: [&str; 2] = ["2030 - 2130", "2130 - 2230"];

/// The fixed conversation + forum topic every poll goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetLocation {
    pub chat_id: i64,
    pub thread_id: i64,
}

#[derive(Debug, Clone)]
pub struct PollContent {
    pub question: String,
    pub options: Vec<String>,
    pub is_anonymous: bool,
    pub allows_multiple_answers: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("send poll: {0:#}")]
    SendPoll(anyhow::Error),
    #[error("pin message: {0:#}")]
    PinMessage(anyhow::Error),
}

/// Per-invocation summary of the publish-then-pin sequence. Logged, then
/// dropped; nothing about past runs is persisted.
#[derive(Debug)]
pub struct ExecutionOutcome {
    pub date_label: String,
    pub published: bool,
    pub pinned: bool,
    pub error: Option<PublishError>,
}

/// Session-day label, e.g. "1 September". No zero padding on the day.
pub fn format_date_label(date: NaiveDate) -> String {
    format!("{} {}", date.day(), date.format("%B"))
}

pub fn weekly_poll_content(date_label: &str) -> PollContent {
    PollContent {
        question: format!("{date_label} {QUESTION_SUFFIX}"),
        options: OPTIONS.iter().map(|s| s.to_string()).collect(),
        is_anonymous: false,
        allows_multiple_answers: true,
    }
}

/// Post the upcoming session's poll and pin it, as one logical operation.
///
/// The two steps are not transactional: a pin failure after a successful
/// send leaves the poll live but unpinned, reported as a partial outcome
/// and not retried. A send failure aborts before the pin is attempted.
/// All failures are contained here; callers only ever see the outcome.
pub async fn publish_weekly_poll<A: TelegramApi>(
    api: &A,
    target: &TargetLocation,
    today: NaiveDate,
) -> ExecutionOutcome {
    let session_day = next_weekday(today, POLL_WEEKDAY);
    let date_label = format_date_label(session_day);
    let content = weekly_poll_content(&date_label);

    let message_id = match api.send_poll(target, &content).await {
        Ok(id) => id,
        Err(err) => {
            let msg = format!("{err:#}");
            error!(error = %msg, label = %date_label, "failed to send weekly poll");
            return ExecutionOutcome {
                date_label,
                published: false,
                pinned: false,
                error: Some(PublishError::SendPoll(err)),
            };
        }
    };

    match api.pin_message(target, message_id).await {
        Ok(()) => {
            info!(label = %date_label, message_id, "weekly poll sent and pinned");
            ExecutionOutcome {
                date_label,
                published: true,
                pinned: true,
                error: None,
            }
        }
        Err(err) => {
            let msg = format!("{err:#}");
            warn!(
                error = %msg,
                label = %date_label,
                message_id,
                "weekly poll sent but pinning failed"
            );
            ExecutionOutcome {
                date_label,
                published: true,
                pinned: false,
                error: Some(PublishError::PinMessage(err)),
            }
        }
    }
}

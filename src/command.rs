use anyhow::Context;
use chrono::NaiveDate;
use tracing::info;

use crate::poll::{self, ExecutionOutcome, TargetLocation};
use crate::telegram::TelegramApi;

pub const DENY_MESSAGE: &str = "Only group admins can trigger the poll.";

fn is_admin_status(status: &str) -> bool {
    matches!(status, "administrator" | "creator")
}

/// Out-of-band trigger for the weekly publish, restricted to group admins.
///
/// The poll always goes to the fixed configured target, never the chat the
/// command arrived from, so manual runs look exactly like scheduled ones.
/// Returns `Ok(None)` when the caller was denied; a failed role lookup
/// fails closed (error, no publish, no reply).
pub async fn handle_manual_trigger<A: TelegramApi>(
    api: &A,
    target: &TargetLocation,
    chat_id: i64,
    user_id: i64,
    reply_to: i64,
    today: NaiveDate,
) -> anyhow::Result<Option<ExecutionOutcome>> {
    let status = api
        .get_chat_member_status(chat_id, user_id)
        .await
        .context("look up caller's chat member status")?;

    if !is_admin_status(&status) {
        info!(user_id, status = %status, "manual poll trigger denied");
        api.send_message(chat_id, Some(reply_to), DENY_MESSAGE)
            .await
            .context("send denial reply")?;
        return Ok(None);
    }

    Ok(Some(poll::publish_weekly_poll(api, target, today).await))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poll::PollContent;
    use std::sync::Mutex;

    struct FakeApi {
        member_status: anyhow::Result<&'static str>,
        polls: Mutex<Vec<TargetLocation>>,
        pins: Mutex<Vec<i64>>,
        messages: Mutex<Vec<(i64, Option<i64>, String)>>,
    }

    impl FakeApi {
        fn with_status(status: &'static str) -> Self {
            Self {
                member_status: Ok(status),
                polls: Mutex::new(Vec::new()),
                pins: Mutex::new(Vec::new()),
                messages: Mutex::new(Vec::new()),
            }
        }

        fn with_lookup_failure() -> Self {
            Self {
                member_status: Err(anyhow::anyhow!("simulated getChatMember failure")),
                polls: Mutex::new(Vec::new()),
                pins: Mutex::new(Vec::new()),
                messages: Mutex::new(Vec::new()),
            }
        }
    }

    impl TelegramApi for FakeApi {
        async fn send_poll(
            &self,
            target: &TargetLocation,
            _content: &PollContent,
        ) -> anyhow::Result<i64> {
            self.polls.lock().unwrap().push(*target);
            Ok(101)
        }

        async fn pin_message(
            &self,
            _target: &TargetLocation,
            message_id: i64,
        ) -> anyhow::Result<()> {
            self.pins.lock().unwrap().push(message_id);
            Ok(())
        }

        async fn send_message(
            &self,
            chat_id: i64,
            reply_to: Option<i64>,
            text: &str,
        ) -> anyhow::Result<()> {
            self.messages
                .lock()
                .unwrap()
                .push((chat_id, reply_to, text.to_string()));
            Ok(())
        }

        async fn get_chat_member_status(
            &self,
            _chat_id: i64,
            _user_id: i64,
        ) -> anyhow::Result<String> {
            match &self.member_status {
                Ok(status) => Ok(status.to_string()),
                Err(err) => Err(anyhow::anyhow!("{err}")),
            }
        }
    }

    const TARGET: TargetLocation = TargetLocation {
        chat_id: -1002160364008,
        thread_id: 5914,
    };
    const COMMAND_CHAT: i64 = -100999;

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 24).unwrap()
    }

    #[tokio::test]
    async fn non_admin_gets_one_denial_and_no_poll() {
        let api = FakeApi::with_status("member");
        let outcome = handle_manual_trigger(&api, &TARGET, COMMAND_CHAT, 42, 5915, monday())
            .await
            .unwrap();

        assert!(outcome.is_none());
        assert!(api.polls.lock().unwrap().is_empty());
        assert!(api.pins.lock().unwrap().is_empty());
        let messages = api.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0], (COMMAND_CHAT, Some(5915), DENY_MESSAGE.to_string()));
    }

    #[tokio::test]
    async fn admin_triggers_one_publish_to_the_fixed_target() {
        let api = FakeApi::with_status("administrator");
        let outcome = handle_manual_trigger(&api, &TARGET, COMMAND_CHAT, 42, 5915, monday())
            .await
            .unwrap()
            .expect("publish should run");

        assert!(outcome.published);
        assert!(outcome.pinned);
        // Posted to the configured target, not the chat the command came from.
        assert_eq!(*api.polls.lock().unwrap(), vec![TARGET]);
        assert_eq!(*api.pins.lock().unwrap(), vec![101]);
        assert!(api.messages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn chat_creator_is_authorized() {
        let api = FakeApi::with_status("creator");
        let outcome = handle_manual_trigger(&api, &TARGET, COMMAND_CHAT, 42, 5915, monday())
            .await
            .unwrap();
        assert!(outcome.is_some());
        assert_eq!(api.polls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_role_lookup_fails_closed() {
        let api = FakeApi::with_lookup_failure();
        let result = handle_manual_trigger(&api, &TARGET, COMMAND_CHAT, 42, 5915, monday()).await;

        assert!(result.is_err());
        assert!(api.polls.lock().unwrap().is_empty());
        assert!(api.messages.lock().unwrap().is_empty());
    }
}

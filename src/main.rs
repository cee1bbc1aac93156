mod command;
mod config;
mod poll;
mod schedule;
mod telegram;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use chrono::{NaiveTime, Utc, Weekday};
use chrono_tz::Europe::London;
use clap::Parser;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::poll::TargetLocation;
use crate::schedule::ScheduleSpec;
use crate::telegram::TelegramClient;

const TRIGGER_COMMAND: &str = "pollbadminton";

/// The recurring publish fires Wednesday 00:00 Europe/London. The poll it
/// posts names the following Tuesday (see `poll::POLL_WEEKDAY`).
fn fire_spec() -> ScheduleSpec {
    ScheduleSpec {
        weekday: Weekday::Wed,
        time: NaiveTime::MIN,
        tz: London,
    }
}

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    telegram: TelegramClient,
    target: TargetLocation,
    bot_username: Arc<RwLock<Option<String>>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Arc::new(Config::parse());

    let http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(30))
        .build()
        .context("build reqwest client")?;

    let telegram = TelegramClient::new(http, config.telegram_bot_token.clone());
    let target = TargetLocation {
        chat_id: config.chat_id,
        thread_id: config.thread_id,
    };

    if let Some(base) = config.public_base_url.as_deref() {
        let url = format!("{}/telegram/webhook", base.trim_end_matches('/'));
        telegram
            .set_webhook(&url, config.telegram_webhook_secret.as_deref())
            .await
            .context("register telegram webhook")?;
        info!(%url, "registered telegram webhook");
    } else {
        info!("PUBLIC_BASE_URL not set; expecting the webhook to be registered externally");
    }
    if config.telegram_webhook_secret.is_none() {
        warn!("TELEGRAM_WEBHOOK_SECRET not set; webhook requests are not authenticated");
    }

    let state = AppState {
        config: config.clone(),
        telegram: telegram.clone(),
        target,
        bot_username: Arc::new(RwLock::new(None)),
    };

    // Recurring weekly publish, independent of the webhook surface. One
    // firing completes before the next is scheduled; a failed run is logged
    // by the scheduler and never stops the cadence.
    let spec = fire_spec();
    {
        let telegram = telegram.clone();
        tokio::spawn(schedule::run_weekly(spec, move || {
            let telegram = telegram.clone();
            async move {
                let today = Utc::now().with_timezone(&spec.tz).date_naive();
                let outcome = poll::publish_weekly_poll(&telegram, &target, today).await;
                match outcome.error {
                    None => Ok(()),
                    Some(err) => Err(anyhow::Error::new(err)),
                }
            }
        }));
    }
    info!(
        chat_id = config.chat_id,
        thread_id = config.thread_id,
        "weekly poll scheduled for Wednesday 00:00 Europe/London"
    );

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/telegram/webhook", post(telegram_webhook))
        .with_state(state)
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(TraceLayer::new_for_http());

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn telegram_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if let Some(want) = state.config.telegram_webhook_secret.as_deref() {
        let got = headers
            .get("X-Telegram-Bot-Api-Secret-Token")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if got != want {
            warn!("invalid telegram webhook secret token");
            return (StatusCode::UNAUTHORIZED, "invalid secret").into_response();
        }
    }

    let update: telegram::Update = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(err) => {
            warn!(error = %err, "invalid telegram payload");
            return (StatusCode::BAD_REQUEST, "invalid payload").into_response();
        }
    };

    let Some(cmd) = trigger_candidate(&update) else {
        return (StatusCode::OK, "").into_response();
    };

    let bot_username = match bot_username_cached(&state).await {
        Ok(v) => v,
        Err(err) => {
            let msg = format!("{err:#}");
            warn!(error = %msg, "failed to resolve bot username");
            None
        }
    };

    if !is_trigger_command(cmd.text, bot_username.as_deref()) {
        return (StatusCode::OK, "").into_response();
    }

    info!(
        update_id = update.update_id,
        chat_id = cmd.chat_id,
        user_id = cmd.user_id,
        "manual poll trigger received"
    );

    let today = Utc::now().with_timezone(&London).date_naive();
    match command::handle_manual_trigger(
        &state.telegram,
        &state.target,
        cmd.chat_id,
        cmd.user_id,
        cmd.message_id,
        today,
    )
    .await
    {
        Ok(Some(outcome)) => {
            info!(
                label = %outcome.date_label,
                published = outcome.published,
                pinned = outcome.pinned,
                "manual poll trigger completed"
            );
        }
        Ok(None) => {}
        Err(err) => {
            // Ack regardless; a non-200 would make Telegram retry the update.
            let err_msg = format!("{err:#}");
            warn!(error = %err_msg, "manual poll trigger failed");
        }
    }

    (StatusCode::OK, "").into_response()
}

async fn bot_username_cached(state: &AppState) -> anyhow::Result<Option<String>> {
    {
        let guard = state.bot_username.read().await;
        if let Some(v) = guard.clone() {
            return Ok(Some(v));
        }
    }

    let me = state.telegram.get_me().await?;
    let Some(username) = me.username.clone().filter(|u| !u.trim().is_empty()) else {
        return Ok(None);
    };

    let mut guard = state.bot_username.write().await;
    *guard = Some(username.clone());
    Ok(Some(username))
}

struct TriggerCandidate<'a> {
    chat_id: i64,
    user_id: i64,
    message_id: i64,
    text: &'a str,
}

/// A human-sent text message that may carry the trigger command. Message
/// edits are not subscribed to by the webhook registration and never count.
fn trigger_candidate(update: &telegram::Update) -> Option<TriggerCandidate<'_>> {
    let msg = update.message.as_ref()?;
    let text = msg.text.as_deref()?;
    let from = msg.from.as_ref()?;
    if from.is_bot {
        return None;
    }
    Some(TriggerCandidate {
        chat_id: msg.chat.id,
        user_id: from.id,
        message_id: msg.message_id,
        text,
    })
}

/// True when `text` starts with the trigger command, optionally addressed
/// as `/cmd@botusername`. Commands are matched case-insensitively.
fn is_trigger_command(text: &str, bot_username: Option<&str>) -> bool {
    let Some(first) = text.trim().split_whitespace().next() else {
        return false;
    };
    let Some(rest) = first.strip_prefix('/') else {
        return false;
    };
    let (cmd, mention) = match rest.split_once('@') {
        Some((cmd, mention)) => (cmd, Some(mention)),
        None => (rest, None),
    };
    if !cmd.eq_ignore_ascii_case(TRIGGER_COMMAND) {
        return false;
    }
    match (mention, bot_username) {
        (None, _) => true,
        (Some(m), Some(u)) => m.eq_ignore_ascii_case(u),
        // Addressed explicitly to some bot; without our own username we
        // cannot tell it was us, so drop it.
        (Some(_), None) => false,
    }
}

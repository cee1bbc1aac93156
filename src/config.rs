use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "rallybot")]
pub struct Config {
    #[arg(long, env = "PORT", default_value = "3000")]
    pub port: u16,

    #[arg(long, env = "TELEGRAM_BOT_TOKEN")]
    pub telegram_bot_token: String,

    /// Numeric id of the group the poll is posted to (e.g. -1002160364008).
    #[arg(long, env = "CHAT_ID")]
    pub chat_id: i64,

    /// Forum topic (message_thread_id) inside the group.
    #[arg(long, env = "THREAD_ID")]
    pub thread_id: i64,

    /// If set, require incoming webhooks to include header:
    /// `X-Telegram-Bot-Api-Secret-Token: <value>`.
    #[arg(long, env = "TELEGRAM_WEBHOOK_SECRET")]
    pub telegram_webhook_secret: Option<String>,

    /// Public base URL of this server. When set, `{base}/telegram/webhook`
    /// is registered with Telegram via setWebhook at startup.
    #[arg(long, env = "PUBLIC_BASE_URL")]
    pub public_base_url: Option<String>,
}

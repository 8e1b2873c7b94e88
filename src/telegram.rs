use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::shared::relay_core::channel::{
    ChannelFuture, CommandConfirmation, NotificationChannel, SentMessage, StopNotification,
};
use crate::shared::relay_core::router::CommandTarget;
use crate::shared::relay_core::{summarize_text, RelayError, Session};

use super::DaemonState;

const DEFAULT_POLL_TIMEOUT_SECONDS: u64 = 30;
const POLL_RETRY_DELAY_SECONDS: u64 = 5;
const REPLY_TOKEN_PREFIX: &str = "ref:";
const HELP_TEXT: &str = "Session relay commands:\n\
/sessions - list registered sessions\n\
/send <session-id> <command> - inject a command into a session\n\
/status - relay status\n\
/help - show this message\n\n\
Reply to a session notification to send a command to that session.";

#[derive(Debug, Clone)]
pub(crate) struct TelegramBridgeConfig {
    bot_token: String,
    allowed_user_id: i64,
    allowed_chat_id: Option<i64>,
    poll_timeout_seconds: u64,
}

impl TelegramBridgeConfig {
    pub(crate) fn from_env() -> Option<Self> {
        let bot_token = std::env::var("RELAY_TELEGRAM_BOT_TOKEN").ok()?;
        let allowed_user_id = std::env::var("RELAY_TELEGRAM_ALLOWED_USER_ID")
            .ok()
            .and_then(|value| value.parse::<i64>().ok())?;
        let allowed_chat_id = std::env::var("RELAY_TELEGRAM_ALLOWED_CHAT_ID")
            .ok()
            .and_then(|value| value.parse::<i64>().ok());
        let poll_timeout_seconds = std::env::var("RELAY_TELEGRAM_POLL_TIMEOUT_SECONDS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_POLL_TIMEOUT_SECONDS);

        Some(Self {
            bot_token,
            allowed_user_id,
            allowed_chat_id,
            poll_timeout_seconds,
        })
    }

    fn api_base(&self) -> String {
        format!("https://api.telegram.org/bot{}", self.bot_token)
    }
}

#[derive(Debug, Deserialize)]
struct TelegramGetUpdatesResponse {
    ok: bool,
    #[serde(default)]
    result: Vec<TelegramUpdate>,
}

#[derive(Debug, Deserialize)]
struct TelegramUpdate {
    update_id: i64,
    #[serde(default)]
    message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
struct TelegramMessage {
    chat: TelegramChat,
    from: Option<TelegramUser>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    reply_to_message: Option<TelegramRepliedMessage>,
}

#[derive(Debug, Deserialize)]
struct TelegramRepliedMessage {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramChat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct TelegramUser {
    id: i64,
}

#[derive(Debug, Serialize)]
struct SendMessagePayload<'a> {
    chat_id: i64,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct TelegramSendMessageResponse {
    ok: bool,
    #[serde(default)]
    result: Option<TelegramSentMessage>,
}

#[derive(Debug, Deserialize)]
struct TelegramSentMessage {
    message_id: i64,
}

#[derive(Clone)]
pub(crate) struct TelegramChannel {
    config: TelegramBridgeConfig,
    client: Client,
}

impl TelegramChannel {
    pub(crate) fn new(config: TelegramBridgeConfig) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.poll_timeout_seconds + 10))
            .build()
            .map_err(|error| format!("failed to build telegram client: {error}"))?;
        Ok(Self { config, client })
    }

    fn notification_chat_id(&self) -> i64 {
        self.config
            .allowed_chat_id
            .unwrap_or(self.config.allowed_user_id)
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<String, RelayError> {
        let response = self
            .client
            .post(format!("{}/sendMessage", self.config.api_base()))
            .json(&SendMessagePayload { chat_id, text })
            .send()
            .await
            .map_err(|error| RelayError::SendFailed(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::SendFailed(format!("status {status}: {body}")));
        }

        let parsed: TelegramSendMessageResponse = response
            .json()
            .await
            .map_err(|error| RelayError::SendFailed(error.to_string()))?;
        if !parsed.ok {
            return Err(RelayError::SendFailed(
                "telegram rejected the message".to_string(),
            ));
        }
        Ok(parsed
            .result
            .map(|sent| sent.message_id.to_string())
            .unwrap_or_default())
    }
}

impl NotificationChannel for TelegramChannel {
    fn send_notification<'a>(
        &'a self,
        notification: &'a StopNotification,
    ) -> ChannelFuture<'a, Result<SentMessage, RelayError>> {
        Box::pin(async move {
            let text = format_stop_notification(notification);
            let message_id = self
                .send_message(self.notification_chat_id(), &text)
                .await?;
            Ok(SentMessage { message_id })
        })
    }

    fn send_command_confirmation<'a>(
        &'a self,
        channel_id: &'a str,
        confirmation: &'a CommandConfirmation,
    ) -> ChannelFuture<'a, Result<(), RelayError>> {
        Box::pin(async move {
            let chat_id = parse_chat_id(channel_id)?;
            let text = format!(
                "✅ command sent to {} via {}\n{}",
                confirmation.session_label, confirmation.transport, confirmation.command
            );
            self.send_message(chat_id, &text).await?;
            Ok(())
        })
    }

    fn send_error<'a>(
        &'a self,
        channel_id: &'a str,
        message: &'a str,
    ) -> ChannelFuture<'a, Result<(), RelayError>> {
        Box::pin(async move {
            let chat_id = parse_chat_id(channel_id)?;
            self.send_message(chat_id, &format!("❌ {message}")).await?;
            Ok(())
        })
    }
}

fn parse_chat_id(channel_id: &str) -> Result<i64, RelayError> {
    channel_id
        .trim()
        .parse::<i64>()
        .map_err(|_| RelayError::SendFailed(format!("invalid chat id `{channel_id}`")))
}

fn format_stop_notification(notification: &StopNotification) -> String {
    let mut lines = vec![
        format!("🔔 {}", notification.session_label),
        format!("event: {}", notification.event),
    ];
    if let Some(summary) = &notification.summary {
        lines.push(summarize_text(summary, 400));
    }
    lines.push(format!("session: {}", notification.session_id));
    lines.push(String::new());
    lines.push("Reply to this message to send a command.".to_string());
    // The trailing ref line is what reply correlation parses back out.
    lines.push(format!("{REPLY_TOKEN_PREFIX} {}", notification.token));
    lines.join("\n")
}

fn extract_reply_token(text: &str) -> Option<String> {
    text.lines().rev().find_map(|line| {
        line.trim()
            .strip_prefix(REPLY_TOKEN_PREFIX)
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum OperatorCommand {
    Help,
    Sessions,
    Status,
    Send { session_id: String, command: String },
    Text(String),
}

fn parse_operator_text(text: &str) -> OperatorCommand {
    let trimmed = text.trim();
    if trimmed.eq_ignore_ascii_case("/start") || trimmed.eq_ignore_ascii_case("/help") {
        return OperatorCommand::Help;
    }
    if trimmed.eq_ignore_ascii_case("/sessions") {
        return OperatorCommand::Sessions;
    }
    if trimmed.eq_ignore_ascii_case("/status") {
        return OperatorCommand::Status;
    }
    if trimmed == "/send" {
        return OperatorCommand::Send {
            session_id: String::new(),
            command: String::new(),
        };
    }
    if let Some(rest) = trimmed.strip_prefix("/send ") {
        let mut parts = rest.trim().splitn(2, char::is_whitespace);
        let session_id = parts.next().unwrap_or_default().to_string();
        let command = parts.next().unwrap_or_default().trim().to_string();
        return OperatorCommand::Send {
            session_id,
            command,
        };
    }
    OperatorCommand::Text(trimmed.to_string())
}

pub(crate) async fn run(state: Arc<DaemonState>, channel: TelegramChannel) {
    info!(
        user_id = channel.config.allowed_user_id,
        "telegram bridge started"
    );

    let mut offset: Option<i64> = None;

    loop {
        match poll_updates(&channel, offset).await {
            Ok(updates) => {
                for update in updates {
                    offset = Some(update.update_id + 1);
                    handle_update(&state, &channel, update).await;
                }
            }
            Err(error) => {
                warn!(error = %error, "telegram getUpdates failed");
                tokio::time::sleep(Duration::from_secs(POLL_RETRY_DELAY_SECONDS)).await;
            }
        }
    }
}

async fn poll_updates(
    channel: &TelegramChannel,
    offset: Option<i64>,
) -> Result<Vec<TelegramUpdate>, String> {
    let mut payload = json!({
        "timeout": channel.config.poll_timeout_seconds,
        "allowed_updates": ["message"],
    });
    if let Some(offset) = offset {
        payload["offset"] = json!(offset);
    }

    let response = channel
        .client
        .post(format!("{}/getUpdates", channel.config.api_base()))
        .json(&payload)
        .send()
        .await
        .map_err(|error| error.to_string())?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(format!("status {status}: {body}"));
    }

    let parsed: TelegramGetUpdatesResponse =
        response.json().await.map_err(|error| error.to_string())?;
    if !parsed.ok {
        return Err("Telegram API returned ok=false for getUpdates".to_string());
    }

    Ok(parsed.result)
}

async fn handle_update(
    state: &Arc<DaemonState>,
    channel: &TelegramChannel,
    update: TelegramUpdate,
) {
    let Some(message) = update.message else {
        return;
    };
    let Some(from) = message.from else {
        return;
    };
    let chat_id = message.chat.id;

    let allowed = from.id == channel.config.allowed_user_id
        && channel
            .config
            .allowed_chat_id
            .map(|allowed_chat| allowed_chat == chat_id)
            .unwrap_or(true);
    if !allowed {
        warn!(user_id = from.id, chat_id, "rejected message from unauthorized sender");
        if channel.config.allowed_chat_id.is_none() {
            reply(channel, chat_id, "Access denied.").await;
        }
        return;
    }

    let text = message.text.as_deref().unwrap_or("").trim().to_string();
    if text.is_empty() {
        reply(channel, chat_id, "Please send a text command.").await;
        return;
    }

    let reply_token = message
        .reply_to_message
        .as_ref()
        .and_then(|replied| replied.text.as_deref())
        .and_then(extract_reply_token);

    match parse_operator_text(&text) {
        OperatorCommand::Help => reply(channel, chat_id, HELP_TEXT).await,
        OperatorCommand::Sessions => {
            let sessions = state.sessions().await;
            reply(channel, chat_id, &format_session_list(&sessions)).await;
        }
        OperatorCommand::Status => {
            let status = state.status_text().await;
            reply(channel, chat_id, &status).await;
        }
        OperatorCommand::Send {
            session_id,
            command,
        } => {
            if session_id.is_empty() || command.is_empty() {
                reply(channel, chat_id, "Usage: /send <session-id> <command>").await;
                return;
            }
            state
                .relay_command(
                    chat_id.to_string(),
                    CommandTarget::Session(session_id),
                    command,
                )
                .await;
        }
        OperatorCommand::Text(command) => match reply_token {
            Some(token) => {
                state
                    .relay_command(chat_id.to_string(), CommandTarget::Token(token), command)
                    .await;
            }
            None => {
                reply(
                    channel,
                    chat_id,
                    "Reply to a session notification or use /send <session-id> <command>.",
                )
                .await;
            }
        },
    }
}

async fn reply(channel: &TelegramChannel, chat_id: i64, text: &str) {
    if let Err(error) = channel.send_message(chat_id, text).await {
        warn!(error = %error, "failed to send telegram reply");
    }
}

fn format_session_list(sessions: &[Session]) -> String {
    if sessions.is_empty() {
        return "No sessions registered.".to_string();
    }
    let mut lines = vec![format!("Sessions ({}):", sessions.len())];
    for session in sessions {
        let kinds = session
            .transports
            .iter()
            .map(|transport| transport.kind.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!("• {} ({}) [{kinds}]", session.label, session.id));
    }
    lines.join("\n")
}

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use super::RelayError;

pub(crate) type ChannelFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StopNotification {
    pub(crate) session_id: String,
    pub(crate) session_label: String,
    pub(crate) event: String,
    #[serde(default)]
    pub(crate) summary: Option<String>,
    pub(crate) token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CommandConfirmation {
    pub(crate) session_id: String,
    pub(crate) session_label: String,
    pub(crate) transport: String,
    pub(crate) command: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SentMessage {
    pub(crate) message_id: String,
}

pub(crate) trait NotificationChannel: Send + Sync {
    fn send_notification<'a>(
        &'a self,
        notification: &'a StopNotification,
    ) -> ChannelFuture<'a, Result<SentMessage, RelayError>>;

    fn send_command_confirmation<'a>(
        &'a self,
        channel_id: &'a str,
        confirmation: &'a CommandConfirmation,
    ) -> ChannelFuture<'a, Result<(), RelayError>>;

    fn send_error<'a>(
        &'a self,
        channel_id: &'a str,
        message: &'a str,
    ) -> ChannelFuture<'a, Result<(), RelayError>>;
}

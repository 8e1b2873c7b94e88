use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub(crate) mod backend;
pub(crate) mod channel;
pub(crate) mod events;
pub(crate) mod nvim;
pub(crate) mod registry;
pub(crate) mod router;
pub(crate) mod service;
pub(crate) mod tmux;
pub(crate) mod transport;

pub(crate) const DEFAULT_TOKEN_TTL_MS: i64 = 600_000;
pub(crate) const DEFAULT_ACTIVITY_LIMIT: usize = 200;

pub(crate) fn default_json_null() -> Value {
    Value::Null
}

pub(crate) fn now_timestamp_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as i64)
        .unwrap_or(0)
}

pub(crate) fn summarize_text(value: &str, max_chars: usize) -> String {
    let trimmed = value.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let truncated: String = trimmed.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{truncated}...")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TransportDescriptor {
    #[serde(default)]
    pub(crate) kind: String,
    #[serde(default, alias = "pane_id")]
    pub(crate) pane_id: Option<String>,
    #[serde(default, alias = "session_name")]
    pub(crate) session_name: Option<String>,
    #[serde(default, alias = "socket_path")]
    pub(crate) socket_path: Option<String>,
    #[serde(default, alias = "instance_name")]
    pub(crate) instance_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Session {
    #[serde(default)]
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) label: String,
    #[serde(default)]
    pub(crate) transports: Vec<TransportDescriptor>,
    #[serde(default)]
    pub(crate) cwd: Option<String>,
    #[serde(default)]
    pub(crate) agent: Option<String>,
    #[serde(default)]
    pub(crate) registered_at_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CorrelationToken {
    #[serde(default)]
    pub(crate) value: String,
    #[serde(default)]
    pub(crate) session_id: String,
    #[serde(default)]
    pub(crate) event: String,
    #[serde(default)]
    pub(crate) issued_at_ms: i64,
    #[serde(default)]
    pub(crate) expires_at_ms: i64,
    #[serde(default = "default_json_null")]
    pub(crate) context: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RelayActivityEntry {
    #[serde(default)]
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) kind: String,
    #[serde(default)]
    pub(crate) session_id: Option<String>,
    #[serde(default)]
    pub(crate) message: String,
    #[serde(default)]
    pub(crate) needs_input: bool,
    #[serde(default)]
    pub(crate) created_at_ms: i64,
    #[serde(default = "default_json_null")]
    pub(crate) metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RelayState {
    #[serde(default)]
    pub(crate) sessions: BTreeMap<String, Session>,
    #[serde(default)]
    pub(crate) activity: Vec<RelayActivityEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub(crate) enum RelayError {
    #[error("session `{0}` not found")]
    SessionNotFound(String),
    #[error("correlation token is invalid or expired")]
    TokenInvalid,
    #[error("unknown transport kind `{0}`")]
    UnknownTransportKind(String),
    #[error("transport descriptor for `{kind}` is invalid: {reason}")]
    InvalidDescriptor { kind: String, reason: String },
    #[error("session `{0}` has no transports configured")]
    NoTransportAvailable(String),
    #[error("{transport} target `{target}` is unreachable: {reason}")]
    TransportUnreachable {
        transport: String,
        target: String,
        reason: String,
    },
    #[error("{transport} injection timed out after {timeout_ms}ms")]
    TransportTimeout { transport: String, timeout_ms: u64 },
    #[error("{transport} injection failed: {reason}")]
    TransportFailed { transport: String, reason: String },
    #[error("notification channel send failed: {0}")]
    SendFailed(String),
}

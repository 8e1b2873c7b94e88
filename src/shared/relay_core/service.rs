use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::warn;

use super::registry::SessionRegistry;
use super::transport::{TRANSPORT_KIND_NVIM, TRANSPORT_KIND_TMUX};
use super::{RelayActivityEntry, RelayState, Session};

pub(crate) const RELAY_FEED_DEFAULT_LIMIT: usize = 100;
pub(crate) const RELAY_FEED_MAX_LIMIT: usize = 1_000;
pub(crate) const RELAY_STATE_FILE_NAME: &str = "relay_state.json";

pub(crate) async fn relay_sessions_core(registry: &Arc<Mutex<SessionRegistry>>) -> Vec<Session> {
    registry.lock().await.sessions()
}

pub(crate) async fn relay_snapshot_core(registry: &Arc<Mutex<SessionRegistry>>) -> RelayState {
    registry.lock().await.snapshot()
}

pub(crate) async fn relay_upsert_session_core(
    registry: &Arc<Mutex<SessionRegistry>>,
    session: Session,
    now_ms: i64,
) -> Result<Session, String> {
    let mut registry = registry.lock().await;
    let session = registry.upsert_session(session, now_ms)?;
    for descriptor in &session.transports {
        let kind = descriptor.kind.trim();
        if kind != TRANSPORT_KIND_TMUX && kind != TRANSPORT_KIND_NVIM {
            // Accepted anyway; injection will report it as a per-transport failure.
            warn!(session_id = %session.id, kind, "registered transport with unknown kind");
        }
    }
    registry.record_activity(RelayActivityEntry {
        id: format!("session_registered:{}:{now_ms}", session.id),
        kind: "session_registered".to_string(),
        session_id: Some(session.id.clone()),
        message: format!(
            "session `{}` registered with {} transport(s)",
            session.label,
            session.transports.len()
        ),
        needs_input: false,
        created_at_ms: now_ms,
        metadata: json!({ "agent": session.agent }),
    });
    Ok(session)
}

pub(crate) async fn relay_remove_session_core(
    registry: &Arc<Mutex<SessionRegistry>>,
    session_id: &str,
    now_ms: i64,
) -> Result<bool, String> {
    let session_id = session_id.trim();
    if session_id.is_empty() {
        return Err("session id is required".to_string());
    }
    let mut registry = registry.lock().await;
    let removed = registry.remove_session(session_id);
    if removed {
        registry.record_activity(RelayActivityEntry {
            id: format!("session_removed:{session_id}:{now_ms}"),
            kind: "session_removed".to_string(),
            session_id: Some(session_id.to_string()),
            message: format!("session `{session_id}` removed"),
            needs_input: false,
            created_at_ms: now_ms,
            metadata: json!(null),
        });
    }
    Ok(removed)
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RelayFeedPage {
    #[serde(default)]
    pub(crate) items: Vec<RelayActivityEntry>,
    #[serde(default)]
    pub(crate) total: usize,
}

pub(crate) async fn relay_feed_core(
    registry: &Arc<Mutex<SessionRegistry>>,
    limit: Option<usize>,
    needs_input_only: bool,
) -> RelayFeedPage {
    let limit = limit.unwrap_or(RELAY_FEED_DEFAULT_LIMIT).min(RELAY_FEED_MAX_LIMIT);
    let registry = registry.lock().await;
    let filtered: Vec<&RelayActivityEntry> = registry
        .activity()
        .iter()
        .filter(|entry| !needs_input_only || entry.needs_input)
        .collect();
    let total = filtered.len();
    let items = filtered.into_iter().take(limit).cloned().collect();
    RelayFeedPage { items, total }
}

pub(crate) fn relay_state_path(data_dir: &Path) -> PathBuf {
    data_dir.join(RELAY_STATE_FILE_NAME)
}

pub(crate) fn read_relay_state(path: &Path) -> Result<RelayState, String> {
    if !path.exists() {
        return Ok(RelayState::default());
    }
    let raw = std::fs::read_to_string(path)
        .map_err(|error| format!("failed to read {}: {error}", path.display()))?;
    serde_json::from_str(&raw)
        .map_err(|error| format!("failed to parse {}: {error}", path.display()))
}

pub(crate) fn write_relay_state(path: &Path, state: &RelayState) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|error| format!("failed to create {}: {error}", parent.display()))?;
    }
    let raw = serde_json::to_string_pretty(state)
        .map_err(|error| format!("failed to encode relay state: {error}"))?;
    std::fs::write(path, raw)
        .map_err(|error| format!("failed to write {}: {error}", path.display()))
}

pub(crate) async fn persist_relay_snapshot(registry: &Arc<Mutex<SessionRegistry>>, path: &Path) {
    let snapshot = relay_snapshot_core(registry).await;
    if let Err(error) = write_relay_state(path, &snapshot) {
        warn!(error = %error, "failed to persist relay state");
    }
}

use super::*;
use crate::shared::relay_core::Session;

pub(super) async fn try_handle(
    state: &DaemonState,
    method: &str,
    params: &Value,
) -> Option<Result<Value, String>> {
    match method {
        "relay_sessions" => Some(state.relay_sessions().await),
        "relay_snapshot" => Some(state.relay_snapshot().await),
        "relay_upsert_session" => {
            let payload = params
                .get("session")
                .cloned()
                .unwrap_or_else(|| params.clone());
            let session: Session = match serde_json::from_value(payload) {
                Ok(session) => session,
                Err(error) => return Some(Err(format!("invalid session payload: {error}"))),
            };
            Some(state.upsert_session(session).await)
        }
        "relay_remove_session" => {
            let session_id = match parse_string(params, "sessionId") {
                Ok(value) => value,
                Err(error) => return Some(Err(error)),
            };
            Some(state.remove_session(session_id).await)
        }
        "relay_stop_event" => Some(state.handle_stop_event(params).await),
        "relay_feed" => {
            let limit = parse_optional_usize(params, "limit");
            let needs_input_only = parse_optional_bool(params, "needsInputOnly").unwrap_or(false);
            Some(state.relay_feed(limit, needs_input_only).await)
        }
        _ => None,
    }
}

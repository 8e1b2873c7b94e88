use serde_json::Value;

use super::default_json_null;

pub(crate) const DEFAULT_STOP_EVENT: &str = "stop";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StopEvent {
    pub(crate) session_id: String,
    pub(crate) event: String,
    pub(crate) summary: Option<String>,
    pub(crate) label: Option<String>,
    pub(crate) needs_input: bool,
    pub(crate) context: Value,
}

pub(crate) fn normalize_stop_event(payload: &Value) -> Result<StopEvent, String> {
    let object = payload
        .as_object()
        .ok_or_else(|| "stop event payload must be an object".to_string())?;
    let session_id = extract_field(object, &["sessionId", "session_id"])
        .ok_or_else(|| "sessionId is required".to_string())?;
    let event = extract_field(
        object,
        &["event", "eventName", "event_name", "hookEvent", "hook_event"],
    )
    .unwrap_or_else(|| DEFAULT_STOP_EVENT.to_string());
    let summary = extract_field(
        object,
        &["summary", "preview", "lastMessage", "last_message"],
    );
    let label = extract_field(object, &["label", "sessionLabel", "session_label"]);
    let needs_input = extract_bool(object, &["needsInput", "needs_input"]).unwrap_or(true);
    let context = object
        .get("context")
        .cloned()
        .unwrap_or_else(default_json_null);
    Ok(StopEvent {
        session_id,
        event,
        summary,
        label,
        needs_input,
        context,
    })
}

fn extract_field(object: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(value) = object.get(*key).and_then(Value::as_str) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

fn extract_bool(object: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<bool> {
    for key in keys {
        if let Some(value) = object.get(*key).and_then(Value::as_bool) {
            return Some(value);
        }
    }
    None
}

mod relay;

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use super::DaemonState;

pub(crate) async fn run(state: Arc<DaemonState>, bind_address: String) -> Result<(), String> {
    let listener = TcpListener::bind(&bind_address)
        .await
        .map_err(|error| format!("failed to bind rpc listener on {bind_address}: {error}"))?;
    info!(address = %bind_address, "rpc listener started");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(error) => {
                warn!(error = %error, "rpc accept failed");
                continue;
            }
        };
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(error) = serve_connection(state, stream).await {
                warn!(peer = %peer, error = %error, "rpc connection closed with error");
            }
        });
    }
}

async fn serve_connection(
    state: Arc<DaemonState>,
    stream: tokio::net::TcpStream,
) -> Result<(), String> {
    let websocket = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|error| error.to_string())?;
    let (mut sink, mut messages) = websocket.split();

    while let Some(message) = messages.next().await {
        let message = message.map_err(|error| error.to_string())?;
        match message {
            Message::Text(raw) => {
                let reply = handle_request(&state, &raw).await;
                sink.send(Message::Text(reply.to_string()))
                    .await
                    .map_err(|error| error.to_string())?;
            }
            Message::Ping(payload) => {
                sink.send(Message::Pong(payload))
                    .await
                    .map_err(|error| error.to_string())?;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    Ok(())
}

async fn handle_request(state: &DaemonState, raw: &str) -> Value {
    let request: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(error) => {
            return json!({
                "id": Value::Null,
                "error": format!("invalid request: {error}"),
            })
        }
    };
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let method = request
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let params = request.get("params").cloned().unwrap_or(Value::Null);

    let outcome = match relay::try_handle(state, &method, &params).await {
        Some(outcome) => outcome,
        None => Err(format!("unknown method `{method}`")),
    };
    match outcome {
        Ok(result) => json!({ "id": id, "result": result }),
        Err(error) => json!({ "id": id, "error": error }),
    }
}

fn parse_string(params: &Value, key: &str) -> Result<String, String> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| format!("`{key}` is required"))
}

fn parse_optional_usize(params: &Value, key: &str) -> Option<usize> {
    params
        .get(key)
        .and_then(Value::as_u64)
        .map(|value| value as usize)
}

fn parse_optional_bool(params: &Value, key: &str) -> Option<bool> {
    params.get(key).and_then(Value::as_bool)
}

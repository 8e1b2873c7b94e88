use std::io;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, instrument};

use super::transport::{
    first_stderr_line, Transport, TransportFuture, TransportTuning, TRANSPORT_KIND_NVIM,
};
use super::{RelayError, TransportDescriptor};

#[derive(Debug, Clone)]
pub(crate) struct NvimTransport {
    socket_path: String,
    instance_name: Option<String>,
    timeout_ms: u64,
}

impl NvimTransport {
    pub(crate) fn from_descriptor(
        descriptor: &TransportDescriptor,
        tuning: &TransportTuning,
    ) -> Result<Self, RelayError> {
        let Some(socket_path) = descriptor
            .socket_path
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
        else {
            return Err(RelayError::InvalidDescriptor {
                kind: TRANSPORT_KIND_NVIM.to_string(),
                reason: "socketPath is required".to_string(),
            });
        };
        Ok(Self {
            socket_path: socket_path.to_string(),
            instance_name: descriptor
                .instance_name
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string),
            timeout_ms: tuning.inject_timeout_ms,
        })
    }

    #[instrument(skip(self, command_text), fields(transport = TRANSPORT_KIND_NVIM, socket = %self.socket_path))]
    async fn inject_inner(&self, command_text: &str) -> Result<(), RelayError> {
        // Probe before sending anything so a dead instance is a clean no-op.
        if tokio::fs::metadata(&self.socket_path).await.is_err() {
            return Err(RelayError::TransportUnreachable {
                transport: TRANSPORT_KIND_NVIM.to_string(),
                target: self.socket_path.clone(),
                reason: "socket path does not exist".to_string(),
            });
        }
        let output = Command::new("nvim")
            .args(remote_send_args(&self.socket_path, command_text))
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|error| match error.kind() {
                io::ErrorKind::NotFound => RelayError::TransportUnreachable {
                    transport: TRANSPORT_KIND_NVIM.to_string(),
                    target: self.socket_path.clone(),
                    reason: "nvim executable not found".to_string(),
                },
                _ => RelayError::TransportFailed {
                    transport: TRANSPORT_KIND_NVIM.to_string(),
                    reason: error.to_string(),
                },
            })?;
        if !output.status.success() {
            return Err(RelayError::TransportFailed {
                transport: TRANSPORT_KIND_NVIM.to_string(),
                reason: first_stderr_line(&output.stderr, "nvim --remote-send failed"),
            });
        }
        debug!(
            instance = self.instance_name.as_deref().unwrap_or("-"),
            "command injected via nvim"
        );
        Ok(())
    }
}

impl Transport for NvimTransport {
    fn kind(&self) -> &'static str {
        TRANSPORT_KIND_NVIM
    }

    fn target(&self) -> String {
        self.socket_path.clone()
    }

    fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    fn inject<'a>(&'a self, command_text: &'a str) -> TransportFuture<'a, Result<(), RelayError>> {
        Box::pin(self.inject_inner(command_text))
    }
}

fn escape_keys(text: &str) -> String {
    text.replace('<', "<lt>")
}

fn remote_send_args(socket_path: &str, text: &str) -> Vec<String> {
    vec![
        "--server".to_string(),
        socket_path.to_string(),
        "--remote-send".to_string(),
        format!("{}<CR>", escape_keys(text)),
    ]
}

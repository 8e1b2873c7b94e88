use std::io;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, instrument};

use super::transport::{
    first_stderr_line, Transport, TransportFuture, TransportTuning, TRANSPORT_KIND_TMUX,
};
use super::{RelayError, TransportDescriptor};

#[derive(Debug, Clone)]
pub(crate) struct TmuxTransport {
    target: String,
    timeout_ms: u64,
    key_delay_ms: u64,
}

impl TmuxTransport {
    pub(crate) fn from_descriptor(
        descriptor: &TransportDescriptor,
        tuning: &TransportTuning,
    ) -> Result<Self, RelayError> {
        let pane = descriptor
            .pane_id
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty());
        let session = descriptor
            .session_name
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty());
        let Some(target) = pane.or(session) else {
            return Err(RelayError::InvalidDescriptor {
                kind: TRANSPORT_KIND_TMUX.to_string(),
                reason: "paneId or sessionName is required".to_string(),
            });
        };
        Ok(Self {
            target: target.to_string(),
            timeout_ms: tuning.inject_timeout_ms,
            key_delay_ms: tuning.key_delay_ms,
        })
    }

    async fn run_tmux(&self, args: &[String]) -> Result<std::process::Output, RelayError> {
        Command::new("tmux")
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|error| match error.kind() {
                io::ErrorKind::NotFound => RelayError::TransportUnreachable {
                    transport: TRANSPORT_KIND_TMUX.to_string(),
                    target: self.target.clone(),
                    reason: "tmux executable not found".to_string(),
                },
                _ => RelayError::TransportFailed {
                    transport: TRANSPORT_KIND_TMUX.to_string(),
                    reason: error.to_string(),
                },
            })
    }

    #[instrument(skip(self, command_text), fields(transport = TRANSPORT_KIND_TMUX, target = %self.target))]
    async fn inject_inner(&self, command_text: &str) -> Result<(), RelayError> {
        let probe = self.run_tmux(&probe_args(&self.target)).await?;
        if !probe.status.success() {
            return Err(RelayError::TransportUnreachable {
                transport: TRANSPORT_KIND_TMUX.to_string(),
                target: self.target.clone(),
                reason: first_stderr_line(&probe.stderr, "target pane not found"),
            });
        }
        // Keystroke sub-steps are deliberately spaced out: terminal UIs debounce
        // rapid input and can drop keys sent back to back.
        let steps = [
            clear_line_args(&self.target),
            send_text_args(&self.target, command_text),
            send_enter_args(&self.target),
        ];
        for (index, args) in steps.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(Duration::from_millis(self.key_delay_ms)).await;
            }
            let output = self.run_tmux(args).await?;
            if !output.status.success() {
                return Err(RelayError::TransportFailed {
                    transport: TRANSPORT_KIND_TMUX.to_string(),
                    reason: first_stderr_line(&output.stderr, "tmux send-keys failed"),
                });
            }
        }
        debug!("command injected via tmux");
        Ok(())
    }
}

impl Transport for TmuxTransport {
    fn kind(&self) -> &'static str {
        TRANSPORT_KIND_TMUX
    }

    fn target(&self) -> String {
        self.target.clone()
    }

    fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    fn inject<'a>(&'a self, command_text: &'a str) -> TransportFuture<'a, Result<(), RelayError>> {
        Box::pin(self.inject_inner(command_text))
    }
}

fn probe_args(target: &str) -> Vec<String> {
    vec![
        "display-message".to_string(),
        "-p".to_string(),
        "-t".to_string(),
        target.to_string(),
        "#{pane_id}".to_string(),
    ]
}

fn clear_line_args(target: &str) -> Vec<String> {
    vec![
        "send-keys".to_string(),
        "-t".to_string(),
        target.to_string(),
        "C-u".to_string(),
    ]
}

fn send_text_args(target: &str, text: &str) -> Vec<String> {
    vec![
        "send-keys".to_string(),
        "-t".to_string(),
        target.to_string(),
        "-l".to_string(),
        text.to_string(),
    ]
}

fn send_enter_args(target: &str) -> Vec<String> {
    vec![
        "send-keys".to_string(),
        "-t".to_string(),
        target.to_string(),
        "C-m".to_string(),
    ]
}

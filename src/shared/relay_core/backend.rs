use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::transport::TransportFactory;
use super::{RelayError, Session, TransportDescriptor};

pub(crate) type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub(crate) trait InjectionBackend: Send + Sync {
    fn inject_command<'a>(
        &'a self,
        session: &'a Session,
        command_text: &'a str,
    ) -> BackendFuture<'a, InjectionResult>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InjectionAttempt {
    #[serde(default)]
    pub(crate) transport: String,
    #[serde(default)]
    pub(crate) error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InjectionResult {
    #[serde(default)]
    pub(crate) ok: bool,
    #[serde(default)]
    pub(crate) transport: Option<String>,
    #[serde(default)]
    pub(crate) error: Option<String>,
    #[serde(default)]
    pub(crate) attempts: Vec<InjectionAttempt>,
}

impl InjectionResult {
    pub(crate) fn success(transport: &str, attempts: Vec<InjectionAttempt>) -> Self {
        Self {
            ok: true,
            transport: Some(transport.to_string()),
            error: None,
            attempts,
        }
    }

    pub(crate) fn failure(error: String, attempts: Vec<InjectionAttempt>) -> Self {
        Self {
            ok: false,
            transport: None,
            error: Some(error),
            attempts,
        }
    }
}

pub(crate) fn aggregate_error(attempts: &[InjectionAttempt]) -> String {
    attempts
        .iter()
        .map(|attempt| attempt.error.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

pub(crate) struct TransportInjectionBackend<F: TransportFactory> {
    factory: F,
}

impl<F: TransportFactory> TransportInjectionBackend<F> {
    pub(crate) fn new(factory: F) -> Self {
        Self { factory }
    }

    async fn inject_with_fallback(&self, session: &Session, command_text: &str) -> InjectionResult {
        if session.transports.is_empty() {
            return InjectionResult::failure(
                RelayError::NoTransportAvailable(session.id.clone()).to_string(),
                Vec::new(),
            );
        }
        let mut attempts: Vec<InjectionAttempt> = Vec::new();
        for descriptor in &session.transports {
            let transport = match self.factory.transport_for(descriptor) {
                Ok(transport) => transport,
                Err(error) => {
                    attempts.push(InjectionAttempt {
                        transport: attempt_label(descriptor),
                        error: error.to_string(),
                    });
                    continue;
                }
            };
            let kind = transport.kind();
            let timeout_ms = transport.timeout_ms();
            let outcome = match tokio::time::timeout(
                Duration::from_millis(timeout_ms),
                transport.inject(command_text),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(RelayError::TransportTimeout {
                    transport: kind.to_string(),
                    timeout_ms,
                }),
            };
            match outcome {
                Ok(()) => {
                    debug!(session_id = %session.id, transport = kind, "command injected");
                    return InjectionResult::success(kind, attempts);
                }
                Err(error) => {
                    attempts.push(InjectionAttempt {
                        transport: kind.to_string(),
                        error: error.to_string(),
                    });
                }
            }
        }
        let error = aggregate_error(&attempts);
        warn!(session_id = %session.id, error = %error, "all transports failed");
        InjectionResult::failure(error, attempts)
    }
}

fn attempt_label(descriptor: &TransportDescriptor) -> String {
    let kind = descriptor.kind.trim();
    if kind.is_empty() {
        "unknown".to_string()
    } else {
        kind.to_string()
    }
}

impl<F: TransportFactory> InjectionBackend for TransportInjectionBackend<F> {
    fn inject_command<'a>(
        &'a self,
        session: &'a Session,
        command_text: &'a str,
    ) -> BackendFuture<'a, InjectionResult> {
        Box::pin(self.inject_with_fallback(session, command_text))
    }
}

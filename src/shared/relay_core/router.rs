use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::Mutex;
use tracing::warn;

use super::backend::InjectionBackend;
use super::channel::{CommandConfirmation, NotificationChannel, StopNotification};
use super::events::StopEvent;
use super::registry::SessionRegistry;
use super::{default_json_null, summarize_text, CorrelationToken, RelayActivityEntry, RelayError};

pub(crate) const DEFAULT_COMMAND_PREVIEW_CHARS: usize = 120;

#[derive(Debug, Clone)]
pub(crate) struct RouterConfig {
    pub(crate) serialize_per_session: bool,
    pub(crate) command_preview_chars: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            serialize_per_session: false,
            command_preview_chars: DEFAULT_COMMAND_PREVIEW_CHARS,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct StopEventAck {
    pub(crate) token: CorrelationToken,
    pub(crate) message_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CommandTarget {
    Session(String),
    Token(String),
}

#[derive(Debug, Clone)]
pub(crate) struct InboundCommand {
    pub(crate) channel_id: String,
    pub(crate) target: CommandTarget,
    pub(crate) command: String,
}

pub(crate) struct CommandRouter<B: InjectionBackend, C: NotificationChannel> {
    registry: Arc<Mutex<SessionRegistry>>,
    backend: B,
    channel: C,
    config: RouterConfig,
    session_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<B: InjectionBackend, C: NotificationChannel> CommandRouter<B, C> {
    pub(crate) fn new(
        registry: Arc<Mutex<SessionRegistry>>,
        backend: B,
        channel: C,
        config: RouterConfig,
    ) -> Self {
        Self {
            registry,
            backend,
            channel,
            config,
            session_locks: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) async fn handle_stop_event(
        &self,
        stop_event: &StopEvent,
        now_ms: i64,
    ) -> Result<StopEventAck, RelayError> {
        let (session, token) = {
            let mut registry = self.registry.lock().await;
            let session = registry.get_session(&stop_event.session_id)?;
            let token = registry.mint_token(
                &stop_event.session_id,
                &stop_event.event,
                stop_event.context.clone(),
                now_ms,
            )?;
            (session, token)
        };
        let notification = StopNotification {
            session_id: session.id.clone(),
            session_label: stop_event
                .label
                .clone()
                .unwrap_or_else(|| session.label.clone()),
            event: stop_event.event.clone(),
            summary: stop_event.summary.clone(),
            token: token.value.clone(),
        };
        // Token stays minted even when the send fails so a later retry by the
        // caller reuses the same correlation window.
        let sent = self.channel.send_notification(&notification).await?;
        let message = match &stop_event.summary {
            Some(summary) => summarize_text(summary, 200),
            None => format!("agent stopped ({})", stop_event.event),
        };
        {
            let mut registry = self.registry.lock().await;
            registry.record_activity(RelayActivityEntry {
                id: format!("stop_event:{}:{}", session.id, token.issued_at_ms),
                kind: "stop_event".to_string(),
                session_id: Some(session.id.clone()),
                message,
                needs_input: stop_event.needs_input,
                created_at_ms: now_ms,
                metadata: json!({
                    "event": stop_event.event,
                    "messageId": sent.message_id,
                }),
            });
        }
        Ok(StopEventAck {
            token,
            message_id: sent.message_id,
        })
    }

    pub(crate) async fn handle_command(&self, command: &InboundCommand, now_ms: i64) {
        let session = {
            let mut registry = self.registry.lock().await;
            let resolved = match &command.target {
                CommandTarget::Session(session_id) => registry.get_session(session_id),
                CommandTarget::Token(value) => registry.resolve_token(value, now_ms),
            };
            match resolved {
                Ok(session) => session,
                Err(error) => {
                    drop(registry);
                    self.report_error(&command.channel_id, &error.to_string(), None, now_ms)
                        .await;
                    return;
                }
            }
        };
        let command_text = command.command.trim();
        if command_text.is_empty() {
            self.report_error(
                &command.channel_id,
                "command text is required",
                Some(&session.id),
                now_ms,
            )
            .await;
            return;
        }
        let result = if self.config.serialize_per_session {
            let session_lock = self.session_lock(&session.id).await;
            let _guard = session_lock.lock().await;
            self.backend.inject_command(&session, command_text).await
        } else {
            self.backend.inject_command(&session, command_text).await
        };
        if result.ok {
            let transport = result.transport.clone().unwrap_or_default();
            let confirmation = CommandConfirmation {
                session_id: session.id.clone(),
                session_label: session.label.clone(),
                transport: transport.clone(),
                command: summarize_text(command_text, self.config.command_preview_chars),
            };
            if let Err(error) = self
                .channel
                .send_command_confirmation(&command.channel_id, &confirmation)
                .await
            {
                warn!(session_id = %session.id, error = %error, "failed to send command confirmation");
            }
            let mut registry = self.registry.lock().await;
            registry.record_activity(RelayActivityEntry {
                id: format!("command_confirmed:{}:{now_ms}", session.id),
                kind: "command_confirmed".to_string(),
                session_id: Some(session.id.clone()),
                message: format!("command sent via {transport}"),
                needs_input: false,
                created_at_ms: now_ms,
                metadata: json!({
                    "transport": transport,
                    "command": confirmation.command,
                }),
            });
        } else {
            let message = result
                .error
                .clone()
                .unwrap_or_else(|| "command injection failed".to_string());
            self.report_error(&command.channel_id, &message, Some(&session.id), now_ms)
                .await;
        }
    }

    async fn report_error(
        &self,
        channel_id: &str,
        message: &str,
        session_id: Option<&str>,
        now_ms: i64,
    ) {
        if let Err(error) = self.channel.send_error(channel_id, message).await {
            warn!(error = %error, "failed to send error notification");
        }
        let scope = session_id.unwrap_or("-");
        let mut registry = self.registry.lock().await;
        registry.record_activity(RelayActivityEntry {
            id: format!("command_failed:{scope}:{now_ms}"),
            kind: "command_failed".to_string(),
            session_id: session_id.map(str::to_string),
            message: summarize_text(message, 200),
            needs_input: false,
            created_at_ms: now_ms,
            metadata: default_json_null(),
        });
    }

    async fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.session_locks.lock().await;
        locks.entry(session_id.to_string()).or_default().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::relay_core::backend::{
        BackendFuture, InjectionResult, TransportInjectionBackend,
    };
    use crate::shared::relay_core::channel::{ChannelFuture, SentMessage};
    use crate::shared::relay_core::registry::RegistryConfig;
    use crate::shared::relay_core::transport::{Transport, TransportFactory, TransportFuture};
    use crate::shared::relay_core::{Session, TransportDescriptor, DEFAULT_TOKEN_TTL_MS};
    use std::sync::Mutex as StdMutex;

    fn run_async<F: std::future::Future<Output = ()>>(future: F) {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("test runtime")
            .block_on(future);
    }

    #[derive(Default)]
    struct MockChannel {
        calls: Arc<StdMutex<Vec<String>>>,
        fail_notification: bool,
        fail_confirmation: bool,
    }

    impl NotificationChannel for MockChannel {
        fn send_notification<'a>(
            &'a self,
            notification: &'a StopNotification,
        ) -> ChannelFuture<'a, Result<SentMessage, RelayError>> {
            Box::pin(async move {
                self.calls.lock().expect("calls lock").push(format!(
                    "notification:{}:{}:{}",
                    notification.session_id, notification.event, notification.token
                ));
                if self.fail_notification {
                    Err(RelayError::SendFailed("telegram is down".to_string()))
                } else {
                    Ok(SentMessage {
                        message_id: "msg-1".to_string(),
                    })
                }
            })
        }

        fn send_command_confirmation<'a>(
            &'a self,
            _channel_id: &'a str,
            confirmation: &'a CommandConfirmation,
        ) -> ChannelFuture<'a, Result<(), RelayError>> {
            Box::pin(async move {
                self.calls.lock().expect("calls lock").push(format!(
                    "confirmation:{}:{}",
                    confirmation.session_id, confirmation.transport
                ));
                if self.fail_confirmation {
                    Err(RelayError::SendFailed("telegram is down".to_string()))
                } else {
                    Ok(())
                }
            })
        }

        fn send_error<'a>(
            &'a self,
            channel_id: &'a str,
            message: &'a str,
        ) -> ChannelFuture<'a, Result<(), RelayError>> {
            Box::pin(async move {
                self.calls
                    .lock()
                    .expect("calls lock")
                    .push(format!("error:{channel_id}:{message}"));
                Ok(())
            })
        }
    }

    #[derive(Default)]
    struct MockBackend {
        calls: Arc<StdMutex<Vec<String>>>,
        fail_with: Option<String>,
        yield_steps: usize,
    }

    impl InjectionBackend for MockBackend {
        fn inject_command<'a>(
            &'a self,
            session: &'a Session,
            command_text: &'a str,
        ) -> BackendFuture<'a, InjectionResult> {
            Box::pin(async move {
                self.calls
                    .lock()
                    .expect("calls lock")
                    .push(format!("inject_start:{}:{command_text}", session.id));
                for _ in 0..self.yield_steps {
                    tokio::task::yield_now().await;
                }
                self.calls
                    .lock()
                    .expect("calls lock")
                    .push(format!("inject_end:{}:{command_text}", session.id));
                match &self.fail_with {
                    Some(error) => InjectionResult::failure(error.clone(), Vec::new()),
                    None => InjectionResult::success("tmux", Vec::new()),
                }
            })
        }
    }

    fn registry_with_sessions(session_ids: &[&str]) -> Arc<Mutex<SessionRegistry>> {
        let mut registry = SessionRegistry::new(RegistryConfig::default());
        for session_id in session_ids {
            registry
                .upsert_session(
                    Session {
                        id: session_id.to_string(),
                        transports: vec![TransportDescriptor {
                            kind: "tmux".to_string(),
                            pane_id: Some("%1".to_string()),
                            ..TransportDescriptor::default()
                        }],
                        ..Session::default()
                    },
                    1_000,
                )
                .expect("session upserted");
        }
        Arc::new(Mutex::new(registry))
    }

    fn stop_event_for(session_id: &str) -> StopEvent {
        StopEvent {
            session_id: session_id.to_string(),
            event: "stop".to_string(),
            summary: Some("agent finished".to_string()),
            label: None,
            needs_input: true,
            context: serde_json::Value::Null,
        }
    }

    fn command_for(target: CommandTarget, text: &str) -> InboundCommand {
        InboundCommand {
            channel_id: "chat-9".to_string(),
            target,
            command: text.to_string(),
        }
    }

    fn count_with_prefix(calls: &[String], prefix: &str) -> usize {
        calls.iter().filter(|call| call.starts_with(prefix)).count()
    }

    #[test]
    fn stop_event_mints_token_and_notifies_channel() {
        run_async(async {
            let registry = registry_with_sessions(&["sess-1"]);
            let channel = MockChannel::default();
            let channel_calls = channel.calls.clone();
            let router = CommandRouter::new(
                registry.clone(),
                MockBackend::default(),
                channel,
                RouterConfig::default(),
            );

            let ack = router
                .handle_stop_event(&stop_event_for("sess-1"), 2_000)
                .await
                .expect("stop event handled");
            assert_eq!(ack.token.session_id, "sess-1");
            assert_eq!(ack.message_id, "msg-1");
            assert_eq!(
                channel_calls.lock().expect("calls lock").clone(),
                vec![format!("notification:sess-1:stop:{}", ack.token.value)]
            );

            let registry = registry.lock().await;
            assert_eq!(registry.token_count(), 1);
            assert_eq!(registry.activity()[0].kind, "stop_event");
            assert_eq!(registry.activity()[0].message, "agent finished");
        });
    }

    #[test]
    fn stop_event_for_unknown_session_is_an_error() {
        run_async(async {
            let registry = registry_with_sessions(&["sess-1"]);
            let channel = MockChannel::default();
            let channel_calls = channel.calls.clone();
            let router = CommandRouter::new(
                registry,
                MockBackend::default(),
                channel,
                RouterConfig::default(),
            );

            let error = router
                .handle_stop_event(&stop_event_for("ghost"), 2_000)
                .await
                .expect_err("unknown session");
            assert_eq!(error, RelayError::SessionNotFound("ghost".to_string()));
            assert!(channel_calls.lock().expect("calls lock").is_empty());
        });
    }

    #[test]
    fn notification_send_failure_propagates_but_keeps_token() {
        run_async(async {
            let registry = registry_with_sessions(&["sess-1"]);
            let channel = MockChannel {
                fail_notification: true,
                ..MockChannel::default()
            };
            let router = CommandRouter::new(
                registry.clone(),
                MockBackend::default(),
                channel,
                RouterConfig::default(),
            );

            let error = router
                .handle_stop_event(&stop_event_for("sess-1"), 2_000)
                .await
                .expect_err("send failed");
            assert_eq!(error, RelayError::SendFailed("telegram is down".to_string()));
            assert_eq!(registry.lock().await.token_count(), 1);
        });
    }

    #[test]
    fn reply_token_round_trip_injects_and_confirms() {
        run_async(async {
            let registry = registry_with_sessions(&["sess-1"]);
            let backend = MockBackend::default();
            let backend_calls = backend.calls.clone();
            let channel = MockChannel::default();
            let channel_calls = channel.calls.clone();
            let router =
                CommandRouter::new(registry.clone(), backend, channel, RouterConfig::default());

            let ack = router
                .handle_stop_event(&stop_event_for("sess-1"), 2_000)
                .await
                .expect("stop event handled");
            router
                .handle_command(
                    &command_for(CommandTarget::Token(ack.token.value.clone()), "git status"),
                    3_000,
                )
                .await;

            assert_eq!(
                backend_calls.lock().expect("calls lock").clone(),
                vec!["inject_start:sess-1:git status", "inject_end:sess-1:git status"]
            );
            let calls = channel_calls.lock().expect("calls lock").clone();
            assert_eq!(count_with_prefix(&calls, "confirmation:"), 1);
            assert_eq!(count_with_prefix(&calls, "error:"), 0);
            assert_eq!(calls[1], "confirmation:sess-1:tmux");
            assert_eq!(registry.lock().await.activity()[0].kind, "command_confirmed");
        });
    }

    #[test]
    fn token_remains_valid_for_multiple_commands() {
        run_async(async {
            let registry = registry_with_sessions(&["sess-1"]);
            let channel = MockChannel::default();
            let channel_calls = channel.calls.clone();
            let router = CommandRouter::new(
                registry,
                MockBackend::default(),
                channel,
                RouterConfig::default(),
            );

            let ack = router
                .handle_stop_event(&stop_event_for("sess-1"), 2_000)
                .await
                .expect("stop event handled");
            for step in 0..2 {
                router
                    .handle_command(
                        &command_for(CommandTarget::Token(ack.token.value.clone()), "ls"),
                        3_000 + step,
                    )
                    .await;
            }

            let calls = channel_calls.lock().expect("calls lock").clone();
            assert_eq!(count_with_prefix(&calls, "confirmation:"), 2);
            assert_eq!(count_with_prefix(&calls, "error:"), 0);
        });
    }

    #[test]
    fn expired_token_reports_error_without_injection() {
        run_async(async {
            let registry = registry_with_sessions(&["sess-1"]);
            let backend = MockBackend::default();
            let backend_calls = backend.calls.clone();
            let channel = MockChannel::default();
            let channel_calls = channel.calls.clone();
            let router = CommandRouter::new(registry, backend, channel, RouterConfig::default());

            let ack = router
                .handle_stop_event(&stop_event_for("sess-1"), 1_000)
                .await
                .expect("stop event handled");
            router
                .handle_command(
                    &command_for(CommandTarget::Token(ack.token.value.clone()), "ls"),
                    1_000 + DEFAULT_TOKEN_TTL_MS,
                )
                .await;

            assert!(backend_calls.lock().expect("calls lock").is_empty());
            let calls = channel_calls.lock().expect("calls lock").clone();
            assert_eq!(
                calls[1],
                "error:chat-9:correlation token is invalid or expired"
            );
        });
    }

    #[test]
    fn blank_command_reports_error_without_injection() {
        run_async(async {
            let registry = registry_with_sessions(&["sess-1"]);
            let backend = MockBackend::default();
            let backend_calls = backend.calls.clone();
            let channel = MockChannel::default();
            let channel_calls = channel.calls.clone();
            let router =
                CommandRouter::new(registry.clone(), backend, channel, RouterConfig::default());

            router
                .handle_command(
                    &command_for(CommandTarget::Session("sess-1".to_string()), "   "),
                    3_000,
                )
                .await;

            assert!(backend_calls.lock().expect("calls lock").is_empty());
            assert_eq!(
                channel_calls.lock().expect("calls lock").clone(),
                vec!["error:chat-9:command text is required"]
            );
            assert_eq!(registry.lock().await.activity()[0].kind, "command_failed");
        });
    }

    #[test]
    fn unknown_session_target_reports_error() {
        run_async(async {
            let registry = registry_with_sessions(&["sess-1"]);
            let channel = MockChannel::default();
            let channel_calls = channel.calls.clone();
            let router = CommandRouter::new(
                registry,
                MockBackend::default(),
                channel,
                RouterConfig::default(),
            );

            router
                .handle_command(
                    &command_for(CommandTarget::Session("ghost".to_string()), "ls"),
                    3_000,
                )
                .await;

            assert_eq!(
                channel_calls.lock().expect("calls lock").clone(),
                vec!["error:chat-9:session `ghost` not found"]
            );
        });
    }

    #[test]
    fn injection_failure_sends_error_exactly_once() {
        run_async(async {
            let registry = registry_with_sessions(&["sess-1"]);
            let backend = MockBackend {
                fail_with: Some("tmux injection failed: pane gone".to_string()),
                ..MockBackend::default()
            };
            let channel = MockChannel::default();
            let channel_calls = channel.calls.clone();
            let router =
                CommandRouter::new(registry.clone(), backend, channel, RouterConfig::default());

            router
                .handle_command(
                    &command_for(CommandTarget::Session("sess-1".to_string()), "ls"),
                    3_000,
                )
                .await;

            let calls = channel_calls.lock().expect("calls lock").clone();
            assert_eq!(count_with_prefix(&calls, "error:"), 1);
            assert_eq!(count_with_prefix(&calls, "confirmation:"), 0);
            assert_eq!(calls[0], "error:chat-9:tmux injection failed: pane gone");
            assert_eq!(registry.lock().await.activity()[0].kind, "command_failed");
        });
    }

    #[test]
    fn failed_command_is_not_retried_automatically() {
        run_async(async {
            let registry = registry_with_sessions(&["sess-1"]);
            let backend = MockBackend {
                fail_with: Some("pane gone".to_string()),
                ..MockBackend::default()
            };
            let backend_calls = backend.calls.clone();
            let channel = MockChannel::default();
            let channel_calls = channel.calls.clone();
            let router = CommandRouter::new(registry, backend, channel, RouterConfig::default());

            router
                .handle_command(
                    &command_for(CommandTarget::Session("sess-1".to_string()), "ls"),
                    3_000,
                )
                .await;
            assert_eq!(backend_calls.lock().expect("calls lock").len(), 2);

            router
                .handle_command(
                    &command_for(CommandTarget::Session("sess-1".to_string()), "ls"),
                    4_000,
                )
                .await;
            assert_eq!(backend_calls.lock().expect("calls lock").len(), 4);
            assert_eq!(
                count_with_prefix(&channel_calls.lock().expect("calls lock"), "error:"),
                2
            );
        });
    }

    #[test]
    fn confirmation_send_failure_does_not_lose_the_activity_record() {
        run_async(async {
            let registry = registry_with_sessions(&["sess-1"]);
            let channel = MockChannel {
                fail_confirmation: true,
                ..MockChannel::default()
            };
            let channel_calls = channel.calls.clone();
            let router = CommandRouter::new(
                registry.clone(),
                MockBackend::default(),
                channel,
                RouterConfig::default(),
            );

            router
                .handle_command(
                    &command_for(CommandTarget::Session("sess-1".to_string()), "ls"),
                    3_000,
                )
                .await;

            let calls = channel_calls.lock().expect("calls lock").clone();
            assert_eq!(count_with_prefix(&calls, "confirmation:"), 1);
            assert_eq!(count_with_prefix(&calls, "error:"), 0);
            assert_eq!(registry.lock().await.activity()[0].kind, "command_confirmed");
        });
    }

    #[test]
    fn concurrent_commands_for_same_session_interleave_by_default() {
        run_async(async {
            let registry = registry_with_sessions(&["sess-1"]);
            let backend = MockBackend {
                yield_steps: 1,
                ..MockBackend::default()
            };
            let backend_calls = backend.calls.clone();
            let router = Arc::new(CommandRouter::new(
                registry,
                backend,
                MockChannel::default(),
                RouterConfig::default(),
            ));

            let first = {
                let router = router.clone();
                tokio::spawn(async move {
                    router
                        .handle_command(
                            &command_for(CommandTarget::Session("sess-1".to_string()), "one"),
                            3_000,
                        )
                        .await;
                })
            };
            let second = {
                let router = router.clone();
                tokio::spawn(async move {
                    router
                        .handle_command(
                            &command_for(CommandTarget::Session("sess-1".to_string()), "two"),
                            3_001,
                        )
                        .await;
                })
            };
            first.await.expect("first command");
            second.await.expect("second command");

            assert_eq!(
                backend_calls.lock().expect("calls lock").clone(),
                vec![
                    "inject_start:sess-1:one",
                    "inject_start:sess-1:two",
                    "inject_end:sess-1:one",
                    "inject_end:sess-1:two",
                ]
            );
        });
    }

    #[test]
    fn serialize_per_session_option_orders_same_session_commands() {
        run_async(async {
            let registry = registry_with_sessions(&["sess-1"]);
            let backend = MockBackend {
                yield_steps: 1,
                ..MockBackend::default()
            };
            let backend_calls = backend.calls.clone();
            let router = Arc::new(CommandRouter::new(
                registry,
                backend,
                MockChannel::default(),
                RouterConfig {
                    serialize_per_session: true,
                    ..RouterConfig::default()
                },
            ));

            let first = {
                let router = router.clone();
                tokio::spawn(async move {
                    router
                        .handle_command(
                            &command_for(CommandTarget::Session("sess-1".to_string()), "one"),
                            3_000,
                        )
                        .await;
                })
            };
            let second = {
                let router = router.clone();
                tokio::spawn(async move {
                    router
                        .handle_command(
                            &command_for(CommandTarget::Session("sess-1".to_string()), "two"),
                            3_001,
                        )
                        .await;
                })
            };
            first.await.expect("first command");
            second.await.expect("second command");

            assert_eq!(
                backend_calls.lock().expect("calls lock").clone(),
                vec![
                    "inject_start:sess-1:one",
                    "inject_end:sess-1:one",
                    "inject_start:sess-1:two",
                    "inject_end:sess-1:two",
                ]
            );
        });
    }

    struct DownTransport {
        kind: &'static str,
    }

    impl Transport for DownTransport {
        fn kind(&self) -> &'static str {
            self.kind
        }

        fn target(&self) -> String {
            format!("{}-target", self.kind)
        }

        fn inject<'a>(
            &'a self,
            _command_text: &'a str,
        ) -> TransportFuture<'a, Result<(), RelayError>> {
            Box::pin(async move {
                Err(RelayError::TransportUnreachable {
                    transport: self.kind.to_string(),
                    target: self.target(),
                    reason: "connection refused".to_string(),
                })
            })
        }
    }

    struct DownFactory;

    impl TransportFactory for DownFactory {
        fn transport_for(
            &self,
            descriptor: &TransportDescriptor,
        ) -> Result<Box<dyn Transport>, RelayError> {
            let kind = match descriptor.kind.as_str() {
                "tmux" => "tmux",
                "nvim" => "nvim",
                other => return Err(RelayError::UnknownTransportKind(other.to_string())),
            };
            Ok(Box::new(DownTransport { kind }))
        }
    }

    #[test]
    fn transport_errors_surface_through_backend_into_error_reply() {
        run_async(async {
            let registry = registry_with_sessions(&[]);
            registry
                .lock()
                .await
                .upsert_session(
                    Session {
                        id: "sess-1".to_string(),
                        transports: vec![
                            TransportDescriptor {
                                kind: "nvim".to_string(),
                                socket_path: Some("/tmp/nvim.sock".to_string()),
                                ..TransportDescriptor::default()
                            },
                            TransportDescriptor {
                                kind: "tmux".to_string(),
                                pane_id: Some("%1".to_string()),
                                ..TransportDescriptor::default()
                            },
                        ],
                        ..Session::default()
                    },
                    1_000,
                )
                .expect("session upserted");
            let channel = MockChannel::default();
            let channel_calls = channel.calls.clone();
            let router = CommandRouter::new(
                registry,
                TransportInjectionBackend::new(DownFactory),
                channel,
                RouterConfig::default(),
            );

            router
                .handle_command(
                    &command_for(CommandTarget::Session("sess-1".to_string()), "ls"),
                    3_000,
                )
                .await;

            assert_eq!(
                channel_calls.lock().expect("calls lock").clone(),
                vec![
                    "error:chat-9:nvim target `nvim-target` is unreachable: connection refused; \
                     tmux target `tmux-target` is unreachable: connection refused"
                ]
            );
        });
    }
}

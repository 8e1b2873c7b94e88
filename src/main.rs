mod rpc;
mod shared;
mod telegram;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use shared::relay_core::backend::TransportInjectionBackend;
use shared::relay_core::events::normalize_stop_event;
use shared::relay_core::now_timestamp_ms;
use shared::relay_core::registry::{RegistryConfig, SessionRegistry};
use shared::relay_core::router::{CommandRouter, CommandTarget, InboundCommand, RouterConfig};
use shared::relay_core::service;
use shared::relay_core::transport::{ProcessTransportFactory, TransportTuning};
use shared::relay_core::Session;
use telegram::{TelegramBridgeConfig, TelegramChannel};

const DEFAULT_RPC_BIND: &str = "127.0.0.1:7887";
const DEFAULT_DATA_DIR_NAME: &str = ".session-relay";

type RelayRouter =
    CommandRouter<TransportInjectionBackend<ProcessTransportFactory>, TelegramChannel>;

pub(crate) struct DaemonState {
    registry: Arc<Mutex<SessionRegistry>>,
    router: RelayRouter,
    state_path: PathBuf,
    started_at_ms: i64,
}

impl DaemonState {
    pub(crate) async fn relay_sessions(&self) -> Result<Value, String> {
        let sessions = service::relay_sessions_core(&self.registry).await;
        serde_json::to_value(sessions).map_err(|error| error.to_string())
    }

    pub(crate) async fn relay_snapshot(&self) -> Result<Value, String> {
        let snapshot = service::relay_snapshot_core(&self.registry).await;
        serde_json::to_value(snapshot).map_err(|error| error.to_string())
    }

    pub(crate) async fn upsert_session(&self, session: Session) -> Result<Value, String> {
        let stored =
            service::relay_upsert_session_core(&self.registry, session, now_timestamp_ms()).await?;
        self.persist().await;
        serde_json::to_value(stored).map_err(|error| error.to_string())
    }

    pub(crate) async fn remove_session(&self, session_id: String) -> Result<Value, String> {
        let removed =
            service::relay_remove_session_core(&self.registry, &session_id, now_timestamp_ms())
                .await?;
        self.persist().await;
        Ok(json!({ "removed": removed }))
    }

    pub(crate) async fn handle_stop_event(&self, payload: &Value) -> Result<Value, String> {
        let stop_event = normalize_stop_event(payload)?;
        let ack = self
            .router
            .handle_stop_event(&stop_event, now_timestamp_ms())
            .await
            .map_err(|error| error.to_string())?;
        self.persist().await;
        Ok(json!({
            "token": ack.token.value,
            "expiresAtMs": ack.token.expires_at_ms,
            "messageId": ack.message_id,
        }))
    }

    pub(crate) async fn relay_feed(
        &self,
        limit: Option<usize>,
        needs_input_only: bool,
    ) -> Result<Value, String> {
        let page = service::relay_feed_core(&self.registry, limit, needs_input_only).await;
        serde_json::to_value(page).map_err(|error| error.to_string())
    }

    pub(crate) async fn sessions(&self) -> Vec<Session> {
        service::relay_sessions_core(&self.registry).await
    }

    pub(crate) async fn relay_command(
        &self,
        channel_id: String,
        target: CommandTarget,
        command: String,
    ) {
        let inbound = InboundCommand {
            channel_id,
            target,
            command,
        };
        self.router.handle_command(&inbound, now_timestamp_ms()).await;
        self.persist().await;
    }

    pub(crate) async fn status_text(&self) -> String {
        let registry = self.registry.lock().await;
        let started = DateTime::<Utc>::from_timestamp_millis(self.started_at_ms)
            .map(|value| value.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "-".to_string());
        let uptime_minutes = now_timestamp_ms().saturating_sub(self.started_at_ms) / 60_000;
        format!(
            "Relay up since {started} ({uptime_minutes} min)\nsessions: {}\nactive tokens: {}",
            registry.session_count(),
            registry.token_count()
        )
    }

    async fn persist(&self) {
        service::persist_relay_snapshot(&self.registry, &self.state_path).await;
    }
}

struct DaemonConfig {
    data_dir: PathBuf,
    rpc_bind: String,
    registry: RegistryConfig,
    router: RouterConfig,
    tuning: TransportTuning,
}

impl DaemonConfig {
    fn from_env() -> Self {
        let data_dir = std::env::var("RELAY_DATA_DIR")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|home| PathBuf::from(home).join(DEFAULT_DATA_DIR_NAME))
            })
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR_NAME));
        let rpc_bind =
            std::env::var("RELAY_RPC_BIND").unwrap_or_else(|_| DEFAULT_RPC_BIND.to_string());

        let mut registry = RegistryConfig::default();
        if let Some(ttl_seconds) = env_u64("RELAY_TOKEN_TTL_SECONDS").filter(|value| *value > 0) {
            registry.token_ttl_ms = ttl_seconds as i64 * 1_000;
        }
        registry.single_use_tokens = env_flag("RELAY_SINGLE_USE_TOKENS");

        let router = RouterConfig {
            serialize_per_session: env_flag("RELAY_SERIALIZE_PER_SESSION"),
            ..RouterConfig::default()
        };

        let mut tuning = TransportTuning::default();
        if let Some(timeout_ms) = env_u64("RELAY_INJECT_TIMEOUT_MS").filter(|value| *value > 0) {
            tuning.inject_timeout_ms = timeout_ms;
        }
        if let Some(delay_ms) = env_u64("RELAY_KEY_DELAY_MS") {
            tuning.key_delay_ms = delay_ms;
        }

        Self {
            data_dir,
            rpc_bind,
            registry,
            router,
            tuning,
        }
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|value| {
            let value = value.trim().to_ascii_lowercase();
            value == "1" || value == "true" || value == "yes"
        })
        .unwrap_or(false)
}

fn main() {
    let filter = EnvFilter::try_from_env("RELAY_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("failed to start async runtime: {error}");
            std::process::exit(1);
        }
    };
    runtime.block_on(async_main());
}

async fn async_main() {
    let config = DaemonConfig::from_env();

    let Some(telegram_config) = TelegramBridgeConfig::from_env() else {
        error!(
            "RELAY_TELEGRAM_BOT_TOKEN and RELAY_TELEGRAM_ALLOWED_USER_ID must be set; \
             the relay cannot notify an operator without them"
        );
        std::process::exit(1);
    };
    let channel = match TelegramChannel::new(telegram_config) {
        Ok(channel) => channel,
        Err(error) => {
            error!(error = %error, "failed to start telegram channel");
            std::process::exit(1);
        }
    };

    let state_path = service::relay_state_path(&config.data_dir);
    let stored = match service::read_relay_state(&state_path) {
        Ok(state) => state,
        Err(error) => {
            error!(error = %error, "failed to load relay state");
            std::process::exit(1);
        }
    };
    let session_count = stored.sessions.len();
    let registry = Arc::new(Mutex::new(SessionRegistry::from_state(
        config.registry.clone(),
        stored,
    )));

    let backend =
        TransportInjectionBackend::new(ProcessTransportFactory::new(config.tuning.clone()));
    let router = CommandRouter::new(
        registry.clone(),
        backend,
        channel.clone(),
        config.router.clone(),
    );
    let state = Arc::new(DaemonState {
        registry,
        router,
        state_path,
        started_at_ms: now_timestamp_ms(),
    });

    info!(
        sessions = session_count,
        bind = %config.rpc_bind,
        "session relay daemon started"
    );

    {
        let state = state.clone();
        let bind = config.rpc_bind.clone();
        tokio::spawn(async move {
            if let Err(error) = rpc::run(state, bind).await {
                error!(error = %error, "rpc listener failed");
                std::process::exit(1);
            }
        });
    }

    telegram::run(state, channel).await;
}

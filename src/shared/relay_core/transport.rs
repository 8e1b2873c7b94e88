use std::future::Future;
use std::pin::Pin;

use super::nvim::NvimTransport;
use super::tmux::TmuxTransport;
use super::{RelayError, TransportDescriptor};

pub(crate) const TRANSPORT_KIND_TMUX: &str = "tmux";
pub(crate) const TRANSPORT_KIND_NVIM: &str = "nvim";

pub(crate) const DEFAULT_INJECT_TIMEOUT_MS: u64 = 10_000;
pub(crate) const DEFAULT_KEY_DELAY_MS: u64 = 150;

pub(crate) type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub(crate) trait Transport: Send + Sync {
    fn kind(&self) -> &'static str;

    fn target(&self) -> String;

    fn timeout_ms(&self) -> u64 {
        DEFAULT_INJECT_TIMEOUT_MS
    }

    fn inject<'a>(&'a self, command_text: &'a str) -> TransportFuture<'a, Result<(), RelayError>>;
}

#[derive(Debug, Clone)]
pub(crate) struct TransportTuning {
    pub(crate) inject_timeout_ms: u64,
    pub(crate) key_delay_ms: u64,
}

impl Default for TransportTuning {
    fn default() -> Self {
        Self {
            inject_timeout_ms: DEFAULT_INJECT_TIMEOUT_MS,
            key_delay_ms: DEFAULT_KEY_DELAY_MS,
        }
    }
}

pub(crate) trait TransportFactory: Send + Sync {
    fn transport_for(
        &self,
        descriptor: &TransportDescriptor,
    ) -> Result<Box<dyn Transport>, RelayError>;
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ProcessTransportFactory {
    tuning: TransportTuning,
}

impl ProcessTransportFactory {
    pub(crate) fn new(tuning: TransportTuning) -> Self {
        Self { tuning }
    }
}

impl TransportFactory for ProcessTransportFactory {
    fn transport_for(
        &self,
        descriptor: &TransportDescriptor,
    ) -> Result<Box<dyn Transport>, RelayError> {
        match descriptor.kind.trim() {
            TRANSPORT_KIND_TMUX => Ok(Box::new(TmuxTransport::from_descriptor(
                descriptor,
                &self.tuning,
            )?)),
            TRANSPORT_KIND_NVIM => Ok(Box::new(NvimTransport::from_descriptor(
                descriptor,
                &self.tuning,
            )?)),
            other => Err(RelayError::UnknownTransportKind(other.to_string())),
        }
    }
}

pub(crate) fn first_stderr_line(stderr: &[u8], fallback: &str) -> String {
    let text = String::from_utf8_lossy(stderr);
    let line = text
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("");
    if line.is_empty() {
        fallback.to_string()
    } else {
        line.to_string()
    }
}

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use uuid::Uuid;

use super::{
    CorrelationToken, RelayActivityEntry, RelayError, RelayState, Session, DEFAULT_ACTIVITY_LIMIT,
    DEFAULT_TOKEN_TTL_MS,
};

#[derive(Debug, Clone)]
pub(crate) struct RegistryConfig {
    pub(crate) token_ttl_ms: i64,
    pub(crate) single_use_tokens: bool,
    pub(crate) activity_limit: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            token_ttl_ms: DEFAULT_TOKEN_TTL_MS,
            single_use_tokens: false,
            activity_limit: DEFAULT_ACTIVITY_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct SessionRegistry {
    sessions: BTreeMap<String, Session>,
    tokens: HashMap<String, CorrelationToken>,
    activity: Vec<RelayActivityEntry>,
    config: RegistryConfig,
}

impl SessionRegistry {
    pub(crate) fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub(crate) fn from_state(config: RegistryConfig, state: RelayState) -> Self {
        Self {
            sessions: state.sessions,
            tokens: HashMap::new(),
            activity: state.activity,
            config,
        }
    }

    pub(crate) fn snapshot(&self) -> RelayState {
        RelayState {
            sessions: self.sessions.clone(),
            activity: self.activity.clone(),
        }
    }

    pub(crate) fn upsert_session(
        &mut self,
        session: Session,
        now_ms: i64,
    ) -> Result<Session, String> {
        let mut normalized = normalize_session(session, now_ms)?;
        if let Some(existing) = self.sessions.get(&normalized.id) {
            normalized.registered_at_ms = existing.registered_at_ms;
        }
        self.sessions
            .insert(normalized.id.clone(), normalized.clone());
        Ok(normalized)
    }

    pub(crate) fn remove_session(&mut self, session_id: &str) -> bool {
        let removed = self.sessions.remove(session_id).is_some();
        if removed {
            self.tokens.retain(|_, token| token.session_id != session_id);
        }
        removed
    }

    pub(crate) fn get_session(&self, session_id: &str) -> Result<Session, RelayError> {
        self.sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| RelayError::SessionNotFound(session_id.to_string()))
    }

    pub(crate) fn sessions(&self) -> Vec<Session> {
        self.sessions.values().cloned().collect()
    }

    pub(crate) fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub(crate) fn token_count(&self) -> usize {
        self.tokens.len()
    }

    pub(crate) fn mint_token(
        &mut self,
        session_id: &str,
        event: &str,
        context: Value,
        now_ms: i64,
    ) -> Result<CorrelationToken, RelayError> {
        if !self.sessions.contains_key(session_id) {
            return Err(RelayError::SessionNotFound(session_id.to_string()));
        }
        self.tokens.retain(|_, token| now_ms < token.expires_at_ms);
        let token = CorrelationToken {
            value: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            event: event.to_string(),
            issued_at_ms: now_ms,
            expires_at_ms: now_ms.saturating_add(self.config.token_ttl_ms),
            context,
        };
        self.tokens.insert(token.value.clone(), token.clone());
        Ok(token)
    }

    pub(crate) fn resolve_token(
        &mut self,
        value: &str,
        now_ms: i64,
    ) -> Result<Session, RelayError> {
        let Some(token) = self.tokens.get(value) else {
            return Err(RelayError::TokenInvalid);
        };
        if now_ms >= token.expires_at_ms {
            self.tokens.remove(value);
            return Err(RelayError::TokenInvalid);
        }
        let session_id = token.session_id.clone();
        let Some(session) = self.sessions.get(&session_id).cloned() else {
            self.tokens.remove(value);
            return Err(RelayError::TokenInvalid);
        };
        if self.config.single_use_tokens {
            self.tokens.remove(value);
        }
        Ok(session)
    }

    pub(crate) fn record_activity(&mut self, entry: RelayActivityEntry) {
        let limit = if self.config.activity_limit == 0 {
            DEFAULT_ACTIVITY_LIMIT
        } else {
            self.config.activity_limit
        };
        self.activity.retain(|existing| existing.id != entry.id);
        self.activity.insert(0, entry);
        self.activity.truncate(limit);
    }

    pub(crate) fn activity(&self) -> &[RelayActivityEntry] {
        &self.activity
    }
}

fn normalize_session(session: Session, now_ms: i64) -> Result<Session, String> {
    let id = session.id.trim().to_string();
    if id.is_empty() {
        return Err("session id is required".to_string());
    }
    let label = {
        let trimmed = session.label.trim();
        if trimmed.is_empty() {
            id.clone()
        } else {
            trimmed.to_string()
        }
    };
    Ok(Session {
        id,
        label,
        transports: session.transports,
        cwd: normalize_optional(session.cwd),
        agent: normalize_optional(session.agent),
        registered_at_ms: if session.registered_at_ms > 0 {
            session.registered_at_ms
        } else {
            now_ms
        },
    })
}

fn normalize_optional(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

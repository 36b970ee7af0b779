use std::collections::HashMap;
use std::sync::Arc;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;
use crate::errors::WardenError;

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub token: String,
    pub principal: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Authenticated sessions with a create / resolve / expire lifecycle.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, principal: &str) -> Result<Session, WardenError>;

    /// Live session for `token`; expired sessions resolve to `None`.
    async fn resolve(&self, token: &str) -> Result<Option<Session>, WardenError>;

    async fn expire(&self, token: &str) -> Result<bool, WardenError>;

    /// Remove every expired session, returning how many were dropped.
    async fn purge_expired(&self) -> Result<usize, WardenError>;
}

pub struct InMemorySessionStore {
    ttl: Duration,
    sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl InMemorySessionStore {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            ttl: Duration::try_seconds(i64::try_from(ttl_secs).unwrap_or(i64::MAX)).unwrap_or(Duration::MAX),
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, principal: &str) -> Result<Session, WardenError> {
        let now = Utc::now();
        let session = Session {
            token: uuid::Uuid::new_v4().to_string(),
            principal: principal.to_string(),
            created_at: now,
            expires_at: now.checked_add_signed(self.ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        };
        self.sessions.write().await.insert(session.token.clone(), session.clone());
        debug!(principal, "Session created");
        Ok(session)
    }

    async fn resolve(&self, token: &str) -> Result<Option<Session>, WardenError> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(token)
            .filter(|s| !s.is_expired(Utc::now()))
            .cloned())
    }

    async fn expire(&self, token: &str) -> Result<bool, WardenError> {
        Ok(self.sessions.write().await.remove(token).is_some())
    }

    async fn purge_expired(&self) -> Result<usize, WardenError> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(now));
        Ok(before - sessions.len())
    }
}

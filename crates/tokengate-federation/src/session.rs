//! Pending login sessions, keyed by OAuth `state` and consumed exactly once.

use crate::errors::SessionError;
use crate::hash_for_log;
use crate::provider::ProviderKind;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokengate_tokens::current_timestamp;
use tokio::task::JoinHandle;

pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(600);

/// Everything the callback needs to finish a login started by `/login`.
#[derive(Clone, PartialEq, Eq)]
pub struct PendingAuthSession {
    pub state: String,
    pub nonce: String,
    pub provider: ProviderKind,
    pub audience: String,
    pub pkce_verifier: String,
    pub created_at: u64,
    pub expires_at: u64,
}

impl PendingAuthSession {
    pub fn new(
        state: String,
        nonce: String,
        provider: ProviderKind,
        audience: String,
        pkce_verifier: String,
        ttl: Duration,
    ) -> Self {
        let created_at = current_timestamp();
        Self {
            state,
            nonce,
            provider,
            audience,
            pkce_verifier,
            created_at,
            expires_at: created_at.saturating_add(ttl.as_secs()),
        }
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }
}

impl fmt::Debug for PendingAuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingAuthSession")
            .field("state_hash", &hash_for_log(&self.state))
            .field("provider", &self.provider)
            .field("audience", &self.audience)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Storage for pending sessions.
///
/// `take` must remove and return the entry atomically so that two callbacks
/// racing on one state cannot both succeed.
#[async_trait]
pub trait PendingSessionStore: Send + Sync {
    async fn put(&self, session: PendingAuthSession) -> Result<(), SessionError>;

    /// Remove and return the session for `state`. Expired entries are removed
    /// and reported as [`SessionError::Expired`].
    async fn take(&self, state: &str) -> Result<PendingAuthSession, SessionError>;

    /// Drop expired sessions, returning how many were removed.
    async fn purge_expired(&self) -> usize;

    async fn len(&self) -> usize;
}

#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, PendingAuthSession>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PendingSessionStore for InMemorySessionStore {
    async fn put(&self, session: PendingAuthSession) -> Result<(), SessionError> {
        let mut sessions = self.sessions.lock();
        if sessions.contains_key(&session.state) {
            return Err(SessionError::DuplicateState);
        }
        sessions.insert(session.state.clone(), session);
        Ok(())
    }

    async fn take(&self, state: &str) -> Result<PendingAuthSession, SessionError> {
        let session = self
            .sessions
            .lock()
            .remove(state)
            .ok_or(SessionError::UnknownState)?;

        if session.is_expired(current_timestamp()) {
            return Err(SessionError::Expired);
        }
        Ok(session)
    }

    async fn purge_expired(&self) -> usize {
        let now = current_timestamp();
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, session| !session.is_expired(now));
        before - sessions.len()
    }

    async fn len(&self) -> usize {
        self.sessions.lock().len()
    }
}

/// Periodically purge expired sessions until the task is aborted.
pub fn spawn_session_sweeper(
    store: Arc<dyn PendingSessionStore>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let purged = store.purge_expired().await;
            if purged > 0 {
                tracing::debug!(purged, "Purged expired login sessions");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(state: &str, ttl: Duration) -> PendingAuthSession {
        PendingAuthSession::new(
            state.to_string(),
            "nonce".to_string(),
            ProviderKind::Google,
            "api.example.com".to_string(),
            "verifier".to_string(),
            ttl,
        )
    }

    fn expired(state: &str) -> PendingAuthSession {
        let mut session = session(state, Duration::from_secs(60));
        session.expires_at = session.created_at - 1;
        session
    }

    #[tokio::test]
    async fn test_take_consumes_exactly_once() {
        let store = InMemorySessionStore::new();
        store.put(session("s1", DEFAULT_SESSION_TTL)).await.unwrap();

        let taken = store.take("s1").await.unwrap();
        assert_eq!(taken.nonce, "nonce");
        assert_eq!(store.take("s1").await, Err(SessionError::UnknownState));
        assert_eq!(store.len().await, 0);
    }

    #[test]
    fn test_huge_ttl_saturates() {
        let session = session("s1", Duration::MAX);
        assert_eq!(session.expires_at, u64::MAX);
        assert!(!session.is_expired(session.created_at));
    }

    #[tokio::test]
    async fn test_duplicate_state_rejected() {
        let store = InMemorySessionStore::new();
        store.put(session("s1", DEFAULT_SESSION_TTL)).await.unwrap();
        assert_eq!(
            store.put(session("s1", DEFAULT_SESSION_TTL)).await,
            Err(SessionError::DuplicateState)
        );
    }

    #[tokio::test]
    async fn test_expired_session_is_removed_on_take() {
        let store = InMemorySessionStore::new();
        store.put(expired("old")).await.unwrap();
        assert_eq!(store.take("old").await, Err(SessionError::Expired));
        assert_eq!(store.take("old").await, Err(SessionError::UnknownState));
    }

    #[tokio::test]
    async fn test_concurrent_takes_have_one_winner() {
        let store = Arc::new(InMemorySessionStore::new());
        store.put(session("race", DEFAULT_SESSION_TTL)).await.unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.take("race").await.is_ok() })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_purge_and_sweeper() {
        let store = Arc::new(InMemorySessionStore::new());
        store.put(expired("a")).await.unwrap();
        store.put(expired("b")).await.unwrap();
        store.put(session("live", DEFAULT_SESSION_TTL)).await.unwrap();
        assert_eq!(store.purge_expired().await, 2);

        store.put(expired("c")).await.unwrap();
        let sweeper = spawn_session_sweeper(store.clone(), Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(30)).await;
        sweeper.abort();
        assert_eq!(store.len().await, 1);
    }

    #[test]
    fn test_debug_hides_secrets() {
        let debug = format!("{:?}", session("secret-state", DEFAULT_SESSION_TTL));
        assert!(!debug.contains("secret-state"));
        assert!(!debug.contains("verifier"));
        assert!(!debug.contains("\"nonce\""));
    }
}

// libs/call-session-cell/src/services/store.rs
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::models::{CallSession, CallState, CallSessionError, SessionId};

/// In-memory session records keyed by session id.
/// Only the owning session worker mutates a record once it is inserted.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, CallSession>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, session: CallSession) {
        let session_id = session.session_id;
        self.sessions.write().await.insert(session_id, session);
        debug!(%session_id, "Stored call session");
    }

    /// Snapshot of a session
    pub async fn get(&self, session_id: SessionId) -> Option<CallSession> {
        self.sessions.read().await.get(&session_id).cloned()
    }

    /// Apply `f` under the write lock and return its result
    pub async fn update<F, R>(&self, session_id: SessionId, f: F) -> Result<R, CallSessionError>
    where
        F: FnOnce(&mut CallSession) -> R,
    {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&session_id)
            .ok_or(CallSessionError::SessionNotFound)?;
        Ok(f(session))
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn count_active(&self) -> usize {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| !s.state.is_terminal())
            .count()
    }

    /// Drop ENDED sessions whose `ended_at` is older than `max_age`.
    /// Returns the ids removed.
    pub async fn purge_ended(&self, max_age: std::time::Duration) -> Vec<SessionId> {
        let max_age = ChronoDuration::from_std(max_age).unwrap_or_else(|_| ChronoDuration::zero());
        let cutoff = Utc::now() - max_age;

        let mut sessions = self.sessions.write().await;
        let expired: Vec<SessionId> = sessions
            .values()
            .filter(|s| s.state == CallState::Ended)
            .filter(|s| s.ended_at.map(|t| t <= cutoff).unwrap_or(true))
            .map(|s| s.session_id)
            .collect();

        for session_id in &expired {
            sessions.remove(session_id);
        }

        if !expired.is_empty() {
            info!("Purged {} ended call sessions", expired.len());
        }
        expired
    }
}

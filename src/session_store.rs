use crate::data::{ConnectionId, SessionId, SessionState};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// In-memory `sessionId -> SessionState` map with a stale-session reaper,
/// modeled on the connection table's own timeout sweep.
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, SessionState>>,
    stale_threshold: Duration,
}

impl SessionStore {
    pub fn new(stale_threshold: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            stale_threshold,
        }
    }

    pub async fn upsert_from_metadata(
        &self,
        session_id: SessionId,
        track_name: String,
        session_type: String,
    ) -> SessionState {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.entry(session_id.clone()).or_insert_with(|| {
            info!(session_id = %session_id, "session created from metadata");
            SessionState::new(session_id.clone(), track_name.clone(), session_type.clone())
        });
        entry.track_name = track_name;
        entry.session_type = session_type;
        entry.touch();
        entry.clone()
    }

    /// Telemetry arriving for a session nobody announced creates a
    /// placeholder record so the stream still fans out.
    pub async fn upsert_implicit(&self, session_id: &SessionId) {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.entry(session_id.clone()).or_insert_with(|| {
            warn!(session_id = %session_id, "telemetry for unknown session, creating placeholder");
            SessionState::new(session_id.clone(), "Unknown".to_string(), "race".to_string())
        });
        entry.touch();
    }

    pub async fn with_session_mut<F, R>(&self, session_id: &SessionId, f: F) -> Option<R>
    where
        F: FnOnce(&mut SessionState) -> R,
    {
        let mut sessions = self.sessions.write().await;
        sessions.get_mut(session_id).map(|s| {
            s.touch();
            f(s)
        })
    }

    pub async fn get(&self, session_id: &SessionId) -> Option<SessionState> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn list(&self) -> Vec<SessionState> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn set_delay(&self, session_id: &SessionId, delay_ms: u32) -> bool {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(session_id) {
            session.broadcast_delay_ms = delay_ms;
            true
        } else {
            false
        }
    }

    pub async fn set_producer(&self, session_id: &SessionId, connection_id: ConnectionId) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(session_id) {
            session.producer = Some(connection_id);
        }
    }

    pub async fn touch(&self, session_id: &SessionId) {
        if let Some(session) = self.sessions.write().await.get_mut(session_id) {
            session.touch();
        }
    }

    /// Removes every session whose `lastUpdateAt` is older than the stale
    /// threshold. Returns the removed session ids so callers can cancel any
    /// pending delayed deliveries and drop producer registrations.
    pub async fn reap(&self) -> Vec<SessionId> {
        let now = Instant::now();
        let threshold = self.stale_threshold;
        let mut sessions = self.sessions.write().await;

        let stale: Vec<SessionId> = sessions
            .iter()
            .filter(|(_, s)| now.duration_since(s.last_update_at) > threshold)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &stale {
            sessions.remove(id);
            warn!(session_id = %id, "session reaped due to inactivity");
        }
        stale
    }
}

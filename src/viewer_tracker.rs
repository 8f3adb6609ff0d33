use crate::data::{SessionId, Surface, ViewerCounts};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::info;

/// A 0→≥1 or ≥1→0 transition for a session's viewer count, used to tell the
/// producer whether it should raise or lower its capture rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerTransition {
    BecameWatched,
    BecameUnwatched,
}

/// Per-session, per-surface viewer counts. Does not own subscriber identity
/// (the room registry does); this tracks counts only, and surfaces the
/// 0↔1 transitions the director layer needs to notify producers.
pub struct ViewerTracker {
    counts: RwLock<HashMap<SessionId, ViewerCounts>>,
    /// Which sessions a given connection has registered a view against, so
    /// disconnect cleanup doesn't need the surface remembered elsewhere.
    by_connection: RwLock<HashMap<crate::data::ConnectionId, Vec<(SessionId, Surface)>>>,
}

impl ViewerTracker {
    pub fn new() -> Self {
        Self {
            counts: RwLock::new(HashMap::new()),
            by_connection: RwLock::new(HashMap::new()),
        }
    }

    pub async fn joined(
        &self,
        connection_id: crate::data::ConnectionId,
        session_id: &SessionId,
        surface: Surface,
    ) -> Option<ViewerTransition> {
        let transition = {
            let mut counts = self.counts.write().await;
            let entry = counts.entry(session_id.clone()).or_default();
            let was_zero = entry.total() == 0;
            entry.increment(surface);
            if was_zero {
                Some(ViewerTransition::BecameWatched)
            } else {
                None
            }
        };
        self.by_connection
            .write()
            .await
            .entry(connection_id)
            .or_default()
            .push((session_id.clone(), surface));
        if transition.is_some() {
            info!(session_id = %session_id, "session became watched");
        }
        transition
    }

    pub async fn left(
        &self,
        connection_id: crate::data::ConnectionId,
        session_id: &SessionId,
        surface: Surface,
    ) -> Option<ViewerTransition> {
        let transition = {
            let mut counts = self.counts.write().await;
            if let Some(entry) = counts.get_mut(session_id) {
                entry.decrement(surface);
                if entry.total() == 0 {
                    counts.remove(session_id);
                    Some(ViewerTransition::BecameUnwatched)
                } else {
                    None
                }
            } else {
                None
            }
        };
        if let Some(entries) = self.by_connection.write().await.get_mut(&connection_id) {
            entries.retain(|(s, surf)| !(s == session_id && *surf == surface));
        }
        if transition.is_some() {
            info!(session_id = %session_id, "session became unwatched");
        }
        transition
    }

    /// Applies `left()` for every (session, surface) pair the connection had
    /// registered, returning any resulting unwatched transitions.
    pub async fn handle_disconnect(
        &self,
        connection_id: crate::data::ConnectionId,
    ) -> Vec<(SessionId, ViewerTransition)> {
        let entries = self
            .by_connection
            .write()
            .await
            .remove(&connection_id)
            .unwrap_or_default();

        let mut transitions = Vec::new();
        for (session_id, surface) in entries {
            if let Some(t) = self.left(connection_id, &session_id, surface).await {
                transitions.push((session_id, t));
            }
        }
        transitions
    }

    pub async fn counts(&self, session_id: &SessionId) -> ViewerCounts {
        self.counts.read().await.get(session_id).cloned().unwrap_or_default()
    }
}

impl Default for ViewerTracker {
    fn default() -> Self {
        Self::new()
    }
}

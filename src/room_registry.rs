use crate::data::{ConnectionId, SessionId};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

/// Maps `room -> set<connection>` and the inverse, keeping both directions
/// symmetric under a single registry-wide lock (membership changes are rare
/// and cheap compared to fan-out, so a single lock keeps the invariant
/// trivially true rather than needing cross-map coordination).
///
/// This type owns membership only. Delivery is the fan-out engine's job: it
/// takes a `members()` snapshot and dispatches through the transport layer
/// itself, so a slow subscriber never holds the registry lock.
pub struct RoomRegistry {
    rooms: RwLock<HashMap<SessionId, HashSet<ConnectionId>>>,
    joined: RwLock<HashMap<ConnectionId, HashSet<SessionId>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            joined: RwLock::new(HashMap::new()),
        }
    }

    /// Idempotent: joining a room already joined is a no-op. Returns whether
    /// this call actually changed membership.
    pub async fn join(&self, connection_id: ConnectionId, room: &SessionId) -> bool {
        let mut rooms = self.rooms.write().await;
        let mut joined = self.joined.write().await;

        let members = rooms.entry(room.clone()).or_default();
        let newly_joined = members.insert(connection_id);
        joined.entry(connection_id).or_default().insert(room.clone());
        newly_joined
    }

    /// Idempotent: leaving a room not joined is a no-op.
    pub async fn leave(&self, connection_id: ConnectionId, room: &SessionId) -> bool {
        let mut rooms = self.rooms.write().await;
        let mut joined = self.joined.write().await;

        let removed = rooms
            .get_mut(room)
            .map(|members| members.remove(&connection_id))
            .unwrap_or(false);
        if let Some(members) = rooms.get(room) {
            if members.is_empty() {
                rooms.remove(room);
            }
        }
        if let Some(set) = joined.get_mut(&connection_id) {
            set.remove(room);
            if set.is_empty() {
                joined.remove(&connection_id);
            }
        }
        removed
    }

    /// Removes a connection from every room it had joined, used on disconnect.
    pub async fn leave_all(&self, connection_id: ConnectionId) -> Vec<SessionId> {
        let rooms_joined: Vec<SessionId> = {
            let joined = self.joined.read().await;
            joined
                .get(&connection_id)
                .map(|s| s.iter().cloned().collect())
                .unwrap_or_default()
        };
        for room in &rooms_joined {
            self.leave(connection_id, room).await;
        }
        rooms_joined
    }

    pub async fn members(&self, room: &SessionId) -> Vec<ConnectionId> {
        self.rooms
            .read()
            .await
            .get(room)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn size(&self, room: &SessionId) -> usize {
        self.rooms.read().await.get(room).map(|m| m.len()).unwrap_or(0)
    }

    pub async fn joined_rooms(&self, connection_id: ConnectionId) -> HashSet<SessionId> {
        self.joined
            .read()
            .await
            .get(&connection_id)
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn join_and_leave_are_symmetric() {
        let registry = RoomRegistry::new();
        let conn = Uuid::new_v4();
        let room: SessionId = "S1".into();

        registry.join(conn, &room).await;
        assert!(registry.members(&room).await.contains(&conn));
        assert!(registry.joined_rooms(conn).await.contains(&room));

        registry.leave(conn, &room).await;
        assert!(!registry.members(&room).await.contains(&conn));
        assert!(!registry.joined_rooms(conn).await.contains(&room));
    }

    #[tokio::test]
    async fn repeated_join_is_idempotent() {
        let registry = RoomRegistry::new();
        let conn = Uuid::new_v4();
        let room: SessionId = "S1".into();

        assert!(registry.join(conn, &room).await);
        assert!(!registry.join(conn, &room).await);
        assert_eq!(registry.size(&room).await, 1);
    }

    #[tokio::test]
    async fn leave_all_clears_every_room() {
        let registry = RoomRegistry::new();
        let conn = Uuid::new_v4();
        registry.join(conn, &"S1".to_string()).await;
        registry.join(conn, &"S2".to_string()).await;

        let left = registry.leave_all(conn).await;
        assert_eq!(left.len(), 2);
        assert!(registry.joined_rooms(conn).await.is_empty());
        assert_eq!(registry.size(&"S1".to_string()).await, 0);
    }

    #[tokio::test]
    async fn membership_is_per_room() {
        let registry = RoomRegistry::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        registry.join(a, &"S1".to_string()).await;
        registry.join(b, &"S1".to_string()).await;
        registry.join(a, &"S2".to_string()).await;

        assert_eq!(registry.members(&"S1".to_string()).await.len(), 2);
        assert_eq!(registry.members(&"S2".to_string()).await.len(), 1);
    }
}

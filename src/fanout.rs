use crate::data::{ConnectionId, SessionId};
use crate::network::{MessagePriority, ServerEvent};
use crate::room_registry::RoomRegistry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::warn;

#[derive(Debug, Default, Clone)]
pub struct FanoutMetrics {
    pub droppable_dropped: Arc<AtomicU64>,
    pub critical_failed: Arc<AtomicU64>,
}

impl FanoutMetrics {
    pub fn dropped(&self) -> u64 {
        self.droppable_dropped.load(Ordering::Relaxed)
    }

    pub fn critical_failed(&self) -> u64 {
        self.critical_failed.load(Ordering::Relaxed)
    }
}

/// Owns per-connection outbound queues and dispatches events to them,
/// honoring the same Critical-blocks / Droppable-drops policy the inherited
/// transport layer uses for its own per-connection channels. Room membership
/// comes from the registry; this type holds the actual send handles.
pub struct FanoutEngine {
    senders: RwLock<HashMap<ConnectionId, mpsc::Sender<ServerEvent>>>,
    rooms: Arc<RoomRegistry>,
    pub metrics: FanoutMetrics,
}

impl FanoutEngine {
    pub fn new(rooms: Arc<RoomRegistry>) -> Self {
        Self {
            senders: RwLock::new(HashMap::new()),
            rooms,
            metrics: FanoutMetrics::default(),
        }
    }

    /// Registers a connection's outbound queue, sized per `HUB_QUEUE_BOUND`.
    /// Returns the receiver the transport's write-side task should drain.
    pub async fn register(
        &self,
        connection_id: ConnectionId,
        queue_bound: usize,
    ) -> mpsc::Receiver<ServerEvent> {
        let (tx, rx) = mpsc::channel(queue_bound.max(1));
        self.senders.write().await.insert(connection_id, tx);
        rx
    }

    pub async fn unregister(&self, connection_id: ConnectionId) {
        self.senders.write().await.remove(&connection_id);
    }

    /// Sends one event to one connection. Critical events block until
    /// delivered or the queue is gone (the connection is presumed dead);
    /// Droppable events are dropped silently when the queue is full.
    pub async fn send_to(&self, connection_id: ConnectionId, event: ServerEvent) {
        let sender = self.senders.read().await.get(&connection_id).cloned();
        let Some(sender) = sender else { return };

        match event.priority() {
            MessagePriority::Critical => {
                if sender.send(event).await.is_err() {
                    self.metrics.critical_failed.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        connection_id = %connection_id,
                        "critical event could not be delivered, connection presumed dead"
                    );
                }
            }
            MessagePriority::Droppable => {
                if let Err(mpsc::error::TrySendError::Full(_)) = sender.try_send(event) {
                    self.metrics.droppable_dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    /// Sends one event to every connection currently joined to `room`.
    pub async fn broadcast_to_room(&self, room: &SessionId, event: ServerEvent) {
        for connection_id in self.rooms.members(room).await {
            self.send_to(connection_id, event.clone()).await;
        }
    }

    /// Sends one event to every connection registered with the hub,
    /// regardless of room membership. Used for `session:active` on
    /// `session_metadata`, which the spec requires reach every connection.
    pub async fn broadcast_all(&self, event: ServerEvent) {
        let connections: Vec<ConnectionId> = self.senders.read().await.keys().copied().collect();
        for connection_id in connections {
            self.send_to(connection_id, event.clone()).await;
        }
    }

    /// Drops every registered sender, which closes each connection's
    /// outbound queue and lets its writer task drain and exit on its own.
    /// Used during process shutdown to close subscriber queues gracefully
    /// instead of aborting the write-side tasks mid-frame.
    pub async fn shutdown_all(&self) {
        self.senders.write().await.clear();
    }
}

use crate::data::{ConnectionId, SessionId, Surface};
use crate::fanout::FanoutEngine;
use crate::network::ServerEvent;
use crate::room_registry::RoomRegistry;
use crate::session_store::SessionStore;
use crate::viewer_tracker::{ViewerTracker, ViewerTransition};
use std::time::{Duration, Instant};

/// A connection is only eligible for session:active catch-up if the session
/// has been touched within this window, matching what "active" means
/// elsewhere in the hub.
const ACTIVE_WINDOW: Duration = Duration::from_secs(30);

/// Handles `room:join`: joins both the room registry and the viewer tracker,
/// then replies to the joining connection only with the session's current
/// state, delay, and a join acknowledgement. Returns the viewer transition so
/// the caller can notify the producer if this was the session's first
/// viewer.
pub async fn handle_room_join(
    rooms: &RoomRegistry,
    viewers: &ViewerTracker,
    store: &SessionStore,
    fanout: &FanoutEngine,
    connection_id: ConnectionId,
    surface: Surface,
    session_id: SessionId,
) -> Option<ViewerTransition> {
    rooms.join(connection_id, &session_id).await;
    let transition = viewers.joined(connection_id, &session_id, surface).await;

    if let Some(session) = store.get(&session_id).await {
        fanout
            .send_to(
                connection_id,
                ServerEvent::SessionState {
                    session_id: session_id.clone(),
                    track_name: session.track_name.clone(),
                    session_type: session.session_type.clone(),
                    status: "active".to_string(),
                },
            )
            .await;
        fanout
            .send_to(
                connection_id,
                ServerEvent::BroadcastDelay {
                    delay_ms: session.broadcast_delay_ms,
                },
            )
            .await;
    }

    fanout
        .send_to(connection_id, ServerEvent::RoomJoined { session_id })
        .await;

    transition
}

/// Handles `room:leave`: leaves both the room registry and the viewer
/// tracker, returning the resulting transition if this was the last viewer.
pub async fn handle_room_leave(
    rooms: &RoomRegistry,
    viewers: &ViewerTracker,
    connection_id: ConnectionId,
    surface: Surface,
    session_id: SessionId,
) -> Option<ViewerTransition> {
    rooms.leave(connection_id, &session_id).await;
    viewers.left(connection_id, &session_id, surface).await
}

/// Sends `session:active` for every session touched within the active
/// window, used to catch a freshly connected client up on what's live.
pub async fn send_catch_up(store: &SessionStore, fanout: &FanoutEngine, connection_id: ConnectionId) {
    let now = Instant::now();
    for session in store.list().await {
        if now.duration_since(session.last_update_at) <= ACTIVE_WINDOW {
            fanout
                .send_to(
                    connection_id,
                    ServerEvent::SessionActive {
                        session_id: session.session_id.clone(),
                        track_name: session.track_name.clone(),
                        session_type: session.session_type.clone(),
                    },
                )
                .await;
        }
    }
}

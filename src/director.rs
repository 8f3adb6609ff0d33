use crate::data::ConnectionId;
use crate::delay_scheduler::{DelayScheduler, DelayedDelivery};
use crate::fanout::FanoutEngine;
use crate::network::{ClientEvent, ServerEvent, StewardActionKind};
use crate::session_store::SessionStore;
use crate::viewer_tracker::ViewerTracker;
use chrono::Utc;

/// Handles the producer/steward control-plane events the ingress pipeline
/// deliberately skips: delay control, steward rulings, and relay producer
/// registration. Each returns the ack/echo event owed to the caller
/// directly, separate from whatever it fans out to the room.
pub struct DirectorOutcome {
    /// Sent back to the originating connection only.
    pub reply: Option<ServerEvent>,
    /// Broadcast to every member of the named room.
    pub broadcast: Vec<(String, ServerEvent)>,
}

impl DirectorOutcome {
    fn reply_only(event: ServerEvent) -> Self {
        Self {
            reply: Some(event),
            broadcast: vec![],
        }
    }
}

pub async fn handle_director_event(
    store: &SessionStore,
    viewers: &ViewerTracker,
    connection_id: ConnectionId,
    event: ClientEvent,
    max_delay_ms: u32,
) -> Option<DirectorOutcome> {
    match event {
        ClientEvent::BroadcastDelay { session_id, delay_ms } => {
            let clamped = delay_ms.min(max_delay_ms);
            let exists = store.set_delay(&session_id, clamped).await;
            if !exists {
                // Unknown-session control events are silently ignored: no
                // reply, no mutation.
                return None;
            }
            Some(DirectorOutcome {
                reply: Some(ServerEvent::Ack {
                    original_type: "broadcast:delay".to_string(),
                    success: true,
                    error: None,
                }),
                broadcast: vec![(
                    session_id,
                    ServerEvent::BroadcastDelay { delay_ms: clamped },
                )],
            })
        }

        ClientEvent::StewardAction {
            session_id,
            incident_id,
            action,
            penalty_type,
            penalty_value,
            notes,
            steward_id,
        } => {
            let decided_at = now_iso8601();
            let decision = ServerEvent::StewardDecision {
                incident_id: incident_id.clone(),
                action,
                penalty_type,
                penalty_value,
                notes,
                steward_id,
                decided_at,
            };
            Some(DirectorOutcome {
                reply: Some(ServerEvent::StewardActionAck {
                    success: true,
                    incident_id: Some(incident_id),
                    action: Some(action),
                    error: None,
                }),
                broadcast: vec![(session_id, decision)],
            })
        }

        ClientEvent::RelayRegister { session_id } => {
            store.set_producer(&session_id, connection_id).await;
            let viewer_count = viewers.counts(&session_id).await.total();
            Some(DirectorOutcome::reply_only(ServerEvent::RelayViewers {
                session_id,
                viewer_count,
                request_controls: false,
            }))
        }

        _ => None,
    }
}

/// Clamps and schedules a derived event for delayed delivery if the session
/// has a nonzero broadcast delay and the event is delay-eligible; otherwise
/// the caller should dispatch it immediately.
pub fn schedule_or_immediate(
    scheduler: &DelayScheduler,
    delay_ms: u32,
    room: String,
    event: ServerEvent,
) -> Option<(String, ServerEvent)> {
    if delay_ms > 0 && event.delayable() {
        scheduler.schedule(delay_ms, DelayedDelivery { room, event });
        None
    } else {
        Some((room, event))
    }
}

/// Only used so director.rs doesn't need a direct fanout dependency in
/// callers that already have one; kept here so tests can exercise ack shapes
/// without pulling in the whole hub.
pub async fn apply_outcome(fanout: &FanoutEngine, connection_id: ConnectionId, outcome: DirectorOutcome) {
    if let Some(reply) = outcome.reply {
        fanout.send_to(connection_id, reply).await;
    }
    for (room, event) in outcome.broadcast {
        fanout.broadcast_to_room(&room, event).await;
    }
}

fn now_iso8601() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use uuid::Uuid;

    fn store() -> SessionStore {
        SessionStore::new(Duration::from_secs(60))
    }

    #[tokio::test]
    async fn broadcast_delay_clamps_to_max_and_echoes_room() {
        let store = store();
        store
            .upsert_from_metadata("S1".into(), "Track".into(), "race".into())
            .await;

        let viewers = ViewerTracker::new();
        let outcome = handle_director_event(
            &store,
            &viewers,
            Uuid::new_v4(),
            ClientEvent::BroadcastDelay {
                session_id: "S1".into(),
                delay_ms: 999_999,
            },
            60_000,
        )
        .await
        .unwrap();

        match &outcome.broadcast[0].1 {
            ServerEvent::BroadcastDelay { delay_ms } => assert_eq!(*delay_ms, 60_000),
            _ => panic!("expected broadcast:delay"),
        }
        assert!(matches!(outcome.reply, Some(ServerEvent::Ack { success: true, .. })));
    }

    #[tokio::test]
    async fn broadcast_delay_for_unknown_session_is_silently_ignored() {
        let store = store();
        let viewers = ViewerTracker::new();
        let outcome = handle_director_event(
            &store,
            &viewers,
            Uuid::new_v4(),
            ClientEvent::BroadcastDelay {
                session_id: "ghost".into(),
                delay_ms: 1000,
            },
            60_000,
        )
        .await;

        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn steward_action_broadcasts_decision_and_acks_caller() {
        let store = store();
        let viewers = ViewerTracker::new();
        let outcome = handle_director_event(
            &store,
            &viewers,
            Uuid::new_v4(),
            ClientEvent::StewardAction {
                session_id: "S1".into(),
                incident_id: "inc-0".into(),
                action: StewardActionKind::Approve,
                penalty_type: None,
                penalty_value: None,
                notes: None,
                steward_id: None,
            },
            60_000,
        )
        .await
        .unwrap();

        assert!(matches!(
            outcome.reply,
            Some(ServerEvent::StewardActionAck { success: true, .. })
        ));
        assert!(matches!(
            outcome.broadcast[0].1,
            ServerEvent::StewardDecision { .. }
        ));
    }

    #[tokio::test]
    async fn relay_register_sets_producer_and_replies_with_viewer_count() {
        let store = store();
        store
            .upsert_from_metadata("S1".into(), "Track".into(), "race".into())
            .await;
        let conn = Uuid::new_v4();
        let viewers = ViewerTracker::new();

        let outcome = handle_director_event(
            &store,
            &viewers,
            conn,
            ClientEvent::RelayRegister {
                session_id: "S1".into(),
            },
            60_000,
        )
        .await
        .unwrap();

        assert!(matches!(outcome.reply, Some(ServerEvent::RelayViewers { viewer_count: 0, .. })));
        let session = store.get(&"S1".to_string()).await.unwrap();
        assert_eq!(session.producer, Some(conn));
    }
}

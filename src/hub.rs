use crate::config::HubConfig;
use crate::data::ConnectionId;
use crate::delay_scheduler::{DelayScheduler, DelayedDelivery};
use crate::director::{self, DirectorOutcome};
use crate::fanout::FanoutEngine;
use crate::ingress::{self, Audience, Derived, IdGenerator, IngressError, TruncationLimiter};
use crate::network::{ClientEvent, ServerEvent};
use crate::query;
use crate::room_registry::RoomRegistry;
use crate::session_store::SessionStore;
use crate::viewer_tracker::ViewerTracker;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

/// The single context object wired through every connection handler,
/// replacing the module-level globals the reference implementation relies
/// on. Cloning is cheap; every field is already reference-counted.
#[derive(Clone)]
pub struct Hub {
    pub rooms: Arc<RoomRegistry>,
    pub viewers: Arc<ViewerTracker>,
    pub sessions: Arc<SessionStore>,
    pub fanout: Arc<FanoutEngine>,
    pub ids: Arc<IdGenerator>,
    truncation_limiter: Arc<TruncationLimiter>,
    delay: Arc<DelayScheduler>,
    pub config: Arc<HubConfig>,
}

impl Hub {
    /// Builds the hub and spawns the delay scheduler's and ready-delivery
    /// drain's background tasks. `shutdown` should be awaited and, once it
    /// resolves, no further events should be dispatched through this hub.
    pub fn new(config: HubConfig) -> Self {
        let rooms = Arc::new(RoomRegistry::new());
        let fanout = Arc::new(FanoutEngine::new(rooms.clone()));
        let (delay, mut ready_rx) = DelayScheduler::spawn();
        let delay = Arc::new(delay);

        let hub = Self {
            rooms,
            viewers: Arc::new(ViewerTracker::new()),
            sessions: Arc::new(SessionStore::new(Duration::from_millis(
                config.server.stale_threshold_ms,
            ))),
            fanout: fanout.clone(),
            ids: Arc::new(IdGenerator::new()),
            truncation_limiter: Arc::new(TruncationLimiter::new()),
            delay,
            config: Arc::new(config),
        };

        tokio::spawn(async move {
            while let Some(DelayedDelivery { room, event }) = ready_rx.recv().await {
                fanout.broadcast_to_room(&room, event).await;
            }
        });

        hub
    }

    /// Registers a new connection's outbound queue and sends it the
    /// standard catch-up: `session:active` for every recently touched
    /// session. Returns the receiver the transport's writer task should
    /// drain.
    pub async fn accept_connection(&self, connection_id: ConnectionId) -> mpsc::Receiver<ServerEvent> {
        let rx = self
            .fanout
            .register(connection_id, self.config.server.queue_bound)
            .await;
        query::send_catch_up(&self.sessions, &self.fanout, connection_id).await;
        rx
    }

    /// Cleans up all per-connection state: room membership, viewer counts,
    /// and the outbound queue.
    pub async fn disconnect(&self, connection_id: ConnectionId) {
        self.rooms.leave_all(connection_id).await;
        self.viewers.handle_disconnect(connection_id).await;
        self.fanout.unregister(connection_id).await;
        self.truncation_limiter.remove(connection_id).await;
    }

    /// Routes one inbound producer/consumer event through ingress,
    /// director, and query handling, then dispatches every resulting event
    /// (delayed or immediate) through fan-out. Malformed telemetry_binary
    /// payloads are translated into an `ack{success:false}` to the sender,
    /// per the ingress error-handling contract.
    pub async fn handle_event(&self, connection_id: ConnectionId, event: ClientEvent) {
        match &event {
            ClientEvent::RelayRegister { .. }
            | ClientEvent::BroadcastDelay { .. }
            | ClientEvent::StewardAction { .. } => {
                if let Some(outcome) = director::handle_director_event(
                    &self.sessions,
                    &self.viewers,
                    connection_id,
                    event,
                    self.config.server.max_delay_ms,
                )
                .await
                {
                    self.apply_director_outcome(connection_id, outcome).await;
                }
                return;
            }
            ClientEvent::RoomJoin { session_id } => {
                let transition = query::handle_room_join(
                    &self.rooms,
                    &self.viewers,
                    &self.sessions,
                    &self.fanout,
                    connection_id,
                    crate::data::Surface::Web,
                    session_id.clone(),
                )
                .await;
                if transition.is_some() {
                    self.notify_producer_viewer_change(session_id).await;
                }
                return;
            }
            ClientEvent::RoomLeave { session_id } => {
                let transition = query::handle_room_leave(
                    &self.rooms,
                    &self.viewers,
                    connection_id,
                    crate::data::Surface::Web,
                    session_id.clone(),
                )
                .await;
                if transition.is_some() {
                    self.notify_producer_viewer_change(session_id).await;
                }
                return;
            }
            _ => {}
        }

        let original_type = ingress::event_name(&event).to_string();
        match ingress::handle_client_event(
            &self.sessions,
            &self.rooms,
            &self.ids,
            &self.truncation_limiter,
            connection_id,
            event,
        )
        .await
        {
            Ok(derived) => {
                for item in derived {
                    self.dispatch(item).await;
                }
            }
            Err(IngressError::Decode(_)) => {
                // Binary decode failures are logged at the decode site and
                // the connection stays open; no ack is owed (there is no
                // producer-addressed schema failure here, just truncation).
            }
            Err(err) => {
                self.fanout
                    .send_to(
                        connection_id,
                        ServerEvent::Ack {
                            original_type,
                            success: false,
                            error: Some(err.to_string()),
                        },
                    )
                    .await;
            }
        }
    }

    async fn apply_director_outcome(&self, connection_id: ConnectionId, outcome: DirectorOutcome) {
        if let Some(reply) = outcome.reply {
            self.fanout.send_to(connection_id, reply).await;
        }
        for (room, event) in outcome.broadcast {
            self.fanout.broadcast_to_room(&room, event).await;
        }
    }

    /// Dispatches a single derived event according to its audience and the
    /// owning session's broadcast delay. Only room-addressed, delay-eligible
    /// events go through the scheduler.
    async fn dispatch(&self, derived: Derived) {
        match derived.audience {
            Audience::All => self.fanout.broadcast_all(derived.event).await,
            Audience::Connection(connection_id) => {
                self.fanout.send_to(connection_id, derived.event).await
            }
            Audience::Room(session_id) => {
                let delay_ms = self
                    .sessions
                    .get(&session_id)
                    .await
                    .map(|s| s.broadcast_delay_ms)
                    .unwrap_or(0);

                if delay_ms > 0 && derived.event.delayable() {
                    self.delay.schedule(
                        delay_ms,
                        DelayedDelivery {
                            room: session_id,
                            event: derived.event,
                        },
                    );
                } else {
                    self.fanout.broadcast_to_room(&session_id, derived.event).await;
                }
            }
        }
    }

    /// After a room join/leave, tells the session's registered producer
    /// whether it should raise or lower its capture rate.
    async fn notify_producer_viewer_change(&self, session_id: &str) {
        let session_id = session_id.to_string();
        let Some(session) = self.sessions.get(&session_id).await else {
            return;
        };
        let Some(producer) = session.producer else {
            return;
        };
        let counts = self.viewers.counts(&session_id).await;
        self.fanout
            .send_to(
                producer,
                ServerEvent::RelayViewers {
                    session_id,
                    viewer_count: counts.total(),
                    request_controls: counts.total() > 0,
                },
            )
            .await;
    }

    /// Runs the periodic stale-session reap. Intended to be driven by a
    /// `tokio::time::interval` in `main.rs` at `server.reap_interval_ms`.
    pub async fn reap(&self) {
        let reaped = self.sessions.reap().await;
        if !reaped.is_empty() {
            info!(count = reaped.len(), "reaped stale sessions");
        }
    }
}

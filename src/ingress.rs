use crate::data::{CarId, ConnectionId, SessionId, Surface, TireTemps};
use crate::decoder::decode_telemetry_frame;
use crate::network::*;
use crate::session_store::SessionStore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::warn;

#[derive(Debug, Error)]
pub enum IngressError {
    #[error("missing or empty sessionId")]
    MissingSessionId,
    #[error("binary telemetry decode failed: {0}")]
    Decode(#[from] crate::decoder::DecodeError),
}

/// Monotonic counters backing `inc-<n>` / `evt-<n>` ids, mirroring the way
/// the inherited codebase mints sequential ids rather than random ones.
pub struct IdGenerator {
    incidents: AtomicU64,
    events: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            incidents: AtomicU64::new(0),
            events: AtomicU64::new(0),
        }
    }

    pub fn next_incident_id(&self) -> String {
        format!("inc-{}", self.incidents.fetch_add(1, Ordering::Relaxed))
    }

    pub fn next_event_id(&self) -> String {
        format!("evt-{}", self.events.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks the last time a truncated-binary-frame warning was logged per
/// connection, so a producer stuck sending oversized frames gets one log
/// line a second instead of one per frame.
pub struct TruncationLimiter {
    last_logged: RwLock<HashMap<ConnectionId, Instant>>,
}

impl TruncationLimiter {
    pub fn new() -> Self {
        Self {
            last_logged: RwLock::new(HashMap::new()),
        }
    }

    /// Returns true the first time it's called for a connection and at most
    /// once per second after that.
    async fn should_log(&self, connection_id: ConnectionId) -> bool {
        let now = Instant::now();
        let mut last_logged = self.last_logged.write().await;
        match last_logged.get(&connection_id) {
            Some(last) if now.duration_since(*last) < Duration::from_secs(1) => false,
            _ => {
                last_logged.insert(connection_id, now);
                true
            }
        }
    }

    pub async fn remove(&self, connection_id: ConnectionId) {
        self.last_logged.write().await.remove(&connection_id);
    }
}

impl Default for TruncationLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Who a derived event should be sent to. `Room` events are delay-eligible
/// and go through the scheduler; `All` and `Connection` are control-plane
/// replies/broadcasts that are never delayed.
pub enum Audience {
    Room(SessionId),
    All,
    Connection(crate::data::ConnectionId),
}

/// One outgoing event plus who it's addressed to.
pub struct Derived {
    pub audience: Audience,
    pub event: ServerEvent,
}

fn to_room(session_id: SessionId, event: ServerEvent) -> Derived {
    Derived {
        audience: Audience::Room(session_id),
        event,
    }
}

/// The wire event name, used to label `ack` replies for events rejected
/// before they can be matched out by `handle_client_event`.
pub fn event_name(event: &ClientEvent) -> &'static str {
    match event {
        ClientEvent::SessionMetadata { .. } => "session_metadata",
        ClientEvent::Telemetry { .. } => "telemetry",
        ClientEvent::TelemetryBinary { .. } => "telemetry_binary",
        ClientEvent::StrategyUpdate { .. } => "strategy_update",
        ClientEvent::Incident { .. } => "incident",
        ClientEvent::RaceEvent { .. } => "race_event",
        ClientEvent::VideoFrame { .. } => "video_frame",
        ClientEvent::RelayRegister { .. } => "relay:register",
        ClientEvent::BroadcastDelay { .. } => "broadcast:delay",
        ClientEvent::StewardAction { .. } => "steward:action",
        ClientEvent::RoomJoin { .. } => "room:join",
        ClientEvent::RoomLeave { .. } => "room:leave",
    }
}

/// Every ingress-handled event carries a `sessionId`; director-control
/// events are validated separately in `director.rs`.
fn event_session_id(event: &ClientEvent) -> Option<&str> {
    match event {
        ClientEvent::SessionMetadata { session_id, .. }
        | ClientEvent::Telemetry { session_id, .. }
        | ClientEvent::TelemetryBinary { session_id, .. }
        | ClientEvent::StrategyUpdate { session_id, .. }
        | ClientEvent::Incident { session_id, .. }
        | ClientEvent::RaceEvent { session_id, .. }
        | ClientEvent::VideoFrame { session_id, .. } => Some(session_id.as_str()),
        _ => None,
    }
}

fn now_ms() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or(0.0)
}

/// Applies a producer event to session state and returns the derived
/// consumer-facing events it produces. Pure with respect to its inputs except
/// for mutating `store`; does not touch the transport or room registry.
pub async fn handle_client_event(
    store: &SessionStore,
    rooms: &crate::room_registry::RoomRegistry,
    ids: &IdGenerator,
    truncation_limiter: &TruncationLimiter,
    connection_id: crate::data::ConnectionId,
    event: ClientEvent,
) -> Result<Vec<Derived>, IngressError> {
    if let Some(session_id) = event_session_id(&event) {
        if session_id.is_empty() {
            return Err(IngressError::MissingSessionId);
        }
    }

    match event {
        ClientEvent::SessionMetadata {
            session_id,
            track_name,
            session_type,
        } => {
            store
                .upsert_from_metadata(session_id.clone(), track_name.clone(), session_type.clone())
                .await;
            rooms.join(connection_id, &session_id).await;
            Ok(vec![
                Derived {
                    audience: Audience::All,
                    event: ServerEvent::SessionActive {
                        session_id,
                        track_name,
                        session_type,
                    },
                },
                Derived {
                    audience: Audience::Connection(connection_id),
                    event: ServerEvent::Ack {
                        original_type: "session_metadata".to_string(),
                        success: true,
                        error: None,
                    },
                },
            ])
        }

        ClientEvent::Telemetry {
            session_id,
            session_time_ms,
            cars,
        } => {
            store.upsert_implicit(&session_id).await;
            let timing = merge_telemetry_and_derive(store, &session_id, &cars).await;
            let session_time_ms = session_time_ms.unwrap_or_else(now_ms);
            Ok(vec![to_room(
                session_id.clone(),
                ServerEvent::TimingUpdate {
                    session_id,
                    session_time_ms,
                    timing,
                },
            )])
        }

        ClientEvent::TelemetryBinary { session_id, payload } => {
            store.upsert_implicit(&session_id).await;
            let frame = decode_telemetry_frame(&payload)?;
            if frame.truncated_count > 0 && truncation_limiter.should_log(connection_id).await {
                warn!(
                    connection_id = %connection_id,
                    session_id = %session_id,
                    truncated = frame.truncated_count,
                    "binary telemetry frame truncated"
                );
            }
            let timing = merge_telemetry_and_derive(store, &session_id, &frame.cars).await;
            Ok(vec![to_room(
                session_id.clone(),
                ServerEvent::TimingUpdate {
                    session_id,
                    session_time_ms: frame.timestamp_ms,
                    timing,
                },
            )])
        }

        ClientEvent::StrategyUpdate {
            session_id,
            timestamp,
            cars,
        } => {
            let mut derived = Vec::new();
            let strategy_entries = store
                .with_session_mut(&session_id, |session| {
                    cars.iter()
                        .map(|car| {
                            let car_id = car.car_id.to_string();
                            let strategy = apply_strategy_update(session.driver_mut(&car_id), car);
                            StrategyEntry { car_id, strategy }
                        })
                        .collect::<Vec<_>>()
                })
                .await
                .unwrap_or_default();

            derived.push(to_room(
                session_id.clone(),
                ServerEvent::StrategyUpdate {
                    session_id: session_id.clone(),
                    timestamp,
                    strategy: strategy_entries,
                },
            ));

            if let Some(primary) = cars.first() {
                let session = store.get(&session_id).await;
                if let Some(session) = session {
                    let car_id = primary.car_id.to_string();
                    if let Some(record) = session.drivers.get(&car_id) {
                        if let Some(strategy) = &record.strategy {
                            derived.push(to_room(
                                session_id.clone(),
                                ServerEvent::CarStatus(Box::new(build_car_status(
                                    &session_id,
                                    &car_id,
                                    strategy,
                                ))),
                            ));
                        }
                    }
                }
            }

            if cars.len() > 1 {
                let session = store.get(&session_id).await;
                if let Some(session) = session {
                    let opponents: Vec<OpponentEntry> = cars[1..]
                        .iter()
                        .enumerate()
                        .filter_map(|(index, car)| {
                            let car_id = car.car_id.to_string();
                            let record = session.drivers.get(&car_id)?;
                            Some(build_opponent_entry(index, record, car))
                        })
                        .collect();
                    if !opponents.is_empty() {
                        derived.push(to_room(
                            session_id.clone(),
                            ServerEvent::OpponentIntel { opponents },
                        ));
                    }
                }
            }

            Ok(derived)
        }

        ClientEvent::Incident {
            session_id,
            kind,
            severity,
            lap,
            corner_name,
            cars,
            driver_names,
            track_position,
        } => {
            store.touch(&session_id).await;
            let severity = severity.unwrap_or_else(|| "medium".to_string());
            let importance = match severity.as_str() {
                "high" | "critical" => "critical",
                _ => "warning",
            };

            let involved_drivers: Vec<InvolvedDriver> = cars
                .iter()
                .enumerate()
                .map(|(i, car_id)| {
                    let driver_id = car_id.to_string();
                    let driver_name = driver_names
                        .as_ref()
                        .and_then(|names| names.get(i).cloned())
                        .unwrap_or_else(|| format!("Car {}", driver_id));
                    InvolvedDriver {
                        car_number: driver_id.clone(),
                        driver_id,
                        driver_name,
                        role: "involved".to_string(),
                    }
                })
                .collect();

            let names_joined = involved_drivers
                .iter()
                .map(|d| d.driver_name.clone())
                .collect::<Vec<_>>()
                .join(", ");
            let message = match &corner_name {
                Some(corner) => format!("Incident: {} - {}", corner, names_joined),
                None => format!("Incident: {}", names_joined),
            };

            let incident = IncidentPayload {
                id: ids.next_incident_id(),
                kind,
                severity,
                lap_number: lap,
                session_time_ms: now_ms(),
                track_position: track_position.unwrap_or(0.0),
                corner_name,
                involved_drivers,
                status: "pending".to_string(),
            };

            Ok(vec![
                to_room(session_id.clone(), ServerEvent::IncidentNew(Box::new(incident))),
                to_room(
                    session_id,
                    ServerEvent::EventLog {
                        id: ids.next_event_id(),
                        timestamp: now_ms(),
                        category: "warning".to_string(),
                        message,
                        importance: importance.to_string(),
                    },
                ),
                Derived {
                    audience: Audience::Connection(connection_id),
                    event: ServerEvent::Ack {
                        original_type: "incident".to_string(),
                        success: true,
                        error: None,
                    },
                },
            ])
        }

        ClientEvent::RaceEvent {
            session_id,
            flag_state,
            session_phase,
            lap,
            time_remaining,
        } => {
            store
                .with_session_mut(&session_id, |session| {
                    session.flag_state = flag_state.clone();
                    session.session_phase = session_phase.clone();
                    session.current_lap = lap;
                    session.time_remaining = time_remaining;
                })
                .await;

            let is_flag_change = matches!(flag_state.as_deref(), Some("yellow") | Some("red"));
            let payload = RaceStatePayload {
                session_id: session_id.clone(),
                flag_state: flag_state.clone(),
                session_phase,
                lap,
                time_remaining,
            };

            let mut derived = vec![
                to_room(session_id.clone(), ServerEvent::RaceEvent(Box::new(payload.clone()))),
                to_room(session_id.clone(), ServerEvent::RaceState(Box::new(payload))),
            ];

            if is_flag_change {
                derived.push(to_room(
                    session_id.clone(),
                    ServerEvent::EventLog {
                        id: ids.next_event_id(),
                        timestamp: now_ms(),
                        category: "system".to_string(),
                        message: format!("Flag: {}", flag_state.unwrap_or_default()),
                        importance: "warning".to_string(),
                    },
                ));
            }

            derived.push(Derived {
                audience: Audience::Connection(connection_id),
                event: ServerEvent::Ack {
                    original_type: "race_event".to_string(),
                    success: true,
                    error: None,
                },
            });

            Ok(derived)
        }

        ClientEvent::VideoFrame { session_id, image } => {
            store.touch(&session_id).await;
            Ok(vec![to_room(
                session_id.clone(),
                ServerEvent::VideoFrame {
                    session_id,
                    image,
                    timestamp: now_ms(),
                },
            )])
        }

        // Director-control events are handled by `director.rs`, not here.
        ClientEvent::RelayRegister { .. }
        | ClientEvent::BroadcastDelay { .. }
        | ClientEvent::StewardAction { .. }
        | ClientEvent::RoomJoin { .. }
        | ClientEvent::RoomLeave { .. } => Ok(vec![]),
    }
}

async fn merge_telemetry_and_derive(
    store: &SessionStore,
    session_id: &SessionId,
    cars: &[TelemetryCar],
) -> TimingPayload {
    let entries = store
        .with_session_mut(session_id, |session| {
            cars.iter()
                .map(|car| {
                    let car_id = car.car_id.to_string();
                    let record = session.driver_mut(&car_id);
                    if let Some(name) = &car.driver_name {
                        record.driver_name = Some(name.clone());
                    }
                    record.lap_dist_pct = car.pos.s;
                    if car.position.is_some() {
                        record.position = car.position;
                    }
                    if car.lap.is_some() {
                        record.lap = car.lap;
                    }
                    if car.speed.is_some() {
                        record.speed = car.speed;
                    }

                    TimingEntry {
                        driver_id: car_id.clone(),
                        driver_name: record.resolved_name(),
                        car_number: car_id,
                        position: record.position,
                        lap_number: record.lap,
                        last_lap_time: record.last_lap_time.unwrap_or(0.0),
                        best_lap_time: record.best_lap_time.unwrap_or(0.0),
                        gap_to_leader: record.gap_to_leader.unwrap_or(0.0),
                        lap_dist_pct: record.lap_dist_pct,
                        speed: record.speed.unwrap_or(0.0),
                    }
                })
                .collect::<Vec<_>>()
        })
        .await
        .unwrap_or_default();

    TimingPayload { entries }
}

fn apply_strategy_update(
    record: &mut crate::data::DriverRecord,
    car: &StrategyCar,
) -> crate::data::StrategyState {
    let strategy = crate::data::StrategyState {
        fuel: car.fuel.clone(),
        tires: car.tires.clone().unwrap_or_default(),
        tire_temps: car.tire_temps.clone(),
        damage: car.damage.clone().unwrap_or_default(),
        pit: car.pit.clone().unwrap_or_default(),
        stint_lap: car.stint_lap,
        avg_pace: car.avg_pace,
        degradation: car.degradation,
        gap: car.gap,
    };
    record.strategy = Some(strategy.clone());
    strategy
}

fn fuel_status_bucket(pct: f32) -> &'static str {
    if pct > 0.30 {
        "green"
    } else if pct > 0.15 {
        "yellow"
    } else if pct > 0.0 {
        "red"
    } else {
        "gray"
    }
}

fn tire_temp_average(band: &crate::data::TireTempBand) -> f32 {
    (band.l + band.m + band.r) / 3.0
}

fn tire_temp_averages(temps: Option<&TireTemps>) -> TireTempAverages {
    match temps {
        Some(t) => TireTempAverages {
            fl: tire_temp_average(&t.fl),
            fr: tire_temp_average(&t.fr),
            rl: tire_temp_average(&t.rl),
            rr: tire_temp_average(&t.rr),
        },
        None => TireTempAverages::default(),
    }
}

fn build_car_status(
    session_id: &SessionId,
    car_id: &CarId,
    strategy: &crate::data::StrategyState,
) -> CarStatusPayload {
    let damage_ok = strategy.damage.aero == 0.0 && strategy.damage.engine == 0.0;
    CarStatusPayload {
        session_id: session_id.clone(),
        car_id: car_id.clone(),
        fuel: FuelStatusView {
            level: strategy.fuel.level,
            pct: strategy.fuel.pct,
            status: fuel_status_bucket(strategy.fuel.pct).to_string(),
        },
        tires: strategy.tires.clone(),
        tire_temps: tire_temp_averages(strategy.tire_temps.as_ref()),
        damage: DamageStatusView {
            aero: strategy.damage.aero,
            engine: strategy.damage.engine,
            status: if damage_ok { "green" } else { "yellow" }.to_string(),
        },
    }
}

fn build_opponent_entry(
    index: usize,
    record: &crate::data::DriverRecord,
    car: &StrategyCar,
) -> OpponentEntry {
    let min_wear = car
        .tires
        .as_ref()
        .map(|t| t.fl.min(t.fr).min(t.rl).min(t.rr))
        .unwrap_or(0.0);
    let tire_phase = match &car.tires {
        Some(_) if min_wear > 0.70 => "fresh",
        Some(_) => "optimal",
        None => "unknown",
    };

    OpponentEntry {
        car_id: record.car_id.clone(),
        driver_id: record.car_id.clone(),
        driver_name: record.resolved_name(),
        car_number: record.car_id.clone(),
        position: (index + 2) as u32,
        gap: car.gap,
        gap_trend: "stable".to_string(),
        threat_level: "yellow".to_string(),
        tire_phase: tire_phase.to_string(),
    }
}

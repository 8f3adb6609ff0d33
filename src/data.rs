use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;
use uuid::Uuid;

// --- Identifiers ---
/// Producer-assigned, opaque. Not a UUID: producers mint their own session ids.
pub type SessionId = String;
/// Transport-assigned.
pub type ConnectionId = Uuid;
/// Stringified form of the producer's integer carId, used as the map key and
/// as the wire-facing `driverId`.
pub type CarId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Surface {
    Web,
    Driver,
    Broadcast,
    Relay,
}

impl Surface {
    pub const ALL: [Surface; 4] = [Surface::Web, Surface::Driver, Surface::Broadcast, Surface::Relay];
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ViewerCounts {
    pub web: u32,
    pub driver: u32,
    pub broadcast: u32,
    pub relay: u32,
}

impl ViewerCounts {
    pub fn total(&self) -> u32 {
        self.web + self.driver + self.broadcast + self.relay
    }

    fn count_mut(&mut self, surface: Surface) -> &mut u32 {
        match surface {
            Surface::Web => &mut self.web,
            Surface::Driver => &mut self.driver,
            Surface::Broadcast => &mut self.broadcast,
            Surface::Relay => &mut self.relay,
        }
    }

    pub fn increment(&mut self, surface: Surface) {
        *self.count_mut(surface) += 1;
    }

    pub fn decrement(&mut self, surface: Surface) {
        let count = self.count_mut(surface);
        *count = count.saturating_sub(1);
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FuelStatus {
    pub level: f32,
    pub pct: f32,
    pub per_lap: Option<f32>,
    pub laps_remaining: Option<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TireWear {
    pub fl: f32,
    pub fr: f32,
    pub rl: f32,
    pub rr: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TireTempBand {
    pub l: f32,
    pub m: f32,
    pub r: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TireTemps {
    pub fl: TireTempBand,
    pub fr: TireTempBand,
    pub rl: TireTempBand,
    pub rr: TireTempBand,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DamageStatus {
    pub aero: f32,
    pub engine: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PitStatus {
    pub in_lane: bool,
    pub stops: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyState {
    pub fuel: FuelStatus,
    pub tires: TireWear,
    pub tire_temps: Option<TireTemps>,
    pub damage: DamageStatus,
    pub pit: PitStatus,
    pub stint_lap: Option<u32>,
    pub avg_pace: Option<f32>,
    pub degradation: Option<f32>,
    pub gap: Option<f32>,
}

/// One car within a session. Created on first mention, lives for the
/// lifetime of the owning session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriverRecord {
    pub car_id: CarId,
    pub driver_name: Option<String>,
    pub car_number: Option<String>,
    pub lap_dist_pct: f32,
    pub position: Option<u32>,
    pub lap: Option<u32>,
    pub last_lap_time: Option<f32>,
    pub best_lap_time: Option<f32>,
    pub gap_to_leader: Option<f32>,
    pub speed: Option<f32>,
    pub strategy: Option<StrategyState>,
}

impl DriverRecord {
    pub fn new(car_id: CarId) -> Self {
        Self {
            car_id,
            ..Default::default()
        }
    }

    pub fn resolved_name(&self) -> String {
        self.driver_name
            .clone()
            .unwrap_or_else(|| format!("Car {}", self.car_id))
    }
}

/// The full per-session record owned exclusively by the session store.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub session_id: SessionId,
    pub track_name: String,
    pub session_type: String,
    pub drivers: HashMap<CarId, DriverRecord>,
    pub last_update_at: Instant,
    pub broadcast_delay_ms: u32,
    pub flag_state: Option<String>,
    pub current_lap: Option<u32>,
    pub time_remaining: Option<f32>,
    pub session_phase: Option<String>,
    /// Connection registered via `relay:register` / `session_metadata` for this session.
    pub producer: Option<ConnectionId>,
}

impl SessionState {
    pub fn new(session_id: SessionId, track_name: String, session_type: String) -> Self {
        Self {
            session_id,
            track_name,
            session_type,
            drivers: HashMap::new(),
            last_update_at: Instant::now(),
            broadcast_delay_ms: 0,
            flag_state: None,
            current_lap: None,
            time_remaining: None,
            session_phase: None,
            producer: None,
        }
    }

    pub fn touch(&mut self) {
        self.last_update_at = Instant::now();
    }

    pub fn driver_mut(&mut self, car_id: &str) -> &mut DriverRecord {
        self.drivers
            .entry(car_id.to_string())
            .or_insert_with(|| DriverRecord::new(car_id.to_string()))
    }
}

/// A transport-facing subscriber. Owned by the transport layer; the room
/// registry and viewer tracker hold only its identifier.
#[derive(Debug, Clone)]
pub struct Subscriber {
    pub connection_id: ConnectionId,
    pub surface: Surface,
    pub joined_sessions: std::collections::HashSet<SessionId>,
}

impl Subscriber {
    pub fn new(connection_id: ConnectionId, surface: Surface) -> Self {
        Self {
            connection_id,
            surface,
            joined_sessions: std::collections::HashSet::new(),
        }
    }
}

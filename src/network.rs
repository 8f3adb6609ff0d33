use crate::data::*;
use serde::{Deserialize, Serialize};

/// Priority levels for outgoing events, used for drop/backpressure policy at
/// the per-connection send queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MessagePriority {
    /// May be dropped when the per-connection queue is full.
    Droppable = 0,
    /// Must be delivered or the connection is too slow to keep up.
    Critical = 1,
}

// --- Producer -> Hub events ---
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum ClientEvent {
    #[serde(rename = "session_metadata")]
    SessionMetadata {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(rename = "trackName")]
        track_name: String,
        #[serde(rename = "sessionType")]
        session_type: String,
    },
    #[serde(rename = "telemetry")]
    Telemetry {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(rename = "sessionTimeMs")]
        session_time_ms: Option<f64>,
        cars: Vec<TelemetryCar>,
    },
    #[serde(rename = "telemetry_binary")]
    TelemetryBinary {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        payload: Vec<u8>,
    },
    #[serde(rename = "strategy_update")]
    StrategyUpdate {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        timestamp: f64,
        cars: Vec<StrategyCar>,
    },
    #[serde(rename = "incident")]
    Incident {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(rename = "type")]
        kind: String,
        severity: Option<String>,
        lap: Option<u32>,
        #[serde(rename = "cornerName")]
        corner_name: Option<String>,
        cars: Vec<u32>,
        #[serde(rename = "driverNames")]
        driver_names: Option<Vec<String>>,
        #[serde(rename = "trackPosition")]
        track_position: Option<f32>,
    },
    #[serde(rename = "race_event")]
    RaceEvent {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(rename = "flagState")]
        flag_state: Option<String>,
        #[serde(rename = "sessionPhase")]
        session_phase: Option<String>,
        lap: Option<u32>,
        #[serde(rename = "timeRemaining")]
        time_remaining: Option<f32>,
    },
    #[serde(rename = "video_frame")]
    VideoFrame {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        image: Vec<u8>,
    },
    #[serde(rename = "relay:register")]
    RelayRegister {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
    },
    #[serde(rename = "broadcast:delay")]
    BroadcastDelay {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(rename = "delayMs")]
        delay_ms: u32,
    },
    #[serde(rename = "steward:action")]
    StewardAction {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(rename = "incidentId")]
        incident_id: String,
        action: StewardActionKind,
        #[serde(rename = "penaltyType")]
        penalty_type: Option<String>,
        #[serde(rename = "penaltyValue")]
        penalty_value: Option<f32>,
        notes: Option<String>,
        #[serde(rename = "stewardId")]
        steward_id: Option<String>,
    },
    #[serde(rename = "room:join")]
    RoomJoin {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
    },
    #[serde(rename = "room:leave")]
    RoomLeave {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StewardActionKind {
    Approve,
    Reject,
    Modify,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryCar {
    #[serde(rename = "carId")]
    pub car_id: u32,
    #[serde(rename = "driverId")]
    pub driver_id: Option<String>,
    #[serde(rename = "driverName")]
    pub driver_name: Option<String>,
    pub position: Option<u32>,
    pub lap: Option<u32>,
    pub pos: TelemetryPos,
    pub speed: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryPos {
    pub s: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyCar {
    #[serde(rename = "carId")]
    pub car_id: u32,
    pub fuel: FuelStatus,
    pub tires: Option<TireWear>,
    #[serde(rename = "tireTemps")]
    pub tire_temps: Option<TireTemps>,
    pub damage: Option<DamageStatus>,
    pub pit: Option<PitStatus>,
    #[serde(rename = "stintLap")]
    pub stint_lap: Option<u32>,
    #[serde(rename = "avgPace")]
    pub avg_pace: Option<f32>,
    pub degradation: Option<f32>,
    pub gap: Option<f32>,
}

// --- Hub -> Consumer events ---
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum ServerEvent {
    #[serde(rename = "session:active")]
    SessionActive {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(rename = "trackName")]
        track_name: String,
        #[serde(rename = "sessionType")]
        session_type: String,
    },
    #[serde(rename = "session:state")]
    SessionState {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(rename = "trackName")]
        track_name: String,
        #[serde(rename = "sessionType")]
        session_type: String,
        status: String,
    },
    #[serde(rename = "room:joined")]
    RoomJoined {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
    },
    #[serde(rename = "broadcast:delay")]
    BroadcastDelay {
        #[serde(rename = "delayMs")]
        delay_ms: u32,
    },
    #[serde(rename = "timing:update")]
    TimingUpdate {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(rename = "sessionTimeMs")]
        session_time_ms: f64,
        timing: TimingPayload,
    },
    #[serde(rename = "strategy:update")]
    StrategyUpdate {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        timestamp: f64,
        strategy: Vec<StrategyEntry>,
    },
    #[serde(rename = "car:status")]
    CarStatus(Box<CarStatusPayload>),
    #[serde(rename = "opponent:intel")]
    OpponentIntel { opponents: Vec<OpponentEntry> },
    #[serde(rename = "race:state")]
    RaceState(Box<RaceStatePayload>),
    #[serde(rename = "race:event")]
    RaceEvent(Box<RaceStatePayload>),
    #[serde(rename = "event:log")]
    EventLog {
        id: String,
        timestamp: f64,
        category: String,
        message: String,
        importance: String,
    },
    #[serde(rename = "incident:new")]
    IncidentNew(Box<IncidentPayload>),
    #[serde(rename = "video:frame")]
    VideoFrame {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        image: Vec<u8>,
        timestamp: f64,
    },
    #[serde(rename = "steward:decision")]
    StewardDecision {
        #[serde(rename = "incidentId")]
        incident_id: String,
        action: StewardActionKind,
        #[serde(rename = "penaltyType")]
        penalty_type: Option<String>,
        #[serde(rename = "penaltyValue")]
        penalty_value: Option<f32>,
        notes: Option<String>,
        #[serde(rename = "stewardId")]
        steward_id: Option<String>,
        #[serde(rename = "decidedAt")]
        decided_at: String,
    },
    #[serde(rename = "steward:action:ack")]
    StewardActionAck {
        success: bool,
        #[serde(rename = "incidentId")]
        incident_id: Option<String>,
        action: Option<StewardActionKind>,
        error: Option<String>,
    },
    #[serde(rename = "relay:viewers")]
    RelayViewers {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(rename = "viewerCount")]
        viewer_count: u32,
        #[serde(rename = "requestControls")]
        request_controls: bool,
    },
    #[serde(rename = "ack")]
    Ack {
        #[serde(rename = "originalType")]
        original_type: String,
        success: bool,
        error: Option<String>,
    },
}

impl ServerEvent {
    /// Returns the delivery priority for this event, used by the fan-out
    /// engine and the per-connection send queue.
    pub fn priority(&self) -> MessagePriority {
        match self {
            ServerEvent::TimingUpdate { .. } | ServerEvent::VideoFrame { .. } => {
                MessagePriority::Droppable
            }
            _ => MessagePriority::Critical,
        }
    }

    /// Whether this event is eligible for the session's broadcast delay.
    pub fn delayable(&self) -> bool {
        matches!(
            self,
            ServerEvent::TimingUpdate { .. }
                | ServerEvent::StrategyUpdate { .. }
                | ServerEvent::CarStatus(_)
                | ServerEvent::OpponentIntel { .. }
                | ServerEvent::RaceState(_)
                | ServerEvent::RaceEvent(_)
                | ServerEvent::IncidentNew(_)
                | ServerEvent::EventLog { .. }
                | ServerEvent::VideoFrame { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingPayload {
    pub entries: Vec<TimingEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingEntry {
    #[serde(rename = "driverId")]
    pub driver_id: CarId,
    #[serde(rename = "driverName")]
    pub driver_name: String,
    #[serde(rename = "carNumber")]
    pub car_number: String,
    pub position: Option<u32>,
    #[serde(rename = "lapNumber")]
    pub lap_number: Option<u32>,
    #[serde(rename = "lastLapTime")]
    pub last_lap_time: f32,
    #[serde(rename = "bestLapTime")]
    pub best_lap_time: f32,
    #[serde(rename = "gapToLeader")]
    pub gap_to_leader: f32,
    #[serde(rename = "lapDistPct")]
    pub lap_dist_pct: f32,
    pub speed: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyEntry {
    #[serde(rename = "carId")]
    pub car_id: CarId,
    pub strategy: StrategyState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarStatusPayload {
    #[serde(rename = "sessionId")]
    pub session_id: SessionId,
    #[serde(rename = "carId")]
    pub car_id: CarId,
    pub fuel: FuelStatusView,
    pub tires: TireWear,
    #[serde(rename = "tireTemps")]
    pub tire_temps: TireTempAverages,
    pub damage: DamageStatusView,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuelStatusView {
    pub level: f32,
    pub pct: f32,
    pub status: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TireTempAverages {
    pub fl: f32,
    pub fr: f32,
    pub rl: f32,
    pub rr: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DamageStatusView {
    pub aero: f32,
    pub engine: f32,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpponentEntry {
    #[serde(rename = "carId")]
    pub car_id: CarId,
    #[serde(rename = "driverId")]
    pub driver_id: CarId,
    #[serde(rename = "driverName")]
    pub driver_name: String,
    #[serde(rename = "carNumber")]
    pub car_number: String,
    pub position: u32,
    pub gap: Option<f32>,
    #[serde(rename = "gapTrend")]
    pub gap_trend: String,
    #[serde(rename = "threatLevel")]
    pub threat_level: String,
    #[serde(rename = "tirePhase")]
    pub tire_phase: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaceStatePayload {
    #[serde(rename = "sessionId")]
    pub session_id: SessionId,
    #[serde(rename = "flagState")]
    pub flag_state: Option<String>,
    #[serde(rename = "sessionPhase")]
    pub session_phase: Option<String>,
    pub lap: Option<u32>,
    #[serde(rename = "timeRemaining")]
    pub time_remaining: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentPayload {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: String,
    #[serde(rename = "lapNumber")]
    pub lap_number: Option<u32>,
    #[serde(rename = "sessionTimeMs")]
    pub session_time_ms: f64,
    #[serde(rename = "trackPosition")]
    pub track_position: f32,
    #[serde(rename = "cornerName")]
    pub corner_name: Option<String>,
    #[serde(rename = "involvedDrivers")]
    pub involved_drivers: Vec<InvolvedDriver>,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvolvedDriver {
    #[serde(rename = "driverId")]
    pub driver_id: String,
    #[serde(rename = "driverName")]
    pub driver_name: String,
    #[serde(rename = "carNumber")]
    pub car_number: String,
    pub role: String,
}

use crate::data::ConnectionId;
use crate::hub::Hub;
use crate::network::{ClientEvent, ServerEvent};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::timeout;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct HealthState {
    pub is_ready: Arc<RwLock<bool>>,
    pub is_healthy: Arc<RwLock<bool>>,
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            is_ready: Arc::new(RwLock::new(false)),
            is_healthy: Arc::new(RwLock::new(true)),
        }
    }

    pub async fn set_ready(&self, ready: bool) {
        *self.is_ready.write().await = ready;
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds the receiver half of a long-poll client's outbound queue between
/// poll requests. The WS path drains its receiver in a loop driven by the
/// socket; this path drains it in bursts driven by the client's next GET.
#[derive(Default)]
pub struct LongPollRegistry {
    receivers: RwLock<HashMap<ConnectionId, Mutex<mpsc::Receiver<ServerEvent>>>>,
}

impl LongPollRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    async fn register(&self, connection_id: ConnectionId, rx: mpsc::Receiver<ServerEvent>) {
        self.receivers.write().await.insert(connection_id, Mutex::new(rx));
    }

    async fn remove(&self, connection_id: ConnectionId) {
        self.receivers.write().await.remove(&connection_id);
    }

    /// Waits up to `wait` for the first queued event, then drains whatever
    /// else is immediately ready so a single poll can return a batch.
    async fn poll(&self, connection_id: ConnectionId, wait: Duration) -> Option<Vec<ServerEvent>> {
        let receivers = self.receivers.read().await;
        let rx = receivers.get(&connection_id)?;
        let mut rx = rx.lock().await;

        let mut batch = Vec::new();
        match timeout(wait, rx.recv()).await {
            Ok(Some(event)) => batch.push(event),
            Ok(None) => return Some(batch),
            Err(_) => return Some(batch),
        }
        while let Ok(event) = rx.try_recv() {
            batch.push(event);
        }
        Some(batch)
    }
}

#[derive(Clone)]
pub struct HttpState {
    pub hub: Hub,
    pub health: HealthState,
    pub long_poll: Arc<LongPollRegistry>,
    pub cors_origins: Vec<String>,
    pub long_poll_timeout: Duration,
}

#[derive(Serialize)]
struct SessionSummary {
    #[serde(rename = "sessionId")]
    session_id: String,
    #[serde(rename = "trackName")]
    track_name: String,
    #[serde(rename = "sessionType")]
    session_type: String,
    #[serde(rename = "driverCount")]
    driver_count: usize,
    #[serde(rename = "lastUpdate")]
    last_update: u64,
}

#[derive(Serialize)]
struct ConnectResponse {
    #[serde(rename = "connectionId")]
    connection_id: String,
}

async fn route(
    req: Request<Incoming>,
    state: HttpState,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let origin = req
        .headers()
        .get(hyper::header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    if req.method() == Method::OPTIONS {
        return Ok(with_cors(
            Response::builder().status(StatusCode::NO_CONTENT).body(Full::new(Bytes::new())).unwrap(),
            &state,
            origin.as_deref(),
        ));
    }

    let path = req.uri().path().to_string();
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    let response = match (req.method().clone(), segments.as_slice()) {
        (Method::GET, ["health"]) => handle_health(&state).await,
        (Method::GET, ["ready"]) => handle_ready(&state).await,
        (Method::GET, ["sessions"]) => handle_sessions(&state).await,
        (Method::POST, ["longpoll", "connect"]) => handle_longpoll_connect(&state).await,
        (Method::POST, ["longpoll", "emit", connection_id]) => {
            let connection_id = connection_id.to_string();
            handle_longpoll_emit(&state, connection_id, req).await
        }
        (Method::GET, ["longpoll", "poll", connection_id]) => {
            handle_longpoll_poll(&state, connection_id.to_string()).await
        }
        _ => not_found(),
    };

    Ok(with_cors(response, &state, origin.as_deref()))
}

fn with_cors(
    mut response: Response<Full<Bytes>>,
    state: &HttpState,
    origin: Option<&str>,
) -> Response<Full<Bytes>> {
    let allowed = match origin {
        Some(origin) if state.cors_origins.iter().any(|o| o == "*" || o == origin) => {
            if state.cors_origins.iter().any(|o| o == "*") {
                "*".to_string()
            } else {
                origin.to_string()
            }
        }
        _ if state.cors_origins.iter().any(|o| o == "*") => "*".to_string(),
        _ => return response,
    };

    let headers = response.headers_mut();
    headers.insert(
        hyper::header::ACCESS_CONTROL_ALLOW_ORIGIN,
        allowed.parse().unwrap(),
    );
    headers.insert(
        hyper::header::ACCESS_CONTROL_ALLOW_METHODS,
        "GET, POST, OPTIONS".parse().unwrap(),
    );
    headers.insert(
        hyper::header::ACCESS_CONTROL_ALLOW_HEADERS,
        "content-type".parse().unwrap(),
    );
    response
}

fn json_response(status: StatusCode, body: impl Serialize) -> Response<Full<Bytes>> {
    let bytes = serde_json::to_vec(&body).unwrap_or_default();
    Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(bytes)))
        .unwrap()
}

fn not_found() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Full::new(Bytes::from("not found")))
        .unwrap()
}

async fn handle_health(state: &HttpState) -> Response<Full<Bytes>> {
    if *state.health.is_healthy.read().await {
        json_response(StatusCode::OK, serde_json::json!({ "status": "ok" }))
    } else {
        json_response(
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({ "status": "unhealthy" }),
        )
    }
}

async fn handle_ready(state: &HttpState) -> Response<Full<Bytes>> {
    if *state.health.is_ready.read().await {
        json_response(StatusCode::OK, serde_json::json!({ "status": "ready" }))
    } else {
        json_response(
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({ "status": "not_ready" }),
        )
    }
}

async fn handle_sessions(state: &HttpState) -> Response<Full<Bytes>> {
    let now = std::time::Instant::now();
    let summaries: Vec<SessionSummary> = state
        .hub
        .sessions
        .list()
        .await
        .into_iter()
        .map(|s| SessionSummary {
            session_id: s.session_id,
            track_name: s.track_name,
            session_type: s.session_type,
            driver_count: s.drivers.len(),
            last_update: now.duration_since(s.last_update_at).as_millis() as u64,
        })
        .collect();
    json_response(StatusCode::OK, summaries)
}

async fn handle_longpoll_connect(state: &HttpState) -> Response<Full<Bytes>> {
    let connection_id = Uuid::new_v4();
    let rx = state.hub.accept_connection(connection_id).await;
    state.long_poll.register(connection_id, rx).await;
    json_response(
        StatusCode::OK,
        ConnectResponse { connection_id: connection_id.to_string() },
    )
}

async fn handle_longpoll_emit(
    state: &HttpState,
    connection_id: String,
    req: Request<Incoming>,
) -> Response<Full<Bytes>> {
    let Ok(connection_id) = Uuid::parse_str(&connection_id) else {
        return json_response(StatusCode::BAD_REQUEST, serde_json::json!({ "error": "bad connection id" }));
    };

    let body = match req.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!("failed to read long-poll emit body: {}", e);
            return json_response(StatusCode::BAD_REQUEST, serde_json::json!({ "error": "unreadable body" }));
        }
    };

    match serde_json::from_slice::<ClientEvent>(&body) {
        Ok(event) => {
            state.hub.handle_event(connection_id, event).await;
            json_response(StatusCode::ACCEPTED, serde_json::json!({ "accepted": true }))
        }
        Err(e) => json_response(
            StatusCode::BAD_REQUEST,
            serde_json::json!({ "error": format!("malformed event envelope: {e}") }),
        ),
    }
}

async fn handle_longpoll_poll(state: &HttpState, connection_id: String) -> Response<Full<Bytes>> {
    let Ok(connection_id) = Uuid::parse_str(&connection_id) else {
        return json_response(StatusCode::BAD_REQUEST, serde_json::json!({ "error": "bad connection id" }));
    };

    match state.long_poll.poll(connection_id, state.long_poll_timeout).await {
        Some(batch) => json_response(StatusCode::OK, batch),
        None => json_response(StatusCode::NOT_FOUND, serde_json::json!({ "error": "unknown connection" })),
    }
}

/// Disconnects a long-poll client from the hub and drops its queued
/// receiver. Call when a client stops polling past the configured timeout;
/// the hub itself has no way to detect that on its own since there is no
/// live socket to error out.
pub async fn disconnect_long_poll(state: &HttpState, connection_id: ConnectionId) {
    state.hub.disconnect(connection_id).await;
    state.long_poll.remove(connection_id).await;
}

pub async fn run_http_server(bind_addr: String, state: HttpState) -> Result<(), Box<dyn std::error::Error>> {
    info!("starting HTTP sidecar on {}", bind_addr);
    let listener = TcpListener::bind(&bind_addr).await?;
    info!("HTTP sidecar listening on {}", bind_addr);

    loop {
        let (stream, _) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                error!("failed to accept HTTP connection: {}", e);
                continue;
            }
        };

        let io = TokioIo::new(stream);
        let state = state.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| route(req, state.clone()));
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                error!("error serving HTTP connection: {}", err);
            }
        });
    }
}

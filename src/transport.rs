use crate::config::NetworkSettings;
use crate::hub::Hub;
use crate::network::{ClientEvent, ServerEvent};
use futures_util::{SinkExt, StreamExt};
use rustls::pki_types::CertificateDer;
use rustls::ServerConfig as TlsConfig;
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),
}

/// Tag byte distinguishing the two opaque-blob producer events that share the
/// binary WS frame path; not part of the wire contract text, just this
/// carrier's way of routing a frame without a JSON envelope around it.
const BINARY_FRAME_TELEMETRY: u8 = 0;
const BINARY_FRAME_VIDEO: u8 = 1;

/// The persistent, full-duplex carrier described in the transport contract.
/// Accepts WebSocket connections, decodes each frame into a `ClientEvent`,
/// and hands it to the hub; writes whatever the hub emits back out as JSON
/// text frames.
pub struct WsTransport {
    listener: TcpListener,
    tls_acceptor: Option<TlsAcceptor>,
    shutdown: Arc<Notify>,
}

impl WsTransport {
    pub async fn bind(network: &NetworkSettings) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(&network.ws_bind).await?;
        info!("websocket listener bound to {}", network.ws_bind);

        let tls_acceptor = match load_tls_config(&network.tls_cert_path, &network.tls_key_path) {
            Ok(config) => {
                info!("TLS configuration loaded for websocket transport");
                if network.require_tls {
                    info!("TLS mode: required");
                } else {
                    info!("TLS mode: optional, currently active");
                }
                Some(TlsAcceptor::from(Arc::new(config)))
            }
            Err(e) => {
                if network.require_tls {
                    error!("TLS required but failed to load: {}", e);
                    return Err(e);
                }
                warn!(
                    "TLS configuration unavailable ({}), accepting plaintext websocket connections",
                    e
                );
                None
            }
        };

        Ok(Self {
            listener,
            tls_acceptor,
            shutdown: Arc::new(Notify::new()),
        })
    }

    /// Accepts connections until the listener errors or shutdown is
    /// signaled. Each connection runs in its own task so one misbehaving
    /// client can't affect another.
    pub async fn run(&self, hub: Hub) {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            error!("failed to accept websocket connection: {}", e);
                            continue;
                        }
                    };

                    let hub = hub.clone();
                    let tls_acceptor = self.tls_acceptor.clone();
                    tokio::spawn(async move {
                        if let Some(acceptor) = tls_acceptor {
                            match acceptor.accept(stream).await {
                                Ok(tls_stream) => handle_connection(tls_stream, addr, hub).await,
                                Err(e) => warn!("tls handshake failed for {}: {}", addr, e),
                            }
                        } else {
                            handle_connection(stream, addr, hub).await;
                        }
                    });
                }
                _ = self.shutdown.notified() => {
                    info!("websocket transport no longer accepting new connections");
                    break;
                }
            }
        }
    }

    /// Stops the accept loop and closes every connection's outbound queue so
    /// its writer task can drain and close the socket on its own. Called on
    /// SIGINT/SIGTERM before the process exits.
    pub async fn shutdown(&self, hub: &Hub) {
        self.shutdown.notify_one();
        hub.fanout.shutdown_all().await;
    }
}

fn load_tls_config(cert_path: &str, key_path: &str) -> Result<TlsConfig, TransportError> {
    let cert_file = File::open(cert_path)?;
    let mut cert_reader = BufReader::new(cert_file);
    let certs: Vec<CertificateDer> =
        rustls_pemfile::certs(&mut cert_reader).collect::<Result<Vec<_>, _>>()?;

    if certs.is_empty() {
        return Err(TransportError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "no certificates found in cert file",
        )));
    }

    let key_file = File::open(key_path)?;
    let mut key_reader = BufReader::new(key_file);
    let key = rustls_pemfile::private_key(&mut key_reader)?.ok_or_else(|| {
        TransportError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "no private key found in key file",
        ))
    })?;

    let config = TlsConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    Ok(config)
}

async fn handle_connection<S>(stream: S, addr: SocketAddr, hub: Hub)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let ws_stream = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("websocket handshake failed for {}: {}", addr, e);
            return;
        }
    };

    let connection_id = Uuid::new_v4();
    info!(connection_id = %connection_id, %addr, "websocket connection established");

    let (mut write, mut read) = ws_stream.split();
    let mut outbound = hub.accept_connection(connection_id).await;

    let writer = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let frame = match serde_json::to_string(&event) {
                Ok(json) => Message::Text(json.into()),
                Err(e) => {
                    error!("failed to encode outbound event: {}", e);
                    continue;
                }
            };
            if write.send(frame).await.is_err() {
                break;
            }
        }
        let _ = write.close().await;
    });

    while let Some(message) = read.next().await {
        let message = match message {
            Ok(m) => m,
            Err(e) => {
                debug!(connection_id = %connection_id, "websocket read error: {}", e);
                break;
            }
        };

        match message {
            Message::Text(text) => match serde_json::from_str::<ClientEvent>(text.as_str()) {
                Ok(event) => hub.handle_event(connection_id, event).await,
                Err(e) => warn!(connection_id = %connection_id, "malformed event envelope: {}", e),
            },
            Message::Binary(data) => match decode_binary_frame(&data) {
                Some(event) => hub.handle_event(connection_id, event).await,
                None => warn!(connection_id = %connection_id, "truncated binary frame header"),
            },
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
        }
    }

    writer.abort();
    hub.disconnect(connection_id).await;
    info!(connection_id = %connection_id, "websocket connection closed");
}

/// Decodes the fixed binary-frame header: `[tag:1][sessionIdLen:u16 LE][sessionId bytes][payload]`.
fn decode_binary_frame(data: &[u8]) -> Option<ClientEvent> {
    if data.len() < 3 {
        return None;
    }
    let tag = data[0];
    let len = u16::from_le_bytes([data[1], data[2]]) as usize;
    if data.len() < 3 + len {
        return None;
    }
    let session_id = String::from_utf8(data[3..3 + len].to_vec()).ok()?;
    let payload = data[3 + len..].to_vec();

    match tag {
        BINARY_FRAME_TELEMETRY => Some(ClientEvent::TelemetryBinary { session_id, payload }),
        BINARY_FRAME_VIDEO => Some(ClientEvent::VideoFrame { session_id, image: payload }),
        _ => None,
    }
}

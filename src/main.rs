use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use telemetry_hub::config::HubConfig;
use telemetry_hub::http::{self, HealthState, HttpState, LongPollRegistry};
use telemetry_hub::hub::Hub;
use telemetry_hub::transport::WsTransport;
use tokio::time::interval;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to hub.toml configuration file
    #[arg(short, long, default_value = "./hub.toml")]
    config: String,

    /// Override log level (trace|debug|info|warn|error)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let log_level = args.log_level.as_deref().unwrap_or("info");
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    info!("starting telemetry hub");

    let config = HubConfig::load_or_default(&args.config);
    info!("configuration loaded from: {}", args.config);
    info!("websocket bind: {}", config.network.ws_bind);
    info!("http sidecar bind: {}", config.network.health_bind);
    info!("reap interval: {}ms, stale threshold: {}ms", config.server.reap_interval_ms, config.server.stale_threshold_ms);

    let health_state = HealthState::new();
    let hub = Hub::new(config.clone());

    let http_state = HttpState {
        hub: hub.clone(),
        health: health_state.clone(),
        long_poll: Arc::new(LongPollRegistry::new()),
        cors_origins: config.network.cors_origins.clone(),
        long_poll_timeout: Duration::from_millis(config.network.long_poll_timeout_ms),
    };

    let http_bind = config.network.health_bind.clone();
    tokio::spawn(async move {
        if let Err(e) = http::run_http_server(http_bind, http_state).await {
            warn!("HTTP sidecar error: {}", e);
        }
    });

    let ws_transport = match WsTransport::bind(&config.network).await {
        Ok(t) => {
            info!("websocket transport initialized");
            Arc::new(t)
        }
        Err(e) => {
            return Err(format!("failed to initialize websocket transport: {}", e).into());
        }
    };

    let transport_hub = hub.clone();
    let transport_for_run = ws_transport.clone();
    tokio::spawn(async move {
        transport_for_run.run(transport_hub).await;
    });

    let reap_hub = hub.clone();
    let reap_interval = Duration::from_millis(config.server.reap_interval_ms);
    tokio::spawn(async move {
        let mut ticker = interval(reap_interval);
        loop {
            ticker.tick().await;
            reap_hub.reap().await;
        }
    });

    health_state.set_ready(true).await;
    info!("hub is running. Press Ctrl+C to stop.");

    tokio::signal::ctrl_c().await?;

    info!("shutdown signal received");
    *health_state.is_healthy.write().await = false;
    ws_transport.shutdown(&hub).await;
    info!("websocket transport shut down");

    Ok(())
}

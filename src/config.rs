use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    pub server: ServerSettings,
    pub network: NetworkSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub reap_interval_ms: u64,
    pub stale_threshold_ms: u64,
    pub queue_bound: usize,
    pub max_delay_ms: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSettings {
    pub ws_bind: String,
    pub health_bind: String,
    pub tls_cert_path: String,
    pub tls_key_path: String,
    pub require_tls: bool,
    pub cors_origins: Vec<String>,
    pub long_poll_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    pub level: String,
    pub console_enabled: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                reap_interval_ms: 30_000,
                stale_threshold_ms: 60_000,
                queue_bound: 256,
                max_delay_ms: 60_000,
            },
            network: NetworkSettings {
                ws_bind: "0.0.0.0:9400".to_string(),
                health_bind: "0.0.0.0:9401".to_string(),
                tls_cert_path: "./certs/server.crt".to_string(),
                tls_key_path: "./certs/server.key".to_string(),
                require_tls: false,
                cors_origins: vec!["*".to_string()],
                long_poll_timeout_ms: 25_000,
            },
            logging: LoggingSettings {
                level: "info".to_string(),
                console_enabled: true,
            },
        }
    }
}

impl HubConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = fs::read_to_string(path)?;
        let mut config: HubConfig = toml::from_str(&contents)?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let mut config = Self::load(path).unwrap_or_else(|e| {
            eprintln!("Failed to load config: {}, using defaults", e);
            Self::default()
        });
        config.apply_env_overrides();
        config
    }

    /// Lets a container override individual settings without a mounted file.
    /// Matches the env var names documented alongside the config file format.
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("HUB_HOST") {
            self.network.ws_bind = override_host(&self.network.ws_bind, &host);
        }
        if let Ok(port) = std::env::var("HUB_PORT") {
            self.network.ws_bind = override_port(&self.network.ws_bind, &port);
        }
        if let Ok(origins) = std::env::var("HUB_CORS_ORIGINS") {
            self.network.cors_origins = origins.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(v) = std::env::var("HUB_REAP_INTERVAL_MS") {
            if let Ok(v) = v.parse() {
                self.server.reap_interval_ms = v;
            }
        }
        if let Ok(v) = std::env::var("HUB_STALE_THRESHOLD_MS") {
            if let Ok(v) = v.parse() {
                self.server.stale_threshold_ms = v;
            }
        }
        if let Ok(v) = std::env::var("HUB_QUEUE_BOUND") {
            if let Ok(v) = v.parse() {
                self.server.queue_bound = v;
            }
        }
        if let Ok(v) = std::env::var("HUB_MAX_DELAY_MS") {
            if let Ok(v) = v.parse() {
                self.server.max_delay_ms = v;
            }
        }
    }
}

fn override_host(bind: &str, host: &str) -> String {
    let port = bind.rsplit(':').next().unwrap_or("9400");
    format!("{}:{}", host, port)
}

fn override_port(bind: &str, port: &str) -> String {
    let host = bind.rsplit_once(':').map(|(h, _)| h).unwrap_or("0.0.0.0");
    format!("{}:{}", host, port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config = HubConfig::default();
        assert_eq!(config.server.reap_interval_ms, 30_000);
        assert_eq!(config.server.stale_threshold_ms, 60_000);
        assert_eq!(config.network.ws_bind, "0.0.0.0:9400");
        assert!(!config.network.require_tls);
    }

    #[test]
    fn config_round_trips_through_toml() {
        let config = HubConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        assert!(toml_str.contains("reap_interval_ms"));
        assert!(toml_str.contains("ws_bind"));
        let parsed: HubConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.server.queue_bound, config.server.queue_bound);
    }

    #[test]
    fn override_host_preserves_port() {
        assert_eq!(override_host("0.0.0.0:9400", "127.0.0.1"), "127.0.0.1:9400");
    }

    #[test]
    fn override_port_preserves_host() {
        assert_eq!(override_port("0.0.0.0:9400", "7000"), "0.0.0.0:7000");
    }

    #[test]
    fn load_falls_back_to_default_on_missing_file() {
        let config = HubConfig::load_or_default("/tmp/definitely-not-a-real-hub-config.toml");
        assert_eq!(config.server.reap_interval_ms, 30_000);
    }
}

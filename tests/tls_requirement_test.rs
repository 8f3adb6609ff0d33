use std::fs;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::sleep;

fn config_toml(ws_bind: &str, health_bind: &str, require_tls: bool) -> String {
    format!(
        r#"
[server]
reap_interval_ms = 30000
stale_threshold_ms = 60000
queue_bound = 256
max_delay_ms = 60000

[network]
ws_bind = "{ws_bind}"
health_bind = "{health_bind}"
tls_cert_path = "/tmp/nonexistent/hub.crt"
tls_key_path = "/tmp/nonexistent/hub.key"
require_tls = {require_tls}
cors_origins = ["*"]
long_poll_timeout_ms = 25000

[logging]
level = "info"
console_enabled = true
"#
    )
}

/// Starts the already-built binary directly rather than `cargo run`, so the
/// test doesn't pay (or wait out) a compile on every invocation.
fn spawn_hub(config_path: &PathBuf) -> std::process::Child {
    Command::new(env!("CARGO_BIN_EXE_telemetry-hub"))
        .args(["--config", config_path.to_str().unwrap()])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to start hub binary")
}

#[tokio::test]
async fn hub_starts_without_tls_when_not_required() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let config_path = temp_dir.path().join("hub.toml");
    fs::write(&config_path, config_toml("127.0.0.1:19100", "127.0.0.1:19101", false))
        .expect("failed to write config");

    let mut child = spawn_hub(&config_path);
    sleep(Duration::from_secs(2)).await;

    let status = child.try_wait();
    assert!(status.is_ok() && status.unwrap().is_none(), "hub should still be running");

    let _ = child.kill();
    let _ = child.wait();
}

#[tokio::test]
async fn hub_fails_to_bind_when_tls_required_and_certs_missing() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let config_path = temp_dir.path().join("hub.toml");
    fs::write(&config_path, config_toml("127.0.0.1:19200", "127.0.0.1:19201", true))
        .expect("failed to write config");

    let mut child = spawn_hub(&config_path);
    sleep(Duration::from_secs(2)).await;

    let status = child.try_wait();
    assert!(
        status.is_ok() && status.unwrap().is_some(),
        "hub should exit when TLS is required but certificates are missing"
    );

    let _ = child.kill();
    let _ = child.wait();
}

#[tokio::test]
async fn hub_starts_with_tls_when_required_and_certs_exist() {
    let cert_path = PathBuf::from("./certs/hub.crt");
    let key_path = PathBuf::from("./certs/hub.key");
    if !cert_path.exists() || !key_path.exists() {
        println!("skipping: no certificates found at ./certs/");
        return;
    }

    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let config_path = temp_dir.path().join("hub.toml");
    let config = config_toml("127.0.0.1:19300", "127.0.0.1:19301", true)
        .replace("/tmp/nonexistent/hub.crt", "./certs/hub.crt")
        .replace("/tmp/nonexistent/hub.key", "./certs/hub.key");
    fs::write(&config_path, config).expect("failed to write config");

    let mut child = spawn_hub(&config_path);
    sleep(Duration::from_secs(2)).await;

    let status = child.try_wait();
    assert!(
        status.is_ok() && status.unwrap().is_none(),
        "hub should be running when TLS is required and valid certificates exist"
    );

    let _ = child.kill();
    let _ = child.wait();
}

#[tokio::test]
async fn hub_logs_tls_mode_on_startup() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let config_path = temp_dir.path().join("hub.toml");
    fs::write(&config_path, config_toml("127.0.0.1:19400", "127.0.0.1:19401", false))
        .expect("failed to write config");

    let mut child = spawn_hub(&config_path);
    sleep(Duration::from_secs(2)).await;

    let _ = child.kill();
    let output = child.wait_with_output().expect("failed to collect output");
    let combined = format!(
        "{}\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );

    assert!(
        combined.contains("TLS") || combined.contains("websocket"),
        "startup logs should mention TLS/transport state, got:\n{combined}"
    );
}

use std::net::TcpListener;
use std::path::Path;
use std::time::Duration;

use reqwest::Client;
use tempfile::TempDir;
use tokio::time::{sleep, timeout};

/// Find an available port
fn get_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Write a minimal valid config into `dir` and return its path.
fn write_minimal_config(dir: &TempDir, port: u16) -> std::path::PathBuf {
    let db_path = dir.path().join("viewrelay.db");
    let config = format!(
        r#"
[server]
host = "127.0.0.1"
port = {}

[database]
path = "{}"

[dispatch]
workers = 2
poll_interval_ms = 50
"#,
        port,
        db_path.display()
    );
    let path = dir.path().join("config.toml");
    std::fs::write(&path, config).unwrap();
    path
}

/// Spawn the server and return a handle
fn spawn_server(config_path: &Path) -> tokio::process::Child {
    tokio::process::Command::new(env!("CARGO_BIN_EXE_viewrelay"))
        .env("VIEWRELAY_CONFIG", config_path)
        .env("RUST_LOG", "error")
        .kill_on_drop(true)
        .spawn()
        .expect("Failed to spawn server")
}

/// Wait for server to be ready
async fn wait_for_server(port: u16, max_attempts: u32) -> bool {
    let client = Client::new();
    for _ in 0..max_attempts {
        if client
            .get(format!("http://127.0.0.1:{}/api/v1/health", port))
            .send()
            .await
            .is_ok()
        {
            return true;
        }
        sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn test_health_endpoint() {
    let dir = TempDir::new().unwrap();
    let port = get_available_port();
    let config_path = write_minimal_config(&dir, port);

    let mut server = spawn_server(&config_path);
    assert!(wait_for_server(port, 100).await, "Server did not start in time");

    let response = Client::new()
        .get(format!("http://127.0.0.1:{}/api/v1/health", port))
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());

    let json: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(json["status"], "ok");

    server.kill().await.ok();
}

#[tokio::test]
async fn test_status_shows_running_dispatcher_with_clips_disabled() {
    let dir = TempDir::new().unwrap();
    let port = get_available_port();
    let config_path = write_minimal_config(&dir, port);

    let mut server = spawn_server(&config_path);
    assert!(wait_for_server(port, 100).await, "Server did not start in time");

    let json: serde_json::Value = Client::new()
        .get(format!("http://127.0.0.1:{}/api/v1/status", port))
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse JSON");

    assert_eq!(json["dispatcher"]["running"], true);
    assert_eq!(json["dispatcher"]["workers"], 2);
    // No automation backend ships with the binary.
    assert_eq!(json["clip_enabled"], false);
    assert_eq!(json["orders"]["by_status"]["pending"], 0);

    server.kill().await.ok();
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let dir = TempDir::new().unwrap();
    let port = get_available_port();
    let config_path = write_minimal_config(&dir, port);

    let mut server = spawn_server(&config_path);
    assert!(wait_for_server(port, 100).await, "Server did not start in time");

    let text = Client::new()
        .get(format!("http://127.0.0.1:{}/metrics", port))
        .send()
        .await
        .expect("Failed to send request")
        .text()
        .await
        .unwrap();

    assert!(text.contains("viewrelay_dispatcher_running 1"));
    assert!(text.contains("viewrelay_http_requests_total"));

    server.kill().await.ok();
}

#[tokio::test]
async fn test_missing_config_file_exits_with_error() {
    let status = timeout(
        Duration::from_secs(10),
        tokio::process::Command::new(env!("CARGO_BIN_EXE_viewrelay"))
            .env("VIEWRELAY_CONFIG", "/nonexistent/viewrelay.toml")
            .env("RUST_LOG", "error")
            .status(),
    )
    .await
    .expect("Server did not exit in time")
    .expect("Failed to run server");

    assert!(!status.success());
}

#[tokio::test]
async fn test_invalid_config_exits_with_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        format!(
            "[database]\npath = \"{}\"\n\n[automation]\npool_capacity = 0\n",
            dir.path().join("viewrelay.db").display()
        ),
    )
    .unwrap();

    let status = timeout(
        Duration::from_secs(10),
        tokio::process::Command::new(env!("CARGO_BIN_EXE_viewrelay"))
            .env("VIEWRELAY_CONFIG", &path)
            .env("RUST_LOG", "error")
            .status(),
    )
    .await
    .expect("Server did not exit in time")
    .expect("Failed to run server");

    assert!(!status.success());
}

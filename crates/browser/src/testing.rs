//! Shared fixtures for driver-backed tests.

use keepsync_core::config::DriverConfig;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::driver::DriverManager;

/// A driver pointed at `server`, with a placeholder browser binary and a
/// scratch user-data dir. Keep the `TempDir` alive for the test.
pub(crate) fn driver_for(server: &MockServer) -> (Arc<DriverManager>, TempDir) {
    let dirs = TempDir::new().unwrap();
    let browser = dirs.path().join("chrome-for-testing");
    std::fs::write(&browser, b"").unwrap();
    let config = DriverConfig {
        host: "127.0.0.1".to_string(),
        port: server.address().port(),
        browser_path: Some(browser),
        stray_processes: Vec::new(),
        startup_attempts: 2,
        startup_interval_ms: 10,
        ..Default::default()
    };
    let data_dir = dirs.path().join("chrome");
    std::fs::create_dir_all(&data_dir).unwrap();
    (Arc::new(DriverManager::new(config, data_dir)), dirs)
}

/// `/status` ready, `/sessions` empty.
pub(crate) async fn mount_driver(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "value": { "ready": true } })),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": [] })))
        .mount(server)
        .await;
}

/// Session creation answering `id`, plus navigation and deletion for it.
pub(crate) async fn mount_session(server: &MockServer, id: &str) {
    Mock::given(method("POST"))
        .and(path("/session"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": { "sessionId": id, "capabilities": {} }
        })))
        .mount(server)
        .await;
    mount_session_routes(server, id).await;
}

pub(crate) async fn mount_session_routes(server: &MockServer, id: &str) {
    Mock::given(method("POST"))
        .and(path(format!("/session/{}/url", id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": null })))
        .mount(server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(format!("/session/{}", id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": null })))
        .mount(server)
        .await;
}

//! Server Startup Tests
//!
//! Tests for server lifecycle, configuration loading, and the HTTP surface.
//! These tests verify that the router serves correctly with a minimal config.

use std::net::TcpListener;
use std::time::Duration;

use axum::{
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use serde_json::Value;
use tower::util::ServiceExt;

use heygen_gateway::{Gateway, ServerConfig, routes, state::AppState};

/// Helper function to create a minimal test configuration
fn create_minimal_config(port: u16) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.host = "127.0.0.1".to_string();
    config.port = port;
    config.upstream_url = "ws://127.0.0.1:9/v1/streaming".to_string();
    config
}

/// Find an available port for testing
fn find_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

async fn get_json(app: axum::Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

/// Test that the server can start with minimal configuration (no API key)
#[tokio::test]
async fn test_minimal_config_boot() {
    let config = create_minimal_config(find_available_port());
    let app_state = AppState::new(config).await;

    let app = routes::api::create_api_router().with_state(app_state);
    let (status, body) = get_json(app, "/").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!({ "status": "ok" }));
}

#[tokio::test]
async fn test_health_reports_sessions_and_timestamp() {
    let app_state = AppState::new(create_minimal_config(find_available_port())).await;
    let app = Gateway::new(app_state).router();

    let (status, body) = get_json(app, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "OK");
    assert_eq!(body["active_sessions"], 0);
    let timestamp = body["timestamp"].as_str().unwrap();
    assert!(timestamp.contains('T') && timestamp.ends_with('Z'));
}

#[tokio::test]
async fn test_sessions_snapshot_starts_empty() {
    let app_state = AppState::new(create_minimal_config(find_available_port())).await;
    let app = Gateway::new(app_state).router();

    let (status, body) = get_json(app, "/sessions").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sessions"], serde_json::json!([]));
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let app_state = AppState::new(create_minimal_config(find_available_port())).await;
    let app = Gateway::new(app_state).router();

    let request = Request::builder()
        .uri("/realtime")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

/// Test that CORS configuration is applied correctly
#[tokio::test]
async fn test_cors_configurations() {
    let mut config = create_minimal_config(find_available_port());
    config.cors_allowed_origins = Some("https://app.example".to_string());
    let app = Gateway::new(AppState::new(config).await).router();

    let request = Request::builder()
        .uri("/health")
        .header("origin", "https://app.example")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "https://app.example"
    );

    let mut config = create_minimal_config(find_available_port());
    config.cors_allowed_origins = Some("*".to_string());
    let app = Gateway::new(AppState::new(config).await).router();

    let request = Request::builder()
        .uri("/")
        .header("origin", "https://anywhere.example")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
}

/// Graceful shutdown with no sessions returns promptly
#[tokio::test]
async fn test_serve_stops_on_signal() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let app_state = AppState::new(create_minimal_config(0)).await;
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let server = tokio::spawn(Gateway::new(app_state).serve(listener, async move {
        let _ = rx.await;
    }));

    tx.send(()).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server did not stop")
        .unwrap();
    assert!(result.is_ok());
}

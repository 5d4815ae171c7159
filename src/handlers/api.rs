use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::core::registry::SessionSummary;
use crate::state::AppState;

/// Health check endpoint
///
/// Returns `{"status": "ok"}` whenever the server is accepting requests.
pub async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Detailed health response
#[derive(Debug, Serialize)]
pub struct HealthDetails {
    pub status: &'static str,
    /// RFC 3339
    pub timestamp: String,
    pub active_sessions: usize,
    pub websocket_connections: usize,
    pub uptime_secs: u64,
}

/// Health endpoint with session counts
pub async fn health_details(State(state): State<Arc<AppState>>) -> Json<HealthDetails> {
    Json(HealthDetails {
        status: "OK",
        timestamp: OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default(),
        active_sessions: state.registry.len(),
        websocket_connections: state.ws_connection_count(),
        uptime_secs: state.uptime().as_secs(),
    })
}

#[derive(Debug, Serialize)]
pub struct SessionList {
    pub sessions: Vec<SessionSummary>,
}

/// Snapshot of active sessions in registration order
pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<SessionList> {
    Json(SessionList {
        sessions: state.registry.list(),
    })
}

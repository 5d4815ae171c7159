//! HeyGen relay WebSocket handler
//!
//! Upgrades the client connection and hands it to the gateway, which pairs it
//! with an upstream connection for the lifetime of the socket.

use axum::{
    Extension,
    extract::{
        State,
        ws::{WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use std::sync::Arc;
use tracing::{debug, info};

use super::socket::client_transport;
use crate::gateway;
use crate::state::{AppState, ConnectionPermit};

/// HeyGen relay WebSocket handler
///
/// When a client subprotocol is configured it is offered back to clients
/// that request it; clients that don't are closed with 1002 after the upgrade.
///
/// # Arguments
/// * `ws` - The WebSocket upgrade request from Axum
/// * `state` - Application state
/// * `permit` - Connection slot reserved by the connection limit middleware
pub async fn heygen_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    permit: Option<Extension<ConnectionPermit>>,
) -> Response {
    let permit = permit.map(|Extension(permit)| permit);
    info!(
        ip = ?permit.as_ref().map(ConnectionPermit::ip),
        "HeyGen WebSocket connection upgrade requested"
    );

    let max_message_size = state.config.relay_max_message_bytes;
    let mut ws = ws
        .max_frame_size(max_message_size)
        .max_message_size(max_message_size);
    if let Some(protocol) = &state.config.client_subprotocol {
        ws = ws.protocols([protocol.clone()]);
    }

    ws.on_upgrade(move |socket| handle_heygen_socket(socket, state, permit))
}

async fn handle_heygen_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    permit: Option<ConnectionPermit>,
) {
    let selected = socket
        .protocol()
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    let cause = gateway::accept_client(&state, client_transport(socket), selected.as_deref()).await;

    debug!(
        ip = ?permit.as_ref().map(ConnectionPermit::ip),
        cause = %cause,
        "HeyGen WebSocket connection finished"
    );
    // Releases the connection slot.
    drop(permit);
}

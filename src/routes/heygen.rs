//! HeyGen relay WebSocket route configuration

use axum::{Router, middleware, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::heygen_ws_handler;
use crate::middleware::connection_limit_middleware;
use crate::state::AppState;
use std::sync::Arc;

/// Create the HeyGen relay router
///
/// # Endpoint
///
/// `GET /ws/heygen` - WebSocket upgrade. Text and binary frames are relayed
/// unchanged to and from the upstream service.
///
/// # Close codes
///
/// - `1000` normal closure (either side closed, idle timeout, lifetime limit)
/// - `1001` gateway shutting down
/// - `1002` required subprotocol missing
/// - `1011` upstream unreachable or upstream transport failure
/// - `1013` slow consumer
///
/// Upgrades beyond the configured connection limits are refused with 503
/// (global) or 429 (per IP) before the handshake.
pub fn create_heygen_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/ws/heygen", get(heygen_ws_handler))
        .route_layer(middleware::from_fn_with_state(
            state,
            connection_limit_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}

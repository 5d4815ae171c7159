use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::api;
use crate::state::AppState;
use std::sync::Arc;

/// Create the public HTTP router: liveness, health details and the session
/// snapshot.
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(api::health_check))
        .route("/health", get(api::health_details))
        .route("/sessions", get(api::list_sessions))
        .layer(TraceLayer::new_for_http())
}

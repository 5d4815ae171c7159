//! Gateway entry point
//!
//! Builds the HTTP router, admits WebSocket clients into sessions and owns the
//! process-wide shutdown hook.

use axum::Router;
use axum::http::{
    HeaderName, HeaderValue, Method,
    header::{AUTHORIZATION, CONTENT_TYPE, SEC_WEBSOCKET_PROTOCOL},
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::{debug, info, warn};

use crate::core::session::{CloseCause, Session};
use crate::core::transport::Transport;
use crate::errors::{RegistryError, SessionError};
use crate::routes;
use crate::state::AppState;

/// Check the client's negotiated subprotocol against the configured one.
///
/// With no subprotocol configured every handshake is accepted.
pub fn validate_handshake(
    selected: Option<&str>,
    required: Option<&str>,
) -> Result<(), SessionError> {
    match (required, selected) {
        (None, _) => Ok(()),
        (Some(required), Some(selected)) if required == selected => Ok(()),
        (Some(required), _) => Err(SessionError::Protocol(format!(
            "client must request subprotocol '{required}'"
        ))),
    }
}

/// Run one client connection to completion.
///
/// Handshake failures close the client with 1002 and clients arriving after
/// the shutdown sweep are closed with 1001. Neither propagates further.
pub async fn accept_client(
    state: &AppState,
    client: Transport,
    selected_protocol: Option<&str>,
) -> CloseCause {
    let session_config = state.config.session_config();

    if let Err(error) =
        validate_handshake(selected_protocol, state.config.client_subprotocol.as_deref())
    {
        warn!(error = %error, "Rejecting WebSocket client");
        return reject(client, CloseCause::Failed(error), session_config.cancel_grace).await;
    }

    let session = match Session::new(&state.registry, session_config.clone()) {
        Ok(session) => session,
        Err(RegistryError::ShuttingDown) => {
            debug!("Rejecting WebSocket client during shutdown");
            return reject(client, CloseCause::Shutdown, session_config.cancel_grace).await;
        }
    };

    session
        .run(client, state.connector.as_ref(), &state.config.upstream_url)
        .await
}

async fn reject(mut client: Transport, cause: CloseCause, grace: Duration) -> CloseCause {
    if tokio::time::timeout(grace, client.close(Some(cause.client_close())))
        .await
        .is_err()
    {
        warn!("Timed out closing rejected client");
    }
    cause
}

/// The gateway process: router, listener and shutdown hook.
#[derive(Clone)]
pub struct Gateway {
    state: Arc<AppState>,
}

impl Gateway {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Build the full HTTP router, state applied.
    pub fn router(&self) -> Router {
        let security_headers = tower::ServiceBuilder::new()
            .layer(SetResponseHeaderLayer::overriding(
                axum::http::header::X_CONTENT_TYPE_OPTIONS,
                HeaderValue::from_static("nosniff"),
            ))
            .layer(SetResponseHeaderLayer::overriding(
                axum::http::header::X_FRAME_OPTIONS,
                HeaderValue::from_static("DENY"),
            ));

        routes::api::create_api_router()
            .merge(routes::heygen::create_heygen_router(self.state.clone()))
            .with_state(self.state.clone())
            .layer(cors_layer(self.state.config.cors_allowed_origins.as_deref()))
            .layer(security_headers)
    }

    /// Serve on `listener` until `signal` resolves, then sweep every session
    /// before the listener stops.
    pub async fn serve<F>(self, listener: TcpListener, signal: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.router();
        let gateway = self.clone();

        if let Ok(addr) = listener.local_addr() {
            info!(address = %addr, "Gateway listening");
        }

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            signal.await;
            gateway.shutdown().await;
        })
        .await
    }

    /// Close every live session with 1001 and wait up to the configured
    /// grace period for them to finish. Returns how many were signalled.
    pub async fn shutdown(&self) -> usize {
        let signalled = self.state.registry.shutdown_all();
        info!(sessions = signalled, "Shutting down gateway");

        if !self.state.registry.drain(self.state.config.shutdown_grace()).await {
            warn!(
                remaining = self.state.registry.len(),
                "Sessions still open after shutdown grace period"
            );
        }
        signalled
    }
}

fn cors_layer(origins: Option<&str>) -> CorsLayer {
    let methods = [Method::GET, Method::OPTIONS];
    let headers = [
        AUTHORIZATION,
        CONTENT_TYPE,
        SEC_WEBSOCKET_PROTOCOL,
        HeaderName::from_static("x-api-key"),
    ];

    match origins {
        Some("*") => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(headers)
            .allow_credentials(false),
        Some(origins) => {
            let origins: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(methods)
                .allow_headers(headers)
                .allow_credentials(true)
        }
        None => {
            info!(
                "CORS not configured, defaulting to same-origin only. \
                 Set CORS_ALLOWED_ORIGINS to enable cross-origin access."
            );
            // No allow_origin: browsers block cross-origin requests.
            CorsLayer::new()
                .allow_methods(methods)
                .allow_headers(headers)
                .allow_credentials(false)
        }
    }
}

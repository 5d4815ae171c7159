pub mod base;
pub mod retry;
pub mod websocket;

pub use base::{BoxedConnector, ConnectionState, UpstreamConnector, UpstreamHandle, UpstreamStatus};
pub use retry::{RetryPolicy, UpstreamConnection};
pub use websocket::{DEFAULT_API_KEY_HEADER, WebSocketConnector, validate_target};

//! HTTP and WebSocket request handlers
//!
//! - `api` - Health and session introspection endpoints
//! - `heygen` - Client WebSocket relayed to the streaming-avatar upstream

pub mod api;
pub mod heygen;

pub use heygen::heygen_ws_handler;

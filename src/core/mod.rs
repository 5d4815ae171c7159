pub mod message;
pub mod registry;
pub mod session;
pub mod transport;
pub mod upstream;

pub use message::{CloseReason, Outbound, RelayMessage, close_code};
pub use registry::{Registration, SessionHandle, SessionRegistry, SessionSummary};
pub use session::{CloseCause, Session, SessionConfig, SessionState};
pub use transport::{FrameSink, FrameSource, Transport, TransportPeer, in_memory};
pub use upstream::{
    BoxedConnector, ConnectionState, RetryPolicy, UpstreamConnection, UpstreamConnector,
    UpstreamHandle, UpstreamStatus, WebSocketConnector,
};

mod handler;
mod socket;

pub use handler::heygen_ws_handler;
pub use socket::client_transport;

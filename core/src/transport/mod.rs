// Transport module — WebSocket links and HTTP discovery

pub mod discovery;
pub mod link;
pub mod websocket;

pub use discovery::{bootstrap, fetch_node_list, BootstrapReport, DEFAULT_DISCOVERY_TIMEOUT};
pub use link::{spawn, Link, LinkCommand, LinkEvent, LinkEvents, LinkId, Transport};
pub use websocket::{connect, dial};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("Connection timed out")]
    Timeout,
    #[error("Link closed")]
    Closed,
    #[error("WebSocket error: {0}")]
    WebSocket(String),
    #[error("HTTP error: {0}")]
    Http(String),
}

//! Relay mesh
//!
//! Relays gossip their node lists, hold one link to every other relay, and
//! route client messages to the relay responsible for the recipient.

pub mod http;
pub mod link;
pub mod server;
pub mod session;

pub use link::{announced_node, ServerLink, ServerLinks};
pub use server::{
    Delivery, RelayHandle, RelayServer, RelayServerConfig, RelayServerStats,
    DEFAULT_RECONNECT_INTERVAL,
};
pub use session::{ClientSession, ClientSessions};

use crate::store::{NodeAddress, StoreError};
use crate::transport::TransportError;
use std::net::SocketAddr;
use thiserror::Error;

/// Relay error types
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Could not bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("No relay is responsible for the recipient")]
    NoResidence,
    #[error("Relay {0} is unreachable")]
    NodeUnreachable(NodeAddress),
    #[error("Client {0} already has a session")]
    DuplicateSession(String),
    #[error("Invalid client identity {0}")]
    InvalidIdentity(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

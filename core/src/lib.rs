// Mesh Core — relay mesh and end-to-end sealed messaging
//
// Relays gossip a node set, place every client identity on a hash ring,
// and carry sealed messages to the relay the recipient resides on. Relays
// never see plaintext.

pub mod client;
pub mod crypto;
pub mod identity;
pub mod message;
pub mod relay;
pub mod routing;
pub mod store;
pub mod transport;

pub use client::{ClientConfig, ClientError, ClientEvent, ClientEvents, ClientState, MeshClient};
pub use crypto::{open, seal, CryptoError, SharedSecret};
pub use identity::{IdentityError, IdentityKeys, IdentityManager, IdentityStore};
pub use message::{Frame, FrameError, Message, Whoami};
pub use relay::{RelayError, RelayHandle, RelayServer, RelayServerConfig, RelayServerStats};
pub use routing::{residence, ring_hash};
pub use store::{NodeAddress, NodeSet, StoreError};
pub use transport::{BootstrapReport, TransportError};

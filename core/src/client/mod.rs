//! Mesh Client — finds its relay on the ring and exchanges sealed messages
//!
//! State machine:
//! `KeyLoaded` → `Discovering` → `Connected(relay)` → `Disconnected`.
//! A disconnected client stays disconnected; reconnecting means building a
//! new client.

use crate::crypto::{self, CryptoError};
use crate::identity::{IdentityError, IdentityKeys};
use crate::message::{Frame, Message, Whoami};
use crate::routing::residence;
use crate::store::{NodeAddress, NodeSet};
use crate::transport::{self, Link, LinkEvent, LinkEvents, TransportError, DEFAULT_DISCOVERY_TIMEOUT};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Mesh client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How long bootstrap waits for seeds
    pub discovery_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
        }
    }
}

/// Connection state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientState {
    /// Identity loaded, nothing asked yet
    KeyLoaded,
    /// Asking seeds for the node set
    Discovering,
    /// Attached to the relay our identity resides on
    Connected(NodeAddress),
    /// The relay link is gone
    Disconnected,
}

/// What the client reports to the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The node set grew
    Discover(NodeSet),
    /// A message for us, decrypted
    Message {
        id: String,
        from: String,
        text: String,
        time_sent: u64,
    },
    /// `from` acknowledged our message `id`
    Ack { id: String, from: String },
    /// A message for us could not be decrypted
    DeliveryFault {
        id: String,
        from: String,
        reason: String,
    },
    /// The relay link closed
    Disconnected,
}

pub type ClientEvents = mpsc::UnboundedReceiver<ClientEvent>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("No relay known for this identity")]
    NoResidence,
    #[error("Not connected to a relay")]
    NotConnected,
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

struct ClientInner {
    keys: IdentityKeys,
    public_key: String,
    config: ClientConfig,
    state: RwLock<ClientState>,
    nodes: RwLock<NodeSet>,
    link: RwLock<Option<Link>>,
    events: mpsc::UnboundedSender<ClientEvent>,
}

/// A client of the relay mesh. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MeshClient {
    inner: Arc<ClientInner>,
}

impl MeshClient {
    pub fn new(keys: IdentityKeys, config: ClientConfig) -> (Self, ClientEvents) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let public_key = keys.public_key_base58();

        let client = Self {
            inner: Arc::new(ClientInner {
                keys,
                public_key,
                config,
                state: RwLock::new(ClientState::KeyLoaded),
                nodes: RwLock::new(NodeSet::new()),
                link: RwLock::new(None),
                events: events_tx,
            }),
        };
        (client, events_rx)
    }

    pub fn public_key(&self) -> &str {
        &self.inner.public_key
    }

    pub fn state(&self) -> ClientState {
        self.inner.state.read().clone()
    }

    pub fn nodes(&self) -> NodeSet {
        self.inner.nodes.read().clone()
    }

    /// Relay our identity resides on, given the nodes known so far
    pub fn residence(&self) -> Option<NodeAddress> {
        residence(&self.inner.public_key, &self.inner.nodes.read())
    }

    /// Learn the node set from a newline-separated seed list.
    ///
    /// Returns the relay our identity resides on.
    pub async fn bootstrap(&self, seed_list: &str) -> Result<NodeAddress, ClientError> {
        let seeds = NodeSet::decode(seed_list);
        self.merge_nodes(&seeds);
        *self.inner.state.write() = ClientState::Discovering;

        let client = self.clone();
        let report = transport::bootstrap(&seeds, self.inner.config.discovery_timeout, move |_, list| {
            if client.merge_nodes(&list) {
                client.emit(ClientEvent::Discover(client.nodes()));
            }
        })
        .await;
        tracing::debug!(
            "Discovery: {}/{} seeds answered, {} nodes known",
            report.responded,
            report.seeds,
            self.nodes().len()
        );

        self.residence().ok_or(ClientError::NoResidence)
    }

    /// Connect to our residence relay and announce ourselves
    pub async fn connect(&self) -> Result<NodeAddress, ClientError> {
        let relay = self.residence().ok_or(ClientError::NoResidence)?;
        let stream = transport::connect(&relay).await?;
        let (link, events) = transport::spawn(stream);
        self.attach(relay.clone(), link, events)?;
        Ok(relay)
    }

    /// Take over an open link to `relay`: announce our identity and start
    /// the receive loop.
    pub fn attach(&self, relay: NodeAddress, link: Link, events: LinkEvents) -> Result<(), ClientError> {
        link.send(&Frame::Whoami(Whoami::Client {
            public_key: self.inner.public_key.clone(),
        }))?;

        *self.inner.link.write() = Some(link);
        tracing::info!("Attached to relay {}", relay);
        *self.inner.state.write() = ClientState::Connected(relay);

        tokio::spawn(self.clone().receive_loop(events));
        Ok(())
    }

    /// Seal `plaintext` for `to` and hand it to our relay.
    ///
    /// Returns the message id; an ack, if requested, carries the same id.
    pub fn send(&self, to: &str, plaintext: &str, requires_ack: bool) -> Result<String, ClientError> {
        let link = self.inner.link.read().clone().ok_or(ClientError::NotConnected)?;

        let secret = self.inner.keys.shared_secret(to)?;
        let content = crypto::seal_str(secret.as_bytes(), plaintext)?;
        let msg = Message::new(&self.inner.public_key, to, content, requires_ack);
        let id = msg.id.clone();

        link.send(&Frame::Send(msg))?;
        Ok(id)
    }

    /// Close the relay link
    pub fn disconnect(&self) {
        if let Some(link) = self.inner.link.read().as_ref() {
            link.close();
        }
    }

    fn merge_nodes(&self, list: &NodeSet) -> bool {
        self.inner.nodes.write().merge(list)
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.inner.events.send(event);
    }

    async fn receive_loop(self, mut events: LinkEvents) {
        while let Some(event) = events.recv().await {
            match event {
                LinkEvent::Frame(Frame::Discover { list }) => {
                    if self.merge_nodes(&NodeSet::decode(&list)) {
                        self.emit(ClientEvent::Discover(self.nodes()));
                    }
                }
                LinkEvent::Frame(Frame::Receive(msg)) => self.handle_receive(msg),
                LinkEvent::Frame(other) => {
                    tracing::warn!("Unexpected {} frame from relay", other.event_name());
                }
                LinkEvent::Opened => {}
                LinkEvent::Closed => break,
            }
        }

        self.inner.link.write().take();
        *self.inner.state.write() = ClientState::Disconnected;
        tracing::info!("Relay link closed");
        self.emit(ClientEvent::Disconnected);
    }

    fn handle_receive(&self, msg: Message) {
        if msg.to != self.inner.public_key {
            tracing::warn!("Dropping message addressed to someone else");
            return;
        }

        let opened = self
            .inner
            .keys
            .shared_secret(&msg.from)
            .map_err(|e| e.to_string())
            .and_then(|secret| {
                crypto::open_str(secret.as_bytes(), &msg.content)
                    .map(|text| (secret, text))
                    .map_err(|e| e.to_string())
            });

        let (secret, text) = match opened {
            Ok(opened) => opened,
            Err(reason) => {
                tracing::warn!("Could not open message {}: {}", msg.id, reason);
                self.emit(ClientEvent::DeliveryFault {
                    id: msg.id,
                    from: msg.from,
                    reason,
                });
                return;
            }
        };

        if msg.is_ack {
            self.emit(ClientEvent::Ack {
                id: text,
                from: msg.from,
            });
            return;
        }

        if msg.requires_ack {
            match crypto::seal_str(secret.as_bytes(), &msg.id) {
                Ok(sealed_id) => {
                    let ack = Message::ack_for(&msg, sealed_id);
                    if let Some(link) = self.inner.link.read().as_ref() {
                        if let Err(e) = link.send(&Frame::Send(ack)) {
                            tracing::debug!("Ack for {} not sent: {}", msg.id, e);
                        }
                    }
                }
                Err(e) => tracing::warn!("Could not seal ack for {}: {}", msg.id, e),
            }
        }

        self.emit(ClientEvent::Message {
            id: msg.id,
            from: msg.from,
            text,
            time_sent: msg.time_sent,
        });
    }
}

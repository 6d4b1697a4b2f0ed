//! Relay Server — joins the relay mesh, owns client sessions and queues
//!
//! Every relay runs the same loop: learn the node set from seeds, keep one
//! link to every other relay, and route each client message to the relay
//! the hash ring assigns its recipient to. Messages for identities that are
//! offline wait in that relay's queue until the identity attaches.

use super::http;
use super::link::{announced_node, ServerLinks};
use super::session::{preview, short_key, ClientSessions};
use super::RelayError;
use crate::identity::is_valid_public_key;
use crate::message::{Frame, Message, Whoami};
use crate::routing::{residence, LinkDecision};
use crate::store::{NodeAddress, NodeSet, RelayStore, StateFile, DEFAULT_MAX_QUEUED_PER_IDENTITY};
use crate::transport::{bootstrap, dial, Link, LinkEvent, LinkEvents, LinkId, DEFAULT_DISCOVERY_TIMEOUT};
use parking_lot::{Mutex, RwLock};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Default period between attempts to reach nodes without a link
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(10);

/// Relay server configuration
#[derive(Debug, Clone)]
pub struct RelayServerConfig {
    /// This relay's own `host:port`, as other relays should dial it
    pub node: NodeAddress,
    /// Listen address (defaults to `0.0.0.0:<node port>`)
    pub bind_addr: Option<SocketAddr>,
    /// Relays asked for their node lists at startup
    pub seed_nodes: NodeSet,
    /// Relay state file; `None` keeps state in memory
    pub state_path: Option<PathBuf>,
    /// How long startup waits for seeds
    pub discovery_timeout: Duration,
    /// Period of the reconnection sweep
    pub reconnect_interval: Duration,
    /// Maximum messages queued per identity
    pub max_queued_per_identity: usize,
}

impl RelayServerConfig {
    pub fn new(node: NodeAddress) -> Self {
        Self {
            node,
            bind_addr: None,
            seed_nodes: NodeSet::new(),
            state_path: None,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            max_queued_per_identity: DEFAULT_MAX_QUEUED_PER_IDENTITY,
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
            .unwrap_or_else(|| SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.node.port())))
    }
}

/// Statistics about relay server operations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayServerStats {
    /// Known relays, including this one
    pub known_nodes: usize,
    /// Live links to other relays
    pub server_links: usize,
    /// Attached clients
    pub client_sessions: usize,
    /// Messages currently queued
    pub messages_queued: usize,
    /// Messages handed to attached clients
    pub messages_delivered: u64,
    /// Messages passed on to another relay
    pub messages_forwarded: u64,
    /// Messages ever put in a queue
    pub messages_queued_total: u64,
}

/// Where a routed message went
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the recipient's session on this relay
    Delivered,
    /// Queued on this relay until the recipient attaches
    Queued,
    /// Sent on to the recipient's relay
    Forwarded(NodeAddress),
}

#[derive(Default)]
struct Counters {
    delivered: AtomicU64,
    forwarded: AtomicU64,
    queued: AtomicU64,
}

struct Inner {
    config: RelayServerConfig,
    store: Mutex<RelayStore>,
    servers: RwLock<ServerLinks>,
    clients: RwLock<ClientSessions>,
    counters: Counters,
    stopped: AtomicBool,
}

/// The relay server. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct RelayServer {
    inner: Arc<Inner>,
}

/// Running listener and mesh tasks
pub struct RelayHandle {
    local_addr: SocketAddr,
    relay: RelayServer,
    tasks: Vec<JoinHandle<()>>,
}

impl RelayHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and the mesh sweep, then close every
    /// server link and client session. Queued messages stay in the store.
    pub fn shutdown(self) {
        for task in self.tasks {
            task.abort();
        }
        self.relay.stop();
    }
}

impl RelayServer {
    /// Load persisted state and merge in the seeds and this relay itself
    pub fn new(config: RelayServerConfig) -> Result<Self, RelayError> {
        let file = match &config.state_path {
            Some(path) => StateFile::at(path),
            None => StateFile::memory(),
        };
        let mut store = RelayStore::open(file, config.max_queued_per_identity)?;

        let mut initial = config.seed_nodes.clone();
        initial.insert(config.node.clone());
        store.merge_nodes(&initial)?;

        tracing::info!(
            "Relay {} knows {} nodes, {} messages queued",
            config.node,
            store.nodes().len(),
            store.total_queued()
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                store: Mutex::new(store),
                servers: RwLock::new(ServerLinks::new()),
                clients: RwLock::new(ClientSessions::new()),
                counters: Counters::default(),
                stopped: AtomicBool::new(false),
            }),
        })
    }

    pub fn node(&self) -> &NodeAddress {
        &self.inner.config.node
    }

    pub fn config(&self) -> &RelayServerConfig {
        &self.inner.config
    }

    /// Current node set
    pub fn nodes(&self) -> NodeSet {
        self.inner.store.lock().nodes().clone()
    }

    pub fn queued_for(&self, public_key: &str) -> Vec<Message> {
        self.inner.store.lock().queued_for(public_key)
    }

    pub fn has_server_link(&self, node: &NodeAddress) -> bool {
        self.inner.servers.read().contains(node)
    }

    pub fn has_session(&self, public_key: &str) -> bool {
        self.inner.clients.read().contains(public_key)
    }

    pub fn stats(&self) -> RelayServerStats {
        let (known_nodes, messages_queued) = {
            let store = self.inner.store.lock();
            (store.nodes().len(), store.total_queued())
        };
        RelayServerStats {
            known_nodes,
            server_links: self.inner.servers.read().len(),
            client_sessions: self.inner.clients.read().len(),
            messages_queued,
            messages_delivered: self.inner.counters.delivered.load(Ordering::Relaxed),
            messages_forwarded: self.inner.counters.forwarded.load(Ordering::Relaxed),
            messages_queued_total: self.inner.counters.queued.load(Ordering::Relaxed),
        }
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Close every link and refuse new ones. The relay does not restart.
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        let servers = self.inner.servers.read().len();
        let clients = self.inner.clients.read().len();
        for (_, server) in self.inner.servers.read().iter() {
            server.link.close();
        }
        for link in self.inner.clients.read().links() {
            link.close();
        }
        tracing::info!(
            "Relay {} stopped, closed {} server links and {} client sessions",
            self.node(),
            servers,
            clients
        );
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Bind the configured address and start serving
    pub async fn start(&self) -> Result<RelayHandle, RelayError> {
        let addr = self.inner.config.bind_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| RelayError::Bind { addr, source })?;
        self.serve(listener)
    }

    /// Serve on an already bound listener, bootstrap, and join the mesh
    pub fn serve(&self, listener: TcpListener) -> Result<RelayHandle, RelayError> {
        let local_addr = listener.local_addr()?;
        tracing::info!("📡 Relay {} listening on {}", self.node(), local_addr);

        let accept = tokio::spawn(self.clone().accept_loop(listener));
        let mesh = tokio::spawn(self.clone().mesh_loop());

        Ok(RelayHandle {
            local_addr,
            relay: self.clone(),
            tasks: vec![accept, mesh],
        })
    }

    async fn accept_loop(self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    tokio::spawn(http::serve_connection(self.clone(), stream, peer));
                }
                Err(e) => {
                    tracing::warn!("Accept failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    async fn mesh_loop(self) {
        let seeds: NodeSet = self
            .inner
            .config
            .seed_nodes
            .iter()
            .filter(|n| *n != self.node())
            .cloned()
            .collect();

        if !seeds.is_empty() {
            let relay = self.clone();
            let report = bootstrap(&seeds, self.inner.config.discovery_timeout, move |seed, list| {
                tracing::debug!("Node list from {}", seed);
                relay.merge_remote_nodes(&list);
            })
            .await;
            tracing::info!(
                "Bootstrap: {}/{} seeds answered",
                report.responded,
                report.seeds
            );
        }

        self.connect_all();

        let mut sweep = tokio::time::interval(self.inner.config.reconnect_interval);
        sweep.tick().await;
        loop {
            sweep.tick().await;
            self.connect_all();
        }
    }

    // ========================================================================
    // SERVER MESH
    // ========================================================================

    fn server_whoami(&self) -> Frame {
        Frame::Whoami(Whoami::Server {
            port: self.node().port(),
            address: Some(self.node().to_string()),
        })
    }

    fn discover_frame(&self) -> Frame {
        Frame::Discover {
            list: self.inner.store.lock().nodes().encode(),
        }
    }

    /// Dial every known relay that has no link yet
    pub fn connect_all(&self) {
        if self.is_stopped() {
            return;
        }
        let nodes = self.nodes();
        let whoami = self.server_whoami();
        let discover = self.discover_frame();

        for node in nodes.iter().filter(|n| *n != self.node()) {
            let (link, events) = {
                let mut servers = self.inner.servers.write();
                if servers.contains(node) {
                    continue;
                }
                let (link, events) = dial(node.clone());
                servers.insert_outbound(node.clone(), link.clone());
                (link, events)
            };

            tracing::debug!("Dialing {}", node);
            // Buffered until the socket opens
            let _ = link.send(&whoami);
            let _ = link.send(&discover);
            tokio::spawn(self.clone().run_server_link(node.clone(), link.id(), events));
        }
    }

    /// Merge a node list received from a peer. Returns true if it grew.
    pub fn merge_remote_nodes(&self, list: &NodeSet) -> bool {
        let grown = match self.inner.store.lock().merge_nodes(list) {
            Ok(grown) => grown,
            Err(e) => {
                tracing::warn!("Could not persist node set: {}", e);
                return false;
            }
        };

        if grown {
            tracing::info!("Node set grew to {} nodes", self.nodes().len());
            self.broadcast_discover();
            self.connect_all();
        }
        grown
    }

    fn broadcast_discover(&self) {
        let frame = self.discover_frame();
        for (_, server) in self.inner.servers.read().iter() {
            let _ = server.link.send(&frame);
        }
        for link in self.inner.clients.read().links() {
            let _ = link.send(&frame);
        }
    }

    /// Settle an inbound link from a relay that announced itself as `remote`
    pub fn adopt_server_link(&self, remote: &NodeAddress, link: &Link) -> LinkDecision {
        let decision =
            self.inner
                .servers
                .write()
                .offer_inbound(self.node(), remote.clone(), link.clone());

        match decision {
            LinkDecision::Reject => {
                tracing::debug!("Keeping own link to {}, closed its dial", remote);
            }
            LinkDecision::Adopt | LinkDecision::Replace => {
                tracing::info!("🔗 Linked with relay {} ({:?})", remote, decision);
                let _ = link.send(&self.discover_frame());
            }
        }
        decision
    }

    async fn run_server_link(self, node: NodeAddress, id: LinkId, mut events: LinkEvents) {
        while let Some(event) = events.recv().await {
            match event {
                LinkEvent::Opened => tracing::info!("🔗 Connected to relay {}", node),
                LinkEvent::Frame(Frame::Discover { list }) => {
                    self.merge_remote_nodes(&NodeSet::decode(&list));
                }
                LinkEvent::Frame(Frame::Send(msg)) => self.accept_forwarded(msg),
                LinkEvent::Frame(other) => {
                    tracing::warn!("Unexpected {} frame from relay {}", other.event_name(), node);
                }
                LinkEvent::Closed => break,
            }
        }

        if self.inner.servers.write().remove_if(&node, id) {
            tracing::info!("Link to relay {} closed", node);
        }
    }

    /// Queue or deliver a message another relay forwarded here.
    ///
    /// Forwarded messages never leave this relay again.
    pub fn accept_forwarded(&self, msg: Message) {
        if !is_valid_public_key(&msg.to) {
            tracing::warn!(
                "Dropping forwarded message {} for malformed identity {}",
                msg.id,
                short_key(&msg.to)
            );
            return;
        }

        let nodes = self.nodes();
        if residence(&msg.to, &nodes).as_ref() != Some(self.node()) {
            tracing::warn!(
                "Relay disagreement: message for {} forwarded here, keeping it",
                short_key(&msg.to)
            );
        }

        if let Err(e) = self.deliver_local(msg) {
            tracing::warn!("Forwarded message dropped: {}", e);
        }
    }

    // ========================================================================
    // CLIENT SESSIONS
    // ========================================================================

    /// Handle a freshly accepted link until it closes
    pub async fn accept_link(self, link: Link, mut events: LinkEvents, peer: SocketAddr) {
        if self.is_stopped() {
            link.close();
            return;
        }
        let whoami = loop {
            match events.recv().await {
                Some(LinkEvent::Opened) => continue,
                Some(LinkEvent::Frame(Frame::Whoami(whoami))) => break whoami,
                Some(LinkEvent::Frame(other)) => {
                    tracing::warn!("{} sent {} before whoami", peer, other.event_name());
                }
                Some(LinkEvent::Closed) | None => return,
            }
        };

        match whoami {
            Whoami::Server { port, address } => {
                let remote = match announced_node(port, address.as_deref(), peer) {
                    Ok(remote) => remote,
                    Err(e) => {
                        tracing::warn!("Relay at {} announced a bad address: {}", peer, e);
                        link.close();
                        return;
                    }
                };
                if &remote == self.node() {
                    link.close();
                    return;
                }

                let kept = self.adopt_server_link(&remote, &link).keeps_inbound();
                self.merge_remote_nodes(&NodeSet::from_iter([remote.clone()]));
                if kept {
                    self.run_server_link(remote, link.id(), events).await;
                }
            }
            Whoami::Client { public_key } => match self.attach_client(&public_key, &link) {
                Ok(drained) => {
                    tracing::info!(
                        "👤 Client {} attached, {} queued messages delivered",
                        short_key(&public_key),
                        drained
                    );
                    self.run_client_session(public_key, link.id(), events).await;
                }
                Err(e) => {
                    tracing::warn!("Client {} refused: {}", short_key(&public_key), e);
                    link.close();
                }
            },
        }
    }

    /// Register a client session and hand it everything queued for it.
    ///
    /// Registration, the `discover` frame and the queue drain happen under
    /// one critical section, so no direct delivery can slip in between.
    /// The session is registered only once the drain has settled; an `Err`
    /// leaves no session behind. Returns how many queued messages were sent.
    pub fn attach_client(&self, public_key: &str, link: &Link) -> Result<usize, RelayError> {
        if !is_valid_public_key(public_key) {
            return Err(RelayError::InvalidIdentity(short_key(public_key).to_string()));
        }

        let mut clients = self.inner.clients.write();
        if clients.contains(public_key) {
            return Err(RelayError::DuplicateSession(short_key(public_key).to_string()));
        }

        let mut store = self.inner.store.lock();
        let queued = store.drain(public_key)?;

        let _ = link.send(&Frame::Discover {
            list: store.nodes().encode(),
        });

        let mut sent = 0;
        let mut pending = queued.into_iter();
        for msg in pending.by_ref() {
            if link.send(&Frame::Receive(msg.clone())).is_err() {
                let mut tail = vec![msg];
                tail.extend(pending);
                store.restore_front(public_key, tail)?;
                break;
            }
            sent += 1;
        }
        clients.register(public_key, link.clone());

        self.inner
            .counters
            .delivered
            .fetch_add(sent as u64, Ordering::Relaxed);
        Ok(sent)
    }

    async fn run_client_session(self, public_key: String, id: LinkId, mut events: LinkEvents) {
        while let Some(event) = events.recv().await {
            match event {
                LinkEvent::Frame(Frame::Send(msg)) => {
                    if msg.from != public_key {
                        tracing::warn!(
                            "Client {} sent a message claiming to be from {}",
                            short_key(&public_key),
                            short_key(&msg.from)
                        );
                        continue;
                    }
                    let (to, content) = (msg.to.clone(), msg.content.clone());
                    match self.route_message(msg) {
                        Ok(delivery) => tracing::debug!(
                            "{} → {} [{}]: {:?}",
                            short_key(&public_key),
                            short_key(&to),
                            preview(&content),
                            delivery
                        ),
                        Err(e) => tracing::warn!(
                            "Send from {} to {} failed: {}",
                            short_key(&public_key),
                            short_key(&to),
                            e
                        ),
                    }
                }
                LinkEvent::Frame(other) => {
                    tracing::debug!(
                        "Ignoring {} frame from client {}",
                        other.event_name(),
                        short_key(&public_key)
                    );
                }
                LinkEvent::Opened => {}
                LinkEvent::Closed => break,
            }
        }

        if self.inner.clients.write().remove_if(&public_key, id) {
            tracing::info!("👤 Client {} detached", short_key(&public_key));
        }
    }

    // ========================================================================
    // ROUTING
    // ========================================================================

    /// Route a client's message to the relay its recipient resides on
    pub fn route_message(&self, msg: Message) -> Result<Delivery, RelayError> {
        if !is_valid_public_key(&msg.to) {
            return Err(RelayError::InvalidIdentity(short_key(&msg.to).to_string()));
        }

        let owner = residence(&msg.to, &self.nodes()).ok_or(RelayError::NoResidence)?;

        if &owner == self.node() {
            return self.deliver_local(msg);
        }

        let link = self
            .inner
            .servers
            .read()
            .get(&owner)
            .map(|server| server.link.clone())
            .ok_or_else(|| RelayError::NodeUnreachable(owner.clone()))?;

        link.send(&Frame::Send(msg))
            .map_err(|_| RelayError::NodeUnreachable(owner.clone()))?;
        self.inner.counters.forwarded.fetch_add(1, Ordering::Relaxed);
        Ok(Delivery::Forwarded(owner))
    }

    /// Hand a message to its recipient's session, or queue it
    fn deliver_local(&self, msg: Message) -> Result<Delivery, RelayError> {
        let clients = self.inner.clients.read();

        if let Some(session) = clients.get(&msg.to) {
            if session.link.send(&Frame::Receive(msg.clone())).is_ok() {
                self.inner.counters.delivered.fetch_add(1, Ordering::Relaxed);
                return Ok(Delivery::Delivered);
            }
        }

        self.inner.store.lock().enqueue(msg)?;
        self.inner.counters.queued.fetch_add(1, Ordering::Relaxed);
        Ok(Delivery::Queued)
    }
}

// ============================================================================
// TESTS
// ============================================================================

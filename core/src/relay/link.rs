//! Server links — this relay's table of connections to other relays

use crate::routing::{reconcile_inbound, LinkDecision, LinkDirection};
use crate::store::{AddressError, NodeAddress};
use crate::transport::{Link, LinkId};
use std::collections::HashMap;
use std::net::SocketAddr;

/// A link to another relay
#[derive(Debug, Clone)]
pub struct ServerLink {
    pub link: Link,
    pub direction: LinkDirection,
}

/// At most one link per remote relay
#[derive(Debug, Default)]
pub struct ServerLinks {
    links: HashMap<NodeAddress, ServerLink>,
}

impl ServerLinks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, node: &NodeAddress) -> Option<&ServerLink> {
        self.links.get(node)
    }

    pub fn contains(&self, node: &NodeAddress) -> bool {
        self.links.contains_key(node)
    }

    /// Record an outbound dial. Returns false if `node` already has a link.
    pub fn insert_outbound(&mut self, node: NodeAddress, link: Link) -> bool {
        if self.links.contains_key(&node) {
            return false;
        }
        self.links.insert(
            node,
            ServerLink {
                link,
                direction: LinkDirection::Outbound,
            },
        );
        true
    }

    /// Settle an inbound link from `remote` against whatever we hold.
    ///
    /// On `Adopt`/`Replace` the inbound link is stored and any replaced link
    /// is closed. On `Reject` the inbound link is closed.
    pub fn offer_inbound(
        &mut self,
        local: &NodeAddress,
        remote: NodeAddress,
        link: Link,
    ) -> LinkDecision {
        let existing = self.links.get(&remote).map(|l| l.direction);
        let decision = reconcile_inbound(local, &remote, existing);

        if decision.keeps_inbound() {
            let replaced = self.links.insert(
                remote,
                ServerLink {
                    link,
                    direction: LinkDirection::Inbound,
                },
            );
            if let Some(old) = replaced {
                old.link.close();
            }
        } else {
            link.close();
        }

        decision
    }

    /// Drop the entry for `node` if it still belongs to link `id`
    pub fn remove_if(&mut self, node: &NodeAddress, id: LinkId) -> bool {
        match self.links.get(node) {
            Some(entry) if entry.link.id() == id => {
                self.links.remove(node);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeAddress, &ServerLink)> {
        self.links.iter()
    }
}

/// Address of a relay that announced itself on an inbound link.
///
/// Uses the announced address if there is one; otherwise the peer's IP and
/// announced port, with loopback written as `localhost`.
pub fn announced_node(
    port: u16,
    address: Option<&str>,
    peer: SocketAddr,
) -> Result<NodeAddress, AddressError> {
    if let Some(address) = address {
        return NodeAddress::new(address);
    }

    let host = if peer.ip().is_loopback() {
        "localhost".to_string()
    } else {
        peer.ip().to_string()
    };
    NodeAddress::from_parts(&host, port)
}

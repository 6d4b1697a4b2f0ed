// Node addresses and the node sets relays gossip
//
// A node set only ever grows through merges. Nodes that stop answering are
// dropped from the active link table, never from the set.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Empty node address")]
    Empty,
    #[error("Node address {0:?} is missing a host")]
    MissingHost(String),
    #[error("Node address {0:?} has no valid port")]
    InvalidPort(String),
}

/// `host:port` identifying one relay server.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeAddress(String);

impl NodeAddress {
    pub fn new(address: impl Into<String>) -> Result<Self, AddressError> {
        let address = address.into().trim().to_string();
        if address.is_empty() {
            return Err(AddressError::Empty);
        }

        let (host, port) = address
            .rsplit_once(':')
            .ok_or_else(|| AddressError::InvalidPort(address.clone()))?;
        if host.is_empty() {
            return Err(AddressError::MissingHost(address));
        }
        if port.parse::<u16>().is_err() {
            return Err(AddressError::InvalidPort(address));
        }

        Ok(Self(address))
    }

    /// Build an address from a host and port
    pub fn from_parts(host: &str, port: u16) -> Result<Self, AddressError> {
        Self::new(format!("{}:{}", host, port))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn host(&self) -> &str {
        self.0.rsplit_once(':').map(|(host, _)| host).unwrap_or(&self.0)
    }

    pub fn port(&self) -> u16 {
        self.0
            .rsplit_once(':')
            .and_then(|(_, port)| port.parse().ok())
            .unwrap_or_default()
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for NodeAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for NodeAddress {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<NodeAddress> for String {
    fn from(address: NodeAddress) -> Self {
        address.0
    }
}

/// Set of known relay addresses.
///
/// Backed by a `BTreeSet`, so two processes holding equal sets iterate them
/// in the same order. Hash-ring tie-breaks rely on that.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeSet(BTreeSet<NodeAddress>);

impl NodeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a newline-separated node list.
    ///
    /// Lines are trimmed, empty lines dropped. Lines that are not a valid
    /// `host:port` are skipped.
    pub fn decode(list: &str) -> Self {
        let mut nodes = BTreeSet::new();
        for line in list.split('\n').map(str::trim).filter(|line| !line.is_empty()) {
            match NodeAddress::new(line) {
                Ok(address) => {
                    nodes.insert(address);
                }
                Err(e) => tracing::warn!("Skipping node list entry: {}", e),
            }
        }
        Self(nodes)
    }

    /// Encode as a newline-separated list
    pub fn encode(&self) -> String {
        self.0
            .iter()
            .map(NodeAddress::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn union(a: &NodeSet, b: &NodeSet) -> NodeSet {
        NodeSet(a.0.union(&b.0).cloned().collect())
    }

    /// Add every node of `other`. Returns true if the set grew.
    pub fn merge(&mut self, other: &NodeSet) -> bool {
        let before = self.0.len();
        self.0.extend(other.0.iter().cloned());
        self.0.len() != before
    }

    pub fn insert(&mut self, address: NodeAddress) -> bool {
        self.0.insert(address)
    }

    pub fn contains(&self, address: &NodeAddress) -> bool {
        self.0.contains(address)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeAddress> {
        self.0.iter()
    }
}

impl FromIterator<NodeAddress> for NodeSet {
    fn from_iter<T: IntoIterator<Item = NodeAddress>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a NodeSet {
    type Item = &'a NodeAddress;
    type IntoIter = std::collections::btree_set::Iter<'a, NodeAddress>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn set(list: &[&str]) -> NodeSet {
        list.iter().map(|a| a.parse().unwrap()).collect()
    }

    #[test]
    fn test_address_parsing() {
        let address: NodeAddress = "relay.example.org:3000".parse().unwrap();
        assert_eq!(address.host(), "relay.example.org");
        assert_eq!(address.port(), 3000);

        assert_eq!(NodeAddress::new("  "), Err(AddressError::Empty));
        assert!(matches!(NodeAddress::new(":3000"), Err(AddressError::MissingHost(_))));
        assert!(matches!(NodeAddress::new("localhost"), Err(AddressError::InvalidPort(_))));
        assert!(matches!(NodeAddress::new("localhost:99999"), Err(AddressError::InvalidPort(_))));
    }

    #[test]
    fn test_decode_trims_and_drops_empty_lines() {
        let nodes = NodeSet::decode("  localhost:3000 \n\n\tlocalhost:3001\r\n   \n");
        assert_eq!(nodes, set(&["localhost:3000", "localhost:3001"]));
    }

    #[test]
    fn test_decode_skips_invalid_entries() {
        let nodes = NodeSet::decode("localhost:3000\nnot-an-address\nlocalhost:3001");
        assert_eq!(nodes.len(), 2);
    }

    #[test]
    fn test_encode_decode() {
        let nodes = set(&["b:2", "a:1", "c:3"]);
        assert_eq!(nodes.encode(), "a:1\nb:2\nc:3");
        assert_eq!(NodeSet::decode(&nodes.encode()), nodes);
    }

    #[test]
    fn test_merge_reports_growth() {
        let mut nodes = set(&["a:1"]);
        assert!(!nodes.merge(&set(&["a:1"])));
        assert!(nodes.merge(&set(&["a:1", "b:2"])));
        assert_eq!(nodes.len(), 2);
    }

    #[test]
    fn test_serde_rejects_invalid_address() {
        assert!(serde_json::from_str::<NodeAddress>("\"nope\"").is_err());
        let ok: NodeAddress = serde_json::from_str("\"localhost:3000\"").unwrap();
        assert_eq!(ok.port(), 3000);
    }

    fn node_set_strategy() -> impl Strategy<Value = NodeSet> {
        proptest::collection::vec(("[a-z]{1,6}", 1u16..6), 0..8).prop_map(|entries| {
            entries
                .into_iter()
                .map(|(host, port)| NodeAddress::from_parts(&host, port).unwrap())
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_union_is_commutative(a in node_set_strategy(), b in node_set_strategy()) {
            prop_assert_eq!(NodeSet::union(&a, &b), NodeSet::union(&b, &a));
        }

        #[test]
        fn prop_union_is_idempotent(a in node_set_strategy()) {
            prop_assert_eq!(NodeSet::union(&a, &a), a.clone());
            let mut merged = a.clone();
            prop_assert!(!merged.merge(&a));
        }
    }
}

// This relay's view of the node set

use super::nodes::{NodeAddress, NodeSet};

#[derive(Debug, Clone, Default)]
pub struct MembershipStore {
    nodes: NodeSet,
}

impl MembershipStore {
    pub fn new(nodes: NodeSet) -> Self {
        Self { nodes }
    }

    pub fn nodes(&self) -> &NodeSet {
        &self.nodes
    }

    pub fn contains(&self, address: &NodeAddress) -> bool {
        self.nodes.contains(address)
    }

    /// Candidate set after merging `incoming`, or `None` if nothing new.
    ///
    /// Does not modify the store; install the result with [`commit`](Self::commit).
    pub fn merge(&self, incoming: &NodeSet) -> Option<NodeSet> {
        let union = NodeSet::union(&self.nodes, incoming);
        (union.len() != self.nodes.len()).then_some(union)
    }

    pub fn commit(&mut self, nodes: NodeSet) {
        self.nodes = nodes;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_does_not_mutate_until_commit() {
        let mut store = MembershipStore::new(NodeSet::decode("a:1"));

        let candidate = store.merge(&NodeSet::decode("b:2")).unwrap();
        assert_eq!(store.nodes().len(), 1);

        store.commit(candidate);
        assert_eq!(store.nodes().encode(), "a:1\nb:2");
    }

    #[test]
    fn test_merge_known_nodes_is_none() {
        let store = MembershipStore::new(NodeSet::decode("a:1\nb:2"));
        assert!(store.merge(&NodeSet::decode("b:2")).is_none());
        assert!(store.merge(&NodeSet::new()).is_none());
    }
}

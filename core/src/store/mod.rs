// Store module — relay membership, message queues and their persistence
//
// `RelayStore` owns both halves of the relay document. Every mutation is
// written to disk before it becomes visible in memory; a failed write leaves
// the in-memory state as it was.

pub mod membership;
pub mod nodes;
pub mod queue;
pub mod state;

pub use membership::MembershipStore;
pub use nodes::{AddressError, NodeAddress, NodeSet};
pub use queue::{QueueStore, DEFAULT_MAX_QUEUED_PER_IDENTITY};
pub use state::{PersistedState, StateFile, UserRecord};

use crate::message::Message;
use std::collections::{HashMap, VecDeque};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("State file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("State file is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Queue full for {identity} ({limit} messages)")]
    QueueFull { identity: String, limit: usize },
}

/// Membership and queues of one relay, backed by its state file
#[derive(Debug)]
pub struct RelayStore {
    membership: MembershipStore,
    queues: QueueStore,
    file: StateFile,
}

impl RelayStore {
    /// Load the relay document from `file`
    pub fn open(file: StateFile, max_queued_per_identity: usize) -> Result<Self, StoreError> {
        let state = file.load()?;

        let queues: HashMap<String, VecDeque<Message>> = state
            .users
            .into_iter()
            .filter(|(_, record)| !record.queue.is_empty())
            .map(|(public_key, record)| (public_key, VecDeque::from(record.queue)))
            .collect();

        let store = Self {
            membership: MembershipStore::new(NodeSet::decode(&state.nodes)),
            queues: QueueStore::from_queues(queues, max_queued_per_identity),
            file,
        };

        tracing::debug!(
            "Relay store opened: {} nodes, {} queued messages",
            store.membership.nodes().len(),
            store.queues.total()
        );

        Ok(store)
    }

    /// In-memory store with no state file
    pub fn memory(max_queued_per_identity: usize) -> Self {
        Self {
            membership: MembershipStore::default(),
            queues: QueueStore::new(max_queued_per_identity),
            file: StateFile::memory(),
        }
    }

    pub fn nodes(&self) -> &NodeSet {
        self.membership.nodes()
    }

    /// Merge `incoming` into the node set. Returns true if the set grew.
    pub fn merge_nodes(&mut self, incoming: &NodeSet) -> Result<bool, StoreError> {
        let Some(candidate) = self.membership.merge(incoming) else {
            return Ok(false);
        };

        self.file.write(&self.snapshot_with(&candidate))?;
        self.membership.commit(candidate);
        Ok(true)
    }

    pub fn enqueue(&mut self, msg: Message) -> Result<(), StoreError> {
        let to = msg.to.clone();
        self.queues.enqueue(msg)?;

        if let Err(e) = self.persist() {
            // Take back exactly the message we just appended
            let mut queued = self.queues.drain(&to);
            queued.pop();
            self.queues.restore_front(&to, queued);
            return Err(e);
        }
        Ok(())
    }

    /// Remove every queued message for `public_key`, oldest first
    pub fn drain(&mut self, public_key: &str) -> Result<Vec<Message>, StoreError> {
        let drained = self.queues.drain(public_key);
        if drained.is_empty() {
            return Ok(drained);
        }

        if let Err(e) = self.persist() {
            self.queues.restore_front(public_key, drained);
            return Err(e);
        }
        Ok(drained)
    }

    /// Return undelivered messages to the front of the queue
    pub fn restore_front(
        &mut self,
        public_key: &str,
        messages: Vec<Message>,
    ) -> Result<(), StoreError> {
        if messages.is_empty() {
            return Ok(());
        }
        self.queues.restore_front(public_key, messages);
        self.persist()
    }

    pub fn queued_for(&self, public_key: &str) -> Vec<Message> {
        self.queues.peek(public_key)
    }

    pub fn total_queued(&self) -> usize {
        self.queues.total()
    }

    /// Current relay document
    pub fn snapshot(&self) -> PersistedState {
        self.snapshot_with(self.membership.nodes())
    }

    fn snapshot_with(&self, nodes: &NodeSet) -> PersistedState {
        PersistedState {
            nodes: nodes.encode(),
            users: self
                .queues
                .queues()
                .iter()
                .filter(|(_, queue)| !queue.is_empty())
                .map(|(public_key, queue)| {
                    (
                        public_key.clone(),
                        UserRecord {
                            queue: queue.iter().cloned().collect(),
                        },
                    )
                })
                .collect(),
        }
    }

    fn persist(&self) -> Result<(), StoreError> {
        self.file.write(&self.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn msg(to: &str, content: &str) -> Message {
        Message::new("sender", to, content.to_string(), false)
    }

    #[test]
    fn test_merge_nodes_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("relay.json");

        let mut store = RelayStore::open(StateFile::at(&path), 10).unwrap();
        assert!(store.merge_nodes(&NodeSet::decode("a:1\nb:2")).unwrap());
        assert!(!store.merge_nodes(&NodeSet::decode("b:2")).unwrap());

        let reopened = RelayStore::open(StateFile::at(&path), 10).unwrap();
        assert_eq!(reopened.nodes().encode(), "a:1\nb:2");
    }

    #[test]
    fn test_failed_write_leaves_memory_untouched() {
        let dir = tempdir().unwrap();
        // A directory where the state file should be makes the rename fail
        let path = dir.path().join("relay.json");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("occupied"), "x").unwrap();

        let mut store = RelayStore {
            membership: MembershipStore::new(NodeSet::decode("a:1")),
            queues: QueueStore::new(10),
            file: StateFile::at(&path),
        };

        assert!(store.merge_nodes(&NodeSet::decode("b:2")).is_err());
        assert_eq!(store.nodes().encode(), "a:1");

        assert!(store.enqueue(msg("bob", "1")).is_err());
        assert!(store.queued_for("bob").is_empty());
    }

    #[test]
    fn test_queue_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("relay.json");

        let mut store = RelayStore::open(StateFile::at(&path), 10).unwrap();
        store.enqueue(msg("bob", "1")).unwrap();
        store.enqueue(msg("bob", "2")).unwrap();

        let mut reopened = RelayStore::open(StateFile::at(&path), 10).unwrap();
        let drained: Vec<_> = reopened
            .drain("bob")
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(drained, vec!["1", "2"]);

        let after_drain = RelayStore::open(StateFile::at(&path), 10).unwrap();
        assert_eq!(after_drain.total_queued(), 0);
    }

    #[test]
    fn test_restore_front_after_partial_delivery() {
        let mut store = RelayStore::memory(10);
        for c in ["1", "2", "3"] {
            store.enqueue(msg("bob", c)).unwrap();
        }
        let mut drained = store.drain("bob").unwrap();
        let tail = drained.split_off(1);
        store.restore_front("bob", tail).unwrap();

        let remaining: Vec<_> = store.queued_for("bob").into_iter().map(|m| m.content).collect();
        assert_eq!(remaining, vec!["2", "3"]);
    }
}

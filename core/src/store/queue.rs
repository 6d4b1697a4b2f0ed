// Message queue — per-identity FIFO of messages waiting for their recipient
//
// Queues are never reordered or deduplicated. A drained tail that could not
// be delivered goes back to the front, ahead of anything queued since.

use super::StoreError;
use crate::message::Message;
use std::collections::{HashMap, VecDeque};

/// Default maximum messages queued per identity
pub const DEFAULT_MAX_QUEUED_PER_IDENTITY: usize = 10_000;

#[derive(Debug, Clone)]
pub struct QueueStore {
    queues: HashMap<String, VecDeque<Message>>,
    max_per_identity: usize,
}

impl QueueStore {
    pub fn new(max_per_identity: usize) -> Self {
        Self {
            queues: HashMap::new(),
            max_per_identity,
        }
    }

    pub(crate) fn from_queues(
        queues: HashMap<String, VecDeque<Message>>,
        max_per_identity: usize,
    ) -> Self {
        Self {
            queues,
            max_per_identity,
        }
    }

    /// Check that one more message for `public_key` fits
    pub fn check_capacity(&self, public_key: &str) -> Result<(), StoreError> {
        if self.len_for(public_key) >= self.max_per_identity {
            return Err(StoreError::QueueFull {
                identity: public_key.to_string(),
                limit: self.max_per_identity,
            });
        }
        Ok(())
    }

    pub fn enqueue(&mut self, msg: Message) -> Result<(), StoreError> {
        self.check_capacity(&msg.to)?;
        self.queues.entry(msg.to.clone()).or_default().push_back(msg);
        Ok(())
    }

    /// Remove and return every queued message for `public_key`, oldest first
    pub fn drain(&mut self, public_key: &str) -> Vec<Message> {
        self.queues
            .remove(public_key)
            .map(Vec::from)
            .unwrap_or_default()
    }

    /// Put undelivered messages back at the front, preserving their order
    pub fn restore_front(&mut self, public_key: &str, messages: Vec<Message>) {
        if messages.is_empty() {
            return;
        }
        let queue = self.queues.entry(public_key.to_string()).or_default();
        for msg in messages.into_iter().rev() {
            queue.push_front(msg);
        }
    }

    pub fn peek(&self, public_key: &str) -> Vec<Message> {
        self.queues
            .get(public_key)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len_for(&self, public_key: &str) -> usize {
        self.queues.get(public_key).map_or(0, VecDeque::len)
    }

    /// Total messages queued across all identities
    pub fn total(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    pub fn queues(&self) -> &HashMap<String, VecDeque<Message>> {
        &self.queues
    }
}

impl Default for QueueStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_QUEUED_PER_IDENTITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(to: &str, content: &str) -> Message {
        Message::new("sender", to, content.to_string(), false)
    }

    #[test]
    fn test_fifo_drain_then_empty() {
        let mut store = QueueStore::default();
        store.enqueue(msg("bob", "1")).unwrap();
        store.enqueue(msg("bob", "2")).unwrap();
        store.enqueue(msg("carol", "x")).unwrap();
        store.enqueue(msg("bob", "3")).unwrap();

        let drained: Vec<_> = store.drain("bob").into_iter().map(|m| m.content).collect();
        assert_eq!(drained, vec!["1", "2", "3"]);
        assert!(store.drain("bob").is_empty());
        assert_eq!(store.len_for("carol"), 1);
    }

    #[test]
    fn test_duplicates_are_kept() {
        let mut store = QueueStore::default();
        let m = msg("bob", "same");
        store.enqueue(m.clone()).unwrap();
        store.enqueue(m).unwrap();
        assert_eq!(store.len_for("bob"), 2);
    }

    #[test]
    fn test_restore_front_keeps_order() {
        let mut store = QueueStore::default();
        for c in ["1", "2", "3"] {
            store.enqueue(msg("bob", c)).unwrap();
        }
        let mut drained = store.drain("bob");
        let tail = drained.split_off(1);
        store.enqueue(msg("bob", "4")).unwrap();
        store.restore_front("bob", tail);

        let order: Vec<_> = store.peek("bob").into_iter().map(|m| m.content).collect();
        assert_eq!(order, vec!["2", "3", "4"]);
    }

    #[test]
    fn test_queue_limit() {
        let mut store = QueueStore::new(2);
        store.enqueue(msg("bob", "1")).unwrap();
        store.enqueue(msg("bob", "2")).unwrap();

        let result = store.enqueue(msg("bob", "3"));
        assert!(matches!(result, Err(StoreError::QueueFull { limit: 2, .. })));
        assert!(store.enqueue(msg("carol", "1")).is_ok());
        assert_eq!(store.total(), 3);
    }
}

//! Clients attached to this relay, one session per identity

use crate::transport::{Link, LinkId};
use std::collections::HashMap;

/// A client attached to this relay
#[derive(Debug, Clone)]
pub struct ClientSession {
    pub public_key: String,
    pub link: Link,
}

#[derive(Debug, Default)]
pub struct ClientSessions {
    sessions: HashMap<String, ClientSession>,
}

impl ClientSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, public_key: &str) -> Option<&ClientSession> {
        self.sessions.get(public_key)
    }

    pub fn contains(&self, public_key: &str) -> bool {
        self.sessions.contains_key(public_key)
    }

    /// Register a session. Returns false if the identity already has one.
    pub fn register(&mut self, public_key: &str, link: Link) -> bool {
        if self.sessions.contains_key(public_key) {
            return false;
        }
        self.sessions.insert(
            public_key.to_string(),
            ClientSession {
                public_key: public_key.to_string(),
                link,
            },
        );
        true
    }

    /// Remove the session for `public_key` if it still belongs to link `id`
    pub fn remove_if(&mut self, public_key: &str, id: LinkId) -> bool {
        match self.sessions.get(public_key) {
            Some(session) if session.link.id() == id => {
                self.sessions.remove(public_key);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.sessions.values().map(|s| &s.link)
    }
}

/// First 8 characters of a public key, for logs
pub fn short_key(public_key: &str) -> &str {
    prefix(public_key, 8)
}

/// First 16 characters of message content, for logs
pub fn preview(content: &str) -> &str {
    prefix(content, 16)
}

fn prefix(s: &str, chars: usize) -> &str {
    match s.char_indices().nth(chars) {
        Some((end, _)) => &s[..end],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_session_rejected() {
        let mut sessions = ClientSessions::new();
        let (first, _rx1) = Link::detached();
        let (second, _rx2) = Link::detached();

        assert!(sessions.register("alice", first.clone()));
        assert!(!sessions.register("alice", second));
        assert_eq!(sessions.get("alice").unwrap().link.id(), first.id());
    }

    #[test]
    fn test_remove_if_matches_link() {
        let mut sessions = ClientSessions::new();
        let (link, _rx) = Link::detached();
        let (other, _rx2) = Link::detached();
        sessions.register("alice", link.clone());

        assert!(!sessions.remove_if("alice", other.id()));
        assert!(sessions.remove_if("alice", link.id()));
        assert!(sessions.is_empty());
    }

    #[test]
    fn test_log_prefixes() {
        assert_eq!(short_key("abcdefghijkl"), "abcdefgh");
        assert_eq!(short_key("abc"), "abc");
        assert_eq!(preview("0123456789abcdefXYZ"), "0123456789abcdef");
        assert_eq!(preview("héllo wörld ünïcode"), "héllo wörld ünïc");
    }
}

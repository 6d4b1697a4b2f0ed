// Message types — the envelope relays route and queue

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// A routed message.
///
/// Relays only read `to` and `from`; `content` is always the encrypted wire
/// string produced by `crypto::seal`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique message ID (UUID v4)
    pub id: String,
    /// Recipient's base58 public key
    pub to: String,
    /// Sender's base58 public key
    pub from: String,
    /// Milliseconds since the Unix epoch
    pub time_sent: u64,
    /// This message acknowledges an earlier one
    #[serde(default)]
    pub is_ack: bool,
    /// The sender wants an ack back
    #[serde(default)]
    pub requires_ack: bool,
    /// Encrypted payload
    pub content: String,
}

impl Message {
    /// Build a new message with a fresh id and the current time
    pub fn new(from: &str, to: &str, content: String, requires_ack: bool) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            to: to.to_string(),
            from: from.to_string(),
            time_sent: now_millis(),
            is_ack: false,
            requires_ack,
            content,
        }
    }

    /// Build an ack for `original`.
    ///
    /// `sealed_id` must be the original message id encrypted for the
    /// original sender.
    pub fn ack_for(original: &Message, sealed_id: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            to: original.from.clone(),
            from: original.to.clone(),
            time_sent: now_millis(),
            is_ack: true,
            requires_ack: false,
            content: sealed_id,
        }
    }
}

/// Current time in milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

// Which link survives when two relays dial each other

use super::ring::inbound_wins;
use crate::store::NodeAddress;

/// Who opened a server link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDirection {
    /// We dialed the remote node
    Outbound,
    /// The remote node dialed us
    Inbound,
}

/// Outcome for an inbound server link that just announced itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDecision {
    /// No link yet, keep the inbound one
    Adopt,
    /// Close the existing link and keep the inbound one
    Replace,
    /// Keep the existing link and close the inbound one
    Reject,
}

impl LinkDecision {
    pub fn keeps_inbound(self) -> bool {
        !matches!(self, LinkDecision::Reject)
    }
}

/// Decide what to do with an inbound link from `remote`, given the
/// direction of the link we already hold for it (if any).
pub fn reconcile_inbound(
    local: &NodeAddress,
    remote: &NodeAddress,
    existing: Option<LinkDirection>,
) -> LinkDecision {
    match existing {
        None => LinkDecision::Adopt,
        Some(LinkDirection::Inbound) => LinkDecision::Replace,
        Some(LinkDirection::Outbound) => {
            if inbound_wins(local, remote) {
                LinkDecision::Replace
            } else {
                LinkDecision::Reject
            }
        }
    }
}

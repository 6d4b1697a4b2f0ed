// Hash ring — maps client identities and relay addresses onto a 32-bit circle
//
// An identity resides on the relay whose address hash is circularly nearest
// to the hash of the identity's base58 public key. Every relay holding the
// same node set computes the same residence.

use crate::store::{NodeAddress, NodeSet};
use sha3::{Digest, Sha3_256};

/// Size of the ring (2^32)
pub const RING_SIZE: u64 = 1 << 32;

/// Ring position of an identifier: first four bytes of SHA3-256, big-endian.
pub fn ring_hash(bytes: &[u8]) -> u32 {
    let digest = Sha3_256::digest(bytes);
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Circular distance between two ring positions
pub fn distance(a: u32, b: u32) -> u64 {
    let d = (a as u64).abs_diff(b as u64);
    d.min(RING_SIZE - d)
}

/// Circular distance between the ring positions of two identifiers
pub fn hash_distance(x: &str, y: &str) -> u64 {
    distance(ring_hash(x.as_bytes()), ring_hash(y.as_bytes()))
}

/// Candidate nearest to `target` on the ring.
///
/// Ties go to the first candidate in iteration order.
pub fn nearest<'a, I>(target: &str, candidates: I) -> Option<&'a NodeAddress>
where
    I: IntoIterator<Item = &'a NodeAddress>,
{
    let position = ring_hash(target.as_bytes());
    let mut best: Option<(&NodeAddress, u64)> = None;

    for candidate in candidates {
        let d = distance(position, ring_hash(candidate.as_str().as_bytes()));
        match best {
            Some((_, best_distance)) if d >= best_distance => {}
            _ => best = Some((candidate, d)),
        }
    }

    best.map(|(node, _)| node)
}

/// Relay responsible for a public key, or `None` when no node is known.
pub fn residence(public_key_b58: &str, nodes: &NodeSet) -> Option<NodeAddress> {
    nearest(public_key_b58, nodes).cloned()
}

/// Total order over relays used to settle simultaneous dials
pub fn link_rank(address: &NodeAddress) -> (u32, &str) {
    (ring_hash(address.as_str().as_bytes()), address.as_str())
}

/// Whether `local` should keep an inbound link from `remote` over its own
/// outbound dial. The smaller node yields.
pub fn inbound_wins(local: &NodeAddress, remote: &NodeAddress) -> bool {
    link_rank(local) < link_rank(remote)
}

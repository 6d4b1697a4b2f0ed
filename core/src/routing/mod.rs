// Consistent-hash residence and server link tie-breaks

pub mod reconcile;
pub mod ring;

pub use reconcile::{reconcile_inbound, LinkDecision, LinkDirection};
pub use ring::{distance, hash_distance, inbound_wins, link_rank, nearest, residence, ring_hash};

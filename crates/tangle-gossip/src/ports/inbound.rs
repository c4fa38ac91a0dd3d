//! Inbound ports (API) for the gossip layer.

use crate::neighbor::NeighborHandle;

/// Where neighbors hand decoded transaction traffic.
///
/// Both calls are made from a connection task and must not block on I/O.
pub trait TransactionIntake: Send + Sync {
    /// Accepts a raw transaction gossip payload received from `neighbor`.
    fn process(&self, neighbor: &NeighborHandle, payload: Vec<u8>);

    /// Accepts a request for the milestone with the given index (0 = latest).
    fn process_milestone_request(&self, neighbor: &NeighborHandle, index: i32);
}

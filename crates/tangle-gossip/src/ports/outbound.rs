//! Outbound ports (SPI) for the gossip layer.
//!
//! The tangle store, snapshot, tip selection and milestone tracking live
//! outside this crate; these traits are the narrow views the gossip layer
//! needs of them.

use std::collections::HashSet;

use crate::domain::{TransactionRecord, TxField, TxHash};
use crate::events::StoreError;
use crate::neighbor::NeighborHandle;

/// Result of appending a received transaction.
#[derive(Clone, Debug)]
pub struct StoredTransaction {
    pub record: TransactionRecord,
    /// `false` when the transaction was already stored.
    pub is_new: bool,
}

/// Persistent transaction DAG.
pub trait TangleStore: Send + Sync {
    /// Loads a transaction by hash.
    ///
    /// Returns `Ok(None)` for hashes never seen. Hashes referenced by a stored
    /// transaction but not received yet may come back as placeholders.
    fn load_transaction(&self, hash: &TxHash) -> Result<Option<TransactionRecord>, StoreError>;

    /// Hash the store files full transaction bytes under.
    fn hash_transaction(&self, tx_bytes: &[u8]) -> TxHash;

    /// Appends a full (expanded) transaction received from the network.
    fn store_transaction(&self, tx_bytes: Vec<u8>) -> Result<StoredTransaction, StoreError>;

    /// Persists the given fields of an already stored transaction.
    fn update_fields(
        &self,
        record: &TransactionRecord,
        fields: &[TxField],
    ) -> Result<(), StoreError>;

    /// Hashes of stored transactions referencing `hash` as trunk or branch.
    fn approvers(&self, hash: &TxHash) -> Result<Vec<TxHash>, StoreError>;

    /// Number of fully stored transactions.
    fn transaction_count(&self) -> usize;

    fn is_solid(&self, hash: &TxHash) -> Result<bool, StoreError> {
        Ok(self
            .load_transaction(hash)?
            .map(|record| record.solid)
            .unwrap_or(false))
    }

    /// `true` when the full transaction (not just a placeholder) is stored.
    fn exists(&self, hash: &TxHash) -> Result<bool, StoreError> {
        Ok(self
            .load_transaction(hash)?
            .is_some_and(|record| !record.is_placeholder()))
    }
}

/// Local snapshot state.
pub trait SnapshotProvider: Send + Sync {
    /// Hashes treated as solid ancestry terminators.
    fn solid_entry_points(&self) -> HashSet<TxHash>;

    fn is_solid_entry_point(&self, hash: &TxHash) -> bool {
        self.solid_entry_points().contains(hash)
    }

    /// Index of the milestone the local snapshot starts at.
    fn initial_milestone_index(&self) -> i32;
}

/// Tip selection used when answering random tip requests.
pub trait TipsProvider: Send + Sync {
    fn random_solid_tip(&self) -> Option<TxHash>;

    fn random_non_solid_tip(&self) -> Option<TxHash>;
}

/// Coordinator milestone bookkeeping.
pub trait MilestoneTracker: Send + Sync {
    fn latest_milestone_hash(&self) -> TxHash;

    fn latest_milestone_index(&self) -> i32;

    fn latest_solid_milestone_index(&self) -> i32;

    fn milestone_hash(&self, index: i32) -> Option<TxHash>;
}

/// The set of neighbors a worker may talk to.
pub trait NeighborDirectory: Send + Sync {
    /// Neighbors that completed the handshake and are not being dropped.
    fn connected_neighbors(&self) -> Vec<NeighborHandle>;
}

/// Fixed neighbor list, for wiring without a router.
#[derive(Clone, Default)]
pub struct StaticNeighborDirectory {
    neighbors: Vec<NeighborHandle>,
}

impl StaticNeighborDirectory {
    pub fn new(neighbors: Vec<NeighborHandle>) -> Self {
        Self { neighbors }
    }
}

impl NeighborDirectory for StaticNeighborDirectory {
    fn connected_neighbors(&self) -> Vec<NeighborHandle> {
        self.neighbors.clone()
    }
}

//! Relays transactions to connected neighbors.
//!
//! Two sources feed each tick: transactions the pipeline just stored, which
//! skip the neighbor they came from, and transactions that just became solid,
//! which go to everyone.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::{TransactionRecord, TxHash};
use crate::neighbor::{ConnectionId, NeighborHandle};
use crate::ports::NeighborDirectory;
use crate::service::gossip::TransactionGossiper;
use crate::service::pipeline::TransactionProcessingPipeline;
use crate::service::solidifier::TransactionSolidifier;

pub struct TransactionBroadcaster {
    gossiper: TransactionGossiper,
    solidifier: Arc<TransactionSolidifier>,
    pipeline: Arc<TransactionProcessingPipeline>,
    neighbors: Arc<dyn NeighborDirectory>,
}

impl TransactionBroadcaster {
    pub fn new(
        gossiper: TransactionGossiper,
        solidifier: Arc<TransactionSolidifier>,
        pipeline: Arc<TransactionProcessingPipeline>,
        neighbors: Arc<dyn NeighborDirectory>,
    ) -> Self {
        Self {
            gossiper,
            solidifier,
            pipeline,
            neighbors,
        }
    }

    /// One scheduler tick. Returns the number of transactions relayed.
    ///
    /// Only the solid snapshot taken at the start of the tick is cleared, so
    /// transactions queued meanwhile wait for the next tick.
    pub fn broadcast(&self) -> usize {
        let relays = self.pipeline.take_relays();
        let batch = self.solidifier.broadcast_queue();
        if relays.is_empty() && batch.is_empty() {
            return 0;
        }

        let neighbors = self.neighbors.connected_neighbors();
        for item in &relays {
            self.send_to_all(&neighbors, &item.tx, item.skip);
        }
        for tx in &batch {
            self.send_to_all(&neighbors, tx, None);
        }

        if !batch.is_empty() {
            let sent: HashSet<TxHash> = batch.iter().map(|tx| tx.hash).collect();
            self.solidifier.clear_from_broadcast_queue(&sent);
        }
        debug!(
            relayed = relays.len(),
            solid = batch.len(),
            neighbors = neighbors.len(),
            "broadcast transactions"
        );
        relays.len() + batch.len()
    }

    fn send_to_all(
        &self,
        neighbors: &[NeighborHandle],
        tx: &TransactionRecord,
        skip: Option<ConnectionId>,
    ) {
        for neighbor in neighbors.iter().filter(|n| Some(n.id()) != skip) {
            if let Err(e) = self.gossiper.gossip_transaction_to(neighbor, tx, false) {
                warn!(
                    neighbor = %neighbor.identity(),
                    hash = %tx.hash,
                    error = %e,
                    "failed to broadcast transaction"
                );
            }
        }
    }
}

//! Building and queueing transaction gossip frames.

use std::sync::Arc;

use crate::domain::{encode_transaction_gossip, TransactionRecord, TRANSACTION_BYTES};
use crate::events::GossipError;
use crate::neighbor::NeighborHandle;
use crate::service::requester::TransactionRequester;

/// Sends transactions to neighbors with a request piggy-backed on each frame.
#[derive(Clone)]
pub struct TransactionGossiper {
    requester: Arc<TransactionRequester>,
}

impl TransactionGossiper {
    pub fn new(requester: Arc<TransactionRequester>) -> Self {
        Self { requester }
    }

    pub fn requester(&self) -> &Arc<TransactionRequester> {
        &self.requester
    }

    /// Queues `tx` on `neighbor`.
    ///
    /// The requested hash is the next missing transaction, or the hash of
    /// `tx` itself when nothing is missing or `use_own_hash` is set. A queued
    /// frame counts as sent even though the socket write happens later.
    pub fn gossip_transaction_to(
        &self,
        neighbor: &NeighborHandle,
        tx: &TransactionRecord,
        use_own_hash: bool,
    ) -> Result<(), GossipError> {
        if tx.bytes.len() != TRANSACTION_BYTES {
            return Err(GossipError::Internal(format!(
                "cannot gossip {}: {} bytes",
                tx.hash,
                tx.bytes.len()
            )));
        }

        let requested = if use_own_hash {
            tx.hash
        } else {
            self.requester
                .transaction_to_request(false)?
                .unwrap_or(tx.hash)
        };

        neighbor.send(encode_transaction_gossip(&tx.bytes, &requested));
        neighbor.metrics().incr_sent_transactions();
        Ok(())
    }
}

//! # Transaction Requester Worker
//!
//! Works through the request queue by sending a random tip, with a request
//! piggy-backed, to every connected neighbor.
//!
//! Below the activation threshold the worker stands down: ordinary relayed
//! traffic already carries requests and drains a short queue on its own.

use std::sync::Arc;

use tracing::warn;

use crate::domain::{GossipConfig, TransactionRecord, TxHash};
use crate::events::GossipError;
use crate::ports::{NeighborDirectory, TangleStore, TipsProvider};
use crate::service::gossip::TransactionGossiper;
use crate::service::requester::TransactionRequester;

pub struct TransactionRequesterWorker {
    requester: Arc<TransactionRequester>,
    gossiper: TransactionGossiper,
    store: Arc<dyn TangleStore>,
    tips: Arc<dyn TipsProvider>,
    neighbors: Arc<dyn NeighborDirectory>,
    activation_threshold: usize,
}

impl TransactionRequesterWorker {
    pub fn new(
        gossiper: TransactionGossiper,
        store: Arc<dyn TangleStore>,
        tips: Arc<dyn TipsProvider>,
        neighbors: Arc<dyn NeighborDirectory>,
        config: &GossipConfig,
    ) -> Self {
        Self {
            requester: gossiper.requester().clone(),
            gossiper,
            store,
            tips,
            neighbors,
            activation_threshold: config.requester_activation_threshold,
        }
    }

    pub fn is_active(&self) -> bool {
        self.requester.number_of_transactions_to_request() >= self.activation_threshold
    }

    /// One scheduler tick. Returns whether anything was sent.
    pub fn process_request_queue(&self) -> Result<bool, GossipError> {
        self.requester.requeue_stale_requests();
        if !self.is_active() {
            return Ok(false);
        }

        match self.transaction_to_send_with_request()? {
            Some(tx) => {
                self.send_to_neighbors(&tx);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// A random solid tip, else a random non-solid tip, else the null
    /// transaction.
    fn transaction_to_send_with_request(&self) -> Result<Option<TransactionRecord>, GossipError> {
        let tip = self
            .tips
            .random_solid_tip()
            .or_else(|| self.tips.random_non_solid_tip())
            .unwrap_or(TxHash::NULL);
        if tip.is_null() {
            return Ok(Some(TransactionRecord::null()));
        }

        let tx = self.store.load_transaction(&tip)?;
        Ok(tx.filter(|tx| !tx.is_placeholder()))
    }

    fn send_to_neighbors(&self, tx: &TransactionRecord) {
        for neighbor in self.neighbors.connected_neighbors() {
            if let Err(e) = self.gossiper.gossip_transaction_to(&neighbor, tx, false) {
                warn!(neighbor = %neighbor.identity(), error = %e, "failed to send request");
            }
        }
    }
}

//! # Tips Requester
//!
//! Every few seconds, sends the latest milestone to all neighbors as a tip
//! request, independent of request queue pressure. On a coarser timer it also
//! logs the depth of every queue in the gossip layer.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::domain::GossipConfig;
use crate::events::GossipError;
use crate::ports::{MilestoneTracker, NeighborDirectory, TangleStore};
use crate::service::gossip::TransactionGossiper;
use crate::service::pipeline::TransactionProcessingPipeline;
use crate::service::solidifier::TransactionSolidifier;

/// Queue depths across the gossip layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub to_process: usize,
    pub to_broadcast: usize,
    /// Pending plus handed-out requests.
    pub to_request: usize,
    pub to_reply: usize,
    pub to_relay: usize,
    pub total_transactions: usize,
}

pub struct TipsRequester {
    gossiper: TransactionGossiper,
    store: Arc<dyn TangleStore>,
    milestones: Arc<dyn MilestoneTracker>,
    neighbors: Arc<dyn NeighborDirectory>,
    pipeline: Arc<TransactionProcessingPipeline>,
    solidifier: Arc<TransactionSolidifier>,
    stats_interval: Duration,
    last_stats: Mutex<Option<Instant>>,
}

impl TipsRequester {
    pub fn new(
        gossiper: TransactionGossiper,
        store: Arc<dyn TangleStore>,
        milestones: Arc<dyn MilestoneTracker>,
        neighbors: Arc<dyn NeighborDirectory>,
        pipeline: Arc<TransactionProcessingPipeline>,
        solidifier: Arc<TransactionSolidifier>,
        config: &GossipConfig,
    ) -> Self {
        Self {
            gossiper,
            store,
            milestones,
            neighbors,
            pipeline,
            solidifier,
            stats_interval: Duration::from_millis(config.queue_stats_interval_ms),
            last_stats: Mutex::new(None),
        }
    }

    /// One scheduler tick. Returns the number of neighbors the milestone was
    /// queued for.
    pub fn request_tips(&self) -> Result<usize, GossipError> {
        let mut sent = 0;
        let milestone_hash = self.milestones.latest_milestone_hash();
        let milestone = if milestone_hash.is_null() {
            None
        } else {
            self.store
                .load_transaction(&milestone_hash)?
                .filter(|tx| !tx.is_placeholder())
        };

        if let Some(milestone) = milestone {
            for neighbor in self.neighbors.connected_neighbors() {
                match self.gossiper.gossip_transaction_to(&neighbor, &milestone, true) {
                    Ok(()) => sent += 1,
                    Err(e) => warn!(
                        neighbor = %neighbor.identity(),
                        error = %e,
                        "error while sending tip request"
                    ),
                }
            }
        }

        self.maybe_log_stats();
        Ok(sent)
    }

    pub fn queue_stats(&self) -> QueueStats {
        let requester = self.gossiper.requester();
        QueueStats {
            to_process: self.pipeline.received_queue_len(),
            to_broadcast: self.solidifier.broadcast_queue_len(),
            to_request: requester.number_of_transactions_to_request()
                + requester.number_of_recently_requested_transactions(),
            to_reply: self.pipeline.reply_queue_len(),
            to_relay: self.pipeline.relay_queue_len(),
            total_transactions: self.store.transaction_count(),
        }
    }

    fn maybe_log_stats(&self) {
        {
            let mut last = self.last_stats.lock();
            if last.is_some_and(|at| at.elapsed() < self.stats_interval) {
                return;
            }
            *last = Some(Instant::now());
        }

        let stats = self.queue_stats();
        info!(
            to_process = stats.to_process,
            to_broadcast = stats.to_broadcast,
            to_request = stats.to_request,
            to_reply = stats.to_reply,
            to_relay = stats.to_relay,
            total_transactions = stats.total_transactions,
            "queue stats"
        );
    }
}

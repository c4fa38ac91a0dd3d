//! # Transaction Processing Pipeline
//!
//! Intake for gossip traffic handed over by neighbors.
//!
//! ```text
//! neighbor ──process()──→ [received] ──seen?──────────────────────┐
//!                              │                                   │
//!                              └──weight──store──→ solidification  │
//!                                          │                       ↓
//!                                          └──→ [relays]      [replies] ──→ neighbor
//! ```
//!
//! `process` only enqueues, so connection tasks never wait on the store.
//! Newly stored transactions are queued for relay to the other neighbors;
//! the broadcaster drains that queue.

use rand::Rng;
use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{debug, error, warn};

use crate::domain::{
    decode_transaction_gossip, BoundedQueue, GossipConfig, NeighborState, RecentlySeenCache,
    TransactionRecord, TxHash, TRANSACTION_BYTES,
};
use crate::events::GossipError;
use crate::neighbor::{ConnectionId, NeighborHandle};
use crate::ports::{MilestoneTracker, TangleStore, TipsProvider, TransactionIntake};
use crate::service::gossip::TransactionGossiper;
use crate::service::requester::TransactionRequester;
use crate::service::solidifier::TransactionSolidifier;

struct ReceivedItem {
    neighbor: NeighborHandle,
    payload: Vec<u8>,
}

struct ReplyItem {
    neighbor: NeighborHandle,
    /// Null for a random tip request.
    requested: TxHash,
}

/// A newly stored transaction waiting to be relayed.
#[derive(Clone, Debug)]
pub struct RelayItem {
    pub tx: TransactionRecord,
    /// Neighbor the transaction must not be sent back to.
    pub skip: Option<ConnectionId>,
}

pub struct TransactionProcessingPipeline {
    gossiper: TransactionGossiper,
    requester: Arc<TransactionRequester>,
    solidifier: Arc<TransactionSolidifier>,
    store: Arc<dyn TangleStore>,
    tips: Arc<dyn TipsProvider>,
    milestones: Arc<dyn MilestoneTracker>,
    received: BoundedQueue<ReceivedItem>,
    replies: BoundedQueue<ReplyItem>,
    relays: BoundedQueue<RelayItem>,
    seen: RecentlySeenCache,
    mwm: u32,
    p_reply_milestone: f64,
    wakeup: Arc<Notify>,
}

impl TransactionProcessingPipeline {
    pub fn new(
        gossiper: TransactionGossiper,
        solidifier: Arc<TransactionSolidifier>,
        store: Arc<dyn TangleStore>,
        tips: Arc<dyn TipsProvider>,
        milestones: Arc<dyn MilestoneTracker>,
        config: &GossipConfig,
    ) -> Self {
        Self {
            requester: gossiper.requester().clone(),
            gossiper,
            solidifier,
            store,
            tips,
            milestones,
            received: BoundedQueue::new(config.pipeline_queue_capacity),
            replies: BoundedQueue::new(config.pipeline_queue_capacity),
            relays: BoundedQueue::new(config.pipeline_queue_capacity),
            seen: RecentlySeenCache::new(config.seen_cache_capacity),
            mwm: u32::from(config.mwm),
            p_reply_milestone: config.p_reply_milestone,
            wakeup: Arc::new(Notify::new()),
        }
    }

    /// Notified whenever work is queued.
    pub fn wakeup(&self) -> Arc<Notify> {
        self.wakeup.clone()
    }

    pub fn received_queue_len(&self) -> usize {
        self.received.len()
    }

    pub fn reply_queue_len(&self) -> usize {
        self.replies.len()
    }

    pub fn relay_queue_len(&self) -> usize {
        self.relays.len()
    }

    /// Takes every transaction queued for relay, oldest first.
    pub fn take_relays(&self) -> Vec<RelayItem> {
        let mut batch = Vec::with_capacity(self.relays.len());
        while let Some(item) = self.relays.pop() {
            batch.push(item);
        }
        batch
    }

    /// Works through everything queued when the call started.
    ///
    /// Returns the number of items handled. A failing item is logged and
    /// skipped.
    pub fn process_queues(&self) -> usize {
        let mut handled = 0;
        for _ in 0..self.received.len() {
            let Some(item) = self.received.pop() else {
                break;
            };
            handled += 1;
            if let Err(e) = self.process_received(item) {
                error!(error = %e, "failed to process received transaction");
            }
        }
        for _ in 0..self.replies.len() {
            let Some(item) = self.replies.pop() else {
                break;
            };
            handled += 1;
            if let Err(e) = self.reply(item) {
                warn!(error = %e, "failed to reply");
            }
        }
        handled
    }

    fn process_received(&self, item: ReceivedItem) -> Result<(), GossipError> {
        let ReceivedItem { neighbor, payload } = item;
        let metrics = neighbor.metrics();

        let (tx_bytes, requested) = match decode_transaction_gossip(&payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                metrics.incr_invalid_transactions();
                warn!(neighbor = %neighbor.identity(), error = %e, "dropping malformed gossip");
                return Ok(());
            }
        };
        metrics.incr_all_transactions();

        let digest = self.seen.digest(&tx_bytes);
        if let Some(hash) = self.seen.get(digest) {
            self.queue_reply(neighbor, reply_target(requested, hash));
            return Ok(());
        }

        let hash = self.store.hash_transaction(&tx_bytes);
        let weight = hash.weight_magnitude();
        if weight < self.mwm {
            metrics.incr_invalid_transactions();
            debug!(
                neighbor = %neighbor.identity(),
                %hash,
                weight,
                mwm = self.mwm,
                "dropping transaction below minimum weight"
            );
            return Ok(());
        }

        let stored = match self.store.store_transaction(tx_bytes) {
            Ok(stored) => stored,
            Err(e) => {
                metrics.incr_invalid_transactions();
                return Err(e.into());
            }
        };
        let hash = stored.record.hash;
        self.seen.insert(digest, hash);

        if stored.is_new {
            metrics.incr_new_transactions();
            self.requester.clear_transaction_request(&hash);
            if self.requester.remove_recently_requested(&hash) {
                // it was needed for solidification, so its parents likely are too
                self.requester.request_trunk_and_branch(&stored.record)?;
            }
            if !self.solidifier.quick_set_solid(&stored.record)? {
                self.solidifier.add_to_solidification_queue(hash);
            }
            self.queue_relay(&neighbor, stored.record);
        } else {
            metrics.incr_stale_transactions();
            self.requester.remove_recently_requested(&hash);
        }

        self.queue_reply(neighbor, reply_target(requested, hash));
        Ok(())
    }

    /// Sends back to the origin only while catching up, so a syncing peer
    /// keeps receiving traffic.
    fn queue_relay(&self, origin: &NeighborHandle, tx: TransactionRecord) {
        let skip = self.is_synced().then_some(origin.id());
        if self.relays.push(RelayItem { tx, skip }).is_some() {
            debug!("relay queue full, dropped oldest transaction");
        }
    }

    fn queue_reply(&self, neighbor: NeighborHandle, requested: TxHash) {
        if self.replies.push(ReplyItem { neighbor, requested }).is_some() {
            debug!("reply queue full, dropped oldest reply");
        }
        self.wakeup.notify_one();
    }

    fn reply(&self, item: ReplyItem) -> Result<(), GossipError> {
        let ReplyItem { neighbor, requested } = item;
        if neighbor.state() == NeighborState::MarkedForDisconnect {
            return Ok(());
        }

        let tx = if requested.is_null() {
            if self.is_synced() {
                return Ok(());
            }
            neighbor.metrics().incr_random_transaction_requests();
            let pointer = self.random_tip_pointer();
            self.load_full(&pointer)?
        } else {
            self.load_full(&requested)?
        };

        match tx {
            Some(tx) => self.gossiper.gossip_transaction_to(&neighbor, &tx, false),
            None => {
                // keep the exchange going with the latest milestone and a request
                let milestone = self.milestones.latest_milestone_hash();
                match self.load_full(&milestone)? {
                    Some(tx) => self.gossiper.gossip_transaction_to(&neighbor, &tx, false),
                    None => Ok(()),
                }
            }
        }
    }

    /// Within one milestone of the latest one.
    fn is_synced(&self) -> bool {
        self.milestones.latest_solid_milestone_index()
            >= self.milestones.latest_milestone_index().saturating_sub(1)
    }

    fn random_tip_pointer(&self) -> TxHash {
        let tip = if rand::thread_rng().gen::<f64>() < self.p_reply_milestone {
            Some(self.milestones.latest_milestone_hash())
        } else {
            self.tips.random_solid_tip()
        };
        tip.unwrap_or(TxHash::NULL)
    }

    fn load_full(&self, hash: &TxHash) -> Result<Option<TransactionRecord>, GossipError> {
        if hash.is_null() {
            return Ok(None);
        }
        Ok(self
            .store
            .load_transaction(hash)?
            .filter(|tx| tx.bytes.len() == TRANSACTION_BYTES))
    }
}

/// Asking for the transaction just sent means "send me anything".
fn reply_target(requested: TxHash, received: TxHash) -> TxHash {
    if requested == received {
        TxHash::NULL
    } else {
        requested
    }
}

impl TransactionIntake for TransactionProcessingPipeline {
    fn process(&self, neighbor: &NeighborHandle, payload: Vec<u8>) {
        let item = ReceivedItem {
            neighbor: neighbor.clone(),
            payload,
        };
        if self.received.push(item).is_some() {
            debug!("received queue full, dropped oldest transaction");
        }
        self.wakeup.notify_one();
    }

    fn process_milestone_request(&self, neighbor: &NeighborHandle, index: i32) {
        let hash = if index == 0 {
            Some(self.milestones.latest_milestone_hash())
        } else {
            self.milestones.milestone_hash(index)
        };
        match hash.filter(|hash| !hash.is_null()) {
            Some(hash) => self.queue_reply(neighbor.clone(), hash),
            None => debug!(neighbor = %neighbor.identity(), index, "unknown milestone requested"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryTangle;
    use crate::domain::{
        decode_requested_hash, encode_transaction_gossip, HASH_BYTES, HEADER_BYTES,
    };
    use crate::service::requester::RequesterConfig;

    struct Fixture {
        pipeline: TransactionProcessingPipeline,
        tangle: Arc<InMemoryTangle>,
        requester: Arc<TransactionRequester>,
        solidifier: Arc<TransactionSolidifier>,
        neighbor: NeighborHandle,
    }

    fn fixture(config: GossipConfig) -> Fixture {
        let tangle = Arc::new(InMemoryTangle::new());
        let requester = Arc::new(TransactionRequester::new(
            tangle.clone(),
            tangle.clone(),
            RequesterConfig {
                p_remove_request: 0.0,
                ..RequesterConfig::from(&config)
            },
        ));
        let solidifier = Arc::new(TransactionSolidifier::new(
            tangle.clone(),
            tangle.clone(),
            requester.clone(),
            &config,
        ));
        let pipeline = TransactionProcessingPipeline::new(
            TransactionGossiper::new(requester.clone()),
            solidifier.clone(),
            tangle.clone(),
            tangle.clone(),
            tangle.clone(),
            &config,
        );
        Fixture {
            pipeline,
            tangle,
            requester,
            solidifier,
            neighbor: NeighborHandle::new(ConnectionId(1), "127.0.0.1", Some(15600), 100),
        }
    }

    /// Accepts any proof of work.
    fn config() -> GossipConfig {
        GossipConfig {
            mwm: 0,
            ..GossipConfig::default()
        }
    }

    /// First nonce whose transaction hash satisfies `accept`.
    fn nonce_where(entry: TxHash, accept: impl Fn(u32) -> bool) -> u64 {
        (0..)
            .find(|nonce| {
                let tx = InMemoryTangle::transaction_bytes(entry, entry, *nonce);
                accept(InMemoryTangle::hash_of(&tx).weight_magnitude())
            })
            .unwrap()
    }

    fn gossip_payload(tx: &[u8], requested: &TxHash) -> Vec<u8> {
        encode_transaction_gossip(tx, requested)[HEADER_BYTES..].to_vec()
    }

    fn sent_requests(neighbor: &NeighborHandle) -> Vec<TxHash> {
        neighbor
            .queued_frames()
            .iter()
            .map(|frame| decode_requested_hash(&frame[HEADER_BYTES..]).unwrap())
            .collect()
    }

    #[test]
    fn test_new_transaction_stored_and_queued_for_solidification() {
        let f = fixture(config());
        let entry = TxHash::new([1u8; HASH_BYTES]);
        let tx = InMemoryTangle::transaction_bytes(entry, entry, 1);
        let hash = InMemoryTangle::hash_of(&tx);

        f.pipeline.process(&f.neighbor, gossip_payload(&tx, &hash));
        assert_eq!(f.pipeline.received_queue_len(), 1);
        f.pipeline.process_queues();

        assert!(f.tangle.exists(&hash).unwrap());
        assert_eq!(f.solidifier.solidification_queue_len(), 1);
        let metrics = f.neighbor.metrics().snapshot();
        assert_eq!(metrics.all_transactions, 1);
        assert_eq!(metrics.new_transactions, 1);
        assert_eq!(metrics.stale_transactions, 0);
    }

    #[test]
    fn test_transaction_on_solid_parents_is_solid_at_once() {
        let f = fixture(config());
        let entry = TxHash::new([1u8; HASH_BYTES]);
        f.tangle.add_solid_entry_point(entry);
        let tx = InMemoryTangle::transaction_bytes(entry, entry, 1);
        let hash = InMemoryTangle::hash_of(&tx);

        f.pipeline.process(&f.neighbor, gossip_payload(&tx, &TxHash::NULL));
        f.pipeline.process_queues();

        assert!(f.tangle.is_solid(&hash).unwrap());
        assert_eq!(f.solidifier.solidification_queue_len(), 0);
        assert_eq!(f.solidifier.broadcast_queue_len(), 1);
    }

    #[test]
    fn test_duplicate_payload_answered_from_seen_cache() {
        let f = fixture(config());
        let entry = TxHash::new([1u8; HASH_BYTES]);
        let tx = InMemoryTangle::transaction_bytes(entry, entry, 1);
        let wanted = f
            .tangle
            .store_transaction(InMemoryTangle::transaction_bytes(entry, entry, 2))
            .unwrap()
            .record
            .hash;

        f.pipeline.process(&f.neighbor, gossip_payload(&tx, &TxHash::NULL));
        f.pipeline.process(&f.neighbor, gossip_payload(&tx, &wanted));
        f.pipeline.process_queues();

        let metrics = f.neighbor.metrics().snapshot();
        assert_eq!(metrics.all_transactions, 2);
        assert_eq!(metrics.new_transactions, 1);
        assert_eq!(metrics.stale_transactions, 0);
        assert_eq!(f.pipeline.take_relays().len(), 1);

        // the duplicate's request is still served
        let frames = f.neighbor.queued_frames();
        assert_eq!(frames.len(), 1);
        let (sent, _) = decode_transaction_gossip(&frames[0][HEADER_BYTES..]).unwrap();
        assert_eq!(InMemoryTangle::hash_of(&sent), wanted);
    }

    #[test]
    fn test_transaction_already_in_tangle_counts_stale() {
        let f = fixture(config());
        let entry = TxHash::new([1u8; HASH_BYTES]);
        let tx = InMemoryTangle::transaction_bytes(entry, entry, 1);
        f.tangle.store_transaction(tx.clone()).unwrap();

        f.pipeline.process(&f.neighbor, gossip_payload(&tx, &TxHash::NULL));
        f.pipeline.process_queues();

        let metrics = f.neighbor.metrics().snapshot();
        assert_eq!(metrics.new_transactions, 0);
        assert_eq!(metrics.stale_transactions, 1);
        assert_eq!(f.pipeline.relay_queue_len(), 0);
    }

    #[test]
    fn test_light_transaction_rejected() {
        let f = fixture(GossipConfig {
            mwm: 8,
            ..GossipConfig::default()
        });
        let entry = TxHash::new([1u8; HASH_BYTES]);
        let tx = InMemoryTangle::transaction_bytes(entry, entry, nonce_where(entry, |w| w < 8));

        f.pipeline.process(&f.neighbor, gossip_payload(&tx, &TxHash::NULL));
        f.pipeline.process_queues();

        let metrics = f.neighbor.metrics().snapshot();
        assert_eq!(metrics.all_transactions, 1);
        assert_eq!(metrics.invalid_transactions, 1);
        assert_eq!(metrics.new_transactions, 0);
        assert_eq!(f.tangle.transaction_count(), 0);
        assert_eq!(f.pipeline.relay_queue_len(), 0);
    }

    #[test]
    fn test_heavy_enough_transaction_accepted() {
        let f = fixture(GossipConfig {
            mwm: 8,
            ..GossipConfig::default()
        });
        let entry = TxHash::new([1u8; HASH_BYTES]);
        let tx = InMemoryTangle::transaction_bytes(entry, entry, nonce_where(entry, |w| w >= 8));

        f.pipeline.process(&f.neighbor, gossip_payload(&tx, &TxHash::NULL));
        f.pipeline.process_queues();

        let metrics = f.neighbor.metrics().snapshot();
        assert_eq!(metrics.invalid_transactions, 0);
        assert_eq!(metrics.new_transactions, 1);
        assert!(f.tangle.exists(&InMemoryTangle::hash_of(&tx)).unwrap());
    }

    #[test]
    fn test_relay_skips_origin_when_synced() {
        let f = fixture(config());
        let entry = TxHash::new([1u8; HASH_BYTES]);
        let tx = InMemoryTangle::transaction_bytes(entry, entry, 1);
        f.tangle.set_latest_milestone(TxHash::new([2u8; HASH_BYTES]), 10);
        f.tangle.set_latest_solid_milestone_index(9);

        f.pipeline.process(&f.neighbor, gossip_payload(&tx, &TxHash::NULL));
        f.pipeline.process_queues();

        let relays = f.pipeline.take_relays();
        assert_eq!(relays.len(), 1);
        assert_eq!(relays[0].tx.hash, InMemoryTangle::hash_of(&tx));
        assert_eq!(relays[0].skip, Some(ConnectionId(1)));
        assert_eq!(f.pipeline.relay_queue_len(), 0);
    }

    #[test]
    fn test_relay_includes_origin_when_behind() {
        let f = fixture(config());
        let entry = TxHash::new([1u8; HASH_BYTES]);
        let tx = InMemoryTangle::transaction_bytes(entry, entry, 1);
        f.tangle.set_latest_milestone(TxHash::new([2u8; HASH_BYTES]), 10);
        f.tangle.set_latest_solid_milestone_index(3);

        f.pipeline.process(&f.neighbor, gossip_payload(&tx, &TxHash::NULL));
        f.pipeline.process_queues();

        let relays = f.pipeline.take_relays();
        assert_eq!(relays.len(), 1);
        assert_eq!(relays[0].skip, None);
    }

    #[test]
    fn test_requested_transaction_pulls_in_parents() {
        let f = fixture(config());
        let trunk = TxHash::new([7u8; HASH_BYTES]);
        let branch = TxHash::new([8u8; HASH_BYTES]);
        let tx = InMemoryTangle::transaction_bytes(trunk, branch, 1);
        let hash = InMemoryTangle::hash_of(&tx);

        f.requester.request_transaction(hash, false).unwrap();
        assert_eq!(f.requester.transaction_to_request(false).unwrap(), Some(hash));

        f.pipeline.process(&f.neighbor, gossip_payload(&tx, &TxHash::NULL));
        f.pipeline.process_queues();

        assert!(!f.requester.was_transaction_recently_requested(&hash));
        assert!(f.requester.is_transaction_requested(&trunk, false));
        assert!(f.requester.is_transaction_requested(&branch, false));
    }

    #[test]
    fn test_explicit_request_answered() {
        let f = fixture(config());
        let entry = TxHash::new([1u8; HASH_BYTES]);
        let wanted = f
            .tangle
            .store_transaction(InMemoryTangle::transaction_bytes(entry, entry, 2))
            .unwrap()
            .record
            .hash;
        let tx = InMemoryTangle::transaction_bytes(entry, entry, 3);

        f.pipeline.process(&f.neighbor, gossip_payload(&tx, &wanted));
        f.pipeline.process_queues();

        let frames = f.neighbor.queued_frames();
        assert_eq!(frames.len(), 1);
        let (sent, _) = decode_transaction_gossip(&frames[0][HEADER_BYTES..]).unwrap();
        assert_eq!(InMemoryTangle::hash_of(&sent), wanted);
        assert_eq!(f.neighbor.metrics().snapshot().sent_transactions, 1);
    }

    #[test]
    fn test_unknown_request_answered_with_latest_milestone() {
        let f = fixture(config());
        let entry = TxHash::new([1u8; HASH_BYTES]);
        let milestone = f
            .tangle
            .store_transaction(InMemoryTangle::transaction_bytes(entry, entry, 9))
            .unwrap()
            .record
            .hash;
        f.tangle.set_latest_milestone(milestone, 10);

        let tx = InMemoryTangle::transaction_bytes(entry, entry, 3);
        f.pipeline
            .process(&f.neighbor, gossip_payload(&tx, &TxHash::new([0x55; HASH_BYTES])));
        f.pipeline.process_queues();

        let frames = f.neighbor.queued_frames();
        assert_eq!(frames.len(), 1);
        let (sent, _) = decode_transaction_gossip(&frames[0][HEADER_BYTES..]).unwrap();
        assert_eq!(InMemoryTangle::hash_of(&sent), milestone);
    }

    #[test]
    fn test_random_request_ignored_when_synced() {
        let f = fixture(config());
        let entry = TxHash::new([1u8; HASH_BYTES]);
        let tx = InMemoryTangle::transaction_bytes(entry, entry, 3);
        let hash = InMemoryTangle::hash_of(&tx);
        f.tangle.set_latest_milestone(TxHash::new([2u8; HASH_BYTES]), 10);
        f.tangle.set_latest_solid_milestone_index(9);

        // requesting the transaction itself is a random tip request
        f.pipeline.process(&f.neighbor, gossip_payload(&tx, &hash));
        f.pipeline.process_queues();

        assert_eq!(f.neighbor.send_queue_len(), 0);
        assert_eq!(f.neighbor.metrics().snapshot().random_transaction_requests, 0);
    }

    #[test]
    fn test_random_request_answered_with_solid_tip_when_behind() {
        let f = fixture(GossipConfig {
            p_reply_milestone: 0.0,
            ..config()
        });
        let entry = TxHash::new([1u8; HASH_BYTES]);
        let tip = f
            .tangle
            .store_transaction(InMemoryTangle::transaction_bytes(entry, entry, 4))
            .unwrap()
            .record
            .hash;
        f.tangle.mark_solid(&tip);
        f.tangle.add_tip(tip);
        f.tangle.set_latest_milestone(TxHash::new([2u8; HASH_BYTES]), 10);
        f.tangle.set_latest_solid_milestone_index(3);

        let tx = InMemoryTangle::transaction_bytes(entry, entry, 3);
        f.pipeline.process(&f.neighbor, gossip_payload(&tx, &TxHash::NULL));
        f.pipeline.process_queues();

        let frames = f.neighbor.queued_frames();
        assert_eq!(frames.len(), 1);
        let (sent, _) = decode_transaction_gossip(&frames[0][HEADER_BYTES..]).unwrap();
        assert_eq!(InMemoryTangle::hash_of(&sent), tip);
        assert_eq!(f.neighbor.metrics().snapshot().random_transaction_requests, 1);
    }

    #[test]
    fn test_reply_piggybacks_missing_hash() {
        let f = fixture(config());
        let entry = TxHash::new([1u8; HASH_BYTES]);
        let wanted = f
            .tangle
            .store_transaction(InMemoryTangle::transaction_bytes(entry, entry, 2))
            .unwrap()
            .record
            .hash;
        let missing = TxHash::new([0x66; HASH_BYTES]);
        f.requester.request_transaction(missing, false).unwrap();

        let tx = InMemoryTangle::transaction_bytes(entry, entry, 3);
        f.pipeline.process(&f.neighbor, gossip_payload(&tx, &wanted));
        f.pipeline.process_queues();

        assert_eq!(sent_requests(&f.neighbor), vec![missing]);
    }

    #[test]
    fn test_malformed_gossip_counts_invalid() {
        let f = fixture(config());
        f.pipeline.process(&f.neighbor, vec![0u8; 60]);
        f.pipeline.process_queues();
        assert_eq!(f.neighbor.metrics().snapshot().invalid_transactions, 1);
        assert_eq!(f.tangle.transaction_count(), 0);
    }

    #[test]
    fn test_milestone_request_by_index() {
        let f = fixture(config());
        let entry = TxHash::new([1u8; HASH_BYTES]);
        let milestone = f
            .tangle
            .store_transaction(InMemoryTangle::transaction_bytes(entry, entry, 5))
            .unwrap()
            .record
            .hash;
        f.tangle.add_milestone(milestone, 42);

        f.pipeline.process_milestone_request(&f.neighbor, 42);
        f.pipeline.process_milestone_request(&f.neighbor, 43);
        assert_eq!(f.pipeline.reply_queue_len(), 1);
        f.pipeline.process_queues();

        let frames = f.neighbor.queued_frames();
        assert_eq!(frames.len(), 1);
        let (sent, _) = decode_transaction_gossip(&frames[0][HEADER_BYTES..]).unwrap();
        assert_eq!(InMemoryTangle::hash_of(&sent), milestone);
    }

    #[test]
    fn test_received_queue_drops_oldest() {
        let f = fixture(GossipConfig {
            pipeline_queue_capacity: 2,
            ..config()
        });
        for _ in 0..5 {
            f.pipeline.process(&f.neighbor, vec![0u8; 400]);
        }
        assert_eq!(f.pipeline.received_queue_len(), 2);
    }
}

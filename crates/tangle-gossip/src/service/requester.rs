//! # Transaction Requester
//!
//! Bookkeeping of transactions known to be missing. Hashes wait in an
//! insertion-ordered "to request" set until handed out, then sit in a recency
//! record until the transaction arrives or the request goes stale.
//!
//! Milestone requests live in their own set and are never dropped at random.

use parking_lot::Mutex;
use rand::Rng;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::domain::{GossipConfig, TransactionRecord, TxHash};
use crate::events::StoreError;
use crate::ports::{SnapshotProvider, TangleStore};

/// Requester tunables.
#[derive(Clone, Debug)]
pub struct RequesterConfig {
    /// Cap on non-milestone requests; the eldest is evicted beyond it.
    pub max_requested_transactions: usize,
    pub p_remove_request: f64,
    pub recent_request_ttl: Duration,
}

impl Default for RequesterConfig {
    fn default() -> Self {
        Self::from(&GossipConfig::default())
    }
}

impl From<&GossipConfig> for RequesterConfig {
    fn from(config: &GossipConfig) -> Self {
        Self {
            max_requested_transactions: config.max_requested_transactions,
            p_remove_request: config.p_remove_request,
            recent_request_ttl: config.recent_request_ttl(),
        }
    }
}

/// Hash set that remembers insertion order.
#[derive(Debug)]
struct OrderedHashes<V> {
    next_seq: u64,
    order: BTreeMap<u64, TxHash>,
    entries: HashMap<TxHash, (u64, V)>,
}

impl<V> Default for OrderedHashes<V> {
    fn default() -> Self {
        Self {
            next_seq: 0,
            order: BTreeMap::new(),
            entries: HashMap::new(),
        }
    }
}

impl<V> OrderedHashes<V> {
    /// Inserts at the back. Existing entries keep their position.
    fn insert(&mut self, hash: TxHash, value: V) -> bool {
        if self.entries.contains_key(&hash) {
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, hash);
        self.entries.insert(hash, (seq, value));
        true
    }

    fn remove(&mut self, hash: &TxHash) -> Option<V> {
        let (seq, value) = self.entries.remove(hash)?;
        self.order.remove(&seq);
        Some(value)
    }

    fn contains(&self, hash: &TxHash) -> bool {
        self.entries.contains_key(hash)
    }

    fn first(&self) -> Option<(&TxHash, &V)> {
        let (_, hash) = self.order.first_key_value()?;
        self.entries.get(hash).map(|(_, value)| (hash, value))
    }

    fn pop_first(&mut self) -> Option<(TxHash, V)> {
        let (_, hash) = self.order.pop_first()?;
        let (_, value) = self.entries.remove(&hash)?;
        Some((hash, value))
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn hashes(&self) -> impl Iterator<Item = &TxHash> {
        self.order.values()
    }
}

#[derive(Debug)]
struct RecentRequest {
    requested_at: Instant,
    milestone: bool,
}

#[derive(Debug, Default)]
struct RequesterState {
    transactions: OrderedHashes<()>,
    milestones: OrderedHashes<()>,
    recently_requested: OrderedHashes<RecentRequest>,
}

/// Shared set of transactions to fetch from neighbors.
pub struct TransactionRequester {
    state: Mutex<RequesterState>,
    store: Arc<dyn TangleStore>,
    snapshot: Arc<dyn SnapshotProvider>,
    config: RequesterConfig,
}

impl TransactionRequester {
    pub fn new(
        store: Arc<dyn TangleStore>,
        snapshot: Arc<dyn SnapshotProvider>,
        config: RequesterConfig,
    ) -> Self {
        Self {
            state: Mutex::new(RequesterState::default()),
            store,
            snapshot,
            config,
        }
    }

    /// Marks `hash` as missing.
    ///
    /// Null hashes, solid entry points and transactions already stored are
    /// ignored. A milestone request supersedes a plain one.
    pub fn request_transaction(&self, hash: TxHash, milestone: bool) -> Result<(), StoreError> {
        if hash.is_null()
            || self.snapshot.is_solid_entry_point(&hash)
            || self.store.exists(&hash)?
        {
            return Ok(());
        }

        let mut state = self.state.lock();
        if milestone {
            state.transactions.remove(&hash);
            state.milestones.insert(hash, ());
        } else if !state.milestones.contains(&hash) && !state.recently_requested.contains(&hash) {
            if state.transactions.len() >= self.config.max_requested_transactions {
                if let Some((evicted, _)) = state.transactions.pop_first() {
                    trace!(hash = %evicted, "request set full, evicting eldest");
                }
            }
            state.transactions.insert(hash, ());
        }
        Ok(())
    }

    /// Requests both parents of a transaction that arrived by request.
    pub fn request_trunk_and_branch(&self, record: &TransactionRecord) -> Result<(), StoreError> {
        self.request_transaction(record.trunk, false)?;
        self.request_transaction(record.branch, false)
    }

    pub fn is_transaction_requested(&self, hash: &TxHash, milestone: bool) -> bool {
        let state = self.state.lock();
        if milestone {
            state.milestones.contains(hash)
        } else {
            state.milestones.contains(hash) || state.transactions.contains(hash)
        }
    }

    /// Requests waiting to be handed out.
    pub fn number_of_transactions_to_request(&self) -> usize {
        let state = self.state.lock();
        state.transactions.len() + state.milestones.len()
    }

    /// Requests handed out and not yet answered.
    pub fn number_of_recently_requested_transactions(&self) -> usize {
        self.state.lock().recently_requested.len()
    }

    pub fn requested_transactions(&self) -> Vec<TxHash> {
        let state = self.state.lock();
        state
            .transactions
            .hashes()
            .chain(state.milestones.hashes())
            .copied()
            .collect()
    }

    /// Cancels a pending request. Returns whether one existed.
    pub fn clear_transaction_request(&self, hash: &TxHash) -> bool {
        let mut state = self.state.lock();
        let milestone = state.milestones.remove(hash).is_some();
        let normal = state.transactions.remove(hash).is_some();
        milestone || normal
    }

    /// Forgets a handed-out request. Returns whether the hash had been
    /// requested by this node.
    pub fn remove_recently_requested(&self, hash: &TxHash) -> bool {
        self.state.lock().recently_requested.remove(hash).is_some()
    }

    pub fn was_transaction_recently_requested(&self, hash: &TxHash) -> bool {
        self.state.lock().recently_requested.contains(hash)
    }

    /// Hands out the oldest request still missing.
    ///
    /// `milestone_first` picks from the milestone set unless it is empty.
    /// Hashes that arrived in the meantime are discarded on the way. The
    /// returned hash moves to the recency record, except for the occasional
    /// plain request dropped with probability `p_remove_request` so that
    /// hashes nobody has are not asked for forever.
    pub fn transaction_to_request(
        &self,
        milestone_first: bool,
    ) -> Result<Option<TxHash>, StoreError> {
        loop {
            let (hash, from_milestones) = {
                let mut state = self.state.lock();
                let state = &mut *state;
                let (primary, alternative, primary_is_milestones) = if milestone_first {
                    (&mut state.milestones, &mut state.transactions, true)
                } else {
                    (&mut state.transactions, &mut state.milestones, false)
                };
                if let Some((hash, _)) = primary.pop_first() {
                    (hash, primary_is_milestones)
                } else if let Some((hash, _)) = alternative.pop_first() {
                    (hash, !primary_is_milestones)
                } else {
                    return Ok(None);
                }
            };

            if self.store.exists(&hash)? {
                debug!(%hash, "removed existing tx from request list");
                continue;
            }

            let drop_request =
                !from_milestones && rand::thread_rng().gen::<f64>() < self.config.p_remove_request;
            if drop_request {
                trace!(%hash, "dropping request");
            } else {
                let mut state = self.state.lock();
                if state.recently_requested.len() >= self.config.max_requested_transactions {
                    state.recently_requested.pop_first();
                }
                state.recently_requested.insert(
                    hash,
                    RecentRequest {
                        requested_at: Instant::now(),
                        milestone: from_milestones,
                    },
                );
            }
            return Ok(Some(hash));
        }
    }

    /// Moves handed-out requests older than the TTL back to the wanted sets.
    ///
    /// Returns how many were re-queued.
    pub fn requeue_stale_requests(&self) -> usize {
        let ttl = self.config.recent_request_ttl;
        let mut state = self.state.lock();
        let mut requeued = 0;
        while let Some((_, request)) = state.recently_requested.first() {
            if request.requested_at.elapsed() < ttl {
                break;
            }
            let Some((hash, request)) = state.recently_requested.pop_first() else {
                break;
            };
            if request.milestone {
                state.milestones.insert(hash, ());
            } else {
                if state.transactions.len() >= self.config.max_requested_transactions {
                    state.transactions.pop_first();
                }
                state.transactions.insert(hash, ());
            }
            requeued += 1;
        }
        if requeued > 0 {
            debug!(requeued, "re-queued stale requests");
        }
        requeued
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryTangle;
    use crate::domain::HASH_BYTES;

    fn hash(n: u8) -> TxHash {
        TxHash::new([n; HASH_BYTES])
    }

    fn requester_with(config: RequesterConfig) -> (TransactionRequester, Arc<InMemoryTangle>) {
        let tangle = Arc::new(InMemoryTangle::new());
        let requester = TransactionRequester::new(tangle.clone(), tangle.clone(), config);
        (requester, tangle)
    }

    fn deterministic() -> RequesterConfig {
        RequesterConfig {
            p_remove_request: 0.0,
            ..RequesterConfig::default()
        }
    }

    #[test]
    fn test_request_and_count() {
        let (requester, _) = requester_with(deterministic());
        requester.request_transaction(hash(1), false).unwrap();
        requester.request_transaction(hash(1), false).unwrap();
        requester.request_transaction(hash(2), true).unwrap();

        assert_eq!(requester.number_of_transactions_to_request(), 2);
        assert!(requester.is_transaction_requested(&hash(1), false));
        assert!(!requester.is_transaction_requested(&hash(1), true));
        assert!(requester.is_transaction_requested(&hash(2), true));
    }

    #[test]
    fn test_ignores_null_entry_points_and_stored() {
        let (requester, tangle) = requester_with(deterministic());
        tangle.add_solid_entry_point(hash(9));
        let stored = tangle.insert_with_hash(hash(8), hash(9), hash(9));

        requester.request_transaction(TxHash::NULL, false).unwrap();
        requester.request_transaction(hash(9), false).unwrap();
        requester.request_transaction(stored, false).unwrap();
        assert_eq!(requester.number_of_transactions_to_request(), 0);
    }

    #[test]
    fn test_milestone_request_supersedes_plain() {
        let (requester, _) = requester_with(deterministic());
        requester.request_transaction(hash(1), false).unwrap();
        requester.request_transaction(hash(1), true).unwrap();
        assert_eq!(requester.number_of_transactions_to_request(), 1);
        assert!(requester.is_transaction_requested(&hash(1), true));

        // a later plain request does not demote it
        requester.request_transaction(hash(1), false).unwrap();
        assert_eq!(requester.number_of_transactions_to_request(), 1);
    }

    #[test]
    fn test_eldest_evicted_when_full() {
        let (requester, _) = requester_with(RequesterConfig {
            max_requested_transactions: 3,
            ..deterministic()
        });
        for n in 1..=4 {
            requester.request_transaction(hash(n), false).unwrap();
        }
        assert_eq!(requester.requested_transactions(), vec![hash(2), hash(3), hash(4)]);
    }

    #[test]
    fn test_hands_out_oldest_and_records_recency() {
        let (requester, _) = requester_with(deterministic());
        requester.request_transaction(hash(1), false).unwrap();
        requester.request_transaction(hash(2), false).unwrap();

        assert_eq!(requester.transaction_to_request(false).unwrap(), Some(hash(1)));
        assert_eq!(requester.number_of_transactions_to_request(), 1);
        assert_eq!(requester.number_of_recently_requested_transactions(), 1);
        assert!(requester.was_transaction_recently_requested(&hash(1)));

        // a recently requested hash is not queued twice
        requester.request_transaction(hash(1), false).unwrap();
        assert_eq!(requester.number_of_transactions_to_request(), 1);

        assert!(requester.remove_recently_requested(&hash(1)));
        assert!(!requester.remove_recently_requested(&hash(1)));
    }

    #[test]
    fn test_milestone_first() {
        let (requester, _) = requester_with(deterministic());
        requester.request_transaction(hash(1), false).unwrap();
        requester.request_transaction(hash(2), true).unwrap();

        assert_eq!(requester.transaction_to_request(true).unwrap(), Some(hash(2)));
        assert_eq!(requester.transaction_to_request(true).unwrap(), Some(hash(1)));
        assert_eq!(requester.transaction_to_request(true).unwrap(), None);
    }

    #[test]
    fn test_skips_transactions_that_arrived() {
        let (requester, tangle) = requester_with(deterministic());
        requester.request_transaction(hash(1), false).unwrap();
        requester.request_transaction(hash(2), false).unwrap();
        // hash(1) arrives before it is handed out
        tangle.insert_with_hash(hash(1), hash(0), hash(0));

        assert_eq!(requester.transaction_to_request(false).unwrap(), Some(hash(2)));
        assert_eq!(requester.number_of_transactions_to_request(), 0);
    }

    #[test]
    fn test_always_drop_plain_requests() {
        let (requester, _) = requester_with(RequesterConfig {
            p_remove_request: 1.0,
            ..RequesterConfig::default()
        });
        requester.request_transaction(hash(1), false).unwrap();
        requester.request_transaction(hash(2), true).unwrap();

        assert_eq!(requester.transaction_to_request(false).unwrap(), Some(hash(1)));
        assert!(!requester.was_transaction_recently_requested(&hash(1)));
        // milestone requests are never dropped
        assert_eq!(requester.transaction_to_request(false).unwrap(), Some(hash(2)));
        assert!(requester.was_transaction_recently_requested(&hash(2)));
    }

    #[test]
    fn test_requeue_stale() {
        let (requester, _) = requester_with(RequesterConfig {
            recent_request_ttl: Duration::ZERO,
            ..deterministic()
        });
        requester.request_transaction(hash(1), false).unwrap();
        requester.request_transaction(hash(2), true).unwrap();
        requester.transaction_to_request(false).unwrap();
        requester.transaction_to_request(false).unwrap();
        assert_eq!(requester.number_of_transactions_to_request(), 0);

        assert_eq!(requester.requeue_stale_requests(), 2);
        assert_eq!(requester.number_of_recently_requested_transactions(), 0);
        assert!(requester.is_transaction_requested(&hash(1), false));
        assert!(requester.is_transaction_requested(&hash(2), true));
    }

    #[test]
    fn test_fresh_requests_not_requeued() {
        let (requester, _) = requester_with(deterministic());
        requester.request_transaction(hash(1), false).unwrap();
        requester.transaction_to_request(false).unwrap();
        assert_eq!(requester.requeue_stale_requests(), 0);
        assert_eq!(requester.number_of_recently_requested_transactions(), 1);
    }

    #[test]
    fn test_clear_request() {
        let (requester, _) = requester_with(deterministic());
        requester.request_transaction(hash(1), false).unwrap();
        assert!(requester.clear_transaction_request(&hash(1)));
        assert!(!requester.clear_transaction_request(&hash(1)));
        assert_eq!(requester.number_of_transactions_to_request(), 0);
    }
}

//! # Transaction Solidifier
//!
//! Decides whether a transaction's whole ancestry is locally available.
//!
//! ## Algorithm
//!
//! Breadth-first walk over trunk and branch references, seeded with the solid
//! entry points so it never has to reach genesis:
//!
//! 1. Solid transactions and entry points end a path
//! 2. A missing transaction (placeholder) makes the walk unsolid and is
//!    handed to the requester
//! 3. Anything else has both parents queued
//!
//! A fully solid walk marks every newly solid transaction solid, recomputes
//! its height, persists it and queues it for broadcast.
//!
//! ## Propagation
//!
//! Solidity also spreads upwards: every transaction found solid is queued
//! for propagation, and each tick checks the approvers of a few of them
//! with a one-step test (both parents solid). This is what turns a
//! transaction solid once a missing ancestor finally arrives.
//!
//! Solidity itself lives in the store; the solidifier only owns its queues.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{debug, error, trace};

use crate::domain::{BoundedQueue, DedupQueue, GossipConfig, TransactionRecord, TxField, TxHash};
use crate::events::StoreError;
use crate::ports::{SnapshotProvider, TangleStore};
use crate::service::requester::TransactionRequester;

/// Propagation queue entries handled per tick.
const PROPAGATION_MAX_PROCESS: usize = 10;

pub struct TransactionSolidifier {
    store: Arc<dyn TangleStore>,
    snapshot: Arc<dyn SnapshotProvider>,
    requester: Arc<TransactionRequester>,
    to_solidify: DedupQueue<TxHash>,
    to_broadcast: BoundedQueue<TransactionRecord>,
    to_propagate: DedupQueue<TxHash>,
    max_traversal: usize,
    wakeup: Arc<Notify>,
}

impl TransactionSolidifier {
    pub fn new(
        store: Arc<dyn TangleStore>,
        snapshot: Arc<dyn SnapshotProvider>,
        requester: Arc<TransactionRequester>,
        config: &GossipConfig,
    ) -> Self {
        Self {
            store,
            snapshot,
            requester,
            to_solidify: DedupQueue::new(config.solidification_queue_capacity),
            to_broadcast: BoundedQueue::new(config.broadcast_queue_capacity),
            to_propagate: DedupQueue::new(config.solidification_queue_capacity),
            max_traversal: config.max_solidity_traversal,
            wakeup: Arc::new(Notify::new()),
        }
    }

    /// Notified whenever a hash is queued for solidification.
    pub fn wakeup(&self) -> Arc<Notify> {
        self.wakeup.clone()
    }

    /// Queues `hash` for a background solidity check unless already queued.
    ///
    /// Evicts the oldest queued hash when full.
    pub fn add_to_solidification_queue(&self, hash: TxHash) -> bool {
        let added = self.to_solidify.push(hash);
        if added {
            self.wakeup.notify_one();
        }
        added
    }

    pub fn solidification_queue_len(&self) -> usize {
        self.to_solidify.len()
    }

    /// Snapshot of transactions waiting to be broadcast, oldest first.
    pub fn broadcast_queue(&self) -> Vec<TransactionRecord> {
        self.to_broadcast.snapshot()
    }

    /// Removes exactly the given transactions from the broadcast queue.
    pub fn clear_from_broadcast_queue(&self, sent: &HashSet<TxHash>) {
        self.to_broadcast.retain(|tx| !sent.contains(&tx.hash));
    }

    pub fn broadcast_queue_len(&self) -> usize {
        self.to_broadcast.len()
    }

    pub fn propagation_queue_len(&self) -> usize {
        self.to_propagate.len()
    }

    /// Checks every hash queued when the tick started.
    ///
    /// A failing check is logged and the next hash is processed.
    pub fn process_transactions_to_solidify(&self) -> usize {
        let pending = self.to_solidify.len();
        let mut processed = 0;
        for _ in 0..pending {
            let Some(hash) = self.to_solidify.pop() else {
                break;
            };
            processed += 1;
            match self.check_solidity_bounded(&hash, self.max_traversal) {
                Ok(solid) => trace!(%hash, solid, "solidity checked"),
                Err(e) => error!(%hash, error = %e, "solidity check failed"),
            }
        }
        self.propagate_solid_transactions();
        processed
    }

    /// Tries to solidify the approvers of recently solidified transactions.
    ///
    /// Returns the number of transactions that became solid.
    pub fn propagate_solid_transactions(&self) -> usize {
        let mut solidified = 0;
        for _ in 0..PROPAGATION_MAX_PROCESS {
            let Some(hash) = self.to_propagate.pop() else {
                break;
            };
            let approvers = match self.store.approvers(&hash) {
                Ok(approvers) => approvers,
                Err(e) => {
                    error!(%hash, error = %e, "failed to load approvers");
                    continue;
                }
            };
            for approver in approvers {
                let result = self
                    .store
                    .load_transaction(&approver)
                    .and_then(|tx| match tx {
                        Some(tx) => self.quick_set_solid(&tx),
                        None => Ok(false),
                    });
                match result {
                    Ok(true) => solidified += 1,
                    Ok(false) => {}
                    Err(e) => error!(hash = %approver, error = %e, "solidity propagation failed"),
                }
            }
        }
        solidified
    }

    /// Marks `tx` solid if both parents already are.
    ///
    /// Never walks further than the parents and never requests anything.
    pub fn quick_set_solid(&self, tx: &TransactionRecord) -> Result<bool, StoreError> {
        if tx.solid || tx.is_placeholder() {
            return Ok(false);
        }
        let Some(trunk_height) = self.solid_height(&tx.trunk)? else {
            return Ok(false);
        };
        if self.solid_height(&tx.branch)?.is_none() {
            return Ok(false);
        }

        let mut updated = tx.clone();
        updated.solid = true;
        updated.height = trunk_height + 1;
        self.store
            .update_fields(&updated, &[TxField::Solid, TxField::Height])?;
        trace!(hash = %updated.hash, "quick-solidified");
        self.to_propagate.push(updated.hash);
        if !self.snapshot.is_solid_entry_point(&updated.hash) {
            self.to_broadcast.push(updated);
        }
        Ok(true)
    }

    /// Height of a solid transaction, 0 for entry points and the null hash.
    fn solid_height(&self, hash: &TxHash) -> Result<Option<u64>, StoreError> {
        if hash.is_null() || self.snapshot.is_solid_entry_point(hash) {
            return Ok(Some(0));
        }
        Ok(self
            .store
            .load_transaction(hash)?
            .filter(|tx| tx.solid)
            .map(|tx| tx.height))
    }

    /// Unbounded solidity check.
    pub fn check_solidity(&self, hash: &TxHash) -> Result<bool, StoreError> {
        self.check_solidity_bounded(hash, usize::MAX)
    }

    /// Solidity check visiting at most `max_processed` transactions.
    ///
    /// Exceeding the bound reports not solid without touching the store.
    pub fn check_solidity_bounded(
        &self,
        hash: &TxHash,
        max_processed: usize,
    ) -> Result<bool, StoreError> {
        if self.store.is_solid(hash)? {
            return Ok(true);
        }

        let entry_points = self.snapshot.solid_entry_points();
        let mut analyzed: HashSet<TxHash> = HashSet::new();
        let mut visited: Vec<TransactionRecord> = Vec::new();
        let mut queue = VecDeque::from([*hash]);
        let mut solid = true;

        while let Some(pointer) = queue.pop_front() {
            if pointer.is_null() || entry_points.contains(&pointer) || !analyzed.insert(pointer) {
                continue;
            }
            if analyzed.len() > max_processed {
                debug!(%hash, max_processed, "solidity walk exceeded bound");
                return Ok(false);
            }

            match self.store.load_transaction(&pointer)? {
                Some(tx) if tx.solid => visited.push(tx),
                Some(tx) if !tx.is_placeholder() => {
                    queue.push_back(tx.trunk);
                    queue.push_back(tx.branch);
                    visited.push(tx);
                }
                _ => {
                    solid = false;
                    self.request_missing(pointer)?;
                }
            }
        }

        if solid {
            self.update_solid_transactions(visited, &entry_points)?;
        }
        Ok(solid)
    }

    fn request_missing(&self, hash: TxHash) -> Result<(), StoreError> {
        if !self.requester.is_transaction_requested(&hash, false) {
            trace!(%hash, "requesting missing ancestor");
            self.requester.request_transaction(hash, false)?;
        }
        Ok(())
    }

    fn update_solid_transactions(
        &self,
        visited: Vec<TransactionRecord>,
        entry_points: &HashSet<TxHash>,
    ) -> Result<(), StoreError> {
        let mut heights: HashMap<TxHash, u64> = HashMap::new();
        let by_hash: HashMap<TxHash, &TransactionRecord> =
            visited.iter().map(|tx| (tx.hash, tx)).collect();

        for tx in &visited {
            let height = height_of(tx.hash, &by_hash, &mut heights, entry_points);
            self.to_propagate.push(tx.hash);
            if tx.solid {
                continue;
            }

            let mut updated = tx.clone();
            updated.solid = true;
            updated.height = height;
            self.store
                .update_fields(&updated, &[TxField::Solid, TxField::Height])?;
            if !entry_points.contains(&updated.hash) {
                self.to_broadcast.push(updated);
            }
        }
        Ok(())
    }
}

/// Height along the trunk chain: an entry point (or the null hash) is 0,
/// every other transaction is one more than its trunk.
fn height_of(
    hash: TxHash,
    walk: &HashMap<TxHash, &TransactionRecord>,
    memo: &mut HashMap<TxHash, u64>,
    entry_points: &HashSet<TxHash>,
) -> u64 {
    let known = |hash: &TxHash, memo: &HashMap<TxHash, u64>| -> Option<u64> {
        if hash.is_null() || entry_points.contains(hash) {
            return Some(0);
        }
        if let Some(height) = memo.get(hash) {
            return Some(*height);
        }
        match walk.get(hash) {
            Some(tx) if tx.solid => Some(tx.height),
            Some(_) => None,
            // outside the walk: only solid transactions end a path
            None => Some(0),
        }
    };

    let mut chain = Vec::new();
    let mut cursor = hash;
    let mut height = loop {
        if let Some(height) = known(&cursor, memo) {
            break height;
        }
        chain.push(cursor);
        match walk.get(&cursor) {
            Some(tx) => cursor = tx.trunk,
            None => break 0,
        }
    };
    while let Some(hash) = chain.pop() {
        height += 1;
        memo.insert(hash, height);
    }
    memo.get(&hash).copied().unwrap_or(height)
}

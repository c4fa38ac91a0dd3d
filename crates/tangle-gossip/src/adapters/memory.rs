//! In-memory tangle for tests and the standalone node.
//!
//! Implements every outbound port over one locked map. Transaction hashes
//! are SHAKE256 digests of the full transaction bytes truncated to 49 bytes;
//! trunk and branch are read from fixed offsets in the non-signature part.

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use sha3::digest::{ExtendableOutput, Update, XofReader};
use sha3::Shake256;
use std::collections::{HashMap, HashSet};

use crate::domain::{
    TransactionRecord, TxField, TxHash, HASH_BYTES, SIG_DATA_MAX_BYTES, TRANSACTION_BYTES,
};
use crate::events::StoreError;
use crate::ports::{
    MilestoneTracker, SnapshotProvider, StoredTransaction, TangleStore, TipsProvider,
};

/// Offset of the trunk hash inside a full transaction.
pub const TRUNK_OFFSET: usize = SIG_DATA_MAX_BYTES + 100;
/// Offset of the branch hash inside a full transaction.
pub const BRANCH_OFFSET: usize = TRUNK_OFFSET + HASH_BYTES;
/// Offset of the 8-byte nonce used to make otherwise equal transactions differ.
const NONCE_OFFSET: usize = TRANSACTION_BYTES - 8;

#[derive(Default)]
struct State {
    transactions: HashMap<TxHash, TransactionRecord>,
    approvers: HashMap<TxHash, Vec<TxHash>>,
    entry_points: HashSet<TxHash>,
    tips: Vec<TxHash>,
    milestones: HashMap<i32, TxHash>,
    latest_milestone: TxHash,
    latest_milestone_index: i32,
    latest_solid_milestone_index: i32,
    initial_milestone_index: i32,
}

impl State {
    fn reference(&mut self, parent: TxHash, child: TxHash) {
        if parent.is_null() {
            return;
        }
        self.transactions
            .entry(parent)
            .or_insert_with(|| TransactionRecord::placeholder(parent));
        let approvers = self.approvers.entry(parent).or_default();
        if !approvers.contains(&child) {
            approvers.push(child);
        }
    }

    /// Inserts a full record, replacing a placeholder. Returns `false` if
    /// the full transaction was already stored.
    fn insert(&mut self, record: TransactionRecord) -> bool {
        if self
            .transactions
            .get(&record.hash)
            .is_some_and(|existing| !existing.is_placeholder())
        {
            return false;
        }
        self.reference(record.trunk, record.hash);
        self.reference(record.branch, record.hash);
        self.transactions.insert(record.hash, record);
        true
    }
}

/// Tangle held entirely in memory.
#[derive(Default)]
pub struct InMemoryTangle {
    state: Mutex<State>,
}

impl InMemoryTangle {
    pub fn new() -> Self {
        Self::default()
    }

    /// SHAKE256 of `tx_bytes`, truncated to a transaction hash.
    pub fn hash_of(tx_bytes: &[u8]) -> TxHash {
        let mut hasher = Shake256::default();
        hasher.update(tx_bytes);
        let mut out = [0u8; HASH_BYTES];
        hasher.finalize_xof().read(&mut out);
        TxHash::new(out)
    }

    /// Builds full transaction bytes referencing `trunk` and `branch`.
    pub fn transaction_bytes(trunk: TxHash, branch: TxHash, nonce: u64) -> Vec<u8> {
        let mut tx = vec![0u8; TRANSACTION_BYTES];
        tx[TRUNK_OFFSET..TRUNK_OFFSET + HASH_BYTES].copy_from_slice(trunk.as_bytes());
        tx[BRANCH_OFFSET..BRANCH_OFFSET + HASH_BYTES].copy_from_slice(branch.as_bytes());
        tx[NONCE_OFFSET..].copy_from_slice(&nonce.to_be_bytes());
        tx
    }

    pub fn add_solid_entry_point(&self, hash: TxHash) {
        self.state.lock().entry_points.insert(hash);
    }

    /// Stores a full transaction under an arbitrary hash.
    ///
    /// Unknown parents become placeholders. Tips are left untouched.
    pub fn insert_with_hash(&self, hash: TxHash, trunk: TxHash, branch: TxHash) -> TxHash {
        let mut bytes = Self::transaction_bytes(trunk, branch, 0);
        bytes[..HASH_BYTES].copy_from_slice(hash.as_bytes());
        self.state
            .lock()
            .insert(TransactionRecord::new(hash, bytes, trunk, branch));
        hash
    }

    pub fn mark_solid(&self, hash: &TxHash) {
        if let Some(record) = self.state.lock().transactions.get_mut(hash) {
            record.solid = true;
        }
    }

    pub fn add_tip(&self, hash: TxHash) {
        let mut state = self.state.lock();
        if !state.tips.contains(&hash) {
            state.tips.push(hash);
        }
    }

    /// Records `hash` as milestone `index` and makes it the latest one.
    pub fn set_latest_milestone(&self, hash: TxHash, index: i32) {
        let mut state = self.state.lock();
        state.milestones.insert(index, hash);
        state.latest_milestone = hash;
        state.latest_milestone_index = index;
    }

    /// Records `hash` as milestone `index` without changing the latest one.
    pub fn add_milestone(&self, hash: TxHash, index: i32) {
        self.state.lock().milestones.insert(index, hash);
    }

    pub fn set_latest_solid_milestone_index(&self, index: i32) {
        self.state.lock().latest_solid_milestone_index = index;
    }

    pub fn set_initial_milestone_index(&self, index: i32) {
        self.state.lock().initial_milestone_index = index;
    }
}

fn hash_at(tx_bytes: &[u8], offset: usize) -> Result<TxHash, StoreError> {
    tx_bytes
        .get(offset..offset + HASH_BYTES)
        .and_then(TxHash::from_slice)
        .ok_or_else(|| {
            StoreError::Backend(format!("transaction too short: {} bytes", tx_bytes.len()))
        })
}

impl TangleStore for InMemoryTangle {
    fn load_transaction(&self, hash: &TxHash) -> Result<Option<TransactionRecord>, StoreError> {
        Ok(self.state.lock().transactions.get(hash).cloned())
    }

    fn hash_transaction(&self, tx_bytes: &[u8]) -> TxHash {
        Self::hash_of(tx_bytes)
    }

    fn store_transaction(&self, tx_bytes: Vec<u8>) -> Result<StoredTransaction, StoreError> {
        if tx_bytes.len() != TRANSACTION_BYTES {
            return Err(StoreError::Backend(format!(
                "expected {} transaction bytes, got {}",
                TRANSACTION_BYTES,
                tx_bytes.len()
            )));
        }
        let hash = Self::hash_of(&tx_bytes);
        let trunk = hash_at(&tx_bytes, TRUNK_OFFSET)?;
        let branch = hash_at(&tx_bytes, BRANCH_OFFSET)?;
        let record = TransactionRecord::new(hash, tx_bytes, trunk, branch);

        let mut state = self.state.lock();
        if !state.insert(record.clone()) {
            let existing = state.transactions.get(&hash).cloned().unwrap_or(record);
            return Ok(StoredTransaction {
                record: existing,
                is_new: false,
            });
        }
        state.tips.retain(|tip| *tip != trunk && *tip != branch);
        state.tips.push(hash);
        Ok(StoredTransaction {
            record,
            is_new: true,
        })
    }

    fn update_fields(
        &self,
        record: &TransactionRecord,
        fields: &[TxField],
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let stored = state
            .transactions
            .get_mut(&record.hash)
            .ok_or(StoreError::NotFound(record.hash))?;
        for field in fields {
            match field {
                TxField::Solid => stored.solid = record.solid,
                TxField::Height => stored.height = record.height,
            }
        }
        Ok(())
    }

    fn approvers(&self, hash: &TxHash) -> Result<Vec<TxHash>, StoreError> {
        Ok(self
            .state
            .lock()
            .approvers
            .get(hash)
            .cloned()
            .unwrap_or_default())
    }

    fn transaction_count(&self) -> usize {
        self.state
            .lock()
            .transactions
            .values()
            .filter(|record| !record.is_placeholder())
            .count()
    }
}

impl SnapshotProvider for InMemoryTangle {
    fn solid_entry_points(&self) -> HashSet<TxHash> {
        self.state.lock().entry_points.clone()
    }

    fn is_solid_entry_point(&self, hash: &TxHash) -> bool {
        self.state.lock().entry_points.contains(hash)
    }

    fn initial_milestone_index(&self) -> i32 {
        self.state.lock().initial_milestone_index
    }
}

impl TipsProvider for InMemoryTangle {
    fn random_solid_tip(&self) -> Option<TxHash> {
        let state = self.state.lock();
        let solid: Vec<TxHash> = state
            .tips
            .iter()
            .filter(|tip| state.transactions.get(tip).is_some_and(|tx| tx.solid))
            .copied()
            .collect();
        solid.choose(&mut rand::thread_rng()).copied()
    }

    fn random_non_solid_tip(&self) -> Option<TxHash> {
        let state = self.state.lock();
        let pending: Vec<TxHash> = state
            .tips
            .iter()
            .filter(|tip| state.transactions.get(tip).is_some_and(|tx| !tx.solid))
            .copied()
            .collect();
        pending.choose(&mut rand::thread_rng()).copied()
    }
}

impl MilestoneTracker for InMemoryTangle {
    fn latest_milestone_hash(&self) -> TxHash {
        self.state.lock().latest_milestone
    }

    fn latest_milestone_index(&self) -> i32 {
        self.state.lock().latest_milestone_index
    }

    fn latest_solid_milestone_index(&self) -> i32 {
        self.state.lock().latest_solid_milestone_index
    }

    fn milestone_hash(&self, index: i32) -> Option<TxHash> {
        self.state.lock().milestones.get(&index).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(n: u8) -> TxHash {
        TxHash::new([n; HASH_BYTES])
    }

    #[test]
    fn test_store_parses_parents_and_creates_placeholders() {
        let tangle = InMemoryTangle::new();
        let tx = InMemoryTangle::transaction_bytes(hash(1), hash(2), 7);

        let stored = tangle.store_transaction(tx.clone()).unwrap();
        assert!(stored.is_new);
        assert_eq!(stored.record.hash, InMemoryTangle::hash_of(&tx));
        assert_eq!(tangle.hash_transaction(&tx), stored.record.hash);
        assert_eq!(stored.record.trunk, hash(1));
        assert_eq!(stored.record.branch, hash(2));

        let trunk = tangle.load_transaction(&hash(1)).unwrap().unwrap();
        assert!(trunk.is_placeholder());
        assert_eq!(tangle.approvers(&hash(1)).unwrap(), vec![stored.record.hash]);
        assert!(tangle.approvers(&stored.record.hash).unwrap().is_empty());
        assert!(!tangle.exists(&hash(1)).unwrap());
        assert!(tangle.load_transaction(&hash(9)).unwrap().is_none());
        assert_eq!(tangle.transaction_count(), 1);
    }

    #[test]
    fn test_store_twice_is_not_new() {
        let tangle = InMemoryTangle::new();
        let tx = InMemoryTangle::transaction_bytes(hash(1), hash(1), 7);
        assert!(tangle.store_transaction(tx.clone()).unwrap().is_new);
        assert!(!tangle.store_transaction(tx).unwrap().is_new);
        assert_eq!(tangle.transaction_count(), 1);
    }

    #[test]
    fn test_store_rejects_wrong_size() {
        let tangle = InMemoryTangle::new();
        assert!(tangle.store_transaction(vec![0u8; 100]).is_err());
    }

    #[test]
    fn test_placeholder_replaced_by_full_transaction() {
        let tangle = InMemoryTangle::new();
        tangle.insert_with_hash(hash(2), hash(3), hash(3));
        assert!(!tangle.exists(&hash(3)).unwrap());
        tangle.insert_with_hash(hash(3), hash(4), hash(4));
        assert!(tangle.exists(&hash(3)).unwrap());
    }

    #[test]
    fn test_new_transaction_replaces_parent_tips() {
        let tangle = InMemoryTangle::new();
        let parent = tangle
            .store_transaction(InMemoryTangle::transaction_bytes(hash(1), hash(1), 1))
            .unwrap()
            .record
            .hash;
        let child = tangle
            .store_transaction(InMemoryTangle::transaction_bytes(parent, parent, 2))
            .unwrap()
            .record
            .hash;

        assert_eq!(tangle.random_non_solid_tip(), Some(child));
        assert_eq!(tangle.random_solid_tip(), None);
        tangle.mark_solid(&child);
        assert_eq!(tangle.random_solid_tip(), Some(child));
    }

    #[test]
    fn test_update_fields() {
        let tangle = InMemoryTangle::new();
        tangle.insert_with_hash(hash(1), hash(2), hash(2));
        let mut record = tangle.load_transaction(&hash(1)).unwrap().unwrap();
        record.solid = true;
        record.height = 5;

        tangle.update_fields(&record, &[TxField::Solid]).unwrap();
        let stored = tangle.load_transaction(&hash(1)).unwrap().unwrap();
        assert!(stored.solid);
        assert_eq!(stored.height, 0);

        let unknown = TransactionRecord::placeholder(hash(9));
        assert!(matches!(
            tangle.update_fields(&unknown, &[TxField::Solid]),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_milestones() {
        let tangle = InMemoryTangle::new();
        assert!(tangle.latest_milestone_hash().is_null());
        tangle.add_milestone(hash(1), 3);
        tangle.set_latest_milestone(hash(2), 4);
        assert_eq!(tangle.milestone_hash(3), Some(hash(1)));
        assert_eq!(tangle.milestone_hash(4), Some(hash(2)));
        assert_eq!(tangle.latest_milestone_index(), 4);
    }
}

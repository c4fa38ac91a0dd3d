//! # Core Domain Entities
//!
//! - [`TxHash`]: 49-byte transaction hash as carried on the wire
//! - [`TransactionRecord`]: the slice of a stored transaction the gossip layer needs
//! - [`NeighborState`] / [`HandshakeState`]: connection lifecycle enums

use std::fmt;

/// Size of a byte-encoded transaction hash.
pub const HASH_BYTES: usize = 49;

/// Max size of the signature message fragment of a transaction.
pub const SIG_DATA_MAX_BYTES: usize = 1312;

/// Size of the non-signature part of a transaction.
pub const NON_SIG_TX_PART_BYTES: usize = 292;

/// Size of a full, non-truncated byte-encoded transaction.
pub const TRANSACTION_BYTES: usize = SIG_DATA_MAX_BYTES + NON_SIG_TX_PART_BYTES;

/// Byte-encoded transaction hash.
///
/// # Example
///
/// ```rust
/// use tangle_gossip::TxHash;
///
/// let hash = TxHash::new([7u8; 49]);
/// assert!(!hash.is_null());
/// assert!(TxHash::NULL.is_null());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxHash(pub [u8; HASH_BYTES]);

impl TxHash {
    /// The all-zero hash. Used as "no particular transaction" in requests.
    pub const NULL: TxHash = TxHash([0u8; HASH_BYTES]);

    pub fn new(bytes: [u8; HASH_BYTES]) -> Self {
        Self(bytes)
    }

    /// Creates a hash from a byte slice.
    ///
    /// Returns `None` if the slice is not exactly 49 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; HASH_BYTES] = bytes.try_into().ok()?;
        Some(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; HASH_BYTES] {
        &self.0
    }

    pub fn is_null(&self) -> bool {
        self.0 == [0u8; HASH_BYTES]
    }

    /// Proof-of-work weight: the number of trailing zero bits.
    pub fn weight_magnitude(&self) -> u32 {
        let mut weight = 0;
        for byte in self.0.iter().rev() {
            if *byte != 0 {
                return weight + byte.trailing_zeros();
            }
            weight += 8;
        }
        weight
    }
}

impl Default for TxHash {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // first 8 bytes are plenty to tell hashes apart in logs
        write!(f, "{}…", hex::encode(&self.0[..8]))
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxHash({})", hex::encode(self.0))
    }
}

/// A transaction as seen by the gossip layer.
///
/// A record with empty `bytes` is a placeholder: the hash is referenced by
/// some other transaction but its content has not been received yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionRecord {
    pub hash: TxHash,
    /// Full (expanded) transaction bytes, or empty for placeholders.
    pub bytes: Vec<u8>,
    pub trunk: TxHash,
    pub branch: TxHash,
    pub solid: bool,
    pub height: u64,
}

impl TransactionRecord {
    pub fn new(hash: TxHash, bytes: Vec<u8>, trunk: TxHash, branch: TxHash) -> Self {
        Self {
            hash,
            bytes,
            trunk,
            branch,
            solid: false,
            height: 0,
        }
    }

    /// A not-yet-received transaction.
    pub fn placeholder(hash: TxHash) -> Self {
        Self::new(hash, Vec::new(), TxHash::NULL, TxHash::NULL)
    }

    /// The all-zero transaction sitting behind [`TxHash::NULL`].
    pub fn null() -> Self {
        Self::new(
            TxHash::NULL,
            vec![0u8; TRANSACTION_BYTES],
            TxHash::NULL,
            TxHash::NULL,
        )
    }

    pub fn is_placeholder(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Fields of a stored transaction that the solidifier rewrites.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxField {
    Solid,
    Height,
}

/// Lifecycle of a neighbor connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NeighborState {
    /// Waiting for the peer's handshake packet.
    Handshaking,
    /// Handshake accepted, protocol messages flow.
    ReadyForMessages,
    /// Terminal: the owner will close the connection.
    MarkedForDisconnect,
}

/// Lifecycle of a handshake exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandshakeState {
    Init,
    Ok,
    Failed,
}

//! # Handshakes
//!
//! The first frame on every connection. Both sides send one and then verify
//! what the peer sent.
//!
//! ## Verification
//!
//! 1. Minimum weight magnitude must match
//! 2. Coordinator address must match (same network)
//! 3. Supported protocol versions must overlap
//!
//! Bit `j` of byte `k` of the version bitmask denotes version `8k + j + 1`.
//! The negotiated version is the highest version both sides support.

use super::entities::{HandshakeState, HASH_BYTES};

/// Protocol versions this node speaks: version 1 only.
pub const SUPPORTED_PROTOCOL_VERSIONS: [u8; 1] = [0b0000_0001];

// =============================================================================
// HANDSHAKE DATA
// =============================================================================

/// A handshake packet plus the local outcome of processing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// Port the sender's server socket listens on.
    pub server_socket_port: u16,
    /// Sender's wall clock at send time, in milliseconds.
    pub sent_timestamp_ms: u64,
    pub coordinator_address: [u8; HASH_BYTES],
    /// Minimum weight magnitude.
    pub mwm: u8,
    pub supported_versions: Vec<u8>,
    pub state: HandshakeState,
}

impl Handshake {
    /// Creates the handshake this node sends to a peer.
    pub fn outbound(
        server_socket_port: u16,
        sent_timestamp_ms: u64,
        coordinator_address: [u8; HASH_BYTES],
        mwm: u8,
    ) -> Self {
        Self {
            server_socket_port,
            sent_timestamp_ms,
            coordinator_address,
            mwm,
            supported_versions: SUPPORTED_PROTOCOL_VERSIONS.to_vec(),
            state: HandshakeState::Init,
        }
    }

    /// A structurally valid handshake decoded off the wire.
    pub fn received(
        server_socket_port: u16,
        sent_timestamp_ms: u64,
        coordinator_address: [u8; HASH_BYTES],
        mwm: u8,
        supported_versions: Vec<u8>,
    ) -> Self {
        Self {
            server_socket_port,
            sent_timestamp_ms,
            coordinator_address,
            mwm,
            supported_versions,
            state: HandshakeState::Ok,
        }
    }

    /// Placeholder held by a neighbor until the peer's handshake arrives.
    pub fn pending() -> Self {
        Self {
            server_socket_port: 0,
            sent_timestamp_ms: 0,
            coordinator_address: [0u8; HASH_BYTES],
            mwm: 0,
            supported_versions: Vec::new(),
            state: HandshakeState::Init,
        }
    }

    pub fn failed() -> Self {
        Self {
            state: HandshakeState::Failed,
            ..Self::pending()
        }
    }
}

/// Highest protocol version present in both bitmasks.
///
/// Returns `None` when there is no overlap.
pub fn negotiated_version(ours: &[u8], theirs: &[u8]) -> Option<u32> {
    let mut highest = None;
    for (k, (a, b)) in ours.iter().zip(theirs).enumerate() {
        let common = a & b;
        if common != 0 {
            let top_bit = 7 - common.leading_zeros();
            highest = Some(8 * k as u32 + top_bit + 1);
        }
    }
    highest
}

// =============================================================================
// HANDSHAKE RESULT
// =============================================================================

/// Result of handshake verification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeResult {
    /// Peer is compatible; carries the negotiated protocol version.
    Accept { protocol_version: u32 },
    Reject(RejectReason),
}

/// Reasons for rejecting a handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Peer runs with a different minimum weight magnitude
    MwmMismatch { ours: u8, theirs: u8 },
    /// Peer follows a different coordinator
    CoordinatorMismatch,
    /// No protocol version in common
    NoCommonVersion,
}

// =============================================================================
// HANDSHAKE VERIFIER
// =============================================================================

/// What the local node requires from a peer's handshake.
#[derive(Debug, Clone)]
pub struct HandshakePolicy {
    pub mwm: u8,
    pub coordinator_address: [u8; HASH_BYTES],
    pub supported_versions: Vec<u8>,
}

impl HandshakePolicy {
    pub fn new(mwm: u8, coordinator_address: [u8; HASH_BYTES]) -> Self {
        Self {
            mwm,
            coordinator_address,
            supported_versions: SUPPORTED_PROTOCOL_VERSIONS.to_vec(),
        }
    }
}

/// Verify a peer's handshake against the local policy.
pub fn verify_handshake(policy: &HandshakePolicy, theirs: &Handshake) -> HandshakeResult {
    if theirs.mwm != policy.mwm {
        return HandshakeResult::Reject(RejectReason::MwmMismatch {
            ours: policy.mwm,
            theirs: theirs.mwm,
        });
    }

    if theirs.coordinator_address != policy.coordinator_address {
        return HandshakeResult::Reject(RejectReason::CoordinatorMismatch);
    }

    match negotiated_version(&policy.supported_versions, &theirs.supported_versions) {
        Some(protocol_version) => HandshakeResult::Accept { protocol_version },
        None => HandshakeResult::Reject(RejectReason::NoCommonVersion),
    }
}

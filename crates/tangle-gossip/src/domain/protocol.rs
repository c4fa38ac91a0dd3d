//! # Wire Protocol
//!
//! Stateless encoding/decoding of gossip frames. No I/O, no state.
//!
//! ## Frame Layout
//!
//! ```text
//! [type: 1][length: 2 (big-endian)][payload: length bytes]
//! ```
//!
//! | Kind               | Type | Payload                                         |
//! |--------------------|------|-------------------------------------------------|
//! | Handshake          | 1    | port(2) timestamp(8) coo(49) mwm(1) versions(1..32) |
//! | TransactionGossip  | 2    | truncated tx (292..1604) + requested hash(49)   |
//! | Heartbeat          | 3    | first solid ms(4) last solid ms(4)              |
//! | MilestoneRequest   | 4    | milestone index(4)                              |
//!
//! Transactions are truncated before sending: the zero tail of the signature
//! message fragment is stripped and restored on receipt.

use super::entities::{
    TxHash, HASH_BYTES, NON_SIG_TX_PART_BYTES, SIG_DATA_MAX_BYTES, TRANSACTION_BYTES,
};
use super::handshake::Handshake;
use crate::events::ProtocolError;

/// Size of the TLV header.
pub const HEADER_BYTES: usize = 3;

/// Bytes of the handshake before the supported-versions bitmask.
pub const HANDSHAKE_FIXED_BYTES: usize = 2 + 8 + HASH_BYTES + 1;

/// Max bytes of the supported-versions bitmask.
pub const MAX_SUPPORTED_VERSION_BYTES: usize = 32;

/// Size of a heartbeat payload.
pub const HEARTBEAT_BYTES: usize = 8;

/// Size of a milestone request payload.
pub const MILESTONE_REQUEST_BYTES: usize = 4;

/// Max size of a transaction gossip payload.
pub const MAX_GOSSIP_BYTES: usize = TRANSACTION_BYTES + HASH_BYTES;

/// Message kinds known to the protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Header,
    Handshake,
    TransactionGossip,
    Heartbeat,
    MilestoneRequest,
}

/// Static description of one message kind.
#[derive(Clone, Copy, Debug)]
pub struct MessageSpec {
    pub kind: MessageKind,
    pub type_id: u8,
    pub max_length: u16,
    pub supports_dynamic_length: bool,
}

/// The message catalog, indexed by type id.
pub static MESSAGE_CATALOG: [MessageSpec; 5] = [
    MessageSpec {
        kind: MessageKind::Header,
        type_id: 0,
        max_length: HEADER_BYTES as u16,
        supports_dynamic_length: false,
    },
    MessageSpec {
        kind: MessageKind::Handshake,
        type_id: 1,
        max_length: (HANDSHAKE_FIXED_BYTES + MAX_SUPPORTED_VERSION_BYTES) as u16,
        supports_dynamic_length: true,
    },
    MessageSpec {
        kind: MessageKind::TransactionGossip,
        type_id: 2,
        max_length: MAX_GOSSIP_BYTES as u16,
        supports_dynamic_length: true,
    },
    MessageSpec {
        kind: MessageKind::Heartbeat,
        type_id: 3,
        max_length: HEARTBEAT_BYTES as u16,
        supports_dynamic_length: false,
    },
    MessageSpec {
        kind: MessageKind::MilestoneRequest,
        type_id: 4,
        max_length: MILESTONE_REQUEST_BYTES as u16,
        supports_dynamic_length: false,
    },
];

impl MessageKind {
    /// Looks up a kind by its wire type id.
    pub fn from_type_id(type_id: u8) -> Option<Self> {
        MESSAGE_CATALOG
            .get(type_id as usize)
            .map(|spec| spec.kind)
    }

    pub fn spec(self) -> &'static MessageSpec {
        // the catalog is ordered by type id and the discriminants follow it
        &MESSAGE_CATALOG[self as usize]
    }

    pub fn type_id(self) -> u8 {
        self.spec().type_id
    }

    pub fn max_length(self) -> u16 {
        self.spec().max_length
    }

    pub fn supports_dynamic_length(self) -> bool {
        self.spec().supports_dynamic_length
    }
}

/// Decoded TLV header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProtocolHeader {
    pub message_type: MessageKind,
    pub message_length: u16,
}

/// Decodes a 3-byte header.
///
/// # Errors
///
/// - `UnknownMessageType` for type ids outside the catalog (and for 0, which
///   names the header itself and never carries a payload)
/// - `InvalidMessageLength` when the length exceeds the kind's maximum, or
///   differs from it for fixed-length kinds
pub fn decode_header(bytes: &[u8; HEADER_BYTES]) -> Result<ProtocolHeader, ProtocolError> {
    let type_id = bytes[0];
    let kind = match MessageKind::from_type_id(type_id) {
        Some(MessageKind::Header) | None => {
            return Err(ProtocolError::UnknownMessageType(type_id));
        }
        Some(kind) => kind,
    };

    let advertised = u16::from_be_bytes([bytes[1], bytes[2]]);
    let max = kind.max_length();
    if advertised > max || (!kind.supports_dynamic_length() && advertised != max) {
        return Err(ProtocolError::InvalidMessageLength {
            kind,
            advertised,
            max,
        });
    }

    Ok(ProtocolHeader {
        message_type: kind,
        message_length: advertised,
    })
}

pub fn encode_header(kind: MessageKind, length: u16) -> [u8; HEADER_BYTES] {
    let len = length.to_be_bytes();
    [kind.type_id(), len[0], len[1]]
}

fn frame(kind: MessageKind, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_BYTES + payload.len());
    buf.extend_from_slice(&encode_header(kind, payload.len() as u16));
    buf.extend_from_slice(payload);
    buf
}

// =============================================================================
// HANDSHAKE
// =============================================================================

/// Encodes a full handshake frame (header included).
pub fn encode_handshake(handshake: &Handshake) -> Vec<u8> {
    let versions = &handshake.supported_versions
        [..handshake.supported_versions.len().min(MAX_SUPPORTED_VERSION_BYTES)];
    let mut payload = Vec::with_capacity(HANDSHAKE_FIXED_BYTES + versions.len());
    payload.extend_from_slice(&handshake.server_socket_port.to_be_bytes());
    payload.extend_from_slice(&handshake.sent_timestamp_ms.to_be_bytes());
    payload.extend_from_slice(&handshake.coordinator_address);
    payload.push(handshake.mwm);
    payload.extend_from_slice(versions);
    frame(MessageKind::Handshake, &payload)
}

/// Decodes a handshake payload (header excluded).
pub fn decode_handshake(payload: &[u8]) -> Result<Handshake, ProtocolError> {
    let malformed = |reason| ProtocolError::MalformedPayload {
        kind: MessageKind::Handshake,
        reason,
    };
    if payload.len() <= HANDSHAKE_FIXED_BYTES {
        return Err(malformed("missing supported versions"));
    }
    if payload.len() > HANDSHAKE_FIXED_BYTES + MAX_SUPPORTED_VERSION_BYTES {
        return Err(malformed("supported versions too long"));
    }

    let server_socket_port = u16::from_be_bytes([payload[0], payload[1]]);
    let mut ts = [0u8; 8];
    ts.copy_from_slice(&payload[2..10]);
    let mut coordinator_address = [0u8; HASH_BYTES];
    coordinator_address.copy_from_slice(&payload[10..10 + HASH_BYTES]);
    let mwm = payload[10 + HASH_BYTES];

    Ok(Handshake::received(
        server_socket_port,
        u64::from_be_bytes(ts),
        coordinator_address,
        mwm,
        payload[HANDSHAKE_FIXED_BYTES..].to_vec(),
    ))
}

// =============================================================================
// TRANSACTION GOSSIP
// =============================================================================

/// Strips the zero tail of the signature message fragment.
///
/// `tx` must be a full transaction of [`TRANSACTION_BYTES`].
pub fn truncate_transaction(tx: &[u8]) -> Vec<u8> {
    let sig = &tx[..SIG_DATA_MAX_BYTES];
    let zero_tail = sig.iter().rev().take_while(|&&b| b == 0).count();
    let kept = SIG_DATA_MAX_BYTES - zero_tail;

    let mut truncated = Vec::with_capacity(kept + NON_SIG_TX_PART_BYTES);
    truncated.extend_from_slice(&sig[..kept]);
    truncated.extend_from_slice(&tx[SIG_DATA_MAX_BYTES..TRANSACTION_BYTES]);
    truncated
}

/// Restores a truncated transaction to its full size.
pub fn expand_transaction(truncated: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    if truncated.len() < NON_SIG_TX_PART_BYTES || truncated.len() > TRANSACTION_BYTES {
        return Err(ProtocolError::MalformedPayload {
            kind: MessageKind::TransactionGossip,
            reason: "truncated transaction has an impossible size",
        });
    }
    let sig_len = truncated.len() - NON_SIG_TX_PART_BYTES;

    let mut tx = vec![0u8; TRANSACTION_BYTES];
    tx[..sig_len].copy_from_slice(&truncated[..sig_len]);
    tx[SIG_DATA_MAX_BYTES..].copy_from_slice(&truncated[sig_len..]);
    Ok(tx)
}

/// Encodes a transaction gossip frame (header included).
pub fn encode_transaction_gossip(tx: &[u8], requested_hash: &TxHash) -> Vec<u8> {
    let mut payload = truncate_transaction(tx);
    payload.extend_from_slice(requested_hash.as_bytes());
    frame(MessageKind::TransactionGossip, &payload)
}

/// Returns the requested hash: always the last 49 bytes of the payload.
pub fn decode_requested_hash(payload: &[u8]) -> Result<TxHash, ProtocolError> {
    payload
        .len()
        .checked_sub(HASH_BYTES)
        .and_then(|start| TxHash::from_slice(&payload[start..]))
        .ok_or(ProtocolError::MalformedPayload {
            kind: MessageKind::TransactionGossip,
            reason: "payload shorter than the requested hash",
        })
}

/// Splits a gossip payload into the expanded transaction and the requested hash.
pub fn decode_transaction_gossip(payload: &[u8]) -> Result<(Vec<u8>, TxHash), ProtocolError> {
    let requested = decode_requested_hash(payload)?;
    let tx = expand_transaction(&payload[..payload.len() - HASH_BYTES])?;
    Ok((tx, requested))
}

// =============================================================================
// HEARTBEAT / MILESTONE REQUEST
// =============================================================================

/// Solid milestone range advertised by a neighbor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Heartbeat {
    pub first_solid_milestone_index: i32,
    pub last_solid_milestone_index: i32,
}

pub fn encode_heartbeat(heartbeat: &Heartbeat) -> Vec<u8> {
    let mut payload = [0u8; HEARTBEAT_BYTES];
    payload[..4].copy_from_slice(&heartbeat.first_solid_milestone_index.to_be_bytes());
    payload[4..].copy_from_slice(&heartbeat.last_solid_milestone_index.to_be_bytes());
    frame(MessageKind::Heartbeat, &payload)
}

pub fn decode_heartbeat(payload: &[u8]) -> Result<Heartbeat, ProtocolError> {
    let bytes: [u8; HEARTBEAT_BYTES] =
        payload
            .try_into()
            .map_err(|_| ProtocolError::MalformedPayload {
                kind: MessageKind::Heartbeat,
                reason: "heartbeat must be 8 bytes",
            })?;
    Ok(Heartbeat {
        first_solid_milestone_index: i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        last_solid_milestone_index: i32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
    })
}

pub fn encode_milestone_request(index: i32) -> Vec<u8> {
    frame(MessageKind::MilestoneRequest, &index.to_be_bytes())
}

pub fn decode_milestone_request(payload: &[u8]) -> Result<i32, ProtocolError> {
    let bytes: [u8; MILESTONE_REQUEST_BYTES] =
        payload
            .try_into()
            .map_err(|_| ProtocolError::MalformedPayload {
                kind: MessageKind::MilestoneRequest,
                reason: "milestone request must be 4 bytes",
            })?;
    Ok(i32::from_be_bytes(bytes))
}

// =============================================================================
// DECODED MESSAGES
// =============================================================================

/// A fully decoded payload, ready for dispatch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    Handshake(Handshake),
    /// Raw gossip payload; expansion is left to the processing pipeline.
    TransactionGossip(Vec<u8>),
    Heartbeat(Heartbeat),
    MilestoneRequest(i32),
}

/// Decodes the payload of a message of the given kind.
pub fn decode_message(kind: MessageKind, payload: &[u8]) -> Result<Message, ProtocolError> {
    match kind {
        MessageKind::Handshake => decode_handshake(payload).map(Message::Handshake),
        MessageKind::TransactionGossip => {
            if payload.len() < NON_SIG_TX_PART_BYTES + HASH_BYTES {
                return Err(ProtocolError::MalformedPayload {
                    kind,
                    reason: "gossip payload too short",
                });
            }
            Ok(Message::TransactionGossip(payload.to_vec()))
        }
        MessageKind::Heartbeat => decode_heartbeat(payload).map(Message::Heartbeat),
        MessageKind::MilestoneRequest => {
            decode_milestone_request(payload).map(Message::MilestoneRequest)
        }
        MessageKind::Header => Err(ProtocolError::UnknownMessageType(0)),
    }
}

//! # Neighbor State Machine Tests

use super::*;
use crate::domain::{
    encode_handshake, encode_header, encode_heartbeat, encode_milestone_request,
    encode_transaction_gossip, Heartbeat, RejectReason, TxHash, HASH_BYTES, TRANSACTION_BYTES,
};
use parking_lot::Mutex;
use std::collections::VecDeque;

const COO: [u8; HASH_BYTES] = [5u8; HASH_BYTES];
const MWM: u8 = 14;

/// In-memory socket: scripted inbound bytes, captured outbound bytes.
#[derive(Default)]
struct MockChannel {
    inbound: VecDeque<u8>,
    /// Max bytes handed out per read call.
    read_chunk: Option<usize>,
    /// Max bytes accepted per write call.
    write_chunk: Option<usize>,
    closed: bool,
    outbound: Vec<u8>,
}

impl MockChannel {
    fn with_bytes(bytes: &[u8]) -> Self {
        Self {
            inbound: bytes.iter().copied().collect(),
            ..Self::default()
        }
    }
}

impl Channel for MockChannel {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.inbound.is_empty() {
            return if self.closed {
                Ok(0)
            } else {
                Err(io::ErrorKind::WouldBlock.into())
            };
        }
        let limit = self.read_chunk.unwrap_or(usize::MAX);
        let n = buf.len().min(self.inbound.len()).min(limit);
        for slot in buf.iter_mut().take(n) {
            *slot = self.inbound.pop_front().unwrap_or_default();
        }
        Ok(n)
    }

    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = match self.write_chunk {
            Some(0) => return Err(io::ErrorKind::WouldBlock.into()),
            Some(limit) => buf.len().min(limit),
            None => buf.len(),
        };
        self.outbound.extend_from_slice(&buf[..n]);
        Ok(n)
    }
}

#[derive(Default)]
struct RecordingIntake {
    gossip: Mutex<Vec<Vec<u8>>>,
    milestone_requests: Mutex<Vec<i32>>,
}

impl TransactionIntake for RecordingIntake {
    fn process(&self, _neighbor: &NeighborHandle, payload: Vec<u8>) {
        self.gossip.lock().push(payload);
    }

    fn process_milestone_request(&self, _neighbor: &NeighborHandle, index: i32) {
        self.milestone_requests.lock().push(index);
    }
}

fn their_handshake() -> Vec<u8> {
    encode_handshake(&Handshake::outbound(14600, 1_700_000_000_000, COO, MWM))
}

fn neighbor_with(channel: MockChannel) -> (Neighbor<MockChannel>, Arc<RecordingIntake>) {
    let intake = Arc::new(RecordingIntake::default());
    let handle = NeighborHandle::new(ConnectionId(7), "127.0.0.1", None, 16);
    let neighbor = Neighbor::new(
        channel,
        handle,
        HandshakePolicy::new(MWM, COO),
        intake.clone(),
    );
    (neighbor, intake)
}

fn sample_tx() -> Vec<u8> {
    let mut tx = vec![0u8; TRANSACTION_BYTES];
    tx[0] = 0xAA;
    tx[TRANSACTION_BYTES - 1] = 0xBB;
    tx
}

#[test]
fn test_handshake_moves_to_ready() {
    let (mut neighbor, _) = neighbor_with(MockChannel::with_bytes(&their_handshake()));

    let handshake = neighbor.handshake();
    assert_eq!(handshake.state, HandshakeState::Ok);
    assert_eq!(handshake.server_socket_port, 14600);
    assert_eq!(neighbor.handle().state(), NeighborState::ReadyForMessages);
    assert_eq!(neighbor.handle().remote_server_port(), Some(14600));
    assert_eq!(neighbor.handle().protocol_version(), 1);
}

#[test]
fn test_handshake_over_partial_reads() {
    let mut channel = MockChannel::with_bytes(&their_handshake());
    channel.read_chunk = Some(5);
    let (mut neighbor, _) = neighbor_with(channel);

    // each call continues where the last one stopped
    let mut state = HandshakeState::Init;
    for _ in 0..100 {
        state = neighbor.handshake().state;
        if state != HandshakeState::Init {
            break;
        }
    }
    assert_eq!(state, HandshakeState::Ok);
}

#[test]
fn test_handshake_waits_for_more_bytes() {
    let frame = their_handshake();
    let (mut neighbor, _) = neighbor_with(MockChannel::with_bytes(&frame[..20]));
    assert_eq!(neighbor.handshake().state, HandshakeState::Init);
    assert_eq!(neighbor.read_state(), ReadState::ReadMessage);
    assert_eq!(neighbor.handle().state(), NeighborState::Handshaking);
}

#[test]
fn test_non_handshake_first_frame_fails() {
    let frame = encode_heartbeat(&Heartbeat {
        first_solid_milestone_index: 1,
        last_solid_milestone_index: 2,
    });
    let (mut neighbor, _) = neighbor_with(MockChannel::with_bytes(&frame));

    assert_eq!(neighbor.handshake().state, HandshakeState::Failed);
    assert_ne!(neighbor.handle().state(), NeighborState::ReadyForMessages);
}

#[test]
fn test_wrong_handshake_length_fails() {
    let mut frame = encode_header(MessageKind::Handshake, 40).to_vec();
    frame.extend_from_slice(&[0u8; 40]);
    let (mut neighbor, _) = neighbor_with(MockChannel::with_bytes(&frame));

    let err = neighbor.read().unwrap_err();
    assert!(matches!(
        err,
        NeighborError::Protocol(ProtocolError::InvalidMessageLength { advertised: 40, .. })
    ));
    assert_eq!(neighbor.handshake().state, HandshakeState::Failed);
    assert_ne!(neighbor.handle().state(), NeighborState::ReadyForMessages);
}

#[test]
fn test_unknown_type_while_handshaking() {
    let (mut neighbor, _) = neighbor_with(MockChannel::with_bytes(&[77, 0, 1, 0]));
    assert!(matches!(
        neighbor.read(),
        Err(NeighborError::Protocol(ProtocolError::UnknownMessageType(77)))
    ));
}

#[test]
fn test_incompatible_handshake_rejected() {
    let frame = encode_handshake(&Handshake::outbound(14600, 0, COO, MWM + 1));
    let (mut neighbor, _) = neighbor_with(MockChannel::with_bytes(&frame));

    assert!(matches!(
        neighbor.read(),
        Err(NeighborError::HandshakeRejected(RejectReason::MwmMismatch { .. }))
    ));
    assert_eq!(neighbor.handshake().state, HandshakeState::Failed);
    assert_eq!(neighbor.handle().state(), NeighborState::Handshaking);
}

#[test]
fn test_eof_is_connection_closed() {
    let mut channel = MockChannel::with_bytes(&[1, 0]);
    channel.closed = true;
    let (mut neighbor, _) = neighbor_with(channel);
    assert!(matches!(neighbor.read(), Err(NeighborError::ConnectionClosed)));
}

#[test]
fn test_read_stops_after_handshake() {
    let requested = TxHash::new([3u8; HASH_BYTES]);
    let mut bytes = their_handshake();
    bytes.extend(encode_transaction_gossip(&sample_tx(), &requested));
    let (mut neighbor, intake) = neighbor_with(MockChannel::with_bytes(&bytes));

    neighbor.read().unwrap();
    assert_eq!(neighbor.handle().state(), NeighborState::ReadyForMessages);
    assert!(intake.gossip.lock().is_empty());

    // the next read picks up the gossip frame still buffered in the socket
    neighbor.read().unwrap();
    assert_eq!(intake.gossip.lock().len(), 1);
}

#[test]
fn test_multiple_frames_in_one_read() {
    let requested = TxHash::new([3u8; HASH_BYTES]);
    let gossip = encode_transaction_gossip(&sample_tx(), &requested);
    let heartbeat = Heartbeat {
        first_solid_milestone_index: 10,
        last_solid_milestone_index: 20,
    };

    let mut bytes = their_handshake();
    bytes.extend(&gossip);
    bytes.extend(encode_heartbeat(&heartbeat));
    bytes.extend(encode_milestone_request(42));
    bytes.extend(&gossip);
    let (mut neighbor, intake) = neighbor_with(MockChannel::with_bytes(&bytes));

    neighbor.read().unwrap();
    let consumed = neighbor.read().unwrap();
    assert_eq!(consumed, bytes.len() - their_handshake().len());

    let received = intake.gossip.lock();
    assert_eq!(received.len(), 2);
    assert_eq!(received[0], gossip[HEADER_BYTES..].to_vec());
    assert_eq!(*intake.milestone_requests.lock(), vec![42]);
    assert_eq!(neighbor.handle().heartbeat(), Some(heartbeat));
    assert_eq!(neighbor.read_state(), ReadState::ParseHeader);
}

#[test]
fn test_bad_length_after_handshake_closes() {
    let mut bytes = their_handshake();
    bytes.extend(encode_header(MessageKind::MilestoneRequest, 9));
    let (mut neighbor, _) = neighbor_with(MockChannel::with_bytes(&bytes));

    neighbor.read().unwrap();
    assert!(matches!(
        neighbor.read(),
        Err(NeighborError::Protocol(ProtocolError::InvalidMessageLength { .. }))
    ));
}

#[test]
fn test_marked_neighbor_stops_reading() {
    let mut bytes = their_handshake();
    bytes.extend(encode_milestone_request(1));
    let (mut neighbor, intake) = neighbor_with(MockChannel::with_bytes(&bytes));

    neighbor.read().unwrap();
    neighbor.handle().set_state(NeighborState::MarkedForDisconnect);
    assert_eq!(neighbor.read().unwrap(), 0);
    assert!(intake.milestone_requests.lock().is_empty());
}

#[test]
fn test_write_idle_when_nothing_queued() {
    let (mut neighbor, _) = neighbor_with(MockChannel::default());
    assert_eq!(neighbor.write().unwrap(), WriteProgress::Idle);
}

#[test]
fn test_write_continues_partial_frame() {
    let mut channel = MockChannel::default();
    channel.write_chunk = Some(4);
    let (mut neighbor, _) = neighbor_with(channel);

    let frame: Vec<u8> = (0u8..10).collect();
    neighbor.handle().send(frame.clone());
    neighbor.handle().send(vec![99]);

    assert_eq!(neighbor.write().unwrap(), WriteProgress::Wrote(4));
    assert!(neighbor.has_partial_write());
    assert_eq!(neighbor.write().unwrap(), WriteProgress::Wrote(4));
    assert_eq!(neighbor.write().unwrap(), WriteProgress::Wrote(2));
    assert!(!neighbor.has_partial_write());
    assert_eq!(neighbor.write().unwrap(), WriteProgress::Wrote(1));
    assert_eq!(neighbor.write().unwrap(), WriteProgress::Idle);

    let mut expected = frame;
    expected.push(99);
    assert_eq!(neighbor.channel().outbound, expected);
}

#[test]
fn test_write_would_block_keeps_frame() {
    let mut channel = MockChannel::default();
    channel.write_chunk = Some(0);
    let (mut neighbor, _) = neighbor_with(channel);

    neighbor.handle().send(vec![1, 2, 3]);
    assert_eq!(neighbor.write().unwrap(), WriteProgress::Wrote(0));
    assert!(neighbor.has_partial_write());
    assert_eq!(neighbor.handle().send_queue_len(), 0);
}

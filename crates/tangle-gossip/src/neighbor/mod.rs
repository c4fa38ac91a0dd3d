//! # Neighbor
//!
//! One peer connection, split in two halves:
//!
//! - [`Neighbor`]: the I/O half, owned by the connection task. Holds the
//!   socket, the frame reader and the read state machine.
//! - [`NeighborHandle`]: the shared half. Send queue, state, metrics.
//!
//! ## Read State Machine
//!
//! ```text
//! PARSE_HEADER ──header ok──→ READ_MESSAGE
//!      ↑                           │
//!      └────── payload dispatched ─┘
//! ```
//!
//! While `Handshaking`, the first frame must be a handshake. Any protocol
//! violation makes `read` return an error; the owner closes the connection.

mod channel;
mod handle;
mod message_reader;

pub use channel::Channel;
pub use handle::{ConnectionId, NeighborHandle};
pub use message_reader::MessageReader;

use std::io;
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::domain::{
    decode_handshake, decode_header, decode_message, verify_handshake, Handshake, HandshakePolicy,
    HandshakeResult, HandshakeState, Message, MessageKind, NeighborState, ProtocolHeader,
    HANDSHAKE_FIXED_BYTES, HEADER_BYTES,
};
use crate::events::{NeighborError, ProtocolError};
use crate::ports::TransactionIntake;

/// Sub-state of the frame reader.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadState {
    ParseHeader,
    ReadMessage,
}

/// Outcome of one `write` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteProgress {
    /// Nothing queued and nothing pending.
    Idle,
    /// Bytes written; 0 when the socket would block.
    Wrote(usize),
}

#[derive(Debug)]
struct PartialWrite {
    frame: Vec<u8>,
    offset: usize,
}

/// The I/O half of a peer connection.
pub struct Neighbor<C> {
    channel: C,
    handle: NeighborHandle,
    reader: MessageReader,
    read_state: ReadState,
    header: Option<ProtocolHeader>,
    partial_write: Option<PartialWrite>,
    handshake: Handshake,
    policy: HandshakePolicy,
    intake: Arc<dyn TransactionIntake>,
}

impl<C: Channel> Neighbor<C> {
    pub fn new(
        channel: C,
        handle: NeighborHandle,
        policy: HandshakePolicy,
        intake: Arc<dyn TransactionIntake>,
    ) -> Self {
        Self {
            channel,
            handle,
            reader: MessageReader::new(HEADER_BYTES),
            read_state: ReadState::ParseHeader,
            header: None,
            partial_write: None,
            handshake: Handshake::pending(),
            policy,
            intake,
        }
    }

    pub fn handle(&self) -> &NeighborHandle {
        &self.handle
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn read_state(&self) -> ReadState {
        self.read_state
    }

    pub fn has_partial_write(&self) -> bool {
        self.partial_write.is_some()
    }

    /// The peer's handshake as last seen by [`Neighbor::read`].
    pub fn peer_handshake(&self) -> &Handshake {
        &self.handshake
    }

    /// Drives the handshake exchange.
    ///
    /// Returns the peer's handshake as known so far: `Init` while bytes are
    /// still missing, `Ok` once a compatible handshake arrived, `Failed` on
    /// any read error or rejection.
    pub fn handshake(&mut self) -> Handshake {
        if let Err(e) = self.read() {
            debug!(neighbor = %self.handle.identity(), error = %e, "handshake failed");
            self.handshake.state = HandshakeState::Failed;
        }
        self.handshake.clone()
    }

    /// Reads and dispatches every complete frame currently available.
    ///
    /// Returns the number of bytes consumed. An error means the connection
    /// must be closed.
    pub fn read(&mut self) -> Result<usize, NeighborError> {
        let result = self.read_frames();
        if result.is_err() && self.handle.state() == NeighborState::Handshaking {
            self.handshake.state = HandshakeState::Failed;
        }
        result
    }

    fn read_frames(&mut self) -> Result<usize, NeighborError> {
        let mut total = 0;
        loop {
            if self.handle.state() == NeighborState::MarkedForDisconnect {
                return Ok(total);
            }

            let n = self
                .reader
                .read_from(&mut self.channel)
                .map_err(|e| match e.kind() {
                    io::ErrorKind::UnexpectedEof => NeighborError::ConnectionClosed,
                    _ => NeighborError::Io(e),
                })?;
            total += n;
            if !self.reader.ready() {
                if n == 0 {
                    return Ok(total);
                }
                continue;
            }

            match self.read_state {
                ReadState::ParseHeader => {
                    let header = self.parse_header()?;
                    self.header = Some(header);
                    self.reader.reset(header.message_length as usize);
                    self.read_state = ReadState::ReadMessage;
                }
                ReadState::ReadMessage => {
                    let kind = match self.header.take() {
                        Some(header) => header.message_type,
                        None => MessageKind::Header,
                    };
                    let payload = self.reader.message().to_vec();
                    self.reader.reset(HEADER_BYTES);
                    self.read_state = ReadState::ParseHeader;

                    let was_handshaking = self.handle.state() == NeighborState::Handshaking;
                    self.dispatch(kind, &payload)?;
                    if was_handshaking {
                        // the owner finalises the connection before more frames flow
                        return Ok(total);
                    }
                }
            }
        }
    }

    fn parse_header(&self) -> Result<ProtocolHeader, NeighborError> {
        let bytes: [u8; HEADER_BYTES] = match self.reader.message().try_into() {
            Ok(bytes) => bytes,
            Err(_) => return Err(io::Error::from(io::ErrorKind::InvalidData).into()),
        };
        let header = decode_header(&bytes).inspect_err(|e| {
            error!(neighbor = %self.handle.identity(), error = %e, "invalid header");
        })?;

        if self.handle.state() == NeighborState::Handshaking {
            if header.message_type != MessageKind::Handshake {
                error!(
                    neighbor = %self.handle.identity(),
                    kind = ?header.message_type,
                    "first message is not a handshake"
                );
                return Err(ProtocolError::UnexpectedFirstMessage(header.message_type).into());
            }
            if (header.message_length as usize) <= HANDSHAKE_FIXED_BYTES {
                error!(
                    neighbor = %self.handle.identity(),
                    length = header.message_length,
                    "handshake too short"
                );
                return Err(ProtocolError::InvalidMessageLength {
                    kind: MessageKind::Handshake,
                    advertised: header.message_length,
                    max: MessageKind::Handshake.max_length(),
                }
                .into());
            }
        }
        Ok(header)
    }

    fn dispatch(&mut self, kind: MessageKind, payload: &[u8]) -> Result<(), NeighborError> {
        if self.handle.state() == NeighborState::Handshaking {
            return self.process_handshake(payload);
        }

        let message = decode_message(kind, payload).inspect_err(|e| {
            error!(neighbor = %self.handle.identity(), error = %e, "malformed message");
        })?;
        match message {
            Message::Handshake(_) => {
                debug!(neighbor = %self.handle.identity(), "ignoring repeated handshake");
            }
            Message::TransactionGossip(payload) => self.intake.process(&self.handle, payload),
            Message::Heartbeat(heartbeat) => {
                debug!(
                    neighbor = %self.handle.identity(),
                    first = heartbeat.first_solid_milestone_index,
                    last = heartbeat.last_solid_milestone_index,
                    "heartbeat"
                );
                self.handle.record_heartbeat(heartbeat);
            }
            Message::MilestoneRequest(index) => {
                self.intake.process_milestone_request(&self.handle, index)
            }
        }
        Ok(())
    }

    fn process_handshake(&mut self, payload: &[u8]) -> Result<(), NeighborError> {
        let theirs = decode_handshake(payload)?;
        match verify_handshake(&self.policy, &theirs) {
            HandshakeResult::Accept { protocol_version } => {
                if self.handle.remote_server_port().is_none() {
                    self.handle.set_remote_server_port(theirs.server_socket_port);
                }
                self.handle.set_protocol_version(protocol_version);
                self.handshake = theirs;
                self.handshake.state = HandshakeState::Ok;
                self.handle.set_state(NeighborState::ReadyForMessages);
                Ok(())
            }
            HandshakeResult::Reject(reason) => {
                warn!(neighbor = %self.handle.identity(), ?reason, "handshake rejected");
                self.handshake = theirs;
                self.handshake.state = HandshakeState::Failed;
                Err(NeighborError::HandshakeRejected(reason))
            }
        }
    }

    /// Writes as much of the next outbound frame as the socket accepts.
    pub fn write(&mut self) -> Result<WriteProgress, NeighborError> {
        let mut pending = match self.partial_write.take() {
            Some(pending) => pending,
            None => match self.handle.pop_frame() {
                Some(frame) => PartialWrite { frame, offset: 0 },
                None => return Ok(WriteProgress::Idle),
            },
        };

        let written = match self.channel.try_write(&pending.frame[pending.offset..]) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => 0,
            Err(e) => {
                warn!(neighbor = %self.handle.identity(), error = %e, "write failed");
                return Err(e.into());
            }
        };
        pending.offset += written;
        if pending.offset < pending.frame.len() {
            self.partial_write = Some(pending);
        }
        Ok(WriteProgress::Wrote(written))
    }
}

#[cfg(test)]
mod tests;

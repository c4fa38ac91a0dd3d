//! Incremental frame assembly across partial reads.

use std::io;

use super::channel::Channel;

/// Collects exactly `target` bytes over any number of non-blocking reads.
#[derive(Debug)]
pub struct MessageReader {
    buf: Vec<u8>,
    filled: usize,
}

impl MessageReader {
    pub fn new(target: usize) -> Self {
        Self {
            buf: vec![0u8; target],
            filled: 0,
        }
    }

    /// Starts collecting a new message of `target` bytes.
    pub fn reset(&mut self, target: usize) {
        self.buf.clear();
        self.buf.resize(target, 0);
        self.filled = 0;
    }

    /// Reads whatever the channel has, up to the missing byte count.
    ///
    /// A would-block read counts as 0 bytes. End of stream before the message
    /// is complete is reported as `UnexpectedEof`.
    pub fn read_from<C: Channel + ?Sized>(&mut self, channel: &mut C) -> io::Result<usize> {
        if self.ready() {
            return Ok(0);
        }
        match channel.try_read(&mut self.buf[self.filled..]) {
            Ok(0) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed mid-message",
            )),
            Ok(n) => {
                self.filled += n;
                Ok(n)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }

    pub fn ready(&self) -> bool {
        self.filled == self.buf.len()
    }

    /// The assembled message. Only meaningful once [`ready`](Self::ready).
    pub fn message(&self) -> &[u8] {
        &self.buf[..self.filled]
    }
}

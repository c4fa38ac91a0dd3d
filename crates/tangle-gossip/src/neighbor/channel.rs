//! Non-blocking byte channel a neighbor reads from and writes to.

use std::io;

use tokio::net::TcpStream;

/// Non-blocking socket operations.
///
/// Both calls return `ErrorKind::WouldBlock` instead of waiting. `Ok(0)` from
/// `try_read` with a non-empty buffer means the peer closed the stream.
pub trait Channel: Send {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize>;
}

impl Channel for TcpStream {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        TcpStream::try_read(self, buf)
    }

    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        TcpStream::try_write(self, buf)
    }
}

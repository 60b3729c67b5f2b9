// Transport module - raw byte-stream capability and deadline cache

pub mod stream;

pub use stream::DeadlineStream;

use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use tokio::time::Instant;

/// Byte-stream transport driven by the connection
///
/// Deadlines are properties of the transport: once set, every subsequent
/// read or write is bounded by them until they are changed.
#[async_trait]
pub trait Transport: Send {
    /// Read into `buf`, returning the number of bytes received (0 on EOF)
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write the whole of `buf` or fail
    async fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Shut the stream down
    async fn close(&mut self) -> io::Result<()>;

    fn local_addr(&self) -> Option<SocketAddr>;

    fn remote_addr(&self) -> Option<SocketAddr>;

    /// Bound future reads; `None` clears the deadline
    fn set_read_deadline(&mut self, deadline: Option<Instant>);

    /// Bound future writes; `None` clears the deadline
    fn set_write_deadline(&mut self, deadline: Option<Instant>);
}

/// Last deadlines set on a connection
///
/// Kept so they can be reapplied when the active stream is replaced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadlines {
    pub read: Option<Instant>,
    pub write: Option<Instant>,
}

impl Deadlines {
    /// Push both cached deadlines onto `transport`
    pub fn apply_to<T: Transport + ?Sized>(&self, transport: &mut T) {
        transport.set_read_deadline(self.read);
        transport.set_write_deadline(self.write);
    }
}

/// Render an optional remote address for error messages
pub(crate) fn describe_addr(addr: Option<SocketAddr>) -> String {
    match addr {
        Some(addr) => addr.to_string(),
        None => "<unknown>".to_string(),
    }
}

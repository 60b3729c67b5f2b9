// Deadline-bounded stream - tokio-backed Transport implementation

use super::Transport;
use async_trait::async_trait;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{Instant, timeout, timeout_at};

/// Wraps an async stream and bounds every read/write by the current deadline
pub struct DeadlineStream<S> {
    stream: S,
    local: Option<SocketAddr>,
    remote: Option<SocketAddr>,
    read_deadline: Option<Instant>,
    write_deadline: Option<Instant>,
}

impl DeadlineStream<TcpStream> {
    /// Open a TCP connection with a connect timeout
    pub async fn connect(addr: SocketAddr, connect_timeout: Duration) -> io::Result<Self> {
        let stream = timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("Connection timeout after {:?} to {}", connect_timeout, addr),
                )
            })??;

        let local = stream.local_addr().ok();
        let remote = stream.peer_addr().ok();
        Ok(Self::new(stream, local, remote))
    }
}

impl<S> DeadlineStream<S> {
    pub fn new(stream: S, local: Option<SocketAddr>, remote: Option<SocketAddr>) -> Self {
        Self {
            stream,
            local,
            remote,
            read_deadline: None,
            write_deadline: None,
        }
    }

    pub fn read_deadline(&self) -> Option<Instant> {
        self.read_deadline
    }

    pub fn write_deadline(&self) -> Option<Instant> {
        self.write_deadline
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

/// Run `fut` until `deadline`, mapping expiry to `TimedOut`
async fn bounded<T, F>(deadline: Option<Instant>, op: &str, fut: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match deadline {
        Some(at) => match timeout_at(at, fut).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("{} deadline exceeded", op),
            )),
        },
        None => fut.await,
    }
}

#[async_trait]
impl<S> Transport for DeadlineStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        bounded(self.read_deadline, "read", self.stream.read(buf)).await
    }

    async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let stream = &mut self.stream;
        bounded(self.write_deadline, "write", async move {
            stream.write_all(buf).await?;
            stream.flush().await?;
            Ok(buf.len())
        })
        .await
    }

    async fn close(&mut self) -> io::Result<()> {
        bounded(self.write_deadline, "close", self.stream.shutdown()).await
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote
    }

    fn set_read_deadline(&mut self, deadline: Option<Instant>) {
        self.read_deadline = deadline;
    }

    fn set_write_deadline(&mut self, deadline: Option<Instant>) {
        self.write_deadline = deadline;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_read_without_deadline_returns_data() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut stream = DeadlineStream::new(client, None, None);

        server.write_all(b"220 ready\r\n").await.unwrap();

        let mut buf = [0u8; 64];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"220 ready\r\n");
    }

    #[tokio::test]
    async fn test_expired_read_deadline_times_out() {
        let (client, _server) = tokio::io::duplex(64);
        let mut stream = DeadlineStream::new(client, None, None);
        stream.set_read_deadline(Some(Instant::now()));

        let mut buf = [0u8; 16];
        let err = stream.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn test_cleared_deadline_no_longer_applies() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut stream = DeadlineStream::new(client, None, None);
        stream.set_read_deadline(Some(Instant::now()));
        stream.set_read_deadline(None);

        server.write_all(b"x").await.unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(stream.read(&mut buf).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_write_reports_full_length() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut stream = DeadlineStream::new(client, None, None);

        let n = stream.write(b"EHLO a\r\n").await.unwrap();
        assert_eq!(n, 8);

        let mut buf = [0u8; 8];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"EHLO a\r\n");
    }

    #[tokio::test]
    async fn test_connect_captures_addresses() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let stream = DeadlineStream::connect(addr, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(stream.remote_addr(), Some(addr));
        assert!(stream.local_addr().is_some());
    }
}

//! Buffered connection over a plain or TLS transport.
//!
//! Actions perform non-blocking reads and writes against the connection's
//! stream buffers; [`IoProgress::WouldBlock`] is not an error and never
//! closes the connection. It tells the action to re-arm by awaiting
//! [`BufferedConn::fill`] (inbound readiness) or
//! [`BufferedConn::flush_output`] (outbound drain).

pub mod buffer;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use crate::conn::buffer::StreamBuf;
use crate::error::{Error, Result};

/// Outcome of one non-blocking I/O step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoProgress {
    /// Bytes moved.
    Count(usize),
    /// No progress possible right now; re-arm and retry.
    WouldBlock,
    /// Peer closed the read side.
    Eof,
}

enum Transport {
    Tcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Transport {
    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Transport::Tcp(s) => s.read(buf).await,
            Transport::Tls(s) => s.read(buf).await,
        }
    }

    async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            Transport::Tcp(s) => s.write_all(buf).await,
            Transport::Tls(s) => s.write_all(buf).await,
        }
    }

    async fn shutdown(&mut self) -> std::io::Result<()> {
        match self {
            Transport::Tcp(s) => AsyncWriteExt::shutdown(s).await,
            Transport::Tls(s) => AsyncWriteExt::shutdown(s.as_mut()).await,
        }
    }

    fn tcp(&self) -> &TcpStream {
        match self {
            Transport::Tcp(s) => s,
            Transport::Tls(s) => s.get_ref().0,
        }
    }
}

// Compile-time check that both transports stay full duplex streams.
fn _assert_stream<T: AsyncRead + AsyncWrite + Unpin>() {}
fn _assert_transports() {
    _assert_stream::<TcpStream>();
    _assert_stream::<TlsStream<TcpStream>>();
}

/// A transport endpoint with addresses, stream buffers, an activity
/// timestamp, and socket tuning flags.
pub struct BufferedConn {
    transport: Option<Transport>,
    local_addr: Option<SocketAddr>,
    peer_addr: Option<SocketAddr>,
    recv: StreamBuf,
    send: StreamBuf,
    last_activity: Instant,
    nodelay: bool,
    nopush: bool,
    eof: bool,
}

impl BufferedConn {
    pub fn new(io_buffer_size: usize) -> Self {
        Self {
            transport: None,
            local_addr: None,
            peer_addr: None,
            recv: StreamBuf::with_capacity(io_buffer_size),
            send: StreamBuf::with_capacity(io_buffer_size),
            last_activity: Instant::now(),
            nodelay: false,
            nopush: false,
            eof: false,
        }
    }

    /// Establish a plain TCP transport.
    pub async fn connect_to_host(&mut self, addr: SocketAddr) -> Result<()> {
        let stream = TcpStream::connect(addr).await?;
        if self.nodelay {
            stream.set_nodelay(true)?;
        }
        self.local_addr = stream.local_addr().ok();
        self.peer_addr = stream.peer_addr().ok();
        self.transport = Some(Transport::Tcp(stream));
        self.eof = false;
        self.touch();
        Ok(())
    }

    /// Run the TLS handshake over an established TCP transport.
    ///
    /// Handshake failure is a connection-level error: the caller aborts the
    /// connection rather than retrying the handshake.
    pub async fn handshake_tls(
        &mut self,
        server_name: &str,
        ctx: Arc<rustls::ClientConfig>,
    ) -> Result<()> {
        let name = rustls::pki_types::ServerName::try_from(server_name.to_string())
            .map_err(|_| Error::TlsInvalidServerName(server_name.to_string()))?;
        let tcp = match self.transport.take() {
            Some(Transport::Tcp(s)) => s,
            other => {
                self.transport = other;
                return Err(Error::TlsHandshake("transport not ready for handshake".into()));
            }
        };
        let connector = TlsConnector::from(ctx);
        match connector.connect(name, tcp).await {
            Ok(stream) => {
                self.transport = Some(Transport::Tls(Box::new(stream)));
                self.touch();
                Ok(())
            }
            Err(e) => Err(Error::TlsHandshake(e.to_string())),
        }
    }

    /// Non-blocking read from the receive buffer.
    pub fn read(&mut self, dst: &mut [u8]) -> IoProgress {
        if !self.recv.is_empty() {
            IoProgress::Count(self.recv.read(dst))
        } else if self.eof {
            IoProgress::Eof
        } else {
            IoProgress::WouldBlock
        }
    }

    /// Non-blocking write into the send buffer.
    pub fn write(&mut self, src: &[u8]) -> IoProgress {
        match self.send.write(src) {
            0 if !src.is_empty() => IoProgress::WouldBlock,
            n => IoProgress::Count(n),
        }
    }

    /// Borrow the unconsumed receive bytes (for incremental parsing).
    pub fn peek_recv(&self) -> &[u8] {
        self.recv.peek()
    }

    /// Consume `n` parsed bytes from the receive buffer.
    pub fn consume_recv(&mut self, n: usize) {
        self.recv.consume(n);
    }

    /// Await readiness and refill the receive buffer from the transport.
    pub async fn fill(&mut self) -> Result<IoProgress> {
        if self.eof {
            return Ok(IoProgress::Eof);
        }
        let room = self.recv.remaining_capacity();
        if room == 0 {
            return Ok(IoProgress::WouldBlock);
        }
        let transport = self.transport.as_mut().ok_or_else(closed_err)?;
        let mut chunk = vec![0u8; room.min(8 * 1024)];
        let n = transport.read(&mut chunk).await?;
        if n == 0 {
            self.eof = true;
            return Ok(IoProgress::Eof);
        }
        self.recv.write(&chunk[..n]);
        self.touch();
        Ok(IoProgress::Count(n))
    }

    /// Drain the send buffer to the transport.
    pub async fn flush_output(&mut self) -> Result<()> {
        if self.send.is_empty() {
            return Ok(());
        }
        let transport = self.transport.as_mut().ok_or_else(closed_err)?;
        transport.write_all(self.send.peek()).await?;
        self.send.clear();
        self.touch();
        Ok(())
    }

    /// Half-close the write side for a graceful drain before full close.
    pub async fn start_lingering_close(&mut self) {
        if let Some(transport) = self.transport.as_mut() {
            let _ = transport.shutdown().await;
        }
    }

    /// Release the transport and reset buffers.
    ///
    /// This is the single point of guaranteed resource reclamation and is
    /// idempotent: error paths may call it any number of times.
    pub fn close(&mut self) {
        self.transport = None;
        self.recv.clear();
        self.send.clear();
        self.eof = false;
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_none()
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Request TCP_NODELAY; applied to the live socket when connected,
    /// remembered for the next connect otherwise.
    pub fn set_nodelay(&mut self, nodelay: bool) {
        self.nodelay = nodelay;
        if let Some(t) = &self.transport {
            let _ = t.tcp().set_nodelay(nodelay);
        }
    }

    /// Output-coalescing hint. Tracked per connection; platform corking is
    /// outside this contract.
    pub fn set_nopush(&mut self, nopush: bool) {
        self.nopush = nopush;
    }

    pub fn nopush(&self) -> bool {
        self.nopush
    }
}

fn closed_err() -> Error {
    Error::Io(std::io::Error::new(
        std::io::ErrorKind::NotConnected,
        "connection closed",
    ))
}

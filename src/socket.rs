//! Datagram channel abstraction.
//!
//! [`Channel`] is the only I/O surface the protocol layers see: send one
//! [`Message`] to a peer, or wait (optionally bounded) for the next one.
//! The transport underneath may lose, duplicate, or reorder datagrams.
//!
//! [`Socket`] is the production implementation, a thin wrapper around
//! `tokio::net::UdpSocket` that speaks [`Message`] instead of raw bytes.
//! All protocol logic lives elsewhere; this module owns only byte I/O.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::message::{CodecError, Message};

/// Maximum UDP payload size; one message must always fit in one datagram.
pub const MAX_DATAGRAM: usize = 65_535;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can arise from channel operations.
#[derive(Error, Debug)]
pub enum SocketError {
    /// Underlying I/O error from the OS.
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The received datagram could not be decoded as a message. The caller
    /// decides whether to keep listening.
    #[error("{0}")]
    Codec(#[from] CodecError),
    /// The other end of an in-process channel has gone away.
    #[error("channel closed")]
    Closed,
}

impl SocketError {
    /// `true` when the error concerns one bad datagram rather than the
    /// channel itself.
    pub fn is_decode(&self) -> bool {
        matches!(self, SocketError::Codec(_))
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// An unreliable, unordered, message-oriented datagram channel.
#[allow(async_fn_in_trait)]
pub trait Channel {
    /// Address this end is reachable at.
    fn local_addr(&self) -> SocketAddr;

    /// Send `message` as a single datagram to `dest`.
    async fn send(&mut self, message: &Message, dest: SocketAddr) -> Result<(), SocketError>;

    /// Receive the next message.
    ///
    /// `wait = None` blocks indefinitely. Returns `Ok(None)` when a bounded
    /// wait elapses without any datagram arriving.
    async fn recv(
        &mut self,
        wait: Option<Duration>,
    ) -> Result<Option<(Message, SocketAddr)>, SocketError>;
}

// ---------------------------------------------------------------------------
// Socket
// ---------------------------------------------------------------------------

/// A message-oriented UDP socket.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
    buf: Vec<u8>,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing `0.0.0.0:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, SocketError> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self {
            local_addr,
            inner,
            buf: vec![0u8; MAX_DATAGRAM],
        })
    }

    async fn recv_one(&mut self) -> Result<(Message, SocketAddr), SocketError> {
        let (n, addr) = self.inner.recv_from(&mut self.buf).await?;
        let message = Message::decode(&self.buf[..n])?;
        Ok((message, addr))
    }
}

impl Channel for Socket {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn send(&mut self, message: &Message, dest: SocketAddr) -> Result<(), SocketError> {
        let bytes = message.encode()?;
        let n = self.inner.send_to(&bytes, dest).await?;
        log::trace!("sent {n} bytes of type {} to {dest}", message.kind);
        Ok(())
    }

    async fn recv(
        &mut self,
        wait: Option<Duration>,
    ) -> Result<Option<(Message, SocketAddr)>, SocketError> {
        match wait {
            None => self.recv_one().await.map(Some),
            Some(bound) => match timeout(bound, self.recv_one()).await {
                Ok(result) => result.map(Some),
                Err(_elapsed) => Ok(None),
            },
        }
    }
}

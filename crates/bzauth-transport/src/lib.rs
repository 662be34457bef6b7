//! Transport abstraction layer for bzauthd.
//!
//! Provides the [`Transport`] and [`Connection`] traits the daemon's
//! connection loop is written against, and their TCP implementation
//! ([`TcpTransport`], [`TcpConnection`]).
//!
//! A transport moves raw bytes only. `recv()` hands back whatever chunk
//! the socket produced; splitting it into frames is the codec's job, one
//! layer up.

mod error;
mod tcp;

pub use error::TransportError;
pub use tcp::{READ_CHUNK_LEN, TcpConnection, TcpTransport};

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Accepts new incoming connections.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;

    /// Waits for and accepts the next incoming connection.
    fn accept(
        &mut self,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;

    /// The address this transport is listening on.
    fn local_addr(&self) -> Result<SocketAddr, TransportError>;
}

/// A single connection that can send and receive bytes.
///
/// Futures are `Send` so a connection can be driven from its own tokio
/// task.
pub trait Connection: Send + Sync + 'static {
    /// Writes all of `data` to the remote peer.
    fn send(&self, data: &[u8]) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Receives the next chunk of bytes from the remote peer.
    ///
    /// Returns `Ok(None)` when the peer closed its end.
    fn recv(&self) -> impl Future<Output = Result<Option<Vec<u8>>, TransportError>> + Send;

    /// Closes the sending half. Safe to call more than once.
    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;

    /// Address of the remote peer.
    fn peer_addr(&self) -> SocketAddr;
}

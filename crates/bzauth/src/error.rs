//! Unified error type for the daemon.

use bzauth_directory::DirectoryError;
use bzauth_protocol::{Opcode, PeerType, ProtocolError};
use bzauth_session::SessionError;
use bzauth_transport::TransportError;

use crate::config::ConfigError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant lets `?` convert sub-crate
/// errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum AuthdError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Why the dispatcher dropped a peer.
///
/// Every variant is a framing or protocol violation. Credential and
/// directory problems never show up here: they are answered with a
/// `*_FAIL` frame and the connection stays open.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The frame or its payload did not parse.
    #[error(transparent)]
    Malformed(#[from] ProtocolError),

    /// The first frame on a connection was not a handshake.
    #[error("expected handshake, got opcode {0}")]
    HandshakeRequired(Opcode),

    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u16),

    /// The opcode is not in this peer's table. A second handshake lands
    /// here too.
    #[error("opcode {opcode} is not valid for a {peer} peer")]
    NotPermitted { opcode: Opcode, peer: PeerType },
}

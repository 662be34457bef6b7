//! Wire protocol for bzauth.
//!
//! This crate defines the binary "language" spoken between the daemon and
//! its peers:
//!
//! - **Codec** ([`FrameCodec`], [`Frame`]) splits a TCP byte stream into
//!   `opcode | length | payload` frames.
//! - **Packets** ([`PacketBuilder`], [`PacketReader`]) write and read the
//!   fields inside a payload without ever indexing past its end.
//! - **Types** ([`Opcode`], [`Handshake`], [`Challenge`], ...) give each
//!   message a typed shape.
//! - **Errors** ([`ProtocolError`]) cover every way a peer can violate the
//!   format.
//!
//! # Architecture
//!
//! ```text
//! Transport (bytes) → Protocol (Frame / payload types) → Dispatcher (peer state)
//! ```
//!
//! Nothing here knows about connections, tokens, or users.

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

mod codec;
mod error;
mod packet;
mod types;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use codec::{DEFAULT_MAX_PAYLOAD, Frame, FrameCodec, HEADER_LEN, MAX_PAYLOAD_LEN};
pub use error::ProtocolError;
pub use packet::{PacketBuilder, PacketReader};
pub use types::{
    CALLSIGN_FIELD_LEN, Challenge, CipherResponse, ClientHello, CommType, FailReason,
    GroupListRequest, Handshake, Opcode, PROTOCOL_VERSION, PeerType, RegisterForm,
    RegisterResponse, TokenQuery, TokenStatus, TokenValidateRequest, TokenValidateResponse,
    TokenVerdict, auth_success, decode_failure, decode_group_list, failure, group_list,
};

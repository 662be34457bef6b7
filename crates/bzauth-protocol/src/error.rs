//! Error types for the protocol layer.
//!
//! Every variant here means the byte stream or a payload violated the wire
//! format. The dispatcher treats all of them as "this peer can no longer be
//! trusted" and drops the connection.

/// Errors that can occur while framing or parsing packets.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// A frame announced (or would need) more payload bytes than allowed.
    ///
    /// On decode this means a peer sent a header with a length above the
    /// codec's cap. On encode it means a [`PacketBuilder`](crate::PacketBuilder)
    /// hit its maximum size.
    #[error("frame too large: {len} bytes (max {max})")]
    FrameTooLarge { len: usize, max: usize },

    /// A payload ended before a field could be read.
    #[error("payload truncated: needed {needed} more bytes, {remaining} left")]
    Truncated { needed: usize, remaining: usize },

    /// A field was present but its value is not allowed.
    ///
    /// For example an unknown peer type in a handshake, or a callsign
    /// buffer containing control characters.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The underlying I/O failed while the codec was driven by a stream.
    ///
    /// `tokio_util::codec` requires `From<io::Error>` on codec errors.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

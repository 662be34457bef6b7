//! Frame codec: splits a byte stream into length-prefixed frames.
//!
//! Every message on the wire has the same shape:
//!
//! ```text
//! ┌──────────────┬──────────────┬──────────────────────┐
//! │ opcode (u16) │ length (u16) │ payload (length B)   │
//! └──────────────┴──────────────┴──────────────────────┘
//! ```
//!
//! Both header fields are big-endian. The codec knows nothing about what an
//! opcode means; that is the dispatcher's job.
//!
//! [`FrameCodec`] implements the `tokio_util::codec` traits, so it can be used
//! either with a `Framed` stream or driven by hand against a `BytesMut` read
//! buffer (which is what the connection handler does).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{Opcode, ProtocolError};

/// Size of the frame header: opcode + length.
pub const HEADER_LEN: usize = 4;

/// Largest payload the `u16` length field can describe.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Default cap for inbound payloads. Nothing in the protocol comes close.
pub const DEFAULT_MAX_PAYLOAD: usize = 8 * 1024;

/// One complete protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw opcode. Kept as [`Opcode`] so unknown values survive decoding
    /// and can be rejected by the peer's opcode table.
    pub opcode: Opcode,
    /// Payload bytes. `payload.len()` always equals the header's length.
    pub payload: Bytes,
}

impl Frame {
    /// Creates a frame from an opcode and payload.
    pub fn new(opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        Self {
            opcode,
            payload: payload.into(),
        }
    }

    /// Creates a frame with an empty payload.
    pub fn empty(opcode: Opcode) -> Self {
        Self::new(opcode, Bytes::new())
    }

    /// Encodes this frame into a standalone buffer.
    ///
    /// # Errors
    /// Returns [`ProtocolError::FrameTooLarge`] if the payload does not fit
    /// the `u16` length field.
    pub fn to_bytes(&self) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        FrameCodec::default().encode(self.clone(), &mut buf)?;
        Ok(buf.freeze())
    }
}

/// Length-prefixed frame decoder/encoder.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_payload: usize,
}

impl FrameCodec {
    /// Creates a codec that rejects payloads longer than `max_payload`.
    ///
    /// The cap is clamped to [`MAX_PAYLOAD_LEN`].
    pub fn new(max_payload: usize) -> Self {
        Self {
            max_payload: max_payload.min(MAX_PAYLOAD_LEN),
        }
    }

    /// The largest payload this codec accepts.
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD)
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    /// Consumes exactly one frame if the buffer holds all of it.
    ///
    /// An incomplete frame is not an error: the buffer is left untouched
    /// and `Ok(None)` asks the caller to read more bytes.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        // Peek without advancing so an incomplete frame stays intact.
        let opcode = u16::from_be_bytes([src[0], src[1]]);
        let len = u16::from_be_bytes([src[2], src[3]]) as usize;

        if len > self.max_payload {
            return Err(ProtocolError::FrameTooLarge {
                len,
                max: self.max_payload,
            });
        }

        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(len).freeze();

        Ok(Some(Frame {
            opcode: Opcode(opcode),
            payload,
        }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let len = frame.payload.len();
        if len > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::FrameTooLarge {
                len,
                max: MAX_PAYLOAD_LEN,
            });
        }

        dst.reserve(HEADER_LEN + len);
        dst.put_u16(frame.opcode.0);
        dst.put_u16(len as u16);
        dst.put_slice(&frame.payload);
        Ok(())
    }
}

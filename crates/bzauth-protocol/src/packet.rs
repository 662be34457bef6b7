//! Payload builders and readers.
//!
//! [`PacketBuilder`] assembles an outgoing payload field by field. Its buffer
//! starts small and doubles when a write would overflow, but never grows
//! past a caller-imposed maximum: a write that would cross it fails with
//! [`ProtocolError::FrameTooLarge`] instead.
//!
//! [`PacketReader`] is the other direction. Every read checks the remaining
//! length first, so a short payload becomes [`ProtocolError::Truncated`]
//! rather than a panic.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::{Frame, MAX_PAYLOAD_LEN};
use crate::{Opcode, ProtocolError};

/// Capacity a builder starts with when none is given.
const INITIAL_CAPACITY: usize = 64;

/// Builds a single outgoing frame.
#[derive(Debug)]
pub struct PacketBuilder {
    opcode: Opcode,
    buf: BytesMut,
    max: usize,
}

impl PacketBuilder {
    /// Starts a payload for `opcode`, capped at the largest encodable size.
    pub fn new(opcode: Opcode) -> Self {
        Self::with_limit(opcode, INITIAL_CAPACITY, MAX_PAYLOAD_LEN)
    }

    /// Starts a payload with an explicit initial capacity and maximum size.
    ///
    /// `max` is clamped to what the `u16` length field can describe.
    pub fn with_limit(opcode: Opcode, initial: usize, max: usize) -> Self {
        let max = max.min(MAX_PAYLOAD_LEN);
        Self {
            opcode,
            buf: BytesMut::with_capacity(initial.min(max).max(1)),
            max,
        }
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns `true` if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Current buffer capacity. Exposed so growth can be observed.
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Makes room for `extra` more bytes, doubling the capacity as needed.
    fn grow_for(&mut self, extra: usize) -> Result<(), ProtocolError> {
        let needed = self.buf.len() + extra;
        if needed > self.max {
            return Err(ProtocolError::FrameTooLarge {
                len: needed,
                max: self.max,
            });
        }
        let capacity = self.buf.capacity();
        if needed > capacity {
            let mut target = capacity.max(1);
            while target < needed {
                target = target.saturating_mul(2);
            }
            let target = target.min(self.max);
            self.buf.reserve(target - self.buf.len());
        }
        Ok(())
    }

    pub fn put_u8(&mut self, value: u8) -> Result<&mut Self, ProtocolError> {
        self.grow_for(1)?;
        self.buf.put_u8(value);
        Ok(self)
    }

    pub fn put_u16(&mut self, value: u16) -> Result<&mut Self, ProtocolError> {
        self.grow_for(2)?;
        self.buf.put_u16(value);
        Ok(self)
    }

    pub fn put_u32(&mut self, value: u32) -> Result<&mut Self, ProtocolError> {
        self.grow_for(4)?;
        self.buf.put_u32(value);
        Ok(self)
    }

    /// Appends raw bytes with no length prefix.
    pub fn put_slice(&mut self, bytes: &[u8]) -> Result<&mut Self, ProtocolError> {
        self.grow_for(bytes.len())?;
        self.buf.put_slice(bytes);
        Ok(self)
    }

    /// Appends a `u8` length followed by the bytes.
    ///
    /// # Errors
    /// [`ProtocolError::InvalidPayload`] if `bytes` is longer than 255.
    pub fn put_short_bytes(&mut self, bytes: &[u8]) -> Result<&mut Self, ProtocolError> {
        let len = u8::try_from(bytes.len()).map_err(|_| {
            ProtocolError::InvalidPayload(format!(
                "{} bytes do not fit a u8 length prefix",
                bytes.len()
            ))
        })?;
        self.put_u8(len)?;
        self.put_slice(bytes)
    }

    /// Appends a `u16` length followed by the bytes.
    pub fn put_long_bytes(&mut self, bytes: &[u8]) -> Result<&mut Self, ProtocolError> {
        let len = u16::try_from(bytes.len()).map_err(|_| ProtocolError::FrameTooLarge {
            len: bytes.len(),
            max: MAX_PAYLOAD_LEN,
        })?;
        self.put_u16(len)?;
        self.put_slice(bytes)
    }

    /// Writes `text` into a fixed-width, NUL-padded field.
    ///
    /// The text must leave room for at least one NUL terminator.
    pub fn put_fixed_str(&mut self, text: &str, width: usize) -> Result<&mut Self, ProtocolError> {
        if text.len() >= width {
            return Err(ProtocolError::InvalidPayload(format!(
                "'{text}' does not fit a {width}-byte field"
            )));
        }
        self.grow_for(width)?;
        self.buf.put_slice(text.as_bytes());
        self.buf.put_bytes(0, width - text.len());
        Ok(self)
    }

    /// Finishes the payload and wraps it in a frame.
    pub fn finish(self) -> Frame {
        Frame::new(self.opcode, self.buf.freeze())
    }
}

/// Reads fields from an incoming payload.
#[derive(Debug, Clone)]
pub struct PacketReader {
    buf: Bytes,
}

impl PacketReader {
    pub fn new(payload: Bytes) -> Self {
        Self { buf: payload }
    }

    /// Bytes not yet read.
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// Returns `true` once every byte has been read.
    pub fn is_exhausted(&self) -> bool {
        !self.buf.has_remaining()
    }

    fn need(&self, n: usize) -> Result<(), ProtocolError> {
        if self.buf.remaining() < n {
            return Err(ProtocolError::Truncated {
                needed: n,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_u16(&mut self) -> Result<u16, ProtocolError> {
        self.need(2)?;
        Ok(self.buf.get_u16())
    }

    pub fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        self.need(4)?;
        Ok(self.buf.get_u32())
    }

    /// Reads exactly `n` raw bytes.
    pub fn read_bytes(&mut self, n: usize) -> Result<Bytes, ProtocolError> {
        self.need(n)?;
        Ok(self.buf.split_to(n))
    }

    /// Reads a `u8` length followed by that many bytes.
    pub fn read_short_bytes(&mut self) -> Result<Bytes, ProtocolError> {
        let len = self.read_u8()? as usize;
        self.read_bytes(len)
    }

    /// Reads a `u16` length followed by that many bytes.
    pub fn read_long_bytes(&mut self) -> Result<Bytes, ProtocolError> {
        let len = self.read_u16()? as usize;
        self.read_bytes(len)
    }

    /// Reads a `u8`-prefixed printable ASCII string.
    pub fn read_short_str(&mut self) -> Result<String, ProtocolError> {
        let bytes = self.read_short_bytes()?;
        printable_string(&bytes)
    }

    /// Reads a fixed-width, NUL-padded string field.
    ///
    /// The text ends at the first NUL. Bytes before it must be printable.
    pub fn read_fixed_str(&mut self, width: usize) -> Result<String, ProtocolError> {
        let raw = self.read_bytes(width)?;
        let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
        printable_string(&raw[..end])
    }
}

/// Converts bytes to a `String`, refusing anything outside printable ASCII.
fn printable_string(bytes: &[u8]) -> Result<String, ProtocolError> {
    if let Some(bad) = bytes.iter().find(|b| !(0x20..=0x7e).contains(*b)) {
        return Err(ProtocolError::InvalidPayload(format!(
            "non-printable byte 0x{bad:02x} in string field"
        )));
    }
    // Printable ASCII is always valid UTF-8.
    Ok(bytes.iter().map(|b| *b as char).collect())
}

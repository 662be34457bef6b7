//! Opcodes, enumerated wire values, and typed payloads.
//!
//! Each payload type knows how to write itself into a [`Frame`] and how to
//! parse itself back out of a payload. The dispatcher only ever sees these
//! types, never raw offsets.

use std::fmt;

use bytes::Bytes;

use crate::codec::Frame;
use crate::packet::{PacketBuilder, PacketReader};
use crate::ProtocolError;

/// Width of the NUL-padded callsign field used by server-side requests.
pub const CALLSIGN_FIELD_LEN: usize = 32;

/// The only protocol version this daemon speaks.
pub const PROTOCOL_VERSION: u16 = 1;

// ---------------------------------------------------------------------------
// Opcode
// ---------------------------------------------------------------------------

/// A raw message-type tag.
///
/// This is deliberately an open newtype rather than an enum: a frame with
/// an unknown opcode must still decode, and the per-peer opcode tables in
/// the dispatcher decide whether it is acceptable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Opcode(pub u16);

impl Opcode {
    pub const HANDSHAKE: Self = Self(0x0001);

    pub const CMSG_AUTH_REQUEST: Self = Self(0x0002);
    pub const DMSG_AUTH_CHALLENGE: Self = Self(0x0003);
    pub const CMSG_AUTH_RESPONSE: Self = Self(0x0004);
    pub const DMSG_AUTH_SUCCESS: Self = Self(0x0005);
    pub const DMSG_AUTH_FAIL: Self = Self(0x0006);

    pub const CMSG_REGISTER_GET_FORM: Self = Self(0x0007);
    pub const DMSG_REGISTER_FORM: Self = Self(0x0008);
    pub const CMSG_REGISTER_REQUEST: Self = Self(0x0009);
    pub const DMSG_REGISTER_CHALLENGE: Self = Self(0x000A);
    pub const CMSG_REGISTER_RESPONSE: Self = Self(0x000B);
    pub const DMSG_REGISTER_SUCCESS: Self = Self(0x000C);
    pub const DMSG_REGISTER_FAIL: Self = Self(0x000D);

    pub const SMSG_TOKEN_VALIDATE: Self = Self(0x0010);
    pub const DMSG_TOKEN_VALIDATE: Self = Self(0x0011);
    pub const SMSG_GROUP_LIST: Self = Self(0x0012);
    pub const DMSG_GROUP_LIST: Self = Self(0x0013);
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Enumerated wire values
// ---------------------------------------------------------------------------

/// What kind of peer is on the other end of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerType {
    /// A game client authenticating or registering a player.
    Client,
    /// A game server validating tokens for its players.
    Server,
    /// Another daemon instance (same privileges as a server).
    Daemon,
}

impl TryFrom<u8> for PeerType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, ProtocolError> {
        match value {
            1 => Ok(Self::Client),
            2 => Ok(Self::Server),
            3 => Ok(Self::Daemon),
            other => Err(ProtocolError::InvalidPayload(format!(
                "unknown peer type {other}"
            ))),
        }
    }
}

impl From<PeerType> for u8 {
    fn from(value: PeerType) -> u8 {
        match value {
            PeerType::Client => 1,
            PeerType::Server => 2,
            PeerType::Daemon => 3,
        }
    }
}

impl fmt::Display for PeerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
            Self::Daemon => write!(f, "daemon"),
        }
    }
}

/// What a client wants to do, announced in its handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommType {
    /// Start authentication (same as `CMSG_AUTH_REQUEST`).
    Auth,
    /// Ask for the registration form (same as `CMSG_REGISTER_GET_FORM`).
    RegisterForm,
    /// Start registration (same as `CMSG_REGISTER_REQUEST`).
    Register,
}

impl TryFrom<u8> for CommType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, ProtocolError> {
        match value {
            1 => Ok(Self::Auth),
            2 => Ok(Self::RegisterForm),
            3 => Ok(Self::Register),
            other => Err(ProtocolError::InvalidPayload(format!(
                "unknown comm type {other}"
            ))),
        }
    }
}

impl From<CommType> for u8 {
    fn from(value: CommType) -> u8 {
        match value {
            CommType::Auth => 1,
            CommType::RegisterForm => 2,
            CommType::Register => 3,
        }
    }
}

/// Why an authentication or registration attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailReason {
    /// The cipher could not be decrypted or the plaintext was malformed.
    InvalidMessage,
    /// Wrong callsign/password combination.
    IncorrectCredentials,
    /// The callsign is already registered.
    UserExists,
    /// The email address is already registered.
    MailExists,
    /// Anything else (directory unavailable, retries exhausted, ...).
    Generic,
    /// The callsign does not satisfy the registration rules.
    InvalidCallsign,
    /// The password does not satisfy the registration rules.
    InvalidPassword,
    /// The email does not satisfy the registration rules.
    InvalidEmail,
}

impl FailReason {
    pub fn code(self) -> u32 {
        match self {
            Self::InvalidMessage => 1,
            Self::IncorrectCredentials => 2,
            Self::UserExists => 3,
            Self::MailExists => 4,
            Self::Generic => 5,
            Self::InvalidCallsign => 6,
            Self::InvalidPassword => 7,
            Self::InvalidEmail => 8,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            1 => Self::InvalidMessage,
            2 => Self::IncorrectCredentials,
            3 => Self::UserExists,
            4 => Self::MailExists,
            5 => Self::Generic,
            6 => Self::InvalidCallsign,
            7 => Self::InvalidPassword,
            8 => Self::InvalidEmail,
            _ => return None,
        })
    }
}

/// Result of validating one token for a game server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    /// The token is live and belongs to the callsign.
    Valid,
    /// The token is unknown, expired, or belongs to someone else.
    Invalid,
    /// No token was presented, but the callsign is a registered account.
    Registered,
    /// No token was presented and the callsign is free.
    Unregistered,
}

impl TokenStatus {
    pub fn code(self) -> u32 {
        match self {
            Self::Valid => 1,
            Self::Invalid => 2,
            Self::Registered => 3,
            Self::Unregistered => 4,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            1 => Self::Valid,
            2 => Self::Invalid,
            3 => Self::Registered,
            4 => Self::Unregistered,
            _ => return None,
        })
    }
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

/// Client-only handshake fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientHello {
    pub client_version: u32,
    pub comm_type: CommType,
}

/// The first frame on every connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub peer_type: PeerType,
    pub protocol_version: u16,
    /// Present iff `peer_type` is [`PeerType::Client`].
    pub client: Option<ClientHello>,
}

impl Handshake {
    pub fn decode(payload: Bytes) -> Result<Self, ProtocolError> {
        let mut r = PacketReader::new(payload);
        let peer_type = PeerType::try_from(r.read_u8()?)?;
        let protocol_version = r.read_u16()?;
        let client = match peer_type {
            PeerType::Client => {
                let client_version = r.read_u32()?;
                let comm_type = CommType::try_from(r.read_u8()?)?;
                Some(ClientHello {
                    client_version,
                    comm_type,
                })
            }
            PeerType::Server | PeerType::Daemon => None,
        };
        Ok(Self {
            peer_type,
            protocol_version,
            client,
        })
    }

    pub fn to_frame(&self) -> Result<Frame, ProtocolError> {
        let mut b = PacketBuilder::new(Opcode::HANDSHAKE);
        b.put_u8(self.peer_type.into())?;
        b.put_u16(self.protocol_version)?;
        if let Some(client) = &self.client {
            b.put_u32(client.client_version)?;
            b.put_u8(client.comm_type.into())?;
        }
        Ok(b.finish())
    }
}

// ---------------------------------------------------------------------------
// Key exchange payloads
// ---------------------------------------------------------------------------

/// An RSA public key offered to the client (`*_CHALLENGE`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub modulus: Vec<u8>,
    pub exponent: u32,
}

impl Challenge {
    pub fn decode(payload: Bytes) -> Result<Self, ProtocolError> {
        let mut r = PacketReader::new(payload);
        let modulus = r.read_long_bytes()?.to_vec();
        let exponent = r.read_u32()?;
        Ok(Self { modulus, exponent })
    }

    pub fn to_frame(&self, opcode: Opcode) -> Result<Frame, ProtocolError> {
        let mut b = PacketBuilder::new(opcode);
        b.put_long_bytes(&self.modulus)?;
        b.put_u32(self.exponent)?;
        Ok(b.finish())
    }
}

/// The client's encrypted `callsign password` blob (`CMSG_AUTH_RESPONSE`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherResponse {
    pub cipher: Bytes,
}

impl CipherResponse {
    pub fn decode(payload: Bytes) -> Result<Self, ProtocolError> {
        let mut r = PacketReader::new(payload);
        let cipher = r.read_long_bytes()?;
        Ok(Self { cipher })
    }

    pub fn to_frame(&self, opcode: Opcode) -> Result<Frame, ProtocolError> {
        let mut b = PacketBuilder::new(opcode);
        b.put_long_bytes(&self.cipher)?;
        Ok(b.finish())
    }
}

/// `CMSG_REGISTER_RESPONSE`: the cipher plus the account's email in clear.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterResponse {
    pub cipher: Bytes,
    pub email: String,
}

impl RegisterResponse {
    pub fn decode(payload: Bytes) -> Result<Self, ProtocolError> {
        let mut r = PacketReader::new(payload);
        let cipher = r.read_long_bytes()?;
        let email = r.read_short_str()?;
        Ok(Self { cipher, email })
    }

    pub fn to_frame(&self) -> Result<Frame, ProtocolError> {
        let mut b = PacketBuilder::new(Opcode::CMSG_REGISTER_RESPONSE);
        b.put_long_bytes(&self.cipher)?;
        b.put_short_bytes(self.email.as_bytes())?;
        Ok(b.finish())
    }
}

/// `DMSG_AUTH_SUCCESS` payload.
pub fn auth_success(token: u32) -> Result<Frame, ProtocolError> {
    let mut b = PacketBuilder::new(Opcode::DMSG_AUTH_SUCCESS);
    b.put_u32(token)?;
    Ok(b.finish())
}

/// A `*_FAIL` payload carrying a reason code.
pub fn failure(opcode: Opcode, reason: FailReason) -> Result<Frame, ProtocolError> {
    let mut b = PacketBuilder::new(opcode);
    b.put_u32(reason.code())?;
    Ok(b.finish())
}

/// Parses a `*_FAIL` payload. Unknown codes map to [`FailReason::Generic`].
pub fn decode_failure(payload: Bytes) -> Result<FailReason, ProtocolError> {
    let code = PacketReader::new(payload).read_u32()?;
    Ok(FailReason::from_code(code).unwrap_or(FailReason::Generic))
}

/// `DMSG_REGISTER_FORM`: the limits a registration must satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterForm {
    pub min_callsign: u8,
    pub max_callsign: u8,
    pub min_password: u8,
    pub max_password: u8,
    pub max_email: u8,
}

impl RegisterForm {
    pub fn decode(payload: Bytes) -> Result<Self, ProtocolError> {
        let mut r = PacketReader::new(payload);
        Ok(Self {
            min_callsign: r.read_u8()?,
            max_callsign: r.read_u8()?,
            min_password: r.read_u8()?,
            max_password: r.read_u8()?,
            max_email: r.read_u8()?,
        })
    }

    pub fn to_frame(&self) -> Result<Frame, ProtocolError> {
        let mut b = PacketBuilder::new(Opcode::DMSG_REGISTER_FORM);
        b.put_u8(self.min_callsign)?
            .put_u8(self.max_callsign)?
            .put_u8(self.min_password)?
            .put_u8(self.max_password)?
            .put_u8(self.max_email)?;
        Ok(b.finish())
    }
}

// ---------------------------------------------------------------------------
// Server-side payloads
// ---------------------------------------------------------------------------

/// One `{token, callsign}` pair a game server wants checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenQuery {
    pub token: u32,
    pub callsign: String,
}

/// `SMSG_TOKEN_VALIDATE`. `groups` is the optional interest list of the
/// extended variant; when non-empty, each valid entry is answered with the
/// subset of these groups the player belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenValidateRequest {
    pub queries: Vec<TokenQuery>,
    pub groups: Vec<String>,
}

impl TokenValidateRequest {
    pub fn decode(payload: Bytes) -> Result<Self, ProtocolError> {
        let mut r = PacketReader::new(payload);
        let count = r.read_u8()? as usize;
        let mut queries = Vec::with_capacity(count);
        for _ in 0..count {
            let token = r.read_u32()?;
            let callsign = r.read_fixed_str(CALLSIGN_FIELD_LEN)?;
            queries.push(TokenQuery { token, callsign });
        }
        // The basic variant ends here.
        let groups = if r.is_exhausted() {
            Vec::new()
        } else {
            read_string_list(&mut r)?
        };
        Ok(Self { queries, groups })
    }

    pub fn to_frame(&self) -> Result<Frame, ProtocolError> {
        let mut b = PacketBuilder::new(Opcode::SMSG_TOKEN_VALIDATE);
        b.put_u8(list_len(self.queries.len())?)?;
        for q in &self.queries {
            b.put_u32(q.token)?;
            b.put_fixed_str(&q.callsign, CALLSIGN_FIELD_LEN)?;
        }
        if !self.groups.is_empty() {
            put_string_list(&mut b, &self.groups)?;
        }
        Ok(b.finish())
    }
}

/// One answer in a `DMSG_TOKEN_VALIDATE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenVerdict {
    pub status: TokenStatus,
    pub groups: Vec<String>,
}

/// `DMSG_TOKEN_VALIDATE`: one verdict per query, in request order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenValidateResponse {
    pub verdicts: Vec<TokenVerdict>,
}

impl TokenValidateResponse {
    pub fn decode(payload: Bytes) -> Result<Self, ProtocolError> {
        let mut r = PacketReader::new(payload);
        let count = r.read_u8()? as usize;
        let mut verdicts = Vec::with_capacity(count);
        for _ in 0..count {
            let code = r.read_u32()?;
            let status = TokenStatus::from_code(code).ok_or_else(|| {
                ProtocolError::InvalidPayload(format!("unknown token status {code}"))
            })?;
            let groups = read_string_list(&mut r)?;
            verdicts.push(TokenVerdict { status, groups });
        }
        Ok(Self { verdicts })
    }

    pub fn to_frame(&self) -> Result<Frame, ProtocolError> {
        let mut b = PacketBuilder::new(Opcode::DMSG_TOKEN_VALIDATE);
        b.put_u8(list_len(self.verdicts.len())?)?;
        for v in &self.verdicts {
            b.put_u32(v.status.code())?;
            put_string_list(&mut b, &v.groups)?;
        }
        Ok(b.finish())
    }
}

/// `SMSG_GROUP_LIST`: which of `groups` does `callsign` belong to?
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupListRequest {
    pub callsign: String,
    pub groups: Vec<String>,
}

impl GroupListRequest {
    pub fn decode(payload: Bytes) -> Result<Self, ProtocolError> {
        let mut r = PacketReader::new(payload);
        let callsign = r.read_fixed_str(CALLSIGN_FIELD_LEN)?;
        let groups = read_string_list(&mut r)?;
        Ok(Self { callsign, groups })
    }

    pub fn to_frame(&self) -> Result<Frame, ProtocolError> {
        let mut b = PacketBuilder::new(Opcode::SMSG_GROUP_LIST);
        b.put_fixed_str(&self.callsign, CALLSIGN_FIELD_LEN)?;
        put_string_list(&mut b, &self.groups)?;
        Ok(b.finish())
    }
}

/// `DMSG_GROUP_LIST` payload.
pub fn group_list(groups: &[String]) -> Result<Frame, ProtocolError> {
    let mut b = PacketBuilder::new(Opcode::DMSG_GROUP_LIST);
    put_string_list(&mut b, groups)?;
    Ok(b.finish())
}

/// Parses a `DMSG_GROUP_LIST` payload.
pub fn decode_group_list(payload: Bytes) -> Result<Vec<String>, ProtocolError> {
    read_string_list(&mut PacketReader::new(payload))
}

fn list_len(len: usize) -> Result<u8, ProtocolError> {
    u8::try_from(len)
        .map_err(|_| ProtocolError::InvalidPayload(format!("list of {len} entries exceeds 255")))
}

fn put_string_list(b: &mut PacketBuilder, items: &[String]) -> Result<(), ProtocolError> {
    b.put_u8(list_len(items.len())?)?;
    for item in items {
        b.put_short_bytes(item.as_bytes())?;
    }
    Ok(())
}

fn read_string_list(r: &mut PacketReader) -> Result<Vec<String>, ProtocolError> {
    let count = r.read_u8()? as usize;
    (0..count).map(|_| r.read_short_str()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_client_fields_round_trip() {
        let hs = Handshake {
            peer_type: PeerType::Client,
            protocol_version: PROTOCOL_VERSION,
            client: Some(ClientHello {
                client_version: 2,
                comm_type: CommType::Register,
            }),
        };

        let frame = hs.to_frame().unwrap();

        assert_eq!(frame.opcode, Opcode::HANDSHAKE);
        assert_eq!(&frame.payload[..], &[1, 0, 1, 0, 0, 0, 2, 3]);
        assert_eq!(Handshake::decode(frame.payload).unwrap(), hs);
    }

    #[test]
    fn test_handshake_server_has_no_client_fields() {
        let decoded = Handshake::decode(Bytes::from_static(&[2, 0, 1])).unwrap();

        assert_eq!(decoded.peer_type, PeerType::Server);
        assert!(decoded.client.is_none());
    }

    #[test]
    fn test_handshake_client_missing_comm_type_is_truncated() {
        let result = Handshake::decode(Bytes::from_static(&[1, 0, 1, 0, 0, 0, 2]));
        assert!(matches!(result, Err(ProtocolError::Truncated { .. })));
    }

    #[test]
    fn test_handshake_unknown_peer_type_is_invalid() {
        let result = Handshake::decode(Bytes::from_static(&[9, 0, 1]));
        assert!(matches!(result, Err(ProtocolError::InvalidPayload(_))));
    }

    #[test]
    fn test_challenge_layout_matches_wire_format() {
        let challenge = Challenge {
            modulus: vec![0xAA, 0xBB],
            exponent: 65537,
        };

        let frame = challenge.to_frame(Opcode::DMSG_AUTH_CHALLENGE).unwrap();

        assert_eq!(
            &frame.payload[..],
            &[0x00, 0x02, 0xAA, 0xBB, 0x00, 0x01, 0x00, 0x01]
        );
    }

    #[test]
    fn test_token_validate_basic_variant_has_no_groups() {
        let req = TokenValidateRequest {
            queries: vec![TokenQuery {
                token: 7,
                callsign: "Alice".into(),
            }],
            groups: vec![],
        };

        let frame = req.to_frame().unwrap();

        assert_eq!(frame.payload.len(), 1 + 4 + CALLSIGN_FIELD_LEN);
        let decoded = TokenValidateRequest::decode(frame.payload).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn test_token_validate_extended_variant_carries_groups() {
        let req = TokenValidateRequest {
            queries: vec![
                TokenQuery {
                    token: 1,
                    callsign: "Alice".into(),
                },
                TokenQuery {
                    token: 0,
                    callsign: "Bob".into(),
                },
            ],
            groups: vec!["ADMIN".into(), "COP".into()],
        };

        let decoded = TokenValidateRequest::decode(req.to_frame().unwrap().payload).unwrap();

        assert_eq!(decoded.groups, vec!["ADMIN".to_string(), "COP".to_string()]);
        assert_eq!(decoded.queries[1].callsign, "Bob");
    }

    #[test]
    fn test_fail_reason_unknown_code_decodes_as_generic() {
        let reason = decode_failure(Bytes::from_static(&[0, 0, 0, 99])).unwrap();
        assert_eq!(reason, FailReason::Generic);
    }

    #[test]
    fn test_register_response_rejects_non_printable_email() {
        let mut b = PacketBuilder::new(Opcode::CMSG_REGISTER_RESPONSE);
        b.put_long_bytes(b"cipher").unwrap();
        b.put_short_bytes(b"a\nb@example.com").unwrap();

        let result = RegisterResponse::decode(b.finish().payload);

        assert!(matches!(result, Err(ProtocolError::InvalidPayload(_))));
    }
}

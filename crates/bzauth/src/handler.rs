//! Per-connection dispatcher: handshake, per-peer opcode tables, replies.
//!
//! Each accepted connection gets its own Tokio task running
//! [`serve_connection`]. The flow is:
//!   1. Buffer bytes until the codec yields a complete frame.
//!   2. The first frame must be a handshake. It fixes the peer kind for
//!      the rest of the connection.
//!   3. Every later frame is looked up in that peer kind's opcode table.
//!      A miss, or a payload that does not parse, drops the connection.
//!   4. Everything else (bad ciphertext, wrong password, taken callsign)
//!      is answered with a `*_FAIL` frame and the connection stays open.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use bzauth_directory::{Directory, RegisterError};
use bzauth_protocol::{
    CipherResponse, CommType, FailReason, Frame, FrameCodec, GroupListRequest, Handshake,
    Opcode, PROTOCOL_VERSION, PeerType, ProtocolError, RegisterForm, RegisterResponse,
    TokenQuery, TokenStatus, TokenValidateRequest, TokenValidateResponse, TokenVerdict,
    auth_success, failure, group_list,
};
use bzauth_session::{
    Auth, Credentials, ExchangeKind, KeyExchange, KeyExchangeCipher, RESERVED_TOKEN, Register,
    ResponseOutcome,
};
use bzauth_transport::{Connection, ConnectionId, READ_CHUNK_LEN};
use tokio::time::Instant;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, info, trace, warn};

use crate::server::ServerState;
use crate::{AuthdError, DispatchError};

// ---------------------------------------------------------------------------
// Opcode tables
// ---------------------------------------------------------------------------

/// Opcodes a client peer may send after its handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientOpcode {
    AuthRequest,
    AuthResponse,
    RegisterGetForm,
    RegisterRequest,
    RegisterResponse,
}

impl TryFrom<Opcode> for ClientOpcode {
    type Error = Opcode;

    fn try_from(opcode: Opcode) -> Result<Self, Opcode> {
        match opcode {
            Opcode::CMSG_AUTH_REQUEST => Ok(Self::AuthRequest),
            Opcode::CMSG_AUTH_RESPONSE => Ok(Self::AuthResponse),
            Opcode::CMSG_REGISTER_GET_FORM => Ok(Self::RegisterGetForm),
            Opcode::CMSG_REGISTER_REQUEST => Ok(Self::RegisterRequest),
            Opcode::CMSG_REGISTER_RESPONSE => Ok(Self::RegisterResponse),
            other => Err(other),
        }
    }
}

/// The handshake's comm type stands in for the first request.
impl From<CommType> for ClientOpcode {
    fn from(comm: CommType) -> Self {
        match comm {
            CommType::Auth => Self::AuthRequest,
            CommType::RegisterForm => Self::RegisterGetForm,
            CommType::Register => Self::RegisterRequest,
        }
    }
}

/// Opcodes a game server or peer daemon may send after its handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerOpcode {
    TokenValidate,
    GroupList,
}

impl TryFrom<Opcode> for ServerOpcode {
    type Error = Opcode;

    fn try_from(opcode: Opcode) -> Result<Self, Opcode> {
        match opcode {
            Opcode::SMSG_TOKEN_VALIDATE => Ok(Self::TokenValidate),
            Opcode::SMSG_GROUP_LIST => Ok(Self::GroupList),
            other => Err(other),
        }
    }
}

// ---------------------------------------------------------------------------
// Peer state
// ---------------------------------------------------------------------------

/// Exchange state owned by a client connection.
#[derive(Debug, Default)]
struct ClientSession {
    auth: KeyExchange<Auth>,
    register: KeyExchange<Register>,
}

#[derive(Debug)]
enum Peer {
    Client(ClientSession),
    /// A game server or another daemon.
    Server(PeerType),
}

/// Dispatcher state for one connection.
///
/// Holds no socket: [`handle_frame`](Self::handle_frame) takes a decoded
/// frame and returns the reply, if any.
pub struct PeerConnection<D, C> {
    conn_id: ConnectionId,
    state: Arc<ServerState<D, C>>,
    peer: Option<Peer>,
}

impl<D: Directory, C: KeyExchangeCipher> PeerConnection<D, C> {
    pub(crate) fn new(conn_id: ConnectionId, state: Arc<ServerState<D, C>>) -> Self {
        Self {
            conn_id,
            state,
            peer: None,
        }
    }

    /// `true` once the handshake has succeeded.
    pub fn is_active(&self) -> bool {
        self.peer.is_some()
    }

    /// The peer kind fixed by the handshake.
    pub fn peer_type(&self) -> Option<PeerType> {
        match &self.peer {
            None => None,
            Some(Peer::Client(_)) => Some(PeerType::Client),
            Some(Peer::Server(kind)) => Some(*kind),
        }
    }

    /// Handles one frame.
    ///
    /// `Err` means the peer must be disconnected without a reply.
    pub async fn handle_frame(&mut self, frame: Frame) -> Result<Option<Frame>, DispatchError> {
        match self.peer.as_mut() {
            None => self.handshake(frame).await,
            Some(Peer::Client(session)) => {
                let op = ClientOpcode::try_from(frame.opcode).map_err(|opcode| {
                    DispatchError::NotPermitted {
                        opcode,
                        peer: PeerType::Client,
                    }
                })?;
                client_frame(&self.state, self.conn_id, session, op, frame.payload).await
            }
            Some(Peer::Server(kind)) => {
                let peer = *kind;
                let op = ServerOpcode::try_from(frame.opcode)
                    .map_err(|opcode| DispatchError::NotPermitted { opcode, peer })?;
                server_frame(&self.state, op, frame.payload).await.map(Some)
            }
        }
    }

    async fn handshake(&mut self, frame: Frame) -> Result<Option<Frame>, DispatchError> {
        if frame.opcode != Opcode::HANDSHAKE {
            return Err(DispatchError::HandshakeRequired(frame.opcode));
        }
        let hello = Handshake::decode(frame.payload)?;
        if hello.protocol_version != PROTOCOL_VERSION {
            return Err(DispatchError::UnsupportedVersion(hello.protocol_version));
        }

        let conn_id = self.conn_id;
        match hello.client {
            Some(client) => {
                info!(
                    %conn_id,
                    client_version = client.client_version,
                    comm = ?client.comm_type,
                    "client handshake"
                );
                let mut session = ClientSession::default();
                let reply = client_frame(
                    &self.state,
                    conn_id,
                    &mut session,
                    client.comm_type.into(),
                    Bytes::new(),
                )
                .await?;
                self.peer = Some(Peer::Client(session));
                Ok(reply)
            }
            None => {
                info!(%conn_id, peer = %hello.peer_type, "server handshake");
                self.peer = Some(Peer::Server(hello.peer_type));
                Ok(None)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Client table
// ---------------------------------------------------------------------------

async fn client_frame<D, C>(
    state: &ServerState<D, C>,
    conn_id: ConnectionId,
    session: &mut ClientSession,
    op: ClientOpcode,
    payload: Bytes,
) -> Result<Option<Frame>, DispatchError>
where
    D: Directory,
    C: KeyExchangeCipher,
{
    let reply = match op {
        ClientOpcode::AuthRequest => challenge(&mut session.auth, &state.cipher)?,
        ClientOpcode::RegisterRequest => challenge(&mut session.register, &state.cipher)?,
        ClientOpcode::RegisterGetForm => Some(register_form(state)?),
        ClientOpcode::AuthResponse => {
            let response = CipherResponse::decode(payload)?;
            match accept_response(state, conn_id, &mut session.auth, &response.cipher)? {
                Ok(creds) => Some(authenticate(state, conn_id, creds).await?),
                Err(reply) => reply,
            }
        }
        ClientOpcode::RegisterResponse => {
            let response = RegisterResponse::decode(payload)?;
            match accept_response(state, conn_id, &mut session.register, &response.cipher)? {
                Ok(creds) => Some(register(state, conn_id, creds, &response.email).await?),
                Err(reply) => reply,
            }
        }
    };
    Ok(reply)
}

/// `None` if a challenge of this kind is already outstanding.
fn challenge<K, C>(
    exchange: &mut KeyExchange<K>,
    cipher: &C,
) -> Result<Option<Frame>, ProtocolError>
where
    K: ExchangeKind,
    C: KeyExchangeCipher,
{
    exchange
        .request(cipher)
        .map(|challenge| challenge.to_frame(K::CHALLENGE))
        .transpose()
}

fn register_form<D, C>(state: &ServerState<D, C>) -> Result<Frame, ProtocolError> {
    let narrow = |n: usize| u8::try_from(n).unwrap_or(u8::MAX);
    let limits = &state.limits;
    RegisterForm {
        min_callsign: narrow(limits.min_callsign),
        max_callsign: narrow(limits.max_callsign),
        min_password: narrow(limits.min_password),
        max_password: narrow(limits.max_password),
        max_email: narrow(limits.max_email),
    }
    .to_frame()
}

/// Runs the exchange. `Ok(creds)` to continue, `Err(reply)` when the
/// response ends here (stray, or answered with `*_FAIL`).
fn accept_response<K, D, C>(
    state: &ServerState<D, C>,
    conn_id: ConnectionId,
    exchange: &mut KeyExchange<K>,
    cipher: &[u8],
) -> Result<Result<Credentials, Option<Frame>>, ProtocolError>
where
    K: ExchangeKind,
    C: KeyExchangeCipher,
{
    match exchange.respond(&state.cipher, cipher, &state.limits) {
        ResponseOutcome::Accepted(creds) => Ok(Ok(creds)),
        ResponseOutcome::Stray => {
            debug!(%conn_id, kind = K::NAME, "ignoring response without challenge");
            Ok(Err(None))
        }
        ResponseOutcome::Rejected(e) => {
            debug!(%conn_id, kind = K::NAME, error = %e, "response rejected");
            Ok(Err(Some(failure(K::FAIL, FailReason::InvalidMessage)?)))
        }
    }
}

async fn authenticate<D, C>(
    state: &ServerState<D, C>,
    conn_id: ConnectionId,
    creds: Credentials,
) -> Result<Frame, ProtocolError>
where
    D: Directory,
{
    let callsign = creds.callsign.as_str();
    let reason = match state.store.authenticate(callsign, &creds.password).await {
        Ok(Some(uid)) => {
            let issued = state.tokens.lock().await.issue(callsign);
            match issued {
                Ok(token) => {
                    info!(%conn_id, %callsign, uid, token, "authenticated");
                    return auth_success(token);
                }
                Err(e) => {
                    warn!(%conn_id, %callsign, error = %e, "could not issue token");
                    FailReason::Generic
                }
            }
        }
        Ok(None) => {
            info!(%conn_id, %callsign, "authentication refused");
            FailReason::IncorrectCredentials
        }
        Err(e) => {
            warn!(%conn_id, %callsign, error = %e, "directory error during authentication");
            FailReason::Generic
        }
    };
    failure(Opcode::DMSG_AUTH_FAIL, reason)
}

async fn register<D, C>(
    state: &ServerState<D, C>,
    conn_id: ConnectionId,
    creds: Credentials,
    email: &str,
) -> Result<Frame, ProtocolError>
where
    D: Directory,
{
    let callsign = creds.callsign.as_str();
    match try_register(state, &creds, email).await {
        Ok(uid) => {
            info!(%conn_id, %callsign, uid, "registration complete");
            Ok(Frame::empty(Opcode::DMSG_REGISTER_SUCCESS))
        }
        Err(e) => {
            let reason = register_fail_reason(&e);
            if reason == FailReason::Generic {
                warn!(%conn_id, %callsign, error = %e, "registration failed");
            } else {
                info!(%conn_id, %callsign, error = %e, "registration refused");
            }
            failure(Opcode::DMSG_REGISTER_FAIL, reason)
        }
    }
}

async fn try_register<D, C>(
    state: &ServerState<D, C>,
    creds: &Credentials,
    email: &str,
) -> Result<u32, RegisterError>
where
    D: Directory,
{
    if email.is_empty() || email.len() > state.limits.max_email {
        return Err(RegisterError::InvalidEmail);
    }
    let digest = state.store.hash_password(&creds.password)?;
    state
        .store
        .register_user(&creds.callsign, &digest, email)
        .await
}

fn register_fail_reason(e: &RegisterError) -> FailReason {
    match e {
        RegisterError::InvalidCallsign => FailReason::InvalidCallsign,
        RegisterError::InvalidPassword => FailReason::InvalidPassword,
        RegisterError::InvalidEmail => FailReason::InvalidEmail,
        RegisterError::UserExists => FailReason::UserExists,
        RegisterError::MailExists => FailReason::MailExists,
        RegisterError::UidAllocation { .. } | RegisterError::Directory(_) => FailReason::Generic,
    }
}

// ---------------------------------------------------------------------------
// Server table
// ---------------------------------------------------------------------------

async fn server_frame<D, C>(
    state: &ServerState<D, C>,
    op: ServerOpcode,
    payload: Bytes,
) -> Result<Frame, DispatchError>
where
    D: Directory,
{
    let reply = match op {
        ServerOpcode::TokenValidate => {
            let request = TokenValidateRequest::decode(payload)?;
            let mut verdicts = Vec::with_capacity(request.queries.len());
            for query in &request.queries {
                verdicts.push(verdict(state, query, &request.groups).await);
            }
            TokenValidateResponse { verdicts }.to_frame()?
        }
        ServerOpcode::GroupList => {
            let request = GroupListRequest::decode(payload)?;
            let groups = member_groups(state, &request.callsign, &request.groups).await;
            group_list(&groups)?
        }
    };
    Ok(reply)
}

async fn verdict<D, C>(
    state: &ServerState<D, C>,
    query: &TokenQuery,
    groups: &[String],
) -> TokenVerdict
where
    D: Directory,
{
    let callsign = query.callsign.as_str();
    let status = if query.token == RESERVED_TOKEN {
        match state.store.is_registered(callsign).await {
            Ok(true) => TokenStatus::Registered,
            Ok(false) => TokenStatus::Unregistered,
            Err(e) => {
                warn!(%callsign, error = %e, "registration lookup failed");
                TokenStatus::Invalid
            }
        }
    } else if state.tokens.lock().await.validate(callsign, query.token) {
        TokenStatus::Valid
    } else {
        TokenStatus::Invalid
    };
    debug!(%callsign, token = query.token, ?status, "token checked");

    let groups = match status {
        TokenStatus::Valid => member_groups(state, callsign, groups).await,
        _ => Vec::new(),
    };
    TokenVerdict { status, groups }
}

/// Directory trouble degrades to "member of nothing".
async fn member_groups<D, C>(
    state: &ServerState<D, C>,
    callsign: &str,
    groups: &[String],
) -> Vec<String>
where
    D: Directory,
{
    state
        .store
        .intersect_groups(callsign, groups)
        .await
        .unwrap_or_else(|e| {
            warn!(%callsign, error = %e, "group lookup failed");
            Vec::new()
        })
}

// ---------------------------------------------------------------------------
// Connection loop
// ---------------------------------------------------------------------------

/// Handles a single connection from accept to close.
pub(crate) async fn serve_connection<T, D, C>(
    conn: T,
    state: Arc<ServerState<D, C>>,
) -> Result<(), AuthdError>
where
    T: Connection,
    D: Directory,
    C: KeyExchangeCipher,
{
    let conn_id = conn.id();
    debug!(%conn_id, peer = %conn.peer_addr(), "handling new connection");

    let result = pump(&conn, state).await;

    if let Err(e) = conn.close().await {
        trace!(%conn_id, error = %e, "close failed");
    }
    result
}

async fn pump<T, D, C>(conn: &T, state: Arc<ServerState<D, C>>) -> Result<(), AuthdError>
where
    T: Connection,
    D: Directory,
    C: KeyExchangeCipher,
{
    let conn_id = conn.id();
    // One deadline for the whole handshake, however the bytes trickle in.
    let handshake_deadline = Instant::now() + state.network.handshake_timeout();
    let idle_timeout = state.network.idle_timeout();
    let mut codec = FrameCodec::new(state.network.max_frame_payload);
    let mut peer = PeerConnection::new(conn_id, state);
    let mut inbox = BytesMut::with_capacity(READ_CHUNK_LEN);
    let mut outbox = BytesMut::new();

    loop {
        while let Some(frame) = codec.decode(&mut inbox)? {
            trace!(%conn_id, opcode = %frame.opcode, len = frame.payload.len(), "frame received");
            let reply = peer.handle_frame(frame).await.inspect_err(|e| {
                let peer_type = peer.peer_type().map(|p| p.to_string());
                info!(%conn_id, peer = ?peer_type, error = %e, "dropping peer");
            })?;
            if let Some(reply) = reply {
                codec.encode(reply, &mut outbox)?;
                conn.send(&outbox).await?;
                outbox.clear();
            }
        }

        let deadline = if peer.is_active() {
            Instant::now() + idle_timeout
        } else {
            handshake_deadline
        };
        match tokio::time::timeout_at(deadline, conn.recv()).await {
            Ok(Ok(Some(data))) => inbox.extend_from_slice(&data),
            Ok(Ok(None)) => {
                debug!(%conn_id, "connection closed by peer");
                return Ok(());
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                info!(%conn_id, active = peer.is_active(), "connection timed out");
                return Ok(());
            }
        }
    }
}

//! The per-connection challenge/response state machine.
//!
//! A client connection owns two independent exchanges, one for
//! authentication and one for registration. Both behave the same way:
//!
//! ```text
//!            request()                     respond()
//!   [Idle] ───────────► [Pending] ──────────────────────► [Idle]
//!     │                   │  ▲                          (marker consumed,
//!     │ respond()         │  │ request() again           whatever the outcome)
//!     ▼                   └──┘ (no-op, no new challenge)
//!   Stray
//! ```
//!
//! The pending marker is an `Option<Box<_>>` owned by the connection, so
//! dropping the connection drops any half-finished exchange with it.

use std::marker::PhantomData;
use std::time::Instant;

use bzauth_protocol::{Challenge, Opcode};
use tracing::debug;

use crate::{CredentialLimits, Credentials, ExchangeError, KeyExchangeCipher};

/// Compile-time tag for which exchange a [`KeyExchange`] runs.
pub trait ExchangeKind {
    /// Used in logs.
    const NAME: &'static str;
    /// Opcode of the challenge frame this exchange sends.
    const CHALLENGE: Opcode;
    /// Opcode of the failure frame this exchange sends.
    const FAIL: Opcode;
}

/// Authentication exchange.
#[derive(Debug)]
pub struct Auth;

/// Registration exchange.
#[derive(Debug)]
pub struct Register;

impl ExchangeKind for Auth {
    const NAME: &'static str = "auth";
    const CHALLENGE: Opcode = Opcode::DMSG_AUTH_CHALLENGE;
    const FAIL: Opcode = Opcode::DMSG_AUTH_FAIL;
}

impl ExchangeKind for Register {
    const NAME: &'static str = "register";
    const CHALLENGE: Opcode = Opcode::DMSG_REGISTER_CHALLENGE;
    const FAIL: Opcode = Opcode::DMSG_REGISTER_FAIL;
}

#[derive(Debug)]
struct Pending {
    since: Instant,
}

/// What happened to a `*_RESPONSE`.
#[derive(Debug, PartialEq, Eq)]
pub enum ResponseOutcome {
    /// No challenge was outstanding. Log and carry on.
    Stray,
    /// The response was consumed but is unusable. Reply `*_FAIL`.
    Rejected(ExchangeError),
    /// The response decrypted to well-formed credentials.
    Accepted(Credentials),
}

/// One challenge/response exchange of kind `K`.
#[derive(Debug)]
pub struct KeyExchange<K> {
    pending: Option<Box<Pending>>,
    _kind: PhantomData<K>,
}

impl<K> Default for KeyExchange<K> {
    fn default() -> Self {
        Self {
            pending: None,
            _kind: PhantomData,
        }
    }
}

impl<K: ExchangeKind> KeyExchange<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` while a challenge is outstanding.
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Starts the exchange.
    ///
    /// Returns the challenge to send, or `None` if one is already
    /// outstanding (the request is a no-op in that case).
    pub fn request<C>(&mut self, cipher: &C) -> Option<Challenge>
    where
        C: KeyExchangeCipher + ?Sized,
    {
        if let Some(pending) = &self.pending {
            debug!(
                kind = K::NAME,
                age_ms = pending.since.elapsed().as_millis() as u64,
                "challenge already pending, ignoring request"
            );
            return None;
        }
        self.pending = Some(Box::new(Pending {
            since: Instant::now(),
        }));
        Some(Challenge {
            modulus: cipher.modulus(),
            exponent: cipher.exponent(),
        })
    }

    /// Handles the client's encrypted answer.
    pub fn respond<C>(
        &mut self,
        cipher: &C,
        ciphertext: &[u8],
        limits: &CredentialLimits,
    ) -> ResponseOutcome
    where
        C: KeyExchangeCipher + ?Sized,
    {
        if self.pending.take().is_none() {
            debug!(kind = K::NAME, "response without a pending challenge");
            return ResponseOutcome::Stray;
        }

        let Some(plaintext) = cipher.decrypt(ciphertext) else {
            return ResponseOutcome::Rejected(ExchangeError::Undecryptable);
        };
        match Credentials::parse(&plaintext, limits) {
            Ok(creds) => ResponseOutcome::Accepted(creds),
            Err(e) => ResponseOutcome::Rejected(e.into()),
        }
    }

    /// Drops any outstanding challenge.
    pub fn reset(&mut self) {
        self.pending = None;
    }
}

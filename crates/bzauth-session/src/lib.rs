//! Session machinery for bzauthd.
//!
//! Everything that happens between "a client connected" and "a game server
//! trusts that client" lives here:
//!
//! 1. **Key exchange** ([`KeyExchange`]): hand the client a public key,
//!    decrypt what comes back ([`KeyExchangeCipher`], [`RsaKeyExchange`]).
//! 2. **Credentials** ([`Credentials`]): split the plaintext into exactly
//!    one callsign and one password.
//! 3. **Tokens** ([`TokenManager`]): issue a short-lived id after a good
//!    login, answer "is this id still good for this callsign?" later.
//!
//! # How it fits in the stack
//!
//! ```text
//! Dispatcher (above)  ← owns one KeyExchange per kind per client connection
//!     ↕
//! Session Layer (this crate)
//!     ↕
//! Protocol (below) + Tick (event scheduler for token expiry)
//! ```

mod cipher;
mod credentials;
mod error;
mod exchange;
mod token;

pub use cipher::{DEFAULT_RSA_BITS, KeyExchangeCipher, RsaKeyExchange};
pub use credentials::{CredentialLimits, Credentials};
pub use error::{CredentialError, ExchangeError, SessionError};
pub use exchange::{Auth, ExchangeKind, KeyExchange, Register, ResponseOutcome};
pub use token::{DEFAULT_TOKEN_LIFETIME, RESERVED_TOKEN, TokenManager};

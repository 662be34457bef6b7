//! # bzauth
//!
//! Authentication daemon for BZFlag callsigns.
//!
//! Players register a callsign and log in through the daemon, which hands
//! back a short-lived token. Game servers then ask the daemon whether a
//! `{token, callsign}` pair is good and which groups the player is in.
//!
//! The pieces live in their own crates and are wired together here:
//!
//! ```text
//! bzauth-transport   TCP accept / send / recv
//!        │
//! bzauth-protocol    frames and payloads
//!        │
//! handler            handshake, per-peer opcode tables
//!        │
//!   ┌────┴─────────────┐
//! bzauth-session     bzauth-directory
//! key exchange,      users, groups,
//! tokens             atomic registration
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bzauth::prelude::*;
//!
//! # async fn start() -> Result<(), AuthdError> {
//! let server = AuthServerBuilder::new()
//!     .bind("127.0.0.1:5156")
//!     .build_with_defaults()
//!     .await?;
//! server.run().await
//! # }
//! ```

pub mod config;
mod error;
mod handler;
mod server;

pub use config::{AuthdConfig, ConfigError};
pub use error::{AuthdError, DispatchError};
pub use handler::{ClientOpcode, ServerOpcode};
pub use server::{AuthServer, AuthServerBuilder};

pub mod prelude {
    pub use crate::config::AuthdConfig;
    pub use crate::{AuthServer, AuthServerBuilder, AuthdError};
    pub use bzauth_directory::{Directory, InMemoryDirectory, UserStore};
    pub use bzauth_session::{KeyExchangeCipher, RsaKeyExchange};
}

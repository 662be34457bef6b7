//! Stored password digests.
//!
//! The directory stores `userPassword` as `{SHA256}` followed by the base64
//! SHA-256 of the password. During registration the entry is first written
//! with an *invalidated* digest, the real one plus [`PENDING_SUFFIX`]. That
//! string is not valid base64, so it never parses and never verifies.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};

/// Scheme prefix of every stored digest.
pub const SCHEME: &str = "{SHA256}";

/// Marker appended to a digest while its registration is unfinished.
pub const PENDING_SUFFIX: &str = "#pending";

/// A well-formed, stored password digest.
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordDigest(String);

impl PasswordDigest {
    /// Hashes `password`.
    pub fn hash(password: &str) -> Self {
        let digest = Sha256::digest(password.as_bytes());
        Self(format!("{SCHEME}{}", STANDARD.encode(digest)))
    }

    /// Accepts `stored` only if it is a complete `{SHA256}` digest.
    pub fn parse(stored: &str) -> Option<Self> {
        let encoded = stored.strip_prefix(SCHEME)?;
        let raw = STANDARD.decode(encoded).ok()?;
        (raw.len() == 32).then(|| Self(stored.to_owned()))
    }

    /// The stored form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The inert value written during phase one of a registration.
    pub fn invalidated(&self) -> String {
        format!("{}{PENDING_SUFFIX}", self.0)
    }

    /// `true` if `password` hashes to this digest.
    pub fn verify(&self, password: &str) -> bool {
        Self::hash(password) == *self
    }
}

impl fmt::Debug for PasswordDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PasswordDigest(<redacted>)")
    }
}

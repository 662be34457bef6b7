//! Error types for the session layer.

/// Errors raised while setting up or running session machinery.
///
/// None of these are caused by a misbehaving peer. Peer mistakes surface as
/// [`ExchangeError`] and turn into a `*_FAIL` reply.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The RSA key pair could not be generated at startup.
    #[error("key generation failed: {0}")]
    KeyGeneration(#[from] rsa::Error),

    /// The public exponent does not fit the `u32` wire field.
    #[error("public exponent does not fit in 32 bits")]
    ExponentTooLarge,

    /// Every `u32` token id is live. Not reachable in practice, but the
    /// id allocator refuses to loop forever.
    #[error("token id space exhausted ({live} live tokens)")]
    TokenSpaceExhausted { live: usize },
}

/// Why a client's `callsign SP password` plaintext was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    #[error("missing callsign/password separator")]
    MissingSeparator,

    #[error("more than one separator")]
    ExtraSeparator,

    #[error("non-printable byte 0x{0:02x}")]
    NonPrintable(u8),

    #[error("callsign length {len} outside {min}..={max}")]
    CallsignLength { len: usize, min: usize, max: usize },

    #[error("password length {len} outside {min}..={max}")]
    PasswordLength { len: usize, min: usize, max: usize },
}

/// Why a `*_RESPONSE` could not be turned into credentials.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExchangeError {
    /// The cipher capability could not decrypt the blob.
    #[error("cipher could not be decrypted")]
    Undecryptable,

    /// Decryption worked but the plaintext is not valid credentials.
    #[error("malformed credentials: {0}")]
    Malformed(#[from] CredentialError),
}

//! The asymmetric-cipher capability used to protect passwords in transit.
//!
//! The key-exchange state machine only needs three things from a cipher:
//! the public modulus, the public exponent, and a decrypt that either
//! returns plaintext or says "no". [`KeyExchangeCipher`] is exactly that
//! surface, so tests can plug in a trivial cipher and the daemon can use
//! [`RsaKeyExchange`].

use rsa::rand_core::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use tracing::info;

use crate::SessionError;

/// Default RSA modulus size in bits.
pub const DEFAULT_RSA_BITS: usize = 1024;

/// Public-key material plus a way to decrypt what clients send back.
///
/// # Trait bounds
///
/// `Send + Sync + 'static` because one cipher is shared by every
/// connection task for the lifetime of the daemon.
pub trait KeyExchangeCipher: Send + Sync + 'static {
    /// Big-endian modulus bytes, as sent in a `*_CHALLENGE`.
    fn modulus(&self) -> Vec<u8>;

    /// Public exponent, as sent in a `*_CHALLENGE`.
    fn exponent(&self) -> u32;

    /// Decrypts a client blob. `None` means the blob is not valid for this
    /// key (wrong size, bad padding, ...).
    fn decrypt(&self, cipher: &[u8]) -> Option<Vec<u8>>;
}

/// RSA with PKCS#1 v1.5 padding, keyed once at startup.
pub struct RsaKeyExchange {
    private: RsaPrivateKey,
    modulus: Vec<u8>,
    exponent: u32,
}

impl RsaKeyExchange {
    /// Generates a fresh key pair of `bits` bits.
    ///
    /// This is slow (hundreds of milliseconds for 1024 bits in debug
    /// builds), so it runs once before the listener starts.
    pub fn generate(bits: usize) -> Result<Self, SessionError> {
        let private = RsaPrivateKey::new(&mut OsRng, bits)?;
        let key = Self::from_private_key(private)?;
        info!(bits, "generated RSA key pair");
        Ok(key)
    }

    /// Wraps an existing private key.
    pub fn from_private_key(private: RsaPrivateKey) -> Result<Self, SessionError> {
        let public = RsaPublicKey::from(&private);
        let exponent_bytes = public.e().to_bytes_be();
        if exponent_bytes.len() > 4 {
            return Err(SessionError::ExponentTooLarge);
        }
        let exponent = exponent_bytes
            .iter()
            .fold(0u32, |acc, b| (acc << 8) | u32::from(*b));

        Ok(Self {
            modulus: public.n().to_bytes_be(),
            exponent,
            private,
        })
    }

    /// The public half, for clients (and tests) that need to encrypt.
    pub fn public_key(&self) -> RsaPublicKey {
        RsaPublicKey::from(&self.private)
    }
}

impl KeyExchangeCipher for RsaKeyExchange {
    fn modulus(&self) -> Vec<u8> {
        self.modulus.clone()
    }

    fn exponent(&self) -> u32 {
        self.exponent
    }

    fn decrypt(&self, cipher: &[u8]) -> Option<Vec<u8>> {
        self.private.decrypt(Pkcs1v15Encrypt, cipher).ok()
    }
}

impl std::fmt::Debug for RsaKeyExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RsaKeyExchange")
            .field("modulus_bits", &(self.modulus.len() * 8))
            .field("exponent", &self.exponent)
            .finish_non_exhaustive()
    }
}

//! Parsing of the decrypted `callsign SP password` plaintext.

use std::fmt;
use std::ops::RangeInclusive;

use crate::CredentialError;

const SEPARATOR: u8 = b' ';

/// Length bounds a plaintext must satisfy. Advertised to clients in
/// `DMSG_REGISTER_FORM`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialLimits {
    pub min_callsign: usize,
    pub max_callsign: usize,
    pub min_password: usize,
    pub max_password: usize,
    pub max_email: usize,
}

impl Default for CredentialLimits {
    fn default() -> Self {
        Self {
            min_callsign: 2,
            max_callsign: 31,
            min_password: 4,
            max_password: 31,
            max_email: 254,
        }
    }
}

impl CredentialLimits {
    fn callsign_range(&self) -> RangeInclusive<usize> {
        self.min_callsign..=self.max_callsign
    }

    fn password_range(&self) -> RangeInclusive<usize> {
        self.min_password..=self.max_password
    }
}

/// A callsign and a plaintext password.
///
/// `Debug` never prints the password.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub callsign: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("callsign", &self.callsign)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Splits `plaintext` into callsign and password.
    ///
    /// Exactly one `0x20` byte separates the two halves; every other byte
    /// must be printable (`0x21..=0x7E`). Spaces inside callsigns or
    /// passwords are therefore impossible by construction.
    pub fn parse(plaintext: &[u8], limits: &CredentialLimits) -> Result<Self, CredentialError> {
        let mut split = None;
        for (i, &b) in plaintext.iter().enumerate() {
            if b == SEPARATOR {
                if split.is_some() {
                    return Err(CredentialError::ExtraSeparator);
                }
                split = Some(i);
            } else if !(0x21..=0x7e).contains(&b) {
                return Err(CredentialError::NonPrintable(b));
            }
        }
        let at = split.ok_or(CredentialError::MissingSeparator)?;
        let (callsign, password) = (&plaintext[..at], &plaintext[at + 1..]);

        if !limits.callsign_range().contains(&callsign.len()) {
            return Err(CredentialError::CallsignLength {
                len: callsign.len(),
                min: limits.min_callsign,
                max: limits.max_callsign,
            });
        }
        if !limits.password_range().contains(&password.len()) {
            return Err(CredentialError::PasswordLength {
                len: password.len(),
                min: limits.min_password,
                max: limits.max_password,
            });
        }

        // Every byte was checked to be ASCII above.
        Ok(Self {
            callsign: ascii(callsign),
            password: ascii(password),
        })
    }
}

fn ascii(bytes: &[u8]) -> String {
    bytes.iter().map(|b| *b as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> CredentialLimits {
        CredentialLimits {
            min_callsign: 2,
            min_password: 2,
            ..CredentialLimits::default()
        }
    }

    #[test]
    fn test_parse_single_space_splits() {
        let creds = Credentials::parse(b"ab cd", &limits()).unwrap();
        assert_eq!(creds.callsign, "ab");
        assert_eq!(creds.password, "cd");
    }

    #[test]
    fn test_parse_two_spaces_rejected() {
        assert_eq!(
            Credentials::parse(b"ab cd ef", &limits()),
            Err(CredentialError::ExtraSeparator)
        );
    }

    #[test]
    fn test_parse_no_space_rejected() {
        assert_eq!(
            Credentials::parse(b"abcd", &limits()),
            Err(CredentialError::MissingSeparator)
        );
    }

    #[test]
    fn test_parse_control_byte_rejected() {
        assert_eq!(
            Credentials::parse(b"ab c\td", &limits()),
            Err(CredentialError::NonPrintable(b'\t'))
        );
    }

    #[test]
    fn test_parse_callsign_too_short_rejected() {
        assert!(matches!(
            Credentials::parse(b"a secret", &limits()),
            Err(CredentialError::CallsignLength { len: 1, .. })
        ));
    }

    #[test]
    fn test_parse_password_too_long_rejected() {
        let mut plaintext = b"Alice ".to_vec();
        plaintext.extend(std::iter::repeat_n(b'x', 32));

        assert!(matches!(
            Credentials::parse(&plaintext, &limits()),
            Err(CredentialError::PasswordLength { len: 32, .. })
        ));
    }

    #[test]
    fn test_parse_trailing_space_means_empty_password() {
        assert!(matches!(
            Credentials::parse(b"Alice ", &limits()),
            Err(CredentialError::PasswordLength { len: 0, .. })
        ));
    }

    #[test]
    fn test_debug_redacts_password() {
        let creds = Credentials::parse(b"Alice secret1", &limits()).unwrap();
        let shown = format!("{creds:?}");
        assert!(shown.contains("Alice"));
        assert!(!shown.contains("secret1"));
    }
}

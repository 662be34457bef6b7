//! Daemon configuration.
//!
//! Loaded from a TOML file. Every section and every field has a default, so
//! an empty file (or no file at all) yields a working daemon listening on
//! [`DEFAULT_LISTEN_ADDR`] with an in-memory directory.
//!
//! ```toml
//! [network]
//! listen_addr = "0.0.0.0:5156"
//! handshake_timeout_secs = 10
//! idle_timeout_secs = 60
//!
//! [tokens]
//! expiry_secs = 300
//!
//! [directory]
//! suffix = "dc=bzflag,dc=org"
//!
//! [[directory.groups]]
//! name = "ADMIN"
//! members = ["Alice"]
//! ```

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use bzauth_directory::{
    DEFAULT_CALLSIGN_PATTERN, DEFAULT_EMAIL_PATTERN, DEFAULT_PASSWORD_PATTERN,
    DEFAULT_UID_CAS_ATTEMPTS, StoreConfig,
};
use bzauth_protocol::{DEFAULT_MAX_PAYLOAD, MAX_PAYLOAD_LEN};
use bzauth_session::{CredentialLimits, DEFAULT_RSA_BITS};
use bzauth_tick::TickConfig;
use serde::{Deserialize, Serialize};
use tracing::info;

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:5156";
pub const DEFAULT_SUFFIX: &str = "dc=bzflag,dc=org";

/// Smallest RSA modulus the daemon will generate.
pub const MIN_RSA_BITS: usize = 512;

/// Errors loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("invalid {field}: {source}")]
    Pattern {
        field: &'static str,
        #[source]
        source: regex::Error,
    },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

// ============================================
// AuthdConfig
// ============================================

/// Top-level `bzauthd.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthdConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub tokens: TokensConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub directory: DirectoryConfig,
    #[serde(default)]
    pub crypto: CryptoConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AuthdConfig {
    /// Reads, parses and validates a TOML file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref().display().to_string();
        info!(%path, "loading configuration");

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
        let config: Self =
            toml::from_str(&content).map_err(|source| ConfigError::Parse { path, source })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` if it exists, otherwise returns the defaults.
    pub async fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            Self::load(path).await
        } else {
            info!(path = %path.display(), "config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Checks every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.network.validate()?;
        self.tokens.validate()?;
        self.credentials.validate()?;
        self.directory.validate()?;
        self.crypto.validate()?;
        Ok(())
    }

    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

impl FromStr for AuthdConfig {
    type Err = ConfigError;

    fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: "<string>".into(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }
}

// ============================================
// NetworkConfig
// ============================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// How long a new connection may take to send its handshake.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,

    /// How long an established connection may stay silent.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Largest accepted frame payload in bytes.
    #[serde(default = "default_max_frame_payload")]
    pub max_frame_payload: usize,
}

fn default_listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

fn default_handshake_timeout() -> u64 {
    10
}

fn default_idle_timeout() -> u64 {
    60
}

fn default_max_frame_payload() -> usize {
    DEFAULT_MAX_PAYLOAD
}

impl NetworkConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.listen_addr.is_empty() {
            return Err(ConfigError::invalid("network.listen_addr", "cannot be empty"));
        }
        if self.handshake_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "network.handshake_timeout_secs",
                "must be greater than 0",
            ));
        }
        if self.idle_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "network.idle_timeout_secs",
                "must be greater than 0",
            ));
        }
        if self.max_frame_payload == 0 || self.max_frame_payload > MAX_PAYLOAD_LEN {
            return Err(ConfigError::invalid(
                "network.max_frame_payload",
                format!("must be between 1 and {MAX_PAYLOAD_LEN}"),
            ));
        }
        Ok(())
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            handshake_timeout_secs: default_handshake_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            max_frame_payload: default_max_frame_payload(),
        }
    }
}

// ============================================
// TokensConfig
// ============================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokensConfig {
    /// Token lifetime in seconds.
    #[serde(default = "default_expiry")]
    pub expiry_secs: u64,

    /// Housekeeping rate. Expired tokens are swept once per tick.
    #[serde(default = "default_tick_rate")]
    pub tick_rate_hz: u32,
}

fn default_expiry() -> u64 {
    300
}

fn default_tick_rate() -> u32 {
    1
}

impl TokensConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate_hz == 0 || self.tick_rate_hz > TickConfig::MAX_TICK_RATE_HZ {
            return Err(ConfigError::invalid(
                "tokens.tick_rate_hz",
                format!("must be between 1 and {}", TickConfig::MAX_TICK_RATE_HZ),
            ));
        }
        Ok(())
    }

    pub fn lifetime(&self) -> Duration {
        Duration::from_secs(self.expiry_secs)
    }

    pub fn tick_config(&self) -> TickConfig {
        TickConfig::with_rate(self.tick_rate_hz)
    }
}

impl Default for TokensConfig {
    fn default() -> Self {
        Self {
            expiry_secs: default_expiry(),
            tick_rate_hz: default_tick_rate(),
        }
    }
}

// ============================================
// CredentialsConfig
// ============================================

/// Length bounds, advertised to clients in the registration form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default = "default_min_callsign")]
    pub min_callsign_len: u8,
    #[serde(default = "default_max_callsign")]
    pub max_callsign_len: u8,
    #[serde(default = "default_min_password")]
    pub min_password_len: u8,
    #[serde(default = "default_max_password")]
    pub max_password_len: u8,
    #[serde(default = "default_max_email")]
    pub max_email_len: u8,
}

fn default_min_callsign() -> u8 {
    2
}

fn default_max_callsign() -> u8 {
    31
}

fn default_min_password() -> u8 {
    4
}

fn default_max_password() -> u8 {
    31
}

fn default_max_email() -> u8 {
    254
}

impl CredentialsConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.min_callsign_len == 0 || self.min_callsign_len > self.max_callsign_len {
            return Err(ConfigError::invalid(
                "credentials.min_callsign_len",
                "must be at least 1 and not above max_callsign_len",
            ));
        }
        // The callsign travels in a 32-byte NUL-terminated field.
        if usize::from(self.max_callsign_len) >= bzauth_protocol::CALLSIGN_FIELD_LEN {
            return Err(ConfigError::invalid(
                "credentials.max_callsign_len",
                format!("must be below {}", bzauth_protocol::CALLSIGN_FIELD_LEN),
            ));
        }
        if self.min_password_len == 0 || self.min_password_len > self.max_password_len {
            return Err(ConfigError::invalid(
                "credentials.min_password_len",
                "must be at least 1 and not above max_password_len",
            ));
        }
        if self.max_email_len == 0 {
            return Err(ConfigError::invalid(
                "credentials.max_email_len",
                "must be greater than 0",
            ));
        }
        Ok(())
    }

    pub fn limits(&self) -> CredentialLimits {
        CredentialLimits {
            min_callsign: self.min_callsign_len.into(),
            max_callsign: self.max_callsign_len.into(),
            min_password: self.min_password_len.into(),
            max_password: self.max_password_len.into(),
            max_email: self.max_email_len.into(),
        }
    }
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            min_callsign_len: default_min_callsign(),
            max_callsign_len: default_max_callsign(),
            min_password_len: default_min_password(),
            max_password_len: default_max_password(),
            max_email_len: default_max_email(),
        }
    }
}

// ============================================
// DirectoryConfig
// ============================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Base DN users, mail entries, groups and the uid counter live under.
    #[serde(default = "default_suffix")]
    pub suffix: String,

    /// Compare-and-swap attempts on the uid counter before giving up.
    #[serde(default = "default_cas_attempts")]
    pub uid_cas_attempts: u32,

    #[serde(default = "default_callsign_regex")]
    pub callsign_regex: String,
    #[serde(default = "default_password_regex")]
    pub password_regex: String,
    #[serde(default = "default_email_regex")]
    pub email_regex: String,

    /// Groups created at startup if missing.
    #[serde(default)]
    pub groups: Vec<GroupSeed>,
}

/// A `[[directory.groups]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSeed {
    pub name: String,
    #[serde(default)]
    pub members: Vec<String>,
}

fn default_suffix() -> String {
    DEFAULT_SUFFIX.to_string()
}

fn default_cas_attempts() -> u32 {
    DEFAULT_UID_CAS_ATTEMPTS
}

fn default_callsign_regex() -> String {
    DEFAULT_CALLSIGN_PATTERN.to_string()
}

fn default_password_regex() -> String {
    DEFAULT_PASSWORD_PATTERN.to_string()
}

fn default_email_regex() -> String {
    DEFAULT_EMAIL_PATTERN.to_string()
}

impl DirectoryConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.suffix.is_empty() {
            return Err(ConfigError::invalid("directory.suffix", "cannot be empty"));
        }
        if self.uid_cas_attempts == 0 {
            return Err(ConfigError::invalid(
                "directory.uid_cas_attempts",
                "must be greater than 0",
            ));
        }
        if let Some(group) = self.groups.iter().find(|g| g.name.is_empty()) {
            return Err(ConfigError::invalid(
                "directory.groups",
                format!("group with members {:?} has no name", group.members),
            ));
        }
        self.store_config().map(|_| ())
    }

    /// Compiles the patterns into a gateway config.
    pub fn store_config(&self) -> Result<StoreConfig, ConfigError> {
        let pattern = |field: &'static str, text: &str| {
            regex::Regex::new(text).map_err(|source| ConfigError::Pattern { field, source })
        };
        Ok(StoreConfig {
            suffix: self.suffix.clone(),
            uid_cas_attempts: self.uid_cas_attempts,
            callsign_pattern: pattern("directory.callsign_regex", &self.callsign_regex)?,
            password_pattern: pattern("directory.password_regex", &self.password_regex)?,
            email_pattern: pattern("directory.email_regex", &self.email_regex)?,
        })
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            suffix: default_suffix(),
            uid_cas_attempts: default_cas_attempts(),
            callsign_regex: default_callsign_regex(),
            password_regex: default_password_regex(),
            email_regex: default_email_regex(),
            groups: Vec::new(),
        }
    }
}

// ============================================
// CryptoConfig / LoggingConfig
// ============================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CryptoConfig {
    /// Size of the RSA key generated at startup.
    #[serde(default = "default_rsa_bits")]
    pub rsa_bits: usize,
}

fn default_rsa_bits() -> usize {
    DEFAULT_RSA_BITS
}

impl CryptoConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.rsa_bits < MIN_RSA_BITS {
            return Err(ConfigError::invalid(
                "crypto.rsa_bits",
                format!("must be at least {MIN_RSA_BITS}"),
            ));
        }
        // The modulus goes out in a u16-length field.
        if self.rsa_bits / 8 > usize::from(u16::MAX) {
            return Err(ConfigError::invalid("crypto.rsa_bits", "too large"));
        }
        Ok(())
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            rsa_bits: default_rsa_bits(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. `info` or `bzauth=debug`.
    /// `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

//! The user directory gateway.
//!
//! [`UserStore`] turns protocol-level requests ("register Alice", "does
//! this password match", "which of these groups is Bob in") into sequences
//! of [`Directory`] operations.
//!
//! # Registration
//!
//! There is no multi-entry transaction in a directory, so a registration is
//! three separate writes that are each atomic on their own:
//!
//! ```text
//!   claim uid ─► add user (pending pw) ─► add mail ─► swap in real pw
//!                   │                       │             │
//!                   │ exists: UserExists    │ fail:       │ fail:
//!                   ▼                       ▼             ▼
//!                 (stop)              delete user    delete mail, delete user
//! ```
//!
//! The user entry only becomes usable in the last step. A crash anywhere
//! before it leaves an entry whose password can never verify.
//!
//! # Uid allocation
//!
//! The counter entry holds the last uid handed out. A registrar reads `n`
//! and, in one `modify`, deletes `n` and adds `n + 1`. If someone else got
//! there first the delete fails and the whole modify is rejected, so the
//! registrar re-reads and tries again, a bounded number of times.
//!
//! A claimed uid is cached until a registration actually consumes it, so a
//! burst of failed attempts (callsign taken, mail taken) does not burn
//! through the id space. The cache is not persisted: a crash with an
//! unconsumed claim still leaves a gap.

use regex::Regex;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::directory::{
    Attribute, Directory, DirectoryError, Filter, Modification, escape_dn_value,
};
use crate::hash::PasswordDigest;

/// Default number of compare-and-swap attempts on the uid counter.
pub const DEFAULT_UID_CAS_ATTEMPTS: u32 = 4;

/// RDN value of the uid counter entry.
pub const NEXT_UID_CN: &str = "NextUID";

const USER_CLASSES: [&str; 2] = ["person", "extensibleObject"];
const MAIL_CLASS: &str = "extensibleObject";
const GROUP_CLASS: &str = "groupOfUniqueNames";

/// Why a registration did not complete.
#[derive(Debug, thiserror::Error)]
pub enum RegisterError {
    #[error("callsign rejected by validation rules")]
    InvalidCallsign,

    #[error("password rejected by validation rules")]
    InvalidPassword,

    #[error("email rejected by validation rules")]
    InvalidEmail,

    #[error("callsign already registered")]
    UserExists,

    #[error("email already registered")]
    MailExists,

    /// The counter kept changing under us (or could not be read).
    #[error("could not claim a uid after {attempts} attempts")]
    UidAllocation { attempts: u32 },

    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Base DN everything lives under, e.g. `dc=bzflag,dc=org`.
    pub suffix: String,
    pub uid_cas_attempts: u32,
    pub callsign_pattern: Regex,
    pub password_pattern: Regex,
    pub email_pattern: Regex,
}

/// Default validation patterns.
pub const DEFAULT_CALLSIGN_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9_.+\-]*$";
pub const DEFAULT_PASSWORD_PATTERN: &str = r"^[!-~]+$";
pub const DEFAULT_EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";

impl StoreConfig {
    /// Builds a config, compiling the three validation patterns.
    pub fn new(
        suffix: impl Into<String>,
        uid_cas_attempts: u32,
        callsign_pattern: &str,
        password_pattern: &str,
        email_pattern: &str,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            suffix: suffix.into(),
            uid_cas_attempts,
            callsign_pattern: Regex::new(callsign_pattern)?,
            password_pattern: Regex::new(password_pattern)?,
            email_pattern: Regex::new(email_pattern)?,
        })
    }

    /// Default patterns and attempt count under `suffix`.
    pub fn with_suffix(suffix: impl Into<String>) -> Result<Self, regex::Error> {
        Self::new(
            suffix,
            DEFAULT_UID_CAS_ATTEMPTS,
            DEFAULT_CALLSIGN_PATTERN,
            DEFAULT_PASSWORD_PATTERN,
            DEFAULT_EMAIL_PATTERN,
        )
    }
}

/// The user directory gateway.
pub struct UserStore<D> {
    directory: D,
    config: StoreConfig,
    /// A claimed but not yet consumed uid. Held for the whole registration.
    claimed_uid: Mutex<Option<u32>>,
}

impl<D: Directory> UserStore<D> {
    pub fn new(directory: D, config: StoreConfig) -> Self {
        Self {
            directory,
            config,
            claimed_uid: Mutex::new(None),
        }
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Layout
    // -----------------------------------------------------------------------

    pub fn user_dn(&self, callsign: &str) -> String {
        format!("cn={},{}", escape_dn_value(callsign), self.config.suffix)
    }

    pub fn mail_dn(&self, email: &str) -> String {
        format!("mail={},{}", escape_dn_value(email), self.config.suffix)
    }

    pub fn group_dn(&self, group: &str) -> String {
        format!("cn={},{}", escape_dn_value(group), self.config.suffix)
    }

    pub fn counter_dn(&self) -> String {
        format!("cn={NEXT_UID_CN},{}", self.config.suffix)
    }

    /// Creates the uid counter if it does not exist yet.
    pub async fn ensure_counter(&self) -> Result<(), DirectoryError> {
        let attributes = vec![
            Attribute::single("objectClass", MAIL_CLASS),
            Attribute::single("cn", NEXT_UID_CN),
            Attribute::single("uid", "0"),
        ];
        match self.directory.add(&self.counter_dn(), attributes).await {
            Ok(()) => {
                info!(dn = %self.counter_dn(), "created uid counter");
                Ok(())
            }
            Err(DirectoryError::AlreadyExists(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Creates a group entry containing `members` (callsigns).
    pub async fn create_group(
        &self,
        group: &str,
        members: &[String],
    ) -> Result<(), DirectoryError> {
        let attributes = vec![
            Attribute::single("objectClass", GROUP_CLASS),
            Attribute::single("cn", group),
            Attribute::new("uniqueMember", members.iter().map(|m| self.user_dn(m))),
        ];
        self.directory.add(&self.group_dn(group), attributes).await?;
        debug!(%group, members = members.len(), "group created");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn check_callsign(&self, callsign: &str) -> Result<(), RegisterError> {
        let reserved = callsign.eq_ignore_ascii_case(NEXT_UID_CN);
        if reserved || !self.config.callsign_pattern.is_match(callsign) {
            return Err(RegisterError::InvalidCallsign);
        }
        Ok(())
    }

    pub fn check_password(&self, password: &str) -> Result<(), RegisterError> {
        if !self.config.password_pattern.is_match(password) {
            return Err(RegisterError::InvalidPassword);
        }
        Ok(())
    }

    pub fn check_email(&self, email: &str) -> Result<(), RegisterError> {
        if !self.config.email_pattern.is_match(email) {
            return Err(RegisterError::InvalidEmail);
        }
        Ok(())
    }

    /// Validates and hashes a password for storage.
    pub fn hash_password(&self, password: &str) -> Result<PasswordDigest, RegisterError> {
        self.check_password(password)?;
        Ok(PasswordDigest::hash(password))
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Registers `callsign` and returns its new uid.
    pub async fn register_user(
        &self,
        callsign: &str,
        digest: &PasswordDigest,
        email: &str,
    ) -> Result<u32, RegisterError> {
        self.check_callsign(callsign)?;
        self.check_email(email)?;

        info!(%callsign, %email, "registering user");

        let mut claimed = self.claimed_uid.lock().await;
        let uid = match *claimed {
            Some(uid) => {
                debug!(uid, "reusing previously claimed uid");
                uid
            }
            None => {
                let uid = self.claim_uid().await?;
                *claimed = Some(uid);
                uid
            }
        };

        self.commit_registration(callsign, digest, email, uid).await?;

        // Consumed: the next registration claims a fresh one.
        *claimed = None;
        info!(%callsign, uid, "user registered");
        Ok(uid)
    }

    /// Fetch-and-increment on the counter entry.
    async fn claim_uid(&self) -> Result<u32, RegisterError> {
        let dn = self.counter_dn();
        let attempts = self.config.uid_cas_attempts;

        for attempt in 1..=attempts {
            let current = match self.read_uid(&dn).await {
                Ok(current) => current,
                Err(e) => {
                    debug!(attempt, error = %e, "cannot read uid counter");
                    continue;
                }
            };
            let Some(next) = current.checked_add(1) else {
                error!(current, "uid counter exhausted");
                break;
            };

            let swap = vec![
                Modification::Delete(Attribute::single("uid", current.to_string())),
                Modification::Add(Attribute::single("uid", next.to_string())),
            ];
            match self.directory.modify(&dn, swap).await {
                Ok(()) => {
                    debug!(uid = next, attempt, "claimed uid");
                    return Ok(next);
                }
                Err(e) => {
                    debug!(attempt, error = %e, "uid counter changed underneath, retrying");
                }
            }
        }

        warn!(attempts, "giving up on uid allocation");
        Err(RegisterError::UidAllocation { attempts })
    }

    async fn read_uid(&self, dn: &str) -> Result<u32, DirectoryError> {
        let entry = self.directory.read(dn, &["uid"]).await?;
        entry
            .first("uid")
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| DirectoryError::NoSuchAttribute {
                dn: dn.to_owned(),
                attribute: "uid".into(),
            })
    }

    /// The three writes, with rollback of whatever already happened.
    async fn commit_registration(
        &self,
        callsign: &str,
        digest: &PasswordDigest,
        email: &str,
        uid: u32,
    ) -> Result<(), RegisterError> {
        let user_dn = self.user_dn(callsign);
        let mail_dn = self.mail_dn(email);
        let pending = digest.invalidated();
        let uid_value = uid.to_string();

        // Phase 1: user entry, unusable until phase 3.
        let user = vec![
            Attribute::new("objectClass", USER_CLASSES),
            Attribute::single("cn", callsign),
            Attribute::single("sn", callsign),
            Attribute::single("uid", uid_value.as_str()),
            Attribute::single("mail", email),
            Attribute::single("userPassword", pending.as_str()),
        ];
        match self.directory.add(&user_dn, user).await {
            Ok(()) => {}
            Err(DirectoryError::AlreadyExists(_)) => return Err(RegisterError::UserExists),
            Err(e) => return Err(e.into()),
        }

        // Phase 2: mail entry, which is what makes emails unique.
        let mail = vec![
            Attribute::single("objectClass", MAIL_CLASS),
            Attribute::single("mail", email),
            Attribute::single("uid", uid_value.as_str()),
        ];
        if let Err(e) = self.directory.add(&mail_dn, mail).await {
            self.rollback(&[user_dn.as_str()]).await;
            return Err(match e {
                DirectoryError::AlreadyExists(_) => RegisterError::MailExists,
                other => other.into(),
            });
        }

        // Phase 3: activate.
        let activate = vec![
            Modification::Delete(Attribute::single("userPassword", pending)),
            Modification::Add(Attribute::single("userPassword", digest.as_str())),
        ];
        if let Err(e) = self.directory.modify(&user_dn, activate).await {
            self.rollback(&[mail_dn.as_str(), user_dn.as_str()]).await;
            return Err(e.into());
        }

        Ok(())
    }

    /// Best-effort deletes, in order. Failures are logged and skipped.
    async fn rollback(&self, dns: &[&str]) {
        for dn in dns {
            if let Err(e) = self.directory.delete(dn).await {
                error!(%dn, error = %e, "rollback failed, leaving inert entry behind");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Binds as the user. `Ok(Some(uid))` on success, `Ok(None)` if the
    /// directory refused the credentials.
    pub async fn authenticate(
        &self,
        callsign: &str,
        password: &str,
    ) -> Result<Option<u32>, DirectoryError> {
        if password.is_empty() {
            return Ok(None);
        }
        if self.check_callsign(callsign).is_err() {
            debug!(%callsign, "malformed callsign refused before bind");
            return Ok(None);
        }
        let dn = self.user_dn(callsign);
        match self.directory.bind(&dn, password).await {
            Ok(()) => {}
            Err(DirectoryError::InvalidCredentials | DirectoryError::NoSuchObject(_)) => {
                debug!(%callsign, "bind refused");
                return Ok(None);
            }
            Err(e) => return Err(e),
        }
        let uid = self
            .read_uid(&dn)
            .await
            .inspect_err(|e| warn!(%callsign, error = %e, "bound user has no readable uid"))?;
        Ok(Some(uid))
    }

    /// `true` if `callsign` has a completed registration.
    pub async fn is_registered(&self, callsign: &str) -> Result<bool, DirectoryError> {
        match self
            .directory
            .read(&self.user_dn(callsign), &["userPassword"])
            .await
        {
            Ok(entry) => Ok(entry
                .values("userPassword")
                .iter()
                .any(|stored| PasswordDigest::parse(stored).is_some())),
            Err(DirectoryError::NoSuchObject(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// The subset of `groups` that `callsign` is a member of, in the order
    /// asked. Issues a single search, or none for an empty list.
    pub async fn intersect_groups(
        &self,
        callsign: &str,
        groups: &[String],
    ) -> Result<Vec<String>, DirectoryError> {
        if groups.is_empty() {
            return Ok(Vec::new());
        }
        let filter = Filter::And(vec![
            Filter::equals("objectClass", GROUP_CLASS),
            Filter::equals("uniqueMember", self.user_dn(callsign)),
            Filter::Or(groups.iter().map(|g| Filter::equals("cn", g.as_str())).collect()),
        ]);
        debug!(%callsign, %filter, "group intersection search");

        let found = self
            .directory
            .search(&self.config.suffix, &filter, &["cn"])
            .await?;

        Ok(groups
            .iter()
            .filter(|wanted| {
                found.iter().any(|entry| {
                    entry
                        .values("cn")
                        .iter()
                        .any(|cn| cn.eq_ignore_ascii_case(wanted))
                })
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryDirectory;

    fn store() -> UserStore<InMemoryDirectory> {
        UserStore::new(
            InMemoryDirectory::new(),
            StoreConfig::with_suffix("dc=bzflag,dc=org").unwrap(),
        )
    }

    #[test]
    fn test_dn_layout() {
        let s = store();
        assert_eq!(s.user_dn("Alice"), "cn=Alice,dc=bzflag,dc=org");
        assert_eq!(s.mail_dn("a@b.org"), "mail=a@b.org,dc=bzflag,dc=org");
        assert_eq!(s.counter_dn(), "cn=NextUID,dc=bzflag,dc=org");
    }

    #[test]
    fn test_check_rules() {
        let s = store();
        assert!(s.check_callsign("Alice").is_ok());
        assert!(matches!(s.check_callsign("al,ice"), Err(RegisterError::InvalidCallsign)));
        assert!(matches!(s.check_callsign("nextuid"), Err(RegisterError::InvalidCallsign)));
        assert!(matches!(s.check_email("nope"), Err(RegisterError::InvalidEmail)));
        assert!(matches!(s.hash_password(""), Err(RegisterError::InvalidPassword)));
    }

    #[tokio::test]
    async fn test_register_then_authenticate() {
        let s = store();
        s.ensure_counter().await.unwrap();
        let digest = s.hash_password("secret1").unwrap();

        let uid = s.register_user("Alice", &digest, "alice@example.com").await.unwrap();

        assert_eq!(uid, 1);
        assert_eq!(s.authenticate("Alice", "secret1").await.unwrap(), Some(1));
        assert_eq!(s.authenticate("Alice", "wrong").await.unwrap(), None);
        assert_eq!(s.authenticate("Nobody", "secret1").await.unwrap(), None);
        assert!(s.is_registered("Alice").await.unwrap());
        assert!(!s.is_registered("Bob").await.unwrap());
    }

    #[tokio::test]
    async fn test_authenticate_callsign_failing_pattern_is_refused() {
        let shared = std::sync::Arc::new(InMemoryDirectory::new());
        let open = UserStore::new(
            std::sync::Arc::clone(&shared),
            StoreConfig::with_suffix("dc=bzflag,dc=org").unwrap(),
        );
        let strict = UserStore::new(
            shared,
            StoreConfig::new(
                "dc=bzflag,dc=org",
                DEFAULT_UID_CAS_ATTEMPTS,
                "^[a-z]+$",
                DEFAULT_PASSWORD_PATTERN,
                DEFAULT_EMAIL_PATTERN,
            )
            .unwrap(),
        );
        open.ensure_counter().await.unwrap();
        let digest = open.hash_password("secret1").unwrap();
        open.register_user("Alice", &digest, "alice@example.com").await.unwrap();

        assert_eq!(open.authenticate("Alice", "secret1").await.unwrap(), Some(1));
        assert_eq!(strict.authenticate("Alice", "secret1").await.unwrap(), None);
        assert_eq!(open.authenticate("NextUID", "secret1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ensure_counter_is_idempotent() {
        let s = store();
        s.ensure_counter().await.unwrap();
        s.ensure_counter().await.unwrap();
        assert_eq!(s.directory().len(), 1);
    }

    #[tokio::test]
    async fn test_user_exists_keeps_claimed_uid() {
        let s = store();
        s.ensure_counter().await.unwrap();
        let digest = s.hash_password("secret1").unwrap();
        s.register_user("Alice", &digest, "a@example.com").await.unwrap();

        let dup = s.register_user("alice", &digest, "other@example.com").await;
        let next = s.register_user("Bob", &digest, "b@example.com").await.unwrap();

        assert!(matches!(dup, Err(RegisterError::UserExists)));
        assert_eq!(next, 2, "the failed attempt must not leave a gap");
    }
}

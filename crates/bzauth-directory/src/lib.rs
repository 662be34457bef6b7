//! User directory gateway for bzauthd.
//!
//! - [`Directory`]: the LDAP-shaped operations the daemon relies on
//!   (add, atomic modify, delete, read, bind, one-level search).
//! - [`InMemoryDirectory`]: a self-contained implementation of it.
//! - [`UserStore`]: registration, authentication, and group lookups built
//!   on top of any `Directory`.
//! - [`PasswordDigest`]: the stored `{SHA256}` password format.

mod directory;
mod hash;
mod memory;
mod store;

pub use directory::{
    Attribute, Directory, DirectoryError, Filter, Modification, SearchEntry, escape_dn_value,
};
pub use hash::{PENDING_SUFFIX, PasswordDigest, SCHEME};
pub use memory::InMemoryDirectory;
pub use store::{
    DEFAULT_CALLSIGN_PATTERN, DEFAULT_EMAIL_PATTERN, DEFAULT_PASSWORD_PATTERN,
    DEFAULT_UID_CAS_ATTEMPTS, NEXT_UID_CN, RegisterError, StoreConfig, UserStore,
};

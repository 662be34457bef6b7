//! The directory-service surface the gateway is written against.
//!
//! This is the subset of LDAP operations the registration algorithm needs,
//! with LDAP's per-operation atomicity: a [`Directory::modify`] either
//! applies every modification or none of them. The compare-and-swap on the
//! uid counter depends on exactly that.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Errors a directory can report. Named after the LDAP result codes they
/// stand for.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    /// `entryAlreadyExists`: an add targeted a DN that is taken.
    #[error("entry already exists: {0}")]
    AlreadyExists(String),

    /// `noSuchObject`: the DN does not exist.
    #[error("no such entry: {0}")]
    NoSuchObject(String),

    /// `noSuchAttribute`: a delete named a value the entry does not hold.
    #[error("{dn} has no matching {attribute} value")]
    NoSuchAttribute { dn: String, attribute: String },

    /// `attributeOrValueExists`: an add named a value already present.
    #[error("{dn} already holds that {attribute} value")]
    ValueExists { dn: String, attribute: String },

    /// `invalidCredentials`: a bind was refused.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// The directory could not be reached or failed internally.
    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

/// One attribute with its values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub values: Vec<String>,
}

impl Attribute {
    pub fn new(
        name: impl Into<String>,
        values: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn single(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: vec![value.into()],
        }
    }
}

/// One change inside an atomic [`Directory::modify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Modification {
    /// Add values. Fails with `ValueExists` if one is already present.
    Add(Attribute),
    /// Delete the listed values, or the whole attribute if none are
    /// listed. Fails with `NoSuchAttribute` if something is missing.
    Delete(Attribute),
    /// Replace all values.
    Replace(Attribute),
}

/// A search filter. Renders to RFC 4515 text via `Display`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Equals(String, String),
    Present(String),
}

impl Filter {
    pub fn equals(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Equals(attribute.into(), value.into())
    }

    /// Evaluates the filter against an entry's attributes. Attribute names
    /// and values compare case-insensitively, like LDAP's `caseIgnoreMatch`.
    pub fn matches(&self, entry: &SearchEntry) -> bool {
        match self {
            Self::And(parts) => parts.iter().all(|f| f.matches(entry)),
            Self::Or(parts) => parts.iter().any(|f| f.matches(entry)),
            Self::Equals(attribute, value) => entry
                .values(attribute)
                .iter()
                .any(|v| v.eq_ignore_ascii_case(value)),
            Self::Present(attribute) => !entry.values(attribute).is_empty(),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And(parts) => {
                f.write_str("(&")?;
                for part in parts {
                    write!(f, "{part}")?;
                }
                f.write_str(")")
            }
            Self::Or(parts) => {
                f.write_str("(|")?;
                for part in parts {
                    write!(f, "{part}")?;
                }
                f.write_str(")")
            }
            Self::Equals(attribute, value) => {
                write!(f, "({attribute}={})", escape_filter_value(value))
            }
            Self::Present(attribute) => write!(f, "({attribute}=*)"),
        }
    }
}

/// RFC 4515 escaping of `*`, `(`, `)`, `\` and NUL.
fn escape_filter_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '*' => out.push_str("\\2a"),
            '(' => out.push_str("\\28"),
            ')' => out.push_str("\\29"),
            '\\' => out.push_str("\\5c"),
            '\0' => out.push_str("\\00"),
            c => out.push(c),
        }
    }
    out
}

/// RFC 4514 escaping for a value placed inside a DN.
pub fn escape_dn_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for (i, c) in value.chars().enumerate() {
        let leading = i == 0 && (c == '#' || c == ' ');
        let trailing = i + 1 == value.chars().count() && c == ' ';
        if leading || trailing || matches!(c, ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// An entry returned by [`Directory::read`] or [`Directory::search`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchEntry {
    pub dn: String,
    /// Keyed by lowercase attribute name.
    pub attributes: BTreeMap<String, Vec<String>>,
}

impl SearchEntry {
    pub fn values(&self, attribute: &str) -> &[String] {
        self.attributes
            .get(&attribute.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn first(&self, attribute: &str) -> Option<&str> {
        self.values(attribute).first().map(String::as_str)
    }
}

/// The directory operations the gateway uses.
///
/// Every method returns a `Send` future so the gateway can be driven from
/// any tokio worker. Implementations may use `async fn`.
pub trait Directory: Send + Sync + 'static {
    /// Creates `dn` with `attributes`. Fails with `AlreadyExists` if taken.
    fn add(
        &self,
        dn: &str,
        attributes: Vec<Attribute>,
    ) -> impl Future<Output = Result<(), DirectoryError>> + Send;

    /// Applies all `changes` to `dn` atomically.
    fn modify(
        &self,
        dn: &str,
        changes: Vec<Modification>,
    ) -> impl Future<Output = Result<(), DirectoryError>> + Send;

    /// Removes `dn`.
    fn delete(&self, dn: &str) -> impl Future<Output = Result<(), DirectoryError>> + Send;

    /// Reads `attributes` of `dn` (all of them if empty).
    fn read(
        &self,
        dn: &str,
        attributes: &[&str],
    ) -> impl Future<Output = Result<SearchEntry, DirectoryError>> + Send;

    /// Simple bind as `dn`. Fails with `InvalidCredentials` on any mismatch.
    fn bind(
        &self,
        dn: &str,
        password: &str,
    ) -> impl Future<Output = Result<(), DirectoryError>> + Send;

    /// One-level search under `base`.
    fn search(
        &self,
        base: &str,
        filter: &Filter,
        attributes: &[&str],
    ) -> impl Future<Output = Result<Vec<SearchEntry>, DirectoryError>> + Send;
}

impl<D: Directory> Directory for Arc<D> {
    fn add(
        &self,
        dn: &str,
        attributes: Vec<Attribute>,
    ) -> impl Future<Output = Result<(), DirectoryError>> + Send {
        (**self).add(dn, attributes)
    }

    fn modify(
        &self,
        dn: &str,
        changes: Vec<Modification>,
    ) -> impl Future<Output = Result<(), DirectoryError>> + Send {
        (**self).modify(dn, changes)
    }

    fn delete(&self, dn: &str) -> impl Future<Output = Result<(), DirectoryError>> + Send {
        (**self).delete(dn)
    }

    fn read(
        &self,
        dn: &str,
        attributes: &[&str],
    ) -> impl Future<Output = Result<SearchEntry, DirectoryError>> + Send {
        (**self).read(dn, attributes)
    }

    fn bind(
        &self,
        dn: &str,
        password: &str,
    ) -> impl Future<Output = Result<(), DirectoryError>> + Send {
        (**self).bind(dn, password)
    }

    fn search(
        &self,
        base: &str,
        filter: &Filter,
        attributes: &[&str],
    ) -> impl Future<Output = Result<Vec<SearchEntry>, DirectoryError>> + Send {
        (**self).search(base, filter, attributes)
    }
}

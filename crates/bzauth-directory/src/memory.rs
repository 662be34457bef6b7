//! An in-process [`Directory`] with LDAP-like semantics.
//!
//! Entries are keyed by their lowercased DN, so `cn=Alice` and `cn=alice`
//! are the same entry, as they are in an LDAP server with `caseIgnoreMatch`
//! on `cn` and `mail`. Every operation takes the lock once, which makes each
//! call atomic. `modify` applies its changes to a copy and only swaps it in
//! once every change has succeeded.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use tracing::trace;

use crate::directory::{Attribute, Directory, DirectoryError, Filter, Modification, SearchEntry};
use crate::hash::PasswordDigest;

const PASSWORD_ATTRIBUTE: &str = "userpassword";

/// A directory held entirely in memory.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    entries: Mutex<BTreeMap<String, SearchEntry>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries, counters and groups included.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// `true` if `dn` exists.
    pub fn contains(&self, dn: &str) -> bool {
        self.entries.lock().contains_key(&normalize(dn))
    }
}

fn normalize(dn: &str) -> String {
    dn.to_ascii_lowercase()
}

/// `true` if `dn` is exactly one RDN below `base`.
fn is_child_of(dn: &str, base: &str) -> bool {
    let Some(rdn) = dn.strip_suffix(base).and_then(|rest| rest.strip_suffix(',')) else {
        return false;
    };
    let mut escaped = false;
    for c in rdn.chars() {
        match (escaped, c) {
            (true, _) => escaped = false,
            (false, '\\') => escaped = true,
            (false, ',') => return false,
            _ => {}
        }
    }
    !rdn.is_empty()
}

fn project(entry: &SearchEntry, attributes: &[&str]) -> SearchEntry {
    if attributes.is_empty() {
        return entry.clone();
    }
    let wanted: Vec<String> = attributes.iter().map(|a| a.to_ascii_lowercase()).collect();
    SearchEntry {
        dn: entry.dn.clone(),
        attributes: entry
            .attributes
            .iter()
            .filter(|(name, _)| wanted.contains(name))
            .map(|(name, values)| (name.clone(), values.clone()))
            .collect(),
    }
}

fn apply(entry: &mut SearchEntry, change: Modification) -> Result<(), DirectoryError> {
    let dn = entry.dn.clone();
    match change {
        Modification::Add(attr) => {
            let name = attr.name.to_ascii_lowercase();
            let values = entry.attributes.entry(name).or_default();
            for value in attr.values {
                if values.contains(&value) {
                    return Err(DirectoryError::ValueExists {
                        dn,
                        attribute: attr.name,
                    });
                }
                values.push(value);
            }
        }
        Modification::Delete(attr) => {
            let name = attr.name.to_ascii_lowercase();
            let missing = || DirectoryError::NoSuchAttribute {
                dn: dn.clone(),
                attribute: attr.name.clone(),
            };
            let values = entry.attributes.get_mut(&name).ok_or_else(missing)?;
            if attr.values.is_empty() {
                entry.attributes.remove(&name);
            } else {
                for value in &attr.values {
                    let pos = values.iter().position(|v| v == value).ok_or_else(missing)?;
                    values.remove(pos);
                }
                if values.is_empty() {
                    entry.attributes.remove(&name);
                }
            }
        }
        Modification::Replace(attr) => {
            let name = attr.name.to_ascii_lowercase();
            if attr.values.is_empty() {
                entry.attributes.remove(&name);
            } else {
                entry.attributes.insert(name, attr.values);
            }
        }
    }
    Ok(())
}

impl Directory for InMemoryDirectory {
    async fn add(&self, dn: &str, attributes: Vec<Attribute>) -> Result<(), DirectoryError> {
        let mut entries = self.entries.lock();
        let key = normalize(dn);
        if entries.contains_key(&key) {
            return Err(DirectoryError::AlreadyExists(dn.to_owned()));
        }
        let mut entry = SearchEntry {
            dn: dn.to_owned(),
            attributes: BTreeMap::new(),
        };
        for attr in attributes {
            entry
                .attributes
                .entry(attr.name.to_ascii_lowercase())
                .or_default()
                .extend(attr.values);
        }
        entries.insert(key, entry);
        trace!(dn, "entry added");
        Ok(())
    }

    async fn modify(&self, dn: &str, changes: Vec<Modification>) -> Result<(), DirectoryError> {
        let mut entries = self.entries.lock();
        let key = normalize(dn);
        let current = entries
            .get(&key)
            .ok_or_else(|| DirectoryError::NoSuchObject(dn.to_owned()))?;

        let mut updated = current.clone();
        for change in changes {
            apply(&mut updated, change)?;
        }
        entries.insert(key, updated);
        trace!(dn, "entry modified");
        Ok(())
    }

    async fn delete(&self, dn: &str) -> Result<(), DirectoryError> {
        self.entries
            .lock()
            .remove(&normalize(dn))
            .map(|_| trace!(dn, "entry deleted"))
            .ok_or_else(|| DirectoryError::NoSuchObject(dn.to_owned()))
    }

    async fn read(&self, dn: &str, attributes: &[&str]) -> Result<SearchEntry, DirectoryError> {
        self.entries
            .lock()
            .get(&normalize(dn))
            .map(|entry| project(entry, attributes))
            .ok_or_else(|| DirectoryError::NoSuchObject(dn.to_owned()))
    }

    async fn bind(&self, dn: &str, password: &str) -> Result<(), DirectoryError> {
        // An empty password would be an unauthenticated bind in LDAP.
        if password.is_empty() {
            return Err(DirectoryError::InvalidCredentials);
        }
        let entries = self.entries.lock();
        let entry = entries
            .get(&normalize(dn))
            .ok_or(DirectoryError::InvalidCredentials)?;
        let verified = entry
            .values(PASSWORD_ATTRIBUTE)
            .iter()
            .filter_map(|stored| PasswordDigest::parse(stored))
            .any(|digest| digest.verify(password));
        if verified {
            Ok(())
        } else {
            Err(DirectoryError::InvalidCredentials)
        }
    }

    async fn search(
        &self,
        base: &str,
        filter: &Filter,
        attributes: &[&str],
    ) -> Result<Vec<SearchEntry>, DirectoryError> {
        let base = normalize(base);
        Ok(self
            .entries
            .lock()
            .iter()
            .filter(|(key, entry)| is_child_of(key, &base) && filter.matches(entry))
            .map(|(_, entry)| project(entry, attributes))
            .collect())
    }
}

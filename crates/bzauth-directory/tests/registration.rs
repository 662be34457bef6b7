//! Registration algorithm tests: rollback, uid races, and inert leftovers.
//!
//! Faults are injected by wrapping [`InMemoryDirectory`] in small
//! `Directory` implementations that fail or interleave specific calls.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use bzauth_directory::{
    Attribute, Directory, DirectoryError, Filter, InMemoryDirectory, Modification,
    PasswordDigest, RegisterError, SearchEntry, StoreConfig, UserStore,
};

const SUFFIX: &str = "dc=bzflag,dc=org";

// =========================================================================
// Helpers
// =========================================================================

fn config() -> StoreConfig {
    StoreConfig::with_suffix(SUFFIX).unwrap()
}

async fn store_on<D: Directory>(directory: D) -> UserStore<D> {
    let store = UserStore::new(directory, config());
    store.ensure_counter().await.unwrap();
    store
}

fn digest(password: &str) -> PasswordDigest {
    PasswordDigest::hash(password)
}

/// Switchable failures plus call counters.
#[derive(Default)]
struct Faulty {
    inner: InMemoryDirectory,
    fail_mail_add: AtomicBool,
    fail_user_modify: AtomicBool,
    fail_delete: AtomicBool,
    searches: AtomicUsize,
}

impl Faulty {
    fn unavailable(what: &str) -> DirectoryError {
        DirectoryError::Unavailable(format!("injected {what} failure"))
    }
}

impl Directory for Faulty {
    async fn add(&self, dn: &str, attributes: Vec<Attribute>) -> Result<(), DirectoryError> {
        if dn.starts_with("mail=") && self.fail_mail_add.load(Ordering::SeqCst) {
            return Err(Self::unavailable("mail add"));
        }
        self.inner.add(dn, attributes).await
    }

    async fn modify(&self, dn: &str, changes: Vec<Modification>) -> Result<(), DirectoryError> {
        let is_counter = dn.starts_with("cn=NextUID");
        if !is_counter && self.fail_user_modify.load(Ordering::SeqCst) {
            return Err(Self::unavailable("activate"));
        }
        self.inner.modify(dn, changes).await
    }

    async fn delete(&self, dn: &str) -> Result<(), DirectoryError> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(Self::unavailable("delete"));
        }
        self.inner.delete(dn).await
    }

    async fn read(&self, dn: &str, attributes: &[&str]) -> Result<SearchEntry, DirectoryError> {
        self.inner.read(dn, attributes).await
    }

    async fn bind(&self, dn: &str, password: &str) -> Result<(), DirectoryError> {
        self.inner.bind(dn, password).await
    }

    async fn search(
        &self,
        base: &str,
        filter: &Filter,
        attributes: &[&str],
    ) -> Result<Vec<SearchEntry>, DirectoryError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        self.inner.search(base, filter, attributes).await
    }
}

/// Lets a rival registrar run to completion right after our first read
/// of the counter, so our compare-and-swap is guaranteed to lose once.
struct Interleaved {
    inner: Arc<InMemoryDirectory>,
    rival: tokio::sync::Mutex<Option<UserStore<Arc<InMemoryDirectory>>>>,
    rival_uid: parking_lot::Mutex<Option<u32>>,
    counter_swaps: AtomicUsize,
}

impl Directory for Interleaved {
    async fn add(&self, dn: &str, attributes: Vec<Attribute>) -> Result<(), DirectoryError> {
        self.inner.add(dn, attributes).await
    }

    async fn modify(&self, dn: &str, changes: Vec<Modification>) -> Result<(), DirectoryError> {
        if dn.starts_with("cn=NextUID") {
            self.counter_swaps.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.modify(dn, changes).await
    }

    async fn delete(&self, dn: &str) -> Result<(), DirectoryError> {
        self.inner.delete(dn).await
    }

    async fn read(&self, dn: &str, attributes: &[&str]) -> Result<SearchEntry, DirectoryError> {
        let entry = self.inner.read(dn, attributes).await?;
        if dn.starts_with("cn=NextUID") {
            let rival = self.rival.lock().await.take();
            if let Some(rival) = rival {
                let uid = rival
                    .register_user("Bob", &digest("hunter22"), "bob@example.com")
                    .await
                    .unwrap();
                *self.rival_uid.lock() = Some(uid);
            }
        }
        Ok(entry)
    }

    async fn bind(&self, dn: &str, password: &str) -> Result<(), DirectoryError> {
        self.inner.bind(dn, password).await
    }

    async fn search(
        &self,
        base: &str,
        filter: &Filter,
        attributes: &[&str],
    ) -> Result<Vec<SearchEntry>, DirectoryError> {
        self.inner.search(base, filter, attributes).await
    }
}

// =========================================================================
// Rollback
// =========================================================================

#[tokio::test]
async fn test_register_duplicate_mail_rolls_back_user() {
    let store = store_on(InMemoryDirectory::new()).await;
    store
        .register_user("Alice", &digest("secret1"), "shared@example.com")
        .await
        .unwrap();

    let result = store
        .register_user("Bob", &digest("secret2"), "shared@example.com")
        .await;

    assert!(matches!(result, Err(RegisterError::MailExists)));
    let lookup = store.directory().read(&store.user_dn("Bob"), &[]).await;
    assert!(matches!(lookup, Err(DirectoryError::NoSuchObject(_))));
    assert!(!store.is_registered("Bob").await.unwrap());
}

#[tokio::test]
async fn test_register_mail_insert_failure_rolls_back_user() {
    let store = store_on(Faulty::default()).await;
    store.directory().fail_mail_add.store(true, Ordering::SeqCst);

    let result = store
        .register_user("Alice", &digest("secret1"), "alice@example.com")
        .await;

    assert!(matches!(
        result,
        Err(RegisterError::Directory(DirectoryError::Unavailable(_)))
    ));
    assert!(!store.directory().inner.contains(&store.user_dn("Alice")));
}

#[tokio::test]
async fn test_register_activate_failure_rolls_back_mail_then_user() {
    let store = store_on(Faulty::default()).await;
    store.directory().fail_user_modify.store(true, Ordering::SeqCst);

    let result = store
        .register_user("Alice", &digest("secret1"), "alice@example.com")
        .await;

    assert!(matches!(result, Err(RegisterError::Directory(_))));
    let inner = &store.directory().inner;
    assert!(!inner.contains(&store.user_dn("Alice")));
    assert!(!inner.contains(&store.mail_dn("alice@example.com")));
    // Only the counter is left.
    assert_eq!(inner.len(), 1);
}

#[tokio::test]
async fn test_failed_rollback_leaves_inert_entry() {
    let store = store_on(Faulty::default()).await;
    store.directory().fail_user_modify.store(true, Ordering::SeqCst);
    store.directory().fail_delete.store(true, Ordering::SeqCst);

    let result = store
        .register_user("Alice", &digest("secret1"), "alice@example.com")
        .await;

    assert!(result.is_err(), "rollback failure must not turn into success");
    assert!(store.directory().inner.contains(&store.user_dn("Alice")));
    assert_eq!(store.authenticate("Alice", "secret1").await.unwrap(), None);
    assert!(!store.is_registered("Alice").await.unwrap());
}

#[tokio::test]
async fn test_failed_registration_uid_is_reused() {
    let store = store_on(Faulty::default()).await;
    store.directory().fail_user_modify.store(true, Ordering::SeqCst);
    let _ = store
        .register_user("Alice", &digest("secret1"), "alice@example.com")
        .await;

    store.directory().fail_user_modify.store(false, Ordering::SeqCst);
    let uid = store
        .register_user("Alice", &digest("secret1"), "alice@example.com")
        .await
        .unwrap();

    assert_eq!(uid, 1);
    assert_eq!(store.authenticate("Alice", "secret1").await.unwrap(), Some(1));
}

// =========================================================================
// Uid allocation
// =========================================================================

#[tokio::test]
async fn test_uid_race_loser_retries_and_gets_higher_uid() {
    let shared = Arc::new(InMemoryDirectory::new());
    let rival = store_on(Arc::clone(&shared)).await;
    let ours = store_on(Interleaved {
        inner: Arc::clone(&shared),
        rival: tokio::sync::Mutex::new(Some(rival)),
        rival_uid: parking_lot::Mutex::new(None),
        counter_swaps: AtomicUsize::new(0),
    })
    .await;

    let our_uid = ours
        .register_user("Alice", &digest("secret1"), "alice@example.com")
        .await
        .unwrap();

    let rival_uid = *ours.directory().rival_uid.lock();
    assert_eq!(rival_uid, Some(1), "the rival read the same counter and won");
    assert_eq!(our_uid, 2);
    assert_eq!(ours.directory().counter_swaps.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_uid_allocation_gives_up_after_bounded_attempts() {
    // No counter entry at all: every read fails.
    let store = UserStore::new(InMemoryDirectory::new(), config());

    let result = store
        .register_user("Alice", &digest("secret1"), "alice@example.com")
        .await;

    assert!(matches!(result, Err(RegisterError::UidAllocation { attempts: 4 })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_shared_store_assigns_distinct_uids() {
    let store = Arc::new(store_on(InMemoryDirectory::new()).await);

    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                let name = format!("player{i}");
                let email = format!("p{i}@example.com");
                store
                    .register_user(&name, &digest("secret1"), &email)
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut uids = HashSet::new();
    for task in tasks {
        assert!(uids.insert(task.await.unwrap()));
    }
    assert_eq!(uids, (1..=20).collect::<HashSet<u32>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_daemons_never_share_a_uid() {
    let shared = Arc::new(InMemoryDirectory::new());
    let mut tasks = Vec::new();

    for daemon in 0..4 {
        let mut cfg = config();
        cfg.uid_cas_attempts = 64;
        let store = UserStore::new(Arc::clone(&shared), cfg);
        store.ensure_counter().await.unwrap();
        tasks.push(tokio::spawn(async move {
            let mut uids = Vec::new();
            for n in 0..5 {
                let name = format!("d{daemon}p{n}");
                let uid = store
                    .register_user(&name, &digest("secret1"), &format!("{name}@example.com"))
                    .await
                    .unwrap();
                uids.push(uid);
            }
            uids
        }));
    }

    let mut all = HashSet::new();
    for task in tasks {
        for uid in task.await.unwrap() {
            assert!(all.insert(uid), "uid {uid} issued twice");
        }
    }
    assert_eq!(all.len(), 20);
}

// =========================================================================
// Groups
// =========================================================================

#[tokio::test]
async fn test_intersect_groups_issues_one_search() {
    let store = store_on(Faulty::default()).await;
    store
        .create_group("ADMIN", &["Alice".to_string()])
        .await
        .unwrap();
    store
        .create_group("COP", &["Alice".to_string(), "Bob".to_string()])
        .await
        .unwrap();
    store.create_group("DEV", &["Bob".to_string()]).await.unwrap();

    let groups = store
        .intersect_groups(
            "Alice",
            &["DEV".to_string(), "COP".to_string(), "ADMIN".to_string()],
        )
        .await
        .unwrap();

    assert_eq!(groups, vec!["COP".to_string(), "ADMIN".to_string()]);
    assert_eq!(store.directory().searches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_intersect_groups_empty_interest_skips_directory() {
    let store = store_on(Faulty::default()).await;

    let groups = store.intersect_groups("Alice", &[]).await.unwrap();

    assert!(groups.is_empty());
    assert_eq!(store.directory().searches.load(Ordering::SeqCst), 0);
}

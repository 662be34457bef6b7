//! Integration tests for token issuance, validation, and expiry.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use bzauth_session::{DEFAULT_TOKEN_LIFETIME, RESERVED_TOKEN, TokenManager};

// =========================================================================
// Issue / validate
// =========================================================================

#[test]
fn test_validate_matches_issuing_callsign_only() {
    let mut tokens = TokenManager::default();

    let t = tokens.issue("Alice").unwrap();

    assert!(tokens.validate("Alice", t));
    assert!(!tokens.validate("Bob", t));
}

#[test]
fn test_validate_is_case_sensitive() {
    let mut tokens = TokenManager::default();
    let t = tokens.issue("Alice").unwrap();

    assert!(!tokens.validate("alice", t));
}

#[test]
fn test_validate_reserved_zero_is_always_false() {
    let mut tokens = TokenManager::with_first_id(DEFAULT_TOKEN_LIFETIME, 0);
    let first = tokens.issue("Alice").unwrap();

    assert_ne!(first, RESERVED_TOKEN);
    assert!(!tokens.validate("Alice", RESERVED_TOKEN));
}

#[test]
fn test_validate_unissued_id_is_false() {
    let tokens = TokenManager::with_first_id(DEFAULT_TOKEN_LIFETIME, 100);
    assert!(!tokens.validate("Alice", 100));
}

#[test]
fn test_issue_ids_are_unique() {
    let mut tokens = TokenManager::default();

    let ids: HashSet<u32> = (0..1_000)
        .map(|i| tokens.issue(&format!("player{i}")).unwrap())
        .collect();

    assert_eq!(ids.len(), 1_000);
    assert!(!ids.contains(&RESERVED_TOKEN));
    assert_eq!(tokens.len(), 1_000);
}

#[test]
fn test_same_callsign_can_hold_several_tokens() {
    let mut tokens = TokenManager::default();
    let a = tokens.issue("Alice").unwrap();
    let b = tokens.issue("Alice").unwrap();

    assert_ne!(a, b);
    assert!(tokens.validate("Alice", a));
    assert!(tokens.validate("Alice", b));
}

// =========================================================================
// Expiry
// =========================================================================

#[test]
fn test_zero_lifetime_token_invalid_after_epsilon() {
    let mut tokens = TokenManager::new(Duration::ZERO);
    let now = Instant::now();
    let t = tokens.issue_at("Alice", now).unwrap();

    let expired = tokens.tick(now + Duration::from_nanos(1));

    assert_eq!(expired, 1);
    assert!(!tokens.validate("Alice", t));
    assert!(tokens.is_empty());
}

#[test]
fn test_token_survives_until_lifetime_elapses() {
    let mut tokens = TokenManager::new(Duration::from_secs(300));
    let now = Instant::now();
    let t = tokens.issue_at("Alice", now).unwrap();

    tokens.tick(now + Duration::from_secs(299));
    assert!(tokens.validate("Alice", t));

    tokens.tick(now + Duration::from_secs(300));
    assert!(!tokens.validate("Alice", t));
}

#[test]
fn test_expire_is_idempotent() {
    let mut tokens = TokenManager::default();
    let t = tokens.issue("Alice").unwrap();

    tokens.expire(t);
    tokens.expire(t);
    tokens.expire(12345);

    assert!(!tokens.validate("Alice", t));
}

#[test]
fn test_expire_early_leaves_other_tokens() {
    let mut tokens = TokenManager::new(Duration::from_secs(10));
    let now = Instant::now();
    let a = tokens.issue_at("Alice", now).unwrap();
    let b = tokens.issue_at("Bob", now).unwrap();

    tokens.expire(a);
    let expired = tokens.tick(now + Duration::from_secs(10));

    assert_eq!(expired, 1, "only Bob's expiry should still fire");
    assert!(!tokens.validate("Bob", b));
}

//! Session tokens handed out after a successful authentication.
//!
//! A game server later presents `{token, callsign}` pairs and asks whether
//! each one is still good. Tokens expire after a fixed lifetime, driven by
//! an [`EventScheduler`] that the daemon polls from its housekeeping tick.
//!
//! # Concurrency note
//!
//! Like the rest of the session layer, `TokenManager` is plain data with
//! `&mut self` methods. The server wraps it in a `tokio::sync::Mutex`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bzauth_tick::{EventHandle, EventScheduler};
use rand::Rng;
use tracing::{debug, info};

use crate::SessionError;

/// Default token lifetime: five minutes.
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(300);

/// Id that is never issued. Servers send it to ask "is this callsign
/// registered?" instead of checking a token.
pub const RESERVED_TOKEN: u32 = 0;

struct IssuedToken {
    callsign: String,
    expiry: EventHandle<TokenTable>,
}

/// The live token map. This is also the context expiry callbacks run
/// against, so a callback only needs the id it should remove.
#[derive(Default)]
struct TokenTable {
    live: HashMap<u32, IssuedToken>,
}

impl TokenTable {
    fn remove(&mut self, id: u32) -> Option<IssuedToken> {
        self.live.remove(&id)
    }
}

/// Issues, validates, and expires session tokens.
pub struct TokenManager {
    table: TokenTable,
    expiries: EventScheduler<TokenTable>,
    next_id: u32,
    lifetime: Duration,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("live", &self.table.live.len())
            .field("lifetime", &self.lifetime)
            .finish()
    }
}

impl Default for TokenManager {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_LIFETIME)
    }
}

impl TokenManager {
    /// Creates an empty manager. The id counter starts at a random offset.
    pub fn new(lifetime: Duration) -> Self {
        Self::with_first_id(lifetime, rand::rng().random())
    }

    /// Creates an empty manager whose counter starts at `first_id`.
    pub fn with_first_id(lifetime: Duration, first_id: u32) -> Self {
        Self {
            table: TokenTable::default(),
            expiries: EventScheduler::new(),
            next_id: first_id,
            lifetime,
        }
    }

    /// Issues a token for `callsign`, expiring one lifetime from now.
    pub fn issue(&mut self, callsign: &str) -> Result<u32, SessionError> {
        self.issue_at(callsign, Instant::now())
    }

    /// Issues a token as if the current time were `now`.
    pub fn issue_at(&mut self, callsign: &str, now: Instant) -> Result<u32, SessionError> {
        let id = self.allocate_id()?;

        let expiry = self.expiries.schedule(now, self.lifetime, move |table| {
            if let Some(token) = table.remove(id) {
                debug!(token = id, callsign = %token.callsign, "token expired");
            }
        });
        self.table.live.insert(
            id,
            IssuedToken {
                callsign: callsign.to_owned(),
                expiry,
            },
        );

        info!(token = id, %callsign, "token issued");
        Ok(id)
    }

    /// Picks the next id that is neither reserved nor live.
    ///
    /// Wraps around `u32`. Gives up after visiting as many candidates as
    /// there are live tokens, which only happens if the space is full.
    fn allocate_id(&mut self) -> Result<u32, SessionError> {
        let live = self.table.live.len();
        for _ in 0..=live + 1 {
            let candidate = self.next_id;
            self.next_id = self.next_id.wrapping_add(1);
            if candidate != RESERVED_TOKEN && !self.table.live.contains_key(&candidate) {
                return Ok(candidate);
            }
        }
        Err(SessionError::TokenSpaceExhausted { live })
    }

    /// `true` iff `id` is live and was issued to exactly `callsign`.
    pub fn validate(&self, callsign: &str, id: u32) -> bool {
        self.table
            .live
            .get(&id)
            .is_some_and(|token| token.callsign == callsign)
    }

    /// Removes `id` now and cancels its scheduled expiry. No-op for
    /// unknown or already-expired ids.
    pub fn expire(&mut self, id: u32) {
        if let Some(token) = self.table.remove(id) {
            self.expiries.cancel(&token.expiry);
            debug!(token = id, callsign = %token.callsign, "token revoked");
        }
    }

    /// Runs due expiries. Returns how many tokens expired.
    pub fn tick(&mut self, now: Instant) -> usize {
        self.expiries.poll(now, &mut self.table)
    }

    /// Number of live tokens.
    pub fn len(&self) -> usize {
        self.table.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.live.is_empty()
    }

    /// The configured token lifetime.
    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_skips_reserved_zero_on_wrap() {
        let mut tokens = TokenManager::with_first_id(DEFAULT_TOKEN_LIFETIME, u32::MAX);

        let a = tokens.issue("Alice").unwrap();
        let b = tokens.issue("Bob").unwrap();

        assert_eq!(a, u32::MAX);
        assert_eq!(b, 1);
    }

    #[test]
    fn test_allocate_skips_live_ids() {
        let mut tokens = TokenManager::with_first_id(DEFAULT_TOKEN_LIFETIME, 5);
        let first = tokens.issue("Alice").unwrap();
        // Force the counter back onto the live id.
        tokens.next_id = first;

        let second = tokens.issue("Bob").unwrap();

        assert_eq!(first, 5);
        assert_eq!(second, 6);
    }

    #[test]
    fn test_expire_cancels_scheduled_callback() {
        let mut tokens = TokenManager::with_first_id(Duration::from_secs(1), 1);
        let now = Instant::now();
        let id = tokens.issue_at("Alice", now).unwrap();

        tokens.expire(id);

        assert!(tokens.expiries.is_empty());
        assert_eq!(tokens.tick(now + Duration::from_secs(2)), 0);
    }
}

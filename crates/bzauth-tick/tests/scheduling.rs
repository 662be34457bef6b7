//! Integration tests for the housekeeping tick and the event scheduler.
//!
//! Tick tests use `start_paused = true` so `sleep_until` resolves as soon
//! as the runtime auto-advances the clock.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use bzauth_tick::{EventScheduler, TickConfig, TickScheduler};

// =========================================================================
// Helpers
// =========================================================================

fn config_10hz() -> TickConfig {
    TickConfig {
        initial_jitter_us: 0,
        ..TickConfig::with_rate(10)
    }
}

// =========================================================================
// TickConfig
// =========================================================================

#[test]
fn test_default_config_ticks_once_per_second() {
    let cfg = TickConfig::default();
    assert_eq!(cfg.tick_rate_hz, 1);
    assert_eq!(cfg.tick_duration(), Duration::from_secs(1));
}

#[test]
fn test_validated_zero_rate_becomes_one() {
    let cfg = TickConfig::with_rate(0).validated();
    assert_eq!(cfg.tick_rate_hz, 1);
}

#[test]
fn test_validated_caps_rate() {
    let cfg = TickConfig::with_rate(10_000).validated();
    assert_eq!(cfg.tick_rate_hz, TickConfig::MAX_TICK_RATE_HZ);
}

// =========================================================================
// TickScheduler
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_wait_for_tick_fires_and_increments() {
    let mut s = TickScheduler::new(config_10hz());

    let info = s.wait_for_tick().await;

    assert_eq!(info.tick, 1);
    assert!(!info.overrun);
    assert_eq!(info.ticks_skipped, 0);
    assert_eq!(s.tick_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_multiple_ticks_increment_monotonically() {
    let mut s = TickScheduler::new(config_10hz());

    for expected in 1..=5 {
        assert_eq!(s.wait_for_tick().await.tick, expected);
    }
}

#[tokio::test(start_paused = true)]
async fn test_late_tick_skips_instead_of_bursting() {
    let mut s = TickScheduler::new(config_10hz());
    s.wait_for_tick().await;

    // Stall for 5 tick periods.
    tokio::time::advance(Duration::from_millis(550)).await;
    let late = s.wait_for_tick().await;

    assert!(late.overrun);
    assert!(late.ticks_skipped >= 4, "skipped {}", late.ticks_skipped);
    assert_eq!(s.total_overruns(), 1);

    // The following tick is a full period away, not immediate.
    let before = tokio::time::Instant::now();
    s.wait_for_tick().await;
    assert!(tokio::time::Instant::now() - before >= Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn test_record_tick_end_without_wait_is_noop() {
    let mut s = TickScheduler::new(config_10hz());
    s.record_tick_end();
    assert_eq!(s.tick_count(), 0);
}

// =========================================================================
// EventScheduler: cancellation and ownership
// =========================================================================

#[test]
fn test_cancel_before_due_prevents_callback() {
    let mut sched: EventScheduler<u32> = EventScheduler::new();
    let t0 = Instant::now();
    let handle = sched.schedule(t0, Duration::from_secs(1), |n| *n += 1);

    assert!(handle.cancel());
    let mut n = 0;
    let fired = sched.poll(t0 + Duration::from_secs(2), &mut n);

    assert_eq!(fired, 0);
    assert_eq!(n, 0);
    assert!(sched.is_empty(), "cancelled entry is dropped on poll");
}

#[test]
fn test_cancel_is_idempotent_across_owners() {
    let mut sched: EventScheduler<u32> = EventScheduler::new();
    let handle = sched.schedule(Instant::now(), Duration::ZERO, |_| {});
    let other_owner = handle.clone();

    assert!(handle.cancel());
    assert!(!other_owner.cancel());
    assert!(!handle.cancel());
    assert!(!other_owner.is_pending());
}

#[test]
fn test_fired_event_is_no_longer_pending() {
    let mut sched: EventScheduler<u32> = EventScheduler::new();
    let t0 = Instant::now();
    let handle = sched.schedule(t0, Duration::ZERO, |n| *n += 1);

    let mut n = 0;
    sched.poll(t0, &mut n);

    assert_eq!(n, 1);
    assert!(!handle.is_pending());
    assert!(!handle.cancel(), "cancel after firing does nothing");
}

#[test]
fn test_dropping_handle_does_not_cancel() {
    let mut sched: EventScheduler<u32> = EventScheduler::new();
    let t0 = Instant::now();
    drop(sched.schedule(t0, Duration::ZERO, |n| *n += 1));

    let mut n = 0;
    sched.poll(t0, &mut n);

    assert_eq!(n, 1);
}

#[test]
fn test_weak_handle_cancels_while_alive() {
    let mut sched: EventScheduler<u32> = EventScheduler::new();
    let t0 = Instant::now();
    let weak = sched.schedule(t0, Duration::from_secs(1), |n| *n += 1).downgrade();

    assert!(weak.upgrade().is_some(), "queue keeps the entry alive");
    assert!(weak.cancel());

    let mut n = 0;
    sched.poll(t0 + Duration::from_secs(1), &mut n);

    assert_eq!(n, 0);
    assert!(weak.upgrade().is_none(), "last owner gone after poll");
    assert!(!weak.cancel());
}

#[test]
fn test_last_owner_drop_frees_captured_state() {
    let drops = Arc::new(AtomicUsize::new(0));

    struct Guard(Arc<AtomicUsize>);
    impl Drop for Guard {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let mut sched: EventScheduler<u32> = EventScheduler::new();
    let t0 = Instant::now();
    let guard = Guard(Arc::clone(&drops));
    let handle = sched.schedule(t0, Duration::from_secs(1), move |_| drop(guard));

    // Cancelling takes the callback out, which drops what it captured.
    handle.cancel();
    assert_eq!(drops.load(Ordering::SeqCst), 1);

    sched.poll(t0 + Duration::from_secs(1), &mut 0);
    assert_eq!(handle.owners(), 1);
}

#[test]
fn test_zero_delay_fires_after_epsilon() {
    let mut sched: EventScheduler<bool> = EventScheduler::new();
    let t0 = Instant::now();
    sched.schedule(t0, Duration::ZERO, |expired| *expired = true);

    let mut expired = false;
    sched.poll(t0 + Duration::from_nanos(1), &mut expired);

    assert!(expired);
}

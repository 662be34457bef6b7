//! Housekeeping ticks and one-shot timers for bzauthd.
//!
//! Two pieces live here:
//!
//! - [`TickScheduler`]: a fixed-rate heartbeat. The daemon runs one in a
//!   background task and, on every tick, advances anything time-driven
//!   (token expiry, for now).
//! - [`EventScheduler`]: an ordered queue of one-shot callbacks keyed by
//!   fire time. Each entry is shared between the queue and any number of
//!   [`EventHandle`]s, so whichever owner cancels first wins and the entry
//!   is freed when the last reference drops.
//!
//! # Integration
//!
//! ```ignore
//! let mut ticks = TickScheduler::with_rate(1);
//! loop {
//!     tokio::select! {
//!         _ = ticks.wait_for_tick() => {
//!             tokens.lock().await.tick(Instant::now());
//!             ticks.record_tick_end();
//!         }
//!         _ = shutdown.changed() => break,
//!     }
//! }
//! ```

mod event;

pub use event::{EventHandle, EventScheduler, WeakEventHandle};

use std::time::{Duration, Instant};

use rand::Rng;
use tokio::time::{self, Instant as TokioInstant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for the housekeeping tick.
#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Tick rate in Hz. Must be at least 1.
    pub tick_rate_hz: u32,
    /// Fraction of the tick budget (0.0–1.0) above which a warning is logged.
    pub budget_warn_threshold: f64,
    /// Random jitter (0–max µs) added to the first tick so several daemons
    /// started together do not sweep in lockstep.
    pub initial_jitter_us: u64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 1,
            budget_warn_threshold: 0.80,
            initial_jitter_us: 2_000,
        }
    }
}

impl TickConfig {
    /// Maximum supported tick rate.
    pub const MAX_TICK_RATE_HZ: u32 = 128;

    /// Create a config for a specific tick rate with default settings.
    pub fn with_rate(tick_rate_hz: u32) -> Self {
        Self {
            tick_rate_hz,
            ..Default::default()
        }
    }

    /// Clamp out-of-range values so the config is safe to use.
    ///
    /// A rate of 0 becomes 1 (housekeeping must always run) and anything
    /// above [`Self::MAX_TICK_RATE_HZ`] is capped.
    pub fn validated(mut self) -> Self {
        if self.tick_rate_hz == 0 {
            warn!("tick_rate_hz of 0 would stop housekeeping, using 1");
            self.tick_rate_hz = 1;
        }
        if self.tick_rate_hz > Self::MAX_TICK_RATE_HZ {
            warn!(
                rate = self.tick_rate_hz,
                max = Self::MAX_TICK_RATE_HZ,
                "tick_rate_hz exceeds maximum, clamping"
            );
            self.tick_rate_hz = Self::MAX_TICK_RATE_HZ;
        }
        self.budget_warn_threshold = self.budget_warn_threshold.clamp(0.0, 1.0);
        self
    }

    /// Duration of a single tick.
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate_hz.max(1) as f64)
    }
}

// ---------------------------------------------------------------------------
// Tick info
// ---------------------------------------------------------------------------

/// Information about a tick, returned by [`TickScheduler::wait_for_tick`].
#[derive(Debug, Clone)]
pub struct TickInfo {
    /// Monotonically increasing tick number (starts at 1).
    pub tick: u64,
    /// Wall-clock instant the tick fired. Feed this to
    /// [`EventScheduler::poll`].
    pub now: Instant,
    /// `true` if the tick fired noticeably late.
    pub overrun: bool,
    /// How many whole ticks were skipped because of the overrun.
    pub ticks_skipped: u64,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Fixed-rate tick scheduler.
///
/// A late tick never triggers a burst of catch-up ticks: the next deadline
/// is always computed from the moment the late tick actually fired. Expiry
/// work is idempotent with respect to "now", so skipping is always safe.
pub struct TickScheduler {
    config: TickConfig,
    tick_duration: Duration,
    tick_count: u64,
    next_tick: TokioInstant,
    /// Set by `wait_for_tick`, consumed by `record_tick_end`.
    tick_start: Option<Instant>,
    total_overruns: u64,
}

impl TickScheduler {
    pub fn new(config: TickConfig) -> Self {
        let config = config.validated();
        let tick_duration = config.tick_duration();

        let jitter = if config.initial_jitter_us > 0 {
            Duration::from_micros(rand::rng().random_range(0..config.initial_jitter_us))
        } else {
            Duration::ZERO
        };

        debug!(
            rate_hz = config.tick_rate_hz,
            budget_ms = tick_duration.as_secs_f64() * 1000.0,
            "tick scheduler created"
        );

        Self {
            next_tick: TokioInstant::now() + tick_duration + jitter,
            config,
            tick_duration,
            tick_count: 0,
            tick_start: None,
            total_overruns: 0,
        }
    }

    /// Create a scheduler for a specific tick rate with default settings.
    pub fn with_rate(tick_rate_hz: u32) -> Self {
        Self::new(TickConfig::with_rate(tick_rate_hz))
    }

    /// Wait until the next tick is due.
    pub async fn wait_for_tick(&mut self) -> TickInfo {
        let due = self.next_tick;
        time::sleep_until(due).await;

        let fired = TokioInstant::now();
        self.tick_count += 1;
        let now = Instant::now();
        self.tick_start = Some(now);

        let late_by = fired.saturating_duration_since(due);
        let overrun = late_by > self.tick_duration / 10;
        let mut ticks_skipped = 0u64;
        if overrun {
            self.total_overruns += 1;
            ticks_skipped = (late_by.as_nanos() / self.tick_duration.as_nanos()) as u64;
            if ticks_skipped > 0 {
                warn!(
                    tick = self.tick_count,
                    skipped = ticks_skipped,
                    late_ms = late_by.as_secs_f64() * 1000.0,
                    "tick overrun, skipping ahead"
                );
            }
        }
        self.next_tick = fired + self.tick_duration;

        trace!(tick = self.tick_count, overrun, "tick fired");

        TickInfo {
            tick: self.tick_count,
            now,
            overrun,
            ticks_skipped,
        }
    }

    /// Record that the work for the current tick has finished.
    ///
    /// Logs a warning when the work used more than the configured share of
    /// the tick budget. A no-op if called twice for the same tick.
    pub fn record_tick_end(&mut self) {
        let Some(start) = self.tick_start.take() else {
            return;
        };
        let elapsed = start.elapsed();
        let utilization = elapsed.as_secs_f64() / self.tick_duration.as_secs_f64();

        if utilization >= 1.0 {
            warn!(
                tick = self.tick_count,
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                budget_ms = self.tick_duration.as_secs_f64() * 1000.0,
                "CRITICAL: tick exceeded budget"
            );
        } else if utilization >= self.config.budget_warn_threshold {
            warn!(
                tick = self.tick_count,
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                budget_ms = self.tick_duration.as_secs_f64() * 1000.0,
                "tick approaching budget limit"
            );
        }
    }

    /// Current tick count.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Ticks that fired late since startup.
    pub fn total_overruns(&self) -> u64 {
        self.total_overruns
    }

    /// The configured tick rate in Hz.
    pub fn tick_rate_hz(&self) -> u32 {
        self.config.tick_rate_hz
    }

    /// The fixed tick duration.
    pub fn tick_duration(&self) -> Duration {
        self.tick_duration
    }
}

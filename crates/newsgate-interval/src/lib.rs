//! Revalidation interval timer for Newsgate.
//!
//! One [`RevalidationTimer`] drives one session's revalidation loop. It
//! decides *when* the next check happens; it knows nothing about what a
//! check does.
//!
//! # Policies
//!
//! - [`MissedTickPolicy::Delay`] (default): the next tick is due one full
//!   interval after the previous check *finished*. Checks can never
//!   overlap or bunch up, and the time between a credential change and
//!   the check that notices it is at most `interval + check duration`.
//! - [`MissedTickPolicy::Skip`]: fixed-rate cadence. If a slow check ran
//!   past one or more due ticks, those ticks are skipped (counted and
//!   logged) rather than fired back to back.
//!
//! # Integration
//!
//! The timer is meant to sit inside a `tokio::select!` next to a
//! cancellation branch:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         biased;
//!         _ = cancel.cancelled() => break,
//!         _ = timer.wait_for_tick() => {}
//!     }
//!     let outcome = check().await;
//!     timer.record_check_end();
//! }
//! ```
//!
//! `wait_for_tick` only awaits a `sleep_until`, so dropping it mid-wait
//! (the cancel branch won) leaves the timer consistent.

use std::time::Duration;

use rand::Rng;
use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// What to do when a check runs long.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissedTickPolicy {
    /// Measure the next interval from the end of the previous check.
    #[default]
    Delay,
    /// Keep a fixed cadence and skip ticks a slow check overran.
    Skip,
}

/// Full configuration for the timer.
#[derive(Debug, Clone)]
pub struct TimerConfig {
    /// Time between checks. Default: 20 seconds.
    pub interval: Duration,
    /// Missed-tick handling.
    pub policy: MissedTickPolicy,
    /// Fraction of the interval (0.0–1.0) a single check may take before
    /// a warning is logged. Default: 0.5.
    pub budget_warn_threshold: f64,
    /// Collect check-duration metrics.
    pub metrics_enabled: bool,
    /// Upper bound for a random delay added to the *first* tick only, so
    /// sessions opened in the same instant don't all hit the store in the
    /// same instant forever after. Default: zero.
    pub initial_jitter: Duration,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            interval: Self::DEFAULT_INTERVAL,
            policy: MissedTickPolicy::default(),
            budget_warn_threshold: 0.5,
            metrics_enabled: true,
            initial_jitter: Duration::ZERO,
        }
    }
}

impl TimerConfig {
    /// Interval used when none (or zero) is configured.
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(20);

    /// Smallest accepted non-zero interval.
    pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

    /// A config for a specific interval with defaults elsewhere.
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            ..Default::default()
        }
    }

    /// Clamp and fix out-of-range values.
    ///
    /// Called automatically by [`RevalidationTimer::new`]. Rules:
    /// - zero `interval` → [`Self::DEFAULT_INTERVAL`]
    /// - non-zero `interval` below [`Self::MIN_INTERVAL`] → `MIN_INTERVAL`
    /// - `budget_warn_threshold` clamped to `0.0..=1.0`
    /// - `initial_jitter` capped at `interval`
    pub fn validated(mut self) -> Self {
        if self.interval.is_zero() {
            warn!(
                default_secs = Self::DEFAULT_INTERVAL.as_secs(),
                "revalidation interval is zero, using default"
            );
            self.interval = Self::DEFAULT_INTERVAL;
        } else if self.interval < Self::MIN_INTERVAL {
            warn!(
                interval_us = self.interval.as_micros() as u64,
                "revalidation interval below minimum, clamping"
            );
            self.interval = Self::MIN_INTERVAL;
        }
        self.budget_warn_threshold = self.budget_warn_threshold.clamp(0.0, 1.0);
        if self.initial_jitter > self.interval {
            self.initial_jitter = self.interval;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Tick info
// ---------------------------------------------------------------------------

/// Information about a fired tick, returned by
/// [`RevalidationTimer::wait_for_tick`].
#[derive(Debug, Clone)]
pub struct TickInfo {
    /// Monotonically increasing tick number (starts at 1).
    pub tick: u64,
    /// How far past its due time the tick fired.
    pub late_by: Duration,
    /// `true` when `late_by` exceeds a tenth of the interval.
    pub overrun: bool,
    /// Ticks skipped under [`MissedTickPolicy::Skip`] (0 otherwise).
    pub ticks_skipped: u64,
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Runtime metrics for one timer.
///
/// Check durations come from [`RevalidationTimer::record_check_end`] and
/// are measured on the tokio clock, so paused-time tests see exactly the
/// time they advanced.
#[derive(Debug, Clone, Default)]
pub struct TimerMetrics {
    pub total_ticks: u64,
    pub total_overruns: u64,
    pub total_skipped: u64,
    /// Exponential moving average of check duration (α = 0.1).
    pub avg_check_time: Duration,
    pub max_check_time: Duration,
    /// Last check duration divided by the interval.
    pub budget_utilization: f64,
}

// ---------------------------------------------------------------------------
// Timer
// ---------------------------------------------------------------------------

/// Interval timer for one revalidation loop.
pub struct RevalidationTimer {
    config: TimerConfig,
    tick_count: u64,
    /// When the next tick is due.
    next_tick: Instant,
    /// Set by `wait_for_tick`, consumed by `record_check_end`.
    check_start: Option<Instant>,
    metrics: TimerMetrics,
}

impl RevalidationTimer {
    /// Creates a timer. The first tick is due one interval from now (plus
    /// jitter, if configured).
    pub fn new(config: TimerConfig) -> Self {
        let config = config.validated();

        let jitter = if config.initial_jitter.is_zero() {
            Duration::ZERO
        } else {
            let max_us = config.initial_jitter.as_micros().max(1) as u64;
            Duration::from_micros(rand::rng().random_range(0..max_us))
        };
        let next_tick = Instant::now() + config.interval + jitter;

        debug!(
            interval_ms = config.interval.as_millis() as u64,
            jitter_ms = jitter.as_millis() as u64,
            policy = ?config.policy,
            "revalidation timer created"
        );

        Self {
            config,
            tick_count: 0,
            next_tick,
            check_start: None,
            metrics: TimerMetrics::default(),
        }
    }

    /// A timer for `interval` with default settings.
    pub fn with_interval(interval: Duration) -> Self {
        Self::new(TimerConfig::with_interval(interval))
    }

    /// Waits until the next tick is due.
    ///
    /// Cancel-safe: the only await is a `sleep_until`, and no state
    /// changes before it completes.
    pub async fn wait_for_tick(&mut self) -> TickInfo {
        let scheduled = self.next_tick;
        time::sleep_until(scheduled).await;

        let now = Instant::now();
        let interval = self.config.interval;
        self.tick_count += 1;
        self.check_start = Some(now);

        let late_by = now.saturating_duration_since(scheduled);
        let overrun = late_by > interval / 10;
        let mut ticks_skipped = 0u64;

        self.next_tick = match self.config.policy {
            // Provisional; record_check_end moves it to end-of-check.
            MissedTickPolicy::Delay => now + interval,
            MissedTickPolicy::Skip => {
                if late_by >= interval {
                    ticks_skipped = (late_by.as_nanos() / interval.as_nanos()) as u64;
                    warn!(
                        tick = self.tick_count,
                        skipped = ticks_skipped,
                        late_ms = late_by.as_millis() as u64,
                        "revalidation tick overrun, skipping ahead"
                    );
                    now + interval
                } else {
                    scheduled + interval
                }
            }
        };

        if overrun {
            self.metrics.total_overruns += 1;
        }
        self.metrics.total_skipped += ticks_skipped;
        self.metrics.total_ticks += 1;

        trace!(tick = self.tick_count, overrun, "revalidation tick fired");

        TickInfo {
            tick: self.tick_count,
            late_by,
            overrun,
            ticks_skipped,
        }
    }

    /// Records that the check for the current tick finished.
    ///
    /// Under [`MissedTickPolicy::Delay`] this is what schedules the next
    /// tick. A call without a preceding tick is a no-op.
    pub fn record_check_end(&mut self) {
        let Some(start) = self.check_start.take() else {
            return;
        };
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(start);
        let interval = self.config.interval;

        if self.config.policy == MissedTickPolicy::Delay {
            self.next_tick = now + interval;
        }

        let utilization = elapsed.as_secs_f64() / interval.as_secs_f64();
        self.metrics.budget_utilization = utilization;
        if utilization >= self.config.budget_warn_threshold && !elapsed.is_zero() {
            warn!(
                tick = self.tick_count,
                elapsed_ms = elapsed.as_millis() as u64,
                interval_ms = interval.as_millis() as u64,
                utilization_pct = format!("{:.1}", utilization * 100.0),
                "revalidation check is slow relative to its interval"
            );
        }

        if self.config.metrics_enabled {
            if elapsed > self.metrics.max_check_time {
                self.metrics.max_check_time = elapsed;
            }
            let alpha = 0.1;
            let prev = self.metrics.avg_check_time.as_secs_f64();
            let curr = elapsed.as_secs_f64();
            self.metrics.avg_check_time =
                Duration::from_secs_f64(prev * (1.0 - alpha) + curr * alpha);
        }
    }

    /// Number of ticks fired so far.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// When the next tick is due.
    pub fn next_tick_at(&self) -> Instant {
        self.next_tick
    }

    /// The (validated) interval.
    pub fn interval(&self) -> Duration {
        self.config.interval
    }

    pub fn policy(&self) -> MissedTickPolicy {
        self.config.policy
    }

    pub fn metrics(&self) -> &TimerMetrics {
        &self.metrics
    }
}

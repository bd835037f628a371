//! # Tick Clock
//!
//! Fixed-rate pacer for the simulation loop.
//!
//! ## Design
//!
//! - Deadlines advance by whole ticks from a fixed epoch, so pacing does not
//!   drift
//! - A loop that falls more than one tick behind restarts its deadline from
//!   now instead of bursting to catch up; the coordinator's own catch-up
//!   handles backlog
//! - Elapsed time is reported in whole milliseconds measured from the epoch,
//!   so truncation never accumulates

use std::time::{Duration, Instant};

/// Tick timing statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickStats {
    /// Ticks taken.
    pub total_ticks: u64,
    /// Ticks that started more than one tick late.
    pub late_ticks: u64,
    /// Largest lateness observed, in milliseconds.
    pub max_late_ms: u64,
}

/// Fixed-rate simulation pacer.
pub struct TickClock {
    tick: Duration,
    epoch: Instant,
    deadline: Instant,
    last_ms: u64,
    stats: TickStats,
}

impl TickClock {
    /// Creates a clock ticking every `tick_ms` milliseconds.
    #[must_use]
    pub fn new(tick_ms: u32) -> Self {
        let tick = Duration::from_millis(u64::from(tick_ms.max(1)));
        let epoch = Instant::now();
        Self {
            tick,
            epoch,
            deadline: epoch + tick,
            last_ms: 0,
            stats: TickStats::default(),
        }
    }

    /// Milliseconds since the clock was created.
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Sleeps until the next tick is due.
    ///
    /// Returns `(now_ms, elapsed_ms)` for `eval_frame`.
    pub fn wait_for_next_tick(&mut self) -> (u64, u64) {
        let now = Instant::now();
        if now < self.deadline {
            std::thread::sleep(self.deadline - now);
            self.deadline += self.tick;
        } else {
            let late = now - self.deadline;
            if late > self.tick {
                self.stats.late_ticks += 1;
                self.stats.max_late_ms = self
                    .stats
                    .max_late_ms
                    .max(u64::try_from(late.as_millis()).unwrap_or(u64::MAX));
                self.deadline = now + self.tick;
            } else {
                self.deadline += self.tick;
            }
        }
        self.stats.total_ticks += 1;

        let now_ms = self.now_ms();
        let elapsed_ms = now_ms.saturating_sub(self.last_ms);
        self.last_ms = now_ms;
        (now_ms, elapsed_ms)
    }

    /// Returns the tick duration.
    #[must_use]
    pub const fn tick_duration(&self) -> Duration {
        self.tick
    }

    /// Returns tick statistics.
    #[must_use]
    pub const fn stats(&self) -> &TickStats {
        &self.stats
    }
}

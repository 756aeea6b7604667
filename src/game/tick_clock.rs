//! Fixed-timestep tick clock and the shared tick counter

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

/// Simulation tick number
///
/// Wraps at `u32::MAX`. At 30 Hz that is over four years of uptime, so no
/// code path handles the wrap specially.
pub type TickNum = u32;

/// Signed distance from `base` to `tick`, correct across the wrap
#[inline]
pub fn tick_delta(tick: TickNum, base: TickNum) -> i32 {
    tick.wrapping_sub(base) as i32
}

/// Process-wide tick counter shared with the network and logging layers
#[derive(Debug, Clone, Default)]
pub struct SharedTick(Arc<AtomicU32>);

impl SharedTick {
    pub fn new(start: TickNum) -> Self {
        Self(Arc::new(AtomicU32::new(start)))
    }

    #[inline]
    pub fn get(&self) -> TickNum {
        self.0.load(Ordering::Acquire)
    }

    /// Advance by one tick, returning the new value
    #[inline]
    pub fn increment(&self) -> TickNum {
        self.0.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockState {
    /// Nothing accumulated yet
    Idle,
    /// Some time accumulated, less than one interval
    Accumulating,
    /// At least one tick is due
    Ready,
}

/// Accumulates wall time and releases it one tick interval at a time
///
/// Catch-up is bounded: if a full interval is still pending after a tick is
/// consumed, the backlog is logged as a stall and discarded.
#[derive(Debug)]
pub struct TickClock {
    interval: Duration,
    accumulated: Duration,
    stalls: u64,
}

impl TickClock {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            accumulated: Duration::ZERO,
            stalls: 0,
        }
    }

    pub fn from_rate(tick_rate: u32) -> Self {
        Self::new(Duration::from_secs_f64(1.0 / tick_rate.max(1) as f64))
    }

    #[inline]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    #[inline]
    pub fn accumulated(&self) -> Duration {
        self.accumulated
    }

    pub fn state(&self) -> ClockState {
        if self.accumulated >= self.interval {
            ClockState::Ready
        } else if self.accumulated.is_zero() {
            ClockState::Idle
        } else {
            ClockState::Accumulating
        }
    }

    /// Add elapsed wall time
    pub fn advance(&mut self, elapsed: Duration) {
        self.accumulated += elapsed;
    }

    /// Consume one tick interval if one is due
    ///
    /// Returns true when the caller should run exactly one tick.
    pub fn consume_tick(&mut self) -> bool {
        if self.accumulated < self.interval {
            return false;
        }
        self.accumulated -= self.interval;

        if self.accumulated >= self.interval {
            warn!(
                "Tick clock stalled: {:.1}ms behind (interval {:.1}ms), dropping backlog",
                self.accumulated.as_secs_f64() * 1000.0,
                self.interval.as_secs_f64() * 1000.0
            );
            self.stalls += 1;
            self.accumulated = Duration::ZERO;
        }
        true
    }

    pub fn stall_count(&self) -> u64 {
        self.stalls
    }

    /// Time until the next tick becomes due
    pub fn time_until_ready(&self) -> Duration {
        self.interval.saturating_sub(self.accumulated)
    }
}

//! Tick budget monitoring
//!
//! Keeps a rolling window of tick durations and grades them against the
//! tick interval. The server loop logs when the grade changes.

use std::collections::VecDeque;
use std::time::Duration;

/// Samples needed before the status is trusted
const MIN_SAMPLES: usize = 10;

/// Performance status levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformanceStatus {
    /// Under 30% of the tick budget
    Excellent,
    /// Under 70% of the tick budget
    Good,
    /// Under 100% of the tick budget
    Warning,
    /// Ticks are overrunning the interval
    Critical,
}

impl PerformanceStatus {
    /// Whether the simulation keeps up with the tick rate
    pub fn within_budget(&self) -> bool {
        !matches!(self, PerformanceStatus::Critical)
    }
}

/// Performance monitor that tracks tick durations
pub struct PerformanceMonitor {
    /// Rolling window of tick durations
    tick_durations: VecDeque<Duration>,
    /// Maximum samples to keep
    max_samples: usize,
    /// Target tick duration (budget)
    target_tick_duration: Duration,
    status: PerformanceStatus,
    /// Entity count at last measurement
    last_entity_count: usize,
}

impl PerformanceMonitor {
    pub fn new(tick_rate: u32) -> Self {
        let target_tick_duration = Duration::from_secs_f32(1.0 / tick_rate.max(1) as f32);
        // ~4 seconds of history
        let max_samples = (tick_rate as usize * 4).max(MIN_SAMPLES);

        Self {
            tick_durations: VecDeque::with_capacity(max_samples),
            max_samples,
            target_tick_duration,
            status: PerformanceStatus::Excellent,
            last_entity_count: 0,
        }
    }

    /// Record a tick duration and the live entity count after it.
    /// Returns the new status if it changed.
    pub fn record_tick(
        &mut self,
        duration: Duration,
        entity_count: usize,
    ) -> Option<PerformanceStatus> {
        self.last_entity_count = entity_count;
        self.tick_durations.push_back(duration);
        while self.tick_durations.len() > self.max_samples {
            self.tick_durations.pop_front();
        }

        let previous = self.status;
        self.update_status();
        (self.status != previous).then_some(self.status)
    }

    fn update_status(&mut self) {
        if self.tick_durations.len() < MIN_SAMPLES {
            return;
        }

        let ratio = self.budget_usage_percent() / 100.0;
        self.status = if ratio < 0.3 {
            PerformanceStatus::Excellent
        } else if ratio < 0.7 {
            PerformanceStatus::Good
        } else if ratio < 1.0 {
            PerformanceStatus::Warning
        } else {
            PerformanceStatus::Critical
        };
    }

    pub fn average_tick_duration(&self) -> Duration {
        if self.tick_durations.is_empty() {
            return Duration::ZERO;
        }
        let sum: Duration = self.tick_durations.iter().sum();
        sum / self.tick_durations.len() as u32
    }

    /// 95th percentile tick duration over the window
    pub fn p95_tick_duration(&self) -> Duration {
        let mut sorted: Vec<_> = self.tick_durations.iter().copied().collect();
        sorted.sort_unstable();
        let idx = (sorted.len() as f32 * 0.95) as usize;
        sorted
            .get(idx.min(sorted.len().saturating_sub(1)))
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    pub fn status(&self) -> PerformanceStatus {
        self.status
    }

    /// Budget usage as percentage (0-100+)
    pub fn budget_usage_percent(&self) -> f32 {
        let avg = self.average_tick_duration();
        (avg.as_secs_f32() / self.target_tick_duration.as_secs_f32()) * 100.0
    }

    pub fn last_entity_count(&self) -> usize {
        self.last_entity_count
    }

    pub fn status_message(&self) -> String {
        format!(
            "{:?} - {:.1}% budget (p95 {:.2}ms), {} entities",
            self.status,
            self.budget_usage_percent(),
            self.p95_tick_duration().as_secs_f64() * 1000.0,
            self.last_entity_count
        )
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(crate::game::constants::sim::TICK_RATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(monitor: &mut PerformanceMonitor, per_tick: Duration, n: usize) {
        for _ in 0..n {
            monitor.record_tick(per_tick, 0);
        }
    }

    #[test]
    fn test_starts_excellent() {
        let monitor = PerformanceMonitor::new(30);
        assert_eq!(monitor.status(), PerformanceStatus::Excellent);
        assert_eq!(monitor.p95_tick_duration(), Duration::ZERO);
    }

    #[test]
    fn test_status_needs_samples() {
        let mut monitor = PerformanceMonitor::new(30);
        fill(&mut monitor, Duration::from_millis(100), MIN_SAMPLES - 1);
        assert_eq!(monitor.status(), PerformanceStatus::Excellent);
        assert_eq!(
            monitor.record_tick(Duration::from_millis(100), 0),
            Some(PerformanceStatus::Critical)
        );
    }

    #[test]
    fn test_grades() {
        // 30 Hz budget is ~33.3ms
        let cases = [
            (5, PerformanceStatus::Excellent),
            (15, PerformanceStatus::Good),
            (28, PerformanceStatus::Warning),
            (40, PerformanceStatus::Critical),
        ];
        for (ms, expected) in cases {
            let mut monitor = PerformanceMonitor::new(30);
            fill(&mut monitor, Duration::from_millis(ms), 20);
            assert_eq!(monitor.status(), expected, "{}ms", ms);
        }
        assert!(!PerformanceStatus::Critical.within_budget());
        assert!(PerformanceStatus::Warning.within_budget());
    }

    #[test]
    fn test_change_reported_once() {
        let mut monitor = PerformanceMonitor::new(30);
        fill(&mut monitor, Duration::from_millis(15), 20);
        assert_eq!(monitor.record_tick(Duration::from_millis(15), 0), None);
    }

    #[test]
    fn test_entity_count_in_status() {
        let mut monitor = PerformanceMonitor::new(30);
        monitor.record_tick(Duration::from_millis(2), 10);
        monitor.record_tick(Duration::from_millis(4), 12);

        assert_eq!(monitor.average_tick_duration(), Duration::from_millis(3));
        assert_eq!(monitor.last_entity_count(), 12);
        assert!(monitor.status_message().ends_with("12 entities"));
    }
}

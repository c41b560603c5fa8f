use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;

/// Samples kept per region unless configured otherwise.
pub const DEFAULT_STATS_WINDOW: usize = 200;

/// Rolling window of tick durations for one region.
#[derive(Debug, Clone)]
pub struct TickStats {
    samples: VecDeque<Duration>,
    capacity: usize,
    total: Duration,
    recorded: u64,
}

impl Default for TickStats {
    fn default() -> Self {
        Self::new(DEFAULT_STATS_WINDOW)
    }
}

impl TickStats {
    /// A window of `capacity` samples. A zero capacity is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            total: Duration::ZERO,
            recorded: 0,
        }
    }

    pub fn record(&mut self, dt: Duration) {
        if self.samples.len() == self.capacity {
            if let Some(oldest) = self.samples.pop_front() {
                self.total -= oldest;
            }
        }
        self.samples.push_back(dt);
        self.total += dt;
        self.recorded += 1;
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.total = Duration::ZERO;
    }

    /// Samples currently in the window.
    pub fn count(&self) -> usize {
        self.samples.len()
    }

    /// Ticks recorded since creation, including those evicted from the window.
    pub fn recorded(&self) -> u64 {
        self.recorded
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn last(&self) -> Duration {
        self.samples.back().copied().unwrap_or(Duration::ZERO)
    }

    pub fn average(&self) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        self.total / self.samples.len() as u32
    }

    pub fn max(&self) -> Duration {
        self.samples.iter().copied().max().unwrap_or(Duration::ZERO)
    }

    pub fn min(&self) -> Duration {
        self.samples.iter().copied().min().unwrap_or(Duration::ZERO)
    }

    pub fn snapshot(&self) -> TickStatsSnapshot {
        TickStatsSnapshot {
            samples: self.count(),
            recorded: self.recorded,
            average_ms: as_millis(self.average()),
            last_ms: as_millis(self.last()),
            min_ms: as_millis(self.min()),
            max_ms: as_millis(self.max()),
        }
    }
}

fn as_millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Immutable view of a [`TickStats`] window, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TickStatsSnapshot {
    pub samples: usize,
    pub recorded: u64,
    pub average_ms: f64,
    pub last_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

impl std::fmt::Display for TickStatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ticks={} avg={:.3}ms last={:.3}ms min={:.3}ms max={:.3}ms",
            self.recorded, self.average_ms, self.last_ms, self.min_ms, self.max_ms
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn empty_window_reports_zero() {
        let stats = TickStats::new(4);
        assert!(stats.is_empty());
        assert_eq!(stats.average(), Duration::ZERO);
        assert_eq!(stats.max(), Duration::ZERO);
        assert_eq!(stats.last(), Duration::ZERO);
    }

    #[test]
    fn window_evicts_oldest() {
        let mut stats = TickStats::new(3);
        for n in [10, 20, 30, 40] {
            stats.record(ms(n));
        }
        assert_eq!(stats.count(), 3);
        assert_eq!(stats.recorded(), 4);
        assert_eq!(stats.min(), ms(20));
        assert_eq!(stats.max(), ms(40));
        assert_eq!(stats.average(), ms(30));
        assert_eq!(stats.last(), ms(40));
    }

    #[test]
    fn zero_capacity_holds_one_sample() {
        let mut stats = TickStats::new(0);
        stats.record(ms(5));
        stats.record(ms(7));
        assert_eq!(stats.capacity(), 1);
        assert_eq!(stats.average(), ms(7));
    }

    #[test]
    fn snapshot_in_millis() {
        let mut stats = TickStats::default();
        stats.record(ms(2));
        stats.record(ms(4));
        let snap = stats.snapshot();
        assert_eq!(snap.samples, 2);
        assert!((snap.average_ms - 3.0).abs() < 1e-9);
        assert!((snap.max_ms - 4.0).abs() < 1e-9);

        stats.clear();
        assert_eq!(stats.snapshot().samples, 0);
        assert_eq!(stats.snapshot().recorded, 2);
    }
}

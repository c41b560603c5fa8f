use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::stats::DEFAULT_STATS_WINDOW;

/// Errors raised while configuring or starting the scheduler.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("worker_threads must be positive")]
    NoWorkers,
    #[error("tick_interval_ms must be positive")]
    ZeroTickInterval,
    #[error("watchdog_interval_ms must be positive")]
    ZeroWatchdogInterval,
    #[error("scheduler is already running")]
    AlreadyRunning,
    #[error("failed to spawn scheduler thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Worker threads ticking regions in parallel.
    pub worker_threads: usize,
    /// Target period of one scheduling round.
    pub tick_interval_ms: u64,
    /// Region ticks longer than this are logged at warn level.
    pub slow_tick_warning_ms: u64,
    /// Tick durations kept per region.
    pub stats_window: usize,
    /// How often the watchdog thread looks at running ticks.
    pub watchdog_interval_ms: u64,
    /// A tick still running after this long is reported as stuck, and again
    /// every further period while it keeps running.
    pub stuck_tick_warning_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: 4,
            tick_interval_ms: 50,
            slow_tick_warning_ms: 100,
            stats_window: DEFAULT_STATS_WINDOW,
            watchdog_interval_ms: 1_000,
            stuck_tick_warning_ms: 5_000,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.worker_threads == 0 {
            return Err(SchedulerError::NoWorkers);
        }
        if self.tick_interval_ms == 0 {
            return Err(SchedulerError::ZeroTickInterval);
        }
        if self.watchdog_interval_ms == 0 {
            return Err(SchedulerError::ZeroWatchdogInterval);
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn slow_tick_warning(&self) -> Duration {
        Duration::from_millis(self.slow_tick_warning_ms)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }

    pub fn stuck_tick_warning(&self) -> Duration {
        Duration::from_millis(self.stuck_tick_warning_ms)
    }
}

//! Region worker dispatch.
//!
//! A [`TickScheduler`] ticks every READY region of a [`Regionizer`] once per
//! round, either synchronously ([`TickScheduler::run_round`]) or on a pool of
//! worker threads fed over a channel ([`TickScheduler::start`]).
//!
//! # Invariants
//! - A region is ticked by at most one thread at a time; the claim is the
//!   regionizer's READY to TICKING transition.
//! - Queued tasks run on the ticking thread before the region tick, and only
//!   for chunks the region owns. Others are rerouted to the current owner.
//! - Every successful `try_mark_ticking` is paired with `mark_not_ticking`,
//!   also when the tick panics.
//! - While a region ticks, it is the worker thread's current region (see
//!   [`current`]). A watchdog thread warns about ticks that run too long.
//!
//! [`Regionizer`]: tickspace_region::Regionizer

pub mod config;
pub mod current;
pub mod scheduler;
pub mod stats;
pub mod tick_data;

pub use config::{SchedulerConfig, SchedulerError};
pub use current::{current_region_id, is_region_thread, owns_chunk};
pub use scheduler::{
    RegionTicker, RoundReport, RunningTick, SchedulerHandle, SchedulerTotals, TickScheduler,
};
pub use stats::{TickStats, TickStatsSnapshot, DEFAULT_STATS_WINDOW};
pub use tick_data::{TickData, TickDataController};

pub fn crate_info() -> &'static str {
    "tickspace-sched v0.1.0"
}

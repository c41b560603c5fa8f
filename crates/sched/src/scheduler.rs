use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{after, select, tick, unbounded, Receiver, Sender};
use serde::Serialize;
use tickspace_region::{Region, Regionizer};
use tickspace_tools::debug::{self, DebugCategory};

use crate::config::{SchedulerConfig, SchedulerError};
use crate::current;
use crate::stats::{TickStats, TickStatsSnapshot};

/// Caller tick logic, run while the region is TICKING on one worker thread.
pub trait RegionTicker<D>: Send + Sync {
    fn tick(&self, region: &Region<D>);
}

impl<D, F> RegionTicker<D> for F
where
    F: Fn(&Region<D>) + Send + Sync,
{
    fn tick(&self, region: &Region<D>) {
        self(region)
    }
}

/// What one scheduling round did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundReport {
    pub ticked: usize,
    /// Regions that were not READY when their turn came.
    pub skipped: usize,
    pub tasks_run: u64,
    pub tasks_rerouted: u64,
    pub tasks_dropped: u64,
    pub elapsed: Duration,
}

/// Lifetime counters of a scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerTotals {
    pub rounds: u64,
    pub ticks: u64,
    pub tasks_run: u64,
    pub tasks_rerouted: u64,
    pub tasks_dropped: u64,
    pub slow_ticks: u64,
    /// Ticks the watchdog saw running past `stuck_tick_warning`.
    pub stuck_ticks: u64,
    pub panicked_ticks: u64,
}

/// A region tick in progress, as seen by the watchdog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningTick {
    pub region_id: u64,
    pub thread: String,
    pub elapsed: Duration,
}

struct TrackedTick {
    thread: String,
    started: Instant,
    last_warned: Option<Instant>,
}

#[derive(Default)]
struct Counters {
    rounds: AtomicU64,
    ticks: AtomicU64,
    tasks_run: AtomicU64,
    tasks_rerouted: AtomicU64,
    tasks_dropped: AtomicU64,
    slow_ticks: AtomicU64,
    stuck_ticks: AtomicU64,
    panicked_ticks: AtomicU64,
}

#[derive(Default)]
struct TickReport {
    tasks_run: u64,
    tasks_rerouted: u64,
    tasks_dropped: u64,
    elapsed: Duration,
}

struct Shared<D> {
    regionizer: Arc<Regionizer<D>>,
    ticker: Box<dyn RegionTicker<D>>,
    config: SchedulerConfig,
    stats: Mutex<HashMap<u64, TickStats>>,
    running: Mutex<HashMap<u64, TrackedTick>>,
    counters: Counters,
}

impl<D: 'static> Shared<D> {
    fn stats(&self) -> MutexGuard<'_, HashMap<u64, TickStats>> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn running(&self) -> MutexGuard<'_, HashMap<u64, TrackedTick>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Tick `region` if it can be moved to TICKING. `None` if it was busy,
    /// transient or dead.
    fn tick_region(&self, region: &Arc<Region<D>>) -> Option<TickReport> {
        if !self.regionizer.try_mark_ticking(region) {
            return None;
        }
        let _span = tracing::debug_span!("tick_region", region = region.id()).entered();
        let start = Instant::now();
        let mut report = TickReport::default();
        self.running().insert(
            region.id(),
            TrackedTick {
                thread: thread::current().name().unwrap_or("unnamed").to_string(),
                started: start,
                last_warned: None,
            },
        );
        let entered = current::enter(Arc::clone(region) as Arc<dyn current::TickingRegion>);

        let shift = region.section_chunk_shift();
        for task in region.task_queue().drain() {
            let pos = task.pos();
            if region.contains_section(pos.section(shift)) {
                task.run();
                report.tasks_run += 1;
                continue;
            }
            // queued directly on a region that no longer owns the chunk
            match self.regionizer.queue_chunk_task(pos.x, pos.z, move || task.run()) {
                Ok(owner) => {
                    tracing::debug!(%pos, from = region.id(), to = owner.id(), "rerouted task");
                    report.tasks_rerouted += 1;
                }
                Err(err) => {
                    tracing::debug!(%pos, %err, "dropping task");
                    report.tasks_dropped += 1;
                }
            }
        }

        let ticked = panic::catch_unwind(AssertUnwindSafe(|| self.ticker.tick(region)));
        report.elapsed = start.elapsed();
        drop(entered);
        self.running().remove(&region.id());

        if ticked.is_err() {
            tracing::error!(region = region.id(), "region tick panicked");
            self.counters.panicked_ticks.fetch_add(1, Ordering::Relaxed);
        }
        if report.elapsed > self.config.slow_tick_warning() {
            tracing::warn!(
                region = region.id(),
                elapsed_ms = report.elapsed.as_millis() as u64,
                "slow region tick"
            );
            self.counters.slow_ticks.fetch_add(1, Ordering::Relaxed);
        }
        if debug::is_enabled(DebugCategory::Scheduler) {
            tracing::info!(
                region = region.id(),
                elapsed_us = report.elapsed.as_micros() as u64,
                tasks = report.tasks_run,
                "region tick"
            );
        }

        self.stats()
            .entry(region.id())
            .or_insert_with(|| TickStats::new(self.config.stats_window))
            .record(report.elapsed);
        self.counters.ticks.fetch_add(1, Ordering::Relaxed);
        self.counters
            .tasks_run
            .fetch_add(report.tasks_run, Ordering::Relaxed);
        self.counters
            .tasks_rerouted
            .fetch_add(report.tasks_rerouted, Ordering::Relaxed);
        self.counters
            .tasks_dropped
            .fetch_add(report.tasks_dropped, Ordering::Relaxed);

        self.regionizer.mark_not_ticking(region);
        Some(report)
    }

    /// Close a round: forget statistics of regions that no longer exist.
    fn finish_round(&self) {
        let live: Vec<u64> = self
            .regionizer
            .snapshot_regions()
            .iter()
            .map(|r| r.id())
            .collect();
        let retired: Vec<u64> = {
            let mut stats = self.stats();
            let retired = stats
                .keys()
                .copied()
                .filter(|id| live.binary_search(id).is_err())
                .collect::<Vec<_>>();
            for id in &retired {
                stats.remove(id);
            }
            retired
        };
        if !retired.is_empty() && debug::is_enabled(DebugCategory::Lifecycle) {
            tracing::info!(?retired, regions = live.len(), "regions retired since last round");
        }
        self.counters.rounds.fetch_add(1, Ordering::Relaxed);
    }

    /// Warn about ticks running longer than `stuck_tick_warning`. Returns how
    /// many warnings were logged.
    fn check_running_ticks(&self, now: Instant) -> usize {
        let threshold = self.config.stuck_tick_warning();
        let mut warned = 0;
        for (id, tick) in self.running().iter_mut() {
            let elapsed = now.saturating_duration_since(tick.started);
            if elapsed < threshold {
                continue;
            }
            if tick
                .last_warned
                .is_some_and(|at| now.saturating_duration_since(at) < threshold)
            {
                continue;
            }
            if tick.last_warned.is_none() {
                self.counters.stuck_ticks.fetch_add(1, Ordering::Relaxed);
            }
            tick.last_warned = Some(now);
            tracing::warn!(
                region = *id,
                thread = %tick.thread,
                elapsed_ms = elapsed.as_millis() as u64,
                "region tick appears stuck"
            );
            warned += 1;
        }
        warned
    }

    fn watchdog_loop(&self, stop: Receiver<()>) {
        let period = tick(self.config.watchdog_interval());
        loop {
            select! {
                recv(stop) -> _ => break,
                recv(period) -> msg => {
                    if let Ok(now) = msg {
                        self.check_running_ticks(now);
                    }
                }
            }
        }
        tracing::debug!("watchdog stopped");
    }

    fn worker_loop(&self, work: Receiver<Arc<Region<D>>>, done: Sender<()>) {
        for region in work.iter() {
            self.tick_region(&region);
            if done.send(()).is_err() {
                break;
            }
        }
    }

    fn dispatch_loop(
        &self,
        work: Sender<Arc<Region<D>>>,
        done: Receiver<()>,
        stop: Receiver<()>,
    ) {
        let interval = self.config.tick_interval();
        loop {
            let started = Instant::now();
            let mut sent = 0usize;
            for region in self.regionizer.snapshot_regions() {
                if region.is_ticking() || region.is_dead() {
                    continue;
                }
                if work.send(region).is_err() {
                    return;
                }
                sent += 1;
            }
            for _ in 0..sent {
                if done.recv().is_err() {
                    return;
                }
            }
            self.finish_round();

            let remaining = interval.saturating_sub(started.elapsed());
            select! {
                recv(stop) -> _ => break,
                recv(after(remaining)) -> _ => {}
            }
        }
        tracing::debug!("dispatcher stopped");
    }
}

/// Ticks the regions of a [`Regionizer`], each on one thread at a time.
///
/// Workers follow the dispatch contract: `try_mark_ticking`, drain the task
/// queue, run the [`RegionTicker`], `mark_not_ticking`. The last step resolves
/// any merge deferred while the region was ticking.
pub struct TickScheduler<D> {
    shared: Arc<Shared<D>>,
    running: Arc<AtomicBool>,
}

impl<D: Send + 'static> TickScheduler<D> {
    pub fn new(
        regionizer: Arc<Regionizer<D>>,
        ticker: impl RegionTicker<D> + 'static,
        config: SchedulerConfig,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared {
                regionizer,
                ticker: Box::new(ticker),
                config,
                stats: Mutex::new(HashMap::new()),
                running: Mutex::new(HashMap::new()),
                counters: Counters::default(),
            }),
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn regionizer(&self) -> &Arc<Regionizer<D>> {
        &self.shared.regionizer
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Tick every region once on the calling thread, in id order.
    pub fn run_round(&self) -> RoundReport {
        let _span = tracing::info_span!("run_round").entered();
        let start = Instant::now();
        let mut round = RoundReport::default();
        for region in self.shared.regionizer.snapshot_regions() {
            match self.shared.tick_region(&region) {
                Some(report) => {
                    round.ticked += 1;
                    round.tasks_run += report.tasks_run;
                    round.tasks_rerouted += report.tasks_rerouted;
                    round.tasks_dropped += report.tasks_dropped;
                }
                None => round.skipped += 1,
            }
        }
        self.shared.finish_round();
        round.elapsed = start.elapsed();
        tracing::debug!(
            ticked = round.ticked,
            skipped = round.skipped,
            tasks = round.tasks_run,
            "round complete"
        );
        round
    }

    /// Spawn the dispatcher, the watchdog and `worker_threads` workers. Rounds start every
    /// `tick_interval` until the handle is shut down or dropped.
    pub fn start(&self) -> Result<SchedulerHandle, SchedulerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyRunning);
        }
        let mut handle = SchedulerHandle {
            stop: None,
            threads: Vec::new(),
            running: Arc::clone(&self.running),
        };
        if let Err(err) = self.spawn_threads(&mut handle) {
            handle.stop_and_join();
            return Err(err);
        }
        tracing::info!(
            workers = self.shared.config.worker_threads,
            interval_ms = self.shared.config.tick_interval_ms,
            "scheduler started"
        );
        Ok(handle)
    }

    fn spawn_threads(&self, handle: &mut SchedulerHandle) -> Result<(), SchedulerError> {
        let (work_tx, work_rx) = unbounded::<Arc<Region<D>>>();
        let (done_tx, done_rx) = unbounded::<()>();
        let (stop_tx, stop_rx) = unbounded::<()>();
        handle.stop = Some(stop_tx);

        for i in 0..self.shared.config.worker_threads {
            let shared = Arc::clone(&self.shared);
            let work = work_rx.clone();
            let done = done_tx.clone();
            let thread = thread::Builder::new()
                .name(format!("tick-worker-{i}"))
                .spawn(move || shared.worker_loop(work, done))?;
            handle.threads.push(thread);
        }
        drop(done_tx);

        let shared = Arc::clone(&self.shared);
        let stop = stop_rx.clone();
        let thread = thread::Builder::new()
            .name("tick-watchdog".into())
            .spawn(move || shared.watchdog_loop(stop))?;
        handle.threads.push(thread);

        let shared = Arc::clone(&self.shared);
        let thread = thread::Builder::new()
            .name("tick-dispatcher".into())
            .spawn(move || shared.dispatch_loop(work_tx, done_rx, stop_rx))?;
        handle.threads.push(thread);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self, region_id: u64) -> Option<TickStatsSnapshot> {
        self.shared.stats().get(&region_id).map(TickStats::snapshot)
    }

    /// Statistics of every region ticked so far, ordered by region id.
    pub fn all_stats(&self) -> Vec<(u64, TickStatsSnapshot)> {
        let mut out: Vec<(u64, TickStatsSnapshot)> = self
            .shared
            .stats()
            .iter()
            .map(|(id, stats)| (*id, stats.snapshot()))
            .collect();
        out.sort_by_key(|(id, _)| *id);
        out
    }

    /// Region ticks in progress, longest running first.
    pub fn running_ticks(&self) -> Vec<RunningTick> {
        let now = Instant::now();
        let mut out: Vec<RunningTick> = self
            .shared
            .running()
            .iter()
            .map(|(id, tick)| RunningTick {
                region_id: *id,
                thread: tick.thread.clone(),
                elapsed: now.saturating_duration_since(tick.started),
            })
            .collect();
        out.sort_by(|a, b| b.elapsed.cmp(&a.elapsed).then(a.region_id.cmp(&b.region_id)));
        out
    }

    pub fn totals(&self) -> SchedulerTotals {
        let c = &self.shared.counters;
        SchedulerTotals {
            rounds: c.rounds.load(Ordering::Relaxed),
            ticks: c.ticks.load(Ordering::Relaxed),
            tasks_run: c.tasks_run.load(Ordering::Relaxed),
            tasks_rerouted: c.tasks_rerouted.load(Ordering::Relaxed),
            tasks_dropped: c.tasks_dropped.load(Ordering::Relaxed),
            slow_ticks: c.slow_ticks.load(Ordering::Relaxed),
            stuck_ticks: c.stuck_ticks.load(Ordering::Relaxed),
            panicked_ticks: c.panicked_ticks.load(Ordering::Relaxed),
        }
    }
}

/// Running scheduler threads. Dropping the handle stops them.
pub struct SchedulerHandle {
    stop: Option<Sender<()>>,
    threads: Vec<JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl SchedulerHandle {
    /// Stop the dispatcher after its current round and join every thread.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        // disconnecting the stop channel wakes the dispatcher
        self.stop.take();
        for thread in self.threads.drain(..) {
            let name = thread.thread().name().unwrap_or("tick").to_string();
            if thread.join().is_err() {
                tracing::error!(thread = %name, "scheduler thread panicked");
            }
        }
        if self.running.swap(false, Ordering::SeqCst) {
            tracing::info!("scheduler stopped");
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

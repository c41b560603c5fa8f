use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tickspace_common::ChunkPos;
use tickspace_region::{Region, Regionizer};
use tickspace_sched::{SchedulerTotals, TickData, TickDataController, TickScheduler};
use tickspace_tools::debug::{self, DebugCategory};
use tickspace_tools::{RegionInfo, RegionInspector, RegionizerSummary, Violation};

use crate::settings::Settings;

/// Deterministic SplitMix64 stream driving the simulated player walk.
struct SplitMix64(u64);

impl SplitMix64 {
    fn next_u64(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    fn below(&mut self, n: u64) -> u64 {
        self.next_u64() % n.max(1)
    }

    /// Uniform in `[-r, r]`.
    fn offset(&mut self, r: i32) -> i32 {
        let r = r.max(0);
        self.below(2 * r as u64 + 1) as i32 - r
    }
}

#[derive(Debug, Clone)]
pub struct SimulationParams {
    pub seed: u64,
    pub steps: usize,
    /// Upper bound of simultaneously loaded chunks.
    pub max_chunks: usize,
    /// Run one scheduler round every this many steps.
    pub round_every: usize,
    /// Largest cursor move per step, in chunks.
    pub spread: i32,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            seed: 42,
            steps: 2_000,
            max_chunks: 400,
            round_every: 10,
            spread: 6,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub seed: u64,
    pub steps: usize,
    pub loads: u64,
    pub unloads: u64,
    pub tasks_queued: u64,
    pub tasks_completed: u64,
    pub summary: RegionizerSummary,
    pub scheduler: SchedulerTotals,
    pub violations: Vec<Violation>,
    pub regions: Vec<RegionInfo>,
}

impl std::fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Simulation: seed={} steps={}", self.seed, self.steps)?;
        writeln!(
            f,
            "  loads={} unloads={} tasks queued={} completed={}",
            self.loads, self.unloads, self.tasks_queued, self.tasks_completed
        )?;
        writeln!(
            f,
            "  scheduler: rounds={} ticks={} rerouted={} dropped={}",
            self.scheduler.rounds,
            self.scheduler.ticks,
            self.scheduler.tasks_rerouted,
            self.scheduler.tasks_dropped
        )?;
        writeln!(f, "  {}", self.summary)?;
        for region in &self.regions {
            writeln!(f, "    {region}")?;
        }
        if self.violations.is_empty() {
            write!(f, "  invariants: OK")
        } else {
            writeln!(f, "  invariants: {} violation(s)", self.violations.len())?;
            for violation in &self.violations {
                writeln!(f, "    {violation}")?;
            }
            Ok(())
        }
    }
}

/// Random walk of chunk loads and unloads against a regionizer, ticked by a
/// synchronous scheduler. The same seed and settings give the same report.
pub fn run(params: &SimulationParams, settings: &Settings) -> Result<SimulationReport> {
    let _span = tracing::info_span!("simulate", seed = params.seed).entered();
    let regionizer = Arc::new(Regionizer::new(
        settings.regionizer.clone(),
        TickDataController,
    )?);
    let scheduler = TickScheduler::new(
        Arc::clone(&regionizer),
        |region: &Region<TickData>| region.data().advance_current_tick(),
        settings.scheduler.clone(),
    )?;

    let mut rng = SplitMix64(params.seed);
    let mut loaded: Vec<ChunkPos> = Vec::new();
    let mut loaded_set: HashSet<ChunkPos> = HashSet::new();
    let completed = Arc::new(AtomicU64::new(0));
    let (mut loads, mut unloads, mut queued) = (0u64, 0u64, 0u64);
    let mut cursor = ChunkPos::new(0, 0);
    let round_every = params.round_every.max(1);

    for step in 0..params.steps {
        if rng.below(64) == 0 {
            cursor = ChunkPos::new(rng.offset(2_048), rng.offset(2_048));
        } else {
            cursor = ChunkPos::new(
                cursor.x + rng.offset(params.spread),
                cursor.z + rng.offset(params.spread),
            );
        }

        let wants_load = loaded.is_empty() || rng.below(100) < 65;
        if wants_load && loaded.len() < params.max_chunks {
            if loaded_set.insert(cursor) {
                regionizer.add_chunk(cursor.x, cursor.z)?;
                loaded.push(cursor);
                loads += 1;
            }
            if rng.below(4) == 0 {
                let completed = Arc::clone(&completed);
                regionizer.queue_chunk_task(cursor.x, cursor.z, move || {
                    completed.fetch_add(1, Ordering::Relaxed);
                })?;
                queued += 1;
            }
        } else if !loaded.is_empty() {
            let chunk = loaded.swap_remove(rng.below(loaded.len() as u64) as usize);
            loaded_set.remove(&chunk);
            if regionizer.remove_chunk(chunk.x, chunk.z) {
                unloads += 1;
            }
        }

        if (step + 1) % round_every == 0 {
            scheduler.run_round();
            if debug::is_enabled(DebugCategory::Structure) {
                let summary = RegionInspector::summary(&regionizer);
                tracing::info!(step, %summary, "structure");
            }
        }
    }
    scheduler.run_round();

    Ok(SimulationReport {
        seed: params.seed,
        steps: params.steps,
        loads,
        unloads,
        tasks_queued: queued,
        tasks_completed: completed.load(Ordering::Relaxed),
        summary: RegionInspector::summary(&regionizer),
        scheduler: scheduler.totals(),
        violations: RegionInspector::find_violations(&regionizer),
        regions: RegionInspector::list(&regionizer),
    })
}

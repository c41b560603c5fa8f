use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use tickspace_region::{
    ControllerError, RecalculationOutcome, Region, RegionDataController, RegionState,
    Regionizer, RegionizerConfig, RegionizerError, SectionPos, SplitPart, UnitController,
};

#[derive(Clone, Default)]
struct Switches {
    fail_merge: Arc<AtomicBool>,
    short_split: Arc<AtomicBool>,
    splits: Arc<AtomicUsize>,
}

/// Payload is a progress counter; merge and split keep the maximum.
struct CounterController(Switches);

impl RegionDataController<u64> for CounterController {
    fn create(&self) -> u64 {
        0
    }

    fn merge(&self, survivor: &u64, absorbed: &u64) -> Result<u64, ControllerError> {
        if self.0.fail_merge.load(Ordering::SeqCst) {
            return Err(ControllerError::Rejected("merge refused".into()));
        }
        Ok((*survivor).max(*absorbed))
    }

    fn split(&self, original: &u64, parts: &[SplitPart]) -> Result<Vec<u64>, ControllerError> {
        self.0.splits.fetch_add(1, Ordering::SeqCst);
        if self.0.short_split.load(Ordering::SeqCst) {
            return Ok(vec![*original]);
        }
        Ok(vec![*original; parts.len()])
    }
}

fn config() -> RegionizerConfig {
    RegionizerConfig {
        section_chunk_shift: 4,
        empty_section_creation_radius: 1,
        merge_radius: 1,
        recalculation_section_count: 8,
        max_dead_section_percent: 0.10,
    }
}

fn unit(config: RegionizerConfig) -> Regionizer<()> {
    Regionizer::new(config, UnitController).unwrap()
}

fn counting(config: RegionizerConfig) -> (Regionizer<u64>, Switches) {
    let switches = Switches::default();
    let regionizer = Regionizer::new(config, CounterController(switches.clone())).unwrap();
    (regionizer, switches)
}

/// Live sections of distinct regions are farther apart than the merge radius
/// and every owned section resolves back to its region.
fn assert_single_ownership<D>(regionizer: &Regionizer<D>) {
    let radius = regionizer.config().merge_radius as u32;
    let regions = regionizer.snapshot_regions();
    for region in &regions {
        assert_ne!(region.state(), RegionState::Dead);
        assert!(region.section_count() > 0, "{region} owns no sections");
        for pos in region.section_positions() {
            let owner = regionizer.region_for_section(pos).unwrap();
            assert_eq!(owner.id(), region.id(), "{pos} resolves to {owner}");
        }
    }
    for (i, a) in regions.iter().enumerate() {
        for b in &regions[i + 1..] {
            for sa in a.live_section_positions() {
                for sb in b.live_section_positions() {
                    assert!(
                        sa.chebyshev_distance(sb) > radius,
                        "{sa} of {a} and {sb} of {b} are within merge radius"
                    );
                }
            }
        }
    }
}

#[test]
fn rejects_invalid_config() {
    let bad = RegionizerConfig {
        max_dead_section_percent: 2.0,
        ..config()
    };
    assert!(matches!(
        Regionizer::new(bad, UnitController),
        Err(RegionizerError::Config(_))
    ));
}

#[test]
fn bootstrap_creates_buffered_ready_region() {
    let regionizer = unit(RegionizerConfig {
        empty_section_creation_radius: 2,
        merge_radius: 2,
        section_chunk_shift: 4,
        ..RegionizerConfig::default()
    });
    let region = regionizer.add_chunk(0, 0).unwrap();

    assert_eq!(regionizer.region_count(), 1);
    assert_eq!(region.section_count(), 25);
    assert_eq!(region.live_section_count(), 1);
    assert_eq!(region.state(), RegionState::Ready);
    assert!(region.contains_section(SectionPos::new(0, 0)));
    assert!(region.contains_chunk(0, 0));
}

#[test]
fn add_chunk_is_idempotent() {
    let regionizer = unit(config());
    let first = regionizer.add_chunk(5, 5).unwrap();
    let second = regionizer.add_chunk(5, 5).unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.section_count(), 9);
    assert_eq!(first.chunk_count(), 1);
    assert_eq!(regionizer.region_count(), 1);

    let same_section = regionizer.add_chunk(6, 7).unwrap();
    assert!(Arc::ptr_eq(&first, &same_section));
    assert_eq!(first.chunk_count(), 2);
    assert_eq!(first.section_count(), 9);
}

#[test]
fn distant_chunks_get_distinct_regions() {
    let regionizer = unit(config());
    let a = regionizer.add_chunk(0, 0).unwrap();
    let b = regionizer.add_chunk(64, 0).unwrap();

    assert_ne!(a.id(), b.id());
    assert!(a.id() < b.id());
    assert_eq!(regionizer.region_count(), 2);
    assert_single_ownership(&regionizer);
}

#[test]
fn chunk_in_buffer_section_joins_owner() {
    let regionizer = unit(config());
    let a = regionizer.add_chunk(0, 0).unwrap();
    // section (1, 0) is a buffer of `a`
    let b = regionizer.add_chunk(16, 0).unwrap();

    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(a.live_section_count(), 2);
    // buffer grows to cover the new live section's neighbourhood
    assert_eq!(a.section_count(), 12);
}

#[test]
fn bridging_chunk_merges_regions() {
    let regionizer = unit(config());
    let a = regionizer.add_chunk(0, 0).unwrap();
    let b = regionizer.add_chunk(64, 0).unwrap();
    assert_eq!(regionizer.region_count(), 2);

    let merged = regionizer.add_chunk(32, 0).unwrap();

    assert_eq!(regionizer.region_count(), 1);
    assert_eq!(merged.id(), a.id());
    assert!(b.is_dead());
    assert_eq!(b.section_count(), 0);
    assert_eq!(merged.section_count(), 21);
    assert_eq!(merged.chunk_count(), 3);
    assert_eq!(regionizer.region_for_chunk(64, 0).unwrap().id(), a.id());
    assert_single_ownership(&regionizer);
}

#[test]
fn merge_keeps_highest_counter() {
    for (left, right) in [(5, 12), (12, 5)] {
        let (regionizer, _) = counting(config());
        let a = regionizer.add_chunk(0, 0).unwrap();
        let b = regionizer.add_chunk(64, 0).unwrap();
        *a.data() = left;
        *b.data() = right;

        let merged = regionizer.add_chunk(32, 0).unwrap();
        assert_eq!(*merged.data(), 12);
    }
}

#[test]
fn merge_moves_pending_tasks_to_survivor() {
    let regionizer = unit(config());
    regionizer.add_chunk(0, 0).unwrap();
    let b = regionizer.add_chunk(64, 0).unwrap();
    let target = regionizer.queue_chunk_task(64, 0, || {}).unwrap();
    assert_eq!(target.id(), b.id());

    let merged = regionizer.add_chunk(32, 0).unwrap();

    assert!(merged.task_queue().contains_task(64, 0));
    assert!(b.task_queue().is_empty());
}

#[test]
fn queue_chunk_task_requires_owner() {
    let regionizer = unit(config());
    let err = regionizer.queue_chunk_task(1000, 1000, || {}).unwrap_err();
    assert!(matches!(err, RegionizerError::ChunkNotOwned { x: 1000, z: 1000 }));
}

#[test]
fn failed_merge_leaves_regions_untouched() {
    let (regionizer, switches) = counting(config());
    let a = regionizer.add_chunk(0, 0).unwrap();
    let b = regionizer.add_chunk(64, 0).unwrap();
    switches.fail_merge.store(true, Ordering::SeqCst);

    let err = regionizer.add_chunk(32, 0).unwrap_err();
    match err {
        RegionizerError::Controller(ControllerError::Merge {
            survivor, absorbed, ..
        }) => {
            assert_eq!(survivor, a.id());
            assert_eq!(absorbed, b.id());
        }
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(regionizer.region_count(), 2);
    assert!(regionizer.region_for_chunk(32, 0).is_none());
    assert_eq!(a.state(), RegionState::Ready);
    assert_eq!(b.state(), RegionState::Ready);
    assert_eq!(a.section_count(), 9);
    assert_eq!(b.section_count(), 9);

    switches.fail_merge.store(false, Ordering::SeqCst);
    regionizer.add_chunk(32, 0).unwrap();
    assert_eq!(regionizer.region_count(), 1);
}

#[test]
fn ticking_is_exclusive() {
    let regionizer = unit(config());
    let region = regionizer.add_chunk(0, 0).unwrap();

    assert!(!regionizer.mark_not_ticking(&region));
    assert!(regionizer.try_mark_ticking(&region));
    assert!(!regionizer.try_mark_ticking(&region));
    assert!(region.is_ticking());
    assert!(regionizer.mark_not_ticking(&region));
    assert!(!regionizer.mark_not_ticking(&region));
    assert_eq!(region.state(), RegionState::Ready);
}

#[test]
fn deferred_merge_resolves_once_ticking_stops() {
    let regionizer = unit(config());
    let a = regionizer.add_chunk(0, 0).unwrap();
    assert!(regionizer.try_mark_ticking(&a));

    let b = regionizer.add_chunk(32, 0).unwrap();
    assert_ne!(a.id(), b.id());
    assert_eq!(b.state(), RegionState::Transient);
    assert!(!regionizer.try_mark_ticking(&b));
    assert_eq!(regionizer.region_count(), 2);
    assert_eq!(regionizer.pending_merge_count(), 1);
    assert_eq!(regionizer.pending_merge_partners(b.id()), vec![a.id()]);

    assert!(regionizer.mark_not_ticking(&a));

    assert_eq!(regionizer.region_count(), 1);
    assert_eq!(regionizer.pending_merge_count(), 0);
    assert!(b.is_dead());
    assert_eq!(a.state(), RegionState::Ready);
    assert_eq!(a.section_count(), 15);
    assert!(a.contains_chunk(32, 0));
    assert_single_ownership(&regionizer);
}

#[test]
fn deferred_merge_survivor_is_lowest_id() {
    let regionizer = unit(config());
    let a = regionizer.add_chunk(0, 0).unwrap();
    let b = regionizer.add_chunk(64, 0).unwrap();
    assert!(regionizer.try_mark_ticking(&b));

    // touches both; `a` is claimed, `b` is ticking
    let grown = regionizer.add_chunk(32, 0).unwrap();
    assert_eq!(grown.id(), a.id());
    assert_eq!(a.state(), RegionState::Transient);
    assert_eq!(regionizer.pending_merge_count(), 1);

    assert!(regionizer.mark_not_ticking(&b));

    assert!(b.is_dead());
    assert!(!a.is_dead());
    assert_eq!(a.state(), RegionState::Ready);
    assert_eq!(regionizer.region_count(), 1);
    assert_eq!(regionizer.region_for_chunk(64, 0).unwrap().id(), a.id());
}

#[test]
fn ticking_owner_records_chunk_in_place() {
    let regionizer = unit(config());
    let a = regionizer.add_chunk(0, 0).unwrap();
    assert!(regionizer.try_mark_ticking(&a));

    let same = regionizer.add_chunk(16, 0).unwrap();

    assert!(Arc::ptr_eq(&a, &same));
    assert!(a.is_ticking());
    assert_eq!(a.live_section_count(), 2);
    // buffers around (1, 0) are created even while ticking
    assert_eq!(a.section_count(), 12);
    assert!(a.contains_section(SectionPos::new(2, 1)));
    assert_eq!(regionizer.pending_merge_count(), 0);
    assert!(regionizer.mark_not_ticking(&a));
}

#[test]
fn two_ticking_regions_merge_after_both_stop() {
    let regionizer = unit(config());
    let a = regionizer.add_chunk(0, 0).unwrap();
    let b = regionizer.add_chunk(64, 0).unwrap();
    // grow `b` so its buffer reaches section (2, 0)
    regionizer.add_chunk(48, 0).unwrap();
    assert!(regionizer.try_mark_ticking(&a));
    assert!(regionizer.try_mark_ticking(&b));

    // section (2, 0) is b's buffer and within reach of a's buffer
    let owner = regionizer.add_chunk(32, 0).unwrap();
    assert_eq!(owner.id(), b.id());
    assert_eq!(regionizer.pending_merge_count(), 1);

    assert!(regionizer.mark_not_ticking(&b));
    // `a` still ticks, so `b` waits
    assert_eq!(b.state(), RegionState::Transient);
    assert_eq!(regionizer.region_count(), 2);

    assert!(regionizer.mark_not_ticking(&a));
    assert_eq!(regionizer.region_count(), 1);
    assert!(b.is_dead());
    assert_eq!(a.state(), RegionState::Ready);
    assert_single_ownership(&regionizer);
}

#[test]
fn failed_deferred_merge_retries_after_next_tick() {
    let (regionizer, switches) = counting(config());
    let a = regionizer.add_chunk(0, 0).unwrap();
    assert!(regionizer.try_mark_ticking(&a));
    let b = regionizer.add_chunk(32, 0).unwrap();
    *b.data() = 5;
    switches.fail_merge.store(true, Ordering::SeqCst);

    assert!(regionizer.mark_not_ticking(&a));

    // nothing moved; `a` can tick again and the obligation is kept
    assert_eq!(a.state(), RegionState::Ready);
    assert_eq!(b.state(), RegionState::Transient);
    assert_eq!(regionizer.region_count(), 2);
    assert_eq!(regionizer.pending_merge_partners(a.id()), vec![b.id()]);
    assert!(b.contains_chunk(32, 0));

    switches.fail_merge.store(false, Ordering::SeqCst);
    assert!(regionizer.try_mark_ticking(&a));
    assert!(regionizer.mark_not_ticking(&a));

    assert!(b.is_dead());
    assert_eq!(regionizer.region_count(), 1);
    assert_eq!(regionizer.pending_merge_count(), 0);
    assert_eq!(*a.data(), 5);
    assert!(a.contains_chunk(32, 0));
    assert_single_ownership(&regionizer);
}

#[test]
fn emptied_waiting_region_drops_its_merge_edges() {
    let regionizer = unit(config());
    let a = regionizer.add_chunk(0, 0).unwrap();
    assert!(regionizer.try_mark_ticking(&a));
    let b = regionizer.add_chunk(32, 0).unwrap();
    assert_eq!(regionizer.pending_merge_count(), 1);

    assert!(regionizer.remove_chunk(32, 0));

    assert!(b.is_dead());
    assert_eq!(regionizer.pending_merge_count(), 0);
    assert!(regionizer.pending_merge_partners(a.id()).is_empty());
    assert!(a.is_ticking());
    assert_eq!(regionizer.region_count(), 1);

    assert!(regionizer.mark_not_ticking(&a));
    assert_eq!(a.state(), RegionState::Ready);
    assert_eq!(regionizer.region_count(), 1);
    assert_single_ownership(&regionizer);
}

#[test]
fn split_forwards_deferred_merge_only_to_nearby_child() {
    let regionizer = unit(config());
    let a = regionizer.add_chunk(0, 0).unwrap();
    assert!(regionizer.try_mark_ticking(&a));

    // live (2,0), (4,0), (6,0) in one waiting region next to `a`'s buffer
    let waiting = regionizer.add_chunk(32, 0).unwrap();
    regionizer.add_chunk(64, 0).unwrap();
    regionizer.add_chunk(96, 0).unwrap();
    assert_eq!(regionizer.region_count(), 2);
    assert_eq!(waiting.section_count(), 18);
    assert_eq!(regionizer.pending_merge_partners(a.id()), vec![waiting.id()]);

    assert!(regionizer.remove_chunk(64, 0));

    assert!(waiting.is_dead());
    assert_eq!(regionizer.region_count(), 3);
    let near = regionizer.region_for_chunk(32, 0).unwrap();
    let far = regionizer.region_for_chunk(96, 0).unwrap();
    assert_ne!(near.id(), far.id());
    assert_eq!(near.state(), RegionState::Transient);
    assert_eq!(far.state(), RegionState::Ready);
    // each child keeps its live sections plus the buffers next to them
    assert_eq!(near.section_count(), 6);
    assert_eq!(far.section_count(), 9);
    assert!(!near.contains_section(SectionPos::new(4, 0)));
    assert!(far.contains_section(SectionPos::new(5, 1)));
    assert_eq!(regionizer.pending_merge_partners(a.id()), vec![near.id()]);
    assert!(regionizer.pending_merge_partners(far.id()).is_empty());

    assert!(regionizer.mark_not_ticking(&a));

    assert!(near.is_dead());
    assert_eq!(regionizer.region_count(), 2);
    assert_eq!(regionizer.pending_merge_count(), 0);
    assert_eq!(regionizer.region_for_chunk(32, 0).unwrap().id(), a.id());
    assert_eq!(regionizer.region_for_chunk(96, 0).unwrap().id(), far.id());
    assert_single_ownership(&regionizer);
}

#[test]
fn sections_at_opposite_grid_edges_stay_apart() {
    let regionizer = unit(RegionizerConfig {
        section_chunk_shift: 0,
        ..config()
    });
    let east = regionizer.add_chunk(i32::MAX, 0).unwrap();
    let west = regionizer.add_chunk(i32::MIN, 0).unwrap();

    assert_ne!(east.id(), west.id());
    assert_eq!(regionizer.region_count(), 2);
    assert_eq!(east.section_count(), 6);
    assert_eq!(west.section_count(), 6);
    assert!(!east.contains_section(SectionPos::new(i32::MIN, 0)));
    assert_single_ownership(&regionizer);

    assert!(regionizer.remove_chunk(i32::MAX, 0));
    assert!(east.is_dead());
    assert!(!west.is_dead());
}

#[test]
fn removing_last_chunk_retires_region() {
    let regionizer = unit(config());
    let region = regionizer.add_chunk(0, 0).unwrap();
    region.task_queue().queue_chunk_task(0, 0, || {});

    assert!(regionizer.remove_chunk(0, 0));
    assert!(!regionizer.remove_chunk(0, 0));
    assert!(region.is_dead());
    assert_eq!(regionizer.region_count(), 0);
    assert!(regionizer.region_for_chunk(0, 0).is_none());
    assert!(region.task_queue().is_empty());
}

#[test]
fn removal_while_ticking_waits_for_tick_end() {
    let regionizer = unit(config());
    let region = regionizer.add_chunk(0, 0).unwrap();
    assert!(regionizer.try_mark_ticking(&region));

    assert!(regionizer.remove_chunk(0, 0));
    assert!(region.is_ticking());
    assert_eq!(regionizer.region_count(), 1);

    assert!(regionizer.mark_not_ticking(&region));
    assert!(region.is_dead());
    assert_eq!(regionizer.region_count(), 0);
}

#[test]
fn remove_chunk_keeps_other_chunks() {
    let regionizer = unit(config());
    let region = regionizer.add_chunk(0, 0).unwrap();
    regionizer.add_chunk(1, 0).unwrap();

    assert!(regionizer.remove_chunk(0, 0));
    assert!(!region.contains_chunk(0, 0));
    assert!(region.contains_chunk(1, 0));
    assert_eq!(region.live_section_count(), 1);
    assert!(!regionizer.remove_chunk(500, 500));
}

/// Region with live sections (0,0), (2,0), (4,0) joined through buffers.
fn chain<D>(regionizer: &Regionizer<D>) -> Arc<Region<D>> {
    let region = regionizer.add_chunk(0, 0).unwrap();
    regionizer.add_chunk(32, 0).unwrap();
    regionizer.add_chunk(64, 0).unwrap();
    assert_eq!(regionizer.region_count(), 1);
    assert_eq!(region.section_count(), 21);
    region
}

#[test]
fn disconnected_region_splits_on_removal() {
    let (regionizer, switches) = counting(config());
    let region = chain(&regionizer);
    *region.data() = 7;

    assert!(regionizer.remove_chunk(32, 0));

    assert!(region.is_dead());
    assert_eq!(switches.splits.load(Ordering::SeqCst), 1);
    assert_eq!(regionizer.region_count(), 2);
    let left = regionizer.region_for_chunk(0, 0).unwrap();
    let right = regionizer.region_for_chunk(64, 0).unwrap();
    assert_ne!(left.id(), right.id());
    assert!(left.id() > region.id() && right.id() > region.id());
    assert_eq!(*left.data(), 7);
    assert_eq!(*right.data(), 7);
    assert_eq!(left.state(), RegionState::Ready);
    // the children keep their buffers; the emptied middle column is released
    assert_eq!(left.section_count(), 9);
    assert_eq!(right.section_count(), 9);
    assert!(regionizer.region_for_chunk(32, 0).is_none());
    assert_single_ownership(&regionizer);
}

#[test]
fn explicit_recalculation_relocates_tasks() {
    let regionizer = unit(RegionizerConfig {
        max_dead_section_percent: 1.0,
        ..config()
    });
    let region = chain(&regionizer);
    assert!(regionizer.remove_chunk(32, 0));
    assert!(!region.is_dead());

    for x in [0, 32, 64] {
        regionizer.queue_chunk_task(x, 0, || {}).unwrap();
    }

    let outcome = regionizer.recalculate(&region).unwrap();
    let RecalculationOutcome::Split { regions } = outcome else {
        panic!("expected split, got {outcome:?}");
    };
    assert_eq!(regions.len(), 2);

    let left = regionizer.region_for_chunk(0, 0).unwrap();
    let right = regionizer.region_for_chunk(64, 0).unwrap();
    assert!(left.task_queue().contains_task(0, 0));
    assert!(!left.task_queue().contains_task(64, 0));
    assert!(right.task_queue().contains_task(64, 0));
    assert_eq!(left.task_queue().len() + right.task_queue().len(), 2);

    assert!(matches!(
        regionizer.recalculate(&region),
        Err(RegionizerError::RegionDead(_))
    ));
}

#[test]
fn recalculation_prunes_dead_sections() {
    let regionizer = unit(RegionizerConfig {
        max_dead_section_percent: 1.0,
        merge_radius: 2,
        ..config()
    });
    // live (0,0) and (2,0) stay connected through merge radius 2
    let region = regionizer.add_chunk(0, 0).unwrap();
    regionizer.add_chunk(32, 0).unwrap();
    regionizer.add_chunk(33, 0).unwrap();
    let before = region.section_count();

    regionizer.add_chunk(48, 0).unwrap();
    regionizer.remove_chunk(48, 0);
    let outcome = regionizer.recalculate(&region).unwrap();

    assert!(matches!(outcome, RecalculationOutcome::Pruned { .. }));
    assert!(region.section_count() < before + 3);
    assert_eq!(region.dead_section_count(), 0);
    assert_eq!(regionizer.recalculate(&region).unwrap(), RecalculationOutcome::Unchanged);
    assert_single_ownership(&regionizer);
}

#[test]
fn recalculation_refuses_ticking_region() {
    let regionizer = unit(config());
    let region = regionizer.add_chunk(0, 0).unwrap();
    assert!(regionizer.try_mark_ticking(&region));
    assert!(matches!(
        regionizer.recalculate(&region),
        Err(RegionizerError::RegionTicking(_))
    ));
    assert!(region.is_ticking());
}

#[test]
fn wrong_split_arity_is_rejected() {
    let (regionizer, switches) = counting(RegionizerConfig {
        max_dead_section_percent: 1.0,
        ..config()
    });
    let region = chain(&regionizer);
    regionizer.remove_chunk(32, 0);
    switches.short_split.store(true, Ordering::SeqCst);

    let err = regionizer.recalculate(&region).unwrap_err();
    assert!(matches!(
        err,
        RegionizerError::Controller(ControllerError::SplitArity {
            expected: 2,
            actual: 1,
            ..
        })
    ));
    assert!(!region.is_dead());
    assert_eq!(region.state(), RegionState::Ready);
    assert_eq!(region.section_count(), 21);
    assert_eq!(regionizer.region_count(), 1);
}

#[test]
fn snapshot_is_ordered_by_id() {
    let regionizer = unit(config());
    for x in [640, 0, 320] {
        regionizer.add_chunk(x, 0).unwrap();
    }
    let ids: Vec<u64> = regionizer.snapshot_regions().iter().map(|r| r.id()).collect();
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);

    let mut visited = 0;
    regionizer.compute_for_all_regions(|region| {
        visited += 1;
        assert!(region.center_chunk().is_some());
    });
    assert_eq!(visited, 3);
}

#[test]
fn concurrent_loading_and_ticking_keeps_single_ownership() {
    let regionizer = Arc::new(unit(config()));
    let stop = Arc::new(AtomicBool::new(false));

    let workers: Vec<_> = (0..3)
        .map(|_| {
            let regionizer = Arc::clone(&regionizer);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut ticks = 0usize;
                while !stop.load(Ordering::SeqCst) {
                    for region in regionizer.snapshot_regions() {
                        if regionizer.try_mark_ticking(&region) {
                            assert!(region.is_ticking());
                            ticks += 1;
                            thread::yield_now();
                            assert!(regionizer.mark_not_ticking(&region));
                        }
                    }
                }
                ticks
            })
        })
        .collect();

    let loaders: Vec<_> = (0..4)
        .map(|t: i32| {
            let regionizer = Arc::clone(&regionizer);
            thread::spawn(move || {
                let mut loaded = HashSet::new();
                for i in 0..400i32 {
                    let x = (i * 7 + t * 13) % 160 - 80;
                    let z = t * 40 + (i * 3) % 40 - 80;
                    if i % 5 == 4 {
                        let (rx, rz) = *loaded.iter().next().unwrap_or(&(x, z));
                        if regionizer.remove_chunk(rx, rz) {
                            loaded.remove(&(rx, rz));
                        }
                    } else {
                        regionizer.add_chunk(x, z).unwrap();
                        loaded.insert((x, z));
                    }
                }
                loaded
            })
        })
        .collect();

    let loaded: Vec<HashSet<(i32, i32)>> =
        loaders.into_iter().map(|h| h.join().unwrap()).collect();
    stop.store(true, Ordering::SeqCst);
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(regionizer.pending_merge_count(), 0);
    for region in regionizer.snapshot_regions() {
        assert_eq!(region.state(), RegionState::Ready);
    }
    for &(x, z) in loaded.iter().flatten() {
        let owner = regionizer.region_for_chunk(x, z).unwrap();
        assert!(owner.contains_chunk(x, z), "chunk [{x}, {z}] lost");
    }
    assert_single_ownership(&regionizer);
}

//! The section to region mapping and every structural operation on it.

mod claims;
mod recalc;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tickspace_common::{ChunkPos, SectionPos};

use crate::config::RegionizerConfig;
use crate::controller::RegionDataController;
use crate::error::{ControllerError, RegionizerError};
use crate::region::{ChunkRemoved, Region, RegionState, SectionKind};

use claims::{Claims, MergeEdges};
pub use recalc::RecalculationOutcome;

/// Structural state, guarded by the regionizer lock.
struct State<D> {
    /// Owner of every owned section. Only non-DEAD regions appear.
    sections: HashMap<SectionPos, Arc<Region<D>>>,
    /// Every non-DEAD region by id.
    regions: BTreeMap<u64, Arc<Region<D>>>,
    edges: MergeEdges,
}

impl<D> Default for State<D> {
    fn default() -> Self {
        Self {
            sections: HashMap::new(),
            regions: BTreeMap::new(),
            edges: MergeEdges::default(),
        }
    }
}

/// Clusters loaded chunks into regions that can each be ticked by one thread.
///
/// All structural changes run under one exclusive lock. The READY/TICKING
/// handoff is a compare-and-set on the region and never takes that lock, so
/// a worker finishing a tick is not blocked behind unrelated structural work
/// until it needs to resolve a deferred merge.
///
/// Do not hold a [`Region::data`] guard while calling into the regionizer:
/// structural operations lock the payloads of the regions they touch.
pub struct Regionizer<D> {
    config: RegionizerConfig,
    controller: Box<dyn RegionDataController<D>>,
    inner: Mutex<State<D>>,
    next_id: AtomicU64,
}

impl<D> Regionizer<D> {
    /// Validate `config` and build an empty regionizer.
    pub fn new(
        config: RegionizerConfig,
        controller: impl RegionDataController<D> + 'static,
    ) -> Result<Self, RegionizerError> {
        config.validate()?;
        tracing::debug!(?config, "regionizer created");
        Ok(Self {
            config,
            controller: Box::new(controller),
            inner: Mutex::new(State::default()),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn config(&self) -> &RegionizerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, State<D>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn new_region(&self, state: &mut State<D>, data: D) -> Arc<Region<D>> {
        let region = Arc::new(Region::new(
            self.next_id(),
            self.config.section_chunk_shift,
            data,
        ));
        state.regions.insert(region.id(), Arc::clone(&region));
        region
    }

    /// Mark chunk `(x, z)` loaded and return the region that now owns it.
    ///
    /// Repeated calls for a chunk whose section is already live return the
    /// same region without structural change. Otherwise the section becomes
    /// live and every region owning a section within `merge_radius` is merged
    /// with it, lowest id surviving. Regions that are ticking cannot be merged
    /// synchronously; a deferred merge is recorded instead and resolved by
    /// [`mark_not_ticking`](Self::mark_not_ticking). When the section's owner
    /// is itself ticking, the chunk and its buffers are recorded in place.
    ///
    /// A failing [`RegionDataController`] aborts the call with no change.
    pub fn add_chunk(&self, x: i32, z: i32) -> Result<Arc<Region<D>>, RegionizerError> {
        let shift = self.config.section_chunk_shift;
        let chunk = ChunkPos::new(x, z);
        let pos = chunk.section(shift);
        let mut state = self.lock();

        if let Some(owner) = state.sections.get(&pos) {
            let mut table = owner.table_mut();
            if table.is_live(pos) {
                table.add_chunk(chunk, shift);
                drop(table);
                return Ok(Arc::clone(owner));
            }
        }

        let _span = tracing::info_span!("add_chunk", x, z).entered();
        let owner = state.sections.get(&pos).cloned();

        let mut candidates: BTreeMap<u64, Arc<Region<D>>> = BTreeMap::new();
        for near in pos.surrounding(self.config.merge_radius) {
            if let Some(region) = state.sections.get(&near) {
                candidates
                    .entry(region.id())
                    .or_insert_with(|| Arc::clone(region));
            }
        }

        let mut claims = Claims::default();
        let mut ticking = Vec::new();
        for region in candidates.values() {
            if !claims.claim(region) {
                ticking.push(Arc::clone(region));
            }
        }

        if let Some(owner) = owner.filter(|o| ticking.iter().any(|t| t.id() == o.id())) {
            self.make_live(&mut state, &owner, chunk);
            for other in candidates.keys().filter(|&&id| id != owner.id()) {
                state.edges.add(owner.id(), *other);
            }
            tracing::debug!(
                region = owner.id(),
                %pos,
                deferred = candidates.len() - 1,
                "section became live in a ticking region"
            );
            claims.release(&state.edges);
            return Ok(owner);
        }

        self.claim_waiting_partners(&state, &mut claims, &mut ticking);
        let claimed = claims.sorted();

        let survivor = match claimed.split_first() {
            Some((survivor, absorbed)) => {
                let merged = match self.plan_merge(survivor, absorbed) {
                    Ok(merged) => merged,
                    Err(err) => {
                        claims.release(&state.edges);
                        return Err(err.into());
                    }
                };
                self.apply_merge(&mut state, survivor, absorbed, merged);
                Arc::clone(survivor)
            }
            None => {
                let region = self.new_region(&mut state, self.controller.create());
                tracing::debug!(region = region.id(), %pos, "created region");
                claims.adopt(Arc::clone(&region));
                region
            }
        };

        self.make_live(&mut state, &survivor, chunk);

        for region in &ticking {
            state.edges.add(survivor.id(), region.id());
        }
        if !ticking.is_empty() {
            tracing::debug!(
                region = survivor.id(),
                ticking = ?ticking.iter().map(|r| r.id()).collect::<Vec<_>>(),
                "merge deferred until ticking neighbours stop"
            );
        }

        claims.release(&state.edges);
        Ok(survivor)
    }

    /// Record `chunk` in `region` and give it the chunk's section plus every
    /// unowned section within `empty_section_creation_radius` as buffers.
    /// Sections of `region` in that radius are revived.
    fn make_live(&self, state: &mut State<D>, region: &Arc<Region<D>>, chunk: ChunkPos) {
        let pos = chunk.section(self.config.section_chunk_shift);
        let mut table = region.table_mut();
        if table.insert_empty(pos) {
            state.sections.insert(pos, Arc::clone(region));
        }
        table.add_chunk(chunk, self.config.section_chunk_shift);
        for near in pos.surrounding(self.config.empty_section_creation_radius) {
            match state.sections.get(&near) {
                None => {
                    table.insert_empty(near);
                    state.sections.insert(near, Arc::clone(region));
                }
                Some(owner) if owner.id() == region.id() => table.revive(near),
                Some(_) => {}
            }
        }
    }

    /// Mark chunk `(x, z)` unloaded. False if it was not loaded.
    ///
    /// When its section stops being live, the neighbourhood is queued for
    /// reclassification and, unless the owner is ticking, an opportunistic
    /// recalculation pass runs immediately.
    pub fn remove_chunk(&self, x: i32, z: i32) -> bool {
        let shift = self.config.section_chunk_shift;
        let chunk = ChunkPos::new(x, z);
        let pos = chunk.section(shift);
        let mut state = self.lock();

        let Some(owner) = state.sections.get(&pos).cloned() else {
            return false;
        };
        match owner.table_mut().remove_chunk(chunk, shift) {
            ChunkRemoved::NotLoaded => return false,
            ChunkRemoved::Removed => return true,
            ChunkRemoved::SectionEmpty => {}
        }

        let _span = tracing::info_span!("remove_chunk", x, z, region = owner.id()).entered();
        {
            let mut table = owner.table_mut();
            for near in pos.surrounding(self.config.empty_section_creation_radius) {
                table.mark_dirty(near);
            }
        }

        let mut claims = Claims::default();
        if claims.claim(&owner) {
            self.opportunistic_recalculation(&mut state, &mut claims, &owner);
        }
        claims.release(&state.edges);
        true
    }

    /// Move `region` from READY to TICKING. Lock-free.
    ///
    /// Only one caller can win for a given READY region; TRANSIENT, TICKING
    /// and DEAD regions are refused.
    pub fn try_mark_ticking(&self, region: &Arc<Region<D>>) -> bool {
        region.transition(RegionState::Ready, RegionState::Ticking)
    }

    /// Move `region` from TICKING back to READY, then resolve the deferred
    /// merges recorded against it and run an opportunistic recalculation.
    ///
    /// False, with no effect, if the region was not ticking.
    pub fn mark_not_ticking(&self, region: &Arc<Region<D>>) -> bool {
        if !region.transition(RegionState::Ticking, RegionState::Ready) {
            return false;
        }
        let mut state = self.lock();
        let mut claims = Claims::default();
        if !claims.claim(region) {
            // re-ticked or merged away between the CAS and the lock
            return true;
        }

        let mut ticking = Vec::new();
        self.claim_waiting_partners(&state, &mut claims, &mut ticking);
        let claimed = claims.sorted();

        let mut survivor = Arc::clone(region);
        if let Some((first, absorbed)) = claimed.split_first() {
            if !absorbed.is_empty() {
                let _span = tracing::info_span!("deferred_merge", region = region.id()).entered();
                match self.plan_merge(first, absorbed) {
                    Ok(merged) => {
                        self.apply_merge(&mut state, first, absorbed, merged);
                        survivor = Arc::clone(first);
                    }
                    Err(err) => {
                        tracing::error!(
                            region = region.id(),
                            %err,
                            "deferred merge failed, retrying after the next tick"
                        );
                        claims.release(&state.edges);
                        region.set_state(RegionState::Ready);
                        return true;
                    }
                }
            }
        }

        self.opportunistic_recalculation(&mut state, &mut claims, &survivor);
        claims.release(&state.edges);
        true
    }

    /// Claim, transitively, every non-ticking region with a deferred merge
    /// against a claimed one. Ticking partners are collected in `ticking`.
    fn claim_waiting_partners(
        &self,
        state: &State<D>,
        claims: &mut Claims<D>,
        ticking: &mut Vec<Arc<Region<D>>>,
    ) {
        let mut frontier = claims.ids();
        let mut seen: HashSet<u64> = frontier
            .iter()
            .copied()
            .chain(ticking.iter().map(|r| r.id()))
            .collect();
        while let Some(id) = frontier.pop() {
            for partner in state.edges.partners(id) {
                if !seen.insert(partner) {
                    continue;
                }
                let Some(region) = state.regions.get(&partner) else {
                    continue;
                };
                if claims.claim(region) {
                    frontier.push(partner);
                } else {
                    ticking.push(Arc::clone(region));
                }
            }
        }
    }

    /// Fold the payloads of `absorbed` into `survivor` without touching any
    /// region. `None` when there is nothing to merge.
    fn plan_merge(
        &self,
        survivor: &Region<D>,
        absorbed: &[Arc<Region<D>>],
    ) -> Result<Option<D>, ControllerError> {
        let mut merged: Option<D> = None;
        for region in absorbed {
            let other = region.data();
            let next = match &merged {
                Some(acc) => self.controller.merge(acc, &other),
                None => self.controller.merge(&survivor.data(), &other),
            };
            merged = Some(next.map_err(|err| tag_merge_error(err, survivor.id(), region.id()))?);
        }
        Ok(merged)
    }

    /// Move sections, tasks and deferred merges of `absorbed` into `survivor`
    /// and retire the absorbed regions.
    fn apply_merge(
        &self,
        state: &mut State<D>,
        survivor: &Arc<Region<D>>,
        absorbed: &[Arc<Region<D>>],
        merged: Option<D>,
    ) {
        for region in absorbed {
            let moved = region.table_mut().take_all();
            {
                let mut table = survivor.table_mut();
                for section in moved {
                    let pos = section.pos();
                    let stale = section.kind() == SectionKind::Dead;
                    table.insert_moved(section);
                    if stale {
                        table.mark_dirty(pos);
                    }
                    state.sections.insert(pos, Arc::clone(survivor));
                }
            }
            survivor.task_queue().absorb(region.task_queue());
            region.set_state(RegionState::Dead);
            state.regions.remove(&region.id());
            for partner in state.edges.take(region.id()) {
                state.edges.add(survivor.id(), partner);
            }
        }
        if let Some(data) = merged {
            survivor.replace_data(data);
        }
        if !absorbed.is_empty() {
            tracing::debug!(
                survivor = survivor.id(),
                absorbed = ?absorbed.iter().map(|r| r.id()).collect::<Vec<_>>(),
                sections = survivor.section_count(),
                "merged regions"
            );
        }
    }

    /// Queue `task` on whichever region owns chunk `(x, z)`.
    ///
    /// Routing happens under the regionizer lock, so the task cannot land on
    /// a region that is concurrently being merged away.
    pub fn queue_chunk_task(
        &self,
        x: i32,
        z: i32,
        task: impl FnOnce() + Send + 'static,
    ) -> Result<Arc<Region<D>>, RegionizerError> {
        let state = self.lock();
        let pos = ChunkPos::new(x, z).section(self.config.section_chunk_shift);
        let owner = state
            .sections
            .get(&pos)
            .ok_or(RegionizerError::ChunkNotOwned { x, z })?;
        owner.task_queue().queue_chunk_task(x, z, task);
        Ok(Arc::clone(owner))
    }

    /// Current owner of the section containing chunk `(x, z)`.
    pub fn region_for_chunk(&self, x: i32, z: i32) -> Option<Arc<Region<D>>> {
        self.region_for_section(SectionPos::from_chunk(
            x,
            z,
            self.config.section_chunk_shift,
        ))
    }

    pub fn region_for_section(&self, pos: SectionPos) -> Option<Arc<Region<D>>> {
        self.lock().sections.get(&pos).cloned()
    }

    /// Consistent copy of the live region set, ordered by id.
    pub fn snapshot_regions(&self) -> Vec<Arc<Region<D>>> {
        self.lock().regions.values().cloned().collect()
    }

    /// Apply `f` once per region of a snapshot. `f` runs outside the
    /// regionizer lock and may call back into the regionizer.
    pub fn compute_for_all_regions(&self, mut f: impl FnMut(&Arc<Region<D>>)) {
        for region in self.snapshot_regions() {
            f(&region);
        }
    }

    pub fn region_count(&self) -> usize {
        self.lock().regions.len()
    }

    /// Deferred merges not yet resolved.
    pub fn pending_merge_count(&self) -> usize {
        self.lock().edges.count()
    }

    /// Ids of the regions `region_id` still has to merge with.
    pub fn pending_merge_partners(&self, region_id: u64) -> Vec<u64> {
        self.lock().edges.partners(region_id)
    }
}

impl<D> std::fmt::Debug for Regionizer<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Regionizer")
            .field("config", &self.config)
            .field("regions", &state.regions.len())
            .field("sections", &state.sections.len())
            .field("pending_merges", &state.edges.count())
            .finish()
    }
}

fn tag_merge_error(err: ControllerError, survivor: u64, absorbed: u64) -> ControllerError {
    match err {
        ControllerError::Rejected(reason) => ControllerError::Merge {
            survivor,
            absorbed,
            reason,
        },
        other => other,
    }
}

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tickspace_common::SectionPos;

use super::claims::Claims;
use super::{Regionizer, State};
use crate::controller::SplitPart;
use crate::error::{ControllerError, RegionizerError};
use crate::region::{Region, RegionSection, RegionState, SectionKind};

/// What a full recalculation did to a region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecalculationOutcome {
    Unchanged,
    /// Dead sections released; the region is otherwise untouched.
    Pruned { sections: usize },
    /// The region was disconnected. It is DEAD and these regions replace it.
    Split { regions: Vec<u64> },
    /// No live section remained. The region is DEAD.
    Emptied { dropped_tasks: usize },
}

impl<D> Regionizer<D> {
    /// Run a full connectivity recalculation of `region` now.
    ///
    /// Errors with [`RegionizerError::RegionTicking`] while the region is
    /// ticking and [`RegionizerError::RegionDead`] for stale handles. A
    /// failing controller leaves the region unchanged.
    pub fn recalculate(
        &self,
        region: &Arc<Region<D>>,
    ) -> Result<RecalculationOutcome, RegionizerError> {
        let mut state = self.lock();
        if region.is_dead() {
            return Err(RegionizerError::RegionDead(region.id()));
        }
        let mut claims = Claims::default();
        if !claims.claim(region) {
            return Err(RegionizerError::RegionTicking(region.id()));
        }
        let _span = tracing::info_span!("recalculate", region = region.id()).entered();
        let outcome = self.recalculate_claimed(&mut state, &mut claims, region);
        claims.release(&state.edges);
        Ok(outcome?)
    }

    /// Reclassify a bounded number of dirty sections and escalate to a full
    /// recalculation when too many sections are dead.
    pub(super) fn opportunistic_recalculation(
        &self,
        state: &mut State<D>,
        claims: &mut Claims<D>,
        region: &Arc<Region<D>>,
    ) {
        if region.is_dead() {
            return;
        }
        let needs_full = {
            let mut table = region.table_mut();
            for pos in table.pop_dirty(self.config.recalculation_section_count) {
                table.reclassify(pos, self.config.empty_section_creation_radius);
            }
            table.live_count() == 0
                || table.dead_count() as f64
                    > table.len() as f64 * self.config.max_dead_section_percent
        };
        if !needs_full {
            return;
        }
        match self.recalculate_claimed(state, claims, region) {
            Ok(outcome) => {
                tracing::debug!(region = region.id(), ?outcome, "recalculated region");
            }
            Err(err) => {
                tracing::error!(region = region.id(), %err, "recalculation failed");
            }
        }
    }

    pub(super) fn recalculate_claimed(
        &self,
        state: &mut State<D>,
        claims: &mut Claims<D>,
        region: &Arc<Region<D>>,
    ) -> Result<RecalculationOutcome, ControllerError> {
        let mut live: Vec<SectionPos> = region.table().live_positions().collect();
        if live.is_empty() {
            return Ok(self.retire_empty(state, claims, region));
        }
        live.sort();
        let mut components = connected_components(&live, self.config.connectivity_radius());
        if components.len() == 1 {
            return Ok(self.prune_dead_sections(state, region));
        }
        attach_buffers(
            &mut components,
            region.table().positions(),
            self.config.empty_section_creation_radius,
        );
        self.split_region(state, claims, region, components)
    }

    fn retire_empty(
        &self,
        state: &mut State<D>,
        claims: &mut Claims<D>,
        region: &Arc<Region<D>>,
    ) -> RecalculationOutcome {
        let sections = region.table_mut().take_all();
        release_sections(state, region.id(), sections.iter().map(RegionSection::pos));
        let dropped_tasks = region.task_queue().clear();
        region.set_state(RegionState::Dead);
        state.regions.remove(&region.id());
        self.drop_merge_edges(state, claims, region.id());
        tracing::debug!(
            region = region.id(),
            sections = sections.len(),
            dropped_tasks,
            "region emptied"
        );
        RecalculationOutcome::Emptied { dropped_tasks }
    }

    fn prune_dead_sections(&self, state: &mut State<D>, region: &Region<D>) -> RecalculationOutcome {
        let radius = self.config.empty_section_creation_radius;
        let mut table = region.table_mut();
        table.clear_dirty();
        let positions: Vec<SectionPos> = table.positions().collect();
        for &pos in &positions {
            table.reclassify(pos, radius);
        }
        let dead: Vec<SectionPos> = positions
            .into_iter()
            .filter(|&pos| table.get(pos).map(RegionSection::kind) == Some(SectionKind::Dead))
            .collect();
        if dead.is_empty() {
            return RecalculationOutcome::Unchanged;
        }
        for &pos in &dead {
            table.remove(pos);
        }
        release_sections(state, region.id(), dead.iter().copied());
        RecalculationOutcome::Pruned {
            sections: dead.len(),
        }
    }

    /// Replace `region` by one fresh region per connected component. The
    /// controller runs before anything is moved.
    fn split_region(
        &self,
        state: &mut State<D>,
        claims: &mut Claims<D>,
        region: &Arc<Region<D>>,
        components: Vec<HashSet<SectionPos>>,
    ) -> Result<RecalculationOutcome, ControllerError> {
        let shift = self.config.section_chunk_shift;
        let parts: Vec<SplitPart> = components
            .into_iter()
            .map(|sections| SplitPart {
                sections,
                section_chunk_shift: shift,
            })
            .collect();
        let payloads = self
            .controller
            .split(&region.data(), &parts)
            .map_err(|err| match err {
                ControllerError::Rejected(reason) => ControllerError::Split {
                    region: region.id(),
                    reason,
                },
                other => other,
            })?;
        if payloads.len() != parts.len() {
            return Err(ControllerError::SplitArity {
                region: region.id(),
                expected: parts.len(),
                actual: payloads.len(),
            });
        }

        let mut moved: HashMap<SectionPos, RegionSection> = region
            .table_mut()
            .take_all()
            .into_iter()
            .map(|section| (section.pos(), section))
            .collect();

        let mut created = Vec::with_capacity(parts.len());
        for (part, data) in parts.iter().zip(payloads) {
            let queue = region.task_queue().split_for_sections(&part.sections, shift);
            let child = Arc::new(Region::with_parts(self.next_id(), shift, data, queue));
            {
                let mut table = child.table_mut();
                for pos in &part.sections {
                    if let Some(section) = moved.remove(pos) {
                        table.insert_moved(section);
                        table.revive(*pos);
                    }
                    state.sections.insert(*pos, Arc::clone(&child));
                }
            }
            state.regions.insert(child.id(), Arc::clone(&child));
            claims.adopt(Arc::clone(&child));
            created.push(child);
        }

        release_sections(state, region.id(), moved.into_keys());
        let dropped_tasks = region.task_queue().clear();
        region.set_state(RegionState::Dead);
        state.regions.remove(&region.id());

        for partner in state.edges.take(region.id()) {
            let Some(other) = state.regions.get(&partner).cloned() else {
                continue;
            };
            let other_sections = other.section_positions();
            let mut forwarded = false;
            for child in &created {
                if self.within_merge_radius(child, &other_sections) {
                    state.edges.add(child.id(), partner);
                    forwarded = true;
                }
            }
            if !forwarded && !state.edges.has(partner) {
                claims.claim(&other);
            }
        }

        let regions: Vec<u64> = created.iter().map(|r| r.id()).collect();
        tracing::debug!(
            region = region.id(),
            into = ?regions,
            dropped_tasks,
            "split region"
        );
        Ok(RecalculationOutcome::Split { regions })
    }

    fn within_merge_radius(&self, region: &Region<D>, others: &HashSet<SectionPos>) -> bool {
        region.section_positions().into_iter().any(|pos| {
            pos.surrounding(self.config.merge_radius)
                .any(|near| others.contains(&near))
        })
    }

    /// Forget every deferred merge of a retired region. Partners left with
    /// nothing to wait for are claimed so the release hands them back READY.
    fn drop_merge_edges(&self, state: &mut State<D>, claims: &mut Claims<D>, id: u64) {
        for partner in state.edges.take(id) {
            if state.edges.has(partner) {
                continue;
            }
            if let Some(region) = state.regions.get(&partner) {
                claims.claim(region);
            }
        }
    }
}

/// Remove `positions` from the section map where `owner` still owns them.
fn release_sections<D>(
    state: &mut State<D>,
    owner: u64,
    positions: impl IntoIterator<Item = SectionPos>,
) {
    for pos in positions {
        if state.sections.get(&pos).is_some_and(|r| r.id() == owner) {
            state.sections.remove(&pos);
        }
    }
}

/// Give every non-live section within `radius` of a component's live sections
/// to the first such component. Sections near no component stay out.
fn attach_buffers(
    components: &mut [HashSet<SectionPos>],
    positions: impl Iterator<Item = SectionPos>,
    radius: i32,
) {
    let live: Vec<HashSet<SectionPos>> = components.to_vec();
    for pos in positions {
        if live.iter().any(|c| c.contains(&pos)) {
            continue;
        }
        let owner = live
            .iter()
            .position(|c| pos.surrounding(radius).any(|near| c.contains(&near)));
        if let Some(i) = owner {
            components[i].insert(pos);
        }
    }
}

/// Group `live` into components where sections within `radius` (Chebyshev)
/// of each other are connected. Components come out in the order of their
/// first member in `live`.
pub(crate) fn connected_components(live: &[SectionPos], radius: i32) -> Vec<HashSet<SectionPos>> {
    let members: HashSet<SectionPos> = live.iter().copied().collect();
    let mut seen: HashSet<SectionPos> = HashSet::with_capacity(live.len());
    let mut components = Vec::new();
    for &start in live {
        if !seen.insert(start) {
            continue;
        }
        let mut component = HashSet::from([start]);
        let mut stack = vec![start];
        while let Some(pos) = stack.pop() {
            for near in pos.surrounding(radius) {
                if members.contains(&near) && seen.insert(near) {
                    component.insert(near);
                    stack.push(near);
                }
            }
        }
        components.push(component);
    }
    components
}

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tickspace_common::{centroid, ChunkPos, SectionPos};

use crate::task_queue::RegionTaskQueue;

/// Lifecycle of a region.
///
/// ```text
/// TRANSIENT --(structural op done, no deferred merge)--> READY
/// READY --try_mark_ticking--> TICKING --mark_not_ticking--> READY
/// READY/TRANSIENT --(absorbed, split, emptied)--> DEAD
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum RegionState {
    /// Held by the regionizer during a structural change, or waiting on a
    /// deferred merge. Never ticked.
    Transient = 0,
    /// Eligible to be ticked.
    Ready = 1,
    /// Owned by exactly one worker thread for the duration of a tick.
    Ticking = 2,
    /// Merged away, split or emptied. A stale handle only.
    Dead = 3,
}

impl RegionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Transient,
            1 => Self::Ready,
            2 => Self::Ticking,
            _ => Self::Dead,
        }
    }
}

impl std::fmt::Display for RegionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Transient => "TRANSIENT",
            Self::Ready => "READY",
            Self::Ticking => "TICKING",
            Self::Dead => "DEAD",
        };
        f.write_str(name)
    }
}

/// Classification of an owned section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SectionKind {
    /// Contains at least one loaded chunk.
    Live,
    /// Empty, kept around a live section for locality.
    Buffer,
    /// Empty and no longer near any live section of its region.
    Dead,
}

/// A section owned by a region, with the loaded chunks inside it.
#[derive(Debug, Clone)]
pub struct RegionSection {
    pos: SectionPos,
    chunks: BTreeSet<ChunkPos>,
    dead: bool,
}

impl RegionSection {
    fn new(pos: SectionPos) -> Self {
        Self {
            pos,
            chunks: BTreeSet::new(),
            dead: false,
        }
    }

    pub fn pos(&self) -> SectionPos {
        self.pos
    }

    pub fn chunks(&self) -> impl Iterator<Item = ChunkPos> + '_ {
        self.chunks.iter().copied()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_live(&self) -> bool {
        !self.chunks.is_empty()
    }

    pub fn kind(&self) -> SectionKind {
        if self.is_live() {
            SectionKind::Live
        } else if self.dead {
            SectionKind::Dead
        } else {
            SectionKind::Buffer
        }
    }
}

/// Outcome of recording a chunk in a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChunkAdded {
    AlreadyLoaded,
    Added,
    /// First chunk of a previously empty section.
    SectionLive,
}

/// Outcome of forgetting a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChunkRemoved {
    NotLoaded,
    Removed,
    /// Last chunk of the section.
    SectionEmpty,
}

/// Sections owned by one region plus the counters the recalculation pass uses.
#[derive(Debug, Default)]
pub(crate) struct SectionTable {
    sections: HashMap<SectionPos, RegionSection>,
    live: usize,
    dead: usize,
    chunks: usize,
    /// Sections whose classification may be stale.
    dirty: BTreeSet<SectionPos>,
}

impl SectionTable {
    pub(crate) fn len(&self) -> usize {
        self.sections.len()
    }

    pub(crate) fn live_count(&self) -> usize {
        self.live
    }

    pub(crate) fn dead_count(&self) -> usize {
        self.dead
    }

    pub(crate) fn contains(&self, pos: SectionPos) -> bool {
        self.sections.contains_key(&pos)
    }

    pub(crate) fn get(&self, pos: SectionPos) -> Option<&RegionSection> {
        self.sections.get(&pos)
    }

    pub(crate) fn is_live(&self, pos: SectionPos) -> bool {
        self.sections.get(&pos).is_some_and(RegionSection::is_live)
    }

    pub(crate) fn positions(&self) -> impl Iterator<Item = SectionPos> + '_ {
        self.sections.keys().copied()
    }

    pub(crate) fn live_positions(&self) -> impl Iterator<Item = SectionPos> + '_ {
        self.sections
            .values()
            .filter(|s| s.is_live())
            .map(RegionSection::pos)
    }

    /// Add an empty buffer section. Returns false if already owned.
    pub(crate) fn insert_empty(&mut self, pos: SectionPos) -> bool {
        if self.sections.contains_key(&pos) {
            return false;
        }
        self.sections.insert(pos, RegionSection::new(pos));
        true
    }

    /// Adopt a section taken from another region's table.
    pub(crate) fn insert_moved(&mut self, section: RegionSection) {
        if section.is_live() {
            self.live += 1;
        }
        if section.dead {
            self.dead += 1;
        }
        self.chunks += section.chunks.len();
        if let Some(old) = self.sections.insert(section.pos, section) {
            self.forget_counts(&old);
        }
    }

    pub(crate) fn remove(&mut self, pos: SectionPos) -> Option<RegionSection> {
        let section = self.sections.remove(&pos)?;
        self.forget_counts(&section);
        self.dirty.remove(&pos);
        Some(section)
    }

    /// Empty the table, returning every section.
    pub(crate) fn take_all(&mut self) -> Vec<RegionSection> {
        let taken = std::mem::take(self);
        taken.sections.into_values().collect()
    }

    fn forget_counts(&mut self, section: &RegionSection) {
        if section.is_live() {
            self.live -= 1;
        }
        if section.dead {
            self.dead -= 1;
        }
        self.chunks -= section.chunks.len();
    }

    /// Record `chunk` in its (already owned) section.
    pub(crate) fn add_chunk(&mut self, chunk: ChunkPos, shift: u32) -> Option<ChunkAdded> {
        let section = self.sections.get_mut(&chunk.section(shift))?;
        let was_live = section.is_live();
        if !section.chunks.insert(chunk) {
            return Some(ChunkAdded::AlreadyLoaded);
        }
        self.chunks += 1;
        if section.dead {
            section.dead = false;
            self.dead -= 1;
        }
        if was_live {
            Some(ChunkAdded::Added)
        } else {
            self.live += 1;
            Some(ChunkAdded::SectionLive)
        }
    }

    pub(crate) fn remove_chunk(&mut self, chunk: ChunkPos, shift: u32) -> ChunkRemoved {
        let Some(section) = self.sections.get_mut(&chunk.section(shift)) else {
            return ChunkRemoved::NotLoaded;
        };
        if !section.chunks.remove(&chunk) {
            return ChunkRemoved::NotLoaded;
        }
        self.chunks -= 1;
        if section.is_live() {
            ChunkRemoved::Removed
        } else {
            self.live -= 1;
            ChunkRemoved::SectionEmpty
        }
    }

    /// Clear the dead flag of an owned section.
    pub(crate) fn revive(&mut self, pos: SectionPos) {
        if let Some(section) = self.sections.get_mut(&pos) {
            if section.dead {
                section.dead = false;
                self.dead -= 1;
            }
        }
    }

    pub(crate) fn mark_dirty(&mut self, pos: SectionPos) {
        if self.sections.contains_key(&pos) {
            self.dirty.insert(pos);
        }
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.dirty.clear();
    }

    pub(crate) fn pop_dirty(&mut self, limit: usize) -> Vec<SectionPos> {
        let mut out = Vec::with_capacity(limit.min(self.dirty.len()));
        while out.len() < limit {
            match self.dirty.pop_first() {
                Some(pos) => out.push(pos),
                None => break,
            }
        }
        out
    }

    /// Recompute the dead flag of `pos`: an empty section is dead when no live
    /// section of this table lies within `radius`.
    pub(crate) fn reclassify(&mut self, pos: SectionPos, radius: i32) {
        let Some(section) = self.sections.get(&pos) else {
            return;
        };
        let dead = !section.is_live()
            && !pos
                .surrounding(radius)
                .any(|near| near != pos && self.is_live(near));
        if let Some(section) = self.sections.get_mut(&pos) {
            if section.dead != dead {
                section.dead = dead;
                if dead {
                    self.dead += 1;
                } else {
                    self.dead -= 1;
                }
            }
        }
    }
}

/// A cluster of sections ticked as a unit by one worker thread at a time.
///
/// Handles are shared (`Arc<Region<D>>`). Once a region is DEAD its handle
/// keeps answering with its last-known contents; resolve the chunk again with
/// [`crate::Regionizer::region_for_chunk`] to find the current owner.
pub struct Region<D> {
    id: u64,
    state: AtomicU8,
    section_chunk_shift: u32,
    table: RwLock<SectionTable>,
    task_queue: RegionTaskQueue,
    data: Mutex<D>,
}

impl<D> Region<D> {
    pub(crate) fn new(id: u64, section_chunk_shift: u32, data: D) -> Self {
        Self {
            id,
            state: AtomicU8::new(RegionState::Transient as u8),
            section_chunk_shift,
            table: RwLock::new(SectionTable::default()),
            task_queue: RegionTaskQueue::new(),
            data: Mutex::new(data),
        }
    }

    pub(crate) fn with_parts(
        id: u64,
        section_chunk_shift: u32,
        data: D,
        task_queue: RegionTaskQueue,
    ) -> Self {
        Self {
            task_queue,
            ..Self::new(id, section_chunk_shift, data)
        }
    }

    /// Unique for the process lifetime, never reused.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> RegionState {
        RegionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_ticking(&self) -> bool {
        self.state() == RegionState::Ticking
    }

    pub fn is_dead(&self) -> bool {
        self.state() == RegionState::Dead
    }

    /// Atomically move from `from` to `to`. False if the state was not `from`.
    pub(crate) fn transition(&self, from: RegionState, to: RegionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Unconditional store. Only for regions claimed by the regionizer.
    pub(crate) fn set_state(&self, state: RegionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn table(&self) -> RwLockReadGuard<'_, SectionTable> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn table_mut(&self) -> RwLockWriteGuard<'_, SectionTable> {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of every owned section.
    pub fn sections(&self) -> Vec<RegionSection> {
        let mut out: Vec<RegionSection> = self.table().sections.values().cloned().collect();
        out.sort_by_key(RegionSection::pos);
        out
    }

    pub fn section_positions(&self) -> HashSet<SectionPos> {
        self.table().positions().collect()
    }

    pub fn live_section_positions(&self) -> HashSet<SectionPos> {
        self.table().live_positions().collect()
    }

    pub fn section_count(&self) -> usize {
        self.table().len()
    }

    pub fn live_section_count(&self) -> usize {
        self.table().live_count()
    }

    /// Sections currently flagged dead. May lag behind until the next
    /// recalculation pass reclassifies them.
    pub fn dead_section_count(&self) -> usize {
        self.table().dead_count()
    }

    pub fn contains_section(&self, pos: SectionPos) -> bool {
        self.table().contains(pos)
    }

    pub fn section_kind(&self, pos: SectionPos) -> Option<SectionKind> {
        self.table().get(pos).map(RegionSection::kind)
    }

    pub fn contains_chunk(&self, x: i32, z: i32) -> bool {
        let chunk = ChunkPos::new(x, z);
        self.table()
            .get(chunk.section(self.section_chunk_shift))
            .is_some_and(|s| s.chunks.contains(&chunk))
    }

    /// Every loaded chunk, sorted.
    pub fn chunks(&self) -> Vec<ChunkPos> {
        let table = self.table();
        let mut out: Vec<ChunkPos> = table.sections.values().flat_map(|s| s.chunks()).collect();
        out.sort();
        out
    }

    pub fn chunk_count(&self) -> usize {
        self.table().chunks
    }

    /// Representative chunk: centroid of the live sections.
    pub fn center_chunk(&self) -> Option<ChunkPos> {
        let table = self.table();
        centroid(table.live_positions(), self.section_chunk_shift)
    }

    pub fn section_chunk_shift(&self) -> u32 {
        self.section_chunk_shift
    }

    pub fn task_queue(&self) -> &RegionTaskQueue {
        &self.task_queue
    }

    /// Lock and return the region payload.
    pub fn data(&self) -> MutexGuard<'_, D> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn replace_data(&self, data: D) -> D {
        std::mem::replace(&mut *self.data(), data)
    }
}

impl<D> std::fmt::Display for Region<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.table();
        write!(
            f,
            "Region#{} [{}] sections={} live={} dead={} chunks={}",
            self.id,
            self.state(),
            table.len(),
            table.live_count(),
            table.dead_count(),
            table.chunks
        )
    }
}

impl<D> std::fmt::Debug for Region<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Region")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("sections", &self.section_count())
            .finish_non_exhaustive()
    }
}

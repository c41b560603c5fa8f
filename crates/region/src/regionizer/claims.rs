use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::region::{Region, RegionState};

/// Deferred-merge obligations: a symmetric adjacency between region ids.
///
/// An edge means the two regions must end up in one region but could not be
/// merged when the conflict arose because one side was ticking.
#[derive(Debug, Default)]
pub(super) struct MergeEdges {
    adjacency: HashMap<u64, BTreeSet<u64>>,
}

impl MergeEdges {
    pub(super) fn add(&mut self, a: u64, b: u64) {
        if a == b {
            return;
        }
        self.adjacency.entry(a).or_default().insert(b);
        self.adjacency.entry(b).or_default().insert(a);
    }

    pub(super) fn has(&self, id: u64) -> bool {
        self.adjacency.contains_key(&id)
    }

    pub(super) fn partners(&self, id: u64) -> Vec<u64> {
        self.adjacency
            .get(&id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Remove every edge touching `id`, returning its former partners.
    pub(super) fn take(&mut self, id: u64) -> BTreeSet<u64> {
        let partners = self.adjacency.remove(&id).unwrap_or_default();
        for partner in &partners {
            if let Some(set) = self.adjacency.get_mut(partner) {
                set.remove(&id);
                if set.is_empty() {
                    self.adjacency.remove(partner);
                }
            }
        }
        partners
    }

    /// Number of undirected edges.
    pub(super) fn count(&self) -> usize {
        self.adjacency.values().map(BTreeSet::len).sum::<usize>() / 2
    }
}

/// Regions held TRANSIENT by the structural operation in progress.
///
/// Only the holder of the regionizer lock claims regions, and every claim is
/// released before the lock is dropped. A TRANSIENT region observed outside an
/// operation is therefore one waiting on a deferred merge.
pub(super) struct Claims<D> {
    held: Vec<Arc<Region<D>>>,
}

impl<D> Default for Claims<D> {
    fn default() -> Self {
        Self { held: Vec::new() }
    }
}

impl<D> Claims<D> {
    /// Take `region` for a structural change. False if it is ticking or dead.
    pub(super) fn claim(&mut self, region: &Arc<Region<D>>) -> bool {
        if self.holds(region.id()) {
            return true;
        }
        loop {
            match region.state() {
                RegionState::Transient => break,
                RegionState::Ready => {
                    if region.transition(RegionState::Ready, RegionState::Transient) {
                        break;
                    }
                    // lost the race against try_mark_ticking; re-read
                }
                RegionState::Ticking | RegionState::Dead => return false,
            }
        }
        self.held.push(Arc::clone(region));
        true
    }

    /// Hold a region created by this operation.
    pub(super) fn adopt(&mut self, region: Arc<Region<D>>) {
        debug_assert_eq!(region.state(), RegionState::Transient);
        self.held.push(region);
    }

    pub(super) fn holds(&self, id: u64) -> bool {
        self.held.iter().any(|r| r.id() == id)
    }

    pub(super) fn ids(&self) -> Vec<u64> {
        self.held.iter().map(|r| r.id()).collect()
    }

    /// Live claimed regions ordered by id.
    pub(super) fn sorted(&self) -> Vec<Arc<Region<D>>> {
        let mut out: Vec<Arc<Region<D>>> = self
            .held
            .iter()
            .filter(|r| !r.is_dead())
            .cloned()
            .collect();
        out.sort_by_key(|r| r.id());
        out
    }

    /// Hand every claimed region back: READY, or TRANSIENT while a deferred
    /// merge is still recorded against it.
    pub(super) fn release(self, edges: &MergeEdges) {
        for region in self.held {
            if region.is_dead() || edges.has(region.id()) {
                continue;
            }
            region.set_state(RegionState::Ready);
        }
    }
}

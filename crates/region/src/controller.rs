use std::collections::HashSet;

use tickspace_common::{ChunkPos, SectionPos};

use crate::error::ControllerError;

/// One connected component handed to [`RegionDataController::split`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitPart {
    /// Live sections of the component plus the buffer sections attached to
    /// them; the new region will own exactly these.
    pub sections: HashSet<SectionPos>,
    pub section_chunk_shift: u32,
}

impl SplitPart {
    pub fn contains_section(&self, pos: SectionPos) -> bool {
        self.sections.contains(&pos)
    }

    pub fn contains_chunk(&self, x: i32, z: i32) -> bool {
        self.sections
            .contains(&ChunkPos::new(x, z).section(self.section_chunk_shift))
    }
}

/// Caller-supplied policy for the opaque per-region payload `D`.
///
/// Invoked only while the regionizer lock is held, during structural changes.
/// Inputs are borrowed: when a call fails the regionizer discards the attempt
/// and both payloads remain attached to their regions unchanged.
pub trait RegionDataController<D>: Send + Sync {
    /// Payload for a brand-new region.
    fn create(&self) -> D;

    /// Combine the payloads of two merging regions.
    ///
    /// Must be monotonic-forward: progress counters in the result are at least
    /// the maximum either input had reached.
    fn merge(&self, survivor: &D, absorbed: &D) -> Result<D, ControllerError>;

    /// Partition a payload across the components of a split, returning exactly
    /// one payload per entry of `parts`, in the same order.
    fn split(&self, original: &D, parts: &[SplitPart]) -> Result<Vec<D>, ControllerError>;
}

/// Controller for regions that carry no payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnitController;

impl RegionDataController<()> for UnitController {
    fn create(&self) {}

    fn merge(&self, _survivor: &(), _absorbed: &()) -> Result<(), ControllerError> {
        Ok(())
    }

    fn split(&self, _original: &(), parts: &[SplitPart]) -> Result<Vec<()>, ControllerError> {
        Ok(vec![(); parts.len()])
    }
}

use serde::{Deserialize, Serialize};
use tickspace_region::{ControllerError, RegionDataController, SplitPart};

/// Reference region payload: monotonic progress counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickData {
    /// Ticks the region has completed.
    pub current_tick: u64,
    /// Secondary counter advanced by callers on their own schedule.
    pub redstone_tick: u64,
}

impl TickData {
    pub fn advance_current_tick(&mut self) {
        self.current_tick += 1;
    }

    pub fn advance_redstone_tick(&mut self) {
        self.redstone_tick += 1;
    }

    pub fn apply_offset(&mut self, current: u64, redstone: u64) {
        self.current_tick += current;
        self.redstone_tick += redstone;
    }

    /// Keep the furthest progress of both payloads.
    pub fn absorb(&mut self, other: &TickData) {
        self.current_tick = self.current_tick.max(other.current_tick);
        self.redstone_tick = self.redstone_tick.max(other.redstone_tick);
    }
}

/// Controller for [`TickData`]: merges keep the maximum of each counter and a
/// split hands every component a copy of the original.
#[derive(Debug, Clone, Copy, Default)]
pub struct TickDataController;

impl RegionDataController<TickData> for TickDataController {
    fn create(&self) -> TickData {
        TickData::default()
    }

    fn merge(&self, survivor: &TickData, absorbed: &TickData) -> Result<TickData, ControllerError> {
        let mut merged = *survivor;
        merged.absorb(absorbed);
        Ok(merged)
    }

    fn split(&self, original: &TickData, parts: &[SplitPart]) -> Result<Vec<TickData>, ControllerError> {
        Ok(vec![*original; parts.len()])
    }
}

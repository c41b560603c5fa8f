//! Regionizer: clusters loaded chunks into regions that are ticked
//! independently, one worker thread per region at a time.
//!
//! Chunks group into sections (`section_chunk_shift`); sections are the unit
//! of ownership. Regions merge when their live sections come within
//! `merge_radius` of each other and split when recalculation finds them
//! disconnected.
//!
//! # Invariants
//! - Every live section is owned by exactly one non-DEAD region.
//! - Live sections of different regions are farther apart than
//!   `merge_radius`, unless a deferred merge between them is pending.
//! - Only READY regions can start ticking; structural changes never touch a
//!   TICKING region.
//! - Structural operations are all-or-nothing with respect to the
//!   [`RegionDataController`].
//! - Region ids are never reused; DEAD handles stay valid as stale reads.

mod config;
mod controller;
mod error;
mod region;
mod regionizer;
mod task_queue;

pub use config::{RegionizerConfig, MAX_SECTION_CHUNK_SHIFT, MAX_SECTION_RADIUS};
pub use controller::{RegionDataController, SplitPart, UnitController};
pub use error::{ConfigError, ControllerError, RegionizerError};
pub use region::{Region, RegionSection, RegionState, SectionKind};
pub use regionizer::{RecalculationOutcome, Regionizer};
pub use task_queue::{ChunkTask, RegionTaskQueue, Task};

pub use tickspace_common::{ChunkPos, SectionPos};

pub fn crate_info() -> &'static str {
    "tickspace-region v0.1.0"
}

/// Out-of-range configuration values. Fatal at construction time.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("section_chunk_shift must be in 0..={max}, got {value}")]
    SectionShiftOutOfRange { value: u32, max: u32 },
    #[error("{field} must be non-negative, got {value}")]
    NegativeRadius { field: &'static str, value: i32 },
    #[error("{field} must be at most {max}, got {value}")]
    RadiusTooLarge {
        field: &'static str,
        value: i32,
        max: i32,
    },
    #[error("recalculation_section_count must be positive")]
    ZeroRecalculationCount,
    #[error("max_dead_section_percent must be in [0, 1], got {0}")]
    DeadSectionPercentOutOfRange(f64),
}

/// Failure reported by a [`crate::RegionDataController`].
///
/// The structural operation that invoked the controller is abandoned without
/// touching section ownership, task queues or payloads.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControllerError {
    #[error("merge of region {absorbed} into region {survivor} failed: {reason}")]
    Merge {
        survivor: u64,
        absorbed: u64,
        reason: String,
    },
    #[error("split of region {region} failed: {reason}")]
    Split { region: u64, reason: String },
    #[error("split of region {region} returned {actual} payloads for {expected} components")]
    SplitArity {
        region: u64,
        expected: usize,
        actual: usize,
    },
    /// Raised by controller implementations; the regionizer fills in region ids.
    #[error("{0}")]
    Rejected(String),
}

/// Errors surfaced by the regionizer API.
#[derive(Debug, thiserror::Error)]
pub enum RegionizerError {
    #[error("invalid regionizer configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Controller(#[from] ControllerError),
    #[error("chunk [{x}, {z}] is not owned by any region")]
    ChunkNotOwned { x: i32, z: i32 },
    #[error("region {0} is dead")]
    RegionDead(u64),
    #[error("region {0} is ticking")]
    RegionTicking(u64),
}

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Largest accepted `section_chunk_shift` (a section of 1024x1024 chunks).
pub const MAX_SECTION_CHUNK_SHIFT: u32 = 10;

/// Largest accepted `empty_section_creation_radius` and `merge_radius`, in
/// sections. Structural operations scan `(2r + 1)^2` sections under the
/// regionizer lock.
pub const MAX_SECTION_RADIUS: i32 = 32;

/// Regionizer configuration. Supplied once at construction and immutable
/// afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionizerConfig {
    /// log2 of the section edge length in chunks.
    pub section_chunk_shift: u32,
    /// Chebyshev radius of buffer sections created around a newly live section.
    pub empty_section_creation_radius: i32,
    /// Live sections of different regions closer than this (Chebyshev, in
    /// sections) must belong to the same region.
    pub merge_radius: i32,
    /// Dirty sections reclassified per opportunistic recalculation pass.
    pub recalculation_section_count: usize,
    /// Fraction of dead sections a region tolerates before it is recalculated.
    pub max_dead_section_percent: f64,
}

impl Default for RegionizerConfig {
    fn default() -> Self {
        Self {
            section_chunk_shift: 4,
            empty_section_creation_radius: 1,
            merge_radius: 1,
            recalculation_section_count: 8,
            max_dead_section_percent: 0.25,
        }
    }
}

impl RegionizerConfig {
    /// Check every field against its documented range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.section_chunk_shift > MAX_SECTION_CHUNK_SHIFT {
            return Err(ConfigError::SectionShiftOutOfRange {
                value: self.section_chunk_shift,
                max: MAX_SECTION_CHUNK_SHIFT,
            });
        }
        for (field, value) in [
            ("empty_section_creation_radius", self.empty_section_creation_radius),
            ("merge_radius", self.merge_radius),
        ] {
            if value < 0 {
                return Err(ConfigError::NegativeRadius { field, value });
            }
            if value > MAX_SECTION_RADIUS {
                return Err(ConfigError::RadiusTooLarge {
                    field,
                    value,
                    max: MAX_SECTION_RADIUS,
                });
            }
        }
        if self.recalculation_section_count == 0 {
            return Err(ConfigError::ZeroRecalculationCount);
        }
        // NaN fails the range check as well.
        if !(0.0..=1.0).contains(&self.max_dead_section_percent) {
            return Err(ConfigError::DeadSectionPercentOutOfRange(
                self.max_dead_section_percent,
            ));
        }
        Ok(())
    }

    /// Adjacency used when flood filling live sections: live sections within
    /// this distance can never end up in different regions.
    pub fn connectivity_radius(&self) -> i32 {
        self.merge_radius.max(1)
    }
}

//! Coordinate math shared by the tickspace crates.
//!
//! # Invariants
//! - Chunk to section mapping is an arithmetic shift on both axes.
//! - Packed chunk keys are lossless over the full `i32` range.

pub mod coord;

pub use coord::{centroid, chunk_key, section_of, unpack_chunk_key, ChunkPos, SectionPos};

pub fn crate_info() -> &'static str {
    "tickspace-common v0.1.0"
}

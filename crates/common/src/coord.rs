use glam::{DVec2, IVec2};
use serde::{Deserialize, Serialize};

/// Pack a chunk coordinate into a single map key: `(z << 32) | (x & 0xFFFF_FFFF)`.
pub fn chunk_key(x: i32, z: i32) -> i64 {
    ((z as i64) << 32) | (x as u32 as i64)
}

/// Inverse of [`chunk_key`].
pub fn unpack_chunk_key(key: i64) -> (i32, i32) {
    (key as i32, (key >> 32) as i32)
}

/// Section containing the chunk `(x, z)` for the given shift.
///
/// Uses arithmetic shifts, so chunk -1 lands in section -1 rather than 0.
pub fn section_of(x: i32, z: i32, shift: u32) -> SectionPos {
    SectionPos::new(x >> shift, z >> shift)
}

/// A chunk coordinate: the finest grid cell tracked by the regionizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkPos {
    pub x: i32,
    pub z: i32,
}

impl ChunkPos {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    pub fn key(self) -> i64 {
        chunk_key(self.x, self.z)
    }

    pub fn from_key(key: i64) -> Self {
        let (x, z) = unpack_chunk_key(key);
        Self { x, z }
    }

    /// Section owning this chunk.
    pub fn section(self, shift: u32) -> SectionPos {
        section_of(self.x, self.z, shift)
    }
}

impl std::fmt::Display for ChunkPos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.x, self.z)
    }
}

impl From<IVec2> for ChunkPos {
    fn from(v: IVec2) -> Self {
        Self::new(v.x, v.y)
    }
}

impl From<ChunkPos> for IVec2 {
    fn from(p: ChunkPos) -> Self {
        IVec2::new(p.x, p.z)
    }
}

/// A section coordinate: a `2^shift x 2^shift` block of chunks and the unit
/// of region ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SectionPos {
    pub x: i32,
    pub z: i32,
}

impl SectionPos {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    pub fn from_chunk(x: i32, z: i32, shift: u32) -> Self {
        section_of(x, z, shift)
    }

    pub fn key(self) -> i64 {
        chunk_key(self.x, self.z)
    }

    /// Chebyshev (chessboard) distance between two sections.
    pub fn chebyshev_distance(self, other: SectionPos) -> u32 {
        let dx = (self.x as i64 - other.x as i64).unsigned_abs();
        let dz = (self.z as i64 - other.z as i64).unsigned_abs();
        dx.max(dz) as u32
    }

    /// Every section within `radius` (inclusive, Chebyshev) of this one,
    /// including itself, in row-major order. Positions past the `i32` range
    /// are left out; the grid does not wrap.
    pub fn surrounding(self, radius: i32) -> impl Iterator<Item = SectionPos> {
        let radius = radius.max(0);
        (-radius..=radius)
            .filter_map(move |dx| self.x.checked_add(dx))
            .flat_map(move |x| {
                (-radius..=radius)
                    .filter_map(move |dz| self.z.checked_add(dz))
                    .map(move |z| SectionPos::new(x, z))
            })
    }

    /// Chunk at the middle of this section.
    pub fn center_chunk(self, shift: u32) -> ChunkPos {
        let half = (1i32 << shift) >> 1;
        ChunkPos::new(
            (self.x << shift).wrapping_add(half),
            (self.z << shift).wrapping_add(half),
        )
    }

    /// Whether `chunk` falls inside this section.
    pub fn contains_chunk(self, chunk: ChunkPos, shift: u32) -> bool {
        chunk.section(shift) == self
    }
}

impl std::fmt::Display for SectionPos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.z)
    }
}

impl From<IVec2> for SectionPos {
    fn from(v: IVec2) -> Self {
        Self::new(v.x, v.y)
    }
}

impl From<SectionPos> for IVec2 {
    fn from(p: SectionPos) -> Self {
        IVec2::new(p.x, p.z)
    }
}

/// Chunk nearest to the mean of the section centers, or `None` for an empty set.
pub fn centroid<I>(sections: I, shift: u32) -> Option<ChunkPos>
where
    I: IntoIterator<Item = SectionPos>,
{
    let mut sum = DVec2::ZERO;
    let mut count = 0usize;
    for section in sections {
        let center = section.center_chunk(shift);
        sum += DVec2::new(center.x as f64, center.z as f64);
        count += 1;
    }
    if count == 0 {
        return None;
    }
    let mean = (sum / count as f64).round();
    Some(ChunkPos::new(mean.x as i32, mean.y as i32))
}

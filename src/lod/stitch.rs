//! Stitched index buffers for crack-free joins between detail levels
//!
//! A block of resolution `R` has `(R+1)^2` vertices. The interior is a plain
//! grid; each of the four one-quad-wide border strips is built from pairs of
//! quads so that an edge bordering a coarser neighbor can drop its odd outer
//! vertices and match the neighbor's edge exactly.

use std::sync::Arc;

use super::block::{Direction, StitchMask};
use crate::render::buffer::IndexBuffer;

/// Smallest supported block resolution
pub const MIN_BLOCK_RESOLUTION: u32 = 2;

/// The 16 index buffer variants for one block resolution
#[derive(Debug)]
pub struct StitchIndexCache {
    block_resolution: u32,
    variants: Vec<Arc<IndexBuffer>>,
}

impl StitchIndexCache {
    /// Build all variants for `block_resolution` (a power of two, at least 2)
    pub fn new(block_resolution: u32) -> Self {
        let r = normalize_resolution(block_resolution);
        let variants = (0..16u8)
            .map(|bits| Arc::new(IndexBuffer::from_indices(build_indices(r, StitchMask::from_bits(bits)))))
            .collect();
        log::debug!("Built stitch index buffers for block resolution {}", r);
        Self { block_resolution: r, variants }
    }

    pub fn block_resolution(&self) -> u32 {
        self.block_resolution
    }

    /// Vertex count of a patch using these buffers
    pub fn vertex_count(&self) -> usize {
        let n = self.block_resolution as usize + 1;
        n * n
    }

    pub fn get(&self, mask: StitchMask) -> &Arc<IndexBuffer> {
        &self.variants[mask.bits() as usize]
    }
}

/// Lazily built index caches shared by every cell with the same resolution
#[derive(Debug, Default)]
pub struct IndexCacheRegistry {
    by_log2: Vec<Option<Arc<StitchIndexCache>>>,
}

impl IndexCacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_build(&mut self, block_resolution: u32) -> Arc<StitchIndexCache> {
        let r = normalize_resolution(block_resolution);
        let slot = r.trailing_zeros() as usize;
        if self.by_log2.len() <= slot {
            self.by_log2.resize(slot + 1, None);
        }
        self.by_log2[slot]
            .get_or_insert_with(|| Arc::new(StitchIndexCache::new(r)))
            .clone()
    }

    pub fn clear(&mut self) {
        self.by_log2.clear();
    }
}

/// Round down to a power of two no smaller than [`MIN_BLOCK_RESOLUTION`]
pub fn normalize_resolution(block_resolution: u32) -> u32 {
    let r = block_resolution.max(MIN_BLOCK_RESOLUTION);
    1 << (31 - r.leading_zeros())
}

/// Walk parameters of one border strip, in vertex-index units
struct EdgeWalk {
    /// Index of the first outer vertex
    start: i64,
    /// Step to the next outer vertex along the edge
    along: i64,
    /// Step from an outer vertex to the matching inner one
    inward: i64,
}

impl EdgeWalk {
    // Each walk is the north walk rotated so triangles keep their winding.
    fn new(dir: Direction, r: i64) -> Self {
        let n = r + 1;
        match dir {
            Direction::North => EdgeWalk { start: 0, along: 1, inward: n },
            Direction::East => EdgeWalk { start: r, along: n, inward: -1 },
            Direction::West => EdgeWalk { start: r * n, along: -n, inward: 1 },
            Direction::South => EdgeWalk { start: r * n + r, along: -1, inward: -n },
        }
    }

    fn outer(&self, k: i64) -> u32 {
        (self.start + k * self.along) as u32
    }

    fn inner(&self, k: i64) -> u32 {
        (self.start + k * self.along + self.inward) as u32
    }
}

/// Triangle list (counter-clockwise seen from +y) for one stitch variant
pub fn build_indices(block_resolution: u32, mask: StitchMask) -> Vec<u32> {
    let r = block_resolution as usize;
    let n = r + 1;
    let mut indices = Vec::with_capacity(6 * r * r);

    // Interior quads, one quad in from every edge
    for row in 1..r.saturating_sub(1) {
        for col in 1..r - 1 {
            let v00 = (col + row * n) as u32;
            let v10 = v00 + 1;
            let v01 = v00 + n as u32;
            let v11 = v01 + 1;
            indices.extend_from_slice(&[v00, v10, v01, v10, v11, v01]);
        }
    }

    for dir in Direction::ALL {
        push_edge(&mut indices, EdgeWalk::new(dir, r as i64), r as i64, mask.contains(dir));
    }
    indices
}

fn push_edge(indices: &mut Vec<u32>, walk: EdgeWalk, r: i64, stitched: bool) {
    let mut push = |a: u32, b: u32, c: u32| {
        if a != b && b != c && a != c {
            indices.extend_from_slice(&[a, b, c]);
        }
    };

    for x in (0..r).step_by(2) {
        // Odd outer vertices collapse onto their even predecessor when stitched
        let mid = if stitched { walk.outer(x) } else { walk.outer(x + 1) };

        if x > 0 {
            push(walk.outer(x), walk.inner(x + 1), walk.inner(x));
        }
        push(walk.outer(x), mid, walk.inner(x + 1));

        if x + 2 < r {
            push(mid, walk.inner(x + 2), walk.inner(x + 1));
            push(mid, walk.outer(x + 2), walk.inner(x + 2));
        } else {
            push(mid, walk.outer(x + 2), walk.inner(x + 1));
        }
    }
}

//! Quadtree node data: handles, directions, quadrants and stitch masks

use std::sync::Arc;

use crate::core::types::Vec2;
use crate::math::Aabb;
use crate::render::buffer::PatchBuffers;
use crate::terrain::cell::CellId;

/// Generational handle to a node in a [`BlockTree`](super::tree::BlockTree).
///
/// A handle to a node that has since been removed resolves to nothing, so
/// neighbor links never observe a recycled slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

/// Edge direction in the ground plane. North is +z, east is +x.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Direction {
    North = 0,
    East = 1,
    West = 2,
    South = 3,
}

impl Direction {
    pub const ALL: [Direction; 4] = [Direction::North, Direction::East, Direction::West, Direction::South];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// The facing direction; indices are arranged so that this is `3 - i`
    #[inline]
    pub fn opposite(self) -> Direction {
        Direction::ALL[3 - self.index()]
    }

    /// The two quadrants touching this edge, ordered along the edge
    /// (west to east for north/south edges, north to south for east/west edges).
    pub fn edge_quadrants(self) -> [Quadrant; 2] {
        match self {
            Direction::North => [Quadrant::TopLeft, Quadrant::TopRight],
            Direction::East => [Quadrant::TopRight, Quadrant::BottomRight],
            Direction::West => [Quadrant::TopLeft, Quadrant::BottomLeft],
            Direction::South => [Quadrant::BottomLeft, Quadrant::BottomRight],
        }
    }
}

/// Child position within a split node
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Quadrant {
    TopLeft = 0,
    TopRight = 1,
    BottomLeft = 2,
    BottomRight = 3,
}

impl Quadrant {
    pub const ALL: [Quadrant; 4] = [
        Quadrant::TopLeft,
        Quadrant::TopRight,
        Quadrant::BottomLeft,
        Quadrant::BottomRight,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Sibling across `dir`, or `None` if that edge is on the parent's boundary
    pub fn sibling(self, dir: Direction) -> Option<Quadrant> {
        use Direction::*;
        use Quadrant::*;
        match (self, dir) {
            (TopLeft, East) => Some(TopRight),
            (TopLeft, South) => Some(BottomLeft),
            (TopRight, West) => Some(TopLeft),
            (TopRight, South) => Some(BottomRight),
            (BottomLeft, North) => Some(TopLeft),
            (BottomLeft, East) => Some(BottomRight),
            (BottomRight, North) => Some(TopRight),
            (BottomRight, West) => Some(BottomLeft),
            _ => None,
        }
    }

    /// Offset of this child's center from its parent's, in units of a quarter
    /// of the parent size. North is +z.
    pub fn center_offset(self) -> Vec2 {
        match self {
            Quadrant::TopLeft => Vec2::new(-1.0, 1.0),
            Quadrant::TopRight => Vec2::new(1.0, 1.0),
            Quadrant::BottomLeft => Vec2::new(-1.0, -1.0),
            Quadrant::BottomRight => Vec2::new(1.0, -1.0),
        }
    }
}

/// Per-edge flags selecting one of the 16 stitched index buffers.
///
/// Bit `i` corresponds to `Direction` index `i`: north, east, west, south.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct StitchMask(u8);

impl StitchMask {
    pub const NONE: StitchMask = StitchMask(0);
    pub const ALL: StitchMask = StitchMask(0b1111);

    pub fn from_bits(bits: u8) -> Self {
        Self(bits & 0b1111)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, dir: Direction) -> bool {
        self.0 & (1 << dir.index()) != 0
    }

    pub fn insert(&mut self, dir: Direction) {
        self.0 |= 1 << dir.index();
    }

    pub fn with(mut self, dir: Direction) -> Self {
        self.insert(dir);
        self
    }
}

/// Inclusive sample range of a block in its cell's height grid
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GridSpan {
    pub left: usize,
    pub top: usize,
    pub right: usize,
    pub bottom: usize,
}

impl GridSpan {
    /// Split into the four child spans, indexed by [`Quadrant`]
    pub fn quadrants(&self) -> [GridSpan; 4] {
        let mid_x = self.left + (self.right - self.left) / 2;
        let mid_y = self.top + (self.bottom - self.top) / 2;
        [
            GridSpan { left: self.left, top: self.top, right: mid_x, bottom: mid_y },
            GridSpan { left: mid_x, top: self.top, right: self.right, bottom: mid_y },
            GridSpan { left: self.left, top: mid_y, right: mid_x, bottom: self.bottom },
            GridSpan { left: mid_x, top: mid_y, right: self.right, bottom: self.bottom },
        ]
    }
}

/// One square patch of terrain at a particular detail level
#[derive(Clone, Debug)]
pub struct TerrainBlock {
    /// Cell whose height grid this block samples
    pub cell: CellId,
    /// World-space center on the ground plane (x, z)
    pub center: Vec2,
    /// World-space extent on the ground plane (x, z)
    pub size: Vec2,
    pub span: GridSpan,
    /// Grid samples between adjacent vertices; halves on every split
    pub step: usize,
    /// Position within the parent, `None` for the root
    pub quadrant: Option<Quadrant>,
    pub parent: Option<BlockId>,
    pub children: Option<[BlockId; 4]>,
    /// Indexed by [`Direction`]; each link is same-level or coarser and may
    /// lead into an adjacent cell
    pub neighbours: [Option<BlockId>; 4],
    /// Bounds of the sampled geometry (and of built descendants)
    pub bbox: Aabb,
    /// Geometry (or, for internal nodes, bounds) has been sampled
    pub built: bool,
    /// Vertex streams; only leaves hold them
    pub buffers: Option<Arc<PatchBuffers>>,
}

impl TerrainBlock {
    pub(crate) fn new(cell: CellId, center: Vec2, size: Vec2, span: GridSpan, step: usize) -> Self {
        Self {
            cell,
            center,
            size,
            span,
            step,
            quadrant: None,
            parent: None,
            children: None,
            neighbours: [None; 4],
            bbox: Aabb::EMPTY,
            built: false,
            buffers: None,
        }
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    #[inline]
    pub fn neighbour(&self, dir: Direction) -> Option<BlockId> {
        self.neighbours[dir.index()]
    }

    /// Leaf with geometry ready to draw
    pub fn is_drawable(&self) -> bool {
        self.is_leaf() && self.built && self.buffers.is_some()
    }
}

//! Quadtree level of detail over a terrain cell's height grid
//!
//! A cell is covered by a tree of square blocks that all share one vertex
//! resolution. Blocks split and merge as the camera moves; edges shared with
//! a coarser neighbour are stitched by index buffers from a shared cache.
//! Trees of cells that meet edge to edge are linked into one forest.

pub mod block;
pub use block::{BlockId, Direction, Quadrant, StitchMask, TerrainBlock};

pub mod stitch;
pub use stitch::{IndexCacheRegistry, StitchIndexCache};

pub mod tree;
pub use tree::{BlockTree, CellLayout, LodSettings, LodView, TreeStats, VisiblePatch};

//! Quadtrees of terrain blocks for every active cell
//!
//! Nodes of all cells live in one slot arena and refer to each other through
//! generational [`BlockId`]s. Every node links to its parent, its four
//! children (when split) and to one neighbour per edge. A neighbour link
//! always targets a node of the same size or the leaf of the next larger size
//! covering that side; the larger node's own link points back at our ancestor
//! of its size.
//!
//! Cells that share a whole edge and tile it with the same blocks have their
//! roots linked, so links, forced splits and merge checks continue across
//! the border.
//!
//! Splitting keeps adjacent leaves within one level of each other by first
//! splitting any coarser neighbour. Merging is refused whenever it would
//! break that rule.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::block::{BlockId, Direction, GridSpan, Quadrant, StitchMask, TerrainBlock};
use super::stitch::{StitchIndexCache, normalize_resolution};
use crate::core::error::Error;
use crate::core::types::{Result, Vec2, Vec3};
use crate::math::{Aabb, Frustum};
use crate::render::buffer::{IndexBuffer, PatchBuffers};
use crate::terrain::cell::{CellId, GridRect, HeightData, HeightSource};

/// Placement of a cell's height grid in its object space
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CellLayout {
    /// Minimum corner on the ground plane (x, z)
    pub position: Vec2,
    /// Extent; `y` is the nominal height range
    pub size: Vec3,
    pub grid_width: usize,
    pub grid_height: usize,
}

impl CellLayout {
    pub fn from_source<S: HeightSource + ?Sized>(source: &S) -> Self {
        Self {
            position: source.position(),
            size: source.size(),
            grid_width: source.grid_width(),
            grid_height: source.grid_height(),
        }
    }

    /// World distance between adjacent samples along x and z
    fn sample_spacing(&self) -> Vec2 {
        Vec2::new(
            self.size.x / (self.grid_width - 1).max(1) as f32,
            self.size.z / (self.grid_height - 1).max(1) as f32,
        )
    }
}

/// Camera placement in the terrain's object space
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LodView {
    pub position: Vec3,
    pub direction: Vec3,
}

/// Detail selection parameters
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LodSettings {
    /// Splitting threshold multiplier; larger values keep detail further out
    pub split_coeff: f32,
    /// Blocks at or below this step are never split
    pub min_steps: usize,
}

impl Default for LodSettings {
    fn default() -> Self {
        Self { split_coeff: 128.0, min_steps: 1 }
    }
}

/// A leaf selected for drawing
#[derive(Clone, Debug)]
pub struct VisiblePatch {
    pub block: BlockId,
    pub buffers: Arc<PatchBuffers>,
    pub indices: Arc<IndexBuffer>,
    pub stitch_mask: StitchMask,
    pub bbox: Aabb,
    pub step: usize,
}

/// Shape summary of a tree
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TreeStats {
    pub nodes: usize,
    pub leaves: usize,
    pub drawable_leaves: usize,
    pub max_depth: usize,
}

struct BlockSlot {
    generation: u32,
    block: Option<TerrainBlock>,
}

/// Root block and grid placement of one cell
#[derive(Clone, Copy, Debug)]
struct CellRoot {
    root: BlockId,
    layout: CellLayout,
    block_resolution: usize,
}

impl CellRoot {
    fn root_step(&self) -> usize {
        (self.layout.grid_width - 1) / self.block_resolution
    }
}

/// Side of `a` that `b` covers, when both tile one whole shared edge with
/// blocks that line up sample for sample
fn shared_border(a: &CellRoot, b: &CellRoot) -> Option<Direction> {
    if a.block_resolution != b.block_resolution || a.layout.grid_width != b.layout.grid_width {
        return None;
    }
    let size = Vec2::new(a.layout.size.x, a.layout.size.z);
    if size != Vec2::new(b.layout.size.x, b.layout.size.z) {
        return None;
    }
    let tolerance = size.max_element() * 1e-5;
    let near = |x: f32, y: f32| (x - y).abs() <= tolerance;
    let (pa, pb) = (a.layout.position, b.layout.position);
    if near(pa.y, pb.y) {
        if near(pb.x, pa.x + size.x) {
            return Some(Direction::East);
        }
        if near(pb.x, pa.x - size.x) {
            return Some(Direction::West);
        }
    }
    if near(pa.x, pb.x) {
        if near(pb.y, pa.y + size.y) {
            return Some(Direction::North);
        }
        if near(pb.y, pa.y - size.y) {
            return Some(Direction::South);
        }
    }
    None
}

/// Front-to-back child visiting order, indexed by the view direction's signs
/// (`x > 0` sets bit 0, `z > 0` sets bit 1).
const CHILD_ORDER: [[usize; 4]; 4] = [
    [1, 0, 3, 2],
    [0, 1, 2, 3],
    [3, 2, 1, 0],
    [2, 3, 0, 1],
];

fn child_order(direction: Vec3) -> &'static [usize; 4] {
    let index = (direction.x > 0.0) as usize | (((direction.z > 0.0) as usize) << 1);
    &CHILD_ORDER[index]
}

/// Block quadtrees of all active cells.
///
/// Operations that read heights take the [`HeightSource`] of the cell owning
/// the block they start from. Blocks of other cells that they split or
/// collapse are left unbuilt until [`BlockTree::build_pending`] or the next
/// [`BlockTree::update_lod`] of their own cell.
#[derive(Default)]
pub struct BlockTree {
    slots: Vec<BlockSlot>,
    free_slots: Vec<u32>,
    cells: BTreeMap<CellId, CellRoot>,
}

impl BlockTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the root block for a cell and link it to adjacent cells.
    ///
    /// The grid must be square with `R * 2^k + 1` samples per side, where `R`
    /// is the block resolution rounded down to a power of two. Adjacent cells
    /// are collapsed to their roots before linking. Adding a cell twice
    /// returns the existing root.
    pub fn add_cell(&mut self, cell: CellId, layout: CellLayout, block_resolution: u32) -> Result<BlockId> {
        if let Some(existing) = self.cells.get(&cell) {
            return Ok(existing.root);
        }
        let r = normalize_resolution(block_resolution) as usize;
        let intervals = layout.grid_width.saturating_sub(1);
        if layout.grid_width != layout.grid_height {
            return Err(Error::InvalidHeightfield(format!(
                "grid must be square, got {}x{}",
                layout.grid_width, layout.grid_height
            )));
        }
        if intervals < r || intervals % r != 0 || !(intervals / r).is_power_of_two() {
            return Err(Error::InvalidHeightfield(format!(
                "grid of {} samples is not {}*2^k+1",
                layout.grid_width, r
            )));
        }

        let size = Vec2::new(layout.size.x, layout.size.z);
        let span = GridSpan { left: 0, top: 0, right: intervals, bottom: intervals };
        let root = self.allocate(TerrainBlock::new(cell, layout.position + size * 0.5, size, span, intervals / r));
        let entry = CellRoot { root, layout, block_resolution: r };

        let adjacent: Vec<(CellId, Direction)> = self
            .cells
            .iter()
            .filter_map(|(&other, other_root)| shared_border(&entry, other_root).map(|dir| (other, dir)))
            .collect();
        self.cells.insert(cell, entry);
        for (other, dir) in adjacent {
            self.connect(cell, other, dir);
        }

        log::debug!(
            "Added cell {:?} to block tree: {}x{} samples, block resolution {}, root step {}",
            cell, layout.grid_width, layout.grid_height, r, entry.root_step()
        );
        Ok(root)
    }

    /// Link the roots of `cell` and `other`, which lies on `cell`'s `dir` side
    fn connect(&mut self, cell: CellId, other: CellId, dir: Direction) {
        let (Some(root), Some(other_root)) = (self.root(cell), self.root(other)) else { return };
        self.collapse(root);
        self.collapse(other_root);
        if let Some(block) = self.get_mut(root) {
            block.neighbours[dir.index()] = Some(other_root);
        }
        if let Some(block) = self.get_mut(other_root) {
            block.neighbours[dir.opposite().index()] = Some(root);
        }
        log::debug!("Linked cell {:?} to cell {:?} on its {:?} side", cell, other, dir);
    }

    /// Drop a cell's blocks and every link into them. Returns `false` if the
    /// cell was not present.
    pub fn remove_cell(&mut self, cell: CellId) -> bool {
        let Some(entry) = self.cells.remove(&cell) else { return false };
        self.detach(entry.root);

        // Deeper nodes of adjacent cells may still point at released blocks
        let mut cleared = 0;
        for index in 0..self.slots.len() {
            let Some(block) = self.slots[index].block.as_ref() else { continue };
            let mut neighbours = block.neighbours;
            for link in neighbours.iter_mut() {
                if link.is_some_and(|n| !self.contains(n)) {
                    *link = None;
                    cleared += 1;
                }
            }
            if let Some(block) = self.slots[index].block.as_mut() {
                block.neighbours = neighbours;
            }
        }
        if self.cells.is_empty() {
            self.slots.clear();
            self.free_slots.clear();
        }
        log::debug!("Removed cell {:?} from block tree, cleared {} links", cell, cleared);
        true
    }

    /// Drop every cell
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free_slots.clear();
        self.cells.clear();
    }

    pub fn root(&self, cell: CellId) -> Option<BlockId> {
        self.cells.get(&cell).map(|c| c.root)
    }

    pub fn layout(&self, cell: CellId) -> Option<&CellLayout> {
        self.cells.get(&cell).map(|c| &c.layout)
    }

    pub fn block_resolution(&self, cell: CellId) -> Option<usize> {
        self.cells.get(&cell).map(|c| c.block_resolution)
    }

    /// Cells currently holding blocks
    pub fn cells(&self) -> impl Iterator<Item = CellId> + '_ {
        self.cells.keys().copied()
    }

    /// Linked cell on each side of `cell`, indexed by [`Direction`]
    pub fn neighbour_cells(&self, cell: CellId) -> [Option<CellId>; 4] {
        let mut out = [None; 4];
        let Some(root) = self.root(cell).and_then(|r| self.get(r)) else { return out };
        for dir in Direction::ALL {
            out[dir.index()] = root.neighbour(dir).and_then(|n| self.get(n)).map(|n| n.cell);
        }
        out
    }

    /// Resolve a handle; `None` once the node has been removed
    pub fn get(&self, id: BlockId) -> Option<&TerrainBlock> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.block.as_ref()
    }

    fn get_mut(&mut self, id: BlockId) -> Option<&mut TerrainBlock> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.block.as_mut()
    }

    pub fn contains(&self, id: BlockId) -> bool {
        self.get(id).is_some()
    }

    fn allocate(&mut self, block: TerrainBlock) -> BlockId {
        if let Some(index) = self.free_slots.pop() {
            let slot = &mut self.slots[index as usize];
            slot.block = Some(block);
            BlockId { index, generation: slot.generation }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(BlockSlot { generation: 0, block: Some(block) });
            BlockId { index, generation: 0 }
        }
    }

    fn release(&mut self, id: BlockId) {
        if let Some(slot) = self.slots.get_mut(id.index as usize) {
            if slot.generation == id.generation && slot.block.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free_slots.push(id.index);
            }
        }
    }

    /// Handles of every live node
    pub fn ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.block.as_ref().map(|_| BlockId { index: index as u32, generation: slot.generation })
        })
    }

    /// Handles of every live leaf
    pub fn leaves(&self) -> Vec<BlockId> {
        self.ids().filter(|&id| self.get(id).is_some_and(|b| b.is_leaf())).collect()
    }

    /// Shape of every cell's tree together
    pub fn stats(&self) -> TreeStats {
        self.stats_where(|_| true)
    }

    /// Shape of one cell's tree
    pub fn cell_stats(&self, cell: CellId) -> TreeStats {
        self.stats_where(|block| block.cell == cell)
    }

    fn stats_where(&self, include: impl Fn(&TerrainBlock) -> bool) -> TreeStats {
        let mut stats = TreeStats::default();
        for id in self.ids() {
            let Some(block) = self.get(id).filter(|b| include(*b)) else { continue };
            stats.nodes += 1;
            if block.is_leaf() {
                stats.leaves += 1;
                if block.is_drawable() {
                    stats.drawable_leaves += 1;
                }
            }
            let root_step = self.cells.get(&block.cell).map_or(block.step, CellRoot::root_step);
            let depth = (root_step / block.step.max(1)).trailing_zeros() as usize;
            stats.max_depth = stats.max_depth.max(depth);
        }
        stats
    }

    /// Edges whose neighbour is missing or coarser
    pub fn stitch_mask(&self, id: BlockId) -> StitchMask {
        let mut mask = StitchMask::NONE;
        let Some(block) = self.get(id) else { return mask };
        for dir in Direction::ALL {
            let coarser_or_missing = block
                .neighbour(dir)
                .and_then(|n| self.get(n))
                .is_none_or(|n| n.step > block.step);
            if coarser_or_missing {
                mask.insert(dir);
            }
        }
        mask
    }

    /// Sample this block's vertices from its cell's heights.
    ///
    /// Returns `false` (leaving the block unbuilt) when no height data is
    /// available or the data does not cover the cell's grid.
    pub fn build_patch<S: HeightSource + ?Sized>(&mut self, id: BlockId, source: &S) -> bool {
        let Some(block) = self.get(id) else { return false };
        let Some(entry) = self.cells.get(&block.cell) else { return false };
        let Some(heights) = source.height_data() else {
            log::trace!("No height data yet for block {:?}", id);
            return false;
        };
        let layout = entry.layout;
        if !heights.covers(layout.grid_width, layout.grid_height) {
            log::warn!(
                "Height data of cell {:?} ({}x{}, pitch {}, {} samples) does not cover its {}x{} grid",
                block.cell,
                heights.width,
                heights.height,
                heights.pitch,
                heights.data.len(),
                layout.grid_width,
                layout.grid_height
            );
            return false;
        }

        let (buffers, bbox) = sample_patch(block, &heights, &layout, entry.block_resolution);
        if let Some(block) = self.get_mut(id) {
            block.buffers = Some(Arc::new(buffers));
            block.bbox = bbox;
            block.built = true;
        }
        true
    }

    /// Recompute an internal node's bounds from its own span.
    fn build_bounds<S: HeightSource + ?Sized>(&mut self, id: BlockId, source: &S) -> bool {
        let Some(block) = self.get(id) else { return false };
        let span = block.span;
        let rect = GridRect::new(span.left, span.top, span.right + 1, span.bottom + 1);
        let Some(heights) = source.height_rect(rect) else { return false };
        let (min_h, max_h) = heights.min_max(block.step);
        let bbox = Aabb::from_footprint(block.center, block.size, min_h, max_h);
        if let Some(block) = self.get_mut(id) {
            block.bbox = bbox;
            block.built = true;
        }
        true
    }

    /// Build geometry for a leaf or bounds for an internal node
    fn rebuild<S: HeightSource + ?Sized>(&mut self, id: BlockId, source: &S) -> bool {
        match self.get(id) {
            Some(block) if block.is_leaf() => self.build_patch(id, source),
            Some(_) => self.build_bounds(id, source),
            None => false,
        }
    }

    /// Grow an internal node's bounds to include its built children
    fn extend_bounds_from_children(&mut self, id: BlockId) {
        let Some(children) = self.get(id).and_then(|b| b.children) else { return };
        let mut bbox = match self.get(id) {
            Some(block) => block.bbox,
            None => return,
        };
        for child in children {
            if let Some(child) = self.get(child).filter(|c| c.built) {
                bbox = bbox.merged(&child.bbox);
            }
        }
        if let Some(block) = self.get_mut(id) {
            block.bbox = bbox;
        }
    }

    /// Subdivide a leaf into four children of half the step.
    ///
    /// Coarser neighbours are split first so that no two adjacent leaves end
    /// up more than one level apart. Returns `false` for internal nodes and
    /// for blocks already at step 1.
    pub fn split<S: HeightSource + ?Sized>(&mut self, id: BlockId, source: &S) -> bool {
        self.split_node(id, Some(source))
    }

    /// Split with `source` belonging to `id`'s cell; without one the new
    /// children stay unbuilt.
    fn split_node<S: HeightSource + ?Sized>(&mut self, id: BlockId, source: Option<&S>) -> bool {
        let Some(block) = self.get(id) else { return false };
        if !block.is_leaf() || block.step <= 1 {
            return false;
        }
        let step = block.step;
        let cell = block.cell;

        for dir in Direction::ALL {
            let coarser = self
                .get(id)
                .and_then(|b| b.neighbour(dir))
                .and_then(|n| self.get(n).filter(|nb| nb.step > step && nb.is_leaf()).map(|nb| (n, nb.cell)));
            if let Some((neighbour, neighbour_cell)) = coarser {
                self.split_node(neighbour, source.filter(|_| neighbour_cell == cell));
            }
        }

        let Some(block) = self.get(id) else { return false };
        let parent = block.clone();
        let child_size = parent.size * 0.5;
        let quarter = parent.size * 0.25;
        let spans = parent.span.quadrants();

        let mut children = [id; 4];
        for quadrant in Quadrant::ALL {
            let center = parent.center + quadrant.center_offset() * quarter;
            let mut child = TerrainBlock::new(cell, center, child_size, spans[quadrant.index()], step / 2);
            child.quadrant = Some(quadrant);
            child.parent = Some(id);
            children[quadrant.index()] = self.allocate(child);
        }

        // Links between siblings
        for quadrant in Quadrant::ALL {
            for dir in Direction::ALL {
                if let Some(sibling) = quadrant.sibling(dir) {
                    let sibling_id = children[sibling.index()];
                    if let Some(child) = self.get_mut(children[quadrant.index()]) {
                        child.neighbours[dir.index()] = Some(sibling_id);
                    }
                }
            }
        }

        // Links across the parent's edges
        for dir in Direction::ALL {
            let Some(neighbour_id) = parent.neighbour(dir) else { continue };
            let Some(neighbour_children) = self.get(neighbour_id).map(|n| n.children) else { continue };
            let opposite = dir.opposite();
            match neighbour_children {
                None => {
                    for quadrant in dir.edge_quadrants() {
                        if let Some(child) = self.get_mut(children[quadrant.index()]) {
                            child.neighbours[dir.index()] = Some(neighbour_id);
                        }
                    }
                    if let Some(neighbour) = self.get_mut(neighbour_id) {
                        neighbour.neighbours[opposite.index()] = Some(id);
                    }
                }
                Some(neighbour_children) => {
                    let ours = dir.edge_quadrants();
                    let theirs = opposite.edge_quadrants();
                    for (mine, facing) in ours.into_iter().zip(theirs) {
                        let child_id = children[mine.index()];
                        let facing_id = neighbour_children[facing.index()];
                        if let Some(child) = self.get_mut(child_id) {
                            child.neighbours[dir.index()] = Some(facing_id);
                        }
                        if let Some(facing) = self.get_mut(facing_id) {
                            facing.neighbours[opposite.index()] = Some(child_id);
                        }
                    }
                }
            }
        }

        if let Some(block) = self.get_mut(id) {
            block.children = Some(children);
            block.buffers = None;
        }

        if let Some(source) = source {
            for child in children {
                self.build_patch(child, source);
            }
        }

        // Keep every ancestor's bounds around its descendants for culling
        let mut current = Some(id);
        while let Some(node) = current {
            self.extend_bounds_from_children(node);
            current = self.get(node).and_then(|b| b.parent);
        }

        log::trace!("Split block {:?} of cell {:?} (step {} -> {})", id, cell, step, step / 2);
        true
    }

    /// Whether collapsing `id` into a leaf would keep adjacent leaves within
    /// one level of each other.
    pub fn can_merge(&self, id: BlockId) -> bool {
        let Some(block) = self.get(id) else { return false };
        if block.is_leaf() {
            return false;
        }
        Direction::ALL.into_iter().all(|dir| {
            let Some(neighbour) = block.neighbour(dir).and_then(|n| self.get(n)) else {
                return true;
            };
            let Some(neighbour_children) = neighbour.children else {
                return true;
            };
            dir.opposite().edge_quadrants().into_iter().all(|facing| {
                self.get(neighbour_children[facing.index()]).is_none_or(|c| c.is_leaf())
            })
        })
    }

    /// Collapse an internal node back into a leaf, removing its whole subtree.
    ///
    /// Returns `false` (changing nothing) if the node is a leaf or if
    /// merging would leave a finer neighbour more than one level away.
    pub fn merge<S: HeightSource + ?Sized>(&mut self, id: BlockId, source: &S) -> bool {
        if !self.can_merge(id) {
            return false;
        }
        let Some(children) = self.get(id).and_then(|b| b.children) else { return false };
        for child in children {
            self.detach(child);
        }
        if let Some(block) = self.get_mut(id) {
            block.children = None;
            block.built = false;
            block.bbox = Aabb::EMPTY;
        }
        self.build_patch(id, source);
        log::trace!("Merged block {:?}", id);
        true
    }

    /// Turn `id` into a leaf unconditionally, first collapsing any neighbour
    /// that would end up more than one level finer. Collapsed nodes are left
    /// unbuilt.
    fn collapse(&mut self, id: BlockId) {
        let Some(children) = self.get(id).and_then(|b| b.children) else { return };
        for child in children {
            self.collapse(child);
        }

        for quadrant in Quadrant::ALL {
            let child = children[quadrant.index()];
            for dir in Direction::ALL {
                if quadrant.sibling(dir).is_some() {
                    continue;
                }
                let finer = self
                    .get(child)
                    .and_then(|c| c.neighbour(dir))
                    .filter(|&n| self.get(n).is_some_and(|nb| !nb.is_leaf()));
                if let Some(neighbour) = finer {
                    self.collapse(neighbour);
                }
            }
        }

        for child in children {
            self.detach(child);
        }
        if let Some(block) = self.get_mut(id) {
            block.children = None;
            block.built = false;
            block.buffers = None;
            block.bbox = Aabb::EMPTY;
        }
        log::trace!("Collapsed block {:?}", id);
    }

    /// Remove a node and its subtree, pointing neighbours that referenced it
    /// at its parent instead.
    fn detach(&mut self, id: BlockId) {
        let Some(block) = self.get(id) else { return };
        let children = block.children;
        let neighbours = block.neighbours;
        let parent = block.parent;

        if let Some(children) = children {
            for child in children {
                self.detach(child);
            }
        }

        for dir in Direction::ALL {
            let Some(neighbour_id) = neighbours[dir.index()] else { continue };
            let opposite = dir.opposite().index();
            if let Some(neighbour) = self.get_mut(neighbour_id) {
                if neighbour.neighbours[opposite] == Some(id) {
                    neighbour.neighbours[opposite] = parent;
                }
            }
        }

        self.release(id);
    }

    /// Mark every block of `cell` whose samples touch `rect` as needing a rebuild
    pub fn invalidate(&mut self, cell: CellId, rect: GridRect) -> usize {
        let mut invalidated = 0;
        for slot in &mut self.slots {
            let Some(block) = slot.block.as_mut().filter(|b| b.cell == cell) else { continue };
            let span = block.span;
            if rect.overlaps_samples(span.left, span.top, span.right, span.bottom) {
                block.built = false;
                block.buffers = None;
                invalidated += 1;
            }
        }
        invalidated
    }

    /// Build every block of `cell` still lacking geometry or bounds, such as
    /// those split or collapsed from an adjacent cell. Returns how many were
    /// built.
    pub fn build_pending<S: HeightSource + ?Sized>(&mut self, cell: CellId, source: &S) -> usize {
        let Some(root) = self.root(cell) else { return 0 };
        self.build_pending_node(root, source)
    }

    fn build_pending_node<S: HeightSource + ?Sized>(&mut self, id: BlockId, source: &S) -> usize {
        let Some(block) = self.get(id) else { return 0 };
        let mut built = 0;
        if !block.built {
            if !self.rebuild(id, source) {
                return 0;
            }
            built += 1;
        }
        let Some(children) = self.get(id).and_then(|b| b.children) else { return built };
        for child in children {
            built += self.build_pending_node(child, source);
        }
        self.extend_bounds_from_children(id);
        built
    }

    /// Split and merge the blocks of `cell` for the current camera position.
    ///
    /// Blocks closer than `size * split_coeff / R` are split while their step
    /// exceeds `min_steps`; internal blocks further out are merged when legal.
    /// Children are visited front to back along the view direction. Blocks
    /// that are not yet built are built first.
    pub fn update_lod<S: HeightSource + ?Sized>(
        &mut self,
        cell: CellId,
        view: &LodView,
        settings: &LodSettings,
        source: &S,
    ) {
        let Some(entry) = self.cells.get(&cell) else { return };
        let (root, resolution) = (entry.root, entry.block_resolution as f32);
        let order = child_order(view.direction);
        self.update_lod_node(root, view, settings, resolution, order, source);
    }

    fn update_lod_node<S: HeightSource + ?Sized>(
        &mut self,
        id: BlockId,
        view: &LodView,
        settings: &LodSettings,
        resolution: f32,
        order: &[usize; 4],
        source: &S,
    ) {
        let Some(block) = self.get(id) else { return };
        if !block.built && !self.rebuild(id, source) {
            return;
        }
        let Some(block) = self.get(id) else { return };
        if block.bbox.is_empty() {
            return;
        }

        let split_distance = block.size.x.max(block.size.y) * settings.split_coeff / resolution;
        let distance_sq = block.bbox.distance_squared_to_point(view.position);
        if distance_sq < split_distance * split_distance && block.step > settings.min_steps.max(1) {
            if block.is_leaf() {
                self.split(id, source);
            }
        } else if !block.is_leaf() {
            self.merge(id, source);
        }

        let Some(children) = self.get(id).and_then(|b| b.children) else { return };
        for &i in order {
            self.update_lod_node(children[i], view, settings, resolution, order, source);
        }
        self.extend_bounds_from_children(id);
    }

    /// Append every visible, built leaf of `cell` with its stitched index
    /// buffer.
    ///
    /// Internal nodes are descended only when all four children are built;
    /// otherwise the subtree is skipped for this frame.
    pub fn collect_render_meshes(
        &self,
        cell: CellId,
        frustum: &Frustum,
        indices: &StitchIndexCache,
        out: &mut Vec<VisiblePatch>,
    ) {
        if let Some(root) = self.root(cell) {
            self.collect_node(root, frustum, indices, out);
        }
    }

    fn collect_node(&self, id: BlockId, frustum: &Frustum, indices: &StitchIndexCache, out: &mut Vec<VisiblePatch>) {
        let Some(block) = self.get(id) else { return };
        if !block.built || !frustum.intersects_aabb(&block.bbox) {
            return;
        }

        if let Some(children) = block.children {
            let all_built = children.iter().all(|&c| self.get(c).is_some_and(|b| b.built));
            if all_built {
                for child in children {
                    self.collect_node(child, frustum, indices, out);
                }
            }
            return;
        }

        let Some(buffers) = &block.buffers else { return };
        let stitch_mask = self.stitch_mask(id);
        out.push(VisiblePatch {
            block: id,
            buffers: buffers.clone(),
            indices: indices.get(stitch_mask).clone(),
            stitch_mask,
            bbox: block.bbox,
            step: block.step,
        });
    }
}

/// Sample an `(R+1)^2` vertex patch over `block`'s span
fn sample_patch(
    block: &TerrainBlock,
    heights: &HeightData<'_>,
    layout: &CellLayout,
    block_resolution: usize,
) -> (PatchBuffers, Aabb) {
    let n = block_resolution + 1;
    let mut buffers = PatchBuffers::with_capacity(n * n);
    let mut bbox = Aabb::EMPTY;

    let min_x = block.center.x - block.size.x * 0.5;
    let max_z = block.center.y + block.size.y * 0.5;
    let dx = block.size.x / block_resolution as f32;
    let dz = block.size.y / block_resolution as f32;
    let spacing = layout.sample_spacing();

    for row in 0..n {
        let gy = block.span.top + row * block.step;
        let z = max_z - row as f32 * dz;
        for col in 0..n {
            let gx = block.span.left + col * block.step;
            let x = min_x + col as f32 * dx;
            let position = Vec3::new(x, heights.get(gx, gy), z);
            bbox.expand(position);

            let frame = surface_frame(heights, gx, gy, spacing);
            buffers.positions.push(position);
            buffers.normals.push(frame.normal);
            buffers.tangents.push(frame.tangent);
            buffers.bitangents.push(frame.bitangent);
            buffers.texcoords.push(Vec2::new(
                (x - layout.position.x) / layout.size.x,
                1.0 - (z - layout.position.y) / layout.size.z,
            ));
        }
    }
    (buffers, bbox)
}

/// Orthonormal surface basis at one grid sample
struct SurfaceFrame {
    normal: Vec3,
    /// Along +u (+x)
    tangent: Vec3,
    /// Along +v (-z)
    bitangent: Vec3,
}

/// Central-difference surface basis at grid sample `(gx, gy)`, one-sided at
/// the border
fn surface_frame(heights: &HeightData<'_>, gx: usize, gy: usize, spacing: Vec2) -> SurfaceFrame {
    let x0 = gx.saturating_sub(1);
    let x1 = (gx + 1).min(heights.width - 1);
    let y0 = gy.saturating_sub(1);
    let y1 = (gy + 1).min(heights.height - 1);

    let dh_dx = if x1 > x0 {
        (heights.get(x1, gy) - heights.get(x0, gy)) / ((x1 - x0) as f32 * spacing.x)
    } else {
        0.0
    };
    // Rows run towards -z
    let dh_dz = if y1 > y0 {
        (heights.get(gx, y0) - heights.get(gx, y1)) / ((y1 - y0) as f32 * spacing.y)
    } else {
        0.0
    };
    SurfaceFrame {
        normal: Vec3::new(-dh_dx, 1.0, -dh_dz).normalize(),
        tangent: Vec3::new(1.0, dh_dx, 0.0).normalize(),
        bitangent: Vec3::new(0.0, -dh_dz, -1.0).normalize(),
    }
}

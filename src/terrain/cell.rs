//! Terrain cell collaborator interface
//!
//! A cell is one square tile of a larger terrain: a regular grid of height
//! samples spanning a world-space rectangle. The LOD quadtree only ever reads
//! cells through these traits.

use crate::core::types::{Vec2, Vec3};
use crate::render::material::MaterialId;
use crate::render::properties::CellRenderProperties;

/// Stable identity of a terrain cell, used to key per-cell render state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId(pub u32);

/// Rectangle in grid (sample) coordinates. `x_max` and `y_max` are exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GridRect {
    pub x_min: usize,
    pub y_min: usize,
    pub x_max: usize,
    pub y_max: usize,
}

impl GridRect {
    pub fn new(x_min: usize, y_min: usize, x_max: usize, y_max: usize) -> Self {
        Self { x_min, y_min, x_max, y_max }
    }

    /// Rectangle covering a whole `width` x `height` grid
    pub fn full(width: usize, height: usize) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn width(&self) -> usize {
        self.x_max.saturating_sub(self.x_min)
    }

    pub fn height(&self) -> usize {
        self.y_max.saturating_sub(self.y_min)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Clamp to a `width` x `height` grid
    pub fn clamped(&self, width: usize, height: usize) -> Self {
        Self {
            x_min: self.x_min.min(width),
            y_min: self.y_min.min(height),
            x_max: self.x_max.min(width),
            y_max: self.y_max.min(height),
        }
    }

    /// Does this rectangle touch the inclusive sample range
    /// `[left, right] x [top, bottom]`?
    pub fn overlaps_samples(&self, left: usize, top: usize, right: usize, bottom: usize) -> bool {
        !self.is_empty()
            && left < self.x_max
            && right >= self.x_min
            && top < self.y_max
            && bottom >= self.y_min
    }
}

/// Borrowed view of row-major height samples.
///
/// Sample `(x, y)` lives at `data[y * pitch + x]`; `y = 0` is the row at the
/// cell's maximum z.
#[derive(Clone, Copy, Debug)]
pub struct HeightData<'a> {
    pub data: &'a [f32],
    pub pitch: usize,
    pub width: usize,
    pub height: usize,
}

impl<'a> HeightData<'a> {
    pub fn new(data: &'a [f32], pitch: usize, width: usize, height: usize) -> Self {
        Self { data, pitch, width, height }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.pitch + x]
    }

    /// Whether every sample of a `width x height` grid can be read
    pub fn covers(&self, width: usize, height: usize) -> bool {
        self.width >= width
            && self.height >= height
            && self.pitch >= self.width
            && (self.height == 0 || self.data.len() >= (self.height - 1) * self.pitch + self.width)
    }

    /// Sub-view of `rect`, sharing the parent pitch.
    ///
    /// Returns `None` if the rectangle is empty or leaves the grid.
    pub fn sub_rect(&self, rect: GridRect) -> Option<HeightData<'a>> {
        if rect.is_empty() || rect.x_max > self.width || rect.y_max > self.height {
            return None;
        }
        let start = rect.y_min * self.pitch + rect.x_min;
        let end = (rect.y_max - 1) * self.pitch + rect.x_max;
        let data = self.data.get(start..end)?;
        Some(HeightData::new(data, self.pitch, rect.width(), rect.height()))
    }

    /// Minimum and maximum of every `step`-th sample in the view
    pub fn min_max(&self, step: usize) -> (f32, f32) {
        let step = step.max(1);
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        for y in (0..self.height).step_by(step) {
            for x in (0..self.width).step_by(step) {
                let h = self.get(x, y);
                min = min.min(h);
                max = max.max(h);
            }
        }
        (min, max)
    }
}

/// Read access to a cell's height grid and placement
pub trait HeightSource {
    /// Number of samples along x
    fn grid_width(&self) -> usize;

    /// Number of samples along z
    fn grid_height(&self) -> usize;

    /// World-space minimum corner on the ground plane (x, z)
    fn position(&self) -> Vec2;

    /// World-space extent; `y` is the nominal height range
    fn size(&self) -> Vec3;

    /// Whole height grid, or `None` while no data is available
    fn height_data(&self) -> Option<HeightData<'_>>;

    /// Locked read of a sub-rectangle of the height grid
    fn height_rect(&self, rect: GridRect) -> Option<HeightData<'_>> {
        self.height_data()?.sub_rect(rect)
    }
}

/// A terrain cell as seen by the renderer
pub trait TerrainCell: HeightSource {
    fn id(&self) -> CellId;

    /// Render parameters attached to this cell
    fn render_properties(&self) -> &CellRenderProperties;

    /// Width of the material map in texels
    fn material_map_width(&self) -> usize;

    /// Height of the material map in texels
    fn material_map_height(&self) -> usize;

    /// Material drawn outside the splat distance
    fn base_material(&self) -> Option<MaterialId>;

    /// Material drawn under the splat layers inside the splat distance
    fn splat_base_material(&self) -> Option<MaterialId> {
        None
    }

    /// Material that blends the splat layers through a single alpha map
    fn alpha_splat_material(&self) -> Option<MaterialId> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(width: usize, height: usize) -> Vec<f32> {
        (0..width * height).map(|i| i as f32).collect()
    }

    #[test]
    fn test_sub_rect_reads_parent_samples() {
        let data = ramp(5, 5);
        let view = HeightData::new(&data, 5, 5, 5);
        let sub = view.sub_rect(GridRect::new(1, 2, 4, 5)).unwrap();
        assert_eq!(sub.width, 3);
        assert_eq!(sub.height, 3);
        assert_eq!(sub.get(0, 0), view.get(1, 2));
        assert_eq!(sub.get(2, 2), view.get(3, 4));
    }

    #[test]
    fn test_sub_rect_rejects_out_of_bounds() {
        let data = ramp(5, 5);
        let view = HeightData::new(&data, 5, 5, 5);
        assert!(view.sub_rect(GridRect::new(0, 0, 6, 5)).is_none());
        assert!(view.sub_rect(GridRect::new(2, 2, 2, 4)).is_none());
    }

    #[test]
    fn test_min_max_with_step() {
        let data = ramp(5, 5);
        let view = HeightData::new(&data, 5, 5, 5);
        assert_eq!(view.min_max(1), (0.0, 24.0));
        assert_eq!(view.min_max(2), (0.0, 24.0));
        let sub = view.sub_rect(GridRect::new(1, 1, 4, 4)).unwrap();
        assert_eq!(sub.min_max(1), (6.0, 18.0));
    }

    #[test]
    fn test_covers_checks_slice_length_and_pitch() {
        let data = vec![0.0; 5 * 4];
        assert!(HeightData::new(&data, 5, 5, 4).covers(5, 4));
        assert!(HeightData::new(&data, 5, 5, 4).covers(3, 3));
        assert!(!HeightData::new(&data, 5, 5, 4).covers(5, 5));
        // Pitch narrower than a row
        assert!(!HeightData::new(&data, 4, 5, 4).covers(5, 4));
        // Last row cut short
        assert!(!HeightData::new(&data[..19], 5, 5, 4).covers(5, 4));
        // Padded rows only need the last row's samples
        let padded = vec![0.0; 8 * 3 + 5];
        assert!(HeightData::new(&padded, 8, 5, 4).covers(5, 4));
    }

    #[test]
    fn test_overlaps_samples() {
        let rect = GridRect::new(4, 4, 8, 8);
        assert!(rect.overlaps_samples(0, 0, 4, 4));
        assert!(!rect.overlaps_samples(0, 0, 3, 3));
        assert!(rect.overlaps_samples(7, 7, 16, 16));
        assert!(!rect.overlaps_samples(8, 0, 16, 16));
    }
}

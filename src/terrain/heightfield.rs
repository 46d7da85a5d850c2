//! In-memory terrain cell backed by a dense height grid

use super::cell::{CellId, GridRect, HeightData, HeightSource, TerrainCell};
use super::generator::TerrainGenerator;
use crate::core::types::{Vec2, Vec3};
use crate::render::material::MaterialId;
use crate::render::properties::CellRenderProperties;

/// A square terrain tile owning its height samples and render parameters
#[derive(Clone, Debug)]
pub struct HeightfieldCell {
    id: CellId,
    position: Vec2,
    size: Vec3,
    grid_width: usize,
    grid_height: usize,
    heights: Vec<f32>,
    loaded: bool,
    properties: CellRenderProperties,
    material_map_width: usize,
    material_map_height: usize,
    base_material: Option<MaterialId>,
    splat_base_material: Option<MaterialId>,
    alpha_splat_material: Option<MaterialId>,
}

impl HeightfieldCell {
    /// Flat cell of `grid_size` x `grid_size` samples covering `size.x` x `size.z`
    /// world units, with its minimum corner at `position`.
    pub fn new(id: CellId, grid_size: usize, position: Vec2, size: Vec3) -> Self {
        Self {
            id,
            position,
            size,
            grid_width: grid_size,
            grid_height: grid_size,
            heights: vec![0.0; grid_size * grid_size],
            loaded: true,
            properties: CellRenderProperties::default(),
            material_map_width: grid_size,
            material_map_height: grid_size,
            base_material: None,
            splat_base_material: None,
            alpha_splat_material: None,
        }
    }

    /// World-space position of sample `(x, y)` on the ground plane
    pub fn sample_position(&self, x: usize, y: usize) -> Vec2 {
        let fx = x as f32 / (self.grid_width - 1).max(1) as f32;
        let fy = y as f32 / (self.grid_height - 1).max(1) as f32;
        Vec2::new(
            self.position.x + fx * self.size.x,
            self.position.y + (1.0 - fy) * self.size.z,
        )
    }

    /// Replace every sample with `f(world_x, world_z)`
    pub fn fill_with(&mut self, mut f: impl FnMut(f32, f32) -> f32) {
        for y in 0..self.grid_height {
            for x in 0..self.grid_width {
                let p = self.sample_position(x, y);
                self.heights[y * self.grid_width + x] = f(p.x, p.y);
            }
        }
    }

    /// Fill heights from a procedural generator
    pub fn generate(&mut self, generator: &TerrainGenerator) {
        self.fill_with(|x, z| generator.height_at(x, z));
    }

    /// Write one sample, returning the rectangle to report as updated.
    ///
    /// Returns `None` (writing nothing) when `(x, y)` lies outside the grid.
    pub fn set_height(&mut self, x: usize, y: usize, height: f32) -> Option<GridRect> {
        if x >= self.grid_width || y >= self.grid_height {
            log::warn!(
                "Height sample ({}, {}) outside {}x{} grid of cell {:?}",
                x, y, self.grid_width, self.grid_height, self.id
            );
            return None;
        }
        self.heights[y * self.grid_width + x] = height;
        Some(GridRect::new(x, y, x + 1, y + 1))
    }

    pub fn heights(&self) -> &[f32] {
        &self.heights
    }

    pub fn heights_mut(&mut self) -> &mut [f32] {
        &mut self.heights
    }

    /// Simulate the cell's height data being paged out or back in
    pub fn set_loaded(&mut self, loaded: bool) {
        self.loaded = loaded;
    }

    pub fn properties_mut(&mut self) -> &mut CellRenderProperties {
        &mut self.properties
    }

    pub fn set_properties(&mut self, properties: CellRenderProperties) {
        self.properties = properties;
    }

    pub fn set_material_map_size(&mut self, width: usize, height: usize) {
        self.material_map_width = width;
        self.material_map_height = height;
    }

    pub fn set_base_material(&mut self, material: Option<MaterialId>) {
        self.base_material = material;
    }

    pub fn set_splat_base_material(&mut self, material: Option<MaterialId>) {
        self.splat_base_material = material;
    }

    pub fn set_alpha_splat_material(&mut self, material: Option<MaterialId>) {
        self.alpha_splat_material = material;
    }
}

impl HeightSource for HeightfieldCell {
    fn grid_width(&self) -> usize {
        self.grid_width
    }

    fn grid_height(&self) -> usize {
        self.grid_height
    }

    fn position(&self) -> Vec2 {
        self.position
    }

    fn size(&self) -> Vec3 {
        self.size
    }

    fn height_data(&self) -> Option<HeightData<'_>> {
        if !self.loaded {
            return None;
        }
        Some(HeightData::new(&self.heights, self.grid_width, self.grid_width, self.grid_height))
    }
}

impl TerrainCell for HeightfieldCell {
    fn id(&self) -> CellId {
        self.id
    }

    fn render_properties(&self) -> &CellRenderProperties {
        &self.properties
    }

    fn material_map_width(&self) -> usize {
        self.material_map_width
    }

    fn material_map_height(&self) -> usize {
        self.material_map_height
    }

    fn base_material(&self) -> Option<MaterialId> {
        self.base_material
    }

    fn splat_base_material(&self) -> Option<MaterialId> {
        self.splat_base_material
    }

    fn alpha_splat_material(&self) -> Option<MaterialId> {
        self.alpha_splat_material
    }
}

//! Terrain renderer facade
//!
//! The host engine talks to terrain rendering through [`TerrainRenderer`]:
//! it pushes data changes through the `on_*` hooks and asks for the meshes
//! to draw once per frame.
//!
//! All cells share one [`BlockTree`], so the quadtrees of adjacent cells are
//! linked across their borders. A frame refines every cell before any cell
//! collects meshes, since refining one cell may split blocks of another.

use std::collections::HashMap;
use std::path::Path;

use image::DynamicImage;
use serde::{Deserialize, Serialize};

use super::cell::CellRenderContext;
use super::material::MaterialId;
use super::mesh::RenderMesh;
use super::properties::CellRenderProperties;
use crate::core::camera::Camera;
use crate::core::types::{Mat4, Result};
use crate::lod::stitch::IndexCacheRegistry;
use crate::lod::tree::{BlockTree, LodView};
use crate::math::Frustum;
use crate::terrain::cell::{CellId, GridRect, TerrainCell};

/// Renderer-wide configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Template returned by `create_properties`
    pub default_properties: CellRenderProperties,
    /// Block resolutions whose index buffers are built up front
    pub prebuilt_resolutions: Vec<u32>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            default_properties: CellRenderProperties::default(),
            prebuilt_resolutions: Vec::new(),
        }
    }
}

impl RendererConfig {
    /// Load from a JSON file
    pub fn load_json(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Save to a JSON file, creating parent directories
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Counters from the last `get_render_meshes` call
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub cells: usize,
    pub meshes: usize,
    pub nodes: usize,
    pub leaves: usize,
}

/// Terrain rendering as seen by the host engine
pub trait TerrainRenderer {
    /// Fresh per-cell render parameters
    fn create_properties(&self) -> CellRenderProperties;

    /// Update detail levels and return this frame's meshes for `cells`.
    ///
    /// `frustum` and `camera` are in world space; `object_to_world` places
    /// the terrain.
    fn get_render_meshes(
        &mut self,
        frustum: &Frustum,
        camera: &Camera,
        object_to_world: Mat4,
        cells: &[&dyn TerrainCell],
    ) -> &[RenderMesh];

    /// Heights inside `rect` changed (or arrived for the first time)
    fn on_height_update(&mut self, cell: &dyn TerrainCell, rect: GridRect);

    /// The material palette shared by all cells changed
    fn on_material_palette_update(&mut self, palette: &[MaterialId]);

    /// Coverage of palette material `material_index` changed inside `rect`
    fn on_material_mask_update(
        &mut self,
        cell: &dyn TerrainCell,
        material_index: usize,
        rect: GridRect,
        mask: &[u8],
        pitch: usize,
    );

    /// Palette-index material map changed inside `rect`
    fn on_material_map_update(&mut self, cell: &dyn TerrainCell, rect: GridRect, map: &[u8], pitch: usize);

    /// A standalone alpha-mapped material layer changed
    fn on_alpha_map_update(&mut self, cell: &dyn TerrainCell, material: MaterialId, image: &DynamicImage);

    fn on_cell_load(&mut self, cell: &dyn TerrainCell);

    fn on_cell_unload(&mut self, cell: CellId);
}

/// Renders every cell as a quadtree of fixed-resolution blocks
pub struct BruteBlockRenderer {
    config: RendererConfig,
    cells: HashMap<CellId, CellRenderContext>,
    blocks: BlockTree,
    index_caches: IndexCacheRegistry,
    palette: Vec<MaterialId>,
    meshes: Vec<RenderMesh>,
    stats: FrameStats,
}

impl BruteBlockRenderer {
    pub fn new(config: RendererConfig) -> Self {
        let mut index_caches = IndexCacheRegistry::new();
        for &resolution in &config.prebuilt_resolutions {
            index_caches.get_or_build(resolution);
        }
        Self {
            config,
            cells: HashMap::new(),
            blocks: BlockTree::new(),
            index_caches,
            palette: Vec::new(),
            meshes: Vec::new(),
            stats: FrameStats::default(),
        }
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn palette(&self) -> &[MaterialId] {
        &self.palette
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Block quadtrees of every active cell
    pub fn blocks(&self) -> &BlockTree {
        &self.blocks
    }

    pub fn cell_context(&self, cell: CellId) -> Option<&CellRenderContext> {
        self.cells.get(&cell)
    }

    pub fn cell_contexts(&self) -> impl Iterator<Item = &CellRenderContext> {
        self.cells.values()
    }

    fn context_for(&mut self, cell: &dyn TerrainCell) -> &mut CellRenderContext {
        let id = cell.id();
        self.cells.entry(id).or_insert_with(|| CellRenderContext::new(id))
    }
}

impl Default for BruteBlockRenderer {
    fn default() -> Self {
        Self::new(RendererConfig::default())
    }
}

impl TerrainRenderer for BruteBlockRenderer {
    fn create_properties(&self) -> CellRenderProperties {
        self.config.default_properties.clone()
    }

    fn get_render_meshes(
        &mut self,
        frustum: &Frustum,
        camera: &Camera,
        object_to_world: Mat4,
        cells: &[&dyn TerrainCell],
    ) -> &[RenderMesh] {
        self.meshes.clear();
        self.stats = FrameStats::default();

        let to_object = object_to_world.inverse();
        let view = LodView {
            position: to_object.transform_point3(camera.position),
            direction: to_object.transform_vector3(camera.forward()),
        };
        let object_frustum = frustum.transformed(&object_to_world);

        let mut active = Vec::with_capacity(cells.len());
        for &cell in cells {
            if !cell.render_properties().visible() {
                continue;
            }
            // Cells never announced through a load or data hook have nothing to draw
            let Some(context) = self.cells.get_mut(&cell.id()) else { continue };
            if !context.ensure_initialized(cell, &mut self.index_caches, &mut self.blocks) {
                continue;
            }
            context.update_lod(&mut self.blocks, cell, &view);
            active.push(cell);
        }

        for cell in active {
            let Some(context) = self.cells.get_mut(&cell.id()) else { continue };
            let meshes = context.collect_render_meshes(
                &mut self.blocks,
                cell,
                &object_frustum,
                &view,
                object_to_world,
                &self.palette,
            );
            self.meshes.extend_from_slice(meshes);

            let cell_stats = self.blocks.cell_stats(cell.id());
            self.stats.nodes += cell_stats.nodes;
            self.stats.leaves += cell_stats.leaves;
            self.stats.cells += 1;
        }

        self.stats.meshes = self.meshes.len();
        log::debug!(
            "Terrain frame: {} cells, {} nodes, {} leaves, {} meshes",
            self.stats.cells, self.stats.nodes, self.stats.leaves, self.stats.meshes
        );
        &self.meshes
    }

    fn on_height_update(&mut self, cell: &dyn TerrainCell, rect: GridRect) {
        let id = cell.id();
        let context = self.cells.entry(id).or_insert_with(|| CellRenderContext::new(id));
        context.on_height_update(cell, rect, &mut self.index_caches, &mut self.blocks);
    }

    fn on_material_palette_update(&mut self, palette: &[MaterialId]) {
        self.palette = palette.to_vec();
        log::debug!("Terrain material palette now has {} entries", self.palette.len());
    }

    fn on_material_mask_update(
        &mut self,
        cell: &dyn TerrainCell,
        material_index: usize,
        rect: GridRect,
        mask: &[u8],
        pitch: usize,
    ) {
        self.context_for(cell)
            .on_material_mask_update(cell, material_index, rect, mask, pitch);
    }

    fn on_material_map_update(&mut self, cell: &dyn TerrainCell, rect: GridRect, map: &[u8], pitch: usize) {
        let palette_len = self.palette.len();
        self.context_for(cell)
            .on_material_map_update(cell, palette_len, rect, map, pitch);
    }

    fn on_alpha_map_update(&mut self, cell: &dyn TerrainCell, material: MaterialId, image: &DynamicImage) {
        self.context_for(cell).on_alpha_map_update(material, image);
    }

    fn on_cell_load(&mut self, cell: &dyn TerrainCell) {
        let id = cell.id();
        let context = self.cells.entry(id).or_insert_with(|| CellRenderContext::new(id));
        context.ensure_initialized(cell, &mut self.index_caches, &mut self.blocks);
    }

    fn on_cell_unload(&mut self, cell: CellId) {
        if let Some(mut context) = self.cells.remove(&cell) {
            context.disconnect(&mut self.blocks);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Vec2, Vec3};
    use crate::lod::block::{Direction, StitchMask};
    use crate::render::material::{ShaderValue, SPLAT_ALPHA_MAP, TEXTURE_LOD_DISTANCE};
    use crate::render::mesh::MeshLayer;
    use crate::terrain::cell::HeightSource;
    use crate::terrain::heightfield::HeightfieldCell;
    use std::sync::Arc;

    const BASE: MaterialId = MaterialId(100);

    /// 17x17 samples over 16x16 world units, R = 4, threshold 16 at the root
    fn small_cell(id: u32) -> HeightfieldCell {
        small_cell_at(id, Vec2::ZERO)
    }

    fn small_cell_at(id: u32, origin: Vec2) -> HeightfieldCell {
        let mut cell = HeightfieldCell::new(CellId(id), 17, origin, Vec3::new(16.0, 4.0, 16.0));
        cell.properties_mut().set_block_resolution(4);
        cell.properties_mut().set_lod_split_coeff(4.0);
        cell.set_base_material(Some(BASE));
        cell
    }

    fn camera_at(x: f32, y: f32, z: f32) -> Camera {
        Camera::new(Vec3::new(x, y, z), 60.0, 1.0)
    }

    fn frame<'a>(
        renderer: &'a mut BruteBlockRenderer,
        camera: &Camera,
        cells: &[&dyn TerrainCell],
    ) -> &'a [RenderMesh] {
        renderer.get_render_meshes(&Frustum::unbounded(), camera, Mat4::IDENTITY, cells)
    }

    #[test]
    fn test_single_cell_split_and_merge() {
        let cell = small_cell(1);
        let mut renderer = BruteBlockRenderer::default();
        renderer.on_cell_load(&cell);

        let meshes = frame(&mut renderer, &camera_at(8.0, 12.0, 8.0), &[&cell]);
        assert_eq!(meshes.len(), 4);
        for mesh in meshes {
            assert_eq!(mesh.material, BASE);
            assert_eq!(mesh.layer, MeshLayer::Base);
            assert_eq!(mesh.vertex_count(), 25);
            // Two cell-border edges, two sibling edges
            assert_eq!(mesh.stitch_mask.bits().count_ones(), 2);
        }
        let top_left = meshes.iter().find(|m| m.bbox.min.x == 0.0 && m.bbox.max.z == 16.0).unwrap();
        assert_eq!(top_left.stitch_mask, StitchMask::NONE.with(Direction::North).with(Direction::West));

        let meshes = frame(&mut renderer, &camera_at(8.0, 20.0, 8.0), &[&cell]);
        assert_eq!(meshes.len(), 1);
        assert_eq!(meshes[0].stitch_mask, StitchMask::ALL);
        assert_eq!(renderer.stats().nodes, 1);
    }

    #[test]
    fn test_object_transform_moves_lod_origin() {
        let cell = small_cell(1);
        let mut renderer = BruteBlockRenderer::default();
        renderer.on_cell_load(&cell);

        let object_to_world = Mat4::from_translation(Vec3::new(100.0, 0.0, -50.0));
        let camera = camera_at(108.0, 12.0, -42.0);
        let meshes = renderer.get_render_meshes(&Frustum::unbounded(), &camera, object_to_world, &[&cell]);
        assert_eq!(meshes.len(), 4);
        assert_eq!(meshes[0].world_origin, Vec3::new(100.0, 0.0, -50.0));
        assert_eq!(meshes[0].object_to_world, object_to_world);

        // Same camera without the transform is far away
        let meshes = frame(&mut renderer, &camera, &[&cell]);
        assert_eq!(meshes.len(), 1);
    }

    #[test]
    fn test_world_frustum_culls_in_object_space() {
        let cell = small_cell(1);
        let mut renderer = BruteBlockRenderer::default();
        renderer.on_cell_load(&cell);

        let object_to_world = Mat4::from_translation(Vec3::new(1000.0, 0.0, 0.0));
        let camera = Camera::look_at(Vec3::new(8.0, 30.0, 40.0), Vec3::new(8.0, 0.0, 8.0), Vec3::Y);
        let frustum = camera.frustum();

        // The camera looks at the untransformed spot; the terrain was moved away
        let meshes = renderer.get_render_meshes(&frustum, &camera, object_to_world, &[&cell]);
        assert!(meshes.is_empty());
        let meshes = renderer.get_render_meshes(&frustum, &camera, Mat4::IDENTITY, &[&cell]);
        assert!(!meshes.is_empty());
    }

    #[test]
    fn test_unknown_and_invisible_cells_are_skipped() {
        let cell = small_cell(1);
        let mut hidden = small_cell(2);
        hidden.properties_mut().set_visible(false);
        let never_loaded = small_cell(3);

        let mut renderer = BruteBlockRenderer::default();
        renderer.on_cell_load(&cell);
        renderer.on_cell_load(&hidden);

        let meshes = frame(&mut renderer, &camera_at(8.0, 100.0, 8.0), &[&cell, &hidden, &never_loaded]);
        assert_eq!(meshes.len(), 1);
        assert_eq!(meshes[0].cell, CellId(1));
        assert_eq!(renderer.stats().cells, 1);
    }

    #[test]
    fn test_rejected_grid_draws_nothing() {
        let mut cell = HeightfieldCell::new(CellId(9), 20, Vec2::ZERO, Vec3::new(19.0, 1.0, 19.0));
        cell.set_base_material(Some(BASE));
        let mut renderer = BruteBlockRenderer::default();
        renderer.on_cell_load(&cell);
        assert!(!renderer.cell_context(CellId(9)).unwrap().is_initialized());
        assert!(frame(&mut renderer, &camera_at(0.0, 1.0, 0.0), &[&cell]).is_empty());
    }

    #[test]
    fn test_first_height_update_initializes_cell() {
        let cell = small_cell(1);
        let mut renderer = BruteBlockRenderer::default();
        renderer.on_height_update(&cell, GridRect::full(17, 17));
        assert!(renderer.cell_context(CellId(1)).unwrap().is_initialized());
        assert_eq!(frame(&mut renderer, &camera_at(8.0, 100.0, 8.0), &[&cell]).len(), 1);
    }

    #[test]
    fn test_height_update_rebuilds_geometry() {
        let mut cell = small_cell(1);
        let mut renderer = BruteBlockRenderer::default();
        renderer.on_cell_load(&cell);
        let camera = camera_at(8.0, 100.0, 8.0);
        assert_eq!(frame(&mut renderer, &camera, &[&cell])[0].bbox.max.y, 0.0);

        // Sample (4, 4) is a vertex of the root patch
        let rect = cell.set_height(4, 4, 3.0).unwrap();
        renderer.on_height_update(&cell, rect);
        let meshes = frame(&mut renderer, &camera, &[&cell]);
        assert_eq!(meshes[0].bbox.max.y, 3.0);
        assert!(meshes[0].buffers.positions.iter().any(|p| p.y == 3.0));
    }

    #[test]
    fn test_unloaded_heights_defer_geometry() {
        let mut cell = small_cell(1);
        cell.set_loaded(false);
        let mut renderer = BruteBlockRenderer::default();
        renderer.on_cell_load(&cell);
        let camera = camera_at(8.0, 100.0, 8.0);
        assert!(frame(&mut renderer, &camera, &[&cell]).is_empty());

        cell.set_loaded(true);
        assert_eq!(frame(&mut renderer, &camera, &[&cell]).len(), 1);
    }

    #[test]
    fn test_cell_unload_drops_context() {
        let cell = small_cell(1);
        let mut renderer = BruteBlockRenderer::default();
        renderer.on_cell_load(&cell);
        renderer.on_cell_unload(CellId(1));
        assert!(renderer.cell_context(CellId(1)).is_none());
        assert!(frame(&mut renderer, &camera_at(8.0, 100.0, 8.0), &[&cell]).is_empty());
    }

    #[test]
    fn test_cells_share_index_buffers() {
        let a = small_cell(1);
        let b = small_cell_at(2, Vec2::new(40.0, 0.0));
        let mut renderer = BruteBlockRenderer::default();
        renderer.on_cell_load(&a);
        renderer.on_cell_load(&b);

        let meshes = frame(&mut renderer, &camera_at(28.0, 1000.0, 8.0), &[&a, &b]).to_vec();
        assert_eq!(meshes.len(), 2);
        // Apart from each other, each root stitches all four edges
        assert_eq!(renderer.blocks().neighbour_cells(CellId(1)), [None; 4]);
        assert!(Arc::ptr_eq(&meshes[0].indices, &meshes[1].indices));
        assert!(!Arc::ptr_eq(&meshes[0].buffers, &meshes[1].buffers));
    }

    #[test]
    fn test_palette_layers_inside_splat_distance() {
        let cell = small_cell(1);
        let grass = MaterialId(1);
        let rock = MaterialId(2);
        let mut renderer = BruteBlockRenderer::default();
        renderer.on_cell_load(&cell);
        renderer.on_material_palette_update(&[grass, rock]);

        // Grass covers a 2x2 patch; rock stays empty
        renderer.on_material_mask_update(&cell, 0, GridRect::new(0, 0, 2, 2), &[255, 255, 255, 255], 2);
        renderer.on_material_mask_update(&cell, 1, GridRect::new(0, 0, 2, 2), &[0, 0, 0, 0], 2);
        let context = renderer.cell_context(CellId(1)).unwrap();
        assert!(context.material_used(0));
        assert!(!context.material_used(1));

        // Near: splat layers only; default splat distance is 100
        let meshes = frame(&mut renderer, &camera_at(8.0, 50.0, 8.0), &[&cell]);
        assert_eq!(meshes.len(), 1);
        assert_eq!(meshes[0].layer, MeshLayer::Palette(0));
        assert_eq!(meshes[0].material, grass);
        assert!(matches!(meshes[0].variables.get(SPLAT_ALPHA_MAP), Some(ShaderValue::Texture(_))));
        assert_eq!(meshes[0].variables.get(TEXTURE_LOD_DISTANCE), Some(ShaderValue::Float(100.0)));

        // Far: base material only
        let meshes = frame(&mut renderer, &camera_at(8.0, 150.0, 8.0), &[&cell]);
        assert_eq!(meshes.len(), 1);
        assert_eq!(meshes[0].layer, MeshLayer::Base);
        assert_eq!(meshes[0].material, BASE);
    }

    #[test]
    fn test_splat_base_and_priority() {
        let mut cell = small_cell(1);
        cell.set_splat_base_material(Some(MaterialId(7)));
        cell.set_alpha_splat_material(Some(MaterialId(8)));
        cell.properties_mut().set_splat_render_priority(Some("splat".to_string()));
        let mut renderer = BruteBlockRenderer::default();
        renderer.on_cell_load(&cell);
        renderer.on_material_palette_update(&[MaterialId(1)]);
        renderer.on_material_mask_update(&cell, 0, GridRect::new(3, 3, 4, 4), &[9], 1);

        let meshes = frame(&mut renderer, &camera_at(8.0, 50.0, 8.0), &[&cell]);
        let layers: Vec<MeshLayer> = meshes.iter().map(|m| m.layer).collect();
        assert_eq!(layers, vec![MeshLayer::SplatBase, MeshLayer::AlphaSplat, MeshLayer::Palette(0)]);
        assert_eq!(meshes[0].render_priority, None);
        assert_eq!(meshes[2].render_priority.as_deref(), Some("splat"));
    }

    #[test]
    fn test_mask_update_grows_material_arrays() {
        let cell = small_cell(1);
        let mut renderer = BruteBlockRenderer::default();
        renderer.on_material_mask_update(&cell, 5, GridRect::new(0, 0, 1, 1), &[1], 1);
        let context = renderer.cell_context(CellId(1)).unwrap();
        assert_eq!(context.material_count(), 6);
        assert!(context.material_used(5));
        assert!(!context.material_used(4));
        let texture = context.material_texture(5).unwrap();
        assert_eq!((texture.width(), texture.height()), (17, 17));
        assert_eq!(texture.pixel(0, 0), [1; 4]);
    }

    #[test]
    fn test_material_map_update_splits_palette() {
        let cell = small_cell(1);
        let mut renderer = BruteBlockRenderer::default();
        renderer.on_material_palette_update(&[MaterialId(1), MaterialId(2), MaterialId(3)]);
        renderer.on_material_map_update(&cell, GridRect::new(0, 0, 2, 1), &[0, 2], 2);

        let context = renderer.cell_context(CellId(1)).unwrap();
        assert_eq!(context.material_texture(0).unwrap().pixel(0, 0), [255; 4]);
        assert_eq!(context.material_texture(0).unwrap().pixel(1, 0), [0; 4]);
        assert_eq!(context.material_texture(2).unwrap().pixel(1, 0), [255; 4]);
        assert!(context.material_used(0));
        assert!(!context.material_used(1));
        assert!(context.material_used(2));
    }

    #[test]
    fn test_alpha_map_layer_from_grayscale_image() {
        let cell = small_cell(1);
        let mut renderer = BruteBlockRenderer::default();
        renderer.on_cell_load(&cell);

        let image = DynamicImage::ImageLuma8(image::GrayImage::from_pixel(8, 8, image::Luma([90])));
        renderer.on_alpha_map_update(&cell, MaterialId(42), &image);

        let context = renderer.cell_context(CellId(1)).unwrap();
        let texture = context.alpha_textures().last().unwrap();
        assert_eq!(texture.width(), 8);
        assert_eq!(texture.pixel(3, 3), [90, 90, 90, 90]);

        // Alpha-map layers are drawn at any distance
        let meshes = frame(&mut renderer, &camera_at(8.0, 500.0, 8.0), &[&cell]);
        let layers: Vec<MeshLayer> = meshes.iter().map(|m| m.layer).collect();
        assert_eq!(layers, vec![MeshLayer::Base, MeshLayer::AlphaMap(0)]);
        assert_eq!(meshes[1].material, MaterialId(42));

        // Updating the same material replaces rather than adds
        renderer.on_alpha_map_update(&cell, MaterialId(42), &image);
        assert_eq!(renderer.cell_context(CellId(1)).unwrap().alpha_textures().count(), 1);
    }

    #[test]
    fn test_splat_distance_change_refreshes_contexts() {
        let mut cell = small_cell(1);
        let mut renderer = BruteBlockRenderer::default();
        renderer.on_cell_load(&cell);
        renderer.on_material_palette_update(&[MaterialId(1)]);
        renderer.on_material_mask_update(&cell, 0, GridRect::new(0, 0, 1, 1), &[200], 1);

        cell.properties_mut().set_splat_distance(1000.0);
        let meshes = frame(&mut renderer, &camera_at(8.0, 500.0, 8.0), &[&cell]);
        assert_eq!(meshes[0].layer, MeshLayer::Palette(0));
        assert_eq!(meshes[0].variables.get(TEXTURE_LOD_DISTANCE), Some(ShaderValue::Float(1000.0)));
    }

    #[test]
    fn test_properties_template_and_config_json() {
        let mut config = RendererConfig::default();
        config.default_properties.set_block_resolution(64);
        config.prebuilt_resolutions = vec![16, 32];
        let renderer = BruteBlockRenderer::new(config.clone());
        assert_eq!(renderer.create_properties().block_resolution(), 64);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("renderer.json");
        config.save_json(&path).unwrap();
        assert_eq!(RendererConfig::load_json(&path).unwrap(), config);
    }

    #[test]
    fn test_fly_over_many_cells() {
        use crate::terrain::generator::{TerrainGenerator, TerrainParams};

        let generator = TerrainGenerator::new(TerrainParams { height_scale: 20.0, ..Default::default() });
        let mut cells = Vec::new();
        for i in 0..4u32 {
            let origin = Vec2::new((i % 2) as f32 * 64.0, (i / 2) as f32 * 64.0);
            let mut cell = HeightfieldCell::new(CellId(i), 65, origin, Vec3::new(64.0, 20.0, 64.0));
            cell.properties_mut().set_block_resolution(8);
            cell.properties_mut().set_lod_split_coeff(8.0);
            cell.set_base_material(Some(BASE));
            cell.generate(&generator);
            cells.push(cell);
        }

        let mut renderer = BruteBlockRenderer::default();
        for cell in &cells {
            renderer.on_cell_load(cell);
        }
        let refs: Vec<&dyn TerrainCell> = cells.iter().map(|c| c as &dyn TerrainCell).collect();

        for step in 0..20 {
            let t = step as f32 / 19.0;
            let camera = Camera::look_at(
                Vec3::new(128.0 * t, 30.0, 64.0),
                Vec3::new(128.0 * t + 10.0, 0.0, 64.0),
                Vec3::Y,
            );
            let frustum = camera.frustum();
            let meshes = renderer.get_render_meshes(&frustum, &camera, Mat4::IDENTITY, &refs);
            for mesh in meshes {
                assert_eq!(mesh.vertex_count(), 81);
                assert!(mesh.indices.iter().all(|i| (i as usize) < mesh.vertex_count()));
            }
        }
        assert!(renderer.stats().leaves > 4);
        assert!(renderer.cell_contexts().all(|c| c.is_initialized()));
        // The 2x2 block of cells is linked on every inner edge
        assert_eq!(
            renderer.blocks().neighbour_cells(CellId(0)),
            [Some(CellId(2)), Some(CellId(1)), None, None]
        );
        assert_eq!(cells[0].grid_width(), 65);
    }

    #[test]
    fn test_adjacent_cells_meet_without_cracks() {
        let cell_at = |id: u32, x: f32| {
            let mut cell = HeightfieldCell::new(CellId(id), 33, Vec2::new(x, 0.0), Vec3::new(32.0, 4.0, 32.0));
            cell.properties_mut().set_block_resolution(4);
            cell.properties_mut().set_lod_split_coeff(4.0);
            cell.set_base_material(Some(BASE));
            cell
        };
        let (a, b) = (cell_at(1, 0.0), cell_at(2, 32.0));
        let mut renderer = BruteBlockRenderer::default();
        renderer.on_cell_load(&a);
        renderer.on_cell_load(&b);
        assert_eq!(renderer.blocks().neighbour_cells(CellId(1))[Direction::East.index()], Some(CellId(2)));

        // Inside A, a few units from the shared edge at x = 32
        let camera = Camera::look_at(Vec3::new(20.0, 0.5, 16.0), Vec3::new(40.0, 0.5, 16.0), Vec3::Y);
        let meshes = frame(&mut renderer, &camera, &[&a, &b]).to_vec();
        let step = |mesh: &RenderMesh| renderer.blocks().get(mesh.block).unwrap().step;

        let west: Vec<&RenderMesh> = meshes.iter().filter(|m| m.cell == CellId(1) && m.bbox.max.x == 32.0).collect();
        let east: Vec<&RenderMesh> = meshes.iter().filter(|m| m.cell == CellId(2) && m.bbox.min.x == 32.0).collect();
        assert!(!west.is_empty() && !east.is_empty());

        let mut differing = 0;
        for l in &west {
            for r in &east {
                let overlap = l.bbox.min.z.max(r.bbox.min.z) < l.bbox.max.z.min(r.bbox.max.z);
                if !overlap {
                    continue;
                }
                let (left_step, right_step) = (step(l), step(r));
                assert!(left_step.max(right_step) <= 2 * left_step.min(right_step));
                let left_stitched = l.stitch_mask.contains(Direction::East);
                let right_stitched = r.stitch_mask.contains(Direction::West);
                assert_eq!(left_stitched, right_step > left_step);
                assert_eq!(right_stitched, left_step > right_step);
                // Matching vertex spacing along the shared edge
                assert_eq!(
                    left_step * (1 + left_stitched as usize),
                    right_step * (1 + right_stitched as usize)
                );
                if left_step != right_step {
                    differing += 1;
                }
            }
        }
        assert!(differing > 0);

        // Unloading B leaves A's edge unlinked and stitched again
        renderer.on_cell_unload(CellId(2));
        assert_eq!(renderer.blocks().neighbour_cells(CellId(1)), [None; 4]);
        let meshes = frame(&mut renderer, &camera, &[&a]);
        assert!(meshes
            .iter()
            .filter(|m| m.bbox.max.x == 32.0)
            .all(|m| m.stitch_mask.contains(Direction::East)));
    }
}

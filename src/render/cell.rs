//! Per-cell render state: the cell's root in the shared block tree plus
//! material masks and layers

use std::sync::Arc;

use image::DynamicImage;

use super::material::{
    AlphaTexture, MaterialId, ShaderValue, ShaderVariableContext, ALPHA_MAP_SCALE, SPLAT_ALPHA_MAP,
    TEXTURE_LOD_DISTANCE,
};
use super::mesh::{MeshLayer, RenderMesh};
use crate::core::types::Mat4;
use crate::lod::block::BlockId;
use crate::lod::stitch::{IndexCacheRegistry, StitchIndexCache};
use crate::lod::tree::{BlockTree, CellLayout, LodView, VisiblePatch};
use crate::math::Frustum;
use crate::terrain::cell::{CellId, GridRect, TerrainCell};

/// Alpha mask of one palette material
struct MaterialMask {
    texture: AlphaTexture,
    variables: Arc<ShaderVariableContext>,
    used: bool,
}

/// Material drawn through its own alpha map, independent of the palette
struct AlphaMapLayer {
    material: MaterialId,
    texture: AlphaTexture,
    variables: Arc<ShaderVariableContext>,
}

fn layer_variables(texture: &AlphaTexture, common: &Arc<ShaderVariableContext>) -> Arc<ShaderVariableContext> {
    let mut variables = ShaderVariableContext::with_parent(common.clone());
    variables.set(SPLAT_ALPHA_MAP, ShaderValue::Texture(texture.id()));
    variables.set(ALPHA_MAP_SCALE, ShaderValue::Vector4(texture.texel_scale()));
    Arc::new(variables)
}

fn common_variables(splat_distance: f32) -> Arc<ShaderVariableContext> {
    let mut common = ShaderVariableContext::new();
    common.set(TEXTURE_LOD_DISTANCE, ShaderValue::Float(splat_distance));
    Arc::new(common)
}

/// Render state for one terrain cell
pub struct CellRenderContext {
    cell: CellId,
    /// Root of this cell's quadtree in the renderer's [`BlockTree`]
    root: Option<BlockId>,
    indices: Option<Arc<StitchIndexCache>>,
    /// Grid was rejected; don't retry until the cell reloads
    rejected: bool,
    common: Arc<ShaderVariableContext>,
    splat_distance: f32,
    masks: Vec<MaterialMask>,
    alpha_layers: Vec<AlphaMapLayer>,
    object_to_world: Mat4,
    patches: Vec<VisiblePatch>,
    meshes: Vec<RenderMesh>,
}

impl CellRenderContext {
    pub fn new(cell: CellId) -> Self {
        Self {
            cell,
            root: None,
            indices: None,
            rejected: false,
            common: common_variables(0.0),
            splat_distance: 0.0,
            masks: Vec::new(),
            alpha_layers: Vec::new(),
            object_to_world: Mat4::IDENTITY,
            patches: Vec::new(),
            meshes: Vec::new(),
        }
    }

    pub fn cell(&self) -> CellId {
        self.cell
    }

    pub fn root(&self) -> Option<BlockId> {
        self.root
    }

    pub fn is_initialized(&self) -> bool {
        self.root.is_some()
    }

    /// Add the cell's root block to `blocks`, linking it to adjacent cells,
    /// and fetch the shared index buffers.
    ///
    /// Idempotent. Returns `false` if the cell's grid cannot be tiled by
    /// blocks of the configured resolution.
    pub fn ensure_initialized(
        &mut self,
        cell: &dyn TerrainCell,
        registry: &mut IndexCacheRegistry,
        blocks: &mut BlockTree,
    ) -> bool {
        if self.root.is_some() {
            return true;
        }
        if self.rejected {
            return false;
        }

        let properties = cell.render_properties();
        let resolution = properties.block_resolution();
        let root = match blocks.add_cell(self.cell, CellLayout::from_source(cell), resolution) {
            Ok(root) => root,
            Err(e) => {
                log::warn!("Terrain cell {:?} not rendered: {}", self.cell, e);
                self.rejected = true;
                return false;
            }
        };
        blocks.build_patch(root, cell);

        self.refresh_common(properties.splat_distance());
        self.indices = Some(registry.get_or_build(resolution));
        self.root = Some(root);
        log::info!(
            "Activated terrain cell {:?} ({}x{} samples, block resolution {})",
            self.cell, cell.grid_width(), cell.grid_height(), resolution
        );
        true
    }

    /// Rebuild the common context (and re-parent layer contexts) when the
    /// splat distance changes.
    fn refresh_common(&mut self, splat_distance: f32) {
        if self.splat_distance == splat_distance {
            return;
        }
        self.splat_distance = splat_distance;
        self.common = common_variables(splat_distance);
        for mask in &mut self.masks {
            mask.variables = Arc::new(mask.variables.reparented(self.common.clone()));
        }
        for layer in &mut self.alpha_layers {
            layer.variables = Arc::new(layer.variables.reparented(self.common.clone()));
        }
    }

    pub fn common_variables(&self) -> &Arc<ShaderVariableContext> {
        &self.common
    }

    /// Heights in `rect` changed; rebuild the affected blocks on the next LOD pass
    pub fn on_height_update(
        &mut self,
        cell: &dyn TerrainCell,
        rect: GridRect,
        registry: &mut IndexCacheRegistry,
        blocks: &mut BlockTree,
    ) {
        let was_initialized = self.is_initialized();
        if !self.ensure_initialized(cell, registry, blocks) || !was_initialized {
            return;
        }
        let invalidated = blocks.invalidate(self.cell, rect);
        log::debug!("Height update on cell {:?} invalidated {} blocks", self.cell, invalidated);
    }

    /// Make sure palette material `index` has a mask texture
    fn ensure_mask(&mut self, cell: &dyn TerrainCell, index: usize) {
        let (width, height) = (cell.material_map_width(), cell.material_map_height());
        while self.masks.len() <= index {
            let texture = AlphaTexture::new(width, height);
            let variables = layer_variables(&texture, &self.common);
            self.masks.push(MaterialMask { texture, variables, used: false });
        }
    }

    /// Upload an 8-bit coverage mask for palette material `material_index`.
    ///
    /// `mask` row `r` starts at `mask[r * pitch]` and covers `rect`'s columns.
    pub fn on_material_mask_update(
        &mut self,
        cell: &dyn TerrainCell,
        material_index: usize,
        rect: GridRect,
        mask: &[u8],
        pitch: usize,
    ) {
        self.ensure_mask(cell, material_index);
        let entry = &mut self.masks[material_index];
        entry.texture.blit(rect, mask, pitch, |v| v);
        entry.used = entry.texture.any_nonzero();
    }

    /// Upload a palette-index map: each palette material gets full coverage
    /// where the map names it and none elsewhere.
    pub fn on_material_map_update(
        &mut self,
        cell: &dyn TerrainCell,
        palette_len: usize,
        rect: GridRect,
        map: &[u8],
        pitch: usize,
    ) {
        if palette_len == 0 {
            return;
        }
        self.ensure_mask(cell, palette_len - 1);
        for (index, entry) in self.masks.iter_mut().enumerate().take(palette_len) {
            entry.texture.blit(rect, map, pitch, |v| if v as usize == index { 255 } else { 0 });
            entry.used = entry.texture.any_nonzero();
        }
    }

    /// Set the alpha map of a standalone material layer, adding the layer if new.
    ///
    /// Images with an alpha channel are copied as-is; others use their
    /// intensity as alpha.
    pub fn on_alpha_map_update(&mut self, material: MaterialId, image: &DynamicImage) {
        let rgba = if image.color().has_alpha() {
            image.to_rgba8()
        } else {
            let mut rgba = image.to_rgba8();
            for pixel in rgba.pixels_mut() {
                let [r, g, b, _] = pixel.0;
                pixel.0[3] = ((r as u16 + g as u16 + b as u16) / 3) as u8;
            }
            rgba
        };
        let (width, height) = (rgba.width() as usize, rgba.height() as usize);

        let position = self.alpha_layers.iter().position(|l| l.material == material);
        let index = match position {
            Some(index) if self.alpha_layers[index].texture.width() == width
                && self.alpha_layers[index].texture.height() == height => index,
            Some(index) => {
                let texture = AlphaTexture::new(width, height);
                self.alpha_layers[index].variables = layer_variables(&texture, &self.common);
                self.alpha_layers[index].texture = texture;
                index
            }
            None => {
                let texture = AlphaTexture::new(width, height);
                let variables = layer_variables(&texture, &self.common);
                self.alpha_layers.push(AlphaMapLayer { material, texture, variables });
                self.alpha_layers.len() - 1
            }
        };
        self.alpha_layers[index].texture.copy_from_image(&rgba);
    }

    /// Mask texture of palette material `index`
    pub fn material_texture(&self, index: usize) -> Option<&AlphaTexture> {
        self.masks.get(index).map(|m| &m.texture)
    }

    /// Whether palette material `index` covers any texel
    pub fn material_used(&self, index: usize) -> bool {
        self.masks.get(index).is_some_and(|m| m.used)
    }

    pub fn material_count(&self) -> usize {
        self.masks.len()
    }

    /// Every alpha texture owned by this cell, for upload
    pub fn alpha_textures(&self) -> impl Iterator<Item = &AlphaTexture> {
        self.masks
            .iter()
            .map(|m| &m.texture)
            .chain(self.alpha_layers.iter().map(|l| &l.texture))
    }

    /// Split and merge this cell's blocks for `view`, in the cell's object
    /// space. Blocks of adjacent cells may be split along with them.
    pub fn update_lod(&mut self, blocks: &mut BlockTree, cell: &dyn TerrainCell, view: &LodView) {
        if self.root.is_some() {
            blocks.update_lod(self.cell, view, &cell.render_properties().lod_settings(), cell);
        }
    }

    /// Gather this frame's meshes once every linked cell has updated its
    /// detail levels.
    ///
    /// Blocks split or collapsed from an adjacent cell are built first.
    /// `frustum` and `view` are in the cell's object space.
    pub fn collect_render_meshes(
        &mut self,
        blocks: &mut BlockTree,
        cell: &dyn TerrainCell,
        frustum: &Frustum,
        view: &LodView,
        object_to_world: Mat4,
        palette: &[MaterialId],
    ) -> &[RenderMesh] {
        self.meshes.clear();
        self.object_to_world = object_to_world;

        let properties = cell.render_properties();
        self.refresh_common(properties.splat_distance());
        let (Some(_), Some(indices)) = (self.root, self.indices.as_ref()) else {
            return &self.meshes;
        };

        let pending = blocks.build_pending(self.cell, cell);
        if pending > 0 {
            log::trace!("Cell {:?}: built {} blocks left by a neighbour", self.cell, pending);
        }
        self.patches.clear();
        blocks.collect_render_meshes(self.cell, frustum, indices, &mut self.patches);

        let priority: Option<Arc<str>> = properties.splat_render_priority().map(Arc::from);
        let patches = std::mem::take(&mut self.patches);
        for patch in &patches {
            self.emit_layers(cell, patch, view, palette, &priority);
        }
        self.patches = patches;

        log::trace!("Cell {:?}: {} patches, {} meshes", self.cell, self.patches.len(), self.meshes.len());
        &self.meshes
    }

    /// Update detail levels for `view`, then gather this frame's meshes.
    ///
    /// With several linked cells, update all of them before collecting any.
    pub fn get_render_meshes(
        &mut self,
        blocks: &mut BlockTree,
        cell: &dyn TerrainCell,
        frustum: &Frustum,
        view: &LodView,
        object_to_world: Mat4,
        palette: &[MaterialId],
    ) -> &[RenderMesh] {
        self.update_lod(blocks, cell, view);
        self.collect_render_meshes(blocks, cell, frustum, view, object_to_world, palette)
    }

    fn emit_layers(
        &mut self,
        cell: &dyn TerrainCell,
        patch: &VisiblePatch,
        view: &LodView,
        palette: &[MaterialId],
        priority: &Option<Arc<str>>,
    ) {
        let distance = patch.bbox.distance_squared_to_point(view.position).sqrt();
        let has_splat_layers = !self.masks.is_empty() || cell.alpha_splat_material().is_some();
        let cell_id = self.cell;
        let object_to_world = self.object_to_world;
        let world_origin = object_to_world.w_axis.truncate();

        let push = |meshes: &mut Vec<RenderMesh>,
                        layer: MeshLayer,
                        material: MaterialId,
                        variables: &Arc<ShaderVariableContext>,
                        render_priority: Option<Arc<str>>| {
            meshes.push(RenderMesh {
                cell: cell_id,
                block: patch.block,
                buffers: patch.buffers.clone(),
                indices: patch.indices.clone(),
                stitch_mask: patch.stitch_mask,
                layer,
                material,
                variables: variables.clone(),
                render_priority,
                world_origin,
                object_to_world,
                bbox: patch.bbox,
            });
        };

        if distance >= self.splat_distance || !has_splat_layers {
            if let Some(base) = cell.base_material() {
                push(&mut self.meshes, MeshLayer::Base, base, &self.common, None);
            }
        } else {
            if let Some(material) = cell.splat_base_material() {
                push(&mut self.meshes, MeshLayer::SplatBase, material, &self.common, None);
            }
            if let Some(material) = cell.alpha_splat_material() {
                push(&mut self.meshes, MeshLayer::AlphaSplat, material, &self.common, None);
            }
            for (index, mask) in self.masks.iter().enumerate() {
                if !mask.used {
                    continue;
                }
                let Some(&material) = palette.get(index) else { continue };
                push(&mut self.meshes, MeshLayer::Palette(index), material, &mask.variables, priority.clone());
            }
        }

        for (index, layer) in self.alpha_layers.iter().enumerate() {
            push(&mut self.meshes, MeshLayer::AlphaMap(index), layer.material, &layer.variables, priority.clone());
        }
    }

    /// Remove the cell's blocks, unlink it from adjacent cells and drop all
    /// per-cell resources
    pub fn disconnect(&mut self, blocks: &mut BlockTree) {
        if self.root.take().is_some() {
            blocks.remove_cell(self.cell);
        }
        self.indices = None;
        self.rejected = false;
        self.masks.clear();
        self.alpha_layers.clear();
        self.patches.clear();
        self.meshes.clear();
        log::debug!("Disconnected terrain cell {:?}", self.cell);
    }
}

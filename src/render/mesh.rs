//! Render mesh descriptors handed to the host renderer

use std::sync::Arc;

use super::buffer::{IndexBuffer, PatchBuffers};
use super::material::{MaterialId, ShaderVariableContext};
use crate::core::types::{Mat4, Vec3};
use crate::lod::block::{BlockId, StitchMask};
use crate::math::Aabb;
use crate::terrain::cell::CellId;

/// Which material pass a mesh belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MeshLayer {
    /// Cell base material, drawn beyond the splat distance
    Base,
    /// Material under the splat layers
    SplatBase,
    /// Material blending the palette through one alpha map
    AlphaSplat,
    /// Palette material masked by its alpha texture
    Palette(usize),
    /// Standalone alpha-mapped material layer
    AlphaMap(usize),
}

/// One draw of a terrain block with one material
#[derive(Clone, Debug)]
pub struct RenderMesh {
    pub cell: CellId,
    pub block: BlockId,
    pub buffers: Arc<PatchBuffers>,
    pub indices: Arc<IndexBuffer>,
    pub stitch_mask: StitchMask,
    pub layer: MeshLayer,
    pub material: MaterialId,
    pub variables: Arc<ShaderVariableContext>,
    pub render_priority: Option<Arc<str>>,
    /// Translation part of `object_to_world`
    pub world_origin: Vec3,
    pub object_to_world: Mat4,
    /// Object-space bounds
    pub bbox: Aabb,
}

impl RenderMesh {
    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    pub fn vertex_count(&self) -> usize {
        self.buffers.vertex_count()
    }
}

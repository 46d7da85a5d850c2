//! GPU uniform buffer for per-draw terrain transforms

use bytemuck::{Pod, Zeroable};
use crate::core::camera::Camera;
use crate::core::types::Mat4;
use crate::render::material::{ShaderValue, ALPHA_MAP_SCALE, TEXTURE_LOD_DISTANCE};
use crate::render::mesh::RenderMesh;

/// Uniform data for a terrain draw (must match shader struct exactly)
/// WGSL vec3 has 16-byte alignment, so we need explicit padding
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct TerrainUniform {
    /// View-projection matrix (64 bytes, offset 0)
    pub view_proj: [[f32; 4]; 4],
    /// Object-to-world matrix of the terrain (64 bytes, offset 64)
    pub object_to_world: [[f32; 4]; 4],
    /// Camera position in world space (12 bytes, offset 128)
    pub camera_position: [f32; 3],
    /// Distance at which material splatting fades out (4 bytes, offset 140)
    pub texture_lod_distance: f32,
    /// Alpha map texel scale and offset (16 bytes, offset 144)
    pub alpha_map_scale: [f32; 4],
}

impl TerrainUniform {
    pub fn new(camera: &Camera, object_to_world: Mat4, texture_lod_distance: f32) -> Self {
        Self {
            view_proj: camera.view_projection().to_cols_array_2d(),
            object_to_world: object_to_world.to_cols_array_2d(),
            camera_position: camera.position.to_array(),
            texture_lod_distance,
            alpha_map_scale: [1.0, 1.0, 0.0, 0.0],
        }
    }

    /// Uniform for drawing `mesh`, pulling splat values from its variables
    pub fn for_mesh(camera: &Camera, mesh: &RenderMesh) -> Self {
        let mut uniform = Self::new(camera, mesh.object_to_world, 0.0);
        if let Some(ShaderValue::Float(distance)) = mesh.variables.get(TEXTURE_LOD_DISTANCE) {
            uniform.texture_lod_distance = distance;
        }
        if let Some(ShaderValue::Vector4(scale)) = mesh.variables.get(ALPHA_MAP_SCALE) {
            uniform.alpha_map_scale = scale.to_array();
        }
        uniform
    }
}

impl Default for TerrainUniform {
    fn default() -> Self {
        Self {
            view_proj: Mat4::IDENTITY.to_cols_array_2d(),
            object_to_world: Mat4::IDENTITY.to_cols_array_2d(),
            camera_position: [0.0; 3],
            texture_lod_distance: 0.0,
            alpha_map_scale: [1.0, 1.0, 0.0, 0.0],
        }
    }
}

/// GPU buffer for the terrain uniform
pub struct TerrainUniformBuffer {
    buffer: wgpu::Buffer,
}

impl TerrainUniformBuffer {
    pub fn new(device: &wgpu::Device) -> Self {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("terrain_uniform"),
            size: std::mem::size_of::<TerrainUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self { buffer }
    }

    /// Update buffer with new uniform data
    pub fn update(&self, queue: &wgpu::Queue, uniform: &TerrainUniform) {
        queue.write_buffer(&self.buffer, 0, bytemuck::bytes_of(uniform));
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_size_is_16_byte_aligned() {
        assert_eq!(std::mem::size_of::<TerrainUniform>(), 160);
        assert_eq!(std::mem::size_of::<TerrainUniform>() % 16, 0);
    }

    #[test]
    fn test_uniform_from_mesh_variables() {
        use crate::core::types::{Vec2, Vec3};
        use crate::math::Frustum;
        use crate::render::material::MaterialId;
        use crate::render::renderer::{BruteBlockRenderer, TerrainRenderer};
        use crate::terrain::cell::{CellId, GridRect};
        use crate::terrain::heightfield::HeightfieldCell;

        let mut cell = HeightfieldCell::new(CellId(0), 9, Vec2::ZERO, Vec3::new(8.0, 1.0, 8.0));
        cell.properties_mut().set_block_resolution(8);
        cell.properties_mut().set_splat_distance(50.0);
        let mut renderer = BruteBlockRenderer::default();
        renderer.on_cell_load(&cell);
        renderer.on_material_palette_update(&[MaterialId(3)]);
        renderer.on_material_mask_update(&cell, 0, GridRect::new(0, 0, 1, 1), &[255], 1);

        let camera = Camera::new(Vec3::new(4.0, 10.0, 4.0), 60.0, 1.0);
        let object_to_world = Mat4::from_translation(Vec3::new(5.0, 0.0, 0.0));
        let meshes = renderer.get_render_meshes(&Frustum::unbounded(), &camera, object_to_world, &[&cell]);
        let uniform = TerrainUniform::for_mesh(&camera, &meshes[0]);

        assert_eq!(uniform.texture_lod_distance, 50.0);
        // 9x9 mask texture
        assert_eq!(uniform.alpha_map_scale, [8.0 / 9.0, 8.0 / 9.0, 0.5 / 9.0, 0.5 / 9.0]);
        assert_eq!(uniform.object_to_world[3], [5.0, 0.0, 0.0, 1.0]);
        assert_eq!(uniform.camera_position, [4.0, 10.0, 4.0]);
    }
}

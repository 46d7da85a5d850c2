//! GPU copies of terrain geometry and alpha textures
//!
//! CPU buffers are shared through `Arc`; the cache holds only weak handles,
//! so once the block tree drops a patch its GPU copy is evicted on the next
//! [`TerrainGpuCache::evict`].

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use wgpu::util::DeviceExt;

use super::buffer::{BufferId, IndexBuffer, PatchBuffers};
use super::material::{AlphaTexture, TextureId};
use super::mesh::RenderMesh;

/// Vertex streams of one patch on the GPU
pub struct GpuPatch {
    pub positions: wgpu::Buffer,
    pub normals: wgpu::Buffer,
    pub tangents: wgpu::Buffer,
    pub bitangents: wgpu::Buffer,
    pub texcoords: wgpu::Buffer,
    pub vertex_count: u32,
}

/// Index buffer on the GPU
pub struct GpuIndices {
    pub buffer: wgpu::Buffer,
    pub format: wgpu::IndexFormat,
    pub count: u32,
}

/// Alpha texture on the GPU with the revision it was last written at
pub struct GpuAlphaTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    revision: u64,
    size: (u32, u32),
}

/// Counters from one [`TerrainGpuCache::prepare`] call
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UploadStats {
    pub patches_uploaded: usize,
    pub indices_uploaded: usize,
    pub bytes_uploaded: usize,
}

/// Vertex layouts for the five patch streams, in slot order: position,
/// normal, texcoord, tangent, bitangent
pub fn vertex_layouts() -> [wgpu::VertexBufferLayout<'static>; 5] {
    const POSITION: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x3];
    const NORMAL: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![1 => Float32x3];
    const TEXCOORD: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![2 => Float32x2];
    const TANGENT: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![3 => Float32x3];
    const BITANGENT: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![4 => Float32x3];
    [
        wgpu::VertexBufferLayout {
            array_stride: 12,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &POSITION,
        },
        wgpu::VertexBufferLayout {
            array_stride: 12,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &NORMAL,
        },
        wgpu::VertexBufferLayout {
            array_stride: 8,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &TEXCOORD,
        },
        wgpu::VertexBufferLayout {
            array_stride: 12,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &TANGENT,
        },
        wgpu::VertexBufferLayout {
            array_stride: 12,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &BITANGENT,
        },
    ]
}

/// GPU-side cache keyed by CPU buffer identity
#[derive(Default)]
pub struct TerrainGpuCache {
    patches: HashMap<BufferId, (Weak<PatchBuffers>, GpuPatch)>,
    indices: HashMap<BufferId, (Weak<IndexBuffer>, GpuIndices)>,
    textures: HashMap<TextureId, GpuAlphaTexture>,
}

impl TerrainGpuCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upload whatever geometry `meshes` reference that is not resident yet
    pub fn prepare(&mut self, device: &wgpu::Device, meshes: &[RenderMesh]) -> UploadStats {
        let mut stats = UploadStats::default();
        for mesh in meshes {
            let patch_id = mesh.buffers.id();
            if !self.patches.contains_key(&patch_id) {
                let gpu = upload_patch(device, &mesh.buffers);
                stats.patches_uploaded += 1;
                stats.bytes_uploaded += mesh.buffers.position_bytes().len()
                    + mesh.buffers.normal_bytes().len()
                    + mesh.buffers.tangent_bytes().len()
                    + mesh.buffers.bitangent_bytes().len()
                    + mesh.buffers.texcoord_bytes().len();
                self.patches.insert(patch_id, (Arc::downgrade(&mesh.buffers), gpu));
            }

            let index_id = mesh.indices.id();
            if !self.indices.contains_key(&index_id) {
                let gpu = upload_indices(device, &mesh.indices);
                stats.indices_uploaded += 1;
                stats.bytes_uploaded += mesh.indices.as_bytes().len();
                self.indices.insert(index_id, (Arc::downgrade(&mesh.indices), gpu));
            }
        }
        if stats.patches_uploaded > 0 || stats.indices_uploaded > 0 {
            log::debug!(
                "Uploaded {} patches and {} index buffers ({} KB)",
                stats.patches_uploaded,
                stats.indices_uploaded,
                stats.bytes_uploaded / 1024
            );
        }
        stats
    }

    /// Bring GPU textures in line with `textures`.
    ///
    /// New or resized textures are created, stale revisions rewritten, and
    /// textures missing from `textures` dropped.
    pub fn sync_textures<'a>(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        textures: impl IntoIterator<Item = &'a AlphaTexture>,
    ) -> usize {
        let mut live = HashSet::new();
        let mut written = 0;
        for texture in textures {
            live.insert(texture.id());
            let size = (texture.width() as u32, texture.height() as u32);
            if size.0 == 0 || size.1 == 0 {
                continue;
            }

            let entry = self.textures.get(&texture.id());
            let up_to_date = entry.is_some_and(|e| e.size == size && e.revision == texture.revision());
            if up_to_date {
                continue;
            }
            if entry.is_none_or(|e| e.size != size) {
                self.textures.insert(texture.id(), create_texture(device, size));
            }
            if let Some(gpu) = self.textures.get_mut(&texture.id()) {
                write_texture(queue, &gpu.texture, texture);
                gpu.revision = texture.revision();
                written += 1;
            }
        }
        self.textures.retain(|id, _| live.contains(id));
        written
    }

    /// Drop GPU copies whose CPU buffers are gone. Returns the number evicted.
    pub fn evict(&mut self) -> usize {
        let before = self.patches.len() + self.indices.len();
        self.patches.retain(|_, (cpu, _)| cpu.strong_count() > 0);
        self.indices.retain(|_, (cpu, _)| cpu.strong_count() > 0);
        let evicted = before - self.patches.len() - self.indices.len();
        if evicted > 0 {
            log::trace!("Evicted {} GPU terrain buffers", evicted);
        }
        evicted
    }

    pub fn patch(&self, id: BufferId) -> Option<&GpuPatch> {
        self.patches.get(&id).map(|(_, gpu)| gpu)
    }

    pub fn indices(&self, id: BufferId) -> Option<&GpuIndices> {
        self.indices.get(&id).map(|(_, gpu)| gpu)
    }

    pub fn texture(&self, id: TextureId) -> Option<&GpuAlphaTexture> {
        self.textures.get(&id)
    }

    pub fn resident_buffers(&self) -> usize {
        self.patches.len() + self.indices.len()
    }

    /// Record the draw for `mesh`. Returns `false` if it was never prepared.
    pub fn draw(&self, pass: &mut wgpu::RenderPass<'_>, mesh: &RenderMesh) -> bool {
        let (Some(patch), Some(indices)) = (self.patch(mesh.buffers.id()), self.indices(mesh.indices.id())) else {
            return false;
        };
        pass.set_vertex_buffer(0, patch.positions.slice(..));
        pass.set_vertex_buffer(1, patch.normals.slice(..));
        pass.set_vertex_buffer(2, patch.texcoords.slice(..));
        pass.set_vertex_buffer(3, patch.tangents.slice(..));
        pass.set_vertex_buffer(4, patch.bitangents.slice(..));
        pass.set_index_buffer(indices.buffer.slice(..), indices.format);
        pass.draw_indexed(0..indices.count, 0, 0..1);
        true
    }
}

fn upload_patch(device: &wgpu::Device, buffers: &PatchBuffers) -> GpuPatch {
    let vertex = |label: &str, contents: &[u8]| {
        device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents,
            usage: wgpu::BufferUsages::VERTEX,
        })
    };
    GpuPatch {
        positions: vertex("terrain_positions", buffers.position_bytes()),
        normals: vertex("terrain_normals", buffers.normal_bytes()),
        tangents: vertex("terrain_tangents", buffers.tangent_bytes()),
        bitangents: vertex("terrain_bitangents", buffers.bitangent_bytes()),
        texcoords: vertex("terrain_texcoords", buffers.texcoord_bytes()),
        vertex_count: buffers.vertex_count() as u32,
    }
}

fn upload_indices(device: &wgpu::Device, indices: &IndexBuffer) -> GpuIndices {
    let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("terrain_indices"),
        contents: indices.as_bytes(),
        usage: wgpu::BufferUsages::INDEX,
    });
    GpuIndices {
        buffer,
        format: indices.format().to_wgpu(),
        count: indices.len() as u32,
    }
}

fn create_texture(device: &wgpu::Device, size: (u32, u32)) -> GpuAlphaTexture {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("terrain_alpha"),
        size: wgpu::Extent3d {
            width: size.0,
            height: size.1,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    GpuAlphaTexture { texture, view, revision: u64::MAX, size }
}

fn write_texture(queue: &wgpu::Queue, texture: &wgpu::Texture, source: &AlphaTexture) {
    let (width, height) = (source.width() as u32, source.height() as u32);
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        source.bytes(),
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(4 * width),
            rows_per_image: Some(height),
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Mat4, Vec2, Vec3};
    use crate::math::Frustum;
    use crate::render::context::GpuContext;
    use crate::render::material::MaterialId;
    use crate::render::renderer::{BruteBlockRenderer, TerrainRenderer};
    use crate::core::camera::Camera;
    use crate::terrain::cell::{CellId, GridRect};
    use crate::terrain::heightfield::HeightfieldCell;

    #[test]
    fn test_vertex_layout_strides() {
        let layouts = vertex_layouts();
        assert_eq!(layouts[0].array_stride, std::mem::size_of::<Vec3>() as u64);
        assert_eq!(layouts[1].array_stride, std::mem::size_of::<Vec3>() as u64);
        assert_eq!(layouts[2].array_stride, std::mem::size_of::<Vec2>() as u64);
        assert_eq!(layouts[2].attributes[0].shader_location, 2);
        for (slot, layout) in layouts.iter().enumerate().skip(3) {
            assert_eq!(layout.array_stride, std::mem::size_of::<Vec3>() as u64);
            assert_eq!(layout.attributes[0].shader_location, slot as u32);
            assert_eq!(layout.attributes[0].format, wgpu::VertexFormat::Float32x3);
        }
    }

    #[test]
    fn test_upload_and_evict() {
        // Machines without an adapter skip the GPU part
        let Ok(gpu) = GpuContext::new_headless_blocking() else { return };

        let mut cell = HeightfieldCell::new(CellId(0), 17, Vec2::ZERO, Vec3::new(16.0, 1.0, 16.0));
        cell.properties_mut().set_block_resolution(4);
        cell.properties_mut().set_lod_split_coeff(4.0);
        cell.set_base_material(Some(MaterialId(1)));

        let mut renderer = BruteBlockRenderer::default();
        renderer.on_cell_load(&cell);
        renderer.on_material_palette_update(&[MaterialId(2)]);
        renderer.on_material_mask_update(&cell, 0, GridRect::new(0, 0, 1, 1), &[255], 1);

        let mut cache = TerrainGpuCache::new();
        let near = Camera::new(Vec3::new(8.0, 12.0, 8.0), 60.0, 1.0);
        let meshes = renderer.get_render_meshes(&Frustum::unbounded(), &near, Mat4::IDENTITY, &[&cell]).to_vec();
        let stats = cache.prepare(&gpu.device, &meshes);
        assert_eq!(stats.patches_uploaded, 4);
        // 25 vertices per patch: four 12-byte streams and one 8-byte stream
        let vertex_bytes = 4 * 25 * (4 * 12 + 8);
        assert!(stats.bytes_uploaded >= vertex_bytes);
        // One stitch variant per child
        assert_eq!(stats.indices_uploaded, 4);
        assert!(meshes.iter().all(|m| cache.patch(m.buffers.id()).is_some()));

        let context = renderer.cell_context(CellId(0)).unwrap();
        assert_eq!(cache.sync_textures(&gpu.device, &gpu.queue, context.alpha_textures()), 1);
        assert_eq!(cache.sync_textures(&gpu.device, &gpu.queue, context.alpha_textures()), 0);

        // Merging back to the root frees the four child patches
        drop(meshes);
        let far = Camera::new(Vec3::new(8.0, 40.0, 8.0), 60.0, 1.0);
        let meshes = renderer.get_render_meshes(&Frustum::unbounded(), &far, Mat4::IDENTITY, &[&cell]).to_vec();
        cache.prepare(&gpu.device, &meshes);
        assert_eq!(cache.evict(), 4);
        assert!(cache.patch(meshes[0].buffers.id()).is_some());

        renderer.on_cell_unload(CellId(0));
        drop(meshes);
        cache.sync_textures(&gpu.device, &gpu.queue, std::iter::empty());
        cache.evict();
        assert!(cache.patches.is_empty());
        assert!(cache.textures.is_empty());
        // Index buffers stay alive in the shared registry
        assert_eq!(cache.indices.len(), 5);
    }
}

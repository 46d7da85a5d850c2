//! CPU-side, GPU-ready geometry for terrain blocks
//!
//! Every buffer carries a process-unique [`BufferId`] so upload caches can key
//! GPU copies without hashing contents. Buffers are shared through `Arc`; a
//! block releasing its last handle is what frees the geometry.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::types::{Vec2, Vec3};

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identity of a CPU geometry buffer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u64);

impl BufferId {
    pub fn next() -> Self {
        Self(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Vertex streams of one `(R+1) x (R+1)` patch.
///
/// Vertex `col + row * (R + 1)`; row 0 lies on the patch's maximum z edge.
#[derive(Debug)]
pub struct PatchBuffers {
    id: BufferId,
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    /// Surface direction of increasing u (+x), orthogonal to the normal
    pub tangents: Vec<Vec3>,
    /// Surface direction of increasing v (-z), orthogonal to the normal
    pub bitangents: Vec<Vec3>,
    pub texcoords: Vec<Vec2>,
}

impl PatchBuffers {
    pub fn with_capacity(vertex_count: usize) -> Self {
        Self {
            id: BufferId::next(),
            positions: Vec::with_capacity(vertex_count),
            normals: Vec::with_capacity(vertex_count),
            tangents: Vec::with_capacity(vertex_count),
            bitangents: Vec::with_capacity(vertex_count),
            texcoords: Vec::with_capacity(vertex_count),
        }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn position_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.positions)
    }

    pub fn normal_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.normals)
    }

    pub fn tangent_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.tangents)
    }

    pub fn bitangent_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.bitangents)
    }

    pub fn texcoord_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.texcoords)
    }
}

/// Index element width chosen for a buffer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexFormat {
    U16,
    U32,
}

impl IndexFormat {
    pub fn to_wgpu(self) -> wgpu::IndexFormat {
        match self {
            IndexFormat::U16 => wgpu::IndexFormat::Uint16,
            IndexFormat::U32 => wgpu::IndexFormat::Uint32,
        }
    }
}

#[derive(Clone, Debug)]
enum IndexData {
    U16(Vec<u16>),
    U32(Vec<u32>),
}

/// Triangle-list index buffer, stored as `u16` whenever every index fits
#[derive(Debug)]
pub struct IndexBuffer {
    id: BufferId,
    data: IndexData,
    max_index: u32,
}

impl IndexBuffer {
    /// Pack `indices`, narrowing to 16 bits when the largest index allows it
    pub fn from_indices(indices: Vec<u32>) -> Self {
        let max_index = indices.iter().copied().max().unwrap_or(0);
        let data = if max_index <= u16::MAX as u32 {
            IndexData::U16(indices.into_iter().map(|i| i as u16).collect())
        } else {
            IndexData::U32(indices)
        };
        Self { id: BufferId::next(), data, max_index }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn format(&self) -> IndexFormat {
        match self.data {
            IndexData::U16(_) => IndexFormat::U16,
            IndexData::U32(_) => IndexFormat::U32,
        }
    }

    pub fn len(&self) -> usize {
        match &self.data {
            IndexData::U16(v) => v.len(),
            IndexData::U32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_index(&self) -> u32 {
        self.max_index
    }

    pub fn get(&self, i: usize) -> Option<u32> {
        match &self.data {
            IndexData::U16(v) => v.get(i).map(|&x| x as u32),
            IndexData::U32(v) => v.get(i).copied(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.len()).filter_map(move |i| self.get(i))
    }

    /// Raw bytes for upload
    pub fn as_bytes(&self) -> &[u8] {
        match &self.data {
            IndexData::U16(v) => bytemuck::cast_slice(v),
            IndexData::U32(v) => bytemuck::cast_slice(v),
        }
    }
}

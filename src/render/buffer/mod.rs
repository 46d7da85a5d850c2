//! Terrain geometry and GPU buffer management

pub mod patch;
pub mod camera_buffer;

pub use patch::{BufferId, IndexBuffer, IndexFormat, PatchBuffers};
pub use camera_buffer::{TerrainUniform, TerrainUniformBuffer};

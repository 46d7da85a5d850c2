//! Terrain rendering: per-cell render state, materials and GPU upload

pub mod buffer;
pub mod material;
pub mod properties;
pub mod mesh;
pub mod cell;
pub mod renderer;
pub mod context;
pub mod upload;

pub use buffer::{BufferId, IndexBuffer, IndexFormat, PatchBuffers, TerrainUniform, TerrainUniformBuffer};
pub use material::{AlphaTexture, MaterialId, ShaderValue, ShaderVariableContext, TextureId};
pub use properties::CellRenderProperties;
pub use mesh::{MeshLayer, RenderMesh};
pub use cell::CellRenderContext;
pub use renderer::{BruteBlockRenderer, FrameStats, RendererConfig, TerrainRenderer};
pub use context::GpuContext;
pub use upload::{TerrainGpuCache, UploadStats};

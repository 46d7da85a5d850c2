//! Materials, shader variable contexts and alpha textures for terrain splatting

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::types::{Vec3, Vec4};
use crate::terrain::cell::GridRect;

/// Shader variable holding a layer's alpha texture
pub const SPLAT_ALPHA_MAP: &str = "splat alpha map";
/// Shader variable mapping texcoords onto alpha texel centers
pub const ALPHA_MAP_SCALE: &str = "alpha map scale";
/// Shader variable with the distance at which splatting stops
pub const TEXTURE_LOD_DISTANCE: &str = "texture lod distance";

/// Opaque material handle owned by the host engine
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialId(pub u32);

static NEXT_TEXTURE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of an [`AlphaTexture`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(u64);

impl TextureId {
    fn next() -> Self {
        Self(NEXT_TEXTURE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Value bound to a named shader variable
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ShaderValue {
    Float(f32),
    Vector3(Vec3),
    Vector4(Vec4),
    Texture(TextureId),
}

/// Named shader variables, optionally layered over a parent context
#[derive(Clone, Debug, Default)]
pub struct ShaderVariableContext {
    variables: BTreeMap<String, ShaderValue>,
    parent: Option<Arc<ShaderVariableContext>>,
}

impl ShaderVariableContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context whose lookups fall back to `parent`
    pub fn with_parent(parent: Arc<ShaderVariableContext>) -> Self {
        Self { variables: BTreeMap::new(), parent: Some(parent) }
    }

    pub fn set(&mut self, name: &str, value: ShaderValue) {
        self.variables.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<ShaderValue> {
        self.variables
            .get(name)
            .copied()
            .or_else(|| self.parent.as_ref().and_then(|p| p.get(name)))
    }

    /// Copy of this context's own variables placed over a different parent
    pub fn reparented(&self, parent: Arc<ShaderVariableContext>) -> Self {
        Self { variables: self.variables.clone(), parent: Some(parent) }
    }
}

/// CPU copy of an RGBA8 alpha texture.
///
/// Every write bumps `revision` so uploaders can tell when to refresh.
#[derive(Clone, Debug)]
pub struct AlphaTexture {
    id: TextureId,
    width: usize,
    height: usize,
    pixels: Vec<[u8; 4]>,
    revision: u64,
}

impl AlphaTexture {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            id: TextureId::next(),
            width,
            height,
            pixels: vec![[0; 4]; width * height],
            revision: 0,
        }
    }

    pub fn id(&self) -> TextureId {
        self.id
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn pixel(&self, x: usize, y: usize) -> [u8; 4] {
        self.pixels[y * self.width + x]
    }

    pub fn bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.pixels)
    }

    /// Texcoord scale (xy) and offset (zw) that land on texel centers
    pub fn texel_scale(&self) -> Vec4 {
        let w = self.width.max(1) as f32;
        let h = self.height.max(1) as f32;
        Vec4::new((w - 1.0) / w, (h - 1.0) / h, 0.5 / w, 0.5 / h)
    }

    /// Write `f(source)` broadcast to all four channels over `rect`.
    ///
    /// `source` row `r` starts at `source[r * pitch]` and covers the
    /// rectangle's columns. Writes outside the texture are clipped.
    pub fn blit(&mut self, rect: GridRect, source: &[u8], pitch: usize, f: impl Fn(u8) -> u8) {
        let clipped = rect.clamped(self.width, self.height);
        for y in clipped.y_min..clipped.y_max {
            let src_row = (y - rect.y_min) * pitch;
            for x in clipped.x_min..clipped.x_max {
                let Some(&value) = source.get(src_row + x - rect.x_min) else { continue };
                self.pixels[y * self.width + x] = [f(value); 4];
            }
        }
        self.revision += 1;
    }

    /// Replace the whole texture from an RGBA image of the same size
    pub fn copy_from_image(&mut self, image: &image::RgbaImage) {
        for (dst, src) in self.pixels.iter_mut().zip(image.pixels()) {
            *dst = src.0;
        }
        self.revision += 1;
    }

    /// Any texel with nonzero alpha
    pub fn any_nonzero(&self) -> bool {
        self.pixels.iter().any(|p| p[3] > 0)
    }
}

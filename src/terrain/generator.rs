//! Fractal noise heights for demo and test terrain

use noise::{Fbm, MultiFractal, NoiseFn, Perlin};
use serde::{Deserialize, Serialize};

/// Shape of the generated terrain
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainParams {
    pub seed: u32,
    /// World units per noise period; larger is smoother
    pub scale: f32,
    /// Heights fall in `0..=height_scale`
    pub height_scale: f32,
    pub octaves: u32,
    pub persistence: f32,
    pub lacunarity: f32,
}

impl Default for TerrainParams {
    fn default() -> Self {
        Self {
            seed: 12345,
            scale: 100.0,
            height_scale: 64.0,
            octaves: 4,
            persistence: 0.5,
            lacunarity: 2.0,
        }
    }
}

/// Height function `(x, z) -> y` built from Perlin FBM
pub struct TerrainGenerator {
    params: TerrainParams,
    fbm: Fbm<Perlin>,
}

impl TerrainGenerator {
    pub fn new(params: TerrainParams) -> Self {
        let fbm = Fbm::<Perlin>::new(params.seed)
            .set_octaves(params.octaves as usize)
            .set_persistence(params.persistence as f64)
            .set_lacunarity(params.lacunarity as f64);
        Self { params, fbm }
    }

    pub fn params(&self) -> &TerrainParams {
        &self.params
    }

    pub fn height_at(&self, x: f32, z: f32) -> f32 {
        let scale = self.params.scale as f64;
        let n = self.fbm.get([x as f64 / scale, z as f64 / scale]);
        let unit = (n * 0.5 + 0.5).clamp(0.0, 1.0);
        unit as f32 * self.params.height_scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heights_in_range() {
        let generator = TerrainGenerator::new(TerrainParams { height_scale: 20.0, ..Default::default() });
        for i in 0..64 {
            let h = generator.height_at(i as f32 * 13.7, i as f32 * -7.1);
            assert!((0.0..=20.0).contains(&h), "height {h} out of range");
        }
    }

    #[test]
    fn test_deterministic_for_seed() {
        let a = TerrainGenerator::new(TerrainParams::default());
        let b = TerrainGenerator::new(TerrainParams::default());
        assert_eq!(a.height_at(12.5, 40.0), b.height_at(12.5, 40.0));

        let other = TerrainGenerator::new(TerrainParams { seed: 7, ..Default::default() });
        let differs = (0..32).any(|i| other.height_at(i as f32 * 9.0, 3.0) != a.height_at(i as f32 * 9.0, 3.0));
        assert!(differs);
    }

    #[test]
    fn test_params_json_fills_defaults() {
        let params: TerrainParams = serde_json::from_str(r#"{ "seed": 3 }"#).unwrap();
        assert_eq!(params.seed, 3);
        assert_eq!(params.height_scale, 64.0);
    }
}

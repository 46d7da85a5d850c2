//! Per-cell render parameters
//!
//! Parameters can be set programmatically, through string names (as a
//! level file or console would), or loaded from JSON.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::Result;
use crate::lod::stitch::normalize_resolution;
use crate::lod::tree::LodSettings;

/// Parameter names accepted by [`CellRenderProperties::set_parameter`]
pub const PARAMETER_NAMES: [&str; 6] = [
    "visible",
    "block resolution",
    "min steps",
    "lod splitcoeff",
    "splat distance",
    "splat render priority",
];

/// Render parameters attached to one terrain cell
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CellRenderProperties {
    visible: bool,
    block_resolution: u32,
    min_steps: u32,
    lod_split_coeff: f32,
    splat_distance: f32,
    splat_render_priority: Option<String>,
}

impl Default for CellRenderProperties {
    fn default() -> Self {
        Self {
            visible: true,
            block_resolution: 32,
            min_steps: 1,
            lod_split_coeff: 128.0,
            splat_distance: 100.0,
            splat_render_priority: None,
        }
    }
}

impl CellRenderProperties {
    pub fn visible(&self) -> bool {
        self.visible
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    /// Samples per block edge, always a power of two of at least 2
    pub fn block_resolution(&self) -> u32 {
        normalize_resolution(self.block_resolution)
    }

    /// Rounded down to a power of two, minimum 2
    pub fn set_block_resolution(&mut self, resolution: u32) {
        self.block_resolution = normalize_resolution(resolution);
    }

    pub fn min_steps(&self) -> u32 {
        self.min_steps.max(1)
    }

    pub fn set_min_steps(&mut self, min_steps: u32) {
        self.min_steps = min_steps.max(1);
    }

    pub fn lod_split_coeff(&self) -> f32 {
        self.lod_split_coeff
    }

    pub fn set_lod_split_coeff(&mut self, coeff: f32) {
        self.lod_split_coeff = coeff;
    }

    pub fn splat_distance(&self) -> f32 {
        self.splat_distance
    }

    pub fn set_splat_distance(&mut self, distance: f32) {
        self.splat_distance = distance;
    }

    pub fn splat_render_priority(&self) -> Option<&str> {
        self.splat_render_priority.as_deref()
    }

    pub fn set_splat_render_priority(&mut self, priority: Option<String>) {
        self.splat_render_priority = priority;
    }

    /// Detail selection settings derived from these properties
    pub fn lod_settings(&self) -> LodSettings {
        LodSettings {
            split_coeff: self.lod_split_coeff,
            min_steps: self.min_steps() as usize,
        }
    }

    /// Set a parameter by its string name
    pub fn set_parameter(&mut self, name: &str, value: &str) -> Result<()> {
        let invalid = || Error::InvalidParameter { name: name.to_string(), value: value.to_string() };
        let value = value.trim();
        match name {
            "visible" => self.visible = parse_bool(value).ok_or_else(invalid)?,
            "block resolution" => self.set_block_resolution(value.parse().map_err(|_| invalid())?),
            "min steps" => self.set_min_steps(value.parse().map_err(|_| invalid())?),
            "lod splitcoeff" => self.lod_split_coeff = parse_positive(value).ok_or_else(invalid)?,
            "splat distance" => self.splat_distance = parse_positive(value).ok_or_else(invalid)?,
            "splat render priority" => {
                self.splat_render_priority = (!value.is_empty()).then(|| value.to_string());
            }
            _ => return Err(Error::UnknownParameter(name.to_string())),
        }
        Ok(())
    }

    /// Read a parameter by its string name
    pub fn parameter(&self, name: &str) -> Option<String> {
        match name {
            "visible" => Some(self.visible.to_string()),
            "block resolution" => Some(self.block_resolution().to_string()),
            "min steps" => Some(self.min_steps().to_string()),
            "lod splitcoeff" => Some(self.lod_split_coeff.to_string()),
            "splat distance" => Some(self.splat_distance.to_string()),
            "splat render priority" => Some(self.splat_render_priority.clone().unwrap_or_default()),
            _ => None,
        }
    }

    /// Load from a JSON file
    pub fn load_json(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let mut properties: Self = serde_json::from_str(&json)?;
        properties.block_resolution = properties.block_resolution();
        properties.min_steps = properties.min_steps();
        Ok(properties)
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

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

fn parse_positive(value: &str) -> Option<f32> {
    value.parse::<f32>().ok().filter(|v| v.is_finite() && *v >= 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let props = CellRenderProperties::default();
        assert!(props.visible());
        assert_eq!(props.block_resolution(), 32);
        assert_eq!(props.min_steps(), 1);
        assert_eq!(props.lod_split_coeff(), 128.0);
        assert_eq!(props.splat_distance(), 100.0);
        assert_eq!(props.splat_render_priority(), None);
    }

    #[test]
    fn test_block_resolution_rounds_down() {
        let mut props = CellRenderProperties::default();
        props.set_block_resolution(48);
        assert_eq!(props.block_resolution(), 32);
        props.set_block_resolution(1);
        assert_eq!(props.block_resolution(), 2);
        props.set_parameter("block resolution", "100").unwrap();
        assert_eq!(props.parameter("block resolution").as_deref(), Some("64"));
    }

    #[test]
    fn test_min_steps_at_least_one() {
        let mut props = CellRenderProperties::default();
        props.set_parameter("min steps", "0").unwrap();
        assert_eq!(props.min_steps(), 1);
        props.set_parameter("min steps", "4").unwrap();
        assert_eq!(props.lod_settings().min_steps, 4);
    }

    #[test]
    fn test_parameter_round_trip() {
        let mut props = CellRenderProperties::default();
        props.set_parameter("visible", "false").unwrap();
        props.set_parameter("lod splitcoeff", "64").unwrap();
        props.set_parameter("splat distance", "250.5").unwrap();
        props.set_parameter("splat render priority", "alpha").unwrap();

        let mut copy = CellRenderProperties::default();
        for name in PARAMETER_NAMES {
            copy.set_parameter(name, &props.parameter(name).unwrap()).unwrap();
        }
        assert_eq!(copy, props);
        assert_eq!(copy.splat_render_priority(), Some("alpha"));
    }

    #[test]
    fn test_parameter_errors() {
        let mut props = CellRenderProperties::default();
        assert!(matches!(props.set_parameter("no such thing", "1"), Err(Error::UnknownParameter(_))));
        assert!(matches!(props.set_parameter("visible", "maybe"), Err(Error::InvalidParameter { .. })));
        assert!(matches!(props.set_parameter("splat distance", "-3"), Err(Error::InvalidParameter { .. })));
        assert!(props.parameter("no such thing").is_none());
        assert_eq!(props, CellRenderProperties::default());
    }

    #[test]
    fn test_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg").join("cell.json");

        let mut props = CellRenderProperties::default();
        props.set_block_resolution(16);
        props.set_splat_distance(42.0);
        props.set_splat_render_priority(Some("splat".to_string()));
        props.save_json(&path).unwrap();

        let loaded = CellRenderProperties::load_json(&path).unwrap();
        assert_eq!(loaded, props);
    }

    #[test]
    fn test_json_normalizes_and_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.json");
        std::fs::write(&path, r#"{ "block_resolution": 20, "min_steps": 0 }"#).unwrap();

        let loaded = CellRenderProperties::load_json(&path).unwrap();
        assert_eq!(loaded.block_resolution(), 16);
        assert_eq!(loaded.min_steps(), 1);
        assert_eq!(loaded.splat_distance(), 100.0);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = CellRenderProperties::load_json(&dir.path().join("missing.json"));
        assert!(matches!(result, Err(Error::Io(_))));
    }
}

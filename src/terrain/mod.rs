//! Terrain cells and procedural height data

pub mod cell;
pub use cell::{CellId, GridRect, HeightData, HeightSource, TerrainCell};

pub mod heightfield;
pub use heightfield::HeightfieldCell;

pub mod generator;
pub use generator::{TerrainGenerator, TerrainParams};

//! Terrablock - adaptive quadtree level-of-detail rendering for heightfield terrain

pub mod core;
pub mod math;
pub mod terrain;
pub mod lod;
pub mod render;

//! Axis-aligned bounding box

use crate::core::types::{Vec2, Vec3};

/// Axis-aligned bounding box defined by min and max corners
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Inverted box that contains nothing; expanding it by a point yields that point.
    pub const EMPTY: Aabb = Aabb {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Box over a ground-plane footprint (`center`, `size` in x/z) spanning
    /// heights `min_height..=max_height`
    pub fn from_footprint(center: Vec2, size: Vec2, min_height: f32, max_height: f32) -> Self {
        let half = size * 0.5;
        Self {
            min: Vec3::new(center.x - half.x, min_height, center.y - half.y),
            max: Vec3::new(center.x + half.x, max_height, center.y + half.y),
        }
    }

    /// True if no point has been added yet
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Squared distance from a point to the closest point of the box (0 inside)
    pub fn distance_squared_to_point(&self, p: Vec3) -> f32 {
        let closest = p.clamp(self.min, self.max);
        (p - closest).length_squared()
    }

    /// Grow to include `point`
    pub fn expand(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    /// Smallest box containing both
    pub fn merged(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::EMPTY
    }
}

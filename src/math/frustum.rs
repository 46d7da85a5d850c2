//! Clip-space frustum planes for culling terrain blocks

use crate::core::types::{Mat4, Vec3, Vec4};
use super::aabb::Aabb;

/// Plane `normal . p + distance = 0`; the positive side is inside
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub distance: f32,
}

impl Plane {
    pub fn new(normal: Vec3, distance: f32) -> Self {
        Self { normal, distance }
    }

    /// Plane from `(a, b, c, d)` coefficients, scaled to a unit normal
    pub fn from_coefficients(coefficients: Vec4) -> Self {
        let normal = coefficients.truncate();
        let len = normal.length();
        Self {
            normal: normal / len,
            distance: coefficients.w / len,
        }
    }

    pub fn distance_to_point(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.distance
    }

    /// Re-express this plane in the source space of `to_plane_space`.
    ///
    /// If `to_plane_space` maps object coordinates into the space this plane
    /// lives in, the returned plane classifies object-space points identically.
    pub fn transformed(&self, to_plane_space: &Mat4) -> Plane {
        let coefficients = self.normal.extend(self.distance);
        Plane::from_coefficients(to_plane_space.transpose() * coefficients)
    }
}

/// Six planes in the order near, far, left, right, top, bottom
#[derive(Clone, Copy, Debug)]
pub struct Frustum {
    pub planes: [Plane; 6],
}

impl Frustum {
    /// Planes of a right-handed, zero-to-one depth view-projection matrix
    pub fn from_view_projection(vp: &Mat4) -> Self {
        let [x, y, z, w] = [vp.row(0), vp.row(1), vp.row(2), vp.row(3)];
        Self {
            planes: [z, w - z, w + x, w - x, w - y, w + y].map(Plane::from_coefficients),
        }
    }

    /// Frustum that accepts everything
    pub fn unbounded() -> Self {
        Self { planes: [Plane::new(Vec3::Y, f32::MAX); 6] }
    }

    /// Move all planes into the space mapped from by `to_plane_space`
    /// (typically the object-to-world transform of a terrain).
    pub fn transformed(&self, to_plane_space: &Mat4) -> Self {
        Self {
            planes: self.planes.map(|plane| plane.transformed(to_plane_space)),
        }
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        self.planes.iter().all(|plane| plane.distance_to_point(point) >= 0.0)
    }

    /// Conservative box test: `false` only if the box is fully outside one plane
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        self.planes.iter().all(|plane| {
            // Corner furthest along the normal
            let corner = Vec3::select(plane.normal.cmpge(Vec3::ZERO), aabb.max, aabb.min);
            plane.distance_to_point(corner) >= 0.0
        })
    }
}

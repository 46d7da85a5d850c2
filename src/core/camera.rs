//! Viewer camera supplying the LOD origin and the culling frustum

use crate::core::types::{Mat3, Mat4, Quat, Vec3};
use crate::math::Frustum;

/// Perspective camera in world space
#[derive(Clone, Debug)]
pub struct Camera {
    pub position: Vec3,
    pub rotation: Quat,
    /// Vertical field of view in radians
    pub fov_y: f32,
    /// Width / height
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Camera {
    /// Camera at `position` looking down -Z
    pub fn new(position: Vec3, fov_y_degrees: f32, aspect: f32) -> Self {
        Self {
            position,
            rotation: Quat::IDENTITY,
            fov_y: fov_y_degrees.to_radians(),
            aspect,
            near: 0.1,
            far: 10_000.0,
        }
    }

    /// Camera at `position` facing `target`. `up` must not be parallel to the
    /// view direction.
    pub fn look_at(position: Vec3, target: Vec3, up: Vec3) -> Self {
        let back = (position - target).normalize();
        let right = up.cross(back).normalize();
        let rotation = Quat::from_mat3(&Mat3::from_cols(right, back.cross(right), back));
        Self {
            rotation,
            ..Self::new(position, 60.0, 16.0 / 9.0)
        }
    }

    /// World to camera space
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.rotation, self.position).inverse()
    }

    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far)
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// World-space clip planes of this camera
    pub fn frustum(&self) -> Frustum {
        Frustum::from_view_projection(&self.view_projection())
    }

    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::NEG_Z
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(Vec3::new(0.0, 0.0, 5.0), 60.0, 16.0 / 9.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_looks_down_negative_z() {
        let camera = Camera::default();
        assert!((camera.forward() - Vec3::NEG_Z).length() < 1e-5);
        let origin = camera.view_matrix().transform_point3(Vec3::ZERO);
        assert!((origin - Vec3::new(0.0, 0.0, -5.0)).length() < 1e-4);
    }

    #[test]
    fn test_look_at_forward() {
        let camera = Camera::look_at(Vec3::new(0.0, 10.0, 0.0), Vec3::new(10.0, 10.0, 0.0), Vec3::Y);
        assert!((camera.forward() - Vec3::X).length() < 1e-5);

        let down = Camera::look_at(Vec3::new(8.0, 30.0, 40.0), Vec3::new(8.0, 0.0, 8.0), Vec3::Y);
        let expected = (Vec3::new(8.0, 0.0, 8.0) - Vec3::new(8.0, 30.0, 40.0)).normalize();
        assert!((down.forward() - expected).length() < 1e-5);
    }

    #[test]
    fn test_frustum_sees_target_not_behind() {
        let camera = Camera::look_at(Vec3::new(0.0, 50.0, 50.0), Vec3::ZERO, Vec3::Y);
        let frustum = camera.frustum();
        assert!(frustum.contains_point(Vec3::ZERO));
        assert!(!frustum.contains_point(Vec3::new(0.0, 50.0, 200.0)));
        assert!(!frustum.contains_point(Vec3::new(0.0, 60.0, 60.0)));
    }
}

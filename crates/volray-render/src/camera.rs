//! Camera and primary ray generation.

use glam::Vec3;
use serde::{Deserialize, Serialize};
use volray_core::{Aabb, Ray};

/// Pinhole camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub position: Vec3,
    pub direction: Vec3,
    pub up: Vec3,
    /// Vertical field of view in radians.
    pub fov: f32,
    pub aspect: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 5.0),
            direction: Vec3::NEG_Z,
            up: Vec3::Y,
            fov: std::f32::consts::FRAC_PI_4,
            aspect: 1.0,
        }
    }
}

impl Camera {
    /// Create a camera looking from `position` at `target`.
    pub fn new(position: Vec3, target: Vec3, up: Vec3, fov: f32, aspect: f32) -> Self {
        let direction = (target - position).normalize();
        Self {
            position,
            direction,
            up,
            fov,
            aspect,
        }
    }

    /// Camera on an orbit around a box, looking at its centre.
    ///
    /// `yaw` and `pitch` are in radians; `distance_factor` scales the box
    /// diagonal.
    pub fn orbit(bounds: &Aabb, yaw: f32, pitch: f32, distance_factor: f32, aspect: f32) -> Self {
        let center = bounds.center();
        let distance = bounds.size().length() * distance_factor;
        let offset = Vec3::new(
            pitch.cos() * yaw.sin(),
            pitch.sin(),
            pitch.cos() * yaw.cos(),
        ) * distance;
        Self::new(
            center + offset,
            center,
            Vec3::Y,
            std::f32::consts::FRAC_PI_4,
            aspect,
        )
    }

    /// Set the camera position.
    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
    }

    /// Look at a target position.
    pub fn look_at(&mut self, target: Vec3) {
        self.direction = (target - self.position).normalize();
    }

    /// Set the aspect ratio.
    pub fn set_aspect(&mut self, aspect: f32) {
        self.aspect = aspect;
    }

    /// Primary ray through the centre of pixel `(x, y)`.
    ///
    /// Pixel rows run top to bottom.
    pub fn ray_for_pixel(&self, x: u32, y: u32, width: u32, height: u32) -> Ray {
        let forward = self.direction.normalize();
        let right = forward.cross(self.up).normalize();
        let up = right.cross(forward);

        let ndc_x = (x as f32 + 0.5) / width as f32 * 2.0 - 1.0;
        let ndc_y = 1.0 - (y as f32 + 0.5) / height as f32 * 2.0;
        let tan_half = (self.fov * 0.5).tan();

        let dir = forward + right * (ndc_x * tan_half * self.aspect) + up * (ndc_y * tan_half);
        Ray::new(self.position, dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn centre_pixel_looks_forward() {
        let camera = Camera::default();
        let ray = camera.ray_for_pixel(50, 50, 101, 101);
        assert_relative_eq!(ray.direction.z, -1.0, epsilon = 1e-5);
    }

    #[test]
    fn top_row_points_up() {
        let camera = Camera::default();
        let ray = camera.ray_for_pixel(0, 0, 64, 64);
        assert!(ray.direction.y > 0.0);
        assert!(ray.direction.x < 0.0);
    }

    #[test]
    fn orbit_faces_centre() {
        let bounds = Aabb::new(Vec3::ZERO, Vec3::splat(8.0));
        let camera = Camera::orbit(&bounds, 0.3, 0.2, 1.5, 1.0);
        let to_center = (bounds.center() - camera.position).normalize();
        assert_relative_eq!(camera.direction.dot(to_center), 1.0, epsilon = 1e-5);
    }
}

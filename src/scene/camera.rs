//! Pinhole camera with a remembered previous-frame matrix.

use glam::{Mat4, UVec2, Vec2, Vec3};

/// Perspective camera.
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    /// Vertical field of view in degrees.
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
    previous_view_projection: Option<Mat4>,
}

impl Default for Camera {
    fn default() -> Self {
        Self::look_at(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, 45.0)
    }
}

impl Camera {
    pub fn look_at(position: Vec3, target: Vec3, fov_y: f32) -> Self {
        Self {
            position,
            target,
            up: Vec3::Y,
            fov_y,
            near: 0.01,
            far: 1000.0,
            previous_view_projection: None,
        }
    }

    #[inline]
    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    #[inline]
    pub fn projection(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov_y.to_radians(), aspect, self.near, self.far)
    }

    #[inline]
    pub fn view_projection(&self, aspect: f32) -> Mat4 {
        self.projection(aspect) * self.view()
    }

    /// Matrix of the last traced frame, or the current one before the first frame.
    pub fn previous_view_projection(&self, aspect: f32) -> Mat4 {
        self.previous_view_projection
            .unwrap_or_else(|| self.view_projection(aspect))
    }

    /// Remember the current matrix for the next frame's motion vectors.
    pub fn update_previous_frame_matrix(&mut self, aspect: f32) {
        self.previous_view_projection = Some(self.view_projection(aspect));
    }

    /// World-space ray through the continuous pixel coordinate `pixel` (origin top-left).
    pub fn primary_ray(&self, pixel: Vec2, resolution: UVec2) -> (Vec3, Vec3) {
        let size = resolution.as_vec2();
        let inv = self.view_projection(size.x / size.y).inverse();
        self.primary_ray_with(&inv, pixel, size)
    }

    /// [`primary_ray`](Self::primary_ray) with a precomputed inverse view-projection.
    #[inline]
    pub fn primary_ray_with(&self, inverse_view_projection: &Mat4, pixel: Vec2, size: Vec2) -> (Vec3, Vec3) {
        let ndc = Vec2::new(pixel.x / size.x * 2.0 - 1.0, 1.0 - pixel.y / size.y * 2.0);
        let far = inverse_view_projection.project_point3(ndc.extend(1.0));
        (self.position, (far - self.position).normalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_center_ray_points_at_target() {
        let cam = Camera::look_at(Vec3::new(0.0, 1.0, 4.0), Vec3::new(0.0, 1.0, 0.0), 40.0);
        let res = UVec2::new(64, 32);
        let (origin, dir) = cam.primary_ray(Vec2::new(32.0, 16.0), res);
        assert_eq!(origin, cam.position);
        assert!((dir - Vec3::new(0.0, 0.0, -1.0)).length() < 1e-4);

        // Top-left pixel looks up and left.
        let (_, corner) = cam.primary_ray(Vec2::ZERO, res);
        assert!(corner.x < 0.0 && corner.y > 0.0);
    }

    #[test]
    fn test_reprojection_of_primary_hit() {
        let cam = Camera::look_at(Vec3::new(0.0, 0.0, 3.0), Vec3::ZERO, 60.0);
        let res = UVec2::new(16, 16);
        let (o, d) = cam.primary_ray(Vec2::new(4.5, 10.5), res);
        let hit = o + d * 2.5;
        let clip = cam.view_projection(1.0) * hit.extend(1.0);
        let ndc = clip.truncate() / clip.w;
        let px = (ndc.x * 0.5 + 0.5) * 16.0;
        let py = (0.5 - ndc.y * 0.5) * 16.0;
        assert!((px - 4.5).abs() < 1e-3);
        assert!((py - 10.5).abs() < 1e-3);
    }

    #[test]
    fn test_previous_matrix() {
        let mut cam = Camera::default();
        assert_eq!(cam.previous_view_projection(1.0), cam.view_projection(1.0));
        let before = cam.view_projection(1.0);
        cam.update_previous_frame_matrix(1.0);
        cam.position.x += 1.0;
        assert_eq!(cam.previous_view_projection(1.0), before);
        assert_ne!(cam.view_projection(1.0), before);
    }
}

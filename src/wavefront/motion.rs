//! Screen-space motion vectors for temporal reuse.

use glam::{Mat4, UVec2, Vec2, Vec3};
use rayon::prelude::*;

use super::data::SurfaceData;

/// Per-pixel offset (in pixels) from the current to the previous frame position.
///
/// Computed once per frame from the primary surfaces; pixels without a primary
/// hit, or whose point was behind the previous camera, carry no vector.
#[derive(Debug, Clone)]
pub struct MotionVectors {
    resolution: UVec2,
    vectors: Vec<Vec2>,
}

impl MotionVectors {
    pub fn new(resolution: UVec2) -> Self {
        Self {
            resolution,
            vectors: vec![Vec2::NAN; resolution.x as usize * resolution.y as usize],
        }
    }

    pub fn resize(&mut self, resolution: UVec2) {
        if resolution != self.resolution {
            *self = Self::new(resolution);
        }
    }

    #[inline]
    pub fn resolution(&self) -> UVec2 {
        self.resolution
    }

    /// Reproject every primary hit with the previous view-projection.
    pub fn compute(&mut self, surfaces: &[SurfaceData], previous_view_projection: &Mat4) {
        let res = self.resolution;
        let size = res.as_vec2();
        self.vectors
            .par_iter_mut()
            .zip(surfaces.par_iter())
            .enumerate()
            .for_each(|(pixel, (mv, surface))| {
                *mv = Vec2::NAN;
                if !surface.is_hit() {
                    return;
                }
                let clip = *previous_view_projection * surface.position().extend(1.0);
                if clip.w <= 1e-6 {
                    return;
                }
                let ndc = clip.truncate() / clip.w;
                let previous = Vec2::new((ndc.x * 0.5 + 0.5) * size.x, (0.5 - ndc.y * 0.5) * size.y);
                let current = Vec2::new(
                    (pixel as u32 % res.x) as f32 + 0.5,
                    (pixel as u32 / res.x) as f32 + 0.5,
                );
                *mv = previous - current;
            });
    }

    /// Motion of `pixel`, `None` if it has no history.
    #[inline]
    pub fn vector(&self, pixel: usize) -> Option<Vec2> {
        self.vectors.get(pixel).copied().filter(|v| v.is_finite())
    }

    /// Pixel index the surface at `pixel` occupied last frame.
    pub fn previous_pixel(&self, pixel: usize) -> Option<usize> {
        let v = self.vector(pixel)?;
        let x = (pixel as u32 % self.resolution.x) as f32 + 0.5 + v.x;
        let y = (pixel as u32 / self.resolution.x) as f32 + 0.5 + v.y;
        if x < 0.0 || y < 0.0 {
            return None;
        }
        let (px, py) = (x as u32, y as u32);
        if px >= self.resolution.x || py >= self.resolution.y {
            return None;
        }
        Some((py * self.resolution.x + px) as usize)
    }

    /// Normalized direction encoded as a color.
    pub fn direction_image(&self) -> Vec<Vec3> {
        self.vectors
            .par_iter()
            .map(|v| {
                if v.is_finite() {
                    let d = v.normalize_or_zero();
                    Vec3::new(d.x * 0.5 + 0.5, d.y * 0.5 + 0.5, 0.0)
                } else {
                    Vec3::ZERO
                }
            })
            .collect()
    }

    /// Length of each vector, in pixels.
    pub fn magnitude_image(&self) -> Vec<Vec3> {
        self.vectors
            .par_iter()
            .map(|v| if v.is_finite() { Vec3::splat(v.length()) } else { Vec3::ZERO })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wavefront::data::SurfaceState;

    fn hit_at(p: Vec3) -> SurfaceData {
        SurfaceData {
            position: p.to_array(),
            state: SurfaceState::Hit as u32,
            ..SurfaceData::EMPTY
        }
    }

    #[test]
    fn test_identity_projection() {
        // Orthographic identity: ndc == world xy.
        let res = UVec2::new(4, 4);
        let mut mv = MotionVectors::new(res);
        // Pixel (1, 1) center maps to ndc (-0.25, 0.25).
        let mut surfaces = vec![SurfaceData::EMPTY; 16];
        surfaces[5] = hit_at(Vec3::new(-0.25, 0.25, 0.5));
        // Same point, moved one pixel to the right in the previous frame.
        surfaces[6] = hit_at(Vec3::new(-0.25, 0.25, 0.5));
        mv.compute(&surfaces, &Mat4::IDENTITY);

        let v = mv.vector(5).unwrap();
        assert!(v.length() < 1e-5);
        assert_eq!(mv.previous_pixel(5), Some(5));
        assert_eq!(mv.previous_pixel(6), Some(5));
        assert!(mv.vector(0).is_none());
        assert!(mv.previous_pixel(0).is_none());
    }

    #[test]
    fn test_out_of_screen_has_no_previous_pixel() {
        let res = UVec2::new(2, 2);
        let mut mv = MotionVectors::new(res);
        let mut surfaces = vec![SurfaceData::EMPTY; 4];
        surfaces[0] = hit_at(Vec3::new(5.0, 0.0, 0.5));
        mv.compute(&surfaces, &Mat4::IDENTITY);
        assert!(mv.vector(0).is_some());
        assert!(mv.previous_pixel(0).is_none());
        assert_eq!(mv.magnitude_image().len(), 4);
    }
}

//! Storage for every inter-stage handoff of the wavefront pipeline.

use glam::{UVec2, Vec3};

use super::AtomicBuffer;
use crate::wavefront::data::{
    Intersection, LightChannel, Ray, ShadowRay, SurfaceData, VolumetricData, VolumetricIntersection,
};

/// Volume segments a single ray may report per trace.
pub const MAX_VOLUMES_PER_RAY: usize = 4;

/// Index of the scratch surface generation used by every depth > 0.
pub const SCRATCH_SURFACE: usize = 2;

/// Buffer capacities derived from the frame configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLayout {
    pub resolution: UVec2,
    pub output_resolution: UVec2,
    pub max_depth: u32,
    pub reservoirs_per_pixel: u32,
}

impl BufferLayout {
    #[inline]
    pub fn num_pixels(&self) -> usize {
        self.resolution.x as usize * self.resolution.y as usize
    }

    #[inline]
    pub fn num_output_pixels(&self) -> usize {
        self.output_resolution.x as usize * self.output_resolution.y as usize
    }

    /// Every depth may emit one shadow ray per reservoir of every pixel.
    #[inline]
    pub fn shadow_ray_capacity(&self) -> usize {
        self.num_pixels() * self.max_depth as usize * self.reservoirs_per_pixel as usize
    }
}

/// Rays, intersections, surfaces and radiance for one frame in flight.
///
/// Everything here is sized from a [`BufferLayout`] and only reallocated by
/// [`RayBuffers::resize`], which the scheduler calls at frame boundaries.
pub struct RayBuffers {
    layout: BufferLayout,
    /// Ping-pong ray batches: one is traced while the next depth is appended to the other.
    pub rays: [AtomicBuffer<Ray>; 2],
    pub intersections: AtomicBuffer<Intersection>,
    pub volumetric: AtomicBuffer<VolumetricIntersection>,
    pub shadow_rays: AtomicBuffer<ShadowRay>,
    /// Indices of shadow rays that reached their light.
    pub visible: AtomicBuffer<u32>,
    /// Current, previous and scratch surface generations.
    pub surfaces: [Vec<SurfaceData>; 3],
    pub volumetric_data: Vec<VolumetricData>,
    pub channels: [Vec<Vec3>; LightChannel::COUNT],
    /// Merged (and possibly accumulated) radiance at render resolution.
    pub combined: Vec<Vec3>,
    /// Denoiser input/output at render resolution.
    pub display: Vec<Vec3>,
    /// Upscaled radiance at output resolution.
    pub upscaled: Vec<Vec3>,
    /// Tone-mapped RGBA8 at output resolution.
    pub output: Vec<u8>,
}

impl RayBuffers {
    pub fn new(layout: BufferLayout) -> Self {
        let n = layout.num_pixels();
        let out = layout.num_output_pixels();
        Self {
            layout,
            rays: [AtomicBuffer::new("rays_a", n), AtomicBuffer::new("rays_b", n)],
            intersections: AtomicBuffer::new("intersections", n),
            volumetric: AtomicBuffer::new("volumetric_intersections", n * MAX_VOLUMES_PER_RAY),
            shadow_rays: AtomicBuffer::new("shadow_rays", layout.shadow_ray_capacity()),
            visible: AtomicBuffer::new("shadow_visibility", layout.shadow_ray_capacity()),
            surfaces: [
                vec![SurfaceData::EMPTY; n],
                vec![SurfaceData::EMPTY; n],
                vec![SurfaceData::EMPTY; n],
            ],
            volumetric_data: vec![VolumetricData::CLEAR; n],
            channels: [vec![Vec3::ZERO; n], vec![Vec3::ZERO; n], vec![Vec3::ZERO; n]],
            combined: vec![Vec3::ZERO; n],
            display: vec![Vec3::ZERO; n],
            upscaled: vec![Vec3::ZERO; out],
            output: vec![0; out * 4],
        }
    }

    #[inline]
    pub fn layout(&self) -> &BufferLayout {
        &self.layout
    }

    /// Reallocate for a new layout. Surface history and the accumulated
    /// radiance are lost. Returns whether anything was reallocated.
    pub fn resize(&mut self, layout: BufferLayout) -> bool {
        if layout == self.layout {
            return false;
        }
        tracing::info!(
            "Resizing ray buffers: {}x{} -> {}x{}, depth {}",
            self.layout.resolution.x,
            self.layout.resolution.y,
            layout.resolution.x,
            layout.resolution.y,
            layout.max_depth
        );
        *self = Self::new(layout);
        true
    }

    pub fn clear_channels(&mut self) {
        for channel in &mut self.channels {
            channel.fill(Vec3::ZERO);
        }
    }

    pub fn clear_surfaces(&mut self, index: usize) {
        self.surfaces[index].fill(SurfaceData::EMPTY);
    }
}

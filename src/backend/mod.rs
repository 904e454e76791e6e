//! Capability interfaces the pipeline consumes, plus their reference implementations.
//!
//! - [`RayTracingBackend`] - acceleration structures, scene table and ray launches
//! - [`DenoiseBackend`] / [`UpscaleBackend`] - opaque post-process stages
//! - [`cpu::CpuBackend`] - BVH-based reference tracer running on rayon

pub mod cpu;

use glam::{Mat4, UVec2, Vec3};

use crate::buffers::AtomicBuffer;
use crate::util::{BBox3f, Result};
use crate::wavefront::data::{Intersection, Ray, ShadowRay, VolumetricIntersection};

/// Opaque handle to a built acceleration structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccelHandle(pub u32);

/// Geometry handed to [`RayTracingBackend::build_acceleration_structure`].
#[derive(Debug, Clone, Copy)]
pub enum Geometry<'a> {
    Triangles {
        positions: &'a [Vec3],
        indices: &'a [[u32; 3]],
    },
    /// Axis-aligned homogeneous medium.
    Volume { bounds: BBox3f, density: f32 },
}

/// One entry of the backend scene table.
#[derive(Debug, Clone, Copy)]
pub struct InstanceDesc {
    pub accel: AccelHandle,
    pub transform: Mat4,
    /// Reported back as `Intersection::instance_id` / `VolumetricIntersection::volume_id`.
    pub instance_id: u32,
}

/// Parameters of one ray launch.
pub enum LaunchParams<'a> {
    /// Closest hit for every ray. One [`Intersection`] is appended per ray
    /// (misses included) and one [`VolumetricIntersection`] per medium crossed.
    Intersection {
        rays: &'a [Ray],
        intersections: &'a AtomicBuffer<Intersection>,
        volumetric: &'a AtomicBuffer<VolumetricIntersection>,
        t_min: f32,
        t_max: f32,
        resolution: UVec2,
    },
    /// Any hit within `(t_min, max_distance)`. Indices of unoccluded rays are appended to `visible`.
    Shadow {
        rays: &'a [ShadowRay],
        visible: &'a AtomicBuffer<u32>,
        t_min: f32,
    },
}

impl LaunchParams<'_> {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Intersection { .. } => "intersection",
            Self::Shadow { .. } => "shadow",
        }
    }
}

/// Ray tracing capability. Calls return only after the launch has completed.
pub trait RayTracingBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn build_acceleration_structure(&self, geometry: &Geometry<'_>) -> Result<AccelHandle>;

    /// Release a structure; its handle may be reused by a later build. A scene
    /// table uploaded before the call keeps tracing it until it is replaced.
    fn destroy_acceleration_structure(&self, handle: AccelHandle) -> Result<()>;

    /// Replace the instance table every subsequent launch traces against.
    fn update_scene_table(&self, instances: &[InstanceDesc]) -> Result<()>;

    /// Trace the first `count` rays of `params`.
    fn trace_rays(&self, count: usize, params: LaunchParams<'_>) -> Result<()>;
}

/// Denoiser applied to the accumulated radiance at render resolution.
pub trait DenoiseBackend: Send {
    fn name(&self) -> &'static str;
    fn initialize(&mut self, resolution: UVec2) -> Result<()>;
    fn apply(&mut self, color: &mut [Vec3], resolution: UVec2) -> Result<()>;
}

/// Resamples render resolution to output resolution.
pub trait UpscaleBackend: Send {
    fn name(&self) -> &'static str;
    fn initialize(&mut self, input: UVec2, output: UVec2) -> Result<()>;
    fn apply(&mut self, input: &[Vec3], input_res: UVec2, output: &mut [Vec3], output_res: UVec2) -> Result<()>;
}

/// Denoiser that leaves the image untouched.
#[derive(Debug, Default)]
pub struct NullDenoiser;

impl DenoiseBackend for NullDenoiser {
    fn name(&self) -> &'static str {
        "null"
    }

    fn initialize(&mut self, _resolution: UVec2) -> Result<()> {
        Ok(())
    }

    fn apply(&mut self, _color: &mut [Vec3], _resolution: UVec2) -> Result<()> {
        Ok(())
    }
}

/// Upscaler with nearest-neighbour resampling (a plain copy at equal resolutions).
#[derive(Debug, Default)]
pub struct NullUpscaler;

impl UpscaleBackend for NullUpscaler {
    fn name(&self) -> &'static str {
        "null"
    }

    fn initialize(&mut self, _input: UVec2, _output: UVec2) -> Result<()> {
        Ok(())
    }

    fn apply(&mut self, input: &[Vec3], input_res: UVec2, output: &mut [Vec3], output_res: UVec2) -> Result<()> {
        use rayon::prelude::*;

        if input_res == output_res {
            output.copy_from_slice(input);
            return Ok(());
        }
        let sx = input_res.x as f32 / output_res.x as f32;
        let sy = input_res.y as f32 / output_res.y as f32;
        output
            .par_chunks_mut(output_res.x as usize)
            .enumerate()
            .for_each(|(y, row)| {
                let iy = (((y as f32 + 0.5) * sy) as u32).min(input_res.y - 1);
                for (x, px) in row.iter_mut().enumerate() {
                    let ix = (((x as f32 + 0.5) * sx) as u32).min(input_res.x - 1);
                    *px = input[(iy * input_res.x + ix) as usize];
                }
            });
        Ok(())
    }
}

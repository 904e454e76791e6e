//! ReSTIR direct-lighting sampler.
//!
//! Per frame: [`ReSTIRSampler::run`] once for the primary hits (candidate
//! resampling, visibility, temporal and spatial reuse), any number of
//! [`ReSTIRSampler::resample_secondary`] calls for deeper bounces, then
//! [`ReSTIRSampler::swap_buffers`]. The two reservoir generations alternate so
//! the back generation always holds the previous frame's result.

use glam::{UVec2, Vec3};
use rayon::prelude::*;
use smallvec::SmallVec;

use super::light_bag::{bag_for_pixel, fill_light_bags, LightBagEntry};
use super::reservoir::{combine_reservoirs, target_pdf, LightSample, Reservoir, ReuseCandidate, SampleGeometry};
use super::Cdf;
use crate::backend::{LaunchParams, RayTracingBackend};
use crate::buffers::AtomicBuffer;
use crate::settings::ReSTIRSettings;
use crate::util::{luminance, sample_triangle, Error, Result, Rng};
use crate::wavefront::data::{LightChannel, ShadowRay, SurfaceData, TriangleLight};
use crate::wavefront::motion::MotionVectors;

/// Offset along the normal for rays leaving a surface.
pub const RAY_EPSILON: f32 = 1e-3;

const STREAM_CANDIDATES: u32 = 1;
const STREAM_TEMPORAL: u32 = 2;
const STREAM_SPATIAL: u32 = 3;
const STREAM_SECONDARY: u32 = 4;

/// Inputs of one primary [`ReSTIRSampler::run`].
pub struct SamplerInputs<'a> {
    /// Primary surfaces of this frame, keyed by pixel.
    pub current: &'a [SurfaceData],
    /// Primary surfaces of the previous frame.
    pub previous: &'a [SurfaceData],
    pub motion: &'a MotionVectors,
    pub lights: &'a [TriangleLight],
    pub seed: u32,
    pub t_min: f32,
}

/// Reservoir-based light sampler with two alternating generations.
pub struct ReSTIRSampler {
    settings: ReSTIRSettings,
    resolution: UVec2,
    reservoirs: [Vec<Reservoir>; 2],
    /// Source copy for spatial passes.
    scratch: Vec<Reservoir>,
    /// Transient reservoirs of the latest secondary depth.
    secondary: Vec<Reservoir>,
    active: usize,
    awaiting_swap: bool,
    lights: Vec<TriangleLight>,
    cdf: Cdf,
    light_bags: Vec<LightBagEntry>,
    shadow_rays: AtomicBuffer<ShadowRay>,
    visible: AtomicBuffer<u32>,
    seed: u32,
}

impl ReSTIRSampler {
    /// Validate `settings` and allocate both reservoir generations for `resolution`.
    pub fn initialize(settings: &ReSTIRSettings, resolution: UVec2) -> Result<Self> {
        if resolution.x == 0 || resolution.y == 0 {
            return Err(Error::config(format!(
                "ReSTIR screen size {}x{} is empty",
                resolution.x, resolution.y
            )));
        }
        settings.validate()?;

        let reservoir_count = resolution.x as usize * resolution.y as usize * settings.reservoirs_per_pixel as usize;
        let bag_entries = settings.lights_per_bag as usize * settings.num_light_bags as usize;
        let sampler = Self {
            settings: settings.clone(),
            resolution,
            reservoirs: [
                vec![Reservoir::default(); reservoir_count],
                vec![Reservoir::default(); reservoir_count],
            ],
            scratch: Vec::with_capacity(reservoir_count),
            secondary: Vec::with_capacity(reservoir_count),
            active: 0,
            awaiting_swap: false,
            lights: Vec::new(),
            cdf: Cdf::default(),
            light_bags: vec![LightBagEntry::default(); bag_entries],
            shadow_rays: AtomicBuffer::new("restir_shadow_rays", reservoir_count),
            visible: AtomicBuffer::new("restir_visibility", reservoir_count),
            seed: 0,
        };

        tracing::info!(
            "ReSTIR initialized at {}x{}: expected {:.2} MB, allocated {:.2} MB",
            resolution.x,
            resolution.y,
            Self::expected_memory_usage(settings, resolution, 0) as f64 / (1024.0 * 1024.0),
            sampler.allocated_memory() as f64 / (1024.0 * 1024.0)
        );
        Ok(sampler)
    }

    #[inline]
    pub fn settings(&self) -> &ReSTIRSettings {
        &self.settings
    }

    #[inline]
    pub fn resolution(&self) -> UVec2 {
        self.resolution
    }

    /// Generation written by the current frame's `run`.
    #[inline]
    pub fn active_index(&self) -> usize {
        self.active
    }

    /// True between `run` and `swap_buffers`.
    #[inline]
    pub fn is_awaiting_swap(&self) -> bool {
        self.awaiting_swap
    }

    /// Reservoirs of the active generation, `reservoirs_per_pixel` consecutive entries per pixel.
    #[inline]
    pub fn reservoirs(&self) -> &[Reservoir] {
        &self.reservoirs[self.active]
    }

    /// Reservoirs of the previous frame.
    #[inline]
    pub fn previous_reservoirs(&self) -> &[Reservoir] {
        &self.reservoirs[self.active ^ 1]
    }

    #[inline]
    pub fn light_bags(&self) -> &[LightBagEntry] {
        &self.light_bags
    }

    #[inline]
    pub fn cdf(&self) -> &Cdf {
        &self.cdf
    }

    /// Memory a sampler with `settings` at `resolution` and `num_lights` lights needs.
    pub fn expected_memory_usage(settings: &ReSTIRSettings, resolution: UVec2, num_lights: usize) -> usize {
        let reservoirs = resolution.x as usize * resolution.y as usize * settings.reservoirs_per_pixel as usize;
        let bags = settings.lights_per_bag as usize * settings.num_light_bags as usize;
        // Two generations, the spatial scratch copy and the secondary reservoirs.
        4 * reservoirs * std::mem::size_of::<Reservoir>()
            + reservoirs * (std::mem::size_of::<ShadowRay>() + std::mem::size_of::<u32>())
            + bags * std::mem::size_of::<LightBagEntry>()
            + num_lights * (std::mem::size_of::<TriangleLight>() + 2 * std::mem::size_of::<f32>())
    }

    /// Memory currently held.
    pub fn allocated_memory(&self) -> usize {
        let reservoir = std::mem::size_of::<Reservoir>();
        (self.reservoirs[0].capacity() + self.reservoirs[1].capacity()) * reservoir
            + (self.scratch.capacity() + self.secondary.capacity()) * reservoir
            + self.shadow_rays.size_in_bytes()
            + self.visible.size_in_bytes()
            + self.light_bags.capacity() * std::mem::size_of::<LightBagEntry>()
            + self.lights.capacity() * std::mem::size_of::<TriangleLight>()
            + self.cdf.size_in_bytes()
    }

    /// Resample lights for this frame's primary hits.
    ///
    /// Rejected with [`Error::SwapRequired`] if the previous `run` was not
    /// followed by [`swap_buffers`](Self::swap_buffers). Once accepted the
    /// sampler stays armed for secondary resampling and awaits a swap even if a
    /// later step fails.
    #[tracing::instrument(skip_all, fields(lights = inputs.lights.len()))]
    pub fn run(&mut self, inputs: &SamplerInputs<'_>, backend: &dyn RayTracingBackend) -> Result<()> {
        if self.awaiting_swap {
            return Err(Error::SwapRequired);
        }
        let pixels = self.num_pixels();
        if inputs.current.len() != pixels || inputs.previous.len() != pixels {
            return Err(Error::DimensionMismatch {
                expected: (self.resolution.x, self.resolution.y),
                actual: (inputs.current.len() as u32, 1),
            });
        }
        if inputs.lights.is_empty() {
            return Err(Error::NoLights);
        }
        self.awaiting_swap = true;
        self.seed = inputs.seed;

        // (1) light buffer
        if inputs.lights.len() > self.lights.capacity() {
            tracing::debug!("Growing ReSTIR light buffer to {} lights", inputs.lights.len());
        }
        self.lights.clear();
        self.lights.extend_from_slice(inputs.lights);

        // (2) CDF, always rebuilt together with the light buffer
        self.cdf
            .rebuild(self.lights.iter().map(|l| luminance(l.radiance()) * l.area));

        // (3) light bags
        fill_light_bags(
            &mut self.light_bags,
            self.settings.lights_per_bag as usize,
            &self.cdf,
            self.seed,
        );

        // (4) candidates, then visibility
        let ctx = candidate_context(&self.settings, &self.lights, &self.light_bags, self.resolution.x, self.seed);
        sample_candidates(&ctx, inputs.current, &mut self.reservoirs[self.active], STREAM_CANDIDATES);
        self.resolve_visibility(inputs.current, inputs.t_min, backend)?;

        // (5) reuse
        if self.settings.enable_temporal {
            self.temporal_reuse(inputs);
        }
        if self.settings.enable_spatial {
            for iteration in 0..self.settings.num_spatial_iterations {
                self.spatial_reuse(inputs.current, iteration);
            }
        }
        Ok(())
    }

    /// Resample lights for a secondary depth into transient reservoirs.
    ///
    /// Uses this frame's light bags, so it requires a `run` in the current frame.
    pub fn resample_secondary(&mut self, surfaces: &[SurfaceData], depth: u32) -> Result<&[Reservoir]> {
        if !self.awaiting_swap {
            return Err(Error::SamplerNotReady);
        }
        if surfaces.len() != self.num_pixels() {
            return Err(Error::DimensionMismatch {
                expected: (self.resolution.x, self.resolution.y),
                actual: (surfaces.len() as u32, 1),
            });
        }
        let reservoir_count = self.reservoirs[0].len();
        self.secondary.clear();
        self.secondary.resize(reservoir_count, Reservoir::default());

        let seed = self.seed ^ crate::util::wang_hash(depth);
        let ctx = candidate_context(&self.settings, &self.lights, &self.light_bags, self.resolution.x, seed);
        sample_candidates(&ctx, surfaces, &mut self.secondary, STREAM_SECONDARY);
        Ok(&self.secondary)
    }

    /// Flip the active generation and re-arm `run`.
    pub fn swap_buffers(&mut self) {
        self.active ^= 1;
        self.awaiting_swap = false;
    }

    /// Invalidate both generations (after a camera cut or scene change).
    pub fn reset_history(&mut self) {
        for generation in &mut self.reservoirs {
            generation.fill(Reservoir::default());
        }
    }

    #[inline]
    fn num_pixels(&self) -> usize {
        self.resolution.x as usize * self.resolution.y as usize
    }

    fn resolve_visibility(&mut self, surfaces: &[SurfaceData], t_min: f32, backend: &dyn RayTracingBackend) -> Result<()> {
        let rpp = self.settings.reservoirs_per_pixel as usize;
        self.shadow_rays.reset();
        self.visible.reset();
        {
            let shadow_rays = &self.shadow_rays;
            self.reservoirs[self.active]
                .par_iter()
                .enumerate()
                .for_each(|(index, reservoir)| {
                    if !reservoir.is_valid() {
                        return;
                    }
                    let pixel = index / rpp;
                    let surface = &surfaces[pixel];
                    if let Some(g) = SampleGeometry::new(surface, &reservoir.sample) {
                        shadow_rays.append(ShadowRay::new(
                            surface.position() + surface.normal() * RAY_EPSILON,
                            g.direction,
                            g.distance * (1.0 - RAY_EPSILON),
                            Vec3::ZERO,
                            pixel as u32,
                            LightChannel::Direct,
                            index as u32,
                        ));
                    }
                });
        }

        let count = self.shadow_rays.count();
        if count == 0 {
            return Ok(());
        }
        backend.trace_rays(
            count,
            LaunchParams::Shadow {
                rays: self.shadow_rays.as_slice(),
                visible: &self.visible,
                t_min,
            },
        )?;

        let rays = self.shadow_rays.as_slice();
        let mut occluded = vec![false; self.reservoirs[self.active].len()];
        for ray in rays {
            occluded[ray.reservoir_index as usize] = true;
        }
        for &visible in self.visible.as_slice() {
            if let Some(ray) = rays.get(visible as usize) {
                occluded[ray.reservoir_index as usize] = false;
            }
        }
        self.reservoirs[self.active]
            .par_iter_mut()
            .zip(occluded.par_iter())
            .filter(|(_, occluded)| **occluded)
            .for_each(|(reservoir, _)| reservoir.invalidate());
        Ok(())
    }

    fn temporal_reuse(&mut self, inputs: &SamplerInputs<'_>) {
        let rpp = self.settings.reservoirs_per_pixel as usize;
        let history_cap = self.settings.temporal_history_factor.max(1) * self.settings.num_primary_samples;
        let seed = self.seed;
        let [gen0, gen1] = &mut self.reservoirs;
        let (current, previous) = if self.active == 0 {
            (gen0, &*gen1)
        } else {
            (gen1, &*gen0)
        };

        current
            .par_chunks_mut(rpp)
            .enumerate()
            .for_each(|(pixel, chunk)| {
                let surface = &inputs.current[pixel];
                if !surface.is_hit() {
                    return;
                }
                let Some(prev_pixel) = inputs.motion.previous_pixel(pixel) else {
                    return;
                };
                let prev_surface = &inputs.previous[prev_pixel];
                if !surface.is_similar(prev_surface) {
                    return;
                }
                for (r, reservoir) in chunk.iter_mut().enumerate() {
                    let mut history = previous[prev_pixel * rpp + r];
                    history.clamp_history(history_cap);
                    let own = *reservoir;
                    let mut rng = Rng::new(seed, (pixel * rpp + r) as u32, STREAM_TEMPORAL);
                    *reservoir = combine_reservoirs(
                        surface,
                        &[
                            ReuseCandidate {
                                reservoir: &own,
                                surface,
                            },
                            ReuseCandidate {
                                reservoir: &history,
                                surface: prev_surface,
                            },
                        ],
                        || rng.next_f32(),
                    );
                }
            });
    }

    fn spatial_reuse(&mut self, surfaces: &[SurfaceData], iteration: u32) {
        let rpp = self.settings.reservoirs_per_pixel as usize;
        let width = self.resolution.x as i64;
        let height = self.resolution.y as i64;
        let radius = self.settings.spatial_sample_radius;
        let num_samples = self.settings.num_spatial_samples;
        let seed = self.seed ^ crate::util::wang_hash(iteration.wrapping_add(1));

        self.scratch.clone_from(&self.reservoirs[self.active]);
        let source = &self.scratch;
        self.reservoirs[self.active]
            .par_chunks_mut(rpp)
            .enumerate()
            .for_each(|(pixel, chunk)| {
                let surface = &surfaces[pixel];
                if !surface.is_hit() {
                    return;
                }
                let x = pixel as i64 % width;
                let y = pixel as i64 / width;
                let mut rng = Rng::new(seed, pixel as u32, STREAM_SPATIAL);

                let mut neighbours: SmallVec<[usize; 8]> = SmallVec::new();
                for _ in 0..num_samples {
                    let angle = std::f32::consts::TAU * rng.next_f32();
                    let dist = radius * rng.next_f32().sqrt();
                    let nx = x + (dist * angle.cos()).round() as i64;
                    let ny = y + (dist * angle.sin()).round() as i64;
                    if nx < 0 || ny < 0 || nx >= width || ny >= height {
                        continue;
                    }
                    let neighbour = (ny * width + nx) as usize;
                    if neighbour == pixel || neighbours.contains(&neighbour) {
                        continue;
                    }
                    if surface.is_similar(&surfaces[neighbour]) {
                        neighbours.push(neighbour);
                    }
                }
                if neighbours.is_empty() {
                    return;
                }

                for (r, reservoir) in chunk.iter_mut().enumerate() {
                    let mut candidates: SmallVec<[ReuseCandidate<'_>; 9]> = SmallVec::new();
                    candidates.push(ReuseCandidate {
                        reservoir: &source[pixel * rpp + r],
                        surface,
                    });
                    for &n in &neighbours {
                        candidates.push(ReuseCandidate {
                            reservoir: &source[n * rpp + r],
                            surface: &surfaces[n],
                        });
                    }
                    *reservoir = combine_reservoirs(surface, &candidates, || rng.next_f32());
                }
            });
    }
}

/// Read-only state shared by every candidate-sampling invocation.
struct CandidateContext<'a> {
    lights: &'a [TriangleLight],
    bags: &'a [LightBagEntry],
    lights_per_bag: usize,
    num_bags: u32,
    grid_size: u32,
    num_candidates: u32,
    reservoirs_per_pixel: usize,
    width: u32,
    seed: u32,
}

fn candidate_context<'a>(
    settings: &ReSTIRSettings,
    lights: &'a [TriangleLight],
    bags: &'a [LightBagEntry],
    width: u32,
    seed: u32,
) -> CandidateContext<'a> {
    CandidateContext {
        lights,
        bags,
        lights_per_bag: settings.lights_per_bag as usize,
        num_bags: settings.num_light_bags,
        grid_size: settings.pixel_grid_size,
        num_candidates: settings.num_primary_samples,
        reservoirs_per_pixel: settings.reservoirs_per_pixel as usize,
        width,
        seed,
    }
}

/// Stream `num_candidates` bag entries into every reservoir of every hit pixel.
fn sample_candidates(ctx: &CandidateContext<'_>, surfaces: &[SurfaceData], out: &mut [Reservoir], stream: u32) {
    let rpp = ctx.reservoirs_per_pixel;
    out.par_chunks_mut(rpp)
        .enumerate()
        .for_each(|(pixel, chunk)| {
            let surface = &surfaces[pixel];
            if !surface.is_hit() || ctx.lights.is_empty() {
                chunk.fill(Reservoir::default());
                return;
            }
            let x = pixel as u32 % ctx.width;
            let y = pixel as u32 / ctx.width;
            let bag = bag_for_pixel(x, y, ctx.grid_size, ctx.num_bags, ctx.seed) as usize;
            let bag = &ctx.bags[bag * ctx.lights_per_bag..(bag + 1) * ctx.lights_per_bag];

            for (r, reservoir) in chunk.iter_mut().enumerate() {
                let mut rng = Rng::new(ctx.seed, (pixel * rpp + r) as u32, stream);
                *reservoir = Reservoir::default();
                for _ in 0..ctx.num_candidates {
                    let entry = bag[rng.next_u32() as usize % bag.len()];
                    let Some(light) = ctx.lights.get(entry.light_index as usize) else {
                        reservoir.m += 1;
                        continue;
                    };
                    let b = sample_triangle(rng.next_f32(), rng.next_f32());
                    let sample = LightSample::on_light(light, entry.light_index, b.x, b.y);
                    let p_hat = target_pdf(surface, &sample);
                    let source_pdf = match SampleGeometry::new(surface, &sample) {
                        Some(g) if g.cos_light > 0.0 && light.area > 0.0 => {
                            entry.pdf / light.area * g.distance_sq / g.cos_light
                        }
                        _ => 0.0,
                    };
                    let weight = if source_pdf > 0.0 { p_hat / source_pdf } else { 0.0 };
                    reservoir.update(sample, weight, p_hat, 1, rng.next_f32());
                }
                reservoir.finalize();
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{AccelHandle, Geometry, InstanceDesc};
    use crate::wavefront::data::SurfaceState;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend whose shadow rays are all visible (or all blocked).
    struct VisibilityBackend {
        blocked: bool,
        shadow_launches: AtomicUsize,
    }

    impl RayTracingBackend for VisibilityBackend {
        fn name(&self) -> &'static str {
            "visibility"
        }

        fn build_acceleration_structure(&self, _geometry: &Geometry<'_>) -> Result<AccelHandle> {
            Ok(AccelHandle(0))
        }

        fn destroy_acceleration_structure(&self, _handle: AccelHandle) -> Result<()> {
            Ok(())
        }

        fn update_scene_table(&self, _instances: &[InstanceDesc]) -> Result<()> {
            Ok(())
        }

        fn trace_rays(&self, count: usize, params: LaunchParams<'_>) -> Result<()> {
            if let LaunchParams::Shadow { visible, .. } = params {
                self.shadow_launches.fetch_add(1, Ordering::Relaxed);
                if !self.blocked {
                    for i in 0..count {
                        visible.append(i as u32);
                    }
                }
            }
            Ok(())
        }
    }

    fn backend(blocked: bool) -> VisibilityBackend {
        VisibilityBackend {
            blocked,
            shadow_launches: AtomicUsize::new(0),
        }
    }

    fn small_settings() -> ReSTIRSettings {
        ReSTIRSettings {
            lights_per_bag: 8,
            num_light_bags: 2,
            num_primary_samples: 4,
            reservoirs_per_pixel: 1,
            num_spatial_iterations: 1,
            num_spatial_samples: 3,
            pixel_grid_size: 2,
            spatial_sample_radius: 2.0,
            ..ReSTIRSettings::default()
        }
    }

    fn floor(resolution: UVec2) -> Vec<SurfaceData> {
        (0..resolution.x * resolution.y)
            .map(|i| SurfaceData {
                position: [(i % resolution.x) as f32 * 0.1, 0.0, (i / resolution.x) as f32 * 0.1],
                state: SurfaceState::Hit as u32,
                normal: [0.0, 1.0, 0.0],
                albedo: [0.5; 3],
                t: 2.0,
                ..SurfaceData::EMPTY
            })
            .collect()
    }

    fn ceiling_light() -> Vec<TriangleLight> {
        vec![TriangleLight::new(
            [Vec3::new(-1.0, 2.0, -1.0), Vec3::new(2.0, 2.0, -1.0), Vec3::new(-1.0, 2.0, 2.0)],
            Vec3::splat(5.0),
            0,
            0,
        )]
    }

    #[test]
    fn test_initialize_rejects_non_positive_parameters() {
        let res = UVec2::new(4, 4);
        for mutate in [
            (|s: &mut ReSTIRSettings| s.lights_per_bag = 0) as fn(&mut ReSTIRSettings),
            |s| s.num_light_bags = 0,
            |s| s.num_primary_samples = 0,
            |s| s.reservoirs_per_pixel = 0,
            |s| s.num_spatial_iterations = 0,
            |s| s.num_spatial_samples = 0,
            |s| s.pixel_grid_size = 0,
            |s| s.spatial_sample_radius = -1.0,
        ] {
            let mut s = small_settings();
            mutate(&mut s);
            assert!(matches!(
                ReSTIRSampler::initialize(&s, res),
                Err(Error::Configuration(_))
            ));
        }
        assert!(matches!(
            ReSTIRSampler::initialize(&small_settings(), UVec2::new(0, 4)),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_initialize_allocates_two_generations() {
        let mut s = small_settings();
        s.reservoirs_per_pixel = 3;
        let sampler = ReSTIRSampler::initialize(&s, UVec2::new(4, 2)).unwrap();
        assert_eq!(sampler.reservoirs().len(), 24);
        assert_eq!(sampler.previous_reservoirs().len(), 24);
        assert_eq!(sampler.light_bags().len(), 16);
        assert!(sampler.reservoirs().iter().all(|r| !r.is_valid()));
        assert!(sampler.allocated_memory() > 0);
    }

    #[test]
    fn test_run_and_swap_alternate() {
        let res = UVec2::new(4, 4);
        let mut sampler = ReSTIRSampler::initialize(&small_settings(), res).unwrap();
        let surfaces = floor(res);
        let motion = MotionVectors::new(res);
        let lights = ceiling_light();
        let be = backend(false);
        let inputs = SamplerInputs {
            current: &surfaces,
            previous: &surfaces,
            motion: &motion,
            lights: &lights,
            seed: 1,
            t_min: 1e-3,
        };

        let mut indices = Vec::new();
        for _ in 0..4 {
            indices.push(sampler.active_index());
            sampler.run(&inputs, &be).unwrap();
            assert!(matches!(sampler.run(&inputs, &be), Err(Error::SwapRequired)));
            sampler.swap_buffers();
        }
        assert_eq!(indices, vec![0, 1, 0, 1]);
    }

    #[test]
    fn test_run_selects_visible_lights() {
        let res = UVec2::new(4, 4);
        let mut sampler = ReSTIRSampler::initialize(&small_settings(), res).unwrap();
        let surfaces = floor(res);
        let motion = MotionVectors::new(res);
        let lights = ceiling_light();
        let be = backend(false);
        sampler
            .run(
                &SamplerInputs {
                    current: &surfaces,
                    previous: &surfaces,
                    motion: &motion,
                    lights: &lights,
                    seed: 3,
                    t_min: 1e-3,
                },
                &be,
            )
            .unwrap();

        assert_eq!(be.shadow_launches.load(Ordering::Relaxed), 1);
        assert!(sampler.reservoirs().iter().all(|r| r.is_valid()));
        assert_eq!(sampler.cdf().len(), 1);
    }

    #[test]
    fn test_occluded_candidates_invalidated() {
        let res = UVec2::new(2, 2);
        let mut settings = small_settings();
        settings.enable_spatial = false;
        settings.enable_temporal = false;
        let mut sampler = ReSTIRSampler::initialize(&settings, res).unwrap();
        let surfaces = floor(res);
        let motion = MotionVectors::new(res);
        let lights = ceiling_light();
        sampler
            .run(
                &SamplerInputs {
                    current: &surfaces,
                    previous: &surfaces,
                    motion: &motion,
                    lights: &lights,
                    seed: 3,
                    t_min: 1e-3,
                },
                &backend(true),
            )
            .unwrap();
        assert!(sampler.reservoirs().iter().all(|r| !r.is_valid()));
        assert!(sampler.reservoirs().iter().all(|r| r.m == settings.num_primary_samples));
    }

    #[test]
    fn test_empty_lights_rejected() {
        let res = UVec2::new(2, 2);
        let mut sampler = ReSTIRSampler::initialize(&small_settings(), res).unwrap();
        let surfaces = floor(res);
        let motion = MotionVectors::new(res);
        let err = sampler
            .run(
                &SamplerInputs {
                    current: &surfaces,
                    previous: &surfaces,
                    motion: &motion,
                    lights: &[],
                    seed: 0,
                    t_min: 1e-3,
                },
                &backend(false),
            )
            .unwrap_err();
        assert!(matches!(err, Error::NoLights));
        assert!(!sampler.is_awaiting_swap());
    }

    #[test]
    fn test_secondary_requires_run() {
        let res = UVec2::new(2, 2);
        let mut sampler = ReSTIRSampler::initialize(&small_settings(), res).unwrap();
        let surfaces = floor(res);
        assert!(matches!(
            sampler.resample_secondary(&surfaces, 1),
            Err(Error::SamplerNotReady)
        ));

        let motion = MotionVectors::new(res);
        let lights = ceiling_light();
        sampler
            .run(
                &SamplerInputs {
                    current: &surfaces,
                    previous: &surfaces,
                    motion: &motion,
                    lights: &lights,
                    seed: 0,
                    t_min: 1e-3,
                },
                &backend(false),
            )
            .unwrap();
        let secondary = sampler.resample_secondary(&surfaces, 1).unwrap();
        assert_eq!(secondary.len(), 4);
        assert!(secondary.iter().all(|r| r.is_valid()));

        sampler.swap_buffers();
        assert!(matches!(
            sampler.resample_secondary(&surfaces, 1),
            Err(Error::SamplerNotReady)
        ));
    }

    #[test]
    fn test_temporal_history_accumulates() {
        let res = UVec2::new(2, 2);
        let mut settings = small_settings();
        settings.enable_spatial = false;
        let mut sampler = ReSTIRSampler::initialize(&settings, res).unwrap();
        let surfaces = floor(res);
        let mut motion = MotionVectors::new(res);
        // Static camera: every pixel maps onto itself.
        let vp = glam::Mat4::IDENTITY;
        let mut projected = surfaces.clone();
        for (i, s) in projected.iter_mut().enumerate() {
            let x = (i % 2) as f32 + 0.5;
            let y = (i / 2) as f32 + 0.5;
            s.position = [x - 1.0, 1.0 - y, 0.5];
        }
        motion.compute(&projected, &vp);
        let lights = ceiling_light();
        let be = backend(false);
        let inputs = SamplerInputs {
            current: &surfaces,
            previous: &surfaces,
            motion: &motion,
            lights: &lights,
            seed: 0,
            t_min: 1e-3,
        };
        sampler.run(&inputs, &be).unwrap();
        sampler.swap_buffers();
        sampler.run(&inputs, &be).unwrap();
        let m = settings.num_primary_samples;
        assert!(sampler.reservoirs().iter().all(|r| r.m == 2 * m));
    }

    #[test]
    fn test_expected_memory_grows_with_lights() {
        let s = small_settings();
        let res = UVec2::new(8, 8);
        let none = ReSTIRSampler::expected_memory_usage(&s, res, 0);
        let some = ReSTIRSampler::expected_memory_usage(&s, res, 100);
        assert!(some > none);
    }
}

//! Per-frame wavefront state machine.
//!
//! ```text
//! ApplySettings -> CollectLights -> GeneratePrimaryRays
//!   -> { Trace -> ExtractSurface -> Shade }*  (while depth < max_depth and rays remain)
//!   -> ResolveShadowRays -> PostProcess -> Present
//! ```
//!
//! Every stage runs to completion before the next one reads its output;
//! append-buffer counters are only read once the producing pass has returned.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytemuck::Pod;
use glam::{UVec2, Vec3};

use super::data::{Ray, TriangleLight};
use super::kernels::{self, ShadeInputs};
use super::motion::MotionVectors;
use super::snapshot::SnapshotRecorder;
use super::stats::StatsRecorder;
use crate::backend::{DenoiseBackend, LaunchParams, NullDenoiser, NullUpscaler, RayTracingBackend, UpscaleBackend};
use crate::buffers::{AtomicBuffer, BufferLayout, RayBuffers, SCRATCH_SURFACE};
use crate::deferred::DeferredQueue;
use crate::output::OutputCompositor;
use crate::restir::{ReSTIRSampler, SamplerInputs};
use crate::scene::SceneProvider;
use crate::settings::{SettingsChange, SharedSettings, WaveFrontSettings};
use crate::util::{wang_hash, Result};

/// How a frame ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// Traced and handed to the compositor.
    Presented,
    /// Skipped: the scene has no emissive triangles (or no scene is set).
    NoLights,
}

/// Summary of one [`FrameScheduler::trace_frame`] call.
#[derive(Debug, Clone)]
pub struct FrameReport {
    pub frame_index: u64,
    pub status: FrameStatus,
    pub render_resolution: UVec2,
    pub output_resolution: UVec2,
    /// Trace/shade passes executed.
    pub depth_passes: u32,
    pub rays_traced: usize,
    pub shadow_rays: usize,
    pub light_count: usize,
    /// Some append buffer dropped writes this frame.
    pub overflowed: bool,
    /// Accumulation index used for this frame, `None` with blending off.
    pub blend_counter: Option<u32>,
    pub elapsed: Duration,
}

/// Shared state a frame reads and reports into.
pub struct FrameContext<'a> {
    pub settings: &'a SharedSettings,
    pub scene: &'a dyn SceneProvider,
    pub compositor: &'a Arc<OutputCompositor>,
    pub deferred: &'a DeferredQueue,
    pub snapshots: &'a SnapshotRecorder,
    pub stats: &'a StatsRecorder,
}

/// Counters gathered while a frame runs.
#[derive(Default)]
struct FrameTally {
    depth_passes: u32,
    rays_traced: usize,
    shadow_rays: usize,
    light_count: usize,
    overflowed: bool,
    blend_counter: Option<u32>,
}

/// Owns every per-frame resource and drives one frame at a time.
pub struct FrameScheduler {
    backend: Arc<dyn RayTracingBackend>,
    denoiser: Box<dyn DenoiseBackend>,
    upscaler: Box<dyn UpscaleBackend>,
    /// Live settings of the frame being traced.
    settings: WaveFrontSettings,
    buffers: RayBuffers,
    sampler: ReSTIRSampler,
    motion: MotionVectors,
    lights: AtomicBuffer<TriangleLight>,
    /// Sequence number of the next frame.
    frame_index: u64,
    /// Surface generation holding this frame's primary hits (the other holds last frame's).
    current_surface: usize,
    blend_counter: u32,
    scene_revision: Option<u64>,
    no_lights: bool,
}

fn layout_for(settings: &WaveFrontSettings) -> BufferLayout {
    BufferLayout {
        resolution: UVec2::from(settings.render_resolution),
        output_resolution: UVec2::from(settings.output_resolution),
        max_depth: settings.max_depth,
        reservoirs_per_pixel: settings.restir.reservoirs_per_pixel,
    }
}

/// Log and flag dropped appends.
fn check_overflow<T: Pod + Send>(buffer: &mut AtomicBuffer<T>, overflowed: &mut bool) {
    if let Err(e) = buffer.check_overflow() {
        tracing::warn!("{}", e);
        *overflowed = true;
    }
}

impl FrameScheduler {
    /// Scheduler with the null denoiser and upscaler.
    pub fn new(backend: Arc<dyn RayTracingBackend>, settings: WaveFrontSettings) -> Result<Self> {
        Self::with_post_process(backend, settings, Box::new(NullDenoiser), Box::new(NullUpscaler))
    }

    pub fn with_post_process(
        backend: Arc<dyn RayTracingBackend>,
        settings: WaveFrontSettings,
        mut denoiser: Box<dyn DenoiseBackend>,
        mut upscaler: Box<dyn UpscaleBackend>,
    ) -> Result<Self> {
        settings.validate()?;
        let layout = layout_for(&settings);
        denoiser.initialize(layout.resolution)?;
        upscaler.initialize(layout.resolution, layout.output_resolution)?;
        let sampler = ReSTIRSampler::initialize(&settings.restir, layout.resolution)?;
        tracing::info!(
            "Frame scheduler on '{}' backend: render {}x{}, output {}x{}, depth {}, denoise '{}', upscale '{}'",
            backend.name(),
            layout.resolution.x,
            layout.resolution.y,
            layout.output_resolution.x,
            layout.output_resolution.y,
            layout.max_depth,
            denoiser.name(),
            upscaler.name()
        );
        Ok(Self {
            backend,
            denoiser,
            upscaler,
            buffers: RayBuffers::new(layout),
            sampler,
            motion: MotionVectors::new(layout.resolution),
            lights: AtomicBuffer::new("lights", 1),
            settings,
            frame_index: 0,
            current_surface: 0,
            blend_counter: 0,
            scene_revision: None,
            no_lights: false,
        })
    }

    #[inline]
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    #[inline]
    pub fn settings(&self) -> &WaveFrontSettings {
        &self.settings
    }

    #[inline]
    pub fn buffers(&self) -> &RayBuffers {
        &self.buffers
    }

    #[inline]
    pub fn sampler(&self) -> &ReSTIRSampler {
        &self.sampler
    }

    /// Frames accumulated so far with blending on.
    #[inline]
    pub fn blend_counter(&self) -> u32 {
        self.blend_counter
    }

    /// Trace, post-process and present one frame.
    ///
    /// A failing backend call aborts only this frame. The ReSTIR sampler is
    /// swapped whenever it ran, so the next frame starts from a clean state.
    #[tracing::instrument(skip_all, fields(frame = self.frame_index))]
    pub fn trace_frame(&mut self, ctx: &FrameContext<'_>) -> Result<FrameReport> {
        let start = Instant::now();
        if let Err(e) = ctx.stats.time("apply_settings", || self.apply_settings(ctx)) {
            ctx.stats.discard();
            return Err(e);
        }
        let frame_index = self.frame_index;
        self.frame_index += 1;

        ctx.snapshots.frame_started(frame_index);
        let mut tally = FrameTally::default();
        let result = self.trace(ctx, frame_index, &mut tally);
        if self.sampler.is_awaiting_swap() {
            self.sampler.swap_buffers();
        }

        let status = match result {
            Ok(status) => status,
            Err(e) => {
                ctx.snapshots.frame_finished(false);
                ctx.stats.discard();
                return Err(e);
            }
        };
        ctx.snapshots.frame_finished(status == FrameStatus::Presented);
        if status == FrameStatus::Presented {
            ctx.stats.finalize();
        } else {
            ctx.stats.discard();
        }

        Ok(FrameReport {
            frame_index,
            status,
            render_resolution: UVec2::from(self.settings.render_resolution),
            output_resolution: UVec2::from(self.settings.output_resolution),
            depth_passes: tally.depth_passes,
            rays_traced: tally.rays_traced,
            shadow_rays: tally.shadow_rays,
            light_count: tally.light_count,
            overflowed: tally.overflowed,
            blend_counter: tally.blend_counter,
            elapsed: start.elapsed(),
        })
    }

    /// Promote pending settings and reallocate what they affect.
    fn apply_settings(&mut self, ctx: &FrameContext<'_>) -> Result<()> {
        let change = match ctx.settings.apply_pending() {
            Ok(change) => change,
            Err(e) => {
                tracing::warn!("Rejected settings update: {}", e);
                SettingsChange::default()
            }
        };
        if change.any {
            self.settings = ctx.settings.live();
            self.reallocate(change)?;
        }

        // The presentation target is resized on the context thread. Checked every
        // frame so a resize interrupted by a closed queue is retried.
        let [w, h] = self.settings.output_resolution;
        if ctx.compositor.dimensions() != (w, h) {
            let compositor = Arc::clone(ctx.compositor);
            let ticket = ctx.deferred.submit(move || compositor.resize(w, h))?;
            ctx.deferred.wait(ticket)?;
        }
        Ok(())
    }

    fn reallocate(&mut self, change: SettingsChange) -> Result<()> {
        let layout = layout_for(&self.settings);
        let reallocated = self.buffers.resize(layout);
        if change.render_resized || change.restir_changed {
            self.sampler = ReSTIRSampler::initialize(&self.settings.restir, layout.resolution)?;
            self.motion.resize(layout.resolution);
            self.current_surface = 0;
        }
        if change.render_resized {
            self.denoiser.initialize(layout.resolution)?;
        }
        if change.render_resized || change.output_resized {
            self.upscaler.initialize(layout.resolution, layout.output_resolution)?;
        }
        // A fresh accumulation buffer holds no history to average against.
        if change.blend_enabled || reallocated {
            self.blend_counter = 0;
        }
        tracing::debug!("Applied settings at frame {}: {:?}", self.frame_index, change);
        Ok(())
    }

    fn trace(&mut self, ctx: &FrameContext<'_>, frame_index: u64, tally: &mut FrameTally) -> Result<FrameStatus> {
        let resolution = UVec2::from(self.settings.render_resolution);
        let output_resolution = UVec2::from(self.settings.output_resolution);
        let num_pixels = self.buffers.layout().num_pixels();
        let aspect = resolution.x as f32 / resolution.y as f32;
        let t_min = self.settings.min_intersection_t;
        let t_max = self.settings.max_intersection_t;
        let max_depth = self.settings.max_depth;
        let seed = wang_hash(frame_index as u32);
        let recording = ctx.snapshots.is_recording();

        let Some((scene, revision)) = ctx.scene.scene() else {
            return Ok(self.skip_without_lights("no scene is set"));
        };
        if self.scene_revision != Some(revision) {
            self.backend.update_scene_table(scene.instance_descs())?;
            self.sampler.reset_history();
            self.scene_revision = Some(revision);
        }
        let camera = ctx.scene.camera();

        // CollectLights
        let started = Instant::now();
        self.lights.ensure_capacity(scene.table_triangle_count().max(1));
        scene.collect_lights(&self.lights);
        check_overflow(&mut self.lights, &mut tally.overflowed);
        tally.light_count = self.lights.count();
        ctx.stats.record("collect_lights", started.elapsed());
        if tally.light_count == 0 {
            return Ok(self.skip_without_lights("the scene has no emissive triangles"));
        }
        if self.no_lights {
            tracing::info!("Scene lights available again ({} triangles)", tally.light_count);
            self.no_lights = false;
        }

        // GeneratePrimaryRays
        let started = Instant::now();
        self.buffers.clear_channels();
        self.buffers.shadow_rays.reset();
        self.buffers.visible.reset();
        kernels::generate_primary_rays(&mut self.buffers.rays[0], &camera, resolution, seed, true);
        ctx.stats.record("generate_rays", started.elapsed());
        if recording {
            let rays = self.buffers.rays[0].as_slice();
            ctx.snapshots.record(
                "Origins",
                resolution.x,
                resolution.y,
                kernels::ray_image(rays, num_pixels, Ray::origin),
            );
            ctx.snapshots.record(
                "Directions",
                resolution.x,
                resolution.y,
                kernels::ray_image(rays, num_pixels, Ray::direction),
            );
        }

        let current = self.current_surface;
        let previous = current ^ 1;
        let previous_view_projection = camera.previous_view_projection(aspect);
        let mut read = 0;
        let mut depth = 0;
        loop {
            let active = self.buffers.rays[read].count();
            if depth >= max_depth || active == 0 {
                break;
            }
            check_overflow(&mut self.buffers.rays[read], &mut tally.overflowed);
            tally.rays_traced += active;

            // Trace
            let started = Instant::now();
            self.buffers.intersections.reset();
            self.buffers.volumetric.reset();
            self.backend.trace_rays(
                active,
                LaunchParams::Intersection {
                    rays: self.buffers.rays[read].as_slice(),
                    intersections: &self.buffers.intersections,
                    volumetric: &self.buffers.volumetric,
                    t_min,
                    t_max,
                    resolution,
                },
            )?;
            check_overflow(&mut self.buffers.intersections, &mut tally.overflowed);
            check_overflow(&mut self.buffers.volumetric, &mut tally.overflowed);
            ctx.stats.record("trace", started.elapsed());

            // ExtractSurface
            let started = Instant::now();
            let slot = if depth == 0 { current } else { SCRATCH_SURFACE };
            self.buffers.clear_surfaces(slot);
            {
                let rays = self.buffers.rays[read].as_slice();
                let hits = self.buffers.intersections.as_slice();
                kernels::extract_surfaces(&scene, rays, hits, &mut self.buffers.surfaces[slot]);
                kernels::extract_volumetric(
                    rays,
                    hits,
                    self.buffers.volumetric.as_slice(),
                    &mut self.buffers.volumetric_data,
                );
            }
            ctx.stats.record("extract", started.elapsed());

            // Shade
            let started = Instant::now();
            let reservoirs = if depth == 0 {
                self.motion
                    .compute(&self.buffers.surfaces[current], &previous_view_projection);
                if recording {
                    ctx.snapshots.record(
                        "Motion vector direction",
                        resolution.x,
                        resolution.y,
                        self.motion.direction_image(),
                    );
                    ctx.snapshots.record(
                        "Motion vector magnitude",
                        resolution.x,
                        resolution.y,
                        self.motion.magnitude_image(),
                    );
                }
                let inputs = SamplerInputs {
                    current: &self.buffers.surfaces[current],
                    previous: &self.buffers.surfaces[previous],
                    motion: &self.motion,
                    lights: self.lights.as_slice(),
                    seed,
                    t_min,
                };
                self.sampler.run(&inputs, self.backend.as_ref())?;
                self.sampler.reservoirs()
            } else {
                self.sampler
                    .resample_secondary(&self.buffers.surfaces[SCRATCH_SURFACE], depth)?
            };

            let next = read ^ 1;
            self.buffers.rays[next].reset();
            kernels::shade(
                &ShadeInputs {
                    depth,
                    max_depth,
                    surfaces: &self.buffers.surfaces[slot],
                    volumetric: &self.buffers.volumetric_data,
                    reservoirs,
                    reservoirs_per_pixel: self.settings.restir.reservoirs_per_pixel as usize,
                    background: Vec3::from(self.settings.background),
                    seed,
                },
                &self.buffers.shadow_rays,
                &self.buffers.rays[next],
                &mut self.buffers.channels,
            );
            ctx.stats.record("shade", started.elapsed());

            read = next;
            depth += 1;
        }
        tally.depth_passes = depth;
        tracing::trace!("Frame {} finished {} depth passes", frame_index, depth);

        // ResolveShadowRays: every depth in one launch
        let started = Instant::now();
        check_overflow(&mut self.buffers.shadow_rays, &mut tally.overflowed);
        let shadow_count = self.buffers.shadow_rays.count();
        tally.shadow_rays = shadow_count;
        if shadow_count > 0 {
            self.backend.trace_rays(
                shadow_count,
                LaunchParams::Shadow {
                    rays: self.buffers.shadow_rays.as_slice(),
                    visible: &self.buffers.visible,
                    t_min,
                },
            )?;
        }
        check_overflow(&mut self.buffers.visible, &mut tally.overflowed);
        if recording {
            ctx.snapshots.record(
                "Contributions",
                resolution.x,
                resolution.y,
                kernels::contribution_image(self.buffers.shadow_rays.as_slice(), num_pixels),
            );
        }
        kernels::accumulate_shadow_rays(
            self.buffers.shadow_rays.as_slice(),
            self.buffers.visible.as_slice(),
            &mut self.buffers.channels,
        );
        ctx.stats.record("shadow", started.elapsed());

        // PostProcess
        let started = Instant::now();
        tally.blend_counter = self.settings.blend_output.then(|| {
            let n = self.blend_counter;
            self.blend_counter += 1;
            n
        });
        kernels::merge_channels(&self.buffers.channels, &mut self.buffers.combined, tally.blend_counter);
        self.buffers.display.copy_from_slice(&self.buffers.combined);
        self.denoiser.apply(&mut self.buffers.display, resolution)?;
        self.upscaler.apply(
            &self.buffers.display,
            resolution,
            &mut self.buffers.upscaled,
            output_resolution,
        )?;
        kernels::tone_map(&self.buffers.upscaled, self.settings.exposure, &mut self.buffers.output);
        ctx.stats.record("post_process", started.elapsed());

        // Present
        let started = Instant::now();
        ctx.compositor
            .present(&self.buffers.output, output_resolution.x, output_resolution.y)?;
        ctx.scene.end_frame(aspect);
        self.current_surface = previous;
        ctx.stats.record("present", started.elapsed());
        Ok(FrameStatus::Presented)
    }

    fn skip_without_lights(&mut self, reason: &str) -> FrameStatus {
        if !self.no_lights {
            tracing::warn!("Skipping frames: {}", reason);
            self.no_lights = true;
        }
        FrameStatus::NoLights
    }
}

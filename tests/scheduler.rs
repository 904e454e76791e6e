//! Frame scheduler behaviour observed through a scripted backend.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use glam::{Mat4, UVec2, Vec3};
use parking_lot::Mutex;

use wavetrace::backend::{AccelHandle, Geometry, InstanceDesc, LaunchParams, RayTracingBackend};
use wavetrace::deferred::DeferredQueue;
use wavetrace::output::OutputCompositor;
use wavetrace::scene::{
    BackendResourceFactory, Camera, EmissionMode, Material, PrimitiveDesc, ResourceFactory, Scene, SharedScene,
};
use wavetrace::wavefront::data::Intersection;
use wavetrace::wavefront::{FrameContext, FrameScheduler, FrameStatus, SnapshotRecorder, StatsRecorder};
use wavetrace::{Error, ReSTIRSettings, Result, SharedSettings, WaveFrontSettings};

/// Primary rays (unit throughput) hit table entry 0, everything else escapes.
/// Shadow rays are always unoccluded.
#[derive(Default)]
struct ScriptedBackend {
    next_accel: AtomicU32,
    launches: Mutex<Vec<(&'static str, usize)>>,
    fail_bounces: AtomicBool,
    on_intersection: Mutex<Option<Box<dyn FnMut() + Send>>>,
    table_uploads: AtomicU32,
    released: Mutex<Vec<u32>>,
}

impl ScriptedBackend {
    fn take_launches(&self) -> Vec<(&'static str, usize)> {
        std::mem::take(&mut *self.launches.lock())
    }
}

impl RayTracingBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn build_acceleration_structure(&self, _geometry: &Geometry<'_>) -> Result<AccelHandle> {
        Ok(AccelHandle(self.next_accel.fetch_add(1, Ordering::Relaxed)))
    }

    fn destroy_acceleration_structure(&self, handle: AccelHandle) -> Result<()> {
        self.released.lock().push(handle.0);
        Ok(())
    }

    fn update_scene_table(&self, _instances: &[InstanceDesc]) -> Result<()> {
        self.table_uploads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn trace_rays(&self, count: usize, params: LaunchParams<'_>) -> Result<()> {
        self.launches.lock().push((params.kind(), count));
        match params {
            LaunchParams::Intersection {
                rays, intersections, ..
            } => {
                if let Some(hook) = self.on_intersection.lock().as_mut() {
                    hook();
                }
                for (i, ray) in rays[..count].iter().enumerate() {
                    let primary = ray.throughput() == Vec3::ONE;
                    if !primary && self.fail_bounces.load(Ordering::Relaxed) {
                        return Err(Error::backend("scripted", "bounce launch failed"));
                    }
                    intersections.append(if primary {
                        Intersection {
                            ray_index: i as u32,
                            t: 1.0,
                            instance_id: 0,
                            primitive_index: 0,
                            barycentrics: [0.25, 0.25],
                        }
                    } else {
                        Intersection::miss(i as u32)
                    });
                }
            }
            LaunchParams::Shadow { visible, .. } => {
                for i in 0..count {
                    visible.append(i as u32);
                }
            }
        }
        Ok(())
    }
}

struct Harness {
    backend: Arc<ScriptedBackend>,
    settings: Arc<SharedSettings>,
    scene: Arc<SharedScene>,
    compositor: Arc<OutputCompositor>,
    deferred: DeferredQueue,
    snapshots: SnapshotRecorder,
    stats: StatsRecorder,
    scheduler: FrameScheduler,
}

impl Harness {
    fn new(settings: WaveFrontSettings) -> Self {
        let backend = Arc::new(ScriptedBackend::default());
        let dyn_backend: Arc<dyn RayTracingBackend> = backend.clone();
        let scene = Arc::new(SharedScene::new());
        scene.set(floor_and_light(&BackendResourceFactory::new(Arc::clone(&dyn_backend))));
        let [w, h] = settings.output_resolution;
        let deferred = DeferredQueue::new();
        // The test thread is both worker and context owner.
        deferred.bind_context_thread();
        Self {
            scheduler: FrameScheduler::new(dyn_backend, settings.clone()).unwrap(),
            backend,
            settings: Arc::new(SharedSettings::new(settings)),
            scene,
            compositor: Arc::new(OutputCompositor::new(w, h)),
            deferred,
            snapshots: SnapshotRecorder::new(),
            stats: StatsRecorder::new(),
        }
    }

    fn frame(&mut self) -> Result<wavetrace::wavefront::FrameReport> {
        let ctx = FrameContext {
            settings: &self.settings,
            scene: self.scene.as_ref(),
            compositor: &self.compositor,
            deferred: &self.deferred,
            snapshots: &self.snapshots,
            stats: &self.stats,
        };
        self.scheduler.trace_frame(&ctx)
    }
}

/// Floor (table entry 0) and a downward-facing light above it (table entry 1).
fn floor_and_light(factory: &dyn ResourceFactory) -> Scene {
    let mut scene = factory.create_scene();
    let grey = factory.create_material(&mut scene, Material::diffuse(Vec3::splat(0.5))).unwrap();
    let lamp = factory.create_material(&mut scene, Material::emissive(Vec3::splat(10.0))).unwrap();
    let floor = factory
        .create_primitive(
            &mut scene,
            PrimitiveDesc {
                positions: vec![Vec3::new(-5.0, 0.0, -5.0), Vec3::new(-5.0, 0.0, 5.0), Vec3::new(5.0, 0.0, -5.0)],
                normals: None,
                uvs: None,
                indices: vec![[0, 1, 2]],
                material: grey,
                emissive: Some(vec![false]),
            },
        )
        .unwrap();
    let light = factory
        .create_primitive(
            &mut scene,
            PrimitiveDesc {
                positions: vec![Vec3::new(-1.0, 2.0, -1.0), Vec3::new(2.0, 2.0, -1.0), Vec3::new(-1.0, 2.0, 2.0)],
                normals: None,
                uvs: None,
                indices: vec![[0, 1, 2]],
                material: lamp,
                emissive: None,
            },
        )
        .unwrap();
    let floor = factory.create_mesh(&mut scene, vec![floor]).unwrap();
    let light = factory.create_mesh(&mut scene, vec![light]).unwrap();
    scene.add_instance(floor, Mat4::IDENTITY, EmissionMode::Enabled).unwrap();
    scene.add_instance(light, Mat4::IDENTITY, EmissionMode::Enabled).unwrap();
    scene.camera = Camera::look_at(Vec3::new(0.0, 4.0, 4.0), Vec3::ZERO, 40.0);
    scene
}

fn small_settings() -> WaveFrontSettings {
    WaveFrontSettings {
        render_resolution: [8, 6],
        output_resolution: [8, 6],
        max_depth: 4,
        restir: ReSTIRSettings {
            lights_per_bag: 4,
            num_light_bags: 2,
            num_primary_samples: 4,
            num_spatial_samples: 2,
            pixel_grid_size: 4,
            spatial_sample_radius: 2.0,
            ..ReSTIRSettings::default()
        },
        ..WaveFrontSettings::default()
    }
}

#[test]
fn test_depth_loop_stops_when_rays_escape() {
    let mut h = Harness::new(small_settings());
    let report = h.frame().unwrap();

    assert_eq!(report.status, FrameStatus::Presented);
    assert_eq!(report.depth_passes, 2);
    assert_eq!(report.rays_traced, 96);
    assert_eq!(report.light_count, 1);
    assert!(!report.overflowed);

    // Visibility for the primary reservoirs, then one batched launch for every depth.
    let launches = h.backend.take_launches();
    let kinds: Vec<_> = launches.iter().map(|(k, _)| *k).collect();
    assert_eq!(kinds, vec!["intersection", "shadow", "intersection", "shadow"]);
    assert_eq!(launches[3].1, report.shadow_rays);
    assert!(report.shadow_rays > 0);
}

#[test]
fn test_presented_image_is_lit() {
    let mut h = Harness::new(small_settings());
    h.frame().unwrap();
    let frame = h.compositor.read_pixels();
    assert_eq!(frame.frame_id, 1);
    assert_eq!((frame.width, frame.height), (8, 6));
    assert!(frame.pixels.chunks(4).all(|px| px[3] == 255));
    assert!(frame.pixels.chunks(4).any(|px| px[0] > 0));
}

#[test]
fn test_sampler_alternates_across_frames() {
    let mut h = Harness::new(small_settings());
    let mut active = Vec::new();
    for _ in 0..4 {
        active.push(h.scheduler.sampler().active_index());
        h.frame().unwrap();
        assert!(!h.scheduler.sampler().is_awaiting_swap());
    }
    assert_eq!(active, vec![0, 1, 0, 1]);
}

#[test]
fn test_no_lights_is_recoverable() {
    let mut h = Harness::new(small_settings());
    h.scene
        .modify(|s| s.set_emission_mode(1, EmissionMode::Disabled))
        .unwrap()
        .unwrap();

    let report = h.frame().unwrap();
    assert_eq!(report.status, FrameStatus::NoLights);
    assert_eq!(report.light_count, 0);
    assert_eq!(report.depth_passes, 0);
    assert_eq!(h.compositor.frame_id(), 0);
    assert_eq!(h.stats.last().id, 0);

    h.scene
        .modify(|s| s.set_emission_mode(1, EmissionMode::Enabled))
        .unwrap()
        .unwrap();
    let report = h.frame().unwrap();
    assert_eq!(report.status, FrameStatus::Presented);
    assert_eq!(h.stats.last().id, 1);
}

#[test]
fn test_blend_counter_sequence_and_reset() {
    let mut settings = small_settings();
    settings.blend_output = true;
    settings.max_depth = 1;
    let mut h = Harness::new(settings);

    let counters: Vec<_> = (0..10).map(|_| h.frame().unwrap().blend_counter).collect();
    assert_eq!(counters, (0..10).map(Some).collect::<Vec<_>>());

    h.settings.update(|s| s.blend_output = false);
    assert_eq!(h.frame().unwrap().blend_counter, None);
    h.settings.update(|s| s.blend_output = true);
    assert_eq!(h.frame().unwrap().blend_counter, Some(0));
    assert_eq!(h.frame().unwrap().blend_counter, Some(1));
}

#[test]
fn test_resolution_change_waits_for_frame_boundary() {
    let mut h = Harness::new(small_settings());
    let settings = Arc::clone(&h.settings);
    *h.backend.on_intersection.lock() = Some(Box::new(move || {
        settings.update(|s| s.render_resolution = [4, 4]);
    }));

    let first = h.frame().unwrap();
    assert_eq!(first.render_resolution, UVec2::new(8, 6));
    let launches = h.backend.take_launches();
    assert!(launches
        .iter()
        .filter(|(k, _)| *k == "intersection")
        .all(|&(_, n)| n == 48));
    assert_eq!(h.settings.intermediate().render_resolution, [4, 4]);
    assert_eq!(h.settings.live().render_resolution, [8, 6]);

    let second = h.frame().unwrap();
    assert_eq!(second.render_resolution, UVec2::new(4, 4));
    assert_eq!(h.backend.take_launches()[0], ("intersection", 16));
    assert_eq!(h.scheduler.sampler().resolution(), UVec2::new(4, 4));
    // Output resolution is independent.
    assert_eq!(second.output_resolution, UVec2::new(8, 6));
}

#[test]
fn test_output_resize_goes_through_deferred_queue() {
    let mut h = Harness::new(small_settings());
    h.frame().unwrap();
    h.settings.update(|s| s.output_resolution = [16, 12]);
    let report = h.frame().unwrap();
    assert_eq!(report.output_resolution, UVec2::new(16, 12));
    assert_eq!(h.compositor.dimensions(), (16, 12));
    assert_eq!(h.compositor.read_pixels().pixels.len(), 16 * 12 * 4);
    assert_eq!(h.deferred.pending_len(), 0);
}

#[test]
fn test_invalid_settings_are_rejected() {
    let mut h = Harness::new(small_settings());
    h.settings.update(|s| s.restir.num_light_bags = 0);
    let report = h.frame().unwrap();
    assert_eq!(report.status, FrameStatus::Presented);
    assert_eq!(h.settings.intermediate().restir.num_light_bags, 2);
}

#[test]
fn test_backend_failure_aborts_only_the_frame() {
    let mut h = Harness::new(small_settings());
    h.backend.fail_bounces.store(true, Ordering::Relaxed);
    let err = h.frame().unwrap_err();
    assert!(matches!(err, Error::Backend { .. }));
    assert!(err.is_frame_local());
    assert!(!h.scheduler.sampler().is_awaiting_swap());
    assert_eq!(h.compositor.frame_id(), 0);

    h.backend.fail_bounces.store(false, Ordering::Relaxed);
    let report = h.frame().unwrap();
    assert_eq!(report.status, FrameStatus::Presented);
    assert_eq!(report.frame_index, 1);
}

#[test]
fn test_snapshot_captures_one_frame() {
    let mut h = Harness::new(small_settings());
    h.frame().unwrap();
    h.snapshots.begin_snapshot();
    h.frame().unwrap();
    h.frame().unwrap();

    let snapshot = h.snapshots.end_snapshot().unwrap();
    assert_eq!(snapshot.frame_index, 1);
    for name in [
        "Origins",
        "Directions",
        "Contributions",
        "Motion vector direction",
        "Motion vector magnitude",
    ] {
        let buffer = snapshot.buffer(name).unwrap_or_else(|| panic!("missing {name}"));
        assert_eq!((buffer.width, buffer.height), (8, 6));
        assert_eq!(buffer.data.len(), 48);
    }
    assert!(h.snapshots.end_snapshot().is_none());
}

#[test]
fn test_stats_finalized_per_frame() {
    let mut h = Harness::new(small_settings());
    h.frame().unwrap();
    h.frame().unwrap();
    let stats = h.stats.last();
    assert_eq!(stats.id, 2);
    for stage in ["collect_lights", "trace", "shade", "shadow", "post_process", "present"] {
        assert!(stats.get(stage).is_some(), "missing stage {stage}");
    }
}

/// Mean red channel of the presented image.
fn mean_red(compositor: &OutputCompositor) -> f32 {
    let frame = compositor.read_pixels();
    let sum: u32 = frame.pixels.chunks(4).map(|px| px[0] as u32).sum();
    sum as f32 / (frame.pixels.len() / 4) as f32
}

#[test]
fn test_blend_restarts_after_buffer_reallocation() {
    let mut settings = small_settings();
    settings.blend_output = true;
    settings.max_depth = 1;
    let mut h = Harness::new(settings);
    for _ in 0..5 {
        h.frame().unwrap();
    }
    let before = mean_red(&h.compositor);
    assert!(before > 0.0);

    // Reallocating for a new output size drops the accumulated image.
    h.settings.update(|s| s.output_resolution = [16, 12]);
    let report = h.frame().unwrap();
    assert_eq!(report.blend_counter, Some(0));
    let after = mean_red(&h.compositor);
    assert!(after > 0.5 * before, "accumulated image darkened: {before} -> {after}");

    h.settings.update(|s| s.max_depth = 2);
    assert_eq!(h.frame().unwrap().blend_counter, Some(0));
    assert_eq!(h.frame().unwrap().blend_counter, Some(1));

    // Settings that keep the buffers keep the running average.
    h.settings.update(|s| s.exposure = 2.0);
    assert_eq!(h.frame().unwrap().blend_counter, Some(2));
}

#[test]
fn test_scene_edit_reuploads_table() {
    let mut h = Harness::new(small_settings());
    h.frame().unwrap();
    h.frame().unwrap();
    assert_eq!(h.backend.table_uploads.load(Ordering::Relaxed), 1);

    h.scene
        .modify(|s| s.set_instance_transform(0, Mat4::from_translation(Vec3::Y * 0.1)))
        .unwrap()
        .unwrap();
    h.frame().unwrap();
    assert_eq!(h.backend.table_uploads.load(Ordering::Relaxed), 2);
}

#[test]
fn test_scene_edit_during_frame_reuploads_next_frame() {
    let mut h = Harness::new(small_settings());
    let scene = Arc::clone(&h.scene);
    let edited = Arc::new(AtomicBool::new(false));
    let once = Arc::clone(&edited);
    *h.backend.on_intersection.lock() = Some(Box::new(move || {
        if !once.swap(true, Ordering::Relaxed) {
            scene.modify(|s| s.set_emission_mode(1, EmissionMode::Override(Vec3::splat(5.0))));
        }
    }));

    h.frame().unwrap();
    assert!(edited.load(Ordering::Relaxed));
    assert_eq!(h.backend.table_uploads.load(Ordering::Relaxed), 1);

    // The frame traced the revision it started with; the edit is picked up next.
    h.frame().unwrap();
    assert_eq!(h.backend.table_uploads.load(Ordering::Relaxed), 2);
    h.frame().unwrap();
    assert_eq!(h.backend.table_uploads.load(Ordering::Relaxed), 2);
}

#[test]
fn test_replaced_scene_releases_structures() {
    let mut h = Harness::new(small_settings());
    h.frame().unwrap();
    assert!(h.backend.released.lock().is_empty());

    let dyn_backend: Arc<dyn RayTracingBackend> = h.backend.clone();
    h.scene.set(floor_and_light(&BackendResourceFactory::new(dyn_backend)));
    let mut released = h.backend.released.lock().clone();
    released.sort_unstable();
    assert_eq!(released, vec![0, 1]);

    let report = h.frame().unwrap();
    assert_eq!(report.status, FrameStatus::Presented);
    assert_eq!(h.backend.table_uploads.load(Ordering::Relaxed), 2);
}

#[test]
fn test_failed_settings_frame_drops_its_timings() {
    let mut h = Harness::new(small_settings());
    h.frame().unwrap();

    // Nobody can run the resize: the frame fails before tracing.
    h.deferred.close();
    h.settings.update(|s| s.output_resolution = [16, 12]);
    assert!(matches!(h.frame(), Err(Error::QueueClosed)));

    h.deferred.reopen();
    h.frame().unwrap();
    assert_eq!(h.compositor.dimensions(), (16, 12));
    let stats = h.stats.last();
    assert_eq!(stats.id, 2);
    let applies = stats.timings.iter().filter(|(name, _)| *name == "apply_settings").count();
    assert_eq!(applies, 1);
}

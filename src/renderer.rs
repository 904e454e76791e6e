//! Public renderer: owns the frame worker thread and the shared control state.
//!
//! ```ignore
//! let backend: Arc<dyn RayTracingBackend> = Arc::new(CpuBackend::new());
//! let mut renderer = WaveFrontRenderer::new(Arc::clone(&backend), WaveFrontSettings::default())?;
//! let scene = cornell_box(&renderer.resources(), CornellOptions::default())?;
//! renderer.set_scene(scene);
//! renderer.start_rendering()?;
//! loop {
//!     renderer.perform_deferred_operations();
//!     if let Some(frame) = renderer.wait_for_frame(last, Duration::from_millis(16)) { /* show */ }
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::backend::{DenoiseBackend, NullDenoiser, NullUpscaler, RayTracingBackend, UpscaleBackend};
use crate::deferred::DeferredQueue;
use crate::output::{OutputCompositor, PresentedFrame};
use crate::scene::{BackendResourceFactory, Camera, Scene, SceneProvider, SharedScene};
use crate::settings::{SharedSettings, WaveFrontSettings};
use crate::util::{Error, Result};
use crate::wavefront::{
    FrameContext, FrameReport, FrameScheduler, FrameSnapshot, FrameStats, FrameStatus, SnapshotRecorder,
    StatsRecorder,
};

/// State shared between the control API and the frame worker.
struct Shared {
    settings: SharedSettings,
    scene: SharedScene,
    compositor: Arc<OutputCompositor>,
    deferred: DeferredQueue,
    snapshots: SnapshotRecorder,
    stats: StatsRecorder,
    stop: AtomicBool,
    last_report: Mutex<Option<FrameReport>>,
}

impl Shared {
    fn context(&self) -> FrameContext<'_> {
        FrameContext {
            settings: &self.settings,
            scene: &self.scene,
            compositor: &self.compositor,
            deferred: &self.deferred,
            snapshots: &self.snapshots,
            stats: &self.stats,
        }
    }
}

/// Wavefront path tracer with a dedicated frame thread.
///
/// The thread that calls [`perform_deferred_operations`](Self::perform_deferred_operations)
/// acts as the presentation context owner. It must keep draining while the
/// worker runs, or settings that resize the output will block the frame loop.
pub struct WaveFrontRenderer {
    shared: Arc<Shared>,
    backend: Arc<dyn RayTracingBackend>,
    /// Present while the worker is not running.
    scheduler: Option<FrameScheduler>,
    worker: Option<JoinHandle<FrameScheduler>>,
}

impl WaveFrontRenderer {
    pub fn new(backend: Arc<dyn RayTracingBackend>, settings: WaveFrontSettings) -> Result<Self> {
        Self::with_post_process(backend, settings, Box::new(NullDenoiser), Box::new(NullUpscaler))
    }

    pub fn with_post_process(
        backend: Arc<dyn RayTracingBackend>,
        settings: WaveFrontSettings,
        denoiser: Box<dyn DenoiseBackend>,
        upscaler: Box<dyn UpscaleBackend>,
    ) -> Result<Self> {
        let scheduler = FrameScheduler::with_post_process(Arc::clone(&backend), settings.clone(), denoiser, upscaler)?;
        let [w, h] = settings.output_resolution;
        Ok(Self {
            shared: Arc::new(Shared {
                compositor: Arc::new(OutputCompositor::new(w, h)),
                settings: SharedSettings::new(settings),
                scene: SharedScene::new(),
                deferred: DeferredQueue::new(),
                snapshots: SnapshotRecorder::new(),
                stats: StatsRecorder::new(),
                stop: AtomicBool::new(false),
                last_report: Mutex::new(None),
            }),
            backend,
            scheduler: Some(scheduler),
            worker: None,
        })
    }

    // ------------------------------------------------------------------------
    // Resources and scene
    // ------------------------------------------------------------------------

    /// Factory that registers geometry with this renderer's backend.
    pub fn resources(&self) -> BackendResourceFactory {
        BackendResourceFactory::new(Arc::clone(&self.backend))
    }

    pub fn backend(&self) -> &Arc<dyn RayTracingBackend> {
        &self.backend
    }

    /// Replace the scene. Takes effect at the next frame boundary.
    pub fn set_scene(&self, scene: Scene) {
        self.shared.scene.set(scene);
    }

    /// Edit the current scene. Returns `None` when no scene is set.
    pub fn update_scene<R>(&self, f: impl FnOnce(&mut Scene) -> R) -> Option<R> {
        self.shared.scene.modify(f)
    }

    pub fn camera(&self) -> Camera {
        self.shared.scene.camera()
    }

    pub fn set_camera(&self, camera: Camera) {
        self.shared.scene.set_camera(camera);
    }

    pub fn update_camera(&self, f: impl FnOnce(&mut Camera)) {
        self.shared.scene.update_camera(f);
    }

    // ------------------------------------------------------------------------
    // Frame loop
    // ------------------------------------------------------------------------

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Spawn the frame worker. No-op when already running.
    pub fn start_rendering(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        let Some(mut scheduler) = self.scheduler.take() else {
            return Err(Error::other("frame scheduler is missing"));
        };
        self.shared.stop.store(false, Ordering::Release);
        self.shared.deferred.reopen();

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("wavetrace-frame".into())
            .spawn(move || {
                tracing::info!("Frame worker started");
                let ctx = shared.context();
                while !shared.stop.load(Ordering::Acquire) {
                    match scheduler.trace_frame(&ctx) {
                        Ok(report) => {
                            let idle = report.status == FrameStatus::NoLights;
                            *shared.last_report.lock() = Some(report);
                            if idle {
                                thread::sleep(Duration::from_millis(5));
                            }
                        }
                        Err(Error::QueueClosed) => break,
                        Err(e) if e.is_frame_local() => tracing::warn!("Frame aborted: {}", e),
                        Err(e) => {
                            tracing::error!("Frame failed: {}", e);
                            thread::sleep(Duration::from_millis(10));
                        }
                    }
                }
                tracing::info!("Frame worker stopped after {} frames", scheduler.frame_index());
                scheduler
            });
        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                Ok(())
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Signal the worker, release it from any deferred wait and join it.
    pub fn stop_rendering(&mut self) -> Result<()> {
        let Some(handle) = self.worker.take() else {
            return Ok(());
        };
        self.shared.stop.store(true, Ordering::Release);
        self.shared.deferred.close();
        let joined = handle.join();
        self.shared.deferred.reopen();
        self.shared.stop.store(false, Ordering::Release);
        match joined {
            Ok(scheduler) => {
                self.scheduler = Some(scheduler);
                Ok(())
            }
            Err(_) => Err(Error::other("frame worker panicked")),
        }
    }

    /// Trace one frame on the calling thread. Fails while the worker runs.
    ///
    /// The calling thread becomes the context owner so deferred operations
    /// issued by the frame run inline.
    pub fn render_single_frame(&mut self) -> Result<FrameReport> {
        let Some(scheduler) = self.scheduler.as_mut() else {
            return Err(Error::other("cannot render a single frame while the worker is running"));
        };
        self.shared.deferred.bind_context_thread();
        let report = scheduler.trace_frame(&self.shared.context())?;
        *self.shared.last_report.lock() = Some(report.clone());
        Ok(report)
    }

    /// Run queued context-bound operations. Call from the presentation thread.
    pub fn perform_deferred_operations(&self) -> usize {
        self.shared.deferred.drain()
    }

    /// Like [`perform_deferred_operations`](Self::perform_deferred_operations),
    /// blocking up to `timeout` for work to arrive.
    pub fn perform_deferred_operations_timeout(&self, timeout: Duration) -> usize {
        self.shared.deferred.drain_timeout(timeout)
    }

    // ------------------------------------------------------------------------
    // Output
    // ------------------------------------------------------------------------

    /// Wait up to `timeout` for a frame newer than `last_seen`.
    pub fn wait_for_frame(&self, last_seen: u64, timeout: Duration) -> Option<PresentedFrame> {
        self.shared.compositor.wait_for_frame(last_seen, timeout)
    }

    /// RGBA8 pixels and dimensions of the presented frame.
    pub fn output_pixels(&self) -> PresentedFrame {
        self.shared.compositor.read_pixels()
    }

    pub fn last_frame_stats(&self) -> FrameStats {
        self.shared.stats.last()
    }

    pub fn last_frame_report(&self) -> Option<FrameReport> {
        self.shared.last_report.lock().clone()
    }

    pub fn begin_snapshot(&self) {
        self.shared.snapshots.begin_snapshot();
    }

    pub fn end_snapshot(&self) -> Option<FrameSnapshot> {
        self.shared.snapshots.end_snapshot()
    }

    // ------------------------------------------------------------------------
    // Settings (written to the intermediate copy, applied at the next frame)
    // ------------------------------------------------------------------------

    pub fn settings(&self) -> WaveFrontSettings {
        self.shared.settings.intermediate()
    }

    pub fn update_settings(&self, f: impl FnOnce(&mut WaveFrontSettings)) {
        self.shared.settings.update(f);
    }

    pub fn set_render_resolution(&self, width: u32, height: u32) {
        self.shared.settings.update(|s| s.render_resolution = [width, height]);
    }

    pub fn render_resolution(&self) -> (u32, u32) {
        let [w, h] = self.shared.settings.intermediate().render_resolution;
        (w, h)
    }

    pub fn set_output_resolution(&self, width: u32, height: u32) {
        self.shared.settings.update(|s| s.output_resolution = [width, height]);
    }

    pub fn output_resolution(&self) -> (u32, u32) {
        let [w, h] = self.shared.settings.intermediate().output_resolution;
        (w, h)
    }

    pub fn set_blend_mode(&self, enabled: bool) {
        self.shared.settings.update(|s| s.blend_output = enabled);
    }

    pub fn blend_mode(&self) -> bool {
        self.shared.settings.intermediate().blend_output
    }
}

impl Drop for WaveFrontRenderer {
    fn drop(&mut self) {
        if let Err(e) = self.stop_rendering() {
            tracing::error!("Stopping frame worker: {}", e);
        }
        // A joined worker has released its handle on the shared state.
        if !thread::panicking() {
            assert_eq!(
                Arc::strong_count(&self.shared),
                1,
                "renderer dropped while a frame worker still holds its state"
            );
        }
        // Table first, then the scene whose structures it references.
        if let Err(e) = self.backend.update_scene_table(&[]) {
            tracing::warn!("Clearing backend scene table: {}", e);
        }
        drop(self.shared.scene.clear());
    }
}

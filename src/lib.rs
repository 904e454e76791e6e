//! # wavetrace
//!
//! Wavefront path tracing pipeline with reservoir-based spatio-temporal light
//! resampling (ReSTIR).
//!
//! Each frame runs as a sequence of whole-screen stages (generate rays, trace,
//! extract surfaces, shade, resolve shadow rays, post process) that hand data to
//! each other through atomic append buffers. Ray tracing, denoising and
//! upscaling are consumed through narrow backend traits.
//!
//! ## Modules
//!
//! - [`util`] - Errors, math and sampling helpers
//! - [`settings`] - Frame and ReSTIR settings, double-buffered for live edits
//! - [`buffers`] - Atomic append buffers and the per-frame ray buffers
//! - [`wavefront`] - Stage records, kernels and the frame scheduler
//! - [`restir`] - Reservoirs, light bags and the ReSTIR sampler
//! - [`backend`] - Backend traits and the CPU reference tracer
//! - [`scene`] - Scene arena, camera and resource factory
//! - [`deferred`] - Operations bound to the presentation thread
//! - [`output`] - Double-buffered presentation target
//! - [`renderer`] - Worker thread and public control API
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use wavetrace::prelude::*;
//!
//! let backend: Arc<dyn RayTracingBackend> = Arc::new(CpuBackend::new());
//! let mut renderer = WaveFrontRenderer::new(backend, WaveFrontSettings::default())?;
//! let scene = cornell_box(&renderer.resources(), CornellOptions::default())?;
//! renderer.set_scene(scene);
//! let report = renderer.render_single_frame()?;
//! let frame = renderer.output_pixels();
//! ```

pub mod util;
pub mod logging;
pub mod settings;
pub mod buffers;
pub mod wavefront;
pub mod restir;
pub mod backend;
pub mod scene;
pub mod deferred;
pub mod output;
pub mod renderer;

// Re-export commonly used types
pub use util::{Error, Result};
pub use settings::{ReSTIRSettings, SharedSettings, WaveFrontSettings};
pub use renderer::WaveFrontRenderer;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::util::{Error, Result};
    pub use crate::settings::{ReSTIRSettings, WaveFrontSettings};
    pub use crate::backend::cpu::CpuBackend;
    pub use crate::backend::{DenoiseBackend, RayTracingBackend, UpscaleBackend};
    pub use crate::scene::cornell::{cornell_box, CornellOptions};
    pub use crate::scene::{Camera, EmissionMode, ResourceFactory, Scene};
    pub use crate::wavefront::{FrameReport, FrameStatus};
    pub use crate::renderer::WaveFrontRenderer;
}

//! Inter-stage buffers of the wavefront pipeline.
//!
//! - [`AtomicBuffer`] - fixed-capacity append buffer with an atomic cursor
//! - [`RayBuffers`] - every buffer a frame in flight needs
//! - `GpuAtomicBuffer` (feature `gpu`) - the same contract on a wgpu storage buffer,
//!   for GPU backends (unused by the CPU backend)

mod atomic;
mod ray_buffers;

#[cfg(feature = "gpu")]
mod gpu;

pub use atomic::AtomicBuffer;
pub use ray_buffers::{BufferLayout, RayBuffers, MAX_VOLUMES_PER_RAY, SCRATCH_SURFACE};

#[cfg(feature = "gpu")]
pub use gpu::{GpuAtomicBuffer, APPEND_WGSL};

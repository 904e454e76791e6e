//! Wavefront path tracing: per-stage records, kernels and the frame scheduler.
//!
//! - [`data`] - `Pod` records exchanged between stages
//! - [`kernels`] - ray generation, surface extraction, shading, post process
//! - [`FrameScheduler`] - runs one frame through every stage
//! - [`StatsRecorder`] / [`SnapshotRecorder`] - timings and diagnostic captures

pub mod data;
pub mod kernels;
pub mod motion;
mod scheduler;
mod snapshot;
mod stats;

pub use motion::MotionVectors;
pub use scheduler::{FrameContext, FrameReport, FrameScheduler, FrameStatus};
pub use snapshot::{FrameSnapshot, ImageBuffer, SnapshotRecorder};
pub use stats::{FrameStats, StatsRecorder};

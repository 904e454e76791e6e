//! On-demand diagnostic captures of intermediate frame buffers.

use std::sync::atomic::{AtomicBool, Ordering};

use glam::Vec3;
use parking_lot::Mutex;

/// A named image at render resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBuffer {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub data: Vec<Vec3>,
}

/// Buffers captured during one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameSnapshot {
    pub frame_index: u64,
    pub buffers: Vec<ImageBuffer>,
}

impl FrameSnapshot {
    pub fn buffer(&self, name: &str) -> Option<&ImageBuffer> {
        self.buffers.iter().find(|b| b.name == name)
    }
}

#[derive(Debug, Default)]
enum State {
    #[default]
    Idle,
    /// Requested, waiting for the next frame to start.
    Armed,
    Recording(FrameSnapshot),
    Complete(FrameSnapshot),
}

/// Snapshot state machine shared by the control API and the worker.
///
/// `begin_snapshot` arms the recorder; the next frame that starts records every
/// buffer offered to it; `end_snapshot` hands the capture out and returns the
/// recorder to idle, after which `record` is a no-op again.
#[derive(Debug, Default)]
pub struct SnapshotRecorder {
    state: Mutex<State>,
    recording: AtomicBool,
}

impl SnapshotRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_snapshot(&self) {
        let mut state = self.state.lock();
        if matches!(*state, State::Idle) {
            *state = State::Armed;
        }
    }

    /// Take the capture and reset to idle. `None` if no frame finished recording.
    pub fn end_snapshot(&self) -> Option<FrameSnapshot> {
        let mut state = self.state.lock();
        self.recording.store(false, Ordering::Release);
        match std::mem::take(&mut *state) {
            State::Complete(snapshot) => Some(snapshot),
            _ => None,
        }
    }

    /// Cheap check the scheduler uses before building diagnostic images.
    #[inline]
    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Acquire)
    }

    pub fn is_complete(&self) -> bool {
        matches!(*self.state.lock(), State::Complete(_))
    }

    pub(crate) fn frame_started(&self, frame_index: u64) {
        let mut state = self.state.lock();
        if matches!(*state, State::Armed) {
            *state = State::Recording(FrameSnapshot {
                frame_index,
                buffers: Vec::new(),
            });
            self.recording.store(true, Ordering::Release);
        }
    }

    pub(crate) fn record(&self, name: &str, width: u32, height: u32, data: Vec<Vec3>) {
        if !self.is_recording() {
            return;
        }
        if let State::Recording(snapshot) = &mut *self.state.lock() {
            snapshot.buffers.push(ImageBuffer {
                name: name.to_string(),
                width,
                height,
                data,
            });
        }
    }

    /// Finish the recording frame; an aborted frame re-arms instead.
    pub(crate) fn frame_finished(&self, completed: bool) {
        let mut state = self.state.lock();
        if !matches!(*state, State::Recording(_)) {
            return;
        }
        self.recording.store(false, Ordering::Release);
        if let State::Recording(snapshot) = std::mem::take(&mut *state) {
            *state = if completed {
                tracing::debug!(
                    "Captured snapshot of frame {} ({} buffers)",
                    snapshot.frame_index,
                    snapshot.buffers.len()
                );
                State::Complete(snapshot)
            } else {
                State::Armed
            };
        }
    }
}

//! Double-buffered presentation target.
//!
//! The frame worker copies each finished image into the back buffer and swaps
//! it to the front under one mutex, so a reader never sees a partially written
//! frame. Readers block on a condition variable for frames newer than the one
//! they last saw.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::util::{Error, Result};

/// A presented RGBA8 image.
#[derive(Debug, Clone, PartialEq)]
pub struct PresentedFrame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
    /// Increments with every `present`; 0 means nothing has been presented.
    pub frame_id: u64,
}

struct Target {
    width: u32,
    height: u32,
    front: Vec<u8>,
    back: Vec<u8>,
    frame_id: u64,
}

pub struct OutputCompositor {
    target: Mutex<Target>,
    presented: Condvar,
}

impl OutputCompositor {
    pub fn new(width: u32, height: u32) -> Self {
        let len = width as usize * height as usize * 4;
        Self {
            target: Mutex::new(Target {
                width,
                height,
                front: vec![0; len],
                back: vec![0; len],
                frame_id: 0,
            }),
            presented: Condvar::new(),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        let t = self.target.lock();
        (t.width, t.height)
    }

    pub fn frame_id(&self) -> u64 {
        self.target.lock().frame_id
    }

    /// Copy `pixels` in and make them the visible frame.
    pub fn present(&self, pixels: &[u8], width: u32, height: u32) -> Result<u64> {
        let mut t = self.target.lock();
        if (width, height) != (t.width, t.height) || pixels.len() != t.back.len() {
            return Err(Error::DimensionMismatch {
                expected: (t.width, t.height),
                actual: (width, height),
            });
        }
        t.back.copy_from_slice(pixels);
        let t = &mut *t;
        std::mem::swap(&mut t.front, &mut t.back);
        t.frame_id += 1;
        let id = t.frame_id;
        self.presented.notify_all();
        Ok(id)
    }

    /// Reallocate both buffers. Only called from the deferred queue.
    pub fn resize(&self, width: u32, height: u32) {
        let mut t = self.target.lock();
        if (t.width, t.height) == (width, height) {
            return;
        }
        tracing::debug!("Output resized {}x{} -> {}x{}", t.width, t.height, width, height);
        let len = width as usize * height as usize * 4;
        t.width = width;
        t.height = height;
        t.front = vec![0; len];
        t.back = vec![0; len];
    }

    /// Copy of the front buffer.
    pub fn read_pixels(&self) -> PresentedFrame {
        let t = self.target.lock();
        PresentedFrame {
            width: t.width,
            height: t.height,
            pixels: t.front.clone(),
            frame_id: t.frame_id,
        }
    }

    /// Wait up to `timeout` for a frame newer than `last_seen`.
    pub fn wait_for_frame(&self, last_seen: u64, timeout: Duration) -> Option<PresentedFrame> {
        let mut t = self.target.lock();
        if t.frame_id <= last_seen {
            let result = self
                .presented
                .wait_while_for(&mut t, |t| t.frame_id <= last_seen, timeout);
            if result.timed_out() && t.frame_id <= last_seen {
                return None;
            }
        }
        Some(PresentedFrame {
            width: t.width,
            height: t.height,
            pixels: t.front.clone(),
            frame_id: t.frame_id,
        })
    }
}

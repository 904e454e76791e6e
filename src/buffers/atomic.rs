//! Fixed-capacity append buffer with an atomic write cursor.
//!
//! Producers share the buffer (`&self`) and claim slots with a single
//! `fetch_add`. Everything that observes the contents or the counter takes
//! `&mut self`, so reads can only happen once every producer has finished.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytemuck::Pod;
use rayon::prelude::*;

use crate::util::{Error, Result};

/// Append-only buffer of `T` with a shared atomic counter.
pub struct AtomicBuffer<T> {
    label: &'static str,
    data: Box<[UnsafeCell<T>]>,
    counter: AtomicUsize,
    overflow: AtomicUsize,
}

// Each claimed index is unique per reset, so concurrent appends never alias a slot.
// Shared access only ever writes through claimed slots.
unsafe impl<T: Send> Sync for AtomicBuffer<T> {}

impl<T: Pod + Send> AtomicBuffer<T> {
    /// Allocate `capacity` zeroed slots with the counter at zero.
    pub fn new(label: &'static str, capacity: usize) -> Self {
        Self {
            label,
            data: zeroed_slots(capacity),
            counter: AtomicUsize::new(0),
            overflow: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn label(&self) -> &'static str {
        self.label
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Claim a slot and write `item` into it.
    ///
    /// Returns the slot index, or `None` when the buffer is full. Dropped writes
    /// are counted and never touch memory outside the buffer.
    #[inline]
    pub fn append(&self, item: T) -> Option<usize> {
        let index = self.counter.fetch_add(1, Ordering::AcqRel);
        if index >= self.data.len() {
            self.overflow.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        // SAFETY: `index` was claimed exclusively by this call.
        unsafe {
            *self.data[index].get() = item;
        }
        Some(index)
    }

    /// Zero the counter and the overflow count without reallocating.
    pub fn reset(&mut self) {
        *self.counter.get_mut() = 0;
        *self.overflow.get_mut() = 0;
    }

    /// Number of valid items, clamped to capacity.
    pub fn count(&mut self) -> usize {
        (*self.counter.get_mut()).min(self.data.len())
    }

    /// Writes dropped since the last reset.
    pub fn overflow_count(&mut self) -> usize {
        *self.overflow.get_mut()
    }

    /// Turn a non-zero overflow count into [`Error::ResourceOverflow`].
    pub fn check_overflow(&mut self) -> Result<()> {
        match self.overflow_count() {
            0 => Ok(()),
            dropped => Err(Error::ResourceOverflow {
                buffer: self.label,
                capacity: self.capacity(),
                dropped,
            }),
        }
    }

    /// The appended items.
    pub fn as_slice(&mut self) -> &[T] {
        let count = self.count();
        // SAFETY: `UnsafeCell<T>` has the same layout as `T`, and `&mut self`
        // guarantees no producer is writing.
        unsafe { std::slice::from_raw_parts(self.data.as_ptr() as *const T, count) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        let count = self.count();
        // SAFETY: as above, with exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.data.as_mut_ptr() as *mut T, count) }
    }

    /// Fill the first `count` slots in parallel and set the counter to `count`.
    ///
    /// Used for dense passes such as primary ray generation where every slot
    /// index is known up front.
    pub fn fill_par<F>(&mut self, count: usize, f: F)
    where
        F: Fn(usize) -> T + Sync + Send,
    {
        let capacity = self.capacity();
        let written = count.min(capacity);
        self.data[..written]
            .par_iter_mut()
            .enumerate()
            .for_each(|(i, slot)| *slot.get_mut() = f(i));
        *self.counter.get_mut() = written;
        *self.overflow.get_mut() = count - written;
    }

    /// Reallocate to `capacity` if it differs, resetting the counter.
    ///
    /// Returns true if a reallocation happened.
    pub fn resize(&mut self, capacity: usize) -> bool {
        self.reset();
        if capacity == self.capacity() {
            return false;
        }
        tracing::debug!(buffer = self.label, from = self.capacity(), to = capacity, "resize");
        self.data = zeroed_slots(capacity);
        true
    }

    /// Grow (never shrink) to hold at least `capacity` items.
    pub fn ensure_capacity(&mut self, capacity: usize) -> bool {
        if capacity > self.capacity() {
            self.resize(capacity)
        } else {
            self.reset();
            false
        }
    }

    /// Bytes held by the storage.
    pub fn size_in_bytes(&self) -> usize {
        self.capacity() * std::mem::size_of::<T>()
    }
}

impl<T: Pod + Send> std::fmt::Debug for AtomicBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomicBuffer")
            .field("label", &self.label)
            .field("capacity", &self.capacity())
            .field("counter", &self.counter.load(Ordering::Relaxed))
            .finish()
    }
}

fn zeroed_slots<T: Pod>(capacity: usize) -> Box<[UnsafeCell<T>]> {
    (0..capacity).map(|_| UnsafeCell::new(T::zeroed())).collect()
}

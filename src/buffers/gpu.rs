//! GPU storage-buffer rendition of the append buffer.
//!
//! A building block for a wgpu [`RayTracingBackend`](crate::backend::RayTracingBackend).
//! The crate ships only the CPU backend, so the frame loop never allocates
//! these; they exist for backends that keep ray batches in device memory.
//!
//! Layout matches [`AtomicBuffer`](super::AtomicBuffer): a storage buffer of
//! `T` plus a separate `atomic<u32>` counter. Kernels append with
//! [`APPEND_WGSL`]; the host resets the counter with `queue.write_buffer`
//! and reads it back through a staging copy once the submission completed.

use std::marker::PhantomData;

use bytemuck::Pod;

use crate::util::{Error, Result};

/// WGSL helper matching the host layout. `T` is substituted by the kernel.
pub const APPEND_WGSL: &str = r#"
fn append_item(item: T) -> bool {
    let index = atomicAdd(&counter, 1u);
    if (index >= arrayLength(&items)) {
        return false;
    }
    items[index] = item;
    return true;
}
"#;

/// Fixed-capacity append buffer living in GPU memory.
pub struct GpuAtomicBuffer<T> {
    label: &'static str,
    capacity: usize,
    items: wgpu::Buffer,
    counter: wgpu::Buffer,
    staging: wgpu::Buffer,
    _marker: PhantomData<T>,
}

impl<T: Pod> GpuAtomicBuffer<T> {
    pub fn new(device: &wgpu::Device, label: &'static str, capacity: usize) -> Self {
        let item_bytes = (capacity.max(1) * std::mem::size_of::<T>()) as u64;
        let items = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: item_bytes,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let counter = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("append_counter"),
            size: 4,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("append_staging"),
            size: item_bytes.max(4),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            label,
            capacity,
            items,
            counter,
            staging,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Zero the counter. Takes effect for the next submission.
    pub fn reset(&self, queue: &wgpu::Queue) {
        queue.write_buffer(&self.counter, 0, bytemuck::bytes_of(&0u32));
    }

    /// Upload `items` and set the counter to their number (clamped to capacity).
    pub fn upload(&self, queue: &wgpu::Queue, items: &[T]) {
        let n = items.len().min(self.capacity);
        queue.write_buffer(&self.items, 0, bytemuck::cast_slice(&items[..n]));
        queue.write_buffer(&self.counter, 0, bytemuck::bytes_of(&(n as u32)));
    }

    /// Bind group entries: items at `binding`, counter at `binding + 1`.
    pub fn bind_entries(&self, binding: u32) -> [wgpu::BindGroupEntry<'_>; 2] {
        [
            wgpu::BindGroupEntry {
                binding,
                resource: self.items.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: binding + 1,
                resource: self.counter.as_entire_binding(),
            },
        ]
    }

    /// Read the counter after all submitted work completed, clamped to capacity.
    ///
    /// Blocks on `device.poll`. `&mut self` keeps the host from reading while
    /// it is still recording appends against this buffer.
    pub fn count(&mut self, device: &wgpu::Device, queue: &wgpu::Queue) -> Result<usize> {
        let raw = self.read_raw_counter(device, queue)?;
        Ok((raw as usize).min(self.capacity))
    }

    /// Appends dropped because the buffer was full.
    pub fn overflow_count(&mut self, device: &wgpu::Device, queue: &wgpu::Queue) -> Result<usize> {
        let raw = self.read_raw_counter(device, queue)? as usize;
        Ok(raw.saturating_sub(self.capacity))
    }

    /// Download the appended items.
    pub fn read_items(&mut self, device: &wgpu::Device, queue: &wgpu::Queue) -> Result<Vec<T>> {
        let count = self.count(device, queue)?;
        if count == 0 {
            return Ok(Vec::new());
        }
        let bytes = (count * std::mem::size_of::<T>()) as u64;
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("append_readback"),
        });
        encoder.copy_buffer_to_buffer(&self.items, 0, &self.staging, 0, bytes);
        queue.submit(Some(encoder.finish()));

        let slice = self.staging.slice(..bytes);
        slice.map_async(wgpu::MapMode::Read, |_| {});
        device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| Error::backend("wgpu", format!("{}: poll failed: {e}", self.label)))?;
        let items = {
            let data = slice.get_mapped_range();
            bytemuck::pod_collect_to_vec::<u8, T>(&data)
        };
        self.staging.unmap();
        Ok(items)
    }

    fn read_raw_counter(&mut self, device: &wgpu::Device, queue: &wgpu::Queue) -> Result<u32> {
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("append_counter_readback"),
        });
        encoder.copy_buffer_to_buffer(&self.counter, 0, &self.staging, 0, 4);
        queue.submit(Some(encoder.finish()));

        let slice = self.staging.slice(..4);
        slice.map_async(wgpu::MapMode::Read, |_| {});
        device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| Error::backend("wgpu", format!("{}: poll failed: {e}", self.label)))?;
        let value = {
            let data = slice.get_mapped_range();
            *bytemuck::from_bytes::<u32>(&data[..4])
        };
        self.staging.unmap();
        Ok(value)
    }
}

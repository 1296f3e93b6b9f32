//! Rotating pool of staging buffers
//!
//! Each write claims an idle entry and marks it busy until the command buffer
//! that reads it completes. When every entry is busy and the pool is at its
//! cap, a one-off buffer is allocated and handed to the command buffer to keep
//! alive.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sluice_core::memory::{AllocationTracker, BufferCategory};

use crate::device::{CommandBuffer, DeviceBuffer, GraphicsDevice, ResourceOptions};
use crate::ring::Allocation;
use crate::tracked::TrackedResource;

struct PoolEntry<B: DeviceBuffer> {
    resource: TrackedResource<B>,
    capacity: usize,
    in_flight: Arc<AtomicBool>,
}

pub struct StagingPool<D: GraphicsDevice> {
    device: Arc<D>,
    tracker: Arc<AllocationTracker>,
    entry_size: usize,
    max_entries: usize,
    entries: Vec<PoolEntry<D::Buffer>>,
    // Where the next search starts, so claims rotate through the entries.
    next: usize,
}

impl<D: GraphicsDevice> StagingPool<D> {
    pub fn new(
        device: Arc<D>,
        tracker: Arc<AllocationTracker>,
        entry_size: usize,
        max_entries: usize,
    ) -> Self {
        Self {
            device,
            tracker,
            entry_size,
            max_entries,
            entries: Vec::with_capacity(max_entries),
            next: 0,
        }
    }

    /// Claim `size` bytes of CPU-writable staging memory for `cmd_buffer`.
    pub fn acquire<C>(&mut self, cmd_buffer: &C, size: usize) -> Allocation<D::Buffer>
    where
        C: CommandBuffer<Buffer = D::Buffer>,
    {
        let index = match self.find_idle(size) {
            Some(index) => index,
            None if self.entries.len() < self.max_entries => self.grow(size),
            None => return self.one_off(cmd_buffer, size),
        };

        let entry = &self.entries[index];
        entry.in_flight.store(true, Ordering::Relaxed);
        let in_flight = Arc::clone(&entry.in_flight);
        cmd_buffer.on_completion(Box::new(move || {
            in_flight.store(false, Ordering::Release);
        }));
        self.next = (index + 1) % self.entries.len();

        match entry.resource.get() {
            Some(buffer) => Allocation {
                buffer: buffer.clone(),
                offset: 0,
            },
            None => unreachable!("pool entries are always allocated"),
        }
    }

    /// Entries currently owned by the pool.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries claimed by command buffers that have not completed.
    pub fn in_flight(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.in_flight.load(Ordering::Acquire))
            .count()
    }

    fn find_idle(&self, size: usize) -> Option<usize> {
        let len = self.entries.len();
        (0..len).map(|i| (self.next + i) % len).find(|&i| {
            let entry = &self.entries[i];
            entry.capacity >= size && !entry.in_flight.load(Ordering::Acquire)
        })
    }

    fn grow(&mut self, size: usize) -> usize {
        let capacity = self.entry_size.max(size);
        let resource = TrackedResource::allocate(
            self.device.as_ref(),
            capacity,
            ResourceOptions::UPLOAD,
            BufferCategory::Staging,
            &self.tracker,
        );
        self.entries.push(PoolEntry {
            resource,
            capacity,
            in_flight: Arc::new(AtomicBool::new(false)),
        });
        tracing::debug!(
            capacity,
            entries = self.entries.len(),
            "staging pool grew"
        );
        self.entries.len() - 1
    }

    fn one_off<C>(&self, cmd_buffer: &C, size: usize) -> Allocation<D::Buffer>
    where
        C: CommandBuffer<Buffer = D::Buffer>,
    {
        tracing::debug!(size, "staging pool exhausted, allocating one-off buffer");
        let resource = TrackedResource::allocate(
            self.device.as_ref(),
            size,
            ResourceOptions::UPLOAD,
            BufferCategory::Staging,
            &self.tracker,
        );
        let Some(buffer) = resource.get().cloned() else {
            unreachable!("freshly allocated staging buffer is empty");
        };
        cmd_buffer.on_completion(Box::new(move || drop(resource)));
        Allocation { buffer, offset: 0 }
    }
}

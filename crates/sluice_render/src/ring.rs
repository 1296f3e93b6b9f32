//! Ring allocator over a single device buffer
//!
//! The buffer is split into `slot_count` slots of `slot_size` bytes. Each new
//! allocation claims the next slot and hands the command buffer a completion
//! handler that releases it once the GPU is done. When every slot is still in
//! flight the allocator falls back to a one-off overflow buffer instead of
//! waiting.
//!
//! All methods must be called from the backend thread. Completion handlers
//! only touch the shared occupancy counter.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use sluice_core::memory::{align_up, AllocationTracker, BufferCategory};

use crate::caps::CONSTANT_BUFFER_OFFSET_ALIGNMENT;
use crate::device::{CommandBuffer, DeviceBuffer, GraphicsDevice, ResourceOptions};
use crate::tracked::TrackedResource;

/// Size and alignment requirement of the data placed in one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLayout {
    pub size: usize,
    pub align: usize,
}

impl BufferLayout {
    pub const fn new(size: usize, align: usize) -> Self {
        Self { size, align }
    }
}

/// A buffer and the byte offset the caller's data starts at.
#[derive(Debug, Clone)]
pub struct Allocation<B> {
    pub buffer: B,
    pub offset: usize,
}

/// Construction parameters for a [`RingAllocator`].
#[derive(Debug, Clone, Copy)]
pub struct RingDescriptor {
    pub options: ResourceOptions,
    pub layout: BufferLayout,
    pub slot_count: usize,
    pub constant_alignment: usize,
}

impl RingDescriptor {
    /// Shared upload memory, platform constant-buffer alignment.
    pub fn new(layout: BufferLayout, slot_count: usize) -> Self {
        Self {
            options: ResourceOptions::UPLOAD,
            layout,
            slot_count,
            constant_alignment: CONSTANT_BUFFER_OFFSET_ALIGNMENT,
        }
    }

    pub fn with_options(mut self, options: ResourceOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_constant_alignment(mut self, constant_alignment: usize) -> Self {
        self.constant_alignment = constant_alignment;
        self
    }
}

/// Bytes one slot needs so that `layout` fits and every slot offset is a
/// valid constant-buffer offset. Never smaller than `layout.align`.
///
/// # Panics
///
/// If either alignment is not a power of two.
pub fn compute_slot_size(layout: BufferLayout, constant_alignment: usize) -> usize {
    let size = align_up(layout.size, layout.align).max(layout.align);
    align_up(size, constant_alignment)
}

/// Sub-allocates fixed-size slots of one device buffer, reclaiming them as
/// command buffers complete.
pub struct RingAllocator<D: GraphicsDevice> {
    device: Arc<D>,
    tracker: Arc<AllocationTracker>,
    // Slot handlers hold clones, so the memory stays counted while in flight.
    buffer: Arc<TrackedResource<D::Buffer>>,
    overflow: Option<Arc<TrackedResource<D::Buffer>>>,
    options: ResourceOptions,
    constant_alignment: usize,
    slot_size: usize,
    slot_count: usize,
    current_slot: usize,
    // Shared with completion handlers, which only ever hold a `Weak`.
    occupied_slots: Arc<AtomicUsize>,
}

impl<D: GraphicsDevice> RingAllocator<D> {
    /// Allocate the ring buffer up front.
    ///
    /// # Panics
    ///
    /// If `slot_count` is zero, an alignment is not a power of two, or the
    /// device is out of memory.
    pub fn new(device: Arc<D>, tracker: Arc<AllocationTracker>, desc: RingDescriptor) -> Self {
        assert!(desc.slot_count > 0, "ring allocator needs at least one slot");
        let slot_size = compute_slot_size(desc.layout, desc.constant_alignment);
        let Some(length) = slot_size.checked_mul(desc.slot_count) else {
            tracing::error!(slot_size, slot_count = desc.slot_count, "ring size overflows");
            panic!(
                "ring of {} slots of {slot_size} bytes overflows usize",
                desc.slot_count
            );
        };
        let buffer = TrackedResource::allocate(
            device.as_ref(),
            length,
            desc.options,
            BufferCategory::Ring,
            &tracker,
        );
        tracing::debug!(
            slot_size,
            slot_count = desc.slot_count,
            "created ring allocator"
        );

        Self {
            device,
            tracker,
            buffer: Arc::new(buffer),
            overflow: None,
            options: desc.options,
            constant_alignment: desc.constant_alignment,
            slot_size,
            slot_count: desc.slot_count,
            current_slot: 0,
            occupied_slots: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Claim a fresh allocation for work recorded on `cmd_buffer`.
    ///
    /// The slot is released when `cmd_buffer` completes. If no slot is free,
    /// returns a one-off overflow buffer that `cmd_buffer` keeps alive.
    pub fn create_new_allocation<C>(&mut self, cmd_buffer: &C) -> Allocation<D::Buffer>
    where
        C: CommandBuffer<Buffer = D::Buffer>,
    {
        let occupied = self.occupied_slots.load(Ordering::Relaxed);
        debug_assert!(occupied <= self.slot_count);

        if occupied == self.slot_count {
            let overflow = Arc::new(TrackedResource::allocate(
                self.device.as_ref(),
                self.slot_size,
                self.options,
                BufferCategory::Ring,
                &self.tracker,
            ));
            // The command buffer holds the overflow buffer until the GPU is
            // done with it, whatever happens to our reference.
            let retained = Arc::clone(&overflow);
            cmd_buffer.on_completion(Box::new(move || drop(retained)));

            let Some(buffer) = overflow.get().cloned() else {
                unreachable!("freshly allocated overflow buffer is empty");
            };
            tracing::trace!(
                slot_size = self.slot_size,
                id = ?buffer.id(),
                "ring full, using overflow buffer"
            );
            self.overflow = Some(overflow);
            return Allocation { buffer, offset: 0 };
        }

        self.current_slot = (self.current_slot + 1) % self.slot_count;
        self.occupied_slots.fetch_add(1, Ordering::Relaxed);

        if self.overflow.take().is_some() {
            tracing::trace!("ring slot available again, released overflow buffer");
        }

        // The allocator may be gone by the time the GPU finishes.
        let slots = Arc::downgrade(&self.occupied_slots);
        let storage = Arc::clone(&self.buffer);
        cmd_buffer.on_completion(Box::new(move || {
            if let Some(slots) = slots.upgrade() {
                slots.fetch_sub(1, Ordering::Relaxed);
            }
            drop(storage);
        }));

        self.current_allocation()
    }

    /// The most recent allocation, without claiming anything.
    pub fn current_allocation(&self) -> Allocation<D::Buffer> {
        if let Some(buffer) = self.overflow.as_ref().and_then(|o| o.get()) {
            return Allocation {
                buffer: buffer.clone(),
                offset: 0,
            };
        }
        Allocation {
            buffer: self.ring_buffer().clone(),
            offset: self.current_slot * self.slot_size,
        }
    }

    /// Whether data with `layout` fits in one slot.
    pub fn can_accommodate(&self, layout: BufferLayout) -> bool {
        self.slot_size >= compute_slot_size(layout, self.constant_alignment)
    }

    pub fn ring_buffer(&self) -> &D::Buffer {
        match self.buffer.get() {
            Some(buffer) => buffer,
            None => unreachable!("ring buffer is allocated at construction"),
        }
    }

    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// Slots claimed by command buffers that have not completed yet.
    pub fn occupied_slots(&self) -> usize {
        self.occupied_slots.load(Ordering::Relaxed)
    }

    pub fn has_overflow(&self) -> bool {
        self.overflow.is_some()
    }
}

//! Upload context shared by all buffers of one device

use std::sync::Arc;

use sluice_core::memory::AllocationTracker;
use sluice_core::settings::UploadSettings;

use crate::caps::{probe_capabilities, DeviceCapabilities};
use crate::device::{CommandBuffer, GraphicsDevice};
use crate::pool::StagingPool;
use crate::ring::{Allocation, BufferLayout, RingAllocator, RingDescriptor};

/// Staging writes are plain byte copies; 4 bytes keeps GPU copies legal.
const STAGING_ALIGNMENT: usize = 4;
/// Smallest slot the staging ring is ever built with.
const MIN_STAGING_SLOT_SIZE: usize = 256;

/// Device, tracker and upload machinery used by [`crate::Buffer`].
///
/// Owned by the backend thread.
pub struct BufferContext<D: GraphicsDevice> {
    device: Arc<D>,
    tracker: Arc<AllocationTracker>,
    caps: DeviceCapabilities,
    settings: UploadSettings,
    pool: StagingPool<D>,
    staging_ring: Option<RingAllocator<D>>,
}

impl<D: GraphicsDevice> BufferContext<D> {
    pub fn new(device: Arc<D>, tracker: Arc<AllocationTracker>, settings: &UploadSettings) -> Self {
        let mut caps = probe_capabilities();
        if let Some(alignment) = settings.constant_buffer_alignment {
            caps = caps.with_constant_buffer_offset_alignment(alignment);
        }
        let pool = StagingPool::new(
            Arc::clone(&device),
            Arc::clone(&tracker),
            settings.pool_entry_size,
            settings.pool_max_entries,
        );
        tracing::debug!(
            device_class = ?caps.device_class,
            constant_alignment = caps.constant_buffer_offset_alignment,
            "created buffer context"
        );

        Self {
            device,
            tracker,
            caps,
            settings: settings.clone(),
            pool,
            staging_ring: None,
        }
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    pub fn tracker(&self) -> &Arc<AllocationTracker> {
        &self.tracker
    }

    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.caps
    }

    pub fn settings(&self) -> &UploadSettings {
        &self.settings
    }

    pub fn staging_pool(&self) -> &StagingPool<D> {
        &self.pool
    }

    pub fn staging_ring(&self) -> Option<&RingAllocator<D>> {
        self.staging_ring.as_ref()
    }

    /// Staging memory from the rotating pool.
    pub fn pool_allocation<C>(&mut self, cmd_buffer: &C, size: usize) -> Allocation<D::Buffer>
    where
        C: CommandBuffer<Buffer = D::Buffer>,
    {
        self.pool.acquire(cmd_buffer, size)
    }

    /// Staging memory from the ring, rebuilding it if `size` does not fit a slot.
    pub fn ring_allocation<C>(&mut self, cmd_buffer: &C, size: usize) -> Allocation<D::Buffer>
    where
        C: CommandBuffer<Buffer = D::Buffer>,
    {
        let layout = BufferLayout::new(size, STAGING_ALIGNMENT);
        let fits = self
            .staging_ring
            .as_ref()
            .is_some_and(|ring| ring.can_accommodate(layout));
        if !fits {
            // In-flight slots of the old ring keep its memory alive and counted.
            let ring = self.build_staging_ring(size);
            self.staging_ring = Some(ring);
        }

        match self.staging_ring.as_mut() {
            Some(ring) => ring.create_new_allocation(cmd_buffer),
            None => unreachable!("staging ring was just built"),
        }
    }

    fn build_staging_ring(&self, size: usize) -> RingAllocator<D> {
        let Some(slot_size) = size.checked_next_power_of_two() else {
            tracing::error!(requested = size, "staging write too large for a ring slot");
            panic!("staging ring slot for {size} bytes overflows usize");
        };
        let slot_size = slot_size.max(MIN_STAGING_SLOT_SIZE);
        tracing::debug!(
            requested = size,
            slot_size,
            slot_count = self.settings.staging_ring_slot_count,
            "building staging ring"
        );
        let desc = RingDescriptor::new(
            BufferLayout::new(slot_size, STAGING_ALIGNMENT),
            self.settings.staging_ring_slot_count,
        )
        .with_constant_alignment(self.caps.constant_buffer_offset_alignment);
        RingAllocator::new(Arc::clone(&self.device), Arc::clone(&self.tracker), desc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceBuffer;
    use crate::headless::{HeadlessCommandBuffer, HeadlessDevice};
    use sluice_core::memory::BufferCategory;

    fn context(settings: UploadSettings) -> BufferContext<HeadlessDevice> {
        BufferContext::new(
            Arc::new(HeadlessDevice::new()),
            Arc::new(AllocationTracker::default()),
            &settings,
        )
    }

    #[test]
    fn test_staging_ring_is_built_lazily_and_grows() {
        let mut ctx = context(UploadSettings::default());
        assert!(ctx.staging_ring().is_none());

        let cmd = HeadlessCommandBuffer::new();
        let small = ctx.ring_allocation(&cmd, 100);
        let small_slot = ctx.staging_ring().unwrap().slot_size();
        assert!(small_slot >= 256);

        ctx.ring_allocation(&cmd, 200);
        assert_eq!(ctx.staging_ring().unwrap().slot_size(), small_slot);

        let large = ctx.ring_allocation(&cmd, 5000);
        assert!(ctx.staging_ring().unwrap().slot_size() >= 5000);
        assert!(large.buffer.length() >= 5000);
        assert_ne!(large.buffer.id(), small.buffer.id());

        // The old ring is still read by `cmd`, so it stays counted.
        assert_eq!(ctx.tracker().live_count_of(BufferCategory::Ring), 2);
        assert_eq!(small.buffer.handle_count(), 2);

        cmd.complete();
        assert_eq!(ctx.tracker().live_count_of(BufferCategory::Ring), 1);
        assert_eq!(small.buffer.handle_count(), 1);
        assert_eq!(ctx.staging_ring().unwrap().occupied_slots(), 0);
    }

    #[test]
    #[should_panic(expected = "overflows usize")]
    fn test_oversized_staging_write_is_fatal() {
        let mut ctx = context(UploadSettings::default());
        let cmd = HeadlessCommandBuffer::new();
        ctx.ring_allocation(&cmd, usize::MAX / 2 + 2);
    }

    #[test]
    fn test_alignment_override() {
        let ctx = context(UploadSettings {
            constant_buffer_alignment: Some(512),
            ..Default::default()
        });
        assert_eq!(ctx.capabilities().constant_buffer_offset_alignment, 512);
    }

    #[test]
    fn test_pool_allocation_uses_pool() {
        let mut ctx = context(UploadSettings::default());
        let cmd = HeadlessCommandBuffer::new();
        ctx.pool_allocation(&cmd, 64);
        assert_eq!(ctx.staging_pool().len(), 1);
        assert_eq!(ctx.tracker().live_count_of(BufferCategory::Staging), 1);
    }
}

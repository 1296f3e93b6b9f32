//! Device buffers instrumented for live-allocation accounting

use std::fmt;
use std::sync::Arc;

use sluice_core::memory::{AllocationTracker, BufferCategory};
use sluice_metrics::ScopedAllocationTimer;

use crate::device::{DeviceBuffer, GraphicsDevice, ResourceOptions};

enum Resource<B> {
    Empty,
    Occupied {
        buffer: B,
        category: BufferCategory,
        tracker: Arc<AllocationTracker>,
    },
}

/// Owns one native buffer handle and counts it in an [`AllocationTracker`].
///
/// Move-only. Dropping a non-empty resource decrements its category exactly
/// once; an empty resource is never counted.
pub struct TrackedResource<B: DeviceBuffer> {
    resource: Resource<B>,
}

impl<B: DeviceBuffer> TrackedResource<B> {
    pub fn new(buffer: B, category: BufferCategory, tracker: &Arc<AllocationTracker>) -> Self {
        tracker.increment(category);
        Self {
            resource: Resource::Occupied {
                buffer,
                category,
                tracker: Arc::clone(tracker),
            },
        }
    }

    pub const fn empty() -> Self {
        Self {
            resource: Resource::Empty,
        }
    }

    /// Create a device buffer and start tracking it.
    ///
    /// # Panics
    ///
    /// If the device cannot provide the memory. Running out of device memory
    /// here means the capacity planning is wrong, not that the frame can
    /// degrade gracefully.
    pub fn allocate<D>(
        device: &D,
        length: usize,
        options: ResourceOptions,
        category: BufferCategory,
        tracker: &Arc<AllocationTracker>,
    ) -> Self
    where
        D: GraphicsDevice<Buffer = B>,
    {
        let buffer = {
            let _timer = ScopedAllocationTimer::new(tracker.diagnostics(), category.name());
            device.create_buffer(length, options)
        };
        let Some(buffer) = buffer else {
            tracing::error!(length, ?options, ?category, "device buffer allocation failed");
            panic!("could not allocate {category:?} device buffer of {length} bytes");
        };
        Self::new(buffer, category, tracker)
    }

    pub fn get(&self) -> Option<&B> {
        match &self.resource {
            Resource::Empty => None,
            Resource::Occupied { buffer, .. } => Some(buffer),
        }
    }

    pub fn category(&self) -> Option<BufferCategory> {
        match &self.resource {
            Resource::Empty => None,
            Resource::Occupied { category, .. } => Some(*category),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.resource, Resource::Empty)
    }

    /// Move ownership out, leaving `self` empty.
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }
}

impl<B: DeviceBuffer> Default for TrackedResource<B> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<B: DeviceBuffer> Drop for TrackedResource<B> {
    fn drop(&mut self) {
        if let Resource::Occupied {
            category, tracker, ..
        } = &self.resource
        {
            tracker.decrement(*category);
        }
    }
}

impl<B: DeviceBuffer> fmt::Debug for TrackedResource<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.resource {
            Resource::Empty => f.write_str("TrackedResource(empty)"),
            Resource::Occupied {
                buffer, category, ..
            } => f
                .debug_struct("TrackedResource")
                .field("id", &buffer.id())
                .field("length", &buffer.length())
                .field("category", category)
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessDevice;
    use sluice_metrics::{Diagnostics, StatRecorder};

    fn tracker() -> Arc<AllocationTracker> {
        Arc::new(AllocationTracker::default())
    }

    #[test]
    fn test_round_trip_restores_count() {
        let device = HeadlessDevice::new();
        let tracker = tracker();
        let before = tracker.live_count_of(BufferCategory::Staging);

        let resources: Vec<_> = (0..16)
            .map(|_| {
                TrackedResource::allocate(
                    &device,
                    64,
                    ResourceOptions::UPLOAD,
                    BufferCategory::Staging,
                    &tracker,
                )
            })
            .collect();
        assert_eq!(tracker.live_count_of(BufferCategory::Staging), before + 16);
        assert_eq!(tracker.live_count(), 16);

        drop(resources);
        assert_eq!(tracker.live_count_of(BufferCategory::Staging), before);
        assert_eq!(tracker.live_count(), 0);
    }

    #[test]
    fn test_take_moves_ownership_once() {
        let device = HeadlessDevice::new();
        let tracker = tracker();
        let mut original = TrackedResource::allocate(
            &device,
            32,
            ResourceOptions::UPLOAD,
            BufferCategory::Ring,
            &tracker,
        );
        let id = original.get().unwrap().id();

        let moved = original.take();
        assert!(original.is_empty());
        assert_eq!(original.category(), None);
        assert_eq!(moved.get().unwrap().id(), id);
        assert_eq!(moved.category(), Some(BufferCategory::Ring));
        assert_eq!(tracker.live_count(), 1);

        drop(original);
        assert_eq!(tracker.live_count(), 1);
        drop(moved);
        assert_eq!(tracker.live_count(), 0);
    }

    #[test]
    fn test_empty_resource_is_untracked() {
        let tracker = tracker();
        let empty: TrackedResource<crate::headless::HeadlessBuffer> = TrackedResource::default();
        assert!(empty.is_empty());
        assert!(empty.get().is_none());
        drop(empty);
        assert_eq!(tracker.live_count(), 0);
    }

    #[test]
    fn test_excess_stat_fires_once_while_growing() {
        let recorder = Arc::new(StatRecorder::new());
        let tracker = Arc::new(AllocationTracker::with_excess_threshold(
            Diagnostics::new("test").with_sink(recorder.clone()),
            8,
        ));
        let device = HeadlessDevice::new();

        let resources: Vec<_> = (0..20)
            .map(|_| {
                TrackedResource::allocate(
                    &device,
                    16,
                    ResourceOptions::UPLOAD,
                    BufferCategory::Generic,
                    &tracker,
                )
            })
            .collect();

        assert_eq!(recorder.reports("test.excess_buffers_allocated"), 1);
        assert_eq!(recorder.last("test.excess_buffers_allocated"), Some(8));
        drop(resources);
    }

    #[test]
    #[should_panic(expected = "could not allocate")]
    fn test_device_failure_is_fatal() {
        let device = HeadlessDevice::new();
        device.set_out_of_memory(true);
        let _ = TrackedResource::allocate(
            &device,
            64,
            ResourceOptions::UPLOAD,
            BufferCategory::Generic,
            &tracker(),
        );
    }
}

//! Sluice Render
//!
//! Transient GPU buffer management for a real-time rendering backend:
//! tracked device buffers, a completion-reclaimed ring allocator, staging
//! pools, and the caller-facing [`Buffer`].
//!
//! The device, command buffers and encoders are external collaborators,
//! described by the traits in [`device`]. [`headless`] implements them in
//! memory.
//!
//! All allocation, write and bind calls are expected on a single backend
//! thread. Only completion handlers run elsewhere.

pub mod binding;
pub mod buffer;
pub mod caps;
pub mod context;
pub mod device;
pub mod headless;
pub mod pool;
pub mod ring;
pub mod tracked;

pub use binding::{bind_buffers, Stage};
pub use buffer::{Buffer, BufferBinding, BufferDescriptor, BufferUsage, UploadStrategy};
pub use caps::{probe_capabilities, DeviceCapabilities, DeviceClass};
pub use context::BufferContext;
pub use device::{
    BufferId, CommandBuffer, CompletionHandler, DeviceBuffer, Encoder, EncoderKind,
    GraphicsDevice, ResourceOptions,
};
pub use pool::StagingPool;
pub use ring::{Allocation, BufferLayout, RingAllocator, RingDescriptor};
pub use tracked::TrackedResource;

pub use sluice_core::memory::{AllocationTracker, BufferCategory};

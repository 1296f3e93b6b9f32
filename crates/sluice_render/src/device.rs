//! Collaborator interfaces: device, command buffer, encoder
//!
//! The allocator never talks to a driver directly. A backend implements these
//! traits; handles are expected to be cheap reference-counted clones, so
//! cloning a [`DeviceBuffer`] keeps the underlying memory alive.

use bitflags::bitflags;

use crate::binding::Stage;

/// Stable identity of a device buffer, for logging and comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u64);

bitflags! {
    /// Storage and caching options for a new device buffer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceOptions: u32 {
        /// CPU and GPU share the memory; the CPU may write it.
        const STORAGE_SHARED = 1 << 0;
        /// GPU-only memory; filled through GPU copies.
        const STORAGE_PRIVATE = 1 << 1;
        /// CPU writes bypass the cache. Good for upload-only memory.
        const CPU_WRITE_COMBINED = 1 << 2;
    }
}

impl ResourceOptions {
    /// Options for CPU-written upload memory.
    pub const UPLOAD: Self = Self::STORAGE_SHARED.union(Self::CPU_WRITE_COMBINED);

    pub fn is_cpu_writable(self) -> bool {
        self.contains(Self::STORAGE_SHARED)
    }
}

/// Native buffer handle.
pub trait DeviceBuffer: Clone + Send + Sync + 'static {
    fn id(&self) -> BufferId;

    fn length(&self) -> usize;

    /// CPU write into shared storage.
    ///
    /// Callers guarantee the range is not being read by in-flight GPU work.
    fn write(&self, offset: usize, bytes: &[u8]);
}

/// Creates device buffers.
pub trait GraphicsDevice: Send + Sync + 'static {
    type Buffer: DeviceBuffer;

    /// `None` means the device is out of memory.
    fn create_buffer(&self, length: usize, options: ResourceOptions) -> Option<Self::Buffer>;
}

/// Notification fired once the GPU has finished a command buffer.
pub type CompletionHandler = Box<dyn FnOnce() + Send + 'static>;

/// One batch of GPU work.
pub trait CommandBuffer {
    type Buffer: DeviceBuffer;

    /// Register `handler` to run exactly once, on an arbitrary thread, after
    /// the GPU has finished this command buffer.
    fn on_completion(&self, handler: CompletionHandler);

    /// Record a GPU-side copy. The command buffer keeps both buffers alive
    /// until the copy has executed.
    fn copy_buffer(
        &self,
        src: &Self::Buffer,
        src_offset: usize,
        dst: &Self::Buffer,
        dst_offset: usize,
        size: usize,
    );
}

/// Whether an encoder records draws or dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderKind {
    Render,
    Compute,
}

impl EncoderKind {
    /// Pipeline stages this kind of encoder can bind to.
    pub fn accepted_stages(self) -> Stage {
        match self {
            Self::Render => Stage::VERTEX | Stage::FRAGMENT,
            Self::Compute => Stage::COMPUTE,
        }
    }
}

/// Command recording context with one buffer binding table per stage.
pub trait Encoder {
    type Buffer: DeviceBuffer;

    fn kind(&self) -> EncoderKind;

    /// Bind `buffer` at `offset` to slot `index` of a single `stage`.
    fn set_buffer(&mut self, stage: Stage, index: usize, buffer: &Self::Buffer, offset: usize);

    /// Bind a small block of inline bytes to slot `index` of a single `stage`.
    fn set_bytes(&mut self, stage: Stage, index: usize, bytes: &[u8]);
}

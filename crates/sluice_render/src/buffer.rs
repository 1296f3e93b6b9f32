//! Caller-facing buffer objects
//!
//! A [`Buffer`] is either a small CPU-side block bound inline, or a persistent
//! device buffer that receives its data through staging memory and a GPU copy.
//! Staging memory comes from the rotating pool or from the staging ring,
//! picked per write, so bytes still being read by in-flight work are never
//! overwritten.

use std::fmt;
use std::sync::Arc;

use sluice_core::memory::BufferCategory;

use crate::context::BufferContext;
use crate::device::{CommandBuffer, DeviceBuffer, GraphicsDevice, ResourceOptions};
use crate::tracked::TrackedResource;

/// How a buffer is bound by shaders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferBinding {
    Vertex,
    Index,
    Uniform,
    /// Read/write from shaders, so never CPU-only.
    ShaderStorage,
}

/// How often the contents change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Written rarely, read many times.
    Static,
    /// Rewritten every frame or more.
    Dynamic,
}

/// Where staging memory for a synchronized write comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UploadStrategy {
    Pool,
    BumpAllocator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDescriptor {
    pub binding: BufferBinding,
    pub usage: BufferUsage,
    pub size: usize,
    /// Allocate device memory even when a CPU-only buffer would do.
    pub force_gpu_buffer: bool,
}

impl BufferDescriptor {
    pub fn new(binding: BufferBinding, usage: BufferUsage, size: usize) -> Self {
        Self {
            binding,
            usage,
            size,
            force_gpu_buffer: false,
        }
    }

    pub fn with_gpu_buffer(mut self) -> Self {
        self.force_gpu_buffer = true;
        self
    }
}

pub struct Buffer<D: GraphicsDevice> {
    strategy: UploadStrategy,
    // Shared so draws can keep it alive past the owner.
    resource: Arc<TrackedResource<D::Buffer>>,
    cpu_writable: bool,
    cpu_buffer: Option<Box<[u8]>>,
    size: usize,
}

impl<D: GraphicsDevice> Buffer<D> {
    /// Create a buffer of `desc.size` bytes.
    ///
    /// Small dynamic buffers (up to `cpu_buffer_max_size`) stay on the CPU and
    /// are bound as inline bytes. Everything else gets a device buffer: private
    /// storage for static data, shared storage for dynamic data.
    ///
    /// # Panics
    ///
    /// If the device is out of memory.
    pub fn new(ctx: &BufferContext<D>, desc: BufferDescriptor) -> Self {
        let strategy = match desc.usage {
            BufferUsage::Static => UploadStrategy::Pool,
            BufferUsage::Dynamic => UploadStrategy::BumpAllocator,
        };

        let cpu_only = desc.size <= ctx.settings().cpu_buffer_max_size
            && desc.binding != BufferBinding::ShaderStorage
            && desc.usage == BufferUsage::Dynamic
            && !desc.force_gpu_buffer;
        if cpu_only || desc.size == 0 {
            return Self {
                strategy,
                resource: Arc::new(TrackedResource::empty()),
                cpu_writable: true,
                cpu_buffer: cpu_only.then(|| vec![0; desc.size].into_boxed_slice()),
                size: desc.size,
            };
        }

        let options = match desc.usage {
            BufferUsage::Static => ResourceOptions::STORAGE_PRIVATE,
            BufferUsage::Dynamic => ResourceOptions::STORAGE_SHARED,
        };
        let resource = TrackedResource::allocate(
            ctx.device().as_ref(),
            desc.size,
            options,
            BufferCategory::Generic,
            ctx.tracker(),
        );

        Self {
            strategy,
            resource: Arc::new(resource),
            cpu_writable: options.is_cpu_writable(),
            cpu_buffer: None,
            size: desc.size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn upload_strategy(&self) -> UploadStrategy {
        self.strategy
    }

    /// The CPU-side contents, for CPU-only buffers.
    pub fn cpu_buffer(&self) -> Option<&[u8]> {
        self.cpu_buffer.as_deref()
    }

    pub fn has_gpu_buffer(&self) -> bool {
        !self.resource.is_empty()
    }

    /// Write `src` at `byte_offset` without disturbing in-flight GPU work.
    ///
    /// The bytes land in fresh staging memory and are copied into the buffer
    /// by `cmd_buffer`, so they become visible to work encoded after this call.
    ///
    /// # Panics
    ///
    /// If the write does not fit in the buffer.
    pub fn copy_into_buffer<C>(
        &mut self,
        ctx: &mut BufferContext<D>,
        cmd_buffer: &C,
        src: &[u8],
        byte_offset: usize,
    ) where
        C: CommandBuffer<Buffer = D::Buffer>,
    {
        if src.is_empty() {
            return;
        }
        self.check_range(src.len(), byte_offset);

        if let Some(cpu) = self.cpu_buffer.as_mut() {
            cpu[byte_offset..byte_offset + src.len()].copy_from_slice(src);
            return;
        }
        let Some(dst) = self.resource.get() else {
            unreachable!("non-empty write into a buffer without storage");
        };

        let strategy = match self.strategy {
            UploadStrategy::BumpAllocator
                if src.len() > ctx.settings().bump_allocator_max_size =>
            {
                tracing::trace!(size = src.len(), "write too large for staging ring, using pool");
                UploadStrategy::Pool
            }
            strategy => strategy,
        };
        let staging = match strategy {
            UploadStrategy::Pool => ctx.pool_allocation(cmd_buffer, src.len()),
            UploadStrategy::BumpAllocator => ctx.ring_allocation(cmd_buffer, src.len()),
        };

        staging.buffer.write(staging.offset, src);
        cmd_buffer.copy_buffer(&staging.buffer, staging.offset, dst, byte_offset, src.len());
    }

    /// Write `src` at `byte_offset` straight into the existing storage.
    ///
    /// The caller guarantees no in-flight GPU work reads the range. Buffers in
    /// private storage cannot be written by the CPU and take the synchronized
    /// path instead.
    ///
    /// # Panics
    ///
    /// If the write does not fit in the buffer.
    pub fn copy_into_buffer_unsynchronized<C>(
        &mut self,
        ctx: &mut BufferContext<D>,
        cmd_buffer: &C,
        src: &[u8],
        byte_offset: usize,
    ) where
        C: CommandBuffer<Buffer = D::Buffer>,
    {
        if src.is_empty() {
            return;
        }
        self.check_range(src.len(), byte_offset);

        if let Some(cpu) = self.cpu_buffer.as_mut() {
            cpu[byte_offset..byte_offset + src.len()].copy_from_slice(src);
            return;
        }
        match self.resource.get() {
            Some(dst) if self.cpu_writable => dst.write(byte_offset, src),
            _ => self.copy_into_buffer(ctx, cmd_buffer, src, byte_offset),
        }
    }

    /// Typed convenience over [`Buffer::copy_into_buffer`].
    pub fn write_pod<C, T>(
        &mut self,
        ctx: &mut BufferContext<D>,
        cmd_buffer: &C,
        data: &[T],
        byte_offset: usize,
    ) where
        C: CommandBuffer<Buffer = D::Buffer>,
        T: bytemuck::Pod,
    {
        self.copy_into_buffer(ctx, cmd_buffer, bytemuck::cast_slice(data), byte_offset);
    }

    /// The device buffer to bind for work on `cmd_buffer`, or `None` when
    /// there is no device allocation.
    ///
    /// The buffer stays alive until `cmd_buffer` completes, even if `self` is
    /// dropped first.
    pub fn gpu_buffer_for_draw<C>(&self, cmd_buffer: &C) -> Option<D::Buffer>
    where
        C: CommandBuffer<Buffer = D::Buffer>,
    {
        let buffer = self.resource.get()?.clone();
        let retained = Arc::clone(&self.resource);
        cmd_buffer.on_completion(Box::new(move || drop(retained)));
        Some(buffer)
    }

    fn check_range(&self, len: usize, byte_offset: usize) {
        assert!(
            byte_offset
                .checked_add(len)
                .is_some_and(|end| end <= self.size),
            "write of {len} bytes at offset {byte_offset} overruns buffer of {} bytes",
            self.size
        );
    }
}

impl<D: GraphicsDevice> fmt::Debug for Buffer<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("size", &self.size)
            .field("strategy", &self.strategy)
            .field("cpu_only", &self.cpu_buffer.is_some())
            .field("resource", &self.resource)
            .finish()
    }
}

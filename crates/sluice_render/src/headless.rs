//! Headless backend
//!
//! Implements the collaborator traits in plain memory. GPU work is simulated:
//! copies recorded on a [`HeadlessCommandBuffer`] execute, and completion
//! handlers fire, when the owner calls [`HeadlessCommandBuffer::complete`].
//! Used by the test suites and the runtime demo.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::binding::Stage;
use crate::device::{
    BufferId, CommandBuffer, CompletionHandler, DeviceBuffer, Encoder, EncoderKind,
    GraphicsDevice, ResourceOptions,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory device.
#[derive(Debug, Default)]
pub struct HeadlessDevice {
    next_id: AtomicU64,
    buffers_created: AtomicUsize,
    out_of_memory: AtomicBool,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total buffers ever created by this device.
    pub fn buffers_created(&self) -> usize {
        self.buffers_created.load(Ordering::Relaxed)
    }

    /// Make every following allocation fail.
    pub fn set_out_of_memory(&self, out_of_memory: bool) {
        self.out_of_memory.store(out_of_memory, Ordering::Relaxed);
    }
}

impl GraphicsDevice for HeadlessDevice {
    type Buffer = HeadlessBuffer;

    fn create_buffer(&self, length: usize, options: ResourceOptions) -> Option<HeadlessBuffer> {
        if self.out_of_memory.load(Ordering::Relaxed) {
            return None;
        }
        let id = BufferId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.buffers_created.fetch_add(1, Ordering::Relaxed);
        Some(HeadlessBuffer {
            inner: Arc::new(Storage {
                id,
                options,
                bytes: Mutex::new(vec![0; length]),
            }),
        })
    }
}

#[derive(Debug)]
struct Storage {
    id: BufferId,
    options: ResourceOptions,
    bytes: Mutex<Vec<u8>>,
}

/// Reference-counted handle to headless buffer memory.
#[derive(Debug, Clone)]
pub struct HeadlessBuffer {
    inner: Arc<Storage>,
}

impl HeadlessBuffer {
    pub fn options(&self) -> ResourceOptions {
        self.inner.options
    }

    /// Copy of `len` bytes at `offset`, as the GPU would see them.
    pub fn read(&self, offset: usize, len: usize) -> Vec<u8> {
        lock(&self.inner.bytes)[offset..offset + len].to_vec()
    }

    /// Number of live handles to this memory, including this one.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    fn store(&self, offset: usize, bytes: &[u8]) {
        let mut storage = lock(&self.inner.bytes);
        assert!(
            offset + bytes.len() <= storage.len(),
            "write of {} bytes at {} overruns buffer {:?} of {} bytes",
            bytes.len(),
            offset,
            self.inner.id,
            storage.len()
        );
        storage[offset..offset + bytes.len()].copy_from_slice(bytes);
    }
}

impl DeviceBuffer for HeadlessBuffer {
    fn id(&self) -> BufferId {
        self.inner.id
    }

    fn length(&self) -> usize {
        lock(&self.inner.bytes).len()
    }

    fn write(&self, offset: usize, bytes: &[u8]) {
        assert!(
            self.inner.options.is_cpu_writable(),
            "CPU write into private buffer {:?}",
            self.inner.id
        );
        self.store(offset, bytes);
    }
}

struct PendingCopy {
    src: HeadlessBuffer,
    src_offset: usize,
    dst: HeadlessBuffer,
    dst_offset: usize,
    size: usize,
}

#[derive(Default)]
struct Pending {
    copies: Vec<PendingCopy>,
    handlers: Vec<CompletionHandler>,
    completed: bool,
}

/// Simulated command buffer.
#[derive(Default)]
pub struct HeadlessCommandBuffer {
    pending: Mutex<Pending>,
}

impl HeadlessCommandBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the recorded copies, then fire every completion handler.
    ///
    /// # Panics
    ///
    /// If called twice.
    pub fn complete(&self) {
        let (copies, handlers) = {
            let mut pending = lock(&self.pending);
            assert!(!pending.completed, "command buffer completed twice");
            pending.completed = true;
            (
                std::mem::take(&mut pending.copies),
                std::mem::take(&mut pending.handlers),
            )
        };

        for copy in copies {
            let bytes = copy.src.read(copy.src_offset, copy.size);
            copy.dst.store(copy.dst_offset, &bytes);
        }
        for handler in handlers {
            handler();
        }
    }

    pub fn is_completed(&self) -> bool {
        lock(&self.pending).completed
    }

    pub fn pending_handlers(&self) -> usize {
        lock(&self.pending).handlers.len()
    }

    pub fn pending_copies(&self) -> usize {
        lock(&self.pending).copies.len()
    }
}

impl CommandBuffer for HeadlessCommandBuffer {
    type Buffer = HeadlessBuffer;

    fn on_completion(&self, handler: CompletionHandler) {
        let mut pending = lock(&self.pending);
        assert!(!pending.completed, "handler added to a completed command buffer");
        pending.handlers.push(handler);
    }

    fn copy_buffer(
        &self,
        src: &HeadlessBuffer,
        src_offset: usize,
        dst: &HeadlessBuffer,
        dst_offset: usize,
        size: usize,
    ) {
        let mut pending = lock(&self.pending);
        assert!(!pending.completed, "copy recorded on a completed command buffer");
        pending.copies.push(PendingCopy {
            src: src.clone(),
            src_offset,
            dst: dst.clone(),
            dst_offset,
            size,
        });
    }
}

/// What ended up in one binding slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundTarget {
    Buffer { id: BufferId, offset: usize },
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub stage: Stage,
    pub index: usize,
    pub target: BoundTarget,
}

/// Encoder that records its bindings.
#[derive(Debug)]
pub struct HeadlessEncoder {
    kind: EncoderKind,
    bindings: Vec<Binding>,
}

impl HeadlessEncoder {
    pub fn new(kind: EncoderKind) -> Self {
        Self {
            kind,
            bindings: Vec::new(),
        }
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }
}

impl Encoder for HeadlessEncoder {
    type Buffer = HeadlessBuffer;

    fn kind(&self) -> EncoderKind {
        self.kind
    }

    fn set_buffer(&mut self, stage: Stage, index: usize, buffer: &HeadlessBuffer, offset: usize) {
        self.bindings.push(Binding {
            stage,
            index,
            target: BoundTarget::Buffer {
                id: buffer.id(),
                offset,
            },
        });
    }

    fn set_bytes(&mut self, stage: Stage, index: usize, bytes: &[u8]) {
        self.bindings.push(Binding {
            stage,
            index,
            target: BoundTarget::Bytes(bytes.to_vec()),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copies_run_on_completion() {
        let device = HeadlessDevice::new();
        let src = device.create_buffer(8, ResourceOptions::UPLOAD).unwrap();
        let dst = device
            .create_buffer(8, ResourceOptions::STORAGE_PRIVATE)
            .unwrap();
        src.write(0, &[1, 2, 3, 4]);

        let cmd = HeadlessCommandBuffer::new();
        cmd.copy_buffer(&src, 0, &dst, 4, 4);
        assert_eq!(dst.read(4, 4), vec![0; 4]);

        cmd.complete();
        assert_eq!(dst.read(0, 8), vec![0, 0, 0, 0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_handlers_fire_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let cmd = HeadlessCommandBuffer::new();
        for _ in 0..3 {
            let fired = Arc::clone(&fired);
            cmd.on_completion(Box::new(move || {
                fired.fetch_add(1, Ordering::Relaxed);
            }));
        }
        cmd.complete();
        assert_eq!(fired.load(Ordering::Relaxed), 3);
        assert!(cmd.is_completed());
    }

    #[test]
    #[should_panic(expected = "private buffer")]
    fn test_cpu_write_into_private_memory_panics() {
        let device = HeadlessDevice::new();
        let buffer = device
            .create_buffer(16, ResourceOptions::STORAGE_PRIVATE)
            .unwrap();
        buffer.write(0, &[1]);
    }

    #[test]
    fn test_out_of_memory_device_returns_none() {
        let device = HeadlessDevice::new();
        device.set_out_of_memory(true);
        assert!(device.create_buffer(16, ResourceOptions::UPLOAD).is_none());
        assert_eq!(device.buffers_created(), 0);
    }
}

//! Binding buffers to encoder stages

use bitflags::bitflags;

use crate::buffer::Buffer;
use crate::device::{CommandBuffer, Encoder, EncoderKind, GraphicsDevice};

bitflags! {
    /// Pipeline stages a binding applies to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Stage: u8 {
        const VERTEX = 1 << 0;
        const FRAGMENT = 1 << 1;
        const COMPUTE = 1 << 2;
    }
}

fn check_stages(kind: EncoderKind, stages: Stage) {
    let accepted = kind.accepted_stages();
    if !accepted.contains(stages) {
        tracing::error!(?kind, ?stages, ?accepted, "binding to stages the encoder lacks");
        panic!("{kind:?} encoder cannot bind {stages:?}");
    }
}

/// Bind `buffers` to consecutive slots starting at `start_index`, once per
/// stage in `stages`.
///
/// `None` entries leave their slot untouched. CPU-only buffers are bound as
/// inline bytes starting at their offset.
///
/// # Panics
///
/// If `buffers` and `offsets` differ in length, if an offset lies past the end
/// of a CPU-only buffer, or if `stages` includes a stage the encoder cannot
/// bind to (compute on a render encoder, vertex or fragment on a compute
/// encoder).
pub fn bind_buffers<D, C, E>(
    cmd_buffer: &C,
    encoder: &mut E,
    start_index: usize,
    stages: Stage,
    buffers: &[Option<&Buffer<D>>],
    offsets: &[usize],
) where
    D: GraphicsDevice,
    C: CommandBuffer<Buffer = D::Buffer>,
    E: Encoder<Buffer = D::Buffer>,
{
    assert_eq!(
        buffers.len(),
        offsets.len(),
        "every buffer needs an offset"
    );
    check_stages(encoder.kind(), stages);

    // Fetch handles once; each fetch retains the buffer for `cmd_buffer`.
    let gpu_buffers: Vec<Option<D::Buffer>> = buffers
        .iter()
        .map(|b| b.and_then(|b| b.gpu_buffer_for_draw(cmd_buffer)))
        .collect();

    for stage in stages.iter() {
        for (i, (buffer, &offset)) in buffers.iter().zip(offsets).enumerate() {
            let Some(buffer) = buffer else {
                continue;
            };
            let index = start_index + i;
            if let Some(bytes) = buffer.cpu_buffer() {
                assert!(
                    offset <= bytes.len(),
                    "binding offset {offset} overruns CPU buffer of {} bytes",
                    bytes.len()
                );
                encoder.set_bytes(stage, index, &bytes[offset..]);
            } else if let Some(gpu) = &gpu_buffers[i] {
                encoder.set_buffer(stage, index, gpu, offset);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::buffer::{BufferBinding, BufferDescriptor, BufferUsage};
    use crate::context::BufferContext;
    use crate::device::DeviceBuffer;
    use crate::headless::{BoundTarget, HeadlessCommandBuffer, HeadlessDevice, HeadlessEncoder};
    use sluice_core::memory::AllocationTracker;
    use sluice_core::settings::UploadSettings;

    fn context() -> BufferContext<HeadlessDevice> {
        BufferContext::new(
            Arc::new(HeadlessDevice::new()),
            Arc::new(AllocationTracker::default()),
            &UploadSettings::default(),
        )
    }

    fn gpu_buffer(ctx: &BufferContext<HeadlessDevice>) -> Buffer<HeadlessDevice> {
        Buffer::new(
            ctx,
            BufferDescriptor::new(BufferBinding::Vertex, BufferUsage::Static, 8192),
        )
    }

    #[test]
    fn test_render_encoder_binds_each_stage() {
        let ctx = context();
        let a = gpu_buffer(&ctx);
        let b = gpu_buffer(&ctx);
        let cmd = HeadlessCommandBuffer::new();
        let mut encoder = HeadlessEncoder::new(EncoderKind::Render);

        bind_buffers(
            &cmd,
            &mut encoder,
            2,
            Stage::VERTEX | Stage::FRAGMENT,
            &[Some(&a), Some(&b)],
            &[0, 64],
        );

        let bindings = encoder.bindings();
        assert_eq!(bindings.len(), 4);
        let vertex: Vec<_> = bindings
            .iter()
            .filter(|b| b.stage == Stage::VERTEX)
            .map(|b| b.index)
            .collect();
        assert_eq!(vertex, vec![2, 3]);
        assert_eq!(
            bindings[1].target,
            BoundTarget::Buffer {
                id: b.gpu_buffer_for_draw(&cmd).unwrap().id(),
                offset: 64
            }
        );
    }

    #[test]
    fn test_missing_buffers_are_skipped() {
        let ctx = context();
        let a = gpu_buffer(&ctx);
        let cmd = HeadlessCommandBuffer::new();
        let mut encoder = HeadlessEncoder::new(EncoderKind::Compute);

        bind_buffers(&cmd, &mut encoder, 0, Stage::COMPUTE, &[None, Some(&a)], &[0, 0]);

        assert_eq!(encoder.bindings().len(), 1);
        assert_eq!(encoder.bindings()[0].index, 1);
    }

    #[test]
    fn test_cpu_buffers_bind_inline_bytes() {
        let mut ctx = context();
        let mut uniforms = Buffer::new(
            &ctx,
            BufferDescriptor::new(BufferBinding::Uniform, BufferUsage::Dynamic, 8),
        );
        let cmd = HeadlessCommandBuffer::new();
        uniforms.copy_into_buffer(&mut ctx, &cmd, &[1, 2, 3, 4, 5, 6, 7, 8], 0);
        let mut encoder = HeadlessEncoder::new(EncoderKind::Render);

        bind_buffers(&cmd, &mut encoder, 0, Stage::FRAGMENT, &[Some(&uniforms)], &[4]);

        assert_eq!(
            encoder.bindings()[0].target,
            BoundTarget::Bytes(vec![5, 6, 7, 8])
        );
        assert_eq!(cmd.pending_handlers(), 0);
    }

    #[test]
    fn test_bound_buffers_outlive_their_owner() {
        let ctx = context();
        let a = gpu_buffer(&ctx);
        let cmd = HeadlessCommandBuffer::new();
        let mut encoder = HeadlessEncoder::new(EncoderKind::Render);
        bind_buffers(&cmd, &mut encoder, 0, Stage::VERTEX, &[Some(&a)], &[0]);

        drop(a);
        assert_eq!(ctx.tracker().live_count(), 1);
        cmd.complete();
        assert_eq!(ctx.tracker().live_count(), 0);
    }

    #[test]
    #[should_panic(expected = "cannot bind")]
    fn test_compute_stage_on_render_encoder_panics() {
        let ctx = context();
        let a = gpu_buffer(&ctx);
        let cmd = HeadlessCommandBuffer::new();
        let mut encoder = HeadlessEncoder::new(EncoderKind::Render);
        bind_buffers(&cmd, &mut encoder, 0, Stage::COMPUTE, &[Some(&a)], &[0]);
    }

    #[test]
    #[should_panic(expected = "cannot bind")]
    fn test_vertex_stage_on_compute_encoder_panics() {
        let ctx = context();
        let a = gpu_buffer(&ctx);
        let cmd = HeadlessCommandBuffer::new();
        let mut encoder = HeadlessEncoder::new(EncoderKind::Compute);
        bind_buffers(&cmd, &mut encoder, 0, Stage::VERTEX, &[Some(&a)], &[0]);
    }

    #[test]
    #[should_panic(expected = "overruns CPU buffer")]
    fn test_offset_past_cpu_buffer_panics() {
        let ctx = context();
        let uniforms = Buffer::new(
            &ctx,
            BufferDescriptor::new(BufferBinding::Uniform, BufferUsage::Dynamic, 8),
        );
        let cmd = HeadlessCommandBuffer::new();
        let mut encoder = HeadlessEncoder::new(EncoderKind::Render);
        bind_buffers(&cmd, &mut encoder, 0, Stage::VERTEX, &[Some(&uniforms)], &[16]);
    }
}

//! Sluice Runtime
//!
//! Boots logging, loads settings and drives the buffer machinery through a
//! headless frame loop with several frames in flight.
//!
//! Usage: `sluice [settings.json] [frames]`

use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::{Context, Result};
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};
use tracing_subscriber::EnvFilter;

use sluice_core::settings::Settings;
use sluice_metrics::StatSink;
use sluice_render::headless::{HeadlessCommandBuffer, HeadlessDevice, HeadlessEncoder};
use sluice_render::{
    bind_buffers, AllocationTracker, Buffer, BufferBinding, BufferCategory, BufferContext,
    BufferDescriptor, BufferUsage, EncoderKind, Stage,
};

/// Frames the simulated GPU lags behind the CPU.
const FRAMES_IN_FLIGHT: usize = 3;
const DEFAULT_FRAMES: u32 = 240;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct FrameUniforms {
    view_proj: Mat4,
    tint: Vec4,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct Vertex {
    position: [f32; 3],
    color: [f32; 3],
}

const TRIANGLE: [Vertex; 3] = [
    Vertex {
        position: [0.0, 0.5, 0.0],
        color: [1.0, 0.0, 0.0],
    },
    Vertex {
        position: [-0.5, -0.5, 0.0],
        color: [0.0, 1.0, 0.0],
    },
    Vertex {
        position: [0.5, -0.5, 0.0],
        color: [0.0, 0.0, 1.0],
    },
];

/// Forwards stats to the log.
struct LogSink;

impl StatSink for LogSink {
    fn report_stat(&self, name: &str, value: u64) {
        tracing::info!(stat = name, value, "stat reported");
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    tracing::info!("Sluice v{}", sluice_core::VERSION);

    let mut args = std::env::args().skip(1);
    let settings = match args.next() {
        Some(path) => Settings::load(&path)
            .with_context(|| format!("failed to load settings from {path}"))?,
        None => Settings::default(),
    };
    let frames = match args.next() {
        Some(n) => n
            .parse()
            .with_context(|| format!("invalid frame count {n:?}"))?,
        None => DEFAULT_FRAMES,
    };

    let tracker = AllocationTracker::from_settings(&settings.diagnostics, Some(Arc::new(LogSink)));
    let mut ctx = BufferContext::new(Arc::new(HeadlessDevice::new()), tracker, &settings.upload);

    run_frames(&mut ctx, frames);

    let tracker = ctx.tracker();
    for category in BufferCategory::ALL {
        tracing::info!(
            category = category.name(),
            live = tracker.live_count_of(category),
            "live buffers after shutdown"
        );
    }
    tracing::info!(
        created = ctx.device().buffers_created(),
        "headless device allocations"
    );

    Ok(())
}

fn run_frames(ctx: &mut BufferContext<HeadlessDevice>, frames: u32) {
    let mut vertices = Buffer::new(
        ctx,
        BufferDescriptor::new(
            BufferBinding::Vertex,
            BufferUsage::Static,
            std::mem::size_of_val(&TRIANGLE),
        )
        .with_gpu_buffer(),
    );
    let mut uniforms = Buffer::new(
        ctx,
        BufferDescriptor::new(
            BufferBinding::Uniform,
            BufferUsage::Dynamic,
            std::mem::size_of::<FrameUniforms>(),
        ),
    );
    // Large enough to need device memory; rewritten every frame.
    let mut instances = Buffer::new(
        ctx,
        BufferDescriptor::new(BufferBinding::ShaderStorage, BufferUsage::Dynamic, 64 * 1024),
    );

    let mut in_flight: VecDeque<HeadlessCommandBuffer> = VecDeque::new();
    let upload = HeadlessCommandBuffer::new();
    vertices.write_pod(ctx, &upload, &TRIANGLE, 0);
    in_flight.push_back(upload);

    let proj = Mat4::perspective_rh(60f32.to_radians(), 16.0 / 9.0, 0.1, 100.0);
    for frame in 0..frames {
        let cmd = HeadlessCommandBuffer::new();
        let t = frame as f32 / 60.0;

        let eye = Vec3::new(t.cos() * 3.0, 1.0, t.sin() * 3.0);
        let view = Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y);
        let frame_uniforms = FrameUniforms {
            view_proj: proj * view,
            tint: Vec4::new(1.0, 1.0, 1.0, 1.0),
        };
        uniforms.write_pod(ctx, &cmd, &[frame_uniforms], 0);

        let offsets: Vec<Vec4> = (0..256)
            .map(|i| Vec4::new(i as f32, t, 0.0, 1.0))
            .collect();
        instances.write_pod(ctx, &cmd, &offsets, 0);

        let mut render = HeadlessEncoder::new(EncoderKind::Render);
        bind_buffers(
            &cmd,
            &mut render,
            0,
            Stage::VERTEX,
            &[Some(&vertices), Some(&instances)],
            &[0, 0],
        );
        bind_buffers(
            &cmd,
            &mut render,
            2,
            Stage::VERTEX | Stage::FRAGMENT,
            &[Some(&uniforms)],
            &[0],
        );
        let mut compute = HeadlessEncoder::new(EncoderKind::Compute);
        bind_buffers(&cmd, &mut compute, 0, Stage::COMPUTE, &[Some(&instances)], &[0]);

        tracing::trace!(
            frame,
            render_bindings = render.bindings().len(),
            compute_bindings = compute.bindings().len(),
            "frame encoded"
        );

        in_flight.push_back(cmd);
        while in_flight.len() > FRAMES_IN_FLIGHT {
            if let Some(done) = in_flight.pop_front() {
                done.complete();
            }
        }

        if frame % 60 == 0 {
            tracing::info!(
                frame,
                live = ctx.tracker().live_count(),
                ring_occupied = ctx.staging_ring().map_or(0, |r| r.occupied_slots()),
                pool_in_flight = ctx.staging_pool().in_flight(),
                "frame stats"
            );
        }
    }

    // Drain the GPU before tearing down.
    for cmd in in_flight.drain(..) {
        cmd.complete();
    }
}

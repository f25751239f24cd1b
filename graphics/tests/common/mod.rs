//! Shared helpers for the graphics integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use lantern_graphics::backend::{DummyBackend, GpuTimeline, ImageBarrier, RecordedCommand};
use lantern_graphics::graph::ResourceState;
use lantern_graphics::types::{Extent2d, ImageHandle, ImageViewHandle, TextureFormat};
use lantern_graphics::{FrameConfig, FrameSynchronizer, RenderGraph, ResourceHandle};

pub const EXTENT: Extent2d = Extent2d::new(1280, 720);

/// Route `log` output through the test harness.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Import a texture whose image and view handles are derived from `raw`.
pub fn import(
    graph: &mut RenderGraph<'_>,
    name: &str,
    raw: u64,
    format: TextureFormat,
) -> ResourceHandle {
    graph.import_texture(
        name,
        ImageHandle::from_raw(raw),
        ImageViewHandle::from_raw(raw + 1000),
        EXTENT,
        format,
    )
}

pub fn import_backbuffer(graph: &mut RenderGraph<'_>, raw: u64) -> ResourceHandle {
    graph.import_backbuffer(
        "BackBuffer",
        ImageHandle::from_raw(raw),
        ImageViewHandle::from_raw(raw + 1000),
        EXTENT,
        TextureFormat::Bgra8UnormSrgb,
    )
}

/// Commands reduced to a compact trace, e.g. `barrier[Color:ColorAttachment->ShaderReadOnly]`.
pub fn trace(graph: &RenderGraph<'_>, commands: &[RecordedCommand]) -> Vec<String> {
    commands
        .iter()
        .map(|command| match command {
            RecordedCommand::Barrier(barriers) => {
                let parts: Vec<String> = barriers.iter().map(|b| describe(graph, b)).collect();
                format!("barrier[{}]", parts.join(","))
            }
            RecordedCommand::BeginRendering(_) => "begin_rendering".to_string(),
            RecordedCommand::EndRendering => "end_rendering".to_string(),
            RecordedCommand::Marker(label) => format!("exec:{label}"),
        })
        .collect()
}

fn describe(graph: &RenderGraph<'_>, barrier: &ImageBarrier) -> String {
    let name = graph
        .resource(barrier.resource)
        .map_or("?", |resource| resource.name());
    format!("{}:{:?}->{:?}", name, barrier.old_state, barrier.new_state)
}

/// Expected end state for a written resource.
pub fn attachment_state(format: TextureFormat) -> ResourceState {
    ResourceState::attachment_for(format)
}

pub fn backend(timeline: GpuTimeline, image_count: u32) -> Arc<DummyBackend> {
    let backend = Arc::new(DummyBackend::with_timeline(timeline));
    backend.set_image_count(image_count);
    backend
}

pub fn synchronizer(backend: &Arc<DummyBackend>, frames_in_flight: usize) -> FrameSynchronizer {
    FrameSynchronizer::new(
        backend.clone(),
        &FrameConfig::default().with_frames_in_flight(frames_in_flight),
    )
    .expect("synchronizer creation")
}

/// Run one empty frame through every synchronizer step.
pub fn run_empty_frame(sync: &mut FrameSynchronizer) {
    sync.wait_for_frame().expect("wait_for_frame");
    sync.acquire_next_image().expect("acquire_next_image");
    let recorder = sync.begin_recording().expect("begin_recording");
    sync.submit(recorder).expect("submit");
    sync.present().expect("present");
    sync.advance_frame().expect("advance_frame");
}

//! # Lantern Graphics
//!
//! Per-frame render graph and frame pacing for swapchain rendering.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`RenderGraph`] - Named image resources and ordered passes, with
//!   automatic layout barriers, rendering scopes and the final present
//!   transition
//! - [`FrameSynchronizer`] - Multiple frames in flight with per-slot fences
//!   and per-image semaphores
//! - [`FrameLoop`] - Drives both through the required frame order and
//!   handles swapchain recreation
//! - Backends: Vulkan (via `ash`) and Dummy (for testing)
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use lantern_graphics::{DummyBackend, FrameConfig, FrameSynchronizer, RenderGraph};
//! use lantern_graphics::types::{Extent2d, ImageHandle, ImageViewHandle, TextureFormat};
//!
//! let backend = Arc::new(DummyBackend::new());
//! let mut sync = FrameSynchronizer::new(backend, &FrameConfig::default()).unwrap();
//! let mut graph = RenderGraph::new();
//!
//! sync.wait_for_frame().unwrap();
//! sync.acquire_next_image().unwrap();
//!
//! graph.clear();
//! graph.import_backbuffer(
//!     "BackBuffer",
//!     ImageHandle::from_raw(1),
//!     ImageViewHandle::from_raw(2),
//!     Extent2d::new(800, 600),
//!     TextureFormat::Bgra8UnormSrgb,
//! );
//! graph.add_pass("final", |p| { p.writes("BackBuffer"); }, |_| {});
//!
//! let mut recorder = sync.begin_recording().unwrap();
//! graph.execute(recorder.as_mut()).unwrap();
//! sync.submit(recorder).unwrap();
//! sync.present().unwrap();
//! sync.advance_frame().unwrap();
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod frame_loop;
pub mod graph;
pub mod profiling;
pub mod resize;
pub mod scheduler;
pub mod types;

// Re-export main types for convenience
pub use backend::{BackendError, DummyBackend, GpuBackend};
pub use config::FrameConfig;
pub use error::{CriticalError, GraphicsError};
pub use frame_loop::{FrameLoop, FrameOutcome, FrameTarget, SurfaceRecreator, SwapchainInfo};
pub use graph::{GraphError, PassHandle, RenderGraph, ResourceHandle, ResourceState};
pub use scheduler::{FrameSynchronizer, SyncError};

/// Graphics library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the graphics subsystem.
///
/// Starts the Tracy client when the `profiling` feature is enabled.
pub fn init() {
    profiling::start();
    log::info!("Lantern Graphics v{} initialized", VERSION);
}

//! Per-frame driver tying the render graph to the frame synchronizer.
//!
//! [`FrameLoop`] runs the required frame order
//!
//! ```text
//! wait_for_frame → acquire_next_image → clear → [import_*]* → [add_pass]*
//!     → execute → submit → present → advance_frame
//! ```
//!
//! and owns swapchain recreation: debounced window resizes, out-of-date
//! acquisition and stale presentation all funnel into one path that idles
//! the device, asks the application's [`SurfaceRecreator`] for a new
//! swapchain and rebuilds the synchronizer.

use std::sync::Arc;

use crate::backend::{AcquireOutcome, BackendError, GpuBackend, PresentOutcome};
use crate::config::FrameConfig;
use crate::error::{CriticalError, GraphicsError};
use crate::graph::{ExecutionStats, RenderGraph};
use crate::resize::ResizeManager;
use crate::scheduler::{FrameSynchronizer, SyncStats};
use crate::types::{Extent2d, ImageHandle, ImageIndex, ImageViewHandle, SlotIndex, TextureFormat};
use crate::{frame_mark, profile_scope};

/// One presentable swapchain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainImage {
    pub image: ImageHandle,
    pub view: ImageViewHandle,
}

/// Description of a (re)created swapchain.
#[derive(Debug, Clone, PartialEq)]
pub struct SwapchainInfo {
    /// Size of the swapchain images.
    pub extent: Extent2d,
    /// Format of the swapchain images.
    pub format: TextureFormat,
    /// Images in presentation-engine index order.
    pub images: Vec<SwapchainImage>,
}

impl SwapchainInfo {
    /// Number of swapchain images.
    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }
}

/// Application hook that owns the swapchain and the images sized to it.
pub trait SurfaceRecreator {
    /// Recreate the swapchain at `extent`.
    ///
    /// The backend must present to the new swapchain once this returns.
    fn recreate_swapchain(&mut self, extent: Extent2d) -> Result<SwapchainInfo, GraphicsError>;

    /// Recreate per-frame images that depend on the swapchain size or format.
    fn recreate_dependent_images(
        &mut self,
        info: &SwapchainInfo,
        format_changed: bool,
    ) -> Result<(), GraphicsError>;
}

/// What the populate callback renders into this frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTarget {
    pub slot: SlotIndex,
    pub image_index: ImageIndex,
    /// Acquired swapchain image, to import with `import_backbuffer`.
    pub image: ImageHandle,
    pub view: ImageViewHandle,
    pub extent: Extent2d,
    pub format: TextureFormat,
    /// 1-based frame counter.
    pub frame_number: u64,
}

/// Summary of a presented frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub slot: SlotIndex,
    pub image_index: ImageIndex,
    /// Whether the CPU blocked on the slot's fence before recording.
    pub slot_wait_blocked: bool,
    pub graph: ExecutionStats,
    pub present: PresentOutcome,
    /// Whether the swapchain was recreated after presenting.
    pub recreated: bool,
}

/// Result of [`FrameLoop::run_frame`].
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// The frame was recorded, submitted and presented.
    Presented(FrameReport),
    /// The swapchain was out of date on acquire. Nothing was recorded; the
    /// swapchain has been recreated and the next frame can proceed.
    Recreated,
}

/// The backend must present to the swapchain `info` describes.
fn check_image_count(backend: &dyn GpuBackend, info: &SwapchainInfo) -> Result<(), GraphicsError> {
    if backend.image_count() != info.image_count() {
        return Err(GraphicsError::SurfaceRecreation(format!(
            "backend reports {} swapchain images but {} were provided",
            backend.image_count(),
            info.image_count()
        )));
    }
    Ok(())
}

/// Drives one frame at a time through the graph and the synchronizer.
pub struct FrameLoop {
    sync: FrameSynchronizer,
    resize: ResizeManager,
    swapchain: SwapchainInfo,
    config: FrameConfig,
    recreations: u64,
}

impl FrameLoop {
    /// Create a frame loop for an existing swapchain.
    ///
    /// `swapchain` must describe the swapchain the backend currently
    /// presents to.
    pub fn new(
        backend: Arc<dyn GpuBackend>,
        swapchain: SwapchainInfo,
        config: FrameConfig,
    ) -> Result<Self, GraphicsError> {
        check_image_count(backend.as_ref(), &swapchain)?;

        let sync = FrameSynchronizer::new(backend, &config)?;
        let mut resize = ResizeManager::new(swapchain.extent, config.resize_debounce);
        resize.set_min_size(config.min_surface_size);

        log::info!(
            "Frame loop: {}x{} {:?} swapchain",
            swapchain.extent.width,
            swapchain.extent.height,
            swapchain.format
        );

        Ok(Self {
            sync,
            resize,
            swapchain,
            config,
            recreations: 0,
        })
    }

    /// Forward a window resize event. Applied after the debounce period.
    pub fn on_resize_event(&mut self, width: u32, height: u32) {
        self.resize.on_resize_event(width, height);
    }

    /// Run one frame.
    ///
    /// `populate` is called after the graph has been cleared and receives
    /// the acquired image. Graph errors are reported after the frame has
    /// been submitted and presented, so the synchronizer stays in order.
    pub fn run_frame<'a, F>(
        &mut self,
        graph: &mut RenderGraph<'a>,
        recreator: &mut dyn SurfaceRecreator,
        populate: F,
    ) -> Result<FrameOutcome, GraphicsError>
    where
        F: FnOnce(&mut RenderGraph<'a>, &FrameTarget),
    {
        profile_scope!("run_frame");

        if let Some(event) = self.resize.update() {
            log::debug!(
                "Debounced resize {}x{} -> {}x{}",
                event.previous.width,
                event.previous.height,
                event.extent.width,
                event.extent.height
            );
            self.recreate(graph, recreator, event.extent)?;
        }

        let wait = self.sync.wait_for_frame()?;

        let image_index = match self.sync.acquire_next_image()? {
            AcquireOutcome::Acquired { image_index, .. } => image_index,
            AcquireOutcome::OutOfDate => {
                let extent = self.target_extent();
                self.recreate(graph, recreator, extent)?;
                return Ok(FrameOutcome::Recreated);
            }
        };

        let image = self
            .swapchain
            .images
            .get(image_index.as_usize())
            .copied()
            .ok_or_else(|| {
                CriticalError::Acquire(BackendError::Validation(format!(
                    "{} has no registered swapchain image",
                    image_index
                )))
            })?;

        let target = FrameTarget {
            slot: wait.slot,
            image_index,
            image: image.image,
            view: image.view,
            extent: self.swapchain.extent,
            format: self.swapchain.format,
            frame_number: self.sync.frame_count(),
        };

        graph.clear();
        populate(graph, &target);

        let mut recorder = self.sync.begin_recording()?;
        let executed = graph.execute(recorder.as_mut());
        self.sync.submit(recorder)?;
        let present = self.sync.present()?;
        self.sync.advance_frame()?;
        let graph_stats = executed?;

        let recreated = self.sync.needs_recreate();
        if recreated {
            let extent = self.target_extent();
            self.recreate(graph, recreator, extent)?;
        }

        frame_mark!();

        Ok(FrameOutcome::Presented(FrameReport {
            slot: wait.slot,
            image_index,
            slot_wait_blocked: wait.blocked,
            graph: graph_stats,
            present,
            recreated,
        }))
    }

    /// Size to recreate at after a stale swapchain: the latest window size.
    fn target_extent(&mut self) -> Extent2d {
        self.resize
            .force_resize()
            .map_or(self.resize.current_size(), |event| event.extent)
    }

    /// Recreate the swapchain and everything sized to it.
    ///
    /// Idles the device, compares the old and new formats, recreates the
    /// dependent images, rebuilds the synchronizer and resizes the graph.
    /// The recreator must have switched the backend to the new swapchain;
    /// an image count mismatch fails with [`GraphicsError::SurfaceRecreation`].
    pub fn recreate(
        &mut self,
        graph: &mut RenderGraph<'_>,
        recreator: &mut dyn SurfaceRecreator,
        extent: Extent2d,
    ) -> Result<(), GraphicsError> {
        profile_scope!("recreate_swapchain");

        self.sync.wait_idle()?;

        let extent = extent.max(self.config.min_surface_size);
        let info = recreator.recreate_swapchain(extent)?;
        check_image_count(self.sync.backend(), &info)?;

        let format_changed = info.format != self.swapchain.format;
        if format_changed {
            log::info!(
                "Swapchain format changed: {:?} -> {:?}",
                self.swapchain.format,
                info.format
            );
        }

        recreator.recreate_dependent_images(&info, format_changed)?;
        self.sync.recreate(info.image_count())?;
        graph.resize(info.extent.width, info.extent.height);
        self.resize.set_current_size(info.extent);

        log::info!(
            "Swapchain recreated: {}x{}, {} images",
            info.extent.width,
            info.extent.height,
            info.image_count()
        );

        self.swapchain = info;
        self.recreations += 1;
        Ok(())
    }

    /// Drain all in-flight work. Call before destroying GPU resources.
    pub fn shutdown(&mut self) -> Result<(), CriticalError> {
        log::info!(
            "Frame loop shutting down after {} frames",
            self.sync.frame_count()
        );
        self.sync.wait_idle()
    }

    pub fn synchronizer(&self) -> &FrameSynchronizer {
        &self.sync
    }

    pub fn swapchain(&self) -> &SwapchainInfo {
        &self.swapchain
    }

    pub fn resize_manager(&self) -> &ResizeManager {
        &self.resize
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    /// Number of swapchain recreations so far.
    pub fn recreations(&self) -> u64 {
        self.recreations
    }

    pub fn stats(&self) -> SyncStats {
        self.sync.stats()
    }
}

impl std::fmt::Debug for FrameLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameLoop")
            .field("sync", &self.sync)
            .field("swapchain", &self.swapchain)
            .field("recreations", &self.recreations)
            .finish()
    }
}

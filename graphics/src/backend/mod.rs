//! GPU backend abstraction.
//!
//! Two seams separate the scheduler from the graphics API:
//!
//! - [`CommandRecorder`] receives the barriers and rendering scopes the
//!   render graph produces, plus whatever the pass closures record.
//! - [`GpuBackend`] owns queue-level work the frame synchronizer drives:
//!   fences, semaphores, command buffers, image acquisition, submission
//!   and presentation.
//!
//! Implementations:
//!
//! - [`DummyBackend`]: no GPU. Simulates the GPU timeline and captures
//!   recorded commands for inspection.
//! - [`vulkan::VulkanBackend`]: ash, behind the `vulkan-backend` feature.

mod barrier;
mod dummy;
mod error;

#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

use std::any::Any;
use std::time::Duration;

#[cfg(feature = "vulkan-backend")]
use ash::vk;

use crate::graph::RenderingInfo;
use crate::scheduler::{Fence, Semaphore};
use crate::types::ImageIndex;

pub use barrier::{AccessFlags, BarrierBatch, ImageBarrier, PipelineStages};
pub use dummy::{
    DummyBackend, DummyRecorder, GpuTimeline, RecordedCommand, Recording, ScriptedResult,
};
pub use error::BackendError;

/// Sink for the commands of one frame.
///
/// Recording into a command buffer cannot fail; failures surface when the
/// recording is ended or submitted.
pub trait CommandRecorder {
    /// Record one pipeline barrier covering every transition in `barriers`.
    fn pipeline_barrier(&mut self, barriers: &[ImageBarrier]);

    /// Open a rendering scope.
    fn begin_rendering(&mut self, info: &RenderingInfo);

    /// Close the current rendering scope.
    fn end_rendering(&mut self);

    /// Allow downcasting to the concrete recorder.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Handle to a GPU fence for CPU-GPU synchronization.
#[allow(clippy::large_enum_variant)]
pub enum GpuFence {
    /// Dummy backend fence.
    Dummy(Fence),
    /// Vulkan backend fence.
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        fence: vk::Fence,
    },
}

impl std::fmt::Debug for GpuFence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy(fence) => f.debug_tuple("GpuFence::Dummy").field(fence).finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { fence, .. } => f
                .debug_struct("GpuFence::Vulkan")
                .field("fence", fence)
                .finish_non_exhaustive(),
        }
    }
}

/// Handle to a GPU semaphore for GPU-GPU synchronization.
#[allow(clippy::large_enum_variant)]
pub enum GpuSemaphore {
    /// Dummy backend semaphore.
    Dummy(Semaphore),
    /// Vulkan backend semaphore.
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        semaphore: vk::Semaphore,
    },
}

impl std::fmt::Debug for GpuSemaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy(semaphore) => f
                .debug_tuple("GpuSemaphore::Dummy")
                .field(semaphore)
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { semaphore, .. } => f
                .debug_struct("GpuSemaphore::Vulkan")
                .field("semaphore", semaphore)
                .finish_non_exhaustive(),
        }
    }
}

/// Handle to a primary command buffer. Freed with its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuCommandBuffer {
    /// Dummy backend command buffer.
    Dummy { id: u64 },
    /// Vulkan backend command buffer.
    #[cfg(feature = "vulkan-backend")]
    Vulkan { buffer: vk::CommandBuffer },
}

// ============================================================================
// Vulkan Resource Cleanup (Drop implementations)
// ============================================================================

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuFence {
    fn drop(&mut self) {
        if let GpuFence::Vulkan { device, fence } = self {
            unsafe {
                device.destroy_fence(*fence, None);
            }
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuSemaphore {
    fn drop(&mut self) {
        if let GpuSemaphore::Vulkan { device, semaphore } = self {
            unsafe {
                device.destroy_semaphore(*semaphore, None);
            }
        }
    }
}

/// Result of requesting the next presentable image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image was acquired; its semaphore will be signaled.
    Acquired {
        /// Index of the acquired swapchain image.
        image_index: ImageIndex,
        /// The swapchain still works but no longer matches the surface.
        suboptimal: bool,
    },
    /// The swapchain is stale and must be recreated. Nothing was signaled.
    OutOfDate,
}

/// Result of presenting an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// The image was queued for presentation.
    Presented,
    /// Presented, but the swapchain no longer matches the surface.
    Suboptimal,
    /// The swapchain is stale and must be recreated.
    OutOfDate,
}

impl PresentOutcome {
    /// Returns true if the swapchain should be recreated.
    pub fn is_stale(self) -> bool {
        !matches!(self, Self::Presented)
    }
}

/// One queue submission of a frame.
#[derive(Debug, Clone, Copy)]
pub struct Submission<'a> {
    /// Recorded command buffer.
    pub command_buffer: &'a GpuCommandBuffer,
    /// Semaphore signaled by image acquisition.
    pub wait_semaphore: &'a GpuSemaphore,
    /// Stage that waits on `wait_semaphore`.
    pub wait_stages: PipelineStages,
    /// Semaphore presentation waits on.
    pub signal_semaphore: &'a GpuSemaphore,
    /// Fence signaled when the GPU finishes the submission.
    pub signal_fence: &'a GpuFence,
}

/// GPU backend trait for abstracting queue-level work.
pub trait GpuBackend: Send + Sync + 'static {
    /// Get the backend name.
    fn name(&self) -> &'static str;

    /// Number of images in the current swapchain.
    fn image_count(&self) -> u32;

    /// Create a fence for CPU-GPU synchronization.
    fn create_fence(&self, signaled: bool) -> Result<GpuFence, BackendError>;

    /// Create a semaphore for GPU-GPU synchronization.
    fn create_semaphore(&self) -> Result<GpuSemaphore, BackendError>;

    /// Allocate a primary command buffer.
    fn allocate_command_buffer(&self) -> Result<GpuCommandBuffer, BackendError>;

    /// Block until `fence` is signaled.
    ///
    /// Returns `Ok(false)` if `timeout` elapsed first. `None` waits forever.
    fn wait_fence(
        &self,
        fence: &GpuFence,
        timeout: Option<Duration>,
    ) -> Result<bool, BackendError>;

    /// Check if a fence is signaled (non-blocking).
    fn is_fence_signaled(&self, fence: &GpuFence) -> Result<bool, BackendError>;

    /// Return a fence to the unsignaled state.
    fn reset_fence(&self, fence: &GpuFence) -> Result<(), BackendError>;

    /// Request the next presentable image, signaling `signal` when it is ready.
    fn acquire_next_image(&self, signal: &GpuSemaphore) -> Result<AcquireOutcome, BackendError>;

    /// Reset `command_buffer` and begin recording into it.
    fn begin_recording(
        &self,
        command_buffer: &GpuCommandBuffer,
    ) -> Result<Box<dyn CommandRecorder>, BackendError>;

    /// Finish a recording started by [`begin_recording`](Self::begin_recording).
    fn end_recording(&self, recorder: Box<dyn CommandRecorder>) -> Result<(), BackendError>;

    /// Submit recorded work to the graphics queue.
    fn submit(&self, submission: &Submission<'_>) -> Result<(), BackendError>;

    /// Present `image_index` once `wait` is signaled.
    fn present(
        &self,
        image_index: ImageIndex,
        wait: &GpuSemaphore,
    ) -> Result<PresentOutcome, BackendError>;

    /// Block until the device has finished all submitted work.
    fn wait_idle(&self) -> Result<(), BackendError>;
}

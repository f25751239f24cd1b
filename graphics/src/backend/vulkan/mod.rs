//! Native Vulkan backend implementation using ash.
//!
//! The application owns the instance, device, surface and swapchain. This
//! backend wraps those handles with [`VulkanBackend::from_raw`] and does the
//! queue-level work the frame synchronizer drives. Rendering scopes use
//! dynamic rendering (Vulkan 1.3).

pub mod barriers;
mod command;
pub mod layout;
pub mod swapchain;

use std::time::Duration;

use ash::vk;
use parking_lot::Mutex;

use super::{
    AcquireOutcome, BackendError, CommandRecorder, GpuBackend, GpuCommandBuffer, GpuFence,
    GpuSemaphore, PresentOutcome, Submission,
};
use crate::profile_scope;
use crate::types::ImageIndex;

pub use barriers::VulkanRecorder;

const BACKEND_NAME: &str = "Vulkan";

/// Map a Vulkan result code to a backend error.
pub(crate) fn map_vk_error(operation: &'static str, result: vk::Result) -> BackendError {
    match result {
        vk::Result::ERROR_DEVICE_LOST => BackendError::DeviceLost,
        vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
            BackendError::OutOfMemory
        }
        other => BackendError::api(operation, format!("{:?}", other)),
    }
}

#[derive(Debug, Clone, Copy)]
struct SwapchainState {
    swapchain: vk::SwapchainKHR,
    image_count: u32,
}

/// Vulkan-based GPU backend over application-owned handles.
///
/// The backend owns only its command pool; the device, queue and swapchain
/// must outlive it.
pub struct VulkanBackend {
    device: ash::Device,
    /// Queue submission and presentation require external synchronization.
    queue: Mutex<vk::Queue>,
    swapchain_loader: ash::khr::swapchain::Device,
    swapchain: Mutex<SwapchainState>,
    /// Allocating from and resetting buffers of a pool require external
    /// synchronization.
    command_pool: Mutex<vk::CommandPool>,
}

impl VulkanBackend {
    /// Wrap existing Vulkan handles.
    ///
    /// `queue` must belong to `queue_family_index` and support graphics and
    /// presentation to `swapchain`.
    pub fn from_raw(
        device: ash::Device,
        queue: vk::Queue,
        queue_family_index: u32,
        swapchain_loader: ash::khr::swapchain::Device,
        swapchain: vk::SwapchainKHR,
    ) -> Result<Self, BackendError> {
        let image_count = swapchain::swapchain_images(&swapchain_loader, swapchain)?.len() as u32;
        let command_pool = command::create_command_pool(&device, queue_family_index)?;

        log::info!(
            "Vulkan backend: queue family {}, {} swapchain images",
            queue_family_index,
            image_count
        );

        Ok(Self {
            device,
            queue: Mutex::new(queue),
            swapchain_loader,
            swapchain: Mutex::new(SwapchainState {
                swapchain,
                image_count,
            }),
            command_pool: Mutex::new(command_pool),
        })
    }

    /// Switch to a recreated swapchain.
    ///
    /// Call after the device is idle, before the frame synchronizer is
    /// rebuilt.
    pub fn set_swapchain(&self, swapchain: vk::SwapchainKHR) -> Result<(), BackendError> {
        let image_count = swapchain::swapchain_images(&self.swapchain_loader, swapchain)?.len() as u32;
        *self.swapchain.lock() = SwapchainState {
            swapchain,
            image_count,
        };
        log::debug!("Vulkan backend: switched swapchain ({} images)", image_count);
        Ok(())
    }

    /// Images of the current swapchain.
    pub fn swapchain_images(&self) -> Result<Vec<vk::Image>, BackendError> {
        let swapchain = self.swapchain.lock().swapchain;
        swapchain::swapchain_images(&self.swapchain_loader, swapchain)
    }

    /// Get the ash device.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    fn fence(fence: &GpuFence) -> Result<vk::Fence, BackendError> {
        match fence {
            GpuFence::Vulkan { fence, .. } => Ok(*fence),
            _ => Err(BackendError::ForeignHandle(BACKEND_NAME)),
        }
    }

    fn semaphore(semaphore: &GpuSemaphore) -> Result<vk::Semaphore, BackendError> {
        match semaphore {
            GpuSemaphore::Vulkan { semaphore, .. } => Ok(*semaphore),
            _ => Err(BackendError::ForeignHandle(BACKEND_NAME)),
        }
    }

    fn command_buffer(command_buffer: &GpuCommandBuffer) -> Result<vk::CommandBuffer, BackendError> {
        match command_buffer {
            GpuCommandBuffer::Vulkan { buffer } => Ok(*buffer),
            _ => Err(BackendError::ForeignHandle(BACKEND_NAME)),
        }
    }
}

impl GpuBackend for VulkanBackend {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn image_count(&self) -> u32 {
        self.swapchain.lock().image_count
    }

    fn create_fence(&self, signaled: bool) -> Result<GpuFence, BackendError> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let fence_info = vk::FenceCreateInfo::default().flags(flags);

        let fence = unsafe { self.device.create_fence(&fence_info, None) }
            .map_err(|e| map_vk_error("vkCreateFence", e))?;

        Ok(GpuFence::Vulkan {
            device: self.device.clone(),
            fence,
        })
    }

    fn create_semaphore(&self) -> Result<GpuSemaphore, BackendError> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { self.device.create_semaphore(&semaphore_info, None) }
            .map_err(|e| map_vk_error("vkCreateSemaphore", e))?;

        Ok(GpuSemaphore::Vulkan {
            device: self.device.clone(),
            semaphore,
        })
    }

    fn allocate_command_buffer(&self) -> Result<GpuCommandBuffer, BackendError> {
        let pool = self.command_pool.lock();
        let buffer = command::allocate_primary(&self.device, *pool)?;
        Ok(GpuCommandBuffer::Vulkan { buffer })
    }

    fn wait_fence(
        &self,
        fence: &GpuFence,
        timeout: Option<Duration>,
    ) -> Result<bool, BackendError> {
        let fence = Self::fence(fence)?;
        let timeout_ns = timeout.map_or(u64::MAX, |t| t.as_nanos().min(u64::MAX as u128) as u64);

        match unsafe { self.device.wait_for_fences(&[fence], true, timeout_ns) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(e) => Err(map_vk_error("vkWaitForFences", e)),
        }
    }

    fn is_fence_signaled(&self, fence: &GpuFence) -> Result<bool, BackendError> {
        let fence = Self::fence(fence)?;
        unsafe { self.device.get_fence_status(fence) }
            .map_err(|e| map_vk_error("vkGetFenceStatus", e))
    }

    fn reset_fence(&self, fence: &GpuFence) -> Result<(), BackendError> {
        let fence = Self::fence(fence)?;
        unsafe { self.device.reset_fences(&[fence]) }.map_err(|e| map_vk_error("vkResetFences", e))
    }

    fn acquire_next_image(&self, signal: &GpuSemaphore) -> Result<AcquireOutcome, BackendError> {
        let semaphore = Self::semaphore(signal)?;
        let swapchain = self.swapchain.lock().swapchain;
        swapchain::acquire_next_image(&self.swapchain_loader, swapchain, semaphore)
    }

    fn begin_recording(
        &self,
        command_buffer: &GpuCommandBuffer,
    ) -> Result<Box<dyn CommandRecorder>, BackendError> {
        let cmd = Self::command_buffer(command_buffer)?;
        {
            let _pool = self.command_pool.lock();
            command::begin(&self.device, cmd)?;
        }
        Ok(Box::new(VulkanRecorder::new(self.device.clone(), cmd)))
    }

    fn end_recording(&self, mut recorder: Box<dyn CommandRecorder>) -> Result<(), BackendError> {
        let recorder = recorder
            .as_any_mut()
            .downcast_mut::<VulkanRecorder>()
            .ok_or(BackendError::ForeignHandle(BACKEND_NAME))?;
        command::end(&self.device, recorder.command_buffer())
    }

    fn submit(&self, submission: &Submission<'_>) -> Result<(), BackendError> {
        profile_scope!("queue_submit");

        let command_buffers = [Self::command_buffer(submission.command_buffer)?];
        let wait_semaphores = [Self::semaphore(submission.wait_semaphore)?];
        let wait_stages = [layout::pipeline_stages(submission.wait_stages)];
        let signal_semaphores = [Self::semaphore(submission.signal_semaphore)?];
        let fence = Self::fence(submission.signal_fence)?;

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        let queue = self.queue.lock();
        unsafe { self.device.queue_submit(*queue, &[submit_info], fence) }
            .map_err(|e| map_vk_error("vkQueueSubmit", e))
    }

    fn present(
        &self,
        image_index: ImageIndex,
        wait: &GpuSemaphore,
    ) -> Result<PresentOutcome, BackendError> {
        let wait = Self::semaphore(wait)?;
        let swapchain = self.swapchain.lock().swapchain;
        let queue = self.queue.lock();
        swapchain::present(&self.swapchain_loader, *queue, swapchain, image_index, wait)
    }

    fn wait_idle(&self) -> Result<(), BackendError> {
        unsafe { self.device.device_wait_idle() }.map_err(|e| map_vk_error("vkDeviceWaitIdle", e))
    }
}

impl std::fmt::Debug for VulkanBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanBackend")
            .field("swapchain", &*self.swapchain.lock())
            .finish_non_exhaustive()
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                log::error!("vkDeviceWaitIdle failed during backend drop: {:?}", e);
            }
            // Frees every command buffer allocated from the pool
            self.device
                .destroy_command_pool(*self.command_pool.get_mut(), None);
        }
    }
}

//! Swapchain image acquisition and presentation.
//!
//! A stale swapchain is a normal outcome here, not an error: both
//! `ERROR_OUT_OF_DATE_KHR` and `SUBOPTIMAL_KHR` are reported through
//! [`AcquireOutcome`] / [`PresentOutcome`] so the frame loop can recreate.

use ash::vk;

use super::map_vk_error;
use crate::backend::{AcquireOutcome, BackendError, PresentOutcome};
use crate::types::ImageIndex;

pub fn acquire_next_image(
    loader: &ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    signal: vk::Semaphore,
) -> Result<AcquireOutcome, BackendError> {
    let result =
        unsafe { loader.acquire_next_image(swapchain, u64::MAX, signal, vk::Fence::null()) };

    match result {
        Ok((index, suboptimal)) => Ok(AcquireOutcome::Acquired {
            image_index: ImageIndex(index),
            suboptimal,
        }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
        Err(e) => Err(map_vk_error("vkAcquireNextImageKHR", e)),
    }
}

pub fn present(
    loader: &ash::khr::swapchain::Device,
    queue: vk::Queue,
    swapchain: vk::SwapchainKHR,
    image_index: ImageIndex,
    wait: vk::Semaphore,
) -> Result<PresentOutcome, BackendError> {
    let wait_semaphores = [wait];
    let swapchains = [swapchain];
    let image_indices = [image_index.0];
    let present_info = vk::PresentInfoKHR::default()
        .wait_semaphores(&wait_semaphores)
        .swapchains(&swapchains)
        .image_indices(&image_indices);

    match unsafe { loader.queue_present(queue, &present_info) } {
        Ok(false) => Ok(PresentOutcome::Presented),
        Ok(true) => Ok(PresentOutcome::Suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
        Err(e) => Err(map_vk_error("vkQueuePresentKHR", e)),
    }
}

/// Images of `swapchain`, in presentation-engine index order.
pub fn swapchain_images(
    loader: &ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
) -> Result<Vec<vk::Image>, BackendError> {
    unsafe { loader.get_swapchain_images(swapchain) }
        .map_err(|e| map_vk_error("vkGetSwapchainImagesKHR", e))
}

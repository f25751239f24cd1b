//! Vulkan command pool and buffer management.

use ash::vk;

use super::map_vk_error;
use crate::backend::BackendError;

/// Create a command pool whose buffers can be reset individually.
pub fn create_command_pool(
    device: &ash::Device,
    queue_family_index: u32,
) -> Result<vk::CommandPool, BackendError> {
    let pool_info = vk::CommandPoolCreateInfo::default()
        .queue_family_index(queue_family_index)
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

    unsafe { device.create_command_pool(&pool_info, None) }
        .map_err(|e| map_vk_error("vkCreateCommandPool", e))
}

/// Allocate one primary command buffer from `pool`.
pub fn allocate_primary(
    device: &ash::Device,
    pool: vk::CommandPool,
) -> Result<vk::CommandBuffer, BackendError> {
    let alloc_info = vk::CommandBufferAllocateInfo::default()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);

    let buffers = unsafe { device.allocate_command_buffers(&alloc_info) }
        .map_err(|e| map_vk_error("vkAllocateCommandBuffers", e))?;
    buffers.into_iter().next().ok_or_else(|| {
        BackendError::ObjectCreationFailed("vkAllocateCommandBuffers returned nothing".into())
    })
}

/// Reset `cmd` and begin a one-time-submit recording.
pub fn begin(device: &ash::Device, cmd: vk::CommandBuffer) -> Result<(), BackendError> {
    unsafe { device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty()) }
        .map_err(|e| map_vk_error("vkResetCommandBuffer", e))?;

    let begin_info =
        vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    unsafe { device.begin_command_buffer(cmd, &begin_info) }
        .map_err(|e| map_vk_error("vkBeginCommandBuffer", e))
}

pub fn end(device: &ash::Device, cmd: vk::CommandBuffer) -> Result<(), BackendError> {
    unsafe { device.end_command_buffer(cmd) }.map_err(|e| map_vk_error("vkEndCommandBuffer", e))
}

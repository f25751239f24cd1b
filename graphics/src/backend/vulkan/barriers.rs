//! Command recording for Vulkan.
//!
//! [`VulkanRecorder`] turns the graph's barrier batches into a single
//! `vkCmdPipelineBarrier` each and its rendering scopes into dynamic
//! rendering begin/end pairs.

use std::any::Any;

use ash::vk;

use super::layout;
use crate::backend::{CommandRecorder, ImageBarrier, PipelineStages};
use crate::graph::{Attachment, RenderingInfo};

/// Records into one primary command buffer between begin and end.
pub struct VulkanRecorder {
    device: ash::Device,
    command_buffer: vk::CommandBuffer,
}

impl VulkanRecorder {
    pub(super) fn new(device: ash::Device, command_buffer: vk::CommandBuffer) -> Self {
        Self {
            device,
            command_buffer,
        }
    }

    /// Raw command buffer, for pass closures recording draw calls.
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    /// Device the command buffer belongs to.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }
}

impl std::fmt::Debug for VulkanRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanRecorder")
            .field("command_buffer", &self.command_buffer)
            .finish_non_exhaustive()
    }
}

fn image_memory_barrier(barrier: &ImageBarrier) -> vk::ImageMemoryBarrier<'static> {
    vk::ImageMemoryBarrier::default()
        .old_layout(layout::image_layout(barrier.old_state))
        .new_layout(layout::image_layout(barrier.new_state))
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(layout::image(barrier.image))
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: layout::image_aspects(barrier.aspects),
            base_mip_level: 0,
            level_count: vk::REMAINING_MIP_LEVELS,
            base_array_layer: 0,
            layer_count: vk::REMAINING_ARRAY_LAYERS,
        })
        .src_access_mask(layout::access_flags(barrier.src_access))
        .dst_access_mask(layout::access_flags(barrier.dst_access))
}

fn rendering_attachment(
    attachment: &Attachment,
    image_layout: vk::ImageLayout,
) -> vk::RenderingAttachmentInfo<'static> {
    vk::RenderingAttachmentInfo::default()
        .image_view(layout::image_view(attachment.view))
        .image_layout(image_layout)
        .load_op(layout::load_op(attachment.load_op))
        .store_op(layout::store_op(attachment.store_op))
        .clear_value(layout::clear_value(attachment.load_op))
}

impl CommandRecorder for VulkanRecorder {
    fn pipeline_barrier(&mut self, barriers: &[ImageBarrier]) {
        if barriers.is_empty() {
            return;
        }

        let (src, dst) = barriers.iter().fold(
            (PipelineStages::empty(), PipelineStages::empty()),
            |(src, dst), b| (src | b.src_stages, dst | b.dst_stages),
        );
        let image_barriers: Vec<vk::ImageMemoryBarrier> =
            barriers.iter().map(image_memory_barrier).collect();

        unsafe {
            self.device.cmd_pipeline_barrier(
                self.command_buffer,
                layout::pipeline_stages(src),
                layout::pipeline_stages(dst),
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &image_barriers,
            );
        }
    }

    fn begin_rendering(&mut self, info: &RenderingInfo) {
        let color_attachments: Vec<vk::RenderingAttachmentInfo> = info
            .color
            .iter()
            .map(|a| rendering_attachment(a, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL))
            .collect();
        let depth_attachment = info.depth.as_ref().map(|a| {
            rendering_attachment(a, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
        });

        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: layout::extent(info.extent),
            })
            .layer_count(1)
            .color_attachments(&color_attachments);
        if let Some(depth) = depth_attachment.as_ref() {
            rendering_info = rendering_info.depth_attachment(depth);
            if info.depth.is_some_and(|d| d.format.has_stencil()) {
                rendering_info = rendering_info.stencil_attachment(depth);
            }
        }

        unsafe {
            self.device
                .cmd_begin_rendering(self.command_buffer, &rendering_info);
        }
    }

    fn end_rendering(&mut self) {
        unsafe {
            self.device.cmd_end_rendering(self.command_buffer);
        }
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

//! Conversions from graph states and backend-neutral flags to Vulkan.

use ash::vk;
use ash::vk::Handle;

use crate::backend::{AccessFlags, PipelineStages};
use crate::graph::{ClearValue, LoadOp, ResourceState, StoreOp};
use crate::types::{Extent2d, ImageAspects, ImageHandle, ImageViewHandle, TextureFormat};

/// Image layout an image must be in while in `state`.
pub fn image_layout(state: ResourceState) -> vk::ImageLayout {
    match state {
        ResourceState::Undefined => vk::ImageLayout::UNDEFINED,
        ResourceState::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ResourceState::DepthAttachment => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ResourceState::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ResourceState::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        ResourceState::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ResourceState::PresentSource => vk::ImageLayout::PRESENT_SRC_KHR,
    }
}

pub fn pipeline_stages(stages: PipelineStages) -> vk::PipelineStageFlags {
    const MAPPING: [(PipelineStages, vk::PipelineStageFlags); 7] = [
        (PipelineStages::TOP_OF_PIPE, vk::PipelineStageFlags::TOP_OF_PIPE),
        (
            PipelineStages::EARLY_FRAGMENT_TESTS,
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        ),
        (
            PipelineStages::FRAGMENT_SHADER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        ),
        (
            PipelineStages::LATE_FRAGMENT_TESTS,
            vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
        ),
        (
            PipelineStages::COLOR_ATTACHMENT_OUTPUT,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
        (PipelineStages::TRANSFER, vk::PipelineStageFlags::TRANSFER),
        (
            PipelineStages::BOTTOM_OF_PIPE,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        ),
    ];

    MAPPING
        .iter()
        .filter(|(ours, _)| stages.contains(*ours))
        .fold(vk::PipelineStageFlags::empty(), |acc, (_, vk)| acc | *vk)
}

pub fn access_flags(access: AccessFlags) -> vk::AccessFlags {
    const MAPPING: [(AccessFlags, vk::AccessFlags); 7] = [
        (AccessFlags::SHADER_READ, vk::AccessFlags::SHADER_READ),
        (
            AccessFlags::COLOR_ATTACHMENT_READ,
            vk::AccessFlags::COLOR_ATTACHMENT_READ,
        ),
        (
            AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ),
        (
            AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
        ),
        (
            AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        (AccessFlags::TRANSFER_READ, vk::AccessFlags::TRANSFER_READ),
        (AccessFlags::TRANSFER_WRITE, vk::AccessFlags::TRANSFER_WRITE),
    ];

    MAPPING
        .iter()
        .filter(|(ours, _)| access.contains(*ours))
        .fold(vk::AccessFlags::empty(), |acc, (_, vk)| acc | *vk)
}

pub fn image_aspects(aspects: ImageAspects) -> vk::ImageAspectFlags {
    let mut result = vk::ImageAspectFlags::empty();
    if aspects.contains(ImageAspects::COLOR) {
        result |= vk::ImageAspectFlags::COLOR;
    }
    if aspects.contains(ImageAspects::DEPTH) {
        result |= vk::ImageAspectFlags::DEPTH;
    }
    if aspects.contains(ImageAspects::STENCIL) {
        result |= vk::ImageAspectFlags::STENCIL;
    }
    result
}

/// Convert TextureFormat to Vulkan format.
pub fn texture_format(format: TextureFormat) -> vk::Format {
    match format {
        TextureFormat::R8Unorm => vk::Format::R8_UNORM,
        TextureFormat::R32Float => vk::Format::R32_SFLOAT,
        TextureFormat::Rg16Float => vk::Format::R16G16_SFLOAT,
        TextureFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::Rgba8UnormSrgb => vk::Format::R8G8B8A8_SRGB,
        TextureFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        TextureFormat::Bgra8UnormSrgb => vk::Format::B8G8R8A8_SRGB,
        TextureFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        TextureFormat::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
        TextureFormat::Depth16Unorm => vk::Format::D16_UNORM,
        TextureFormat::Depth24PlusStencil8 => vk::Format::D24_UNORM_S8_UINT,
        TextureFormat::Depth32Float => vk::Format::D32_SFLOAT,
        TextureFormat::Depth32FloatStencil8 => vk::Format::D32_SFLOAT_S8_UINT,
    }
}

/// Map a surface format back to a TextureFormat, if it is one we track.
pub fn from_vk_format(format: vk::Format) -> Option<TextureFormat> {
    Some(match format {
        vk::Format::R8_UNORM => TextureFormat::R8Unorm,
        vk::Format::R32_SFLOAT => TextureFormat::R32Float,
        vk::Format::R16G16_SFLOAT => TextureFormat::Rg16Float,
        vk::Format::R8G8B8A8_UNORM => TextureFormat::Rgba8Unorm,
        vk::Format::R8G8B8A8_SRGB => TextureFormat::Rgba8UnormSrgb,
        vk::Format::B8G8R8A8_UNORM => TextureFormat::Bgra8Unorm,
        vk::Format::B8G8R8A8_SRGB => TextureFormat::Bgra8UnormSrgb,
        vk::Format::R16G16B16A16_SFLOAT => TextureFormat::Rgba16Float,
        vk::Format::R32G32B32A32_SFLOAT => TextureFormat::Rgba32Float,
        vk::Format::D16_UNORM => TextureFormat::Depth16Unorm,
        vk::Format::D24_UNORM_S8_UINT => TextureFormat::Depth24PlusStencil8,
        vk::Format::D32_SFLOAT => TextureFormat::Depth32Float,
        vk::Format::D32_SFLOAT_S8_UINT => TextureFormat::Depth32FloatStencil8,
        _ => return None,
    })
}

pub fn load_op(op: LoadOp) -> vk::AttachmentLoadOp {
    match op {
        LoadOp::Clear(_) => vk::AttachmentLoadOp::CLEAR,
        LoadOp::Load => vk::AttachmentLoadOp::LOAD,
        LoadOp::DontCare => vk::AttachmentLoadOp::DONT_CARE,
    }
}

pub fn store_op(op: StoreOp) -> vk::AttachmentStoreOp {
    match op {
        StoreOp::Store => vk::AttachmentStoreOp::STORE,
        StoreOp::DontCare => vk::AttachmentStoreOp::DONT_CARE,
    }
}

/// Clear value of a load op. Zeroed when the op does not clear.
pub fn clear_value(op: LoadOp) -> vk::ClearValue {
    match op {
        LoadOp::Clear(ClearValue::Color(float32)) => vk::ClearValue {
            color: vk::ClearColorValue { float32 },
        },
        LoadOp::Clear(ClearValue::DepthStencil { depth, stencil }) => vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
        },
        LoadOp::Load | LoadOp::DontCare => vk::ClearValue::default(),
    }
}

pub fn extent(extent: Extent2d) -> vk::Extent2D {
    vk::Extent2D {
        width: extent.width,
        height: extent.height,
    }
}

pub fn image(handle: ImageHandle) -> vk::Image {
    vk::Image::from_raw(handle.as_raw())
}

pub fn image_view(handle: ImageViewHandle) -> vk::ImageView {
    vk::ImageView::from_raw(handle.as_raw())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attachment_layouts() {
        assert_eq!(
            image_layout(ResourceState::ColorAttachment),
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );
        assert_eq!(
            image_layout(ResourceState::DepthAttachment),
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        );
        assert_eq!(
            image_layout(ResourceState::PresentSource),
            vk::ImageLayout::PRESENT_SRC_KHR
        );
    }

    #[test]
    fn test_stage_and_access_masks() {
        let stages = pipeline_stages(
            PipelineStages::EARLY_FRAGMENT_TESTS | PipelineStages::LATE_FRAGMENT_TESTS,
        );
        assert_eq!(
            stages,
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS
        );
        assert_eq!(
            access_flags(AccessFlags::empty()),
            vk::AccessFlags::empty()
        );
        assert_eq!(
            access_flags(AccessFlags::SHADER_READ),
            vk::AccessFlags::SHADER_READ
        );
    }

    #[test]
    fn test_depth_stencil_aspects() {
        let aspects = image_aspects(TextureFormat::Depth24PlusStencil8.aspects());
        assert_eq!(
            aspects,
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
    }

    #[test]
    fn test_format_round_trip_for_swapchain_formats() {
        for format in [TextureFormat::Bgra8UnormSrgb, TextureFormat::Rgba8Unorm] {
            assert_eq!(from_vk_format(texture_format(format)), Some(format));
        }
        assert_eq!(from_vk_format(vk::Format::A2B10G10R10_UNORM_PACK32), None);
    }

    #[test]
    fn test_raw_handles() {
        let raw = 0xdead_beef;
        assert_eq!(image(ImageHandle::from_raw(raw)).as_raw(), raw);
        assert_eq!(image_view(ImageViewHandle::from_raw(raw)).as_raw(), raw);
    }
}

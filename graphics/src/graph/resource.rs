//! Resource handles, usage states and the per-frame resource table.

use std::collections::HashMap;

use crate::backend::{AccessFlags, PipelineStages};
use crate::types::{Extent2d, ImageHandle, ImageViewHandle, TextureFormat};

/// Handle to a resource in the render graph.
///
/// Handles are assigned at import time and stay valid until the next
/// [`RenderGraph::clear`](super::RenderGraph::clear). Lookups of unknown
/// names return [`ResourceHandle::INVALID`], which resolves to nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceHandle(u32);

impl ResourceHandle {
    /// Sentinel returned for unknown resources. Never dereference it.
    pub const INVALID: Self = Self(u32::MAX);

    pub(crate) fn new(index: u32) -> Self {
        Self(index)
    }

    /// Get the index of this resource.
    pub fn index(&self) -> u32 {
        self.0
    }

    /// Returns false for the sentinel handle.
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

/// Usage state of an image, tracked across the passes of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceState {
    /// Contents undefined. Initial state of every import.
    #[default]
    Undefined,
    /// Written as a color attachment.
    ColorAttachment,
    /// Written as a depth (and stencil) attachment.
    DepthAttachment,
    /// Sampled from shaders.
    ShaderReadOnly,
    /// Source of a transfer.
    TransferSrc,
    /// Destination of a transfer.
    TransferDst,
    /// Ready for presentation.
    PresentSource,
}

impl ResourceState {
    /// Attachment state a pass writing an image of this format needs.
    pub fn attachment_for(format: TextureFormat) -> Self {
        if format.is_depth_stencil() {
            Self::DepthAttachment
        } else {
            Self::ColorAttachment
        }
    }

    /// Stages that produced the contents when leaving this state.
    pub fn src_stages(self) -> PipelineStages {
        match self {
            Self::Undefined => PipelineStages::TOP_OF_PIPE,
            Self::ColorAttachment => PipelineStages::COLOR_ATTACHMENT_OUTPUT,
            Self::DepthAttachment => PipelineStages::LATE_FRAGMENT_TESTS,
            Self::ShaderReadOnly => PipelineStages::FRAGMENT_SHADER,
            Self::TransferSrc | Self::TransferDst => PipelineStages::TRANSFER,
            Self::PresentSource => PipelineStages::BOTTOM_OF_PIPE,
        }
    }

    /// Accesses that must be made available when leaving this state.
    pub fn src_access(self) -> AccessFlags {
        match self {
            Self::Undefined | Self::PresentSource => AccessFlags::empty(),
            Self::ColorAttachment => AccessFlags::COLOR_ATTACHMENT_WRITE,
            Self::DepthAttachment => AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            // Reads have nothing to flush.
            Self::ShaderReadOnly | Self::TransferSrc => AccessFlags::empty(),
            Self::TransferDst => AccessFlags::TRANSFER_WRITE,
        }
    }

    /// Stages that consume the contents when entering this state.
    pub fn dst_stages(self) -> PipelineStages {
        match self {
            Self::Undefined => PipelineStages::TOP_OF_PIPE,
            Self::ColorAttachment => PipelineStages::COLOR_ATTACHMENT_OUTPUT,
            Self::DepthAttachment => {
                PipelineStages::EARLY_FRAGMENT_TESTS | PipelineStages::LATE_FRAGMENT_TESTS
            }
            Self::ShaderReadOnly => PipelineStages::FRAGMENT_SHADER,
            Self::TransferSrc | Self::TransferDst => PipelineStages::TRANSFER,
            Self::PresentSource => PipelineStages::BOTTOM_OF_PIPE,
        }
    }

    /// Accesses that must be made visible when entering this state.
    pub fn dst_access(self) -> AccessFlags {
        match self {
            Self::Undefined | Self::PresentSource => AccessFlags::empty(),
            Self::ColorAttachment => AccessFlags::COLOR_ATTACHMENT_WRITE,
            Self::DepthAttachment => {
                AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                    | AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
            }
            Self::ShaderReadOnly => AccessFlags::SHADER_READ,
            Self::TransferSrc => AccessFlags::TRANSFER_READ,
            Self::TransferDst => AccessFlags::TRANSFER_WRITE,
        }
    }
}

/// A named image imported into the graph for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    name: String,
    handle: ResourceHandle,
    image: ImageHandle,
    view: ImageViewHandle,
    extent: Extent2d,
    format: TextureFormat,
    state: ResourceState,
    is_backbuffer: bool,
}

impl Resource {
    /// Resource name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Handle assigned at import.
    pub fn handle(&self) -> ResourceHandle {
        self.handle
    }

    /// Borrowed image.
    pub fn image(&self) -> ImageHandle {
        self.image
    }

    /// Borrowed image view.
    pub fn view(&self) -> ImageViewHandle {
        self.view
    }

    /// Current extent.
    pub fn extent(&self) -> Extent2d {
        self.extent
    }

    /// Image format.
    pub fn format(&self) -> TextureFormat {
        self.format
    }

    /// Current usage state.
    pub fn state(&self) -> ResourceState {
        self.state
    }

    /// Whether this resource must end the frame ready for presentation.
    pub fn is_backbuffer(&self) -> bool {
        self.is_backbuffer
    }

    pub(crate) fn set_state(&mut self, state: ResourceState) {
        self.state = state;
    }
}

/// Description of an image being imported.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ImportDesc {
    pub image: ImageHandle,
    pub view: ImageViewHandle,
    pub extent: Extent2d,
    pub format: TextureFormat,
    pub is_backbuffer: bool,
}

/// Named resources of the current frame.
#[derive(Debug, Default)]
pub(crate) struct ResourceTable {
    resources: Vec<Resource>,
    by_name: HashMap<String, ResourceHandle>,
    backbuffer: Option<ResourceHandle>,
}

impl ResourceTable {
    /// Register or overwrite a named resource. Overwrites keep the handle.
    pub fn import(&mut self, name: &str, desc: ImportDesc) -> ResourceHandle {
        let handle = match self.by_name.get(name) {
            Some(&existing) => existing,
            None => {
                let handle = ResourceHandle::new(self.resources.len() as u32);
                self.by_name.insert(name.to_owned(), handle);
                self.resources.push(Resource {
                    name: name.to_owned(),
                    handle,
                    image: desc.image,
                    view: desc.view,
                    extent: desc.extent,
                    format: desc.format,
                    state: ResourceState::Undefined,
                    is_backbuffer: false,
                });
                handle
            }
        };

        if desc.is_backbuffer {
            if let Some(previous) = self.backbuffer
                && previous != handle
            {
                log::warn!(
                    "Resource '{}' replaces '{}' as the backbuffer",
                    name,
                    self.resources[previous.index() as usize].name
                );
                self.resources[previous.index() as usize].is_backbuffer = false;
            }
            self.backbuffer = Some(handle);
        } else if self.backbuffer == Some(handle) {
            self.backbuffer = None;
        }

        let resource = &mut self.resources[handle.index() as usize];
        resource.image = desc.image;
        resource.view = desc.view;
        resource.extent = desc.extent;
        resource.format = desc.format;
        resource.state = ResourceState::Undefined;
        resource.is_backbuffer = desc.is_backbuffer;

        handle
    }

    pub fn lookup(&self, name: &str) -> Option<ResourceHandle> {
        self.by_name.get(name).copied()
    }

    pub fn get(&self, handle: ResourceHandle) -> Option<&Resource> {
        self.resources.get(handle.index() as usize)
    }

    pub fn get_mut(&mut self, handle: ResourceHandle) -> Option<&mut Resource> {
        self.resources.get_mut(handle.index() as usize)
    }

    pub fn backbuffer(&self) -> Option<ResourceHandle> {
        self.backbuffer
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.iter()
    }

    pub fn set_extent_all(&mut self, extent: Extent2d) {
        for resource in &mut self.resources {
            resource.extent = extent;
        }
    }

    pub fn clear(&mut self) {
        self.resources.clear();
        self.by_name.clear();
        self.backbuffer = None;
    }
}

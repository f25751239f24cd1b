//! Attachment types for the rendering scope opened around each pass.

use crate::types::{Extent2d, ImageHandle, ImageViewHandle, TextureFormat};

/// Value an attachment is cleared to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    /// RGBA color.
    Color([f32; 4]),
    /// Depth and stencil.
    DepthStencil {
        /// Depth value.
        depth: f32,
        /// Stencil value.
        stencil: u32,
    },
}

/// Operation to perform when loading an attachment at the start of a scope.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadOp {
    /// Clear the attachment with a specified value.
    Clear(ClearValue),
    /// Load the existing contents of the attachment.
    Load,
    /// Don't care about the existing contents.
    DontCare,
}

/// Operation to perform when storing an attachment at the end of a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StoreOp {
    /// Store the attachment contents for later use.
    #[default]
    Store,
    /// Don't care about the contents after the scope.
    DontCare,
}

/// One attachment of a rendering scope.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attachment {
    /// Image being rendered to.
    pub image: ImageHandle,
    /// View bound as the attachment.
    pub view: ImageViewHandle,
    /// Attachment format.
    pub format: TextureFormat,
    /// Load operation.
    pub load_op: LoadOp,
    /// Store operation.
    pub store_op: StoreOp,
}

/// Rendering scope around a pass: at most one color and one depth target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderingInfo {
    /// Render area, starting at the origin.
    pub extent: Extent2d,
    /// Color attachment.
    pub color: Option<Attachment>,
    /// Depth attachment.
    pub depth: Option<Attachment>,
}

impl RenderingInfo {
    /// Returns true if the scope has no attachments.
    pub fn is_empty(&self) -> bool {
        self.color.is_none() && self.depth.is_none()
    }
}

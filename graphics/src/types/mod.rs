//! Common types shared by the render graph, the frame synchronizer and the
//! backends.
//!
//! This module contains format enums, extents, clear values and the raw
//! handles the graph borrows from the application.

mod common;
mod handle;
mod texture;

pub use common::{ClearValues, Extent2d};
pub use handle::{ImageHandle, ImageIndex, ImageViewHandle, SlotIndex};
pub use texture::{ImageAspects, TextureFormat};

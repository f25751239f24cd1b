//! Raw handles and index newtypes.
//!
//! The graph never owns GPU images. It stores the raw 64-bit API handle of
//! an image and its view, which the Vulkan backend turns back into
//! `vk::Image` / `vk::ImageView`.

use static_assertions::assert_impl_all;

/// Borrowed handle to an externally owned image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ImageHandle(u64);

impl ImageHandle {
    /// Null image handle.
    pub const NULL: Self = Self(0);

    /// Wrap a raw API handle.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw API handle.
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

/// Borrowed handle to an externally owned image view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ImageViewHandle(u64);

impl ImageViewHandle {
    /// Null view handle.
    pub const NULL: Self = Self(0);

    /// Wrap a raw API handle.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw API handle.
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

/// Index of a frame-in-flight slot (`0..frames_in_flight`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SlotIndex(pub usize);

impl SlotIndex {
    /// The slot after this one in a ring of `count` slots.
    pub fn next(self, count: usize) -> Self {
        Self((self.0 + 1) % count)
    }
}

impl std::fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "slot {}", self.0)
    }
}

/// Index of a swapchain image, as returned by image acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ImageIndex(pub u32);

impl ImageIndex {
    /// Index usable for per-image tables.
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for ImageIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "image {}", self.0)
    }
}

assert_impl_all!(ImageHandle: Send, Sync, Copy);
assert_impl_all!(ImageViewHandle: Send, Sync, Copy);
assert_impl_all!(SlotIndex: Send, Sync, Copy);
assert_impl_all!(ImageIndex: Send, Sync, Copy);

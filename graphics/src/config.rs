//! Frame pacing and render graph configuration.

use std::time::Duration;

use crate::types::{ClearValues, Extent2d};

/// Configuration for the frame loop.
///
/// # Example
///
/// ```
/// use lantern_graphics::FrameConfig;
///
/// let config = FrameConfig::default()
///     .with_frames_in_flight(3)
///     .with_clear_color([0.1, 0.1, 0.1, 1.0]);
/// assert_eq!(config.frames_in_flight, 3);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct FrameConfig {
    /// Number of frames the CPU may record ahead of the GPU. At least 1.
    pub frames_in_flight: usize,
    /// Clear values used when a pass opens a rendering scope.
    pub clear_values: ClearValues,
    /// Quiet period after the last resize event before recreating the swapchain.
    pub resize_debounce: Duration,
    /// Smallest surface size the swapchain is recreated with.
    pub min_surface_size: Extent2d,
    /// Upper bound on a single fence wait. `None` waits forever.
    pub fence_timeout: Option<Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            clear_values: ClearValues::default(),
            resize_debounce: Duration::from_millis(50),
            min_surface_size: Extent2d::new(1, 1),
            fence_timeout: None,
        }
    }
}

impl FrameConfig {
    /// Set the number of frames in flight.
    pub fn with_frames_in_flight(mut self, frames_in_flight: usize) -> Self {
        self.frames_in_flight = frames_in_flight;
        self
    }

    /// Set the color attachment clear color.
    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_values.color = color;
        self
    }

    /// Set the depth attachment clear value.
    pub fn with_clear_depth(mut self, depth: f32) -> Self {
        self.clear_values.depth = depth;
        self
    }

    /// Set the resize debounce period.
    pub fn with_resize_debounce(mut self, debounce: Duration) -> Self {
        self.resize_debounce = debounce;
        self
    }

    /// Set the minimum surface size. Dimensions are clamped to at least 1.
    pub fn with_min_surface_size(mut self, size: Extent2d) -> Self {
        self.min_surface_size = size.max(Extent2d::new(1, 1));
        self
    }

    /// Set the fence wait timeout.
    pub fn with_fence_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.fence_timeout = timeout;
        self
    }
}

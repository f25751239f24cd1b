//! Window resize management with debouncing.
//!
//! During a drag-resize the OS sends many resize events in quick succession.
//! Recreating the swapchain on each one stalls the GPU every time, so
//! [`ResizeManager`] buffers the events and reports a single resize once the
//! window has been quiet for the debounce period:
//!
//! ```text
//! Events:  R  R  R  R  R  R  ... R [50ms quiet]
//!          └──────────────────────┘      │
//!            (events buffered)           ▼
//!                              Single swapchain resize
//! ```

use std::time::{Duration, Instant};

use crate::types::Extent2d;

/// Resize event information returned by [`ResizeManager::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeEvent {
    /// Size to recreate the swapchain at.
    pub extent: Extent2d,
    /// Size before this resize.
    pub previous: Extent2d,
}

/// Debounces window resize events.
///
/// # Example
///
/// ```
/// use lantern_graphics::resize::ResizeManager;
/// use lantern_graphics::types::Extent2d;
/// use std::time::Duration;
///
/// let mut manager = ResizeManager::new(Extent2d::new(1920, 1080), Duration::from_millis(50));
///
/// manager.on_resize_event(1024, 768);
/// assert!(manager.is_resizing());
///
/// // Before the debounce period elapses, nothing is reported
/// assert!(manager.update().is_none());
/// ```
#[derive(Debug)]
pub struct ResizeManager {
    /// Buffered size, not yet applied.
    pending_size: Option<Extent2d>,

    /// Time of the last accepted resize event.
    last_event_time: Instant,

    debounce_duration: Duration,

    /// Size last applied to the swapchain.
    current_size: Extent2d,

    /// Zero-size swapchains are invalid, so events are clamped to this.
    min_size: Extent2d,
}

impl ResizeManager {
    /// Create a new resize manager.
    ///
    /// * `initial_size` - Initial window/swapchain size.
    /// * `debounce` - Quiet period after the last event before a resize is
    ///   reported.
    pub fn new(initial_size: Extent2d, debounce: Duration) -> Self {
        Self {
            pending_size: None,
            last_event_time: Instant::now(),
            debounce_duration: debounce,
            current_size: initial_size,
            min_size: Extent2d::new(1, 1),
        }
    }

    /// Set the minimum allowed size. Never below 1x1.
    pub fn set_min_size(&mut self, min: Extent2d) {
        self.min_size = min.max(Extent2d::new(1, 1));
    }

    /// Set the debounce duration.
    pub fn set_debounce(&mut self, debounce: Duration) {
        self.debounce_duration = debounce;
    }

    /// Handle an OS window resize event.
    ///
    /// The resize is buffered and reported by [`update`](Self::update) after
    /// the debounce period.
    pub fn on_resize_event(&mut self, width: u32, height: u32) {
        let new_size = Extent2d::new(width, height).max(self.min_size);

        if Some(new_size) == self.pending_size {
            return;
        }
        if new_size == self.current_size {
            // Window went back to the applied size before the debounce fired
            self.pending_size = None;
            return;
        }

        self.pending_size = Some(new_size);
        self.last_event_time = Instant::now();

        log::trace!(
            "Resize event: {}x{} (pending, debounce={}ms)",
            new_size.width,
            new_size.height,
            self.debounce_duration.as_millis()
        );
    }

    /// Check if a resize should be applied.
    ///
    /// Call this every frame. Returns `Some` once the debounce period has
    /// elapsed since the last event.
    pub fn update(&mut self) -> Option<ResizeEvent> {
        if let Some(extent) = self.pending_size
            && self.last_event_time.elapsed() >= self.debounce_duration
        {
            return Some(self.apply(extent, "applied"));
        }
        None
    }

    /// Apply the pending resize immediately, ignoring the debounce.
    pub fn force_resize(&mut self) -> Option<ResizeEvent> {
        let extent = self.pending_size?;
        Some(self.apply(extent, "forced"))
    }

    fn apply(&mut self, extent: Extent2d, how: &str) -> ResizeEvent {
        let previous = self.current_size;
        self.pending_size = None;
        self.current_size = extent;

        log::trace!(
            "Resize {}: {}x{} -> {}x{}",
            how,
            previous.width,
            previous.height,
            extent.width,
            extent.height
        );

        ResizeEvent { extent, previous }
    }

    /// Record a size applied outside the debounce path, such as after the
    /// presentation engine reported the surface out of date.
    pub fn set_current_size(&mut self, extent: Extent2d) {
        self.current_size = extent.max(self.min_size);
        if self.pending_size == Some(self.current_size) {
            self.pending_size = None;
        }
    }

    /// Size last applied to the swapchain.
    pub fn current_size(&self) -> Extent2d {
        self.current_size
    }

    /// Size that will be applied after the debounce period, if any.
    pub fn pending_size(&self) -> Option<Extent2d> {
        self.pending_size
    }

    /// Whether a resize is buffered and not yet applied.
    pub fn is_resizing(&self) -> bool {
        self.pending_size.is_some()
    }

    /// Time left before the pending resize is reported.
    ///
    /// `Duration::ZERO` if no resize is pending.
    pub fn remaining_debounce(&self) -> Duration {
        if self.pending_size.is_some() {
            self.debounce_duration
                .saturating_sub(self.last_event_time.elapsed())
        } else {
            Duration::ZERO
        }
    }

    /// Drop any pending resize.
    pub fn cancel_pending(&mut self) {
        self.pending_size = None;
    }
}

//! Frame pacing: multiple frames in flight over a swapchain.
//!
//! [`FrameSynchronizer`] bounds how far the CPU may record ahead of the
//! GPU. It owns one [`FrameSlot`] per frame in flight and one
//! "render finished" semaphore per swapchain image.
//!
//! # Synchronization Model
//!
//! | Object | Count | Signaled by | Waited on by |
//! |--------|-------|-------------|--------------|
//! | in-flight fence | per slot | queue submission | CPU, before reusing the slot |
//! | image-available semaphore | per slot | image acquisition | submission (color output stage) |
//! | render-finished semaphore | per image | submission | presentation |
//!
//! # Frame Sequence
//!
//! ```text
//! wait_for_frame ─► acquire_next_image ─► begin_recording ─► submit ─► present ─► advance_frame
//!                          │
//!                          └─ OutOfDate: frame abandoned, slot not advanced
//! ```
//!
//! With 2 frames in flight:
//!
//! ```text
//! Slot 0: [Frame 0] ──► [Frame 2] ──► [Frame 4] ──►
//! Slot 1: [Frame 1] ──► [Frame 3] ──► [Frame 5] ──►
//! ```
//!
//! When the swapchain has a different number of images than there are
//! slots, an acquired image may still be in use by another slot's frame.
//! The synchronizer remembers which slot last used each image and waits on
//! that slot's fence before handing the image out again.
//!
//! # Thread Safety
//!
//! `FrameSynchronizer` is **not thread-safe**. It should be owned by a single
//! thread (typically the main/render thread).

mod sync;

pub use sync::{Fence, FenceStatus, Semaphore};

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::backend::{
    AcquireOutcome, BackendError, CommandRecorder, GpuBackend, GpuCommandBuffer, GpuFence,
    GpuSemaphore, PipelineStages, PresentOutcome, Submission,
};
use crate::config::FrameConfig;
use crate::error::CriticalError;
use crate::profile_scope;
use crate::types::{ImageIndex, SlotIndex};

/// Where the current frame is in its sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    /// Between frames.
    Idle,
    /// The current slot's fence has been waited on.
    SlotReady,
    /// An image was acquired for this frame.
    ImageAcquired,
    /// The slot's command buffer is recording.
    Recording,
    /// The frame was submitted.
    Submitted,
    /// The frame was presented (or presentation found the swapchain stale).
    Presented,
}

/// Frame synchronizer errors.
#[derive(Error, Debug)]
pub enum SyncError {
    /// An operation was called outside its place in the frame sequence.
    #[error("{operation} called out of order (frame phase is {phase:?})")]
    OutOfOrder {
        operation: &'static str,
        phase: FramePhase,
    },
    /// Unrecoverable failure.
    #[error(transparent)]
    Critical(#[from] CriticalError),
}

/// Result of [`FrameSynchronizer::wait_for_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotWait {
    /// Slot the frame records into.
    pub slot: SlotIndex,
    /// Whether the CPU had to block on the slot's fence.
    pub blocked: bool,
}

/// Counters for frame pacing diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Frames that reached submission.
    pub frames_submitted: u64,
    /// `wait_for_frame` calls that blocked.
    pub slot_waits_blocked: u64,
    /// Acquired images that were still in use by another slot.
    pub image_waits_blocked: u64,
    /// Acquire or present calls that found the swapchain stale.
    pub stale_swapchain_events: u64,
}

/// Per-slot synchronization objects.
#[derive(Debug)]
pub struct FrameSlot {
    command_buffer: GpuCommandBuffer,
    image_available: GpuSemaphore,
    in_flight: GpuFence,
}

impl FrameSlot {
    fn new(backend: &dyn GpuBackend) -> Result<Self, BackendError> {
        Ok(Self {
            command_buffer: backend.allocate_command_buffer()?,
            image_available: backend.create_semaphore()?,
            // Signaled so the first wait on every slot returns immediately.
            in_flight: backend.create_fence(true)?,
        })
    }

    /// Command buffer recorded by frames in this slot.
    pub fn command_buffer(&self) -> &GpuCommandBuffer {
        &self.command_buffer
    }

    /// Fence signaled when this slot's last submission finished.
    pub fn fence(&self) -> &GpuFence {
        &self.in_flight
    }
}

/// Paces CPU recording against a bounded number of in-flight GPU frames.
pub struct FrameSynchronizer {
    backend: Arc<dyn GpuBackend>,
    slots: Vec<FrameSlot>,
    render_finished: Vec<GpuSemaphore>,
    images_in_flight: Vec<Option<SlotIndex>>,
    current_slot: SlotIndex,
    acquired_image: Option<ImageIndex>,
    phase: FramePhase,
    frame_count: u64,
    needs_recreate: bool,
    fence_timeout: Option<Duration>,
    stats: SyncStats,
}

impl FrameSynchronizer {
    /// Create the synchronizer for the backend's current swapchain.
    ///
    /// Fails with [`CriticalError::NoFrameSlots`] if
    /// `config.frames_in_flight` is 0.
    pub fn new(backend: Arc<dyn GpuBackend>, config: &FrameConfig) -> Result<Self, CriticalError> {
        if config.frames_in_flight == 0 {
            return Err(CriticalError::NoFrameSlots);
        }

        let image_count = backend.image_count();
        let slots = Self::create_slots(backend.as_ref(), config.frames_in_flight)?;
        let render_finished = Self::create_image_semaphores(backend.as_ref(), image_count)?;

        log::info!(
            "Frame synchronizer: {} frames in flight, {} swapchain images ({} backend)",
            config.frames_in_flight,
            image_count,
            backend.name()
        );

        Ok(Self {
            backend,
            slots,
            render_finished,
            images_in_flight: vec![None; image_count as usize],
            current_slot: SlotIndex(0),
            acquired_image: None,
            phase: FramePhase::Idle,
            frame_count: 0,
            needs_recreate: false,
            fence_timeout: config.fence_timeout,
            stats: SyncStats::default(),
        })
    }

    fn create_slots(
        backend: &dyn GpuBackend,
        count: usize,
    ) -> Result<Vec<FrameSlot>, CriticalError> {
        (0..count)
            .map(|_| FrameSlot::new(backend).map_err(CriticalError::ObjectCreation))
            .collect()
    }

    fn create_image_semaphores(
        backend: &dyn GpuBackend,
        image_count: u32,
    ) -> Result<Vec<GpuSemaphore>, CriticalError> {
        (0..image_count)
            .map(|_| {
                backend
                    .create_semaphore()
                    .map_err(CriticalError::ObjectCreation)
            })
            .collect()
    }

    fn expect_phase(
        &self,
        operation: &'static str,
        allowed: &[FramePhase],
    ) -> Result<(), SyncError> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(SyncError::OutOfOrder {
                operation,
                phase: self.phase,
            })
        }
    }

    fn acquired(&self, operation: &'static str) -> Result<ImageIndex, SyncError> {
        self.acquired_image.ok_or(SyncError::OutOfOrder {
            operation,
            phase: self.phase,
        })
    }

    fn slot(&self, slot: SlotIndex) -> &FrameSlot {
        &self.slots[slot.0]
    }

    fn fence_signaled(&self, slot: SlotIndex) -> Result<bool, CriticalError> {
        self.backend
            .is_fence_signaled(&self.slot(slot).in_flight)
            .map_err(|source| CriticalError::FenceWait { slot, source })
    }

    fn wait_on_slot(&self, slot: SlotIndex) -> Result<(), CriticalError> {
        let signaled = self
            .backend
            .wait_fence(&self.slot(slot).in_flight, self.fence_timeout)
            .map_err(|source| CriticalError::FenceWait { slot, source })?;

        if signaled {
            Ok(())
        } else {
            Err(CriticalError::FenceTimeout {
                slot,
                timeout: self.fence_timeout.unwrap_or(Duration::ZERO),
            })
        }
    }

    /// Begin a new frame.
    ///
    /// Waits for the current slot's previous submission to finish. This
    /// blocks if the GPU is `frames_in_flight` frames behind. The fence
    /// is not reset here; that happens once an image has been acquired.
    pub fn wait_for_frame(&mut self) -> Result<SlotWait, SyncError> {
        profile_scope!("wait_for_frame");
        self.expect_phase("wait_for_frame", &[FramePhase::Idle])?;

        let slot = self.current_slot;
        let blocked = !self.fence_signaled(slot)?;
        if blocked {
            log::trace!("Frame {}: waiting for {}", self.frame_count + 1, slot);
            self.stats.slot_waits_blocked += 1;
        }
        self.wait_on_slot(slot)?;

        self.frame_count += 1;
        self.phase = FramePhase::SlotReady;

        log::trace!("Begin frame {} ({})", self.frame_count, slot);

        Ok(SlotWait { slot, blocked })
    }

    /// Acquire the next swapchain image for this frame.
    ///
    /// On [`AcquireOutcome::OutOfDate`] the frame is abandoned: nothing is
    /// recorded or submitted, the slot does not advance and the next call
    /// must be [`wait_for_frame`](Self::wait_for_frame) after recreation.
    pub fn acquire_next_image(&mut self) -> Result<AcquireOutcome, SyncError> {
        profile_scope!("acquire_next_image");
        self.expect_phase("acquire_next_image", &[FramePhase::SlotReady])?;

        let slot = self.current_slot;
        let outcome = self
            .backend
            .acquire_next_image(&self.slot(slot).image_available)
            .map_err(CriticalError::Acquire)?;

        let (image_index, suboptimal) = match outcome {
            AcquireOutcome::OutOfDate => {
                log::debug!(
                    "Swapchain out of date on acquire, abandoning frame {}",
                    self.frame_count
                );
                self.stats.stale_swapchain_events += 1;
                self.needs_recreate = true;
                self.phase = FramePhase::Idle;
                return Ok(outcome);
            }
            AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            } => (image_index, suboptimal),
        };

        if image_index.as_usize() >= self.images_in_flight.len() {
            return Err(CriticalError::Acquire(BackendError::Validation(format!(
                "acquired {} but the swapchain was created with {} images",
                image_index,
                self.images_in_flight.len()
            )))
            .into());
        }

        if suboptimal {
            log::debug!("Swapchain suboptimal on acquire");
            self.needs_recreate = true;
        }

        if let Some(owner) = self.images_in_flight[image_index.as_usize()]
            && owner != slot
        {
            if !self.fence_signaled(owner)? {
                log::trace!("{} still in use by {}, waiting", image_index, owner);
                self.stats.image_waits_blocked += 1;
            }
            self.wait_on_slot(owner)?;
        }
        self.images_in_flight[image_index.as_usize()] = Some(slot);

        self.backend
            .reset_fence(&self.slot(slot).in_flight)
            .map_err(|source| CriticalError::FenceReset { slot, source })?;

        self.acquired_image = Some(image_index);
        self.phase = FramePhase::ImageAcquired;

        Ok(outcome)
    }

    /// Begin recording the current slot's command buffer.
    pub fn begin_recording(&mut self) -> Result<Box<dyn CommandRecorder>, SyncError> {
        self.expect_phase("begin_recording", &[FramePhase::ImageAcquired])?;

        let recorder = self
            .backend
            .begin_recording(&self.slot(self.current_slot).command_buffer)
            .map_err(CriticalError::RecordingBegin)?;

        self.phase = FramePhase::Recording;
        Ok(recorder)
    }

    /// End recording and submit the frame.
    ///
    /// The submission waits on the slot's image-available semaphore at the
    /// color attachment output stage, signals the acquired image's
    /// render-finished semaphore and signals the slot's fence.
    pub fn submit(&mut self, recorder: Box<dyn CommandRecorder>) -> Result<(), SyncError> {
        profile_scope!("submit");
        self.expect_phase("submit", &[FramePhase::Recording])?;
        let image = self.acquired("submit")?;
        let slot = self.current_slot;

        self.backend
            .end_recording(recorder)
            .map_err(CriticalError::RecordingEnd)?;

        let frame_slot = self.slot(slot);
        self.backend
            .submit(&Submission {
                command_buffer: &frame_slot.command_buffer,
                wait_semaphore: &frame_slot.image_available,
                wait_stages: PipelineStages::COLOR_ATTACHMENT_OUTPUT,
                signal_semaphore: &self.render_finished[image.as_usize()],
                signal_fence: &frame_slot.in_flight,
            })
            .map_err(|source| CriticalError::Submit { slot, source })?;

        self.stats.frames_submitted += 1;
        self.phase = FramePhase::Submitted;

        log::trace!("Submitted frame {} ({}, {})", self.frame_count, slot, image);
        Ok(())
    }

    /// Present the acquired image once rendering has finished.
    ///
    /// A stale swapchain is reported through the outcome and flags
    /// recreation; any other failure is critical.
    pub fn present(&mut self) -> Result<PresentOutcome, SyncError> {
        profile_scope!("present");
        self.expect_phase("present", &[FramePhase::Submitted])?;
        let image = self.acquired("present")?;

        let outcome = self
            .backend
            .present(image, &self.render_finished[image.as_usize()])
            .map_err(|source| CriticalError::Present { image, source })?;

        if outcome.is_stale() {
            log::debug!("Swapchain stale on present ({:?})", outcome);
            self.stats.stale_swapchain_events += 1;
            self.needs_recreate = true;
        }

        self.phase = FramePhase::Presented;
        Ok(outcome)
    }

    /// Move to the next slot. Only valid once the frame was submitted.
    pub fn advance_frame(&mut self) -> Result<SlotIndex, SyncError> {
        self.expect_phase(
            "advance_frame",
            &[FramePhase::Submitted, FramePhase::Presented],
        )?;

        log::trace!("End frame {} ({})", self.frame_count, self.current_slot);

        self.current_slot = self.current_slot.next(self.slots.len());
        self.acquired_image = None;
        self.phase = FramePhase::Idle;
        Ok(self.current_slot)
    }

    /// Wait for all in-flight GPU work to complete.
    ///
    /// Call this before destroying GPU resources or recreating the swapchain.
    pub fn wait_idle(&self) -> Result<(), CriticalError> {
        log::trace!("Waiting for GPU idle ({} slots)", self.slots.len());
        self.backend
            .wait_idle()
            .map_err(CriticalError::DeviceIdle)?;
        log::trace!("GPU idle");
        Ok(())
    }

    /// Rebuild slots and per-image objects after the swapchain was recreated.
    ///
    /// Drains in-flight work first. The slot index restarts at 0.
    pub fn recreate(&mut self, image_count: u32) -> Result<(), SyncError> {
        self.expect_phase("recreate", &[FramePhase::Idle])?;
        self.wait_idle()?;

        let frames_in_flight = self.slots.len();
        self.slots = Self::create_slots(self.backend.as_ref(), frames_in_flight)?;
        self.render_finished = Self::create_image_semaphores(self.backend.as_ref(), image_count)?;
        self.images_in_flight = vec![None; image_count as usize];
        self.current_slot = SlotIndex(0);
        self.acquired_image = None;
        self.needs_recreate = false;

        log::info!(
            "Frame synchronizer recreated: {} frames in flight, {} swapchain images",
            frames_in_flight,
            image_count
        );
        Ok(())
    }

    /// Check if a slot's previous submission has finished (non-blocking).
    ///
    /// # Panics
    ///
    /// Panics if `slot` is out of range.
    pub fn is_slot_ready(&self, slot: SlotIndex) -> Result<bool, CriticalError> {
        assert!(slot.0 < self.slots.len(), "Invalid slot index");
        self.fence_signaled(slot)
    }

    /// Command buffer of the current slot.
    pub fn command_buffer(&self) -> &GpuCommandBuffer {
        &self.slot(self.current_slot).command_buffer
    }

    /// Number of frames that can be in flight simultaneously.
    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Number of swapchain images the per-image objects were built for.
    pub fn image_count(&self) -> u32 {
        self.render_finished.len() as u32
    }

    /// Current frame slot.
    pub fn current_slot(&self) -> SlotIndex {
        self.current_slot
    }

    /// Image acquired for the current frame, if any.
    pub fn acquired_image(&self) -> Option<ImageIndex> {
        self.acquired_image
    }

    /// Slot that last used `image`, if any.
    pub fn image_owner(&self, image: ImageIndex) -> Option<SlotIndex> {
        self.images_in_flight.get(image.as_usize()).copied().flatten()
    }

    /// Current phase of the frame sequence.
    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    /// Backend the synchronizer records and submits through.
    pub fn backend(&self) -> &dyn GpuBackend {
        self.backend.as_ref()
    }

    /// Total number of frames started.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Whether an acquire or present reported a stale swapchain since the
    /// last [`recreate`](Self::recreate).
    pub fn needs_recreate(&self) -> bool {
        self.needs_recreate
    }

    /// Pacing counters.
    pub fn stats(&self) -> SyncStats {
        self.stats
    }
}

impl std::fmt::Debug for FrameSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSynchronizer")
            .field("backend", &self.backend.name())
            .field("frames_in_flight", &self.slots.len())
            .field("image_count", &self.render_finished.len())
            .field("current_slot", &self.current_slot)
            .field("phase", &self.phase)
            .field("frame_count", &self.frame_count)
            .finish_non_exhaustive()
    }
}

impl Drop for FrameSynchronizer {
    fn drop(&mut self) {
        // Fences and semaphores are destroyed with the slots.
        if let Err(err) = self.backend.wait_idle() {
            log::error!("Failed to drain GPU work before dropping frame slots: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;

    fn synchronizer(frames_in_flight: usize) -> FrameSynchronizer {
        let backend: Arc<dyn GpuBackend> = Arc::new(DummyBackend::new());
        let config = FrameConfig::default().with_frames_in_flight(frames_in_flight);
        FrameSynchronizer::new(backend, &config).unwrap()
    }

    fn run_frame(sync: &mut FrameSynchronizer) -> SlotWait {
        let wait = sync.wait_for_frame().unwrap();
        sync.acquire_next_image().unwrap();
        let recorder = sync.begin_recording().unwrap();
        sync.submit(recorder).unwrap();
        sync.present().unwrap();
        sync.advance_frame().unwrap();
        wait
    }

    #[test]
    fn test_new() {
        let sync = synchronizer(2);
        assert_eq!(sync.frames_in_flight(), 2);
        assert_eq!(sync.image_count(), 3);
        assert_eq!(sync.current_slot(), SlotIndex(0));
        assert_eq!(sync.frame_count(), 0);
        assert_eq!(sync.phase(), FramePhase::Idle);
    }

    #[test]
    fn test_zero_frames_rejected() {
        let backend: Arc<dyn GpuBackend> = Arc::new(DummyBackend::new());
        let config = FrameConfig::default().with_frames_in_flight(0);
        assert!(matches!(
            FrameSynchronizer::new(backend, &config),
            Err(CriticalError::NoFrameSlots)
        ));
    }

    #[test]
    fn test_fresh_slots_are_ready() {
        let sync = synchronizer(3);
        for slot in 0..3 {
            assert!(sync.is_slot_ready(SlotIndex(slot)).unwrap());
        }
    }

    #[test]
    #[should_panic(expected = "Invalid slot index")]
    fn test_is_slot_ready_invalid() {
        let sync = synchronizer(2);
        let _ = sync.is_slot_ready(SlotIndex(5));
    }

    #[test]
    fn test_advance_wraps() {
        let mut sync = synchronizer(3);
        let slots: Vec<usize> = (0..4).map(|_| run_frame(&mut sync).slot.0).collect();
        assert_eq!(slots, vec![0, 1, 2, 0]);
        assert_eq!(sync.frame_count(), 4);
        assert_eq!(sync.stats().frames_submitted, 4);
    }

    #[test]
    fn test_out_of_order_calls() {
        let mut sync = synchronizer(2);

        assert!(matches!(
            sync.acquire_next_image(),
            Err(SyncError::OutOfOrder {
                operation: "acquire_next_image",
                phase: FramePhase::Idle
            })
        ));
        assert!(matches!(
            sync.advance_frame(),
            Err(SyncError::OutOfOrder { .. })
        ));

        sync.wait_for_frame().unwrap();
        assert!(matches!(
            sync.wait_for_frame(),
            Err(SyncError::OutOfOrder { .. })
        ));
        assert!(matches!(sync.present(), Err(SyncError::OutOfOrder { .. })));
    }

    #[test]
    fn test_image_ownership_recorded() {
        let mut sync = synchronizer(2);
        run_frame(&mut sync);
        assert_eq!(sync.image_owner(ImageIndex(0)), Some(SlotIndex(0)));
        assert_eq!(sync.image_owner(ImageIndex(1)), None);
    }

    #[test]
    fn test_recreate_requires_idle_phase() {
        let mut sync = synchronizer(2);
        sync.wait_for_frame().unwrap();
        assert!(matches!(
            sync.recreate(3),
            Err(SyncError::OutOfOrder { .. })
        ));
    }
}

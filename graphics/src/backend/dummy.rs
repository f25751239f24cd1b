//! Dummy GPU backend for testing and development.
//!
//! This backend doesn't perform actual GPU operations. It simulates the
//! GPU timeline so the frame synchronizer can be exercised without
//! hardware and validates semaphore usage. With capture enabled
//! ([`DummyBackend::set_capture`]) it also keeps every finished recording
//! and every presented image index; capture is off by default so long runs
//! hold no per-frame history.
//!
//! # Timelines
//!
//! | Mode | Fence signaled |
//! |------|----------------|
//! | [`GpuTimeline::Immediate`] | at submit |
//! | [`GpuTimeline::Deferred`] | when a CPU wait needs it, in submission order |
//! | [`GpuTimeline::Manual`] | when [`DummyBackend::complete_next`] is called |

use std::any::Any;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::graph::RenderingInfo;
use crate::scheduler::{Fence, Semaphore};
use crate::types::ImageIndex;

use super::{
    AcquireOutcome, BackendError, CommandRecorder, GpuBackend, GpuCommandBuffer, GpuFence,
    GpuSemaphore, ImageBarrier, PresentOutcome, Submission,
};

const BACKEND_NAME: &str = "Dummy";

/// When the simulated GPU completes submitted work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GpuTimeline {
    /// Work completes as soon as it is submitted.
    #[default]
    Immediate,
    /// Work stays pending until a CPU wait needs it, then completes in
    /// submission order. Every such wait counts as blocking.
    Deferred,
    /// Work completes only when the test drives the timeline. Waits block
    /// the calling thread.
    Manual,
}

/// Scripted result for the next acquire or present call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedResult {
    /// Report the swapchain as out of date.
    OutOfDate,
    /// Succeed but report the swapchain as suboptimal.
    Suboptimal,
    /// Fail with [`BackendError::DeviceLost`].
    DeviceLost,
}

/// A command captured by [`DummyRecorder`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    /// One pipeline barrier with all its transitions.
    Barrier(Vec<ImageBarrier>),
    /// Rendering scope opened.
    BeginRendering(RenderingInfo),
    /// Rendering scope closed.
    EndRendering,
    /// Marker inserted by a pass.
    Marker(String),
}

/// Command recorder that captures commands in memory.
#[derive(Debug, Default)]
pub struct DummyRecorder {
    command_buffer: u64,
    commands: Vec<RecordedCommand>,
}

impl DummyRecorder {
    /// Create a recorder not tied to any command buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a marker, typically from a pass's execute closure.
    pub fn mark(&mut self, label: impl Into<String>) {
        self.commands.push(RecordedCommand::Marker(label.into()));
    }

    /// Commands captured so far.
    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    /// Take the captured commands.
    pub fn take_commands(&mut self) -> Vec<RecordedCommand> {
        std::mem::take(&mut self.commands)
    }

    /// All barriers captured so far, flattened in recording order.
    pub fn barriers(&self) -> impl Iterator<Item = &ImageBarrier> {
        self.commands.iter().flat_map(|command| match command {
            RecordedCommand::Barrier(barriers) => barriers.as_slice(),
            _ => Default::default(),
        })
    }
}

impl CommandRecorder for DummyRecorder {
    fn pipeline_barrier(&mut self, barriers: &[ImageBarrier]) {
        log::trace!(
            "DummyRecorder[{}]: pipeline barrier ({} transitions)",
            self.command_buffer,
            barriers.len()
        );
        self.commands.push(RecordedCommand::Barrier(barriers.to_vec()));
    }

    fn begin_rendering(&mut self, info: &RenderingInfo) {
        log::trace!(
            "DummyRecorder[{}]: begin rendering {}x{}",
            self.command_buffer,
            info.extent.width,
            info.extent.height
        );
        self.commands.push(RecordedCommand::BeginRendering(*info));
    }

    fn end_rendering(&mut self) {
        self.commands.push(RecordedCommand::EndRendering);
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A recording handed back through [`GpuBackend::end_recording`].
#[derive(Debug, Clone)]
pub struct Recording {
    /// Command buffer the commands were recorded into.
    pub command_buffer: u64,
    /// Captured commands.
    pub commands: Vec<RecordedCommand>,
}

#[derive(Debug, Default)]
struct DummyState {
    timeline: GpuTimeline,
    image_count: u32,
    next_image: u32,
    pending: VecDeque<Fence>,
    acquire_script: VecDeque<ScriptedResult>,
    present_script: VecDeque<ScriptedResult>,
    fail_next_submit: bool,
    recording: Option<u64>,
    capture: bool,
    recordings: Vec<Recording>,
    submissions: u64,
    presented_count: u64,
    presented: Vec<ImageIndex>,
}

/// Dummy GPU backend.
#[derive(Debug)]
pub struct DummyBackend {
    state: Mutex<DummyState>,
    next_command_buffer: AtomicU64,
}

impl DummyBackend {
    /// Create a new dummy backend with three swapchain images and an
    /// immediate timeline.
    pub fn new() -> Self {
        Self::with_timeline(GpuTimeline::Immediate)
    }

    /// Create a dummy backend with the given timeline.
    pub fn with_timeline(timeline: GpuTimeline) -> Self {
        Self {
            state: Mutex::new(DummyState {
                timeline,
                image_count: 3,
                ..Default::default()
            }),
            next_command_buffer: AtomicU64::new(1),
        }
    }

    /// Set the swapchain image count. Acquisition restarts at image 0.
    ///
    /// # Panics
    ///
    /// Panics if `image_count` is 0.
    pub fn set_image_count(&self, image_count: u32) -> &Self {
        assert!(image_count > 0, "image_count must be at least 1");
        let mut state = self.state.lock();
        state.image_count = image_count;
        state.next_image = 0;
        self
    }

    /// Keep finished recordings and presented image indices for inspection.
    ///
    /// Turning capture off drops whatever was kept so far.
    pub fn set_capture(&self, capture: bool) -> &Self {
        let mut state = self.state.lock();
        state.capture = capture;
        if !capture {
            state.recordings.clear();
            state.presented.clear();
        }
        self
    }

    /// Change the timeline mode. Already pending work stays pending.
    pub fn set_timeline(&self, timeline: GpuTimeline) {
        self.state.lock().timeline = timeline;
    }

    /// Queue a result for an upcoming acquire call.
    pub fn script_acquire(&self, result: ScriptedResult) {
        self.state.lock().acquire_script.push_back(result);
    }

    /// Queue a result for an upcoming present call.
    pub fn script_present(&self, result: ScriptedResult) {
        self.state.lock().present_script.push_back(result);
    }

    /// Make the next submit fail.
    pub fn fail_next_submit(&self) {
        self.state.lock().fail_next_submit = true;
    }

    /// Complete the oldest pending submission.
    ///
    /// Returns `false` if nothing was pending.
    pub fn complete_next(&self) -> bool {
        let mut state = self.state.lock();
        match state.pending.pop_front() {
            Some(fence) => {
                log::trace!("DummyBackend: completing submission (fence {})", fence.id());
                fence.signal();
                true
            }
            None => false,
        }
    }

    /// Complete every pending submission. Returns how many completed.
    pub fn complete_all(&self) -> usize {
        let mut state = self.state.lock();
        let count = state.pending.len();
        for fence in state.pending.drain(..) {
            fence.signal();
        }
        count
    }

    /// Number of submissions the simulated GPU has not finished.
    pub fn pending_submissions(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Total number of successful submissions.
    pub fn submission_count(&self) -> u64 {
        self.state.lock().submissions
    }

    /// Total number of presents that reached the swapchain.
    pub fn presented_count(&self) -> u64 {
        self.state.lock().presented_count
    }

    /// Image indices presented while capture was enabled, in order.
    pub fn presented_images(&self) -> Vec<ImageIndex> {
        self.state.lock().presented.clone()
    }

    /// Take every recording finished while capture was enabled.
    pub fn take_recordings(&self) -> Vec<Recording> {
        std::mem::take(&mut self.state.lock().recordings)
    }

    fn dummy_fence(fence: &GpuFence) -> Result<&Fence, BackendError> {
        match fence {
            GpuFence::Dummy(fence) => Ok(fence),
            #[cfg(feature = "vulkan-backend")]
            _ => Err(BackendError::ForeignHandle(BACKEND_NAME)),
        }
    }

    fn dummy_semaphore(semaphore: &GpuSemaphore) -> Result<&Semaphore, BackendError> {
        match semaphore {
            GpuSemaphore::Dummy(semaphore) => Ok(semaphore),
            #[cfg(feature = "vulkan-backend")]
            _ => Err(BackendError::ForeignHandle(BACKEND_NAME)),
        }
    }

    fn dummy_command_buffer(command_buffer: &GpuCommandBuffer) -> Result<u64, BackendError> {
        match command_buffer {
            GpuCommandBuffer::Dummy { id } => Ok(*id),
            #[cfg(feature = "vulkan-backend")]
            _ => Err(BackendError::ForeignHandle(BACKEND_NAME)),
        }
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuBackend for DummyBackend {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn image_count(&self) -> u32 {
        self.state.lock().image_count
    }

    fn create_fence(&self, signaled: bool) -> Result<GpuFence, BackendError> {
        let fence = if signaled {
            Fence::new_signaled()
        } else {
            Fence::new_unsignaled()
        };
        log::trace!("DummyBackend: created fence {} (signaled={})", fence.id(), signaled);
        Ok(GpuFence::Dummy(fence))
    }

    fn create_semaphore(&self) -> Result<GpuSemaphore, BackendError> {
        Ok(GpuSemaphore::Dummy(Semaphore::new()))
    }

    fn allocate_command_buffer(&self) -> Result<GpuCommandBuffer, BackendError> {
        let id = self.next_command_buffer.fetch_add(1, Ordering::Relaxed);
        Ok(GpuCommandBuffer::Dummy { id })
    }

    fn wait_fence(
        &self,
        fence: &GpuFence,
        timeout: Option<Duration>,
    ) -> Result<bool, BackendError> {
        let fence = Self::dummy_fence(fence)?;
        if fence.is_signaled() {
            return Ok(true);
        }

        let timeline = {
            let mut state = self.state.lock();
            if fence.is_signaled() {
                return Ok(true);
            }
            if !state.pending.iter().any(|p| p.same_as(fence)) {
                return Err(BackendError::Validation(format!(
                    "waiting on fence {} with no pending submission would never return",
                    fence.id()
                )));
            }
            if state.timeline == GpuTimeline::Deferred {
                while let Some(done) = state.pending.pop_front() {
                    done.signal();
                    if done.same_as(fence) {
                        break;
                    }
                }
            }
            state.timeline
        };

        match (timeline, timeout) {
            (GpuTimeline::Manual, Some(timeout)) => Ok(fence.wait_timeout(timeout)),
            _ => {
                fence.wait();
                Ok(true)
            }
        }
    }

    fn is_fence_signaled(&self, fence: &GpuFence) -> Result<bool, BackendError> {
        Ok(Self::dummy_fence(fence)?.is_signaled())
    }

    fn reset_fence(&self, fence: &GpuFence) -> Result<(), BackendError> {
        let fence = Self::dummy_fence(fence)?;
        if self.state.lock().pending.iter().any(|p| p.same_as(fence)) {
            return Err(BackendError::Validation(format!(
                "fence {} reset while its submission is pending",
                fence.id()
            )));
        }
        fence.reset();
        Ok(())
    }

    fn acquire_next_image(&self, signal: &GpuSemaphore) -> Result<AcquireOutcome, BackendError> {
        let semaphore = Self::dummy_semaphore(signal)?;
        let mut state = self.state.lock();

        let suboptimal = match state.acquire_script.pop_front() {
            Some(ScriptedResult::OutOfDate) => {
                log::trace!("DummyBackend: acquire reports out of date");
                return Ok(AcquireOutcome::OutOfDate);
            }
            Some(ScriptedResult::DeviceLost) => return Err(BackendError::DeviceLost),
            Some(ScriptedResult::Suboptimal) => true,
            None => false,
        };

        if !semaphore.signal() {
            return Err(BackendError::Validation(format!(
                "acquire signals semaphore {} which already has a pending signal",
                semaphore.id()
            )));
        }

        let image_index = ImageIndex(state.next_image);
        state.next_image = (state.next_image + 1) % state.image_count;
        log::trace!("DummyBackend: acquired {}", image_index);

        Ok(AcquireOutcome::Acquired {
            image_index,
            suboptimal,
        })
    }

    fn begin_recording(
        &self,
        command_buffer: &GpuCommandBuffer,
    ) -> Result<Box<dyn CommandRecorder>, BackendError> {
        let id = Self::dummy_command_buffer(command_buffer)?;
        let mut state = self.state.lock();
        if let Some(active) = state.recording {
            return Err(BackendError::Validation(format!(
                "command buffer {active} is still recording"
            )));
        }
        state.recording = Some(id);

        Ok(Box::new(DummyRecorder {
            command_buffer: id,
            commands: Vec::new(),
        }))
    }

    fn end_recording(&self, mut recorder: Box<dyn CommandRecorder>) -> Result<(), BackendError> {
        let recorder = recorder
            .as_any_mut()
            .downcast_mut::<DummyRecorder>()
            .ok_or(BackendError::ForeignHandle(BACKEND_NAME))?;

        let mut state = self.state.lock();
        if state.recording != Some(recorder.command_buffer) {
            return Err(BackendError::Validation(format!(
                "command buffer {} is not recording",
                recorder.command_buffer
            )));
        }
        state.recording = None;
        if state.capture {
            state.recordings.push(Recording {
                command_buffer: recorder.command_buffer,
                commands: recorder.take_commands(),
            });
        }
        Ok(())
    }

    fn submit(&self, submission: &Submission<'_>) -> Result<(), BackendError> {
        Self::dummy_command_buffer(submission.command_buffer)?;
        let wait = Self::dummy_semaphore(submission.wait_semaphore)?;
        let signal = Self::dummy_semaphore(submission.signal_semaphore)?;
        let fence = Self::dummy_fence(submission.signal_fence)?;

        let mut state = self.state.lock();
        if std::mem::take(&mut state.fail_next_submit) {
            return Err(BackendError::api("submit", "scripted failure"));
        }
        if fence.is_signaled() {
            return Err(BackendError::Validation(format!(
                "submit signals fence {} which is already signaled",
                fence.id()
            )));
        }
        if !wait.consume() {
            return Err(BackendError::Validation(format!(
                "submit waits on semaphore {} which nothing signals",
                wait.id()
            )));
        }
        signal.signal();

        state.submissions += 1;
        match state.timeline {
            GpuTimeline::Immediate => fence.signal(),
            GpuTimeline::Deferred | GpuTimeline::Manual => state.pending.push_back(fence.clone()),
        }

        log::trace!(
            "DummyBackend: submission {} (fence {})",
            state.submissions,
            fence.id()
        );
        Ok(())
    }

    fn present(
        &self,
        image_index: ImageIndex,
        wait: &GpuSemaphore,
    ) -> Result<PresentOutcome, BackendError> {
        let wait = Self::dummy_semaphore(wait)?;
        let mut state = self.state.lock();

        if image_index.0 >= state.image_count {
            return Err(BackendError::Validation(format!(
                "present of {} but the swapchain has {} images",
                image_index, state.image_count
            )));
        }
        if !wait.consume() {
            return Err(BackendError::Validation(format!(
                "present waits on semaphore {} which nothing signals",
                wait.id()
            )));
        }

        let outcome = match state.present_script.pop_front() {
            Some(ScriptedResult::OutOfDate) => PresentOutcome::OutOfDate,
            Some(ScriptedResult::Suboptimal) => PresentOutcome::Suboptimal,
            Some(ScriptedResult::DeviceLost) => return Err(BackendError::DeviceLost),
            None => PresentOutcome::Presented,
        };

        if outcome != PresentOutcome::OutOfDate {
            state.presented_count += 1;
            if state.capture {
                state.presented.push(image_index);
            }
        }
        Ok(outcome)
    }

    fn wait_idle(&self) -> Result<(), BackendError> {
        let completed = self.complete_all();
        log::trace!("DummyBackend: idle ({} submissions completed)", completed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::PipelineStages;

    fn submit_frame(backend: &DummyBackend, fence: &GpuFence) {
        let image_available = backend.create_semaphore().unwrap();
        let render_finished = backend.create_semaphore().unwrap();
        let cmd = backend.allocate_command_buffer().unwrap();

        backend.acquire_next_image(&image_available).unwrap();
        backend
            .submit(&Submission {
                command_buffer: &cmd,
                wait_semaphore: &image_available,
                wait_stages: PipelineStages::COLOR_ATTACHMENT_OUTPUT,
                signal_semaphore: &render_finished,
                signal_fence: fence,
            })
            .unwrap();
    }

    #[test]
    fn test_immediate_signals_at_submit() {
        let backend = DummyBackend::new();
        let fence = backend.create_fence(false).unwrap();
        submit_frame(&backend, &fence);
        assert!(backend.is_fence_signaled(&fence).unwrap());
        assert_eq!(backend.submission_count(), 1);
    }

    #[test]
    fn test_deferred_completes_in_order() {
        let backend = DummyBackend::with_timeline(GpuTimeline::Deferred);
        let first = backend.create_fence(false).unwrap();
        let second = backend.create_fence(false).unwrap();
        let third = backend.create_fence(false).unwrap();
        submit_frame(&backend, &first);
        submit_frame(&backend, &second);
        submit_frame(&backend, &third);

        assert_eq!(backend.pending_submissions(), 3);
        assert!(backend.wait_fence(&second, None).unwrap());
        assert!(backend.is_fence_signaled(&first).unwrap());
        assert!(!backend.is_fence_signaled(&third).unwrap());
        assert_eq!(backend.pending_submissions(), 1);
    }

    #[test]
    fn test_manual_wait_times_out() {
        let backend = DummyBackend::with_timeline(GpuTimeline::Manual);
        let fence = backend.create_fence(false).unwrap();
        submit_frame(&backend, &fence);

        let signaled = backend
            .wait_fence(&fence, Some(Duration::from_millis(5)))
            .unwrap();
        assert!(!signaled);

        assert!(backend.complete_next());
        assert!(backend.wait_fence(&fence, None).unwrap());
    }

    #[test]
    fn test_wait_on_unsubmitted_fence_is_rejected() {
        let backend = DummyBackend::with_timeline(GpuTimeline::Deferred);
        let fence = backend.create_fence(false).unwrap();
        assert!(matches!(
            backend.wait_fence(&fence, None),
            Err(BackendError::Validation(_))
        ));
    }

    #[test]
    fn test_submit_without_acquire_is_rejected() {
        let backend = DummyBackend::new();
        let fence = backend.create_fence(false).unwrap();
        let wait = backend.create_semaphore().unwrap();
        let signal = backend.create_semaphore().unwrap();
        let cmd = backend.allocate_command_buffer().unwrap();

        let result = backend.submit(&Submission {
            command_buffer: &cmd,
            wait_semaphore: &wait,
            wait_stages: PipelineStages::COLOR_ATTACHMENT_OUTPUT,
            signal_semaphore: &signal,
            signal_fence: &fence,
        });
        assert!(matches!(result, Err(BackendError::Validation(_))));
    }

    #[test]
    fn test_acquire_round_robin() {
        let backend = DummyBackend::new();
        backend.set_image_count(2);

        let mut images = Vec::new();
        for _ in 0..3 {
            let sem = backend.create_semaphore().unwrap();
            match backend.acquire_next_image(&sem).unwrap() {
                AcquireOutcome::Acquired { image_index, .. } => images.push(image_index.0),
                AcquireOutcome::OutOfDate => panic!("unexpected out of date"),
            }
        }
        assert_eq!(images, vec![0, 1, 0]);
    }

    #[test]
    fn test_scripted_out_of_date_signals_nothing() {
        let backend = DummyBackend::new();
        backend.script_acquire(ScriptedResult::OutOfDate);

        let sem = backend.create_semaphore().unwrap();
        assert_eq!(
            backend.acquire_next_image(&sem).unwrap(),
            AcquireOutcome::OutOfDate
        );
        match &sem {
            GpuSemaphore::Dummy(sem) => assert!(!sem.is_pending()),
            #[cfg(feature = "vulkan-backend")]
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_recording_round_trip() {
        let backend = DummyBackend::new();
        backend.set_capture(true);
        let cmd = backend.allocate_command_buffer().unwrap();

        let mut recorder = backend.begin_recording(&cmd).unwrap();
        assert!(backend.begin_recording(&cmd).is_err());
        recorder.end_rendering();
        backend.end_recording(recorder).unwrap();

        let recordings = backend.take_recordings();
        assert_eq!(recordings.len(), 1);
        assert_eq!(recordings[0].commands, vec![RecordedCommand::EndRendering]);
    }

    #[test]
    fn test_nothing_retained_without_capture() {
        let backend = DummyBackend::new();
        let fence = backend.create_fence(false).unwrap();
        let cmd = backend.allocate_command_buffer().unwrap();

        for _ in 0..1000 {
            let image_available = backend.create_semaphore().unwrap();
            let render_finished = backend.create_semaphore().unwrap();
            let image_index = match backend.acquire_next_image(&image_available).unwrap() {
                AcquireOutcome::Acquired { image_index, .. } => image_index,
                AcquireOutcome::OutOfDate => panic!("unexpected out of date"),
            };

            let mut recorder = backend.begin_recording(&cmd).unwrap();
            recorder.end_rendering();
            backend.end_recording(recorder).unwrap();

            backend.reset_fence(&fence).unwrap();
            backend
                .submit(&Submission {
                    command_buffer: &cmd,
                    wait_semaphore: &image_available,
                    wait_stages: PipelineStages::COLOR_ATTACHMENT_OUTPUT,
                    signal_semaphore: &render_finished,
                    signal_fence: &fence,
                })
                .unwrap();
            backend.present(image_index, &render_finished).unwrap();
        }

        assert_eq!(backend.presented_count(), 1000);
        assert!(backend.presented_images().is_empty());
        assert!(backend.take_recordings().is_empty());

        // Disabling capture releases what was kept.
        backend.set_capture(true);
        let mut recorder = backend.begin_recording(&cmd).unwrap();
        recorder.end_rendering();
        backend.end_recording(recorder).unwrap();
        backend.set_capture(false);
        assert!(backend.take_recordings().is_empty());
    }
}

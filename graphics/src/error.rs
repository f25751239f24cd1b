//! Graphics error types.

use std::time::Duration;

use thiserror::Error;

use crate::backend::BackendError;
use crate::graph::GraphError;
use crate::scheduler::SyncError;
use crate::types::{ImageIndex, SlotIndex};

/// Failures that leave the frame loop unable to continue.
///
/// There is no recovery path: the application should log the error and
/// shut down.
#[derive(Error, Debug)]
pub enum CriticalError {
    /// The configuration asked for zero frames in flight.
    #[error("frames_in_flight must be at least 1")]
    NoFrameSlots,
    /// Creating fences, semaphores or command buffers failed.
    #[error("failed to create frame synchronization objects")]
    ObjectCreation(#[source] BackendError),
    /// Waiting on a fence failed.
    #[error("failed to wait on the fence of {slot}")]
    FenceWait {
        slot: SlotIndex,
        #[source]
        source: BackendError,
    },
    /// A fence was not signaled within the configured timeout.
    #[error("fence of {slot} not signaled within {timeout:?}")]
    FenceTimeout { slot: SlotIndex, timeout: Duration },
    /// Resetting a fence failed.
    #[error("failed to reset the fence of {slot}")]
    FenceReset {
        slot: SlotIndex,
        #[source]
        source: BackendError,
    },
    /// Image acquisition failed for a reason other than a stale swapchain.
    #[error("failed to acquire a swapchain image")]
    Acquire(#[source] BackendError),
    /// Beginning command buffer recording failed.
    #[error("failed to begin command buffer recording")]
    RecordingBegin(#[source] BackendError),
    /// Ending command buffer recording failed.
    #[error("failed to end command buffer recording")]
    RecordingEnd(#[source] BackendError),
    /// Queue submission failed.
    #[error("failed to submit the command buffer of {slot}")]
    Submit {
        slot: SlotIndex,
        #[source]
        source: BackendError,
    },
    /// Presentation failed for a reason other than a stale swapchain.
    #[error("failed to present {image}")]
    Present {
        image: ImageIndex,
        #[source]
        source: BackendError,
    },
    /// Waiting for the device to go idle failed.
    #[error("failed to wait for device idle")]
    DeviceIdle(#[source] BackendError),
}

/// Errors that can occur in the graphics system.
#[derive(Error, Debug)]
pub enum GraphicsError {
    /// Render graph misuse.
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// Frame synchronizer misuse or failure.
    #[error(transparent)]
    Sync(#[from] SyncError),
    /// Unrecoverable failure.
    #[error(transparent)]
    Critical(#[from] CriticalError),
    /// The application failed to recreate the swapchain or its dependent images.
    #[error("surface recreation failed: {0}")]
    SurfaceRecreation(String),
}

impl GraphicsError {
    /// The critical error behind this error, if any.
    pub fn as_critical(&self) -> Option<&CriticalError> {
        match self {
            Self::Critical(err) => Some(err),
            Self::Sync(SyncError::Critical(err)) => Some(err),
            _ => None,
        }
    }

    /// Returns true if the frame loop cannot continue.
    pub fn is_critical(&self) -> bool {
        self.as_critical().is_some() || matches!(self, Self::SurfaceRecreation(_))
    }
}

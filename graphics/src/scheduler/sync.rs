//! CPU-side synchronization primitives.
//!
//! These back the dummy backend: the "GPU" is simulated on the CPU, so
//! fences must block a waiting thread until another party signals them.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Status of a fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    /// The fence has not yet been signaled.
    Unsignaled,
    /// The fence has been signaled (GPU work complete).
    Signaled,
}

#[derive(Debug)]
struct FenceState {
    id: u64,
    signaled: Mutex<bool>,
    cond: Condvar,
}

/// CPU-GPU synchronization primitive.
///
/// Waiting blocks the calling thread on a condition variable until the
/// fence is signaled. Clones share state.
#[derive(Debug, Clone)]
pub struct Fence {
    state: Arc<FenceState>,
}

impl Fence {
    fn with_state(signaled: bool) -> Self {
        Self {
            state: Arc::new(FenceState {
                id: next_id(),
                signaled: Mutex::new(signaled),
                cond: Condvar::new(),
            }),
        }
    }

    /// Create a new fence in the unsignaled state.
    pub fn new_unsignaled() -> Self {
        Self::with_state(false)
    }

    /// Create a new fence in the signaled state.
    pub fn new_signaled() -> Self {
        Self::with_state(true)
    }

    /// Get the fence's unique ID (for debugging).
    pub fn id(&self) -> u64 {
        self.state.id
    }

    /// Check the current status of the fence.
    pub fn status(&self) -> FenceStatus {
        if *self.state.signaled.lock() {
            FenceStatus::Signaled
        } else {
            FenceStatus::Unsignaled
        }
    }

    /// Check if the fence is signaled (non-blocking).
    pub fn is_signaled(&self) -> bool {
        self.status() == FenceStatus::Signaled
    }

    /// Wait for the fence to be signaled (blocking).
    ///
    /// Returns immediately if already signaled.
    pub fn wait(&self) {
        let mut signaled = self.state.signaled.lock();
        while !*signaled {
            self.state.cond.wait(&mut signaled);
        }
    }

    /// Wait for the fence with a timeout.
    ///
    /// Returns `true` if the fence was signaled, `false` if timeout elapsed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut signaled = self.state.signaled.lock();
        while !*signaled {
            if self
                .state
                .cond
                .wait_until(&mut signaled, deadline)
                .timed_out()
            {
                return *signaled;
            }
        }
        true
    }

    /// Reset the fence to unsignaled state.
    ///
    /// Must only be called when no GPU work is pending on this fence.
    pub fn reset(&self) {
        *self.state.signaled.lock() = false;
    }

    /// Signal the fence and wake every waiter.
    pub fn signal(&self) {
        let mut signaled = self.state.signaled.lock();
        *signaled = true;
        self.state.cond.notify_all();
    }

    /// Returns true if both values refer to the same fence.
    pub fn same_as(&self, other: &Fence) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl Default for Fence {
    fn default() -> Self {
        Self::new_unsignaled()
    }
}

/// GPU semaphore for ordering work on the GPU timeline.
///
/// Unlike fences, semaphores cannot be waited on from the CPU. The dummy
/// backend tracks a pending signal so it can reject a wait that nothing
/// will ever satisfy.
#[derive(Debug, Clone)]
pub struct Semaphore {
    id: u64,
    pending: Arc<AtomicBool>,
}

impl Semaphore {
    /// Create a new unsignaled semaphore.
    pub fn new() -> Self {
        Self {
            id: next_id(),
            pending: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get the semaphore's unique ID (for debugging).
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether a signal is pending.
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Queue a signal. Returns `false` if a signal was already pending.
    pub fn signal(&self) -> bool {
        !self.pending.swap(true, Ordering::AcqRel)
    }

    /// Consume the pending signal. Returns `false` if none was pending.
    pub fn consume(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new()
    }
}

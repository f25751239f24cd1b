//! Backend error types.

use thiserror::Error;

/// Errors that can occur in backend operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Failed to create a synchronization object or command buffer.
    #[error("object creation failed: {0}")]
    ObjectCreationFailed(String),
    /// The device was lost.
    #[error("GPU device lost")]
    DeviceLost,
    /// Out of host or device memory.
    #[error("out of memory")]
    OutOfMemory,
    /// A handle from a different backend was passed in.
    #[error("handle does not belong to the {0} backend")]
    ForeignHandle(&'static str),
    /// The call sequence broke a synchronization rule.
    #[error("synchronization misuse: {0}")]
    Validation(String),
    /// Any other API failure.
    #[error("{operation} failed: {message}")]
    Api {
        /// API entry point that failed.
        operation: &'static str,
        /// Error reported by the API.
        message: String,
    },
}

impl BackendError {
    pub(crate) fn api(operation: &'static str, message: impl std::fmt::Display) -> Self {
        Self::Api {
            operation,
            message: message.to_string(),
        }
    }
}

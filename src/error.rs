//! Error types for branch execution.
//!
//! A branch failure is a value on the event channel, never an out-of-band
//! throw: panics are caught at the worker frame and converted into the
//! `Panicked` variant, user action failures arrive as `Action`, and a
//! cancelled branch reports `Cancelled` with the reason it was torn down.

use crate::types::CancelReason;
use std::any::Any;
use thiserror::Error;

/// The terminal error of a failed branch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BranchError {
    /// A user-supplied action failed.
    #[error("action failed: {0}")]
    Action(String),
    /// A branch panicked; the payload is preserved as text.
    #[error("branch panicked: {0}")]
    Panicked(String),
    /// The branch was cancelled.
    #[error("branch cancelled: {0}")]
    Cancelled(CancelReason),
    /// A worker thread could not be spawned.
    #[error("worker spawn failed: {0}")]
    Spawn(String),
    /// The root drain gave up with workers still pending.
    #[error("drain stalled with {pending} pending workers")]
    Stalled {
        /// Number of workers whose completion event never arrived.
        pending: usize,
    },
}

impl BranchError {
    /// Creates an action failure from any displayable cause.
    #[must_use]
    pub fn action(message: impl Into<String>) -> Self {
        Self::Action(message.into())
    }

    /// Creates a panic failure carrying the payload text.
    #[must_use]
    pub fn panicked(message: impl Into<String>) -> Self {
        Self::Panicked(message.into())
    }

    /// Creates a cancellation failure.
    #[must_use]
    pub const fn cancelled(reason: CancelReason) -> Self {
        Self::Cancelled(reason)
    }

    /// Returns true if this error reports a cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

/// Extracts a printable message from a caught panic payload.
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "opaque panic payload".to_owned()
    }
}

/// The value bag or error produced by a branch.
pub type BranchResult<R> = Result<Vec<R>, BranchError>;

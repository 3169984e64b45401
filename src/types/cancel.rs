//! Cancellation reason and kind types.
//!
//! Cancellation is a protocol, not a silent drop: a cancelled branch still
//! drains its children and publishes exactly one completion event carrying
//! the reason it was torn down.

use core::fmt;

/// The kind of cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CancelKind {
    /// Explicit cancellation requested by user code.
    User,
    /// A sibling branch failed and the parent is tearing the fan-out down.
    FailFast,
    /// The owning parent branch was itself cancelled or is unwinding.
    ParentCancelled,
}

impl fmt::Display for CancelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::FailFast => write!(f, "fail-fast"),
            Self::ParentCancelled => write!(f, "parent cancelled"),
        }
    }
}

/// The reason for a cancellation, including kind and optional context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelReason {
    /// The kind of cancellation.
    pub kind: CancelKind,
    /// Optional human-readable message (static for determinism).
    pub message: Option<&'static str>,
}

impl CancelReason {
    /// Creates a new cancellation reason with the given kind.
    #[must_use]
    pub const fn new(kind: CancelKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    /// Creates a user cancellation reason with a message.
    #[must_use]
    pub const fn user(message: &'static str) -> Self {
        Self {
            kind: CancelKind::User,
            message: Some(message),
        }
    }

    /// Creates a fail-fast cancellation reason (sibling failed).
    #[must_use]
    pub const fn sibling_failed() -> Self {
        Self::new(CancelKind::FailFast)
    }

    /// Creates a parent-cancelled cancellation reason.
    #[must_use]
    pub const fn parent_cancelled() -> Self {
        Self::new(CancelKind::ParentCancelled)
    }

    /// Returns the kind of this cancellation reason.
    #[must_use]
    pub const fn kind(&self) -> CancelKind {
        self.kind
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message {
            Some(message) => write!(f, "{} ({message})", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_message() {
        let reason = CancelReason::user("shutting down");
        assert_eq!(format!("{reason}"), "user (shutting down)");
        assert_eq!(format!("{}", CancelReason::sibling_failed()), "fail-fast");
    }

    #[test]
    fn constructors_set_kind() {
        assert_eq!(
            CancelReason::parent_cancelled().kind(),
            CancelKind::ParentCancelled
        );
        assert_eq!(CancelReason::sibling_failed().kind(), CancelKind::FailFast);
    }
}

//! Core types: identifiers, cancellation reasons, stream signals.

pub mod cancel;
pub mod id;
pub mod stream_data;

pub use cancel::{CancelKind, CancelReason};
pub use id::WorkerId;
pub use stream_data::{Location, StreamData};

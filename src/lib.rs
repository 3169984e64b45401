//! Ramify: a credit-governed task-tree runtime.
//!
//! # Overview
//!
//! Ramify turns an otherwise sequential computation into a tree of
//! concurrently executing branches. An internal node forks its saved
//! continuation into one child branch per stream event; branches run on
//! independent workers, or fall back to in-line execution under resource
//! pressure, and their results stream back toward the root. The first
//! failure anywhere cancels its subtree, then its siblings, and surfaces at
//! the root.
//!
//! # Core Guarantees
//!
//! - **Bounded fan-out**: a shared credit pool caps live workers; a dry pool
//!   degrades gracefully to sequential in-line execution, never deadlock
//! - **No orphan workers**: every spawned branch publishes exactly one
//!   completion event, and a branch quiesces its whole subtree before
//!   publishing its own
//! - **Credits are conserved**: each credit taken is released exactly once,
//!   on every exit path
//! - **Failure is a value**: panics and action errors become events on the
//!   child→parent channel, never silent drops
//!
//! # Module Structure
//!
//! - [`types`]: identifiers, cancellation reasons, stream signals
//! - [`error`]: branch error type and panic conversion
//! - [`credit`]: the shared fan-out credit pool
//! - [`channel`]: child→parent event channels with interrupt support
//! - [`cx`]: per-branch context and continuation capture
//! - [`stream`]: the generators (`parallel`, `wait_events`, `async_once`,
//!   `sample`) and scoping combinators (`sync`, `threads`)
//! - [`runtime`]: configuration and the root entry point
//! - [`test_utils`]: logging and assertion helpers for tests

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod channel;
pub mod credit;
pub mod cx;
pub mod error;
pub mod runtime;
pub mod stream;
pub mod test_utils;
pub mod types;

mod fork;
mod reaper;
mod runner;

pub use credit::{Credit, CreditHandle, CreditPool};
pub use cx::{Continuation, Cx};
pub use error::{BranchError, BranchResult};
pub use runtime::{RuntimeConfig, TreeRuntime};
pub use stream::{
    async_once, parallel, sample, sync, threads, wait_events, Action, IoAction,
};
pub use types::{CancelKind, CancelReason, Location, StreamData, WorkerId};

//! Drives a branch's saved continuation to completion.
//!
//! `run_branch` is the bare runner; `run_frame` wraps it in the frame
//! discipline every branch gets regardless of where it runs: panics become
//! errors, a failing branch tears its children down, and the subtree is
//! always drained to quiescence before the branch is considered finished.

use std::panic::{self, AssertUnwindSafe};

use crate::cx::Cx;
use crate::error::{panic_message, BranchError};
use crate::reaper;

/// Executes the saved continuation with `cx` as the mutable state.
///
/// On completion a non-root branch ships its result bag to its parent; the
/// root keeps its bag for the run entry point to return.
pub(crate) fn run_branch<T, R>(cx: &mut Cx<T, R>) -> Result<(), BranchError> {
    cx.begin_run();
    let continuation = cx.continuation();
    continuation(cx)?;
    cx.flush_results();
    Ok(())
}

/// Runs a branch under the full frame discipline on the current worker.
///
/// Returns the branch's terminal error, if any, after its subtree has
/// quiesced. The caller decides how to publish it: a spawned worker sends a
/// completion event, an in-line caller propagates it synchronously.
pub(crate) fn run_frame<T, R>(cx: &mut Cx<T, R>) -> Option<BranchError> {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| run_branch(cx)));
    let exception = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(error)) => Some(error),
        Err(payload) => Some(BranchError::panicked(panic_message(payload.as_ref()))),
    };
    if let Some(error) = &exception {
        tracing::debug!(branch = %cx.id(), %error, "branch failed; tearing down children");
        cx.kill_children();
    }
    reaper::drain_all(cx, exception)
}

/// Runs a branch in line, surfacing its terminal error to the caller.
pub(crate) fn run_inline<T, R>(cx: &mut Cx<T, R>) -> Result<(), BranchError> {
    match run_frame(cx) {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

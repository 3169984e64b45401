//! Reaps child events: completions, pass-on results, failures.
//!
//! Every event is handled by one rule set. A finished child leaves the
//! pending set; non-empty result bags travel up toward the root; the first
//! failure interrupts every still-pending sibling, and everything that
//! arrives after it is consumed and discarded so the error wins the drain.

use std::time::{Duration, Instant};

use crate::channel::ChildEvent;
use crate::cx::Cx;
use crate::error::BranchError;
use crate::types::CancelReason;

fn record<T, R>(cx: &mut Cx<T, R>, error: BranchError, exception: &mut Option<BranchError>) {
    if exception.is_none() {
        tracing::debug!(branch = %cx.id(), %error, "child failure recorded; interrupting siblings");
        cx.kill_children();
        *exception = Some(error);
    } else {
        tracing::trace!(branch = %cx.id(), %error, "discarding failure after first error");
    }
}

fn process<T, R>(
    cx: &mut Cx<T, R>,
    event: ChildEvent<R>,
    exception: &mut Option<BranchError>,
) {
    match event {
        ChildEvent::ChildDone(id, result) => {
            cx.remove_pending(id);
            match result {
                Ok(values) => {
                    if !values.is_empty() && exception.is_none() {
                        cx.forward(values);
                    }
                }
                Err(error) => record(cx, error, exception),
            }
        }
        ChildEvent::PassOnResult(result) => match result {
            Ok(values) => {
                if exception.is_none() {
                    cx.forward(values);
                }
            }
            Err(error) => record(cx, error, exception),
        },
    }
}

/// Non-blocking reclaim: polls the inbox while children are pending, so the
/// pending set cannot grow without bound across forks. Re-throws the first
/// failure it observes.
pub(crate) fn try_reclaim<T, R>(cx: &mut Cx<T, R>) -> Result<(), BranchError> {
    let mut exception = None;
    while exception.is_none() && cx.has_pending() {
        match cx.try_recv() {
            Some(event) => process(cx, event, &mut exception),
            None => break,
        }
    }
    exception.map_or(Ok(()), Err)
}

/// Blocking read of exactly one event. Used by the fork gate when the credit
/// pool is dry: the caller waits for one child to finish, then retries.
/// Re-throws on failure, including interruption of the waiting branch.
pub(crate) fn wait_one<T, R>(cx: &mut Cx<T, R>) -> Result<(), BranchError> {
    let event = cx
        .recv()
        .map_err(|_| BranchError::cancelled(CancelReason::parent_cancelled()))?;
    let mut exception = None;
    process(cx, event, &mut exception);
    exception.map_or(Ok(()), Err)
}

/// Blocking drain to quiescence: sweeps queued events, then waits until no
/// child is pending. Returns the accumulated exception (possibly `initial`).
/// Interrupts are ignored here; a dying branch still collects its children.
pub(crate) fn drain_all<T, R>(
    cx: &mut Cx<T, R>,
    initial: Option<BranchError>,
) -> Option<BranchError> {
    drain(cx, initial, None)
}

/// `drain_all` with a hard bound, for the root boundary only: a child that
/// never completes turns into `Stalled` instead of hanging the caller.
pub(crate) fn drain_deadline<T, R>(
    cx: &mut Cx<T, R>,
    initial: Option<BranchError>,
    timeout: Option<Duration>,
) -> Option<BranchError> {
    drain(cx, initial, timeout)
}

fn drain<T, R>(
    cx: &mut Cx<T, R>,
    mut exception: Option<BranchError>,
    timeout: Option<Duration>,
) -> Option<BranchError> {
    let deadline = timeout.map(|t| Instant::now() + t);
    loop {
        // Queued events are swept even with nothing pending: bags produced
        // by in-line children sit here and must not be stranded.
        while let Some(event) = cx.try_recv() {
            process(cx, event, &mut exception);
        }
        if !cx.has_pending() {
            return exception;
        }
        let event = match deadline {
            None => cx.recv_quiet(),
            Some(deadline) => match cx.recv_quiet_deadline(deadline) {
                Some(event) => event,
                None => {
                    let pending = cx.pending_count();
                    tracing::warn!(branch = %cx.id(), pending, "drain deadline expired");
                    return Some(exception.unwrap_or(BranchError::Stalled { pending }));
                }
            },
        };
        process(cx, event, &mut exception);
    }
}

//! Credit-governed fork: the admission gate between a minted child and a
//! worker.
//!
//! The gate takes a credit when one is spare and spawns a worker; with no
//! credit and no pending child it degrades to in-line execution (blocking on
//! the inbox would deadlock); otherwise it waits for one child to finish and
//! retries. This guarantees forward progress at any credit level, down to
//! fully sequential execution at zero.

use std::thread;

use crate::channel::ChildEvent;
use crate::credit::Credit;
use crate::cx::Cx;
use crate::error::{BranchError, BranchResult};
use crate::reaper;
use crate::runner;

/// Admits a minted child through the credit gate.
pub(crate) fn fork<T, R>(cx: &mut Cx<T, R>, child: Cx<T, R>) -> Result<(), BranchError>
where
    T: Clone + Send + 'static,
    R: Send + 'static,
{
    loop {
        if let Some(credit) = cx.credit().try_acquire() {
            return spawn_worker(cx, child, credit);
        }
        if !cx.has_pending() {
            tracing::trace!(branch = %cx.id(), "credit dry, nothing pending; running child in line");
            return resume_inline(child);
        }
        reaper::wait_one(cx)?;
    }
}

/// Runs a minted child to completion on the current worker.
///
/// Result bags still travel over the parent's inbox; failures return
/// synchronously to the caller instead of riding a completion event.
pub(crate) fn resume_inline<T, R>(mut child: Cx<T, R>) -> Result<(), BranchError> {
    runner::run_inline(&mut child)
}

fn spawn_worker<T, R>(
    cx: &mut Cx<T, R>,
    child: Cx<T, R>,
    credit: Credit,
) -> Result<(), BranchError>
where
    T: Clone + Send + 'static,
    R: Send + 'static,
{
    let id = child.id();
    // Registered before the spawn so a child that exits immediately is
    // reaped as a known worker, never treated as unknown.
    cx.add_pending(id, child.interrupt_handle());
    let mut builder =
        thread::Builder::new().name(format!("{}-{id}", cx.thread_name_prefix()));
    if let Some(stack_size) = cx.thread_stack_size() {
        builder = builder.stack_size(stack_size);
    }
    match builder.spawn(move || worker_main(child, credit)) {
        Ok(_join) => {
            tracing::trace!(branch = %cx.id(), child = %id, "worker spawned");
        }
        Err(error) => {
            // The unspawned closure is dropped with the child and its
            // credit, so the pool is already whole again.
            cx.remove_pending(id);
            return Err(BranchError::Spawn(error.to_string()));
        }
    }
    reaper::try_reclaim(cx)
}

/// The body of every spawned worker.
///
/// Runs the branch under the frame discipline, releases the credit, then
/// publishes exactly one completion event, on every exit path.
fn worker_main<T, R>(mut cx: Cx<T, R>, credit: Credit) {
    let id = cx.id();
    tracing::trace!(branch = %id, "worker started");
    let exception = runner::run_frame(&mut cx);
    let result: BranchResult<R> = match exception {
        None => Ok(Vec::new()),
        Some(error) => Err(error),
    };
    let parent = cx.parent_sender();
    drop(cx);
    drop(credit);
    if let Some(parent) = parent {
        parent.send(ChildEvent::ChildDone(id, result));
    }
    tracing::trace!(branch = %id, "worker exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credit::CreditPool;
    use crate::cx::{Continuation, TreeShared};
    use crate::test_utils::init_test_logging;
    use crate::types::StreamData;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn root_with(
        credit: usize,
        continuation: Continuation<i32, i32>,
    ) -> Cx<i32, i32> {
        let shared = Arc::new(TreeShared::new("test-worker".into(), None));
        Cx::root(CreditPool::handle(credit), shared, continuation)
    }

    /// Mints a child whose resume event is already consumed; the test
    /// continuations here are plain leaves with no generator site.
    fn emitting_child(cx: &Cx<i32, i32>, value: i32) -> Cx<i32, i32> {
        let mut child = cx.capture().child(cx, StreamData::More(value));
        let _resumed = child.take_mailbox();
        child
    }

    #[test]
    fn spawned_child_sends_exactly_one_completion() {
        init_test_logging();
        crate::test_phase!("spawned_child_sends_exactly_one_completion");
        let mut cx = root_with(
            1,
            Arc::new(|cx| {
                cx.emit(7);
                Ok(())
            }),
        );
        let child = emitting_child(&cx, 0);
        let child_id = child.id();
        fork(&mut cx, child).expect("fork admitted");
        let error = reaper::drain_all(&mut cx, None);
        assert!(error.is_none());
        assert_eq!(cx.pending_count(), 0);
        assert_eq!(cx.take_results(), vec![7]);
        assert!(cx.try_recv().is_none(), "no second event from {child_id}");
        assert_eq!(cx.credit_available(), 1);
        crate::test_complete!("spawned_child_sends_exactly_one_completion");
    }

    #[test]
    fn zero_credit_runs_in_line() {
        init_test_logging();
        crate::test_phase!("zero_credit_runs_in_line");
        let ran_on = Arc::new(AtomicUsize::new(0));
        let probe = Arc::clone(&ran_on);
        let mut cx = root_with(
            0,
            Arc::new(move |cx| {
                probe.fetch_add(1, Ordering::SeqCst);
                cx.emit(3);
                Ok(())
            }),
        );
        let child = emitting_child(&cx, 0);
        fork(&mut cx, child).expect("fallback succeeded");
        // The child ran on this worker before fork returned.
        assert_eq!(ran_on.load(Ordering::SeqCst), 1);
        assert_eq!(cx.pending_count(), 0);
        assert!(reaper::drain_all(&mut cx, None).is_none());
        assert_eq!(cx.take_results(), vec![3]);
        crate::test_complete!("zero_credit_runs_in_line");
    }

    #[test]
    fn gate_waits_for_a_child_then_admits() {
        init_test_logging();
        crate::test_phase!("gate_waits_for_a_child_then_admits");
        let mut cx = root_with(
            1,
            Arc::new(|cx| {
                cx.emit(1);
                Ok(())
            }),
        );
        let first = emitting_child(&cx, 0);
        fork(&mut cx, first).expect("first admitted");
        let second = emitting_child(&cx, 0);
        // Credit 1 is taken; the gate must wait for the first child before
        // admitting the second.
        fork(&mut cx, second).expect("second admitted after wait");
        assert!(reaper::drain_all(&mut cx, None).is_none());
        assert_eq!(cx.pending_count(), 0);
        assert_eq!(cx.take_results(), vec![1, 1]);
        assert_eq!(cx.credit_available(), 1);
        crate::test_complete!("gate_waits_for_a_child_then_admits");
    }

    #[test]
    fn failing_spawned_child_reports_error() {
        init_test_logging();
        crate::test_phase!("failing_spawned_child_reports_error");
        let mut cx = root_with(
            1,
            Arc::new(|_cx| Err(BranchError::action("torn socket"))),
        );
        let child = emitting_child(&cx, 0);
        fork(&mut cx, child).expect("fork admitted");
        let error = reaper::drain_all(&mut cx, None).expect("failure surfaced");
        assert_eq!(error, BranchError::action("torn socket"));
        assert_eq!(cx.pending_count(), 0);
        assert_eq!(cx.credit_available(), 1);
        crate::test_complete!("failing_spawned_child_reports_error");
    }

    #[test]
    fn inline_failure_returns_synchronously() {
        init_test_logging();
        let cx = root_with(0, Arc::new(|_cx| Err(BranchError::action("bad leaf"))));
        let child = emitting_child(&cx, 0);
        let error = resume_inline(child).expect_err("synchronous failure");
        assert_eq!(error, BranchError::action("bad leaf"));
    }
}

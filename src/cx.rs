//! Per-branch context: everything a suspended computation needs to resume.
//!
//! A [`Cx`] is exclusively owned by the worker executing it; all sharing with
//! other branches goes through its channels. The continuation is a shared
//! closure re-run from the top on every branch; a replay path plus a site
//! counter let each generator call site resolve to either the event recorded
//! for it, the mailbox, or producer mode, so a resumed branch flows straight
//! through the generators that were already decided upstream.

use std::collections::HashMap;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::channel::{
    channel, ChildEvent, EventReceiver, EventSender, Interrupted, InterruptHandle,
};
use crate::credit::CreditHandle;
use crate::error::{BranchError, BranchResult};
use crate::types::{CancelReason, Location, StreamData, WorkerId};

/// The rest of a branch's computation, restartable on any worker.
pub type Continuation<T, R> =
    Arc<dyn Fn(&mut Cx<T, R>) -> Result<(), BranchError> + Send + Sync>;

/// Tree-wide state shared by every branch of one run.
#[derive(Debug)]
pub(crate) struct TreeShared {
    stop: AtomicBool,
    pub(crate) thread_name_prefix: String,
    pub(crate) thread_stack_size: Option<usize>,
}

impl TreeShared {
    pub(crate) fn new(thread_name_prefix: String, thread_stack_size: Option<usize>) -> Self {
        Self {
            stop: AtomicBool::new(false),
            thread_name_prefix,
            thread_stack_size,
        }
    }
}

/// The one-slot hand-off between a generator and a resumed continuation.
///
/// Holds either the captured continuation waiting to be forked (producer
/// side) or the next input for a branch resumed on a worker.
pub(crate) enum Mailbox<T, R> {
    /// The captured continuation, ready to mint child branches.
    Suspended(Suspension<T, R>),
    /// The event to feed into the continuation on this branch.
    Resumed(StreamData<T>),
}

/// How one generator call site was resolved on this branch.
///
/// A resumed branch re-runs its continuation from the top; these entries let
/// every call site before the resume point replay its original resolution
/// instead of taking the mailbox meant for a later site.
#[derive(Clone)]
pub(crate) enum ReplayEntry<T> {
    /// The site resolved to this event.
    Event(StreamData<T>),
    /// The site ran as a producer and delegated its work to children.
    Delegated,
}

/// A continuation snapshot from which child branches are minted.
///
/// Captured by a generator the first time it runs on a branch; carries the
/// shared continuation, the replay prefix that leads to the capture site,
/// and the lifecycle handles children inherit.
pub(crate) struct Suspension<T, R> {
    continuation: Continuation<T, R>,
    replay: Vec<ReplayEntry<T>>,
    credit: CreditHandle,
    location: Location,
    shared: Arc<TreeShared>,
}

impl<T: Clone, R> Suspension<T, R> {
    /// Mints a child branch that will resume with `event`.
    ///
    /// The child gets a fresh inbox, id, pending set and result bag; its
    /// parent outbox is the capturing branch's inbox, and it shares the
    /// credit handle in force at the capture site. A child minted under
    /// `RemoteNode` stays pinned so it cannot delegate either.
    pub(crate) fn child(&self, parent: &Cx<T, R>, event: StreamData<T>) -> Cx<T, R> {
        let (child_tx, child_rx) = channel();
        Cx {
            continuation: Arc::clone(&self.continuation),
            mailbox: Some(Mailbox::Resumed(event)),
            replay: self.replay.clone(),
            site: 0,
            parent_tx: Some(parent.child_tx.clone()),
            child_tx,
            child_rx,
            pending: HashMap::new(),
            credit: Arc::clone(&self.credit),
            results: Vec::new(),
            location: if self.location == Location::RemoteNode {
                Location::RemoteNode
            } else {
                Location::Worker
            },
            delegated: false,
            shared: Arc::clone(&self.shared),
            id: WorkerId::next(),
        }
    }
}

/// The state carried along one branch of the computation tree.
pub struct Cx<T, R> {
    continuation: Continuation<T, R>,
    mailbox: Option<Mailbox<T, R>>,
    /// How each enclosing generator call site resolved on this branch, in
    /// call-site order.
    replay: Vec<ReplayEntry<T>>,
    /// Next generator call-site index of the current run.
    site: usize,
    parent_tx: Option<EventSender<R>>,
    child_tx: EventSender<R>,
    child_rx: EventReceiver<R>,
    pending: HashMap<WorkerId, InterruptHandle<R>>,
    credit: CreditHandle,
    results: Vec<R>,
    location: Location,
    /// Set once a generator site on the current run has gone into producer
    /// mode: the rest of this run belongs to the forked children.
    delegated: bool,
    shared: Arc<TreeShared>,
    id: WorkerId,
}

impl<T, R> Cx<T, R> {
    /// Creates the root context of a tree.
    pub(crate) fn root(
        credit: CreditHandle,
        shared: Arc<TreeShared>,
        continuation: Continuation<T, R>,
    ) -> Self {
        let (child_tx, child_rx) = channel();
        Self {
            continuation,
            mailbox: None,
            replay: Vec::new(),
            site: 0,
            parent_tx: None,
            child_tx,
            child_rx,
            pending: HashMap::new(),
            credit,
            results: Vec::new(),
            location: Location::Worker,
            delegated: false,
            shared,
            id: WorkerId::next(),
        }
    }

    /// Returns this branch's worker id.
    #[must_use]
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Returns true if this is the root of its tree.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent_tx.is_none()
    }

    /// Returns where this branch currently runs.
    #[must_use]
    pub fn location(&self) -> Location {
        self.location
    }

    /// Returns the number of spawned children not yet reaped.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Returns the spare credit in the scope governing this branch.
    #[must_use]
    pub fn credit_available(&self) -> usize {
        self.credit.available()
    }

    /// Appends a value to this branch's result bag.
    ///
    /// The bag travels to the parent when the branch completes and, bag by
    /// bag, on to the root. Two states record nothing: a branch still
    /// flowing through upstream decisions (everything before its resume
    /// point was already emitted by the branch that owned it), and a
    /// producer that has delegated its downstream work to children.
    pub fn emit(&mut self, value: R) {
        if self.mid_replay() || self.delegated {
            return;
        }
        self.results.push(value);
    }

    /// Surfaces cooperative cancellation.
    ///
    /// Returns `Err` once a parent has interrupted this branch. Long-running
    /// downstream code should call this at its own suspension points; code
    /// that never does cannot be reclaimed.
    pub fn checkpoint(&self) -> Result<(), BranchError> {
        if self.child_rx.is_interrupted() {
            Err(BranchError::cancelled(CancelReason::parent_cancelled()))
        } else {
            Ok(())
        }
    }

    /// Requests a graceful, tree-wide end of all generator streams.
    ///
    /// Producers observe the flag at their loop tops and stop forking; work
    /// already in flight completes normally. This is how a downstream
    /// consumer that has seen enough unwinds the tree without an error.
    pub fn request_stop(&self) {
        tracing::debug!(branch = %self.id, "tree stop requested");
        self.shared.stop.store(true, Ordering::Release);
    }

    /// Returns true once a graceful stop has been requested.
    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.shared.stop.load(Ordering::Acquire)
    }

    /// Sleeps without holding up cancellation: returns `Err` if a parent
    /// interrupts this branch before the duration elapses.
    pub fn sleep(&self, duration: Duration) -> Result<(), BranchError> {
        if self.child_rx.park_for(duration) {
            Err(BranchError::cancelled(CancelReason::parent_cancelled()))
        } else {
            Ok(())
        }
    }

    // ---- continuation and mailbox plumbing -------------------------------

    pub(crate) fn continuation(&self) -> Continuation<T, R> {
        Arc::clone(&self.continuation)
    }

    /// Resets the call-site counter at the start of a run.
    pub(crate) fn begin_run(&mut self) {
        self.site = 0;
        self.delegated = false;
    }

    /// Marks the rest of this run as delegated to forked children.
    pub(crate) fn mark_delegated(&mut self) {
        self.delegated = true;
    }

    /// Returns true once a generator site on this run went into producer
    /// mode.
    pub(crate) fn has_delegated(&self) -> bool {
        self.delegated
    }

    /// Claims the next generator call-site index.
    pub(crate) fn enter_site(&mut self) -> usize {
        let site = self.site;
        self.site += 1;
        site
    }

    pub(crate) fn take_mailbox(&mut self) -> Option<Mailbox<T, R>> {
        self.mailbox.take()
    }

    pub(crate) fn put_mailbox(&mut self, mailbox: Mailbox<T, R>) {
        self.mailbox = Some(mailbox);
    }

    pub(crate) fn push_replay(&mut self, event: StreamData<T>) {
        self.replay.push(ReplayEntry::Event(event));
    }

    /// Records that the current call site ran as a producer, so resumed
    /// branches flow past it without touching the mailbox.
    pub(crate) fn push_delegated(&mut self) {
        self.replay.push(ReplayEntry::Delegated);
    }

    /// Returns true while this run still has an upstream decision to flow
    /// through: an unconsumed replay entry or a waiting mailbox event.
    /// Scoping combinators pass straight through in that state, because the
    /// scope they would open was already in force when this branch forked.
    pub(crate) fn mid_replay(&self) -> bool {
        self.site < self.replay.len() || matches!(self.mailbox, Some(Mailbox::Resumed(_)))
    }

    pub(crate) fn set_location(&mut self, location: Location) {
        self.location = location;
    }

    pub(crate) fn credit(&self) -> &CreditHandle {
        &self.credit
    }

    /// Installs a different credit pool, returning the previous handle.
    pub(crate) fn swap_credit(&mut self, handle: CreditHandle) -> CreditHandle {
        mem::replace(&mut self.credit, handle)
    }

    // ---- pending children -------------------------------------------------

    pub(crate) fn add_pending(&mut self, id: WorkerId, handle: InterruptHandle<R>) {
        self.pending.insert(id, handle);
    }

    pub(crate) fn remove_pending(&mut self, id: WorkerId) {
        self.pending.remove(&id);
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Interrupts every still-pending child. Their completion events keep
    /// arriving and must still be drained.
    pub(crate) fn kill_children(&self) {
        for (id, handle) in &self.pending {
            tracing::debug!(parent = %self.id, child = %id, "interrupting pending child");
            handle.interrupt();
        }
    }

    // ---- channel plumbing -------------------------------------------------

    pub(crate) fn try_recv(&self) -> Option<ChildEvent<R>> {
        self.child_rx.try_recv()
    }

    pub(crate) fn recv(&self) -> Result<ChildEvent<R>, Interrupted> {
        self.child_rx.recv()
    }

    pub(crate) fn recv_quiet(&self) -> ChildEvent<R> {
        self.child_rx.recv_quiet()
    }

    pub(crate) fn recv_quiet_deadline(
        &self,
        deadline: std::time::Instant,
    ) -> Option<ChildEvent<R>> {
        self.child_rx.recv_quiet_deadline(deadline)
    }

    pub(crate) fn interrupt_handle(&self) -> InterruptHandle<R> {
        self.child_rx.interrupt_handle()
    }

    pub(crate) fn parent_sender(&self) -> Option<EventSender<R>> {
        self.parent_tx.clone()
    }

    /// Sends a result bag toward the root: up the parent channel when there
    /// is one, otherwise into the root accumulator.
    pub(crate) fn forward(&mut self, values: Vec<R>) {
        match &self.parent_tx {
            Some(parent) => parent.send(ChildEvent::PassOnResult(Ok(values))),
            None => self.results.extend(values),
        }
    }

    /// Ships this branch's own result bag to its parent at completion.
    /// The root keeps its bag; the run entry point returns it.
    pub(crate) fn flush_results(&mut self) {
        if self.results.is_empty() {
            return;
        }
        if let Some(parent) = &self.parent_tx {
            let bag: BranchResult<R> = Ok(mem::take(&mut self.results));
            parent.send(ChildEvent::PassOnResult(bag));
        }
    }

    pub(crate) fn take_results(&mut self) -> Vec<R> {
        mem::take(&mut self.results)
    }

    pub(crate) fn thread_name_prefix(&self) -> &str {
        &self.shared.thread_name_prefix
    }

    pub(crate) fn thread_stack_size(&self) -> Option<usize> {
        self.shared.thread_stack_size
    }
}

impl<T: Clone, R> Cx<T, R> {
    /// Returns how an enclosing generator already resolved this call site
    /// on this branch, if it did.
    pub(crate) fn replayed(&self, site: usize) -> Option<ReplayEntry<T>> {
        self.replay.get(site).cloned()
    }

    /// Captures the continuation at the current call site.
    pub(crate) fn capture(&self) -> Suspension<T, R> {
        Suspension {
            continuation: Arc::clone(&self.continuation),
            replay: self.replay.clone(),
            credit: Arc::clone(&self.credit),
            location: self.location,
            shared: Arc::clone(&self.shared),
        }
    }

    /// Mints a child from the suspension parked in the mailbox, resuming
    /// with `event`. Falls back to a fresh capture if nothing is parked.
    pub(crate) fn suspension_child(&self, event: StreamData<T>) -> Cx<T, R> {
        match &self.mailbox {
            Some(Mailbox::Suspended(suspension)) => suspension.child(self, event),
            _ => self.capture().child(self, event),
        }
    }
}

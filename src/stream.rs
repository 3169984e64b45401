//! Task-stream generators: the user-facing constructs that fork one branch
//! per stream event.
//!
//! A generator called on a fresh branch becomes a *producer*: it loops its
//! action, minting a child branch per event and pushing each through the
//! credit gate. The same call site on a resumed branch simply takes the
//! event out of the mailbox and hands it to the code downstream. Terminal
//! events (`Last`, `Done`, `Error`) are resumed in line and end the loop.
//!
//! `sync` and `threads` are scoping combinators: they do not produce events
//! but pin execution to the current worker or bound the fan-out of
//! everything beneath them.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::credit::CreditPool;
use crate::cx::{Cx, Mailbox, ReplayEntry};
use crate::error::{panic_message, BranchError};
use crate::fork;
use crate::types::{Location, StreamData};

/// A re-invokable stream action, shared with the branches it seeds.
///
/// Only the producer branch ever invokes it; resumed branches flow past the
/// call site. Panics inside the action are converted to error events.
pub struct Action<T> {
    inner: Arc<Mutex<dyn FnMut() -> StreamData<T> + Send>>,
}

impl<T> Clone for Action<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Action<T> {
    /// Wraps a closure yielding one stream signal per call.
    pub fn new(action: impl FnMut() -> StreamData<T> + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(action)),
        }
    }

    fn invoke(&self) -> StreamData<T> {
        let mut action = self.inner.lock();
        panic::catch_unwind(AssertUnwindSafe(|| (*action)()))
            .unwrap_or_else(|payload| {
                StreamData::Error(BranchError::panicked(panic_message(payload.as_ref())))
            })
    }
}

/// A re-invokable I/O action producing one value (or failure) per call.
pub struct IoAction<T> {
    inner: Arc<Mutex<dyn FnMut() -> Result<T, BranchError> + Send>>,
}

impl<T> Clone for IoAction<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> IoAction<T> {
    /// Wraps a fallible closure.
    pub fn new(io: impl FnMut() -> Result<T, BranchError> + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(io)),
        }
    }

    /// Invokes the closure, shaping success with `wrap` and converting
    /// failures and panics to error events.
    fn invoke(&self, wrap: fn(T) -> StreamData<T>) -> StreamData<T> {
        let mut io = self.inner.lock();
        match panic::catch_unwind(AssertUnwindSafe(|| (*io)())) {
            Ok(Ok(value)) => wrap(value),
            Ok(Err(error)) => StreamData::Error(error),
            Err(payload) => {
                StreamData::Error(BranchError::panicked(panic_message(payload.as_ref())))
            }
        }
    }
}

/// The shared generator skeleton.
///
/// Resolves the call site against the branch's replay path and mailbox; only
/// a site past both runs the producer loop. `next` returning `None` ends the
/// stream without an event (used for graceful stops).
fn produce<T, R>(
    cx: &mut Cx<T, R>,
    mut next: impl FnMut(&mut Cx<T, R>) -> Option<StreamData<T>>,
) -> Result<Option<StreamData<T>>, BranchError>
where
    T: Clone + Send + 'static,
    R: Send + 'static,
{
    let site = cx.enter_site();
    match cx.replayed(site) {
        Some(ReplayEntry::Event(event)) => return Ok(Some(event)),
        Some(ReplayEntry::Delegated) => return Ok(None),
        None => {}
    }
    if let Some(Mailbox::Resumed(event)) = cx.take_mailbox() {
        cx.push_replay(event.clone());
        return Ok(Some(event));
    }
    // A producer already ran earlier in this run; the rest of the
    // continuation belongs to its children, so later sites yield nothing.
    if cx.has_delegated() {
        cx.push_delegated();
        return Ok(None);
    }
    // The captured continuation parks in the mailbox for the duration of
    // the producer loop; each event mints a child from it. A suspension
    // parked by an earlier site is stale here, so capture afresh.
    let suspension = cx.capture();
    cx.put_mailbox(Mailbox::Suspended(suspension));
    loop {
        cx.checkpoint()?;
        if cx.stop_requested() {
            tracing::trace!(branch = %cx.id(), "stop requested; ending stream");
            break;
        }
        let Some(event) = next(cx) else { break };
        let terminal = event.is_terminal();
        let child = cx.suspension_child(event);
        if terminal || cx.location() == Location::RemoteNode {
            fork::resume_inline(child)?;
            if terminal {
                break;
            }
        } else {
            fork::fork(cx, child)?;
        }
    }
    cx.push_delegated();
    cx.mark_delegated();
    if cx.location() != Location::RemoteNode {
        cx.set_location(Location::WaitingParent);
    }
    Ok(None)
}

fn unwrap_value<T>(event: Option<StreamData<T>>) -> Result<Option<T>, BranchError> {
    match event {
        None | Some(StreamData::Done) => Ok(None),
        Some(StreamData::More(value) | StreamData::Last(value)) => Ok(Some(value)),
        Some(StreamData::Error(error)) => Err(error),
    }
}

/// Emits one branch per action outcome.
///
/// On the producer branch every `More` event forks a child (subject to
/// credit) and the loop continues; `Last`, `Done` and `Error` are resumed in
/// line and end the loop, after which the producer reports no local result.
/// On a resumed branch this returns the event that branch was forked for.
pub fn parallel<T, R>(
    cx: &mut Cx<T, R>,
    action: &Action<T>,
) -> Result<Option<StreamData<T>>, BranchError>
where
    T: Clone + Send + 'static,
    R: Send + 'static,
{
    produce(cx, |_cx| Some(action.invoke()))
}

/// An infinite stream of values, one branch per value.
///
/// Equivalent to [`parallel`] with every outcome marked `More`; the stream
/// only ends through a failure or a tree-wide stop.
pub fn wait_events<T, R>(cx: &mut Cx<T, R>, io: &IoAction<T>) -> Result<Option<T>, BranchError>
where
    T: Clone + Send + 'static,
    R: Send + 'static,
{
    unwrap_value(produce(cx, |_cx| Some(io.invoke(StreamData::More)))?)
}

/// A single deferred value.
///
/// Equivalent to [`parallel`] with the outcome marked `Last`: the value
/// appears exactly once downstream.
pub fn async_once<T, R>(cx: &mut Cx<T, R>, io: &IoAction<T>) -> Result<Option<T>, BranchError>
where
    T: Clone + Send + 'static,
    R: Send + 'static,
{
    unwrap_value(produce(cx, |_cx| Some(io.invoke(StreamData::Last)))?)
}

/// Periodic sampling, emitting only on change.
///
/// The first value is emitted immediately; afterwards the action is polled
/// every `interval` and a branch is forked only when the value differs from
/// the previous one. The previous value is a per-branch cell owned by the
/// producer frame. The inter-poll sleep yields to cancellation.
pub fn sample<T, R>(
    cx: &mut Cx<T, R>,
    io: &IoAction<T>,
    interval: Duration,
) -> Result<Option<T>, BranchError>
where
    T: Clone + PartialEq + Send + 'static,
    R: Send + 'static,
{
    let mut previous: Option<T> = None;
    let event = produce(cx, move |cx| loop {
        if previous.is_some() {
            if let Err(error) = cx.sleep(interval) {
                return Some(StreamData::Error(error));
            }
            if cx.stop_requested() {
                return None;
            }
        }
        match io.invoke(StreamData::More) {
            StreamData::More(value) => {
                if previous.as_ref() != Some(&value) {
                    previous = Some(value.clone());
                    return Some(StreamData::More(value));
                }
            }
            terminal => return Some(terminal),
        }
    })?;
    unwrap_value(event)
}

/// Forces in-worker execution of `body`.
///
/// The branch is pinned (`RemoteNode`) for the dynamic extent of `body`:
/// every child minted below is resumed in line, so no worker is spawned
/// regardless of spare credit. The prior placement is restored on exit. A
/// resumed branch still flowing through upstream decisions passes straight
/// through: the pinning it inherited at fork time is already in force.
pub fn sync<T, R, U>(
    cx: &mut Cx<T, R>,
    body: impl FnOnce(&mut Cx<T, R>) -> Result<U, BranchError>,
) -> Result<U, BranchError> {
    if cx.mid_replay() {
        return body(cx);
    }
    let prior = cx.location();
    cx.set_location(Location::RemoteNode);
    let out = body(cx);
    cx.set_location(prior);
    out
}

/// Bounds the fan-out of everything beneath `body` to `n` extra workers.
///
/// A fresh credit pool replaces the inherited handle for the dynamic extent
/// of `body` and the prior handle is restored on both normal and error
/// exit. Children forked inside keep the scoped pool until they finish, so
/// the pool is whole again once the subtree quiesces. `n = 0` forces every
/// nested generator through the in-line fallback.
pub fn threads<T, R, U>(
    cx: &mut Cx<T, R>,
    n: usize,
    body: impl FnOnce(&mut Cx<T, R>) -> Result<U, BranchError>,
) -> Result<U, BranchError> {
    if cx.mid_replay() {
        return body(cx);
    }
    let prior = cx.swap_credit(CreditPool::handle(n));
    let out = body(cx);
    let _scoped = cx.swap_credit(prior);
    out
}

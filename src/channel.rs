//! Child→parent event channel.
//!
//! Every branch owns one inbox. Its children (many writers) push completion
//! and pass-on events into it; the owning branch (single reader) drains them.
//! The channel is unbounded, so sending never blocks and never fails while
//! the tree is alive.
//!
//! The inbox doubles as the branch's cancellation point: a parent holding an
//! [`InterruptHandle`] can flag the channel interrupted, which wakes any
//! blocked read and stays visible to `checkpoint`-style polling. A dying
//! branch that still has to collect its children reads with [`EventReceiver::recv_quiet`],
//! which ignores the flag.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::BranchResult;
use crate::types::WorkerId;

/// An event pushed up a child→parent channel.
#[derive(Debug)]
pub enum ChildEvent<R> {
    /// A spawned child finished. Sent exactly once per worker, after the
    /// child's own subtree has quiesced.
    ChildDone(WorkerId, BranchResult<R>),
    /// A result bag travelling toward the root.
    PassOnResult(BranchResult<R>),
}

/// Error returned by an interruptible receive that was interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupted;

impl std::fmt::Display for Interrupted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "receive interrupted")
    }
}

impl std::error::Error for Interrupted {}

#[derive(Debug)]
struct Shared<R> {
    queue: Mutex<VecDeque<ChildEvent<R>>>,
    ready: Condvar,
    interrupted: AtomicBool,
}

impl<R> Shared<R> {
    fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }
}

/// Creates an unbounded child-event channel.
#[must_use]
pub fn channel<R>() -> (EventSender<R>, EventReceiver<R>) {
    let shared = Arc::new(Shared {
        queue: Mutex::new(VecDeque::new()),
        ready: Condvar::new(),
        interrupted: AtomicBool::new(false),
    });
    (
        EventSender {
            shared: Arc::clone(&shared),
        },
        EventReceiver { shared },
    )
}

/// Writer half, cloned into every child of the owning branch.
#[derive(Debug)]
pub struct EventSender<R> {
    shared: Arc<Shared<R>>,
}

impl<R> Clone for EventSender<R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<R> EventSender<R> {
    /// Pushes an event and wakes the reader.
    pub fn send(&self, event: ChildEvent<R>) {
        let mut queue = self.shared.queue.lock().expect("channel lock poisoned");
        queue.push_back(event);
        drop(queue);
        self.shared.ready.notify_all();
    }
}

/// Reader half plus interrupt state, owned by the branch.
#[derive(Debug)]
pub struct EventReceiver<R> {
    shared: Arc<Shared<R>>,
}

impl<R> EventReceiver<R> {
    /// Pops the next queued event without blocking.
    #[must_use]
    pub fn try_recv(&self) -> Option<ChildEvent<R>> {
        self.shared
            .queue
            .lock()
            .expect("channel lock poisoned")
            .pop_front()
    }

    /// Blocks for the next event; returns `Err(Interrupted)` if the channel
    /// is (or becomes) interrupted, even when events are queued.
    pub fn recv(&self) -> Result<ChildEvent<R>, Interrupted> {
        let mut queue = self.shared.queue.lock().expect("channel lock poisoned");
        loop {
            if self.shared.is_interrupted() {
                return Err(Interrupted);
            }
            if let Some(event) = queue.pop_front() {
                return Ok(event);
            }
            queue = self
                .shared
                .ready
                .wait(queue)
                .expect("channel lock poisoned");
        }
    }

    /// Blocks for the next event, ignoring the interrupt flag.
    #[must_use]
    pub fn recv_quiet(&self) -> ChildEvent<R> {
        let mut queue = self.shared.queue.lock().expect("channel lock poisoned");
        loop {
            if let Some(event) = queue.pop_front() {
                return event;
            }
            queue = self
                .shared
                .ready
                .wait(queue)
                .expect("channel lock poisoned");
        }
    }

    /// Blocks for the next event until `deadline`, ignoring the interrupt
    /// flag. Returns `None` when the deadline passes first.
    #[must_use]
    pub fn recv_quiet_deadline(&self, deadline: Instant) -> Option<ChildEvent<R>> {
        let mut queue = self.shared.queue.lock().expect("channel lock poisoned");
        loop {
            if let Some(event) = queue.pop_front() {
                return Some(event);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _timeout) = self
                .shared
                .ready
                .wait_timeout(queue, deadline - now)
                .expect("channel lock poisoned");
            queue = guard;
        }
    }

    /// Sleeps for `duration` without consuming events. Returns `true` if the
    /// wait ended early because the channel was interrupted.
    #[must_use]
    pub fn park_for(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut queue = self.shared.queue.lock().expect("channel lock poisoned");
        loop {
            if self.shared.is_interrupted() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _timeout) = self
                .shared
                .ready
                .wait_timeout(queue, deadline - now)
                .expect("channel lock poisoned");
            queue = guard;
        }
    }

    /// Returns true if a parent has interrupted this branch.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.shared.is_interrupted()
    }

    /// Returns the number of queued events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared
            .queue
            .lock()
            .expect("channel lock poisoned")
            .len()
    }

    /// Returns true if no events are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Creates a handle a parent can use to interrupt this branch.
    #[must_use]
    pub fn interrupt_handle(&self) -> InterruptHandle<R> {
        InterruptHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Cloneable handle a parent keeps per pending child to cancel it.
#[derive(Debug)]
pub struct InterruptHandle<R> {
    shared: Arc<Shared<R>>,
}

impl<R> Clone for InterruptHandle<R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<R> InterruptHandle<R> {
    /// Flags the channel interrupted and wakes any blocked read.
    pub fn interrupt(&self) {
        self.shared.interrupted.store(true, Ordering::Release);
        // Taking the lock orders the store against a reader that has
        // checked the flag but not yet parked on the condvar.
        drop(self.shared.queue.lock().expect("channel lock poisoned"));
        self.shared.ready.notify_all();
    }
}

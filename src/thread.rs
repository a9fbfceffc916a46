//! Thread records and the handles that name them.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::context::Context;
use crate::stack::Stack;

/// Identifier of a logical thread, never reused within the process.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(u64);

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

impl ThreadId {
    pub(crate) fn new() -> Self {
        ThreadId(NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Scheduling state of a thread
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ThreadState {
    /// Runnable, waiting for its turn
    Ready,
    /// The one thread currently executing
    Running,
    /// Exited; holds a result until joined
    Finished,
}

/// Owning handle to a created thread.
///
/// Consumed by [`Scheduler::join`](crate::Scheduler::join), which is the only
/// way a thread's stack and record are released. Dropping the handle without
/// joining leaves the thread registered until the scheduler itself is dropped.
#[must_use = "a thread is only released by joining its handle"]
#[derive(Debug, PartialEq, Eq)]
pub struct JoinHandle {
    id: ThreadId,
    slot: usize,
}

impl JoinHandle {
    pub(crate) fn new(id: ThreadId, slot: usize) -> Self {
        JoinHandle { id, slot }
    }

    /// Identifier of the thread this handle joins.
    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub(crate) fn slot(&self) -> usize {
        self.slot
    }
}

/// One logical thread: its saved registers, its stack, and its link in the
/// registry ring.
pub(crate) struct ThreadRecord {
    pub id: ThreadId,
    pub context: Context,
    /// `None` for the adopted host, which runs on the stack it came with.
    pub stack: Option<Stack>,
    pub state: ThreadState,
    /// Slot of the next record in the ring. Maintained by the registry.
    pub next: usize,
    /// Written once by exit, taken once by join.
    pub result: Option<usize>,
    /// Body not yet started. Taken on first dispatch.
    pub entry: Option<Box<dyn FnOnce()>>,
}

impl ThreadRecord {
    /// Record for a thread that will start in `context` on `stack`.
    pub fn spawned(id: ThreadId, context: Context, stack: Stack, entry: Box<dyn FnOnce()>) -> Self {
        ThreadRecord {
            id,
            context,
            stack: Some(stack),
            state: ThreadState::Ready,
            next: 0,
            result: None,
            entry: Some(entry),
        }
    }

    /// Record wrapping the execution context that is already running.
    ///
    /// Its context is filled in by the first switch away from it.
    pub fn adopted(id: ThreadId) -> Self {
        ThreadRecord {
            id,
            context: Context::default(),
            stack: None,
            state: ThreadState::Ready,
            next: 0,
            result: None,
            entry: None,
        }
    }

    pub fn is_adopted(&self) -> bool {
        self.stack.is_none()
    }
}

impl fmt::Debug for ThreadRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadRecord")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("next", &self.next)
            .field("stack", &self.stack)
            .field("result", &self.result)
            .finish()
    }
}

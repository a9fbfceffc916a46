//! Round-robin cooperative scheduler and thread lifecycle.
//!
//! # Example
//!
//! ```no_run
//! use qthread::{Scheduler, exit, yield_now};
//!
//! let scheduler = Scheduler::new().unwrap();
//! scheduler.init().unwrap();
//!
//! let worker = scheduler
//!     .create(|| {
//!         println!("Thread 1");
//!         yield_now();
//!         exit(100);
//!     })
//!     .unwrap();
//!
//! scheduler.schedule();
//! assert_eq!(scheduler.join(worker).unwrap(), 100);
//! ```

use std::cell::Cell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::ptr::{self, NonNull};

use crate::config::Config;
use crate::context::{self, Context};
use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::stack::Stack;
use crate::thread::{JoinHandle, ThreadId, ThreadRecord, ThreadState};

thread_local! {
    /// Domain active on this OS thread, null if none
    static ACTIVE: Cell<*mut Domain> = const { Cell::new(ptr::null_mut()) };
}

fn active() -> *mut Domain {
    ACTIVE.with(Cell::get)
}

fn active_or_panic(op: &str) -> *mut Domain {
    let domain = active();
    assert!(!domain.is_null(), "{op} called with no scheduler active on this OS thread");
    domain
}

/// State shared by every thread of one scheduling domain.
///
/// Lives at a fixed heap address for the life of its [`Scheduler`]; fresh
/// threads receive that address through their initial context. It is only
/// touched through the raw pointer, and never across a context switch.
struct Domain {
    registry: Registry,
    /// Slot of the RUNNING record, `None` until the first dispatch
    current: Option<usize>,
    config: Config,
    /// Slot of the adopted host record
    host: Option<usize>,
    /// Registers of whoever dispatched the first thread without being a
    /// registered thread itself. Resumed when the last runnable thread exits.
    origin: Context,
    origin_saved: bool,
}

impl Domain {
    fn new(config: Config) -> Self {
        Domain {
            registry: Registry::new(),
            current: None,
            config,
            host: None,
            origin: Context::default(),
            origin_saved: false,
        }
    }

    fn current_id(&self) -> Option<ThreadId> {
        let slot = self.current?;
        self.registry.get(slot).map(|record| record.id)
    }

    fn lookup(&self, handle: &JoinHandle) -> Option<&ThreadRecord> {
        self.registry
            .get(handle.slot())
            .filter(|record| record.id == handle.id())
    }

    fn adopt_host(&mut self) -> Result<ThreadId> {
        if self.host.is_some() {
            return Err(Error::AlreadyInitialized);
        }
        if !self.registry.is_empty() {
            return Err(Error::InitAfterCreate);
        }

        let id = ThreadId::new();
        let slot = self.registry.register(ThreadRecord::adopted(id))?;
        self.host = Some(slot);

        log::debug!("adopted host execution context as thread {id}");
        Ok(id)
    }

    /// Allocate, prepare and register a new READY thread.
    ///
    /// # Safety
    /// `this` must point to a live domain.
    unsafe fn create(this: *mut Domain, entry: Box<dyn FnOnce()>) -> Result<JoinHandle> {
        let d = unsafe { &mut *this };

        let stack = Stack::new(d.config.stack_size, d.config.guard_page)?;
        let context = context::prepare(&stack, thread_entry, this.cast());
        let stack_size = stack.size();

        let id = ThreadId::new();
        // On failure the record is dropped here, unmapping the stack.
        let slot = d
            .registry
            .register(ThreadRecord::spawned(id, context, stack, entry))?;

        log::debug!("created thread {id} with a {stack_size} byte stack");
        Ok(JoinHandle::new(id, slot))
    }

    /// Pick the next READY thread after the current one and switch to it.
    ///
    /// Returns immediately if there is nothing to run. Otherwise returns once
    /// the calling thread is dispatched again.
    ///
    /// # Safety
    /// `this` must point to the live domain that owns the calling thread.
    unsafe fn schedule(this: *mut Domain) {
        let d = unsafe { &mut *this };

        if d.registry.is_empty() {
            return;
        }

        let current = match d.current {
            Some(slot) => slot,
            None => {
                let Some(first) = d
                    .registry
                    .find_from_head(|record| record.state == ThreadState::Ready)
                else {
                    return;
                };

                d.current = Some(first);
                let record = d
                    .registry
                    .get_mut(first)
                    .expect("selected thread is not registered");
                record.state = ThreadState::Running;

                if !record.is_adopted() {
                    // Bootstrap: the caller is not a registered thread, so
                    // park it as the origin.
                    log::trace!("dispatching thread {} from origin", record.id);
                    let new = &record.context as *const Context;
                    let old = &mut d.origin as *mut Context;
                    d.origin_saved = true;
                    unsafe { context::switch(old, new) };
                    return;
                }

                // The adopted host is the caller. Carry on as a yield from it.
                first
            }
        };

        let Some(next) = d
            .registry
            .find_after(current, |record| record.state == ThreadState::Ready)
        else {
            // Nothing else runnable. A still-running caller keeps going; a
            // finished one falls back to whoever invoked the scheduler.
            return;
        };

        let (outgoing, incoming) = d
            .registry
            .pair_mut(current, next)
            .expect("scheduled threads are not registered");
        if outgoing.state == ThreadState::Running {
            outgoing.state = ThreadState::Ready;
        }
        incoming.state = ThreadState::Running;
        log::trace!("switching from thread {} to {}", outgoing.id, incoming.id);

        let old = &mut outgoing.context as *mut Context;
        let new = &incoming.context as *const Context;
        d.current = Some(next);
        unsafe { context::switch(old, new) };
    }

    /// Finish the current thread with `value` and never come back.
    ///
    /// # Safety
    /// `this` must point to the live domain that owns the calling thread.
    unsafe fn exit(this: *mut Domain, value: usize) -> ! {
        {
            let d = unsafe { &mut *this };
            let slot = d
                .current
                .expect("exit called outside of a dispatched thread");
            let record = d
                .registry
                .get_mut(slot)
                .expect("current thread is not registered");
            assert!(!record.is_adopted(), "the host thread cannot exit");

            record.result = Some(value);
            record.state = ThreadState::Finished;
            log::debug!("thread {} exited with {value:#x}", record.id);
        }

        unsafe { Domain::schedule(this) };

        // Nothing was runnable: resume whoever bootstrapped the scheduler.
        let d = unsafe { &mut *this };
        let slot = d.current.take().expect("exiting thread lost its slot");
        assert!(d.origin_saved, "no execution context left to resume");
        d.origin_saved = false;

        let record = d
            .registry
            .get_mut(slot)
            .expect("exiting thread is not registered");
        log::trace!("thread {} returning to origin", record.id);
        let old = &mut record.context as *mut Context;
        let new = &d.origin as *const Context;
        unsafe { context::switch(old, new) };

        unreachable!("a finished thread was resumed");
    }

    /// Yield until the thread behind `handle` finishes, then release it.
    ///
    /// # Safety
    /// `this` must point to the live domain that owns the calling thread.
    unsafe fn join(this: *mut Domain, handle: JoinHandle) -> Result<usize> {
        loop {
            let d = unsafe { &*this };
            let record = d
                .lookup(&handle)
                .ok_or(Error::UnknownThread(handle.id()))?;
            if record.state == ThreadState::Finished {
                break;
            }
            assert_ne!(
                d.current,
                Some(handle.slot()),
                "thread {} cannot join itself",
                handle.id()
            );
            unsafe { Domain::schedule(this) };
        }

        let d = unsafe { &mut *this };
        let record = d
            .registry
            .unregister(handle.slot())
            .expect("finished thread vanished from the registry");
        log::debug!("joined thread {}", record.id);

        // Dropping the record unmaps its stack.
        Ok(record.result.unwrap_or_default())
    }
}

/// Where every created thread starts.
///
/// Runs the thread's body and exits with 0 if the body returns. `arg` is the
/// owning domain.
extern "C" fn thread_entry(arg: *mut ()) -> ! {
    let this = arg.cast::<Domain>();

    let entry = {
        let d = unsafe { &mut *this };
        let slot = d.current.expect("started thread is not current");
        d.registry
            .get_mut(slot)
            .and_then(|record| record.entry.take())
    };

    if let Some(entry) = entry {
        // Unwinding cannot cross into whatever context switched here.
        if panic::catch_unwind(AssertUnwindSafe(entry)).is_err() {
            log::error!("a cooperative thread panicked; aborting");
            std::process::abort();
        }
    }

    unsafe { Domain::exit(this, 0) }
}

/// A cooperative scheduling domain.
///
/// Owns every thread created through it. At most one may be alive per OS
/// thread; code running inside its threads reaches it through the free
/// functions [`spawn`], [`yield_now`], [`join`], [`exit`] and [`current`].
///
/// Dropping the scheduler releases any threads still registered. Values
/// living on the stacks of threads that never finished are not dropped.
pub struct Scheduler {
    domain: NonNull<Domain>,
}

impl Scheduler {
    /// Create a scheduler with the default [`Config`].
    pub fn new() -> Result<Self> {
        Self::with_config(Config::default())
    }

    /// Create a scheduler and make it the active one on this OS thread.
    pub fn with_config(config: Config) -> Result<Self> {
        if !active().is_null() {
            return Err(Error::AlreadyActive);
        }

        let domain = NonNull::from(Box::leak(Box::new(Domain::new(config))));
        ACTIVE.with(|active| active.set(domain.as_ptr()));

        log::debug!(
            "scheduler activated (stack size {}, guard page {})",
            config.stack_size,
            config.guard_page
        );
        Ok(Scheduler { domain })
    }

    fn raw(&self) -> *mut Domain {
        self.domain.as_ptr()
    }

    fn domain(&self) -> &Domain {
        unsafe { self.domain.as_ref() }
    }

    /// Adopt the calling execution context as a registered thread.
    ///
    /// Must come before any [`create`](Self::create). Once adopted, the
    /// caller takes part in the round robin like any other thread, so the
    /// scheduler can hand control back to it when the others yield or exit.
    pub fn init(&self) -> Result<ThreadId> {
        unsafe { (*self.raw()).adopt_host() }
    }

    /// Set the stack size for threads created after this call.
    pub fn set_stack_size(&self, bytes: usize) {
        unsafe { (*self.raw()).config.stack_size = bytes };
    }

    /// Stack size new threads will be created with.
    pub fn stack_size(&self) -> usize {
        self.domain().config.stack_size
    }

    /// Create a READY thread running `f`, appended to the round robin.
    ///
    /// On error nothing is registered.
    pub fn create<F>(&self, f: F) -> Result<JoinHandle>
    where
        F: FnOnce() + 'static,
    {
        unsafe { Domain::create(self.raw(), Box::new(f)) }
    }

    /// Create a thread that runs `start(arg)`.
    pub fn create_with<A: 'static>(&self, start: fn(A), arg: A) -> Result<JoinHandle> {
        self.create(move || start(arg))
    }

    /// Yield to the next READY thread, if there is one.
    pub fn schedule(&self) {
        unsafe { Domain::schedule(self.raw()) }
    }

    /// Finish the calling thread with `value`. See [`exit`].
    ///
    /// Nothing still alive on the calling thread's stack is dropped.
    pub fn exit(&self, value: usize) -> ! {
        unsafe { Domain::exit(self.raw(), value) }
    }

    /// Wait for a thread to finish, release it, and return its exit value.
    ///
    /// Waiting is a yield loop: the caller keeps calling the scheduler until
    /// the target is FINISHED.
    ///
    /// # Panics
    /// If a thread tries to join itself.
    pub fn join(&self, handle: JoinHandle) -> Result<usize> {
        unsafe { Domain::join(self.raw(), handle) }
    }

    /// The thread currently RUNNING, `None` before the first dispatch.
    pub fn current(&self) -> Option<ThreadId> {
        self.domain().current_id()
    }

    /// State of the thread behind `handle`.
    pub fn state(&self, handle: &JoinHandle) -> Option<ThreadState> {
        self.domain().lookup(handle).map(|record| record.state)
    }

    /// Usable stack bytes of the thread behind `handle`.
    pub fn stack_size_of(&self, handle: &JoinHandle) -> Option<usize> {
        let record = self.domain().lookup(handle)?;
        record.stack.as_ref().map(Stack::size)
    }

    /// Number of registered threads, the adopted host included.
    pub fn len(&self) -> usize {
        self.domain().registry.len()
    }

    /// True when no thread is registered, not even an adopted host.
    pub fn is_empty(&self) -> bool {
        self.domain().registry.is_empty()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = self.domain();
        f.debug_struct("Scheduler")
            .field("threads", &d.registry.len())
            .field("current", &d.current_id())
            .field("config", &d.config)
            .finish()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        ACTIVE.with(|active| {
            if active.get() == self.raw() {
                active.set(ptr::null_mut());
            }
        });

        let d = unsafe { &mut *self.raw() };
        let inside_thread = d
            .current
            .and_then(|slot| d.registry.get(slot))
            .is_some_and(|record| !record.is_adopted());
        if inside_thread {
            // Freeing the domain would pull the stack out from under the
            // caller. Leak it.
            log::warn!(
                "scheduler dropped from inside thread {:?}; leaking {} threads",
                d.current_id(),
                d.registry.len()
            );
            return;
        }

        let mut domain = unsafe { Box::from_raw(self.raw()) };
        let unjoined = domain
            .registry
            .drain()
            .filter(|record| !record.is_adopted())
            .count();
        if unjoined > 0 {
            log::warn!("scheduler dropped with {unjoined} unjoined threads");
        }
    }
}

/// Create a thread in the active scheduler. See [`Scheduler::create`].
///
/// # Panics
/// If no scheduler is active on this OS thread.
pub fn spawn<F>(f: F) -> Result<JoinHandle>
where
    F: FnOnce() + 'static,
{
    let domain = active_or_panic("spawn");
    unsafe { Domain::create(domain, Box::new(f)) }
}

/// Hand control to the next READY thread.
///
/// A no-op when no scheduler is active or nothing else is runnable.
pub fn yield_now() {
    let domain = active();
    if !domain.is_null() {
        unsafe { Domain::schedule(domain) };
    }
}

/// Finish the calling thread with `value`.
///
/// The value is handed unchanged to whoever joins the thread. Never returns:
/// finished threads are not dispatched again. The thread's frame is
/// abandoned, so its locals and the values its closure captured are never
/// dropped; let them go out of scope before calling `exit`, or return from
/// the closure instead.
///
/// # Panics
/// If no scheduler is active, if no thread has been dispatched yet, or if
/// called from the adopted host thread.
pub fn exit(value: usize) -> ! {
    let domain = active_or_panic("exit");
    unsafe { Domain::exit(domain, value) }
}

/// Join a thread of the active scheduler. See [`Scheduler::join`].
///
/// # Panics
/// If no scheduler is active on this OS thread, or if a thread tries to join
/// itself.
pub fn join(handle: JoinHandle) -> Result<usize> {
    let domain = active_or_panic("join");
    unsafe { Domain::join(domain, handle) }
}

/// The thread currently RUNNING in the active scheduler.
///
/// `None` if no scheduler is active or nothing has been dispatched yet.
pub fn current() -> Option<ThreadId> {
    let domain = active();
    if domain.is_null() {
        return None;
    }
    unsafe { (*domain).current_id() }
}

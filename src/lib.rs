//! Cooperative user-level threads.
//!
//! A [`Scheduler`] multiplexes any number of logical threads onto the OS
//! thread that owns it. Threads run until they yield or exit; nothing is
//! preempted. Selection is strict round robin over registration order.
//!
//! - [`Scheduler::create`] / [`spawn`]: register a READY thread with its own stack
//! - [`Scheduler::schedule`] / [`yield_now`]: switch to the next READY thread
//! - [`exit`]: finish the calling thread with a word-sized result
//! - [`Scheduler::join`] / [`join`]: yield until a thread finishes, then release it
//! - [`Scheduler::init`]: adopt the calling context so it can be switched back to
//!
//! ```no_run
//! use qthread::{Scheduler, current, yield_now};
//!
//! let scheduler = Scheduler::new().unwrap();
//!
//! let handles: Vec<_> = (1..=3)
//!     .map(|n| {
//!         scheduler
//!             .create(move || {
//!                 for i in 0..2 {
//!                     println!("thread {n} ({:?}): {i}", current());
//!                     yield_now();
//!                 }
//!             })
//!             .unwrap()
//!     })
//!     .collect();
//!
//! for handle in handles {
//!     scheduler.join(handle).unwrap();
//! }
//! ```

mod arch;
mod config;
mod context;
mod error;
mod registry;
mod scheduler;
mod stack;
mod thread;

pub use config::Config;
pub use error::{Error, Result};
pub use scheduler::{Scheduler, current, exit, join, spawn, yield_now};
pub use stack::{DEFAULT_STACK_SIZE, MIN_STACK_SIZE};
pub use thread::{JoinHandle, ThreadId, ThreadState};

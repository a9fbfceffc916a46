//! Error types for thread creation and domain management.
//!
//! Only conditions a caller can act on are reported here. Misuse of the API
//! (exiting the adopted host thread, calling [`exit`](crate::exit) outside a
//! scheduling domain, joining the calling thread) panics instead.

use std::io;

use crate::thread::ThreadId;

/// Errors reported by the scheduling domain.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The operating system refused to map a stack buffer.
    #[error("failed to allocate a {size} byte thread stack")]
    StackAllocation {
        /// Requested mapping length, guard page included
        size: usize,
        /// Error returned by `mmap`
        #[source]
        source: io::Error,
    },

    /// The guard page below a fresh stack could not be protected.
    ///
    /// The stack has already been unmapped when this is returned.
    #[error("failed to protect the stack guard page")]
    GuardPage {
        /// Error returned by `mprotect`
        #[source]
        source: io::Error,
    },

    /// No room could be reserved for another thread record.
    #[error("failed to allocate a thread record")]
    RecordAllocation,

    /// Another scheduling domain is already active on this OS thread.
    #[error("a scheduler is already active on this OS thread")]
    AlreadyActive,

    /// The host execution context has already been adopted.
    #[error("the host thread has already been adopted")]
    AlreadyInitialized,

    /// The host can only be adopted before any thread is created.
    #[error("the host thread must be adopted before any thread is created")]
    InitAfterCreate,

    /// The handle does not name a thread registered in this domain.
    #[error("thread {0} is not registered with this scheduler")]
    UnknownThread(ThreadId),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

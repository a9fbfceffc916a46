//! Scheduler configuration.

use crate::stack::DEFAULT_STACK_SIZE;

/// Settings a [`Scheduler`](crate::Scheduler) starts from.
///
/// ```no_run
/// use qthread::{Config, Scheduler};
///
/// let config = Config::default().with_stack_size(128 * 1024);
/// let scheduler = Scheduler::with_config(config).unwrap();
/// assert_eq!(scheduler.stack_size(), 128 * 1024);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Stack size for threads created from now on, in bytes
    pub stack_size: usize,
    /// Reserve an inaccessible page below each stack
    pub guard_page: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            stack_size: DEFAULT_STACK_SIZE,
            guard_page: cfg!(feature = "guard_pages"),
        }
    }
}

impl Config {
    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = bytes;
        self
    }

    pub fn with_guard_page(mut self, enabled: bool) -> Self {
        self.guard_page = enabled;
        self
    }
}

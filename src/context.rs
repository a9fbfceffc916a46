//! The one place execution state is swapped.
//!
//! Everything above this module deals in records and states; everything
//! below it is register shuffling in [`crate::arch`].

use crate::arch;
use crate::stack::Stack;

pub(crate) use crate::arch::Context;

/// Entry point of a thread that has never run. It must not return.
pub(crate) type Entry = extern "C" fn(*mut ()) -> !;

/// Build a context whose first switch calls `entry(arg)` on `stack`, with
/// default floating-point control state.
pub(crate) fn prepare(stack: &Stack, entry: Entry, arg: *mut ()) -> Context {
    // The top word belongs to `stack` and nothing else uses it before the
    // first switch.
    unsafe { Context::new(stack.top(), entry as usize, arg as u64) }
}

/// Suspend the caller into `old` and resume `new`.
///
/// # Safety
/// `new` must be a context saved by an earlier `switch` or built by
/// [`prepare`], and the stack it runs on must still be mapped. Neither
/// pointer may be used for anything else until the caller is resumed.
#[inline(always)]
pub(crate) unsafe fn switch(old: *mut Context, new: *const Context) {
    unsafe { arch::context_switch(old, new) }
}

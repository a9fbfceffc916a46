//! aarch64 register save/restore (AAPCS64)

use std::arch::naked_asm;

/// Everything a voluntary switch must carry on aarch64.
///
/// AAPCS64 makes x19-x28, the frame pointer, the low halves of v8-v15 and
/// the FPCR control bits callee-saved. The link register doubles as the
/// resume address.
///
/// Offsets are hard-coded in [`context_switch`].
#[repr(C)]
#[derive(Debug, Clone, Default)]
pub struct Context {
    sp: u64, // 0x00
    lr: u64, // 0x08
    fp: u64, // 0x10
    /// x19-x28. For a fresh thread x19 holds the entry argument and x20 the
    /// entry function.
    x: [u64; 10], // 0x18
    /// d8-d15
    d: [u64; 8], // 0x68
    /// Rounding mode and trap enables. Zero is the architectural reset
    /// value: round to nearest, no traps.
    fpcr: u64, // 0xa8
}

impl Context {
    /// Context of a thread that has never run: the first switch into it
    /// lands in [`thread_start`], which calls `entry(arg)`.
    ///
    /// # Safety
    /// `stack_top` must be the 16-byte aligned top of a live stack owned by
    /// the new thread.
    pub unsafe fn new(stack_top: usize, entry: usize, arg: u64) -> Self {
        let mut x = [0; 10];
        x[0] = arg;
        x[1] = entry as u64;

        Context {
            sp: stack_top as u64,
            lr: thread_start as usize as u64,
            x,
            ..Default::default()
        }
    }
}

/// First instructions of every fresh thread.
///
/// Hands x19 to the entry function as its first argument. The entry never
/// returns; `brk` traps if it does.
#[unsafe(naked)]
unsafe extern "C" fn thread_start() -> ! {
    naked_asm!(
        "mov x0, x19",
        "blr x20",
        "brk #0",
    );
}

/// Save the running thread into `old` and resume `new`.
///
/// Returns once some other thread switches back into `old`.
///
/// # Safety
/// `old` must be writable and `new` must hold either a context saved by a
/// previous switch or one built by [`Context::new`] whose stack is still alive.
#[unsafe(naked)]
pub unsafe extern "C" fn context_switch(_old: *mut Context, _new: *const Context) {
    // x0 = old, x1 = new. x9 and x10 are caller-saved scratch.
    naked_asm!(
        "mov x9, sp",
        "stp x9, lr,   [x0, #0x00]",
        "stp fp, x19,  [x0, #0x10]",
        "stp x20, x21, [x0, #0x20]",
        "stp x22, x23, [x0, #0x30]",
        "stp x24, x25, [x0, #0x40]",
        "stp x26, x27, [x0, #0x50]",
        "str x28,      [x0, #0x60]",
        "stp d8, d9,   [x0, #0x68]",
        "stp d10, d11, [x0, #0x78]",
        "stp d12, d13, [x0, #0x88]",
        "stp d14, d15, [x0, #0x98]",
        "mrs x10, fpcr",
        "str x10,      [x0, #0xa8]",
        "ldp x9, lr,   [x1, #0x00]",
        "mov sp, x9",
        "ldp fp, x19,  [x1, #0x10]",
        "ldp x20, x21, [x1, #0x20]",
        "ldp x22, x23, [x1, #0x30]",
        "ldp x24, x25, [x1, #0x40]",
        "ldp x26, x27, [x1, #0x50]",
        "ldr x28,      [x1, #0x60]",
        "ldp d8, d9,   [x1, #0x68]",
        "ldp d10, d11, [x1, #0x78]",
        "ldp d12, d13, [x1, #0x88]",
        "ldp d14, d15, [x1, #0x98]",
        "ldr x10,      [x1, #0xa8]",
        "msr fpcr, x10",
        "ret",
    );
}

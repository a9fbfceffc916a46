//! x86_64 register save/restore (System V ABI)

use std::arch::naked_asm;

/// MXCSR after reset: all SSE exceptions masked, round to nearest.
const MXCSR_DEFAULT: u32 = 0x1F80;
/// x87 control word after `fninit`: exceptions masked, 64-bit precision,
/// round to nearest.
const FPU_CW_DEFAULT: u16 = 0x037F;

/// Everything a voluntary switch must carry on x86_64.
///
/// The System V ABI makes rbx, rbp and r12-r15 callee-saved, together with
/// the control bits of MXCSR and the x87 control word. Rounding mode and
/// exception masks therefore belong to the thread, not to the OS thread it
/// runs on.
///
/// Offsets are hard-coded in [`context_switch`].
#[repr(C)]
#[derive(Debug, Clone)]
pub struct Context {
    rsp: u64, // 0x00
    rbp: u64, // 0x08
    /// Fresh thread: argument for the entry function
    rbx: u64, // 0x10
    /// Fresh thread: entry function address
    r12: u64, // 0x18
    r13: u64, // 0x20
    r14: u64, // 0x28
    r15: u64, // 0x30
    mxcsr: u32,  // 0x38
    fpu_cw: u16, // 0x3c
}

impl Default for Context {
    fn default() -> Self {
        Context {
            rsp: 0,
            rbp: 0,
            rbx: 0,
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
            mxcsr: MXCSR_DEFAULT,
            fpu_cw: FPU_CW_DEFAULT,
        }
    }
}

impl Context {
    /// Context of a thread that has never run: the first switch into it
    /// lands in [`thread_start`], which calls `entry(arg)`.
    ///
    /// # Safety
    /// `stack_top` must be 16-byte aligned and the 8 bytes below it must be
    /// writable memory owned by the new thread.
    pub unsafe fn new(stack_top: usize, entry: usize, arg: u64) -> Self {
        // `ret` in the switch pops the trampoline address and leaves
        // rsp = stack_top, 16-aligned, so the trampoline's `call` enters
        // `entry` with the 16n+8 alignment of an ordinary call.
        let initial_rsp = stack_top - 8;
        unsafe {
            std::ptr::write(initial_rsp as *mut u64, thread_start as usize as u64);
        }

        Context {
            rsp: initial_rsp as u64,
            rbx: arg,
            r12: entry as u64,
            ..Default::default()
        }
    }
}

/// First instructions of every fresh thread.
///
/// Hands rbx to the entry function as its first argument. The entry never
/// returns; `ud2` traps if it does.
#[unsafe(naked)]
unsafe extern "C" fn thread_start() -> ! {
    naked_asm!(
        "mov rdi, rbx",
        "call r12",
        "ud2",
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
    naked_asm!(
        // Outgoing (rdi): integer registers, then FP control state
        "mov [rdi + 0x00], rsp",
        "mov [rdi + 0x08], rbp",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], r12",
        "mov [rdi + 0x20], r13",
        "mov [rdi + 0x28], r14",
        "mov [rdi + 0x30], r15",
        "stmxcsr [rdi + 0x38]",
        "fnstcw [rdi + 0x3c]",
        // Incoming (rsi)
        "mov rsp, [rsi + 0x00]",
        "mov rbp, [rsi + 0x08]",
        "mov rbx, [rsi + 0x10]",
        "mov r12, [rsi + 0x18]",
        "mov r13, [rsi + 0x20]",
        "mov r14, [rsi + 0x28]",
        "mov r15, [rsi + 0x30]",
        "ldmxcsr [rsi + 0x38]",
        "fldcw [rsi + 0x3c]",
        // Resumes after the incoming thread's own call to context_switch,
        // or enters thread_start for a fresh one.
        "ret",
    );
}

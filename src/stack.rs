//! Stack buffers for logical threads.
//!
//! Every created thread runs on its own anonymous mapping. With guard pages
//! enabled the lowest page of the mapping is left inaccessible, so running off
//! the end of a stack faults instead of scribbling over a neighbour.

use std::fmt;
use std::io;
use std::ptr::{self, NonNull};

use crate::error::{Error, Result};

/// Stack size used when nothing else is configured (64KB)
pub const DEFAULT_STACK_SIZE: usize = 64 * 1024;

/// Smallest usable stack handed out, whatever was requested (16KB)
pub const MIN_STACK_SIZE: usize = 16 * 1024;

fn page_size() -> usize {
    let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page <= 0 { 4096 } else { page as usize }
}

/// Make the lowest `len` bytes at `ptr` inaccessible.
fn protect_guard(ptr: *mut libc::c_void, len: usize) -> io::Result<()> {
    #[cfg(test)]
    if test_hooks::FAIL_GUARD.get() {
        return Err(io::Error::from_raw_os_error(libc::ENOMEM));
    }

    if unsafe { libc::mprotect(ptr, len, libc::PROT_NONE) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}


/// An owned, page-aligned stack mapping.
pub(crate) struct Stack {
    base: NonNull<u8>,
    /// Whole mapping, guard page included
    mapped: usize,
    guard: usize,
}

impl Stack {
    /// Map a stack with at least `size` usable bytes.
    pub fn new(size: usize, guard_page: bool) -> Result<Self> {
        let page = page_size();
        let guard = if guard_page { page } else { 0 };
        let mapped = size
            .max(MIN_STACK_SIZE)
            .checked_next_multiple_of(page)
            .and_then(|usable| usable.checked_add(guard))
            .ok_or_else(|| Error::StackAllocation {
                size,
                source: io::ErrorKind::OutOfMemory.into(),
            })?;

        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                mapped,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(Error::StackAllocation {
                size: mapped,
                source: io::Error::last_os_error(),
            });
        }
        let Some(base) = NonNull::new(ptr.cast::<u8>()) else {
            return Err(Error::StackAllocation {
                size: mapped,
                source: io::ErrorKind::OutOfMemory.into(),
            });
        };

        let stack = Stack {
            base,
            mapped,
            guard,
        };
        #[cfg(test)]
        test_hooks::LIVE.set(test_hooks::LIVE.get() + 1);

        if guard > 0 {
            // errno is captured before Drop's munmap can overwrite it.
            protect_guard(ptr, guard).map_err(|source| Error::GuardPage { source })?;
        }

        Ok(stack)
    }

    /// Usable bytes, guard page excluded.
    pub fn size(&self) -> usize {
        self.mapped - self.guard
    }

    /// Lowest usable address.
    pub fn bottom(&self) -> usize {
        self.base.as_ptr() as usize + self.guard
    }

    /// Highest usable address, aligned to 16 bytes as both ABIs require.
    pub fn top(&self) -> usize {
        (self.base.as_ptr() as usize + self.mapped) & !0xF
    }
}

impl fmt::Debug for Stack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Stack({:#x}..{:#x})", self.bottom(), self.top())
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        let ret = unsafe { libc::munmap(self.base.as_ptr().cast(), self.mapped) };
        if ret != 0 {
            log::warn!(
                "munmap of {} byte stack at {:p} failed: {}",
                self.mapped,
                self.base,
                io::Error::last_os_error()
            );
            return;
        }
        #[cfg(test)]
        test_hooks::LIVE.set(test_hooks::LIVE.get() - 1);
    }
}

use std::io::{Error, ErrorKind, Result};
use std::ptr;

use super::{Stack, StackConfig, StackPointer, MIN_STACK_SIZE};

fn page_size() -> usize {
    let pagesize = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
    assert!(pagesize.is_power_of_two());
    pagesize
}

/// Rounds `size` up to a multiple of `page_size`.
fn round_to_pages(size: usize, page_size: usize) -> Result<usize> {
    debug_assert!(page_size.is_power_of_two());
    size.checked_add(page_size - 1)
        .map(|size| size & !(page_size - 1))
        .ok_or_else(|| Error::new(ErrorKind::InvalidInput, "stack size overflow"))
}

/// Stack mapped with `mmap`, with guard pages at its lower end.
pub struct OsStack {
    base: StackPointer,
    mmap_len: usize,
}

impl OsStack {
    /// Maps a new stack with the given shape.
    pub fn new(config: StackConfig) -> Result<Self> {
        let page_size = page_size();
        let size = round_to_pages(config.size().max(MIN_STACK_SIZE), page_size)?;
        let guard_len = config
            .guard_pages()
            .checked_mul(page_size)
            .ok_or_else(|| Error::new(ErrorKind::InvalidInput, "too many guard pages"))?;
        let mmap_len = size
            .checked_add(guard_len)
            .ok_or_else(|| Error::new(ErrorKind::InvalidInput, "stack size overflow"))?;

        // OpenBSD requires MAP_STACK on anything that is used as a stack.
        cfg_if::cfg_if! {
            if #[cfg(target_os = "openbsd")] {
                #[allow(unused_mut)]
                let mut map_flags = libc::MAP_ANONYMOUS | libc::MAP_PRIVATE | libc::MAP_STACK;
            } else {
                #[allow(unused_mut)]
                let mut map_flags = libc::MAP_ANONYMOUS | libc::MAP_PRIVATE;
            }
        }
        // Growable stacks only take up memory once they are touched.
        #[cfg(any(target_os = "linux", target_os = "android"))]
        if let StackConfig::Growable { .. } = config {
            map_flags |= libc::MAP_NORESERVE;
        }

        unsafe {
            // Reserve address space for the stack and its guard pages.
            let mmap = libc::mmap(ptr::null_mut(), mmap_len, libc::PROT_NONE, map_flags, -1, 0);
            if mmap == libc::MAP_FAILED {
                return Err(Error::last_os_error());
            }

            // Create the result here. If a later call fails then this will be
            // dropped and the memory will be unmapped.
            let out = Self {
                base: StackPointer::new_unchecked(mmap as usize + mmap_len),
                mmap_len,
            };

            // Make everything above the guard pages writable.
            let usable = mmap.cast::<u8>().add(guard_len);
            if libc::mprotect(usable.cast(), size, libc::PROT_READ | libc::PROT_WRITE) != 0 {
                return Err(Error::last_os_error());
            }

            // Stacks grow downwards, so only the top of a growable stack is
            // prepared ahead of time.
            #[cfg(any(target_os = "linux", target_os = "android"))]
            if let StackConfig::Growable { initial, .. } = config {
                let initial = round_to_pages(initial, page_size)?.min(size);
                let start = usable.add(size - initial);
                if libc::madvise(start.cast(), initial, libc::MADV_WILLNEED) != 0 {
                    log::debug!(
                        "madvise on growable stack failed: {}",
                        Error::last_os_error()
                    );
                }
            }

            Ok(out)
        }
    }

    /// Returns the number of bytes mapped for this stack, guard pages
    /// included.
    pub fn mapped_len(&self) -> usize {
        self.mmap_len
    }
}

impl Drop for OsStack {
    fn drop(&mut self) {
        unsafe {
            let mmap = self.base.get() - self.mmap_len;
            let ret = libc::munmap(mmap as _, self.mmap_len);
            debug_assert_eq!(ret, 0);
        }
    }
}

unsafe impl Stack for OsStack {
    #[inline]
    fn base(&self) -> StackPointer {
        self.base
    }

    #[inline]
    fn limit(&self) -> StackPointer {
        unsafe { StackPointer::new_unchecked(self.base.get() - self.mmap_len) }
    }
}

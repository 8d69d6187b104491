//! On Windows the kernel takes part in stack management: stacks are reserved
//! up front and committed lazily behind a moving guard page, and several
//! fields of the Thread Environment Block must follow every stack switch.
//!
//! All of this is already handled by the default stack of the context switch
//! layer, so this is only a thin wrapper around it. Every configuration maps
//! to a reserve of the requested size which grows on demand, with the hard
//! guard page and stack guarantee placed by the OS rules rather than by
//! [`StackConfig::guard_pages`].

use std::io::Result;

use corosensei::stack::{DefaultStack, StackTebFields};

use super::{Stack, StackConfig, StackPointer};

/// Stack reserved with `VirtualAlloc`.
pub struct OsStack {
    inner: DefaultStack,
}

impl OsStack {
    /// Reserves a new stack with the given shape.
    pub fn new(config: StackConfig) -> Result<Self> {
        Ok(Self {
            inner: DefaultStack::new(config.size())?,
        })
    }

    /// Returns the number of bytes reserved for this stack, guard pages
    /// included.
    pub fn mapped_len(&self) -> usize {
        self.inner.base().get() - self.inner.limit().get()
    }
}

unsafe impl Stack for OsStack {
    #[inline]
    fn base(&self) -> StackPointer {
        self.inner.base()
    }

    #[inline]
    fn limit(&self) -> StackPointer {
        self.inner.limit()
    }

    #[inline]
    fn teb_fields(&self) -> StackTebFields {
        self.inner.teb_fields()
    }

    #[inline]
    fn update_teb_fields(&mut self, stack_limit: usize, guaranteed_stack_bytes: usize) {
        self.inner.update_teb_fields(stack_limit, guaranteed_stack_bytes)
    }
}

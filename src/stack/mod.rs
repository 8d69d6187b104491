//! Stack allocation for coroutines.
//!
//! Every coroutine runs on its own stack, obtained from a [`StackAllocator`]
//! when the coroutine is created and handed back to it once the coroutine is
//! dropped. The [`DefaultAllocator`] maps a fresh stack from the OS each time
//! according to a [`StackConfig`]. A [`PooledAllocator`] keeps released stacks
//! around for reuse, which avoids the system calls when many short-lived
//! coroutines are created.
//!
//! All stacks produced by this module have at least one guard page below the
//! usable region, so that a stack overflow faults instead of silently
//! corrupting adjacent memory.

use std::cell::RefCell;
use std::fmt;
use std::io;
use std::rc::Rc;

pub use corosensei::stack::{Stack, StackPointer, MIN_STACK_SIZE, STACK_ALIGNMENT};

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        pub use self::unix::OsStack;
    } else if #[cfg(windows)] {
        mod windows;
        pub use self::windows::OsStack;
    } else {
        compile_error!("unsupported platform: no stack implementation available");
    }
}

/// Usable stack size used when nothing else is requested.
pub const DEFAULT_STACK_SIZE: usize = 1024 * 1024;

/// Number of guard pages placed below a stack unless configured otherwise.
pub const DEFAULT_GUARD_PAGES: usize = 1;

/// Source of stacks for new coroutines.
///
/// The allocator is owned by the coroutine for its entire lifetime so that
/// the stack can be returned to the allocator that produced it.
pub trait StackAllocator: 'static {
    /// Type of the stacks produced by this allocator.
    type Stack: Stack + 'static;

    /// Allocates a stack for a new coroutine.
    fn allocate(&self) -> io::Result<Self::Stack>;

    /// Releases a stack once the coroutine using it has finished.
    ///
    /// Nothing is live on the stack anymore when this is called.
    fn deallocate(&self, stack: Self::Stack) {
        drop(stack);
    }
}

/// Shape of the stacks produced by [`DefaultAllocator`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StackConfig {
    /// A stack of `size` usable bytes with the default guard page.
    Fixed {
        /// Usable size in bytes.
        size: usize,
    },

    /// A stack of `size` usable bytes with `guard_pages` inaccessible pages
    /// below it.
    Protected {
        /// Usable size in bytes.
        size: usize,
        /// Number of guard pages, at least one is always used.
        guard_pages: usize,
    },

    /// A stack which reserves `max` bytes of address space but only asks the
    /// OS to back the top `initial` bytes up front. Further pages are
    /// committed lazily as the stack grows.
    ///
    /// `initial` is only a hint: it is honored on Linux and Android, other
    /// platforms map the whole stack the same way as [`StackConfig::Fixed`].
    Growable {
        /// Bytes prepared up front.
        initial: usize,
        /// Maximum usable size in bytes.
        max: usize,
    },
}

impl StackConfig {
    /// A fixed stack of `size` bytes.
    pub fn fixed(size: usize) -> Self {
        StackConfig::Fixed { size }
    }

    /// A stack of `size` bytes with `guard_pages` guard pages.
    pub fn protected(size: usize, guard_pages: usize) -> Self {
        StackConfig::Protected { size, guard_pages }
    }

    /// A stack that starts with `initial` bytes and may grow up to `max`.
    pub fn growable(initial: usize, max: usize) -> Self {
        StackConfig::Growable { initial, max }
    }

    /// Maximum number of usable bytes, before rounding to whole pages.
    pub fn size(&self) -> usize {
        match *self {
            StackConfig::Fixed { size } | StackConfig::Protected { size, .. } => size,
            StackConfig::Growable { initial, max } => max.max(initial),
        }
    }

    /// Number of guard pages placed below the usable region.
    pub fn guard_pages(&self) -> usize {
        match *self {
            StackConfig::Protected { guard_pages, .. } => guard_pages.max(1),
            _ => DEFAULT_GUARD_PAGES,
        }
    }
}

impl Default for StackConfig {
    fn default() -> Self {
        StackConfig::Fixed {
            size: DEFAULT_STACK_SIZE,
        }
    }
}

/// Allocator which maps a new stack from the OS for every coroutine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DefaultAllocator {
    config: StackConfig,
}

impl DefaultAllocator {
    /// Creates an allocator producing stacks of the given shape.
    pub fn new(config: StackConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration used for new stacks.
    pub fn config(&self) -> StackConfig {
        self.config
    }
}

impl StackAllocator for DefaultAllocator {
    type Stack = OsStack;

    fn allocate(&self) -> io::Result<OsStack> {
        let stack = OsStack::new(self.config)?;
        log::debug!("allocated {:?} stack at {:#x}", self.config, stack.base());
        Ok(stack)
    }
}

/// Allocator which keeps released stacks and hands them out again.
///
/// Up to `capacity` stacks are retained; any further released stack is
/// returned to the underlying allocator. Clones share the same pool, which
/// makes it possible to use one pool for many coroutines.
pub struct PooledAllocator<A: StackAllocator = DefaultAllocator> {
    inner: Rc<Pool<A>>,
}

struct Pool<A: StackAllocator> {
    allocator: A,
    capacity: usize,
    stacks: RefCell<Vec<A::Stack>>,
}

impl PooledAllocator {
    /// Creates a pool of stacks with the given shape.
    pub fn new(config: StackConfig, capacity: usize) -> Self {
        Self::with_allocator(DefaultAllocator::new(config), capacity)
    }
}

impl<A: StackAllocator> PooledAllocator<A> {
    /// Creates a pool which obtains new stacks from `allocator`.
    pub fn with_allocator(allocator: A, capacity: usize) -> Self {
        Self {
            inner: Rc::new(Pool {
                allocator,
                capacity,
                stacks: RefCell::new(Vec::with_capacity(capacity)),
            }),
        }
    }

    /// Maximum number of stacks kept for reuse.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Number of stacks currently waiting for reuse.
    pub fn available(&self) -> usize {
        self.inner.stacks.borrow().len()
    }
}

impl<A: StackAllocator> Clone for PooledAllocator<A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<A: StackAllocator> StackAllocator for PooledAllocator<A> {
    type Stack = A::Stack;

    fn allocate(&self) -> io::Result<A::Stack> {
        if let Some(stack) = self.inner.stacks.borrow_mut().pop() {
            log::debug!("reusing pooled stack at {:#x}", stack.base());
            return Ok(stack);
        }
        self.inner.allocator.allocate()
    }

    fn deallocate(&self, stack: A::Stack) {
        let mut stacks = self.inner.stacks.borrow_mut();
        if stacks.len() < self.inner.capacity {
            stacks.push(stack);
        } else {
            drop(stacks);
            log::debug!("stack pool full, releasing stack at {:#x}", stack.base());
            self.inner.allocator.deallocate(stack);
        }
    }
}

impl<A: StackAllocator> fmt::Debug for PooledAllocator<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledAllocator")
            .field("capacity", &self.capacity())
            .field("available", &self.available())
            .finish()
    }
}

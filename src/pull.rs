//! Pull coroutines: the body produces values which the creator pulls out.

use std::fmt;
use std::iter::FusedIterator;
use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::control_block::{ControlBlock, PeerLink, State};
use crate::error::{Error, Result};
use crate::stack::{DefaultAllocator, StackAllocator};
use crate::transport::{Ref, Transport, Value, Void};

/// A coroutine whose body hands values back to its creator.
///
/// The body is started as soon as the coroutine is created and runs until it
/// first suspends, so the first value (if any) is available immediately.
/// Each call to [`advance`](Self::advance) discards the current value and
/// runs the body up to its next suspension.
///
/// How values are passed is selected by the transport `M`; the aliases
/// [`Generator`], [`RefGenerator`] and [`VoidGenerator`] cover the three
/// possibilities.
///
/// A coroutine is bound to the thread that created it:
///
/// ```compile_fail
/// use corogen::Generator;
///
/// fn assert_send<T: Send>(_: T) {}
/// assert_send(Generator::new(|yielder| yielder.suspend(1)).unwrap());
/// ```
pub struct PullCoroutine<M: Transport, A: StackAllocator = DefaultAllocator> {
    block: ControlBlock<M, A>,
}

/// Generator which moves values of type `T` out of the body.
pub type Generator<T, A = DefaultAllocator> = PullCoroutine<Value<T>, A>;

/// Generator which lends references to values living in the body.
pub type RefGenerator<T, A = DefaultAllocator> = PullCoroutine<Ref<T>, A>;

/// Generator which only transfers control, without any value.
pub type VoidGenerator<A = DefaultAllocator> = PullCoroutine<Void, A>;

impl<M: Transport> PullCoroutine<M, DefaultAllocator> {
    /// Creates a new coroutine running `f` on a stack with the default
    /// configuration.
    ///
    /// See [`with_allocator`](Self::with_allocator).
    pub fn new<F>(f: F) -> Result<Self>
    where
        F: FnOnce(&Yielder<M>) + 'static,
    {
        Self::with_allocator(DefaultAllocator::default(), f)
    }
}

impl<M: Transport, A: StackAllocator> PullCoroutine<M, A> {
    /// Creates a new coroutine running `f` on a stack obtained from
    /// `allocator`, and runs it up to its first suspension.
    ///
    /// Fails with [`Error::Allocation`] if no stack could be allocated and with
    /// [`Error::Propagated`] if the body panics before it first suspends.
    pub fn with_allocator<F>(allocator: A, f: F) -> Result<Self>
    where
        F: FnOnce(&Yielder<M>) + 'static,
    {
        let mut block = ControlBlock::create(allocator, move |peer| {
            let yielder = Yielder {
                peer,
                marker: PhantomData,
            };
            f(&yielder);
        })?;
        block.resume()?;
        Ok(Self { block })
    }

    /// Discards the current value and resumes the body until it suspends
    /// again or returns.
    ///
    /// Returns whether the body suspended with a new value, i.e. whether the
    /// coroutine is still [`valid`](Self::valid). A panic in the body is
    /// returned as [`Error::Propagated`], and resuming a finished coroutine
    /// fails with [`Error::InvalidState`].
    pub fn advance(&mut self) -> Result<bool> {
        self.block.clear();
        self.block.resume()?;
        Ok(self.block.valid())
    }

    /// Returns whether the body is suspended and can be resumed.
    pub fn valid(&self) -> bool {
        self.block.valid()
    }

    /// Returns the current state of the body.
    pub fn state(&self) -> State {
        self.block.state()
    }

    /// Shared implementation of the iterators: a value that was not taken yet
    /// is returned first, otherwise the body is resumed.
    fn next_stored(&mut self) -> Option<M::Stored> {
        if let Ok(val) = self.block.take() {
            return Some(val);
        }
        if !self.block.valid() {
            return None;
        }
        match self.advance() {
            Ok(_) => self.block.take().ok(),
            Err(Error::Propagated(err)) => err.resume_unwind(),
            Err(_) => None,
        }
    }
}

impl<T: 'static, A: StackAllocator> PullCoroutine<Value<T>, A> {
    /// Returns the value produced by the last suspension of the body, without
    /// resuming it.
    ///
    /// Fails with [`Error::NoValue`] if the value was already taken or the
    /// body has finished.
    pub fn current(&self) -> Result<&T> {
        self.block.get().map_err(|_| Error::NoValue)
    }

    /// Moves the value produced by the last suspension out of the coroutine.
    ///
    /// Fails with [`Error::NoValue`] under the same conditions as
    /// [`current`](Self::current).
    pub fn take_current(&mut self) -> Result<T> {
        self.block.take().map_err(|_| Error::NoValue)
    }
}

impl<T: ?Sized + 'static, A: StackAllocator> PullCoroutine<Ref<T>, A> {
    /// Returns the value lent by the last suspension of the body.
    ///
    /// The reference borrows the coroutine, so it can't be kept across the
    /// next call to [`advance`](Self::advance). Fails with
    /// [`Error::NoValue`] if the body has finished.
    pub fn current(&self) -> Result<&T> {
        // The referent is kept alive by the suspended body, which can't be
        // resumed while the returned borrow exists.
        self.block
            .get()
            .map(|ptr| unsafe { ptr.as_ref() })
            .map_err(|_| Error::NoValue)
    }
}

impl<T: 'static, A: StackAllocator> Iterator for PullCoroutine<Value<T>, A> {
    type Item = T;

    /// Returns the next value produced by the body.
    ///
    /// # Panics
    ///
    /// If the body panics, the panic is resumed on the caller with its
    /// original payload.
    fn next(&mut self) -> Option<T> {
        self.next_stored()
    }
}

impl<T: 'static, A: StackAllocator> FusedIterator for PullCoroutine<Value<T>, A> {}

impl<A: StackAllocator> Iterator for PullCoroutine<Void, A> {
    type Item = ();

    fn next(&mut self) -> Option<()> {
        self.next_stored()
    }
}

impl<A: StackAllocator> FusedIterator for PullCoroutine<Void, A> {}

impl<M: Transport, A: StackAllocator> fmt::Debug for PullCoroutine<M, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PullCoroutine")
            .field("block", &self.block)
            .finish()
    }
}

/// Handle passed to the body of a [`PullCoroutine`], used to hand values back
/// to the creator and suspend.
pub struct Yielder<M: Transport> {
    peer: PeerLink<M>,
    marker: PhantomData<*const ()>,
}

impl<T: 'static> Yielder<Value<T>> {
    /// Hands `val` to the creator and suspends until it asks for the next
    /// value.
    pub fn suspend(&self, val: T) {
        self.peer.put(val);
        self.peer.suspend();
    }
}

impl<T: ?Sized + 'static> Yielder<Ref<T>> {
    /// Lends `val` to the creator and suspends until it asks for the next
    /// value.
    pub fn suspend(&self, val: &T) {
        self.peer.put(NonNull::from(val));
        self.peer.suspend();
    }
}

impl Yielder<Void> {
    /// Suspends until the creator resumes the body.
    pub fn suspend(&self) {
        self.peer.put(());
        self.peer.suspend();
    }
}

impl<M: Transport> Yielder<M> {
    /// Executes some code on the stack that the coroutine was resumed from.
    ///
    /// This is useful for running code which needs more stack space than the
    /// coroutine was given. A panic in `f` propagates to the caller of this
    /// function.
    pub fn on_parent_stack<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R + Send,
    {
        self.peer.on_parent_stack(f)
    }
}

impl<M: Transport> fmt::Debug for Yielder<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Yielder").finish_non_exhaustive()
    }
}

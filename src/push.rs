//! Push coroutines: the creator pushes values into a body which consumes
//! them.

use std::fmt;
use std::iter::FusedIterator;
use std::ptr::NonNull;

use crate::control_block::{ControlBlock, PeerLink, State};
use crate::error::{Error, Result};
use crate::stack::{DefaultAllocator, StackAllocator};
use crate::trampoline::Signal;
use crate::transport::{Ref, Transport, Value, Void};

/// A coroutine whose body receives values from its creator.
///
/// Unlike a [`PullCoroutine`](crate::PullCoroutine), the body does not start
/// when the coroutine is created: it first runs when the first value is
/// pushed, and finds that value already waiting in its [`Source`]. Every
/// push then runs the body until it asks for the next value or returns.
///
/// ```
/// use corogen::{PushCoroutine, Value};
/// use std::cell::RefCell;
/// use std::rc::Rc;
///
/// let total = Rc::new(RefCell::new(0));
/// let total2 = total.clone();
/// let mut sink = PushCoroutine::<Value<i32>>::new(move |source| {
///     for val in source {
///         *total2.borrow_mut() += val;
///     }
/// })
/// .unwrap();
///
/// for i in 1..=4 {
///     sink.push(i).unwrap();
/// }
/// sink.close().unwrap();
/// assert_eq!(*total.borrow(), 10);
/// ```
pub struct PushCoroutine<M: Transport, A: StackAllocator = DefaultAllocator> {
    block: ControlBlock<M, A>,
}

impl<M: Transport> PushCoroutine<M, DefaultAllocator> {
    /// Creates a new coroutine running `f` on a stack with the default
    /// configuration.
    pub fn new<F>(f: F) -> Result<Self>
    where
        F: FnOnce(&mut Source<M>) + 'static,
    {
        Self::with_allocator(DefaultAllocator::default(), f)
    }
}

impl<M: Transport, A: StackAllocator> PushCoroutine<M, A> {
    /// Creates a new coroutine running `f` on a stack obtained from
    /// `allocator`. The body is not started.
    pub fn with_allocator<F>(allocator: A, f: F) -> Result<Self>
    where
        F: FnOnce(&mut Source<M>) + 'static,
    {
        let block = ControlBlock::create(allocator, move |peer| {
            let mut source = Source {
                peer,
                closed: false,
            };
            f(&mut source);
        })?;
        Ok(Self { block })
    }

    fn send(&mut self, val: M::Stored) -> Result<()> {
        let state = self.block.state();
        if !self.block.valid() {
            return Err(Error::InvalidState(state));
        }
        self.block.put(val);
        let result = self.block.resume();

        // The body either waits for the next value or has returned. Anything
        // it did not consume is dropped now, which also makes sure that no
        // borrowed value outlives the push.
        self.block.clear();
        result
    }

    /// Returns whether the body can accept more values.
    pub fn valid(&self) -> bool {
        self.block.valid()
    }

    /// Returns the current state of the body.
    pub fn state(&self) -> State {
        self.block.state()
    }

    /// Tells the body that no more values will be pushed and lets it run to
    /// completion.
    ///
    /// Inside the body, [`Source::advance`] returns `false` and iteration
    /// ends. A body which was never started is dropped without running. A
    /// panic raised while the body finishes is returned as
    /// [`Error::Propagated`].
    pub fn close(mut self) -> Result<()> {
        if self.block.state() != State::Suspended {
            return Ok(());
        }
        log::trace!("closing push coroutine");
        self.block.resume_with(Signal::Close)
    }
}

impl<T: 'static, A: StackAllocator> PushCoroutine<Value<T>, A> {
    /// Hands `val` to the body and runs it until it asks for the next value.
    pub fn push(&mut self, val: T) -> Result<()> {
        self.send(val)
    }
}

impl<T: ?Sized + 'static, A: StackAllocator> PushCoroutine<Ref<T>, A> {
    /// Lends `val` to the body and runs it until it asks for the next value.
    pub fn push(&mut self, val: &T) -> Result<()> {
        self.send(NonNull::from(val))
    }
}

impl<A: StackAllocator> PushCoroutine<Void, A> {
    /// Runs the body until it asks for the next value.
    pub fn push(&mut self) -> Result<()> {
        self.send(())
    }
}

impl<M: Transport, A: StackAllocator> fmt::Debug for PushCoroutine<M, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushCoroutine")
            .field("block", &self.block)
            .finish()
    }
}

/// Handle passed to the body of a [`PushCoroutine`], from which the body
/// reads the values pushed by the creator.
pub struct Source<M: Transport> {
    peer: PeerLink<M>,
    closed: bool,
}

impl<M: Transport> Source<M> {
    /// Discards the current value and suspends until the creator pushes the
    /// next one.
    ///
    /// Returns `false` once the creator has closed the coroutine, in which
    /// case no value is available and further calls return `false` without
    /// suspending.
    pub fn advance(&mut self) -> bool {
        self.peer.clear();
        if self.closed {
            return false;
        }
        match self.peer.suspend() {
            Signal::Resume => true,
            Signal::Close => {
                self.closed = true;
                false
            }
            Signal::Unwind => unreachable!(),
        }
    }

    /// Returns whether a value is waiting to be read.
    pub fn valid(&self) -> bool {
        self.peer.get().is_some()
    }

    /// Executes some code on the stack of the creator.
    ///
    /// See [`Yielder::on_parent_stack`](crate::Yielder::on_parent_stack).
    pub fn on_parent_stack<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R + Send,
    {
        self.peer.on_parent_stack(f)
    }

    fn next_stored(&mut self) -> Option<M::Stored> {
        if let Some(val) = self.peer.take() {
            return Some(val);
        }
        if self.advance() {
            self.peer.take()
        } else {
            None
        }
    }
}

impl<T: 'static> Source<Value<T>> {
    /// Returns the value most recently pushed by the creator.
    pub fn current(&self) -> Result<&T> {
        self.peer.get().ok_or(Error::NoValue)
    }

    /// Moves the value most recently pushed by the creator out of the
    /// source.
    pub fn take_current(&mut self) -> Result<T> {
        self.peer.take().ok_or(Error::NoValue)
    }
}

impl<T: ?Sized + 'static> Source<Ref<T>> {
    /// Returns the value most recently lent by the creator.
    pub fn current(&self) -> Result<&T> {
        // The creator is blocked in `push` until the body suspends, which
        // requires a mutable borrow of the source.
        self.peer
            .get()
            .map(|ptr| unsafe { ptr.as_ref() })
            .ok_or(Error::NoValue)
    }
}

impl<T: 'static> Iterator for Source<Value<T>> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.next_stored()
    }
}

impl<T: 'static> FusedIterator for Source<Value<T>> {}

impl Iterator for Source<Void> {
    type Item = ();

    fn next(&mut self) -> Option<()> {
        self.next_stored()
    }
}

impl FusedIterator for Source<Void> {}

impl<M: Transport> fmt::Debug for Source<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

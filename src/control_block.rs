//! The control block pair behind every coroutine.
//!
//! A coroutine consists of two halves sharing one stack:
//!
//! - The [`ControlBlock`] is held by the handle that created the coroutine. It
//!   owns the execution context (and through it the stack), the hand-over slot
//!   and the stack allocator. Resuming the body always goes through it.
//! - The [`PeerLink`] lives on the coroutine stack itself, in the frame of the
//!   entry function. It refers back to the control block's shared state and to
//!   the context link used to suspend, but owns neither.
//!
//! Values and failures travel through the slot in the control block: one side
//! writes it, switches, and the other side reads it. Only one side executes at
//! any time so no synchronization is needed, but the control block must never
//! be touched from more than one thread, which is why none of the handle types
//! are `Send` or `Sync`.

use std::cell::{Cell, UnsafeCell};
use std::fmt;
use std::marker::PhantomData;
use std::mem::{self, MaybeUninit};
use std::ptr::NonNull;

use corosensei::{Coroutine, CoroutineResult, Yielder as ContextLink};

use crate::error::{Error, PropagatedError, Result};
use crate::stack::StackAllocator;
use crate::trampoline::{self, CapturedClosure, Exit, Signal};
use crate::transport::{Slot, Transport};

/// Lifecycle state of a coroutine.
///
/// ```text
/// Created -> Running -> Suspended -> Running -> ... -> Completed | Failed
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum State {
    /// The body has not started executing yet.
    Created,

    /// The body is currently executing.
    Running,

    /// The body is suspended and waiting to be resumed.
    Suspended,

    /// The body returned, or was unwound after its handle was dropped.
    Completed,

    /// The body panicked.
    Failed,
}

impl State {
    /// Returns whether the coroutine has finished, either normally or by
    /// panicking. A finished coroutine can no longer be resumed.
    pub fn is_finished(self) -> bool {
        matches!(self, State::Completed | State::Failed)
    }

    fn can_resume(self) -> bool {
        matches!(self, State::Created | State::Suspended)
    }
}

/// Execution context of the coroutine body.
type Context<S> = Coroutine<Signal, (), (), S>;

/// State shared by both halves of a coroutine.
pub(crate) struct Shared<M: Transport> {
    slot: UnsafeCell<Slot<M::Stored>>,
    state: Cell<State>,
}

impl<M: Transport> Shared<M> {
    fn new() -> Self {
        Self {
            slot: UnsafeCell::new(Slot::Empty),
            state: Cell::new(State::Created),
        }
    }

    // All slot accessors rely on the fact that only one side runs at a time
    // and that a reference returned by `value` is never held by a side while
    // it switches away.

    fn put(&self, val: M::Stored) {
        unsafe { *self.slot.get() = Slot::Value(val) }
    }

    fn clear(&self) {
        unsafe { *self.slot.get() = Slot::Empty }
    }

    fn value(&self) -> Option<&M::Stored> {
        unsafe { (*self.slot.get()).value() }
    }

    fn take_value(&self) -> Option<M::Stored> {
        unsafe { (*self.slot.get()).take_value() }
    }

    fn take_error(&self) -> Option<Box<dyn std::any::Any + Send>> {
        unsafe { (*self.slot.get()).take_error() }
    }

    fn fail(&self, payload: Box<dyn std::any::Any + Send>) {
        unsafe { *self.slot.get() = Slot::Error(payload) }
        self.state.set(State::Failed);
    }
}

struct Inner<M: Transport, A: StackAllocator> {
    shared: Shared<M>,
    context: UnsafeCell<MaybeUninit<Context<A::Stack>>>,
    allocator: A,
}

/// Owning half of a coroutine.
///
/// The block is allocated on the heap so that its address stays fixed while
/// the handle that contains it is moved around: the body keeps a pointer to
/// it for as long as it runs.
pub(crate) struct ControlBlock<M: Transport, A: StackAllocator> {
    inner: NonNull<Inner<M, A>>,
    marker: PhantomData<Inner<M, A>>,
}

impl<M: Transport, A: StackAllocator> ControlBlock<M, A> {
    /// Allocates a stack and prepares `body` to run on it.
    ///
    /// The body is not started: the first call to [`ControlBlock::resume`]
    /// enters it.
    pub(crate) fn create<F>(allocator: A, body: F) -> Result<Self>
    where
        F: FnOnce(PeerLink<M>) + 'static,
    {
        let stack = allocator.allocate().map_err(|err| {
            log::debug!("coroutine stack allocation failed: {}", err);
            Error::Allocation(err)
        })?;

        // Entry function of the coroutine. This is the only frame below the
        // user's body on the coroutine stack.
        fn coroutine_entry<M: Transport, F: FnOnce(PeerLink<M>)>(
            link: &ContextLink<Signal, ()>,
            shared: NonNull<Shared<M>>,
            entry: CapturedClosure<F>,
        ) {
            let peer = PeerLink {
                link: NonNull::from(link),
                shared,
            };
            let exit = trampoline::run_body(move || entry.invoke(peer));

            let shared = unsafe { shared.as_ref() };
            match exit {
                Exit::Returned => shared.state.set(State::Completed),
                Exit::Panicked(payload) => shared.fail(payload),
            }
        }

        // The context is written below, once the address of the shared state
        // is known. Nothing reads it before that.
        let inner = Box::new(Inner {
            shared: Shared::new(),
            context: UnsafeCell::new(MaybeUninit::uninit()),
            allocator,
        });
        let inner = unsafe { NonNull::new_unchecked(Box::into_raw(inner)) };

        unsafe {
            let shared = NonNull::from(&(*inner.as_ptr()).shared);
            let entry = CapturedClosure::new(body);
            let context = Context::with_stack(
                stack,
                move |link: &ContextLink<Signal, ()>, signal: Signal| {
                    debug_assert_eq!(signal, Signal::Resume);
                    coroutine_entry::<M, F>(link, shared, entry)
                },
            );
            (*(*inner.as_ptr()).context.get()).write(context);
        }

        log::trace!("created coroutine {:p}", inner);
        Ok(Self {
            inner,
            marker: PhantomData,
        })
    }

    #[inline]
    fn inner(&self) -> &Inner<M, A> {
        unsafe { self.inner.as_ref() }
    }

    pub(crate) fn state(&self) -> State {
        self.inner().shared.state.get()
    }

    /// Returns whether the body can still be resumed.
    pub(crate) fn valid(&self) -> bool {
        self.state().can_resume()
    }

    /// Transfers control to the body until it suspends or finishes.
    pub(crate) fn resume(&mut self) -> Result<()> {
        self.resume_with(Signal::Resume)
    }

    pub(crate) fn resume_with(&mut self, signal: Signal) -> Result<()> {
        let inner = self.inner();
        let state = inner.shared.state.get();
        if !state.can_resume() {
            return Err(Error::InvalidState(state));
        }
        debug_assert!(state == State::Suspended || signal == Signal::Resume);

        log::trace!(
            "resuming coroutine {:p} ({:?}, {:?})",
            self.inner,
            state,
            signal
        );
        inner.shared.state.set(State::Running);
        let result = unsafe { (*inner.context.get()).assume_init_mut().resume(signal) };
        match result {
            CoroutineResult::Yield(()) => inner.shared.state.set(State::Suspended),
            CoroutineResult::Return(()) => debug_assert!(inner.shared.state.get().is_finished()),
        }

        match inner.shared.take_error() {
            Some(payload) => {
                log::trace!("coroutine {:p} panicked", self.inner);
                Err(Error::Propagated(PropagatedError::new(payload)))
            }
            None => Ok(()),
        }
    }

    /// Stores a value for the body to read.
    pub(crate) fn put(&mut self, val: M::Stored) {
        self.inner().shared.put(val);
    }

    /// Drops whatever value is pending.
    pub(crate) fn clear(&mut self) {
        self.inner().shared.clear();
    }

    /// Returns the value most recently handed over by the body.
    ///
    /// Fails with [`Error::InvalidState`] if the body has finished and with
    /// [`Error::NoValue`] if there is nothing pending.
    pub(crate) fn get(&self) -> Result<&M::Stored> {
        let shared = &self.inner().shared;
        match shared.state.get() {
            State::Created | State::Suspended => shared.value().ok_or(Error::NoValue),
            state => Err(Error::InvalidState(state)),
        }
    }

    /// Moves the pending value out of the slot.
    pub(crate) fn take(&mut self) -> Result<M::Stored> {
        let shared = &self.inner().shared;
        match shared.state.get() {
            State::Created | State::Suspended => shared.take_value().ok_or(Error::NoValue),
            state => Err(Error::InvalidState(state)),
        }
    }

    /// Unwinds a suspended body so that every object on its stack is dropped.
    fn abandon(&mut self) {
        debug_assert_ne!(self.state(), State::Running);
        if self.state() != State::Suspended {
            return;
        }

        log::trace!("unwinding abandoned coroutine {:p}", self.inner);
        match self.resume_with(Signal::Unwind) {
            Ok(()) => {}
            Err(err) => log::warn!("discarding failure of abandoned coroutine: {}", err),
        }

        if self.state() == State::Suspended {
            log::error!(
                "coroutine {:p} suspended again after being abandoned",
                self.inner
            );
            panic!("the forced unwind of an abandoned coroutine was caught and not rethrown");
        }
    }
}

impl<M: Transport, A: StackAllocator> Drop for ControlBlock<M, A> {
    fn drop(&mut self) {
        // The stack can't be freed while objects on it are still alive, so
        // failing to unwind it must not return normally.
        let guard = scopeguard::guard((), |()| {
            panic!("failed to unwind an abandoned coroutine");
        });
        self.abandon();
        mem::forget(guard);

        unsafe {
            let mut inner = Box::from_raw(self.inner.as_ptr());
            let mut context = inner.context.get_mut().assume_init_read();

            // A body that never started still owns its closure.
            context.force_unwind();
            let stack = context.into_stack();
            log::trace!("releasing stack of coroutine {:p}", self.inner);
            inner.allocator.deallocate(stack);
        }
    }
}

impl<M: Transport, A: StackAllocator> fmt::Debug for ControlBlock<M, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = &self.inner().shared;
        let slot = unsafe { &*shared.slot.get() };
        f.debug_struct("ControlBlock")
            .field("state", &shared.state.get())
            .field("slot", slot)
            .finish()
    }
}

/// Body half of a coroutine.
///
/// This is created by the entry function on the coroutine stack and handed to
/// the body, which wraps it in its user-facing handle.
pub(crate) struct PeerLink<M: Transport> {
    link: NonNull<ContextLink<Signal, ()>>,
    shared: NonNull<Shared<M>>,
}

impl<M: Transport> PeerLink<M> {
    #[inline]
    fn shared(&self) -> &Shared<M> {
        unsafe { self.shared.as_ref() }
    }

    /// Switches back to whoever resumed the body and returns the signal it
    /// was resumed with.
    ///
    /// If the owning handle was dropped in the meantime this never returns:
    /// the body starts unwinding instead.
    pub(crate) fn suspend(&self) -> Signal {
        let signal = unsafe { self.link.as_ref() }.suspend(());
        if signal == Signal::Unwind {
            trampoline::unwind_abandoned();
        }
        signal
    }

    /// Stores a value for the owning side to read after the next suspend.
    pub(crate) fn put(&self, val: M::Stored) {
        self.shared().put(val);
    }

    pub(crate) fn clear(&mut self) {
        self.shared().clear();
    }

    pub(crate) fn get(&self) -> Option<&M::Stored> {
        self.shared().value()
    }

    pub(crate) fn take(&mut self) -> Option<M::Stored> {
        self.shared().take_value()
    }

    /// Runs `f` on the stack of whoever last resumed the body.
    pub(crate) fn on_parent_stack<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R + Send,
    {
        unsafe { self.link.as_ref() }.on_parent_stack(f)
    }
}

impl<M: Transport> fmt::Debug for PeerLink<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerLink").finish_non_exhaustive()
    }
}

//! The code that runs at the root of every coroutine stack.
//!
//! Panics are never allowed to unwind past the root of a coroutine: the two
//! stacks are unrelated, so a panic raised by the body is caught here and
//! handed to the control block, which re-raises it as an error on the side
//! that resumed the body.
//!
//! The same mechanism is used to tear down a coroutine which is dropped while
//! it is suspended. The body is resumed with [`Signal::Unwind`] and the
//! suspend point converts it into an [`Abandoned`] panic. Unwinding runs the
//! destructors of every live object on the coroutine stack and is then caught
//! here, at which point the body is considered to have returned.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

/// Payload passed through the context switch when a suspended body is
/// resumed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Signal {
    /// Continue running the body.
    Resume,
    /// The other side will not send any more values. Only sent to push
    /// coroutines.
    Close,
    /// The owning handle was dropped: unwind the body.
    Unwind,
}

/// Panic payload used to force-unwind an abandoned coroutine. It is always
/// caught by [`run_body`] and never escapes into user-visible errors.
pub(crate) struct Abandoned;

/// How the body of a coroutine finished.
pub(crate) enum Exit {
    /// The body returned normally or was fully unwound after being abandoned.
    Returned,
    /// The body panicked with the given payload.
    Panicked(Box<dyn Any + Send>),
}

/// Owns the body of a coroutine until the trampoline calls it.
///
/// The closure is moved in once when the coroutine is created and consumed by
/// the single call made on the coroutine stack; it is never cloned.
pub(crate) struct CapturedClosure<F> {
    func: F,
}

impl<F> CapturedClosure<F> {
    #[inline]
    pub(crate) fn new(func: F) -> Self {
        Self { func }
    }

    #[inline]
    pub(crate) fn invoke<Arg, R>(self, arg: Arg) -> R
    where
        F: FnOnce(Arg) -> R,
    {
        (self.func)(arg)
    }
}

impl<F> fmt::Debug for CapturedClosure<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapturedClosure").finish_non_exhaustive()
    }
}

/// Runs `f` at the root of a coroutine stack, catching all panics.
pub(crate) fn run_body<F: FnOnce()>(f: F) -> Exit {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => Exit::Returned,
        Err(payload) if payload.is::<Abandoned>() => {
            log::trace!("coroutine body unwound after being abandoned");
            Exit::Returned
        }
        Err(payload) => Exit::Panicked(payload),
    }
}

/// Starts unwinding the current coroutine stack back to [`run_body`].
///
/// `resume_unwind` is used rather than `panic!` so that the panic hook does
/// not report the forced unwind.
#[cold]
pub(crate) fn unwind_abandoned() -> ! {
    panic::resume_unwind(Box::new(Abandoned))
}

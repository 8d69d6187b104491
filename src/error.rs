//! Errors reported by coroutine handles.

use std::any::Any;
use std::fmt;
use std::io;

use crate::control_block::State;

/// Result type used throughout this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failure returned by the operations on a coroutine handle.
///
/// This type is `Send` but not `Sync` because a panic payload is only `Send`,
/// so it cannot be converted into `Box<dyn Error + Send + Sync>`.
#[derive(Debug)]
pub enum Error {
    /// The coroutine body panicked. The panic was caught at the root of the
    /// coroutine stack and is reported by the call that resumed the body.
    Propagated(PropagatedError),

    /// The coroutine was resumed or read while in a state that does not allow
    /// it, e.g. after the body has completed.
    InvalidState(State),

    /// No value is pending: the body has not produced one since the last
    /// resume, or it has already been taken.
    NoValue,

    /// The stack for a new coroutine could not be allocated. No coroutine was
    /// created.
    Allocation(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Propagated(err) => fmt::Display::fmt(err, f),
            Error::InvalidState(state) => {
                write!(f, "coroutine cannot be used in the {:?} state", state)
            }
            Error::NoValue => f.write_str("coroutine has no pending value"),
            Error::Allocation(err) => write!(f, "failed to allocate coroutine stack: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Allocation(err) => Some(err),
            _ => None,
        }
    }
}

impl From<PropagatedError> for Error {
    fn from(err: PropagatedError) -> Self {
        Error::Propagated(err)
    }
}

/// A panic that escaped a coroutine body.
///
/// The original payload is kept as-is so that it can be inspected or re-thrown
/// with [`PropagatedError::resume_unwind`].
pub struct PropagatedError {
    payload: Box<dyn Any + Send>,
}

impl PropagatedError {
    pub(crate) fn new(payload: Box<dyn Any + Send>) -> Self {
        Self { payload }
    }

    /// Returns the panic payload.
    pub fn payload(&self) -> &(dyn Any + Send) {
        &*self.payload
    }

    /// Consumes the error and returns the panic payload.
    pub fn into_payload(self) -> Box<dyn Any + Send> {
        self.payload
    }

    /// Returns the panic message if the payload is a string, which is the case
    /// for panics raised with `panic!`.
    pub fn message(&self) -> Option<&str> {
        if let Some(s) = self.payload.downcast_ref::<&'static str>() {
            Some(s)
        } else {
            self.payload.downcast_ref::<String>().map(|s| s.as_str())
        }
    }

    /// Continues unwinding with the original payload on the current stack.
    pub fn resume_unwind(self) -> ! {
        std::panic::resume_unwind(self.payload)
    }
}

impl fmt::Debug for PropagatedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropagatedError")
            .field("message", &self.message())
            .finish()
    }
}

impl fmt::Display for PropagatedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message() {
            Some(msg) => write!(f, "coroutine panicked: {}", msg),
            None => f.write_str("coroutine panicked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxed(err: Error) -> Box<dyn std::error::Error + Send> {
        Box::new(err)
    }

    #[test]
    fn boxes_as_send_error() {
        let err = boxed(PropagatedError::new(Box::new("oops")).into());
        assert_eq!(err.to_string(), "coroutine panicked: oops");
        assert!(err.source().is_none());

        let err = boxed(Error::Allocation(io::Error::new(io::ErrorKind::OutOfMemory, "full")));
        assert!(err.source().is_some());
    }
}

//! Value transport policies.
//!
//! A coroutine pair hands values over through a single in-place slot owned by
//! the control block. What the slot stores depends on the transport:
//!
//! - [`Value<T>`] moves a `T` from one side to the other.
//! - [`Ref<T>`] passes a reference to a `T` which stays where it is (usually on
//!   the coroutine stack) while the receiving side looks at it.
//! - [`Void`] carries no data at all, only the switch itself.

use std::any::Any;
use std::convert::Infallible;
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ptr::NonNull;

mod private {
    pub trait Sealed {}
}

/// A value transport policy. See the [module documentation](self).
///
/// This trait is sealed and cannot be implemented outside of this crate.
pub trait Transport: private::Sealed + 'static {
    /// What the slot holds between a hand-over and the next read.
    type Stored;
}

/// Transport that moves values of type `T`.
pub struct Value<T>(PhantomData<fn(T) -> T>, Infallible);

/// Transport that lends references to a `T`.
pub struct Ref<T: ?Sized>(PhantomData<fn(&T) -> &T>, Infallible);

/// Transport without any data.
pub enum Void {}

impl<T: 'static> private::Sealed for Value<T> {}
impl<T: 'static> Transport for Value<T> {
    type Stored = T;
}

impl<T: ?Sized + 'static> private::Sealed for Ref<T> {}
impl<T: ?Sized + 'static> Transport for Ref<T> {
    type Stored = NonNull<T>;
}

impl private::Sealed for Void {}
impl Transport for Void {
    type Stored = ();
}

/// The single hand-over slot of a control block.
///
/// There is no queue: storing a value overwrites whatever was pending.
pub(crate) enum Slot<V> {
    Empty,
    Value(V),
    Error(Box<dyn Any + Send>),
}

impl<V> Slot<V> {
    pub(crate) fn value(&self) -> Option<&V> {
        match self {
            Slot::Value(val) => Some(val),
            _ => None,
        }
    }

    /// Moves a pending value out, leaving any captured error in place.
    pub(crate) fn take_value(&mut self) -> Option<V> {
        match mem::replace(self, Slot::Empty) {
            Slot::Value(val) => Some(val),
            other => {
                *self = other;
                None
            }
        }
    }

    /// Moves a captured error out, leaving any pending value in place.
    pub(crate) fn take_error(&mut self) -> Option<Box<dyn Any + Send>> {
        match mem::replace(self, Slot::Empty) {
            Slot::Error(payload) => Some(payload),
            other => {
                *self = other;
                None
            }
        }
    }
}

impl<V> fmt::Debug for Slot<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Empty => f.write_str("Empty"),
            Slot::Value(_) => f.write_str("Value(..)"),
            Slot::Error(_) => f.write_str("Error(..)"),
        }
    }
}

//! Stackful, symmetric, single-threaded coroutines.
//!
//! ## Overview
//!
//! A coroutine in this crate is a pair of cooperating halves sharing one
//! stack. One half stays with the code that created the coroutine, the other
//! is handed to the coroutine body. Control passes directly between the two:
//! exactly one of them runs at any time, and each value is handed over in
//! place, without a queue.
//!
//! - A [`PullCoroutine`] (a *generator*) runs a body which produces values.
//!   The body receives a [`Yielder`] and calls `suspend` to hand each value
//!   back to its creator, which pulls them out one at a time, usually by
//!   iterating.
//! - A [`PushCoroutine`] runs a body which consumes values. The creator
//!   pushes values in, and the body reads them from its [`Source`].
//!
//! The body can suspend from any depth of its call stack, not just from its
//! top-level function.
//!
//! ## Example
//!
//! ```rust
//! use corogen::Generator;
//!
//! fn main() {
//!     let fib = Generator::new(|yielder| {
//!         let (mut a, mut b) = (0u64, 1u64);
//!         loop {
//!             yielder.suspend(a);
//!             let next = a + b;
//!             a = b;
//!             b = next;
//!         }
//!     })
//!     .unwrap();
//!
//!     let first: Vec<u64> = fib.take(10).collect();
//!     assert_eq!(first, [0, 1, 1, 2, 3, 5, 8, 13, 21, 34]);
//! }
//! ```
//!
//! ## Value transport
//!
//! How values travel between the two halves is chosen with a [`Transport`]:
//!
//! - [`Value<T>`] moves values. They are never cloned, so move-only types work
//!   as expected.
//! - [`Ref<T>`] lends a reference to a value which stays where it is, usually
//!   on the stack of the side that lends it. The borrow ends when control
//!   moves on, which the API enforces through its borrows.
//! - [`Void`] transfers nothing but control.
//!
//! ```rust
//! use corogen::RefGenerator;
//!
//! let mut words = RefGenerator::<str>::new(|yielder| {
//!     let mut buf = String::new();
//!     for word in ["alpha", "beta"] {
//!         buf.clear();
//!         buf.push_str(word);
//!         yielder.suspend(&buf);
//!     }
//! })
//! .unwrap();
//!
//! assert_eq!(words.current().unwrap(), "alpha");
//! assert!(words.advance().unwrap());
//! assert_eq!(words.current().unwrap(), "beta");
//! assert!(!words.advance().unwrap());
//! ```
//!
//! ## Panic propagation
//!
//! A panic in a coroutine body never unwinds across the stack switch. It is
//! caught at the root of the coroutine stack and reported to the side which
//! resumed the body as [`Error::Propagated`], carrying the original payload.
//! The coroutine is then finished and can no longer be resumed.
//!
//! ```rust
//! use corogen::{Error, Generator, State};
//!
//! let mut gen = Generator::new(|yielder| {
//!     yielder.suspend(1);
//!     panic!("foobar");
//! })
//! .unwrap();
//!
//! match gen.advance() {
//!     Err(Error::Propagated(err)) => assert_eq!(err.message(), Some("foobar")),
//!     other => panic!("unexpected result: {:?}", other),
//! }
//! assert_eq!(gen.state(), State::Failed);
//! assert!(matches!(gen.advance(), Err(Error::InvalidState(State::Failed))));
//! ```
//!
//! When a generator is used as an [`Iterator`], a panic in the body is
//! instead resumed on the caller of `next`.
//!
//! ## Cleanup on drop
//!
//! If a coroutine is dropped while its body is suspended, the body is resumed
//! one last time and its stack is unwound using the same mechanism as panics,
//! which drops every local variable on it. Only then is the stack released.
//! A body which never started is dropped without running.
//!
//! ## Stacks
//!
//! Every coroutine owns a stack obtained from a
//! [`StackAllocator`](stack::StackAllocator). The default allocator maps a
//! 1 MiB stack with a guard page; see the [`stack`] module for other
//! configurations and for pooling stacks.
//!
//! ## Logging
//!
//! State transitions are reported through the [`log`] facade at the `trace`
//! level and stack allocation at the `debug` level. No logger is installed by
//! this crate.
//!
//! ## Cargo features
//!
//! #### `asm-unwind`
//!
//! Enables the `asm-unwind` feature of the context switch layer, which lets
//! unwinding pass directly through context switches. Requires nightly.

#![warn(missing_docs)]

mod control_block;
mod error;
mod pull;
mod push;
pub mod stack;
mod trampoline;
mod transport;

pub use crate::control_block::State;
pub use crate::error::{Error, PropagatedError, Result};
pub use crate::pull::{Generator, PullCoroutine, RefGenerator, VoidGenerator, Yielder};
pub use crate::push::{PushCoroutine, Source};
pub use crate::transport::{Ref, Transport, Value, Void};

#[cfg(test)]
mod tests;

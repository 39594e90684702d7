//! Error augmentation with captured stack traces.
//!
//! Wrap any error and it picks up the call stack it was wrapped on; chain
//! errors and every link keeps its own trace; launch background work through
//! [`culprit-tokio`] and failures come back with the stack of the launch site
//! too. Augmentation is purely additive: a wrapped error displays exactly
//! what the original displayed, and wrapping an already-wrapped error hands
//! the same error back.
//!
//! ```rust
//! use culprit::Error;
//!
//! fn load() -> Result<(), Error> {
//!     let io = std::fs::read("state.json").map_err(|e| Error::wrap(e))?;
//!     # let _ = io;
//!     Ok(())
//! }
//!
//! if let Err(err) = load() {
//!     // message unchanged, trace attached
//!     eprintln!("{}", culprit::render(&err));
//! }
//! ```
//!
//! # What's where
//!
//! | Item | Role |
//! |---|---|
//! | [`Error`] | the augmented error: message, cause, trace, parent trace |
//! | [`Error::wrap`] / [`Error::new`] / [`Error::with_cause`] | construction |
//! | [`Error::is`] / [`Error::contains`] / [`Error::root_cause`] / [`Error::downcast_ref`] | chain traversal |
//! | [`stack_trace`] / [`parent_stack_trace`] / [`render`] | diagnostics on arbitrary `dyn Error` |
//! | [`boundary`] | launcher scopes that seed parent traces |
//!
//! [`culprit-tokio`]: https://docs.rs/culprit-tokio

pub mod boundary;
mod chain;
mod error;
mod format;

pub use chain::{Chain, ChainValue, ErrorTarget};
pub use error::{BoxError, Error, Message, SharedError, parent_stack_trace, stack_trace};
pub use format::render;

pub use culprit_trace::{Location, Trace, capture, default_max_depth};

/// Builds an [`Error`] from a format string, capturing the caller's stack
/// trace.
///
/// ```rust
/// let err = culprit::format_err!("lookup failed for user {}", 42);
/// assert_eq!(err.to_string(), "lookup failed for user 42");
/// ```
#[macro_export]
macro_rules! format_err {
    ($($arg:tt)*) => {
        $crate::Error::new(::std::format!($($arg)*))
    };
}

//! The augmented error record: wrap/new/with-cause construction and
//! trace accessors.

use std::error::Error as StdError;
use std::fmt;
use std::sync::{Arc, OnceLock};

use culprit_trace::{Trace, capture, default_max_depth};

use crate::boundary;

/// Owned, sendable boxed error. What fallible APIs hand around.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Shared foreign error. Keeping a clone lets callers test chain membership
/// by identity later (see [`Error::is`] and [`Error::contains`]).
pub type SharedError = Arc<dyn StdError + Send + Sync + 'static>;

/// What a chain link says about itself: a plain text message, or an error
/// standing in for one.
///
/// Messages and causes travel the same chain, so a link built by
/// [`Error::with_cause`] may carry either; [`Error::contains`] probes both.
pub enum Message {
    Text(String),
    Shared(SharedError),
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Message::Text(text.to_owned())
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Message::Text(text)
    }
}

impl From<SharedError> for Message {
    fn from(err: SharedError) -> Self {
        Message::Shared(err)
    }
}

/// An error augmented with a captured stack trace and a causal chain.
///
/// `Error` is a cheap clonable handle onto an immutable record; clones share
/// identity (see [`Error::ptr_eq`]). Augmentation never changes the displayed
/// message: `Display` shows this error's own message when it has one and
/// otherwise falls through to the cause.
#[derive(Clone)]
pub struct Error {
    record: Arc<Record>,
}

struct Record {
    message: Option<Message>,
    cause: Option<Cause>,
    trace: Trace,
    /// Launch-site trace, written at most once: at construction when inside a
    /// launcher boundary, or by the launcher at delivery.
    parent_trace: OnceLock<Arc<Trace>>,
}

/// Next link in the causal chain.
pub(crate) enum Cause {
    /// Another augmented error.
    Traced(Error),
    /// A foreign error; terminates the chain.
    Shared(SharedError),
}

impl Error {
    /// New error with the given message and no cause. Captures the caller's
    /// stack trace.
    pub fn new(message: impl Into<String>) -> Self {
        Self::build(Some(Message::Text(message.into())), None)
    }

    /// New error caused by `cause`. Always constructs a distinct record, so
    /// repeated calls build a chain; the cause keeps its own trace.
    ///
    /// The message may itself be an error (see [`Message`]); it then speaks
    /// for this link in `Display` and is found by [`contains`](Self::contains).
    pub fn with_cause(message: impl Into<Message>, cause: impl Into<BoxError>) -> Self {
        let cause = match cause.into().downcast::<Error>() {
            Ok(traced) => Cause::Traced(*traced),
            Err(other) => Cause::Shared(Arc::from(other)),
        };
        Self::build(Some(message.into()), Some(cause))
    }

    /// [`with_cause`](Self::with_cause) for a cause the caller wants to keep
    /// a handle on.
    pub fn with_cause_shared(message: impl Into<Message>, cause: SharedError) -> Self {
        let cause = match cause.downcast_ref::<Error>() {
            Some(traced) => Cause::Traced(traced.clone()),
            None => Cause::Shared(cause),
        };
        Self::build(Some(message.into()), Some(cause))
    }

    /// Augments `err` with the caller's stack trace.
    ///
    /// Idempotent: an already-augmented error comes back as the same record,
    /// with no new trace captured. The returned error displays exactly what
    /// `err` displays.
    pub fn wrap(err: impl Into<BoxError>) -> Self {
        match err.into().downcast::<Error>() {
            Ok(traced) => *traced,
            Err(other) => Self::build(None, Some(Cause::Shared(Arc::from(other)))),
        }
    }

    /// [`wrap`](Self::wrap) for a shared foreign error. The caller's clone of
    /// the `Arc` stays valid for identity tests against the chain.
    pub fn wrap_shared(err: SharedError) -> Self {
        match err.downcast_ref::<Error>() {
            Some(traced) => traced.clone(),
            None => Self::build(None, Some(Cause::Shared(err))),
        }
    }

    /// Builds an error from a message and an externally captured trace.
    ///
    /// Launchers use this to carry panic-site traces recovered from a panic
    /// hook; everywhere else, prefer [`new`](Self::new).
    pub fn with_trace(message: impl Into<String>, trace: Trace) -> Self {
        Self::from_parts(Some(Message::Text(message.into())), None, trace)
    }

    fn build(message: Option<Message>, cause: Option<Cause>) -> Self {
        Self::from_parts(message, cause, capture(0, default_max_depth()))
    }

    fn from_parts(message: Option<Message>, cause: Option<Cause>, trace: Trace) -> Self {
        let parent_trace = OnceLock::new();
        if let Some(parent) = boundary::current() {
            let _ = parent_trace.set(parent);
        }
        Self {
            record: Arc::new(Record {
                message,
                cause,
                trace,
                parent_trace,
            }),
        }
    }

    /// The stack trace captured when this error was constructed.
    pub fn trace(&self) -> &Trace {
        &self.record.trace
    }

    /// The trace of the code that launched the task this error came from,
    /// when it was constructed (or delivered) inside a launcher boundary.
    pub fn parent_trace(&self) -> Option<&Trace> {
        self.record.parent_trace.get().map(|trace| &**trace)
    }

    /// Records the launch-site trace if none is present yet. No-op otherwise.
    /// Called by launchers at delivery; the one-time write keeps the record
    /// immutable as far as concurrent readers are concerned.
    pub fn attach_parent(&self, trace: Arc<Trace>) {
        let _ = self.record.parent_trace.set(trace);
    }

    /// True when `self` and `other` are handles onto the same record.
    pub fn ptr_eq(&self, other: &Error) -> bool {
        Arc::ptr_eq(&self.record, &other.record)
    }

    pub(crate) fn message(&self) -> Option<&Message> {
        self.record.message.as_ref()
    }

    pub(crate) fn cause(&self) -> Option<&Cause> {
        self.record.cause.as_ref()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.record.message {
            Some(Message::Text(text)) if !text.is_empty() => return f.write_str(text),
            Some(Message::Shared(err)) => {
                let rendered = err.to_string();
                if !rendered.is_empty() {
                    return f.write_str(&rendered);
                }
            }
            _ => {}
        }
        match &self.record.cause {
            Some(Cause::Traced(cause)) => fmt::Display::fmt(cause, f),
            Some(Cause::Shared(cause)) => fmt::Display::fmt(cause, f),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::format::render(self))
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match &self.record.cause {
            Some(Cause::Traced(cause)) => Some(cause),
            Some(Cause::Shared(cause)) => Some(&**cause),
            None => None,
        }
    }
}

static EMPTY_TRACE: Trace = Trace::new();

/// The trace carried by `err`, or the empty trace when `err` is not
/// augmented.
pub fn stack_trace<'a>(err: &'a (dyn StdError + 'static)) -> &'a Trace {
    err.downcast_ref::<Error>()
        .map(Error::trace)
        .unwrap_or(&EMPTY_TRACE)
}

/// The launch-site trace carried by `err`, or the empty trace when absent or
/// when `err` is not augmented.
pub fn parent_stack_trace<'a>(err: &'a (dyn StdError + 'static)) -> &'a Trace {
    err.downcast_ref::<Error>()
        .and_then(Error::parent_trace)
        .unwrap_or(&EMPTY_TRACE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[derive(Debug)]
    struct Flat;

    impl fmt::Display for Flat {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("")
        }
    }

    impl StdError for Flat {}

    #[test]
    fn wrap_is_idempotent() {
        let original = Error::new("testerr");
        let wrapped1 = Error::wrap(original.clone());
        let wrapped2 = Error::wrap(wrapped1.clone());
        let wrapped3 = Error::wrap(wrapped2.clone());
        assert!(wrapped1.ptr_eq(&original));
        assert!(wrapped2.ptr_eq(&wrapped1));
        assert!(wrapped3.ptr_eq(&wrapped1));
    }

    #[test]
    fn wrap_shared_is_idempotent_through_a_shared_handle() {
        let shared: SharedError = Arc::new(io::Error::other("io down"));
        let wrapped = Error::wrap_shared(Arc::clone(&shared));
        let rewrapped = Error::wrap_shared(Arc::new(wrapped.clone()) as SharedError);
        assert!(rewrapped.ptr_eq(&wrapped));
    }

    #[test]
    fn wrap_preserves_the_displayed_message() {
        let err = io::Error::other("testerr");
        assert_eq!(Error::wrap(err).to_string(), "testerr");
    }

    #[test]
    fn display_falls_through_empty_messages_to_the_cause() {
        let wrapped = Error::wrap(io::Error::other("root msg"));
        let above = Error::with_cause("", wrapped);
        assert_eq!(above.to_string(), "root msg");
    }

    #[test]
    fn display_uses_an_error_valued_message() {
        let marker: SharedError = Arc::new(io::Error::other("spoken for"));
        let err = Error::with_cause(Message::from(marker), Error::new("quiet cause"));
        assert_eq!(err.to_string(), "spoken for");
    }

    #[test]
    fn display_is_empty_when_nothing_in_the_chain_has_a_message() {
        assert_eq!(Error::wrap(Flat).to_string(), "");
    }

    #[test]
    fn with_cause_always_builds_a_distinct_record() {
        let base = Error::new("base");
        let once = Error::with_cause("ctx", base.clone());
        let twice = Error::with_cause("ctx", base.clone());
        assert!(!once.ptr_eq(&twice));
        assert!(!once.ptr_eq(&base));
    }

    #[test]
    fn source_exposes_the_chain_to_std() {
        let err = Error::with_cause("ctx", io::Error::other("root"));
        let source = err.source().expect("cause must be visible as source");
        assert_eq!(source.to_string(), "root");
    }

    #[test]
    fn plain_errors_have_empty_traces() {
        let err = io::Error::other("plain");
        assert!(stack_trace(&err).is_empty());
        assert!(parent_stack_trace(&err).is_empty());
    }

    #[test]
    fn attach_parent_is_write_once() {
        let err = Error::new("e");
        let first = Arc::new(Trace::from_frames(vec![culprit_trace::Location::new(
            "a.rs", 1, "launch::one",
        )]));
        let second = Arc::new(Trace::from_frames(vec![culprit_trace::Location::new(
            "b.rs", 2, "launch::two",
        )]));
        err.attach_parent(Arc::clone(&first));
        err.attach_parent(second);
        let parent = err.parent_trace().expect("parent trace must be attached");
        assert!(parent.mentions("launch::one"));
        assert!(!parent.mentions("launch::two"));
    }
}

//! Panic-safe task launching for Tokio.
//!
//! [`spawn_traced`] captures the call stack at the launch site, spawns the
//! task, and delivers its outcome through a callback, exactly once per
//! launch. Errors constructed inside the task automatically carry the
//! launch-site trace as their parent trace, and a panic never crosses the
//! spawn boundary: it is recovered, converted to a [`culprit::Error`]
//! carrying the panic-site trace, and delivered through the same callback as
//! an ordinary error.
//!
//! ```rust,no_run
//! # async fn demo() {
//! let (tx, rx) = tokio::sync::oneshot::channel();
//! culprit_tokio::spawn_traced(
//!     async {
//!         do_work().await?;
//!         Ok(())
//!     },
//!     move |result| {
//!         let _ = tx.send(result);
//!     },
//! );
//! if let Err(err) = rx.await.unwrap() {
//!     eprintln!("{}", culprit::render(&err));
//! }
//! # }
//! # async fn do_work() -> Result<(), culprit::BoxError> { Ok(()) }
//! ```

use std::any::Any;
use std::cell::RefCell;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Once};
use std::task::{Context, Poll};

use culprit::{BoxError, Error, boundary};
use culprit_trace::{Trace, capture, default_max_depth};
use tracing::warn;

static PANIC_HOOK: Once = Once::new();

thread_local! {
    /// Trace captured by the panic hook while the stack is still live, read
    /// back by the launch guard after `catch_unwind` returns.
    static PANIC_TRACE: RefCell<Option<Trace>> = const { RefCell::new(None) };
}

/// Installs the panic-site capture hook, once per process, chaining to
/// whatever hook was installed before.
fn install_panic_trace_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            PANIC_TRACE.with(|slot| {
                *slot.borrow_mut() = Some(capture(0, default_max_depth()));
            });
            previous(info);
        }));
    });
}

/// Spawns `task` onto the ambient Tokio runtime and delivers its outcome to
/// `callback`, exactly once.
///
/// The launch-site trace is captured before spawning. Inside the task, every
/// [`culprit::Error`] construction picks it up as a parent trace; at
/// delivery, a returned error is wrapped (idempotently) and gets the parent
/// trace attached if it has none yet. A panicking task is recovered and
/// delivered as an error; the panic does not propagate.
///
/// `spawn_traced` returns immediately; waiting for the outcome is the
/// caller's affair, typically via a channel captured by the callback. The
/// returned [`tokio::task::JoinHandle`] is a convenience only; delivery
/// happens through the callback.
pub fn spawn_traced<F, C>(task: F, callback: C) -> tokio::task::JoinHandle<()>
where
    F: Future<Output = Result<(), BoxError>> + Send + 'static,
    C: FnOnce(Result<(), Error>) + Send + 'static,
{
    install_panic_trace_hook();
    let launch = Arc::new(capture(0, default_max_depth()));
    let guarded = LaunchGuard {
        launch,
        inner: task,
    };
    tokio::spawn(async move {
        let result = guarded.await;
        callback(result);
    })
}

/// Wraps the task future so that every poll runs inside the launcher
/// boundary and under a panic guard.
struct LaunchGuard<F> {
    launch: Arc<Trace>,
    inner: F,
}

impl<F> Future for LaunchGuard<F>
where
    F: Future<Output = Result<(), BoxError>>,
{
    type Output = Result<(), Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // SAFETY: We're projecting through LaunchGuard to access the inner
        // future. LaunchGuard is not Unpin, but we never move out of inner.
        let this = unsafe { self.get_unchecked_mut() };
        let inner = unsafe { Pin::new_unchecked(&mut this.inner) };

        let _scope = boundary::enter(Arc::clone(&this.launch));
        match panic::catch_unwind(AssertUnwindSafe(|| inner.poll(cx))) {
            Ok(Poll::Pending) => Poll::Pending,
            Ok(Poll::Ready(Ok(()))) => Poll::Ready(Ok(())),
            Ok(Poll::Ready(Err(err))) => {
                let err = Error::wrap(err);
                err.attach_parent(Arc::clone(&this.launch));
                Poll::Ready(Err(err))
            }
            Err(payload) => Poll::Ready(Err(recovered(payload, &this.launch))),
        }
    }
}

/// Converts a recovered panic payload into a delivered error carrying the
/// panic-site trace and the launch-site parent trace.
fn recovered(payload: Box<dyn Any + Send + 'static>, launch: &Arc<Trace>) -> Error {
    let panic_site = PANIC_TRACE
        .with(|slot| slot.borrow_mut().take())
        .unwrap_or_else(|| capture(0, default_max_depth()));

    let err = match payload.downcast::<Error>() {
        Ok(err) => *err,
        Err(payload) => Error::with_trace(panic_message(&*payload), panic_site),
    };
    err.attach_parent(Arc::clone(launch));
    warn!(%err, "recovered panic in spawned task");
    err
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&'static str>() {
        (*text).to_owned()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "task panicked with a non-string payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use culprit_trace::Location;

    fn launch_site() -> Arc<Trace> {
        Arc::new(Trace::from_frames(vec![Location::new(
            "go.rs",
            3,
            "launcher::site",
        )]))
    }

    #[test]
    fn panic_messages_keep_their_text() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*payload), "boom");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned boom"));
        assert_eq!(panic_message(&*payload), "owned boom");

        let payload: Box<dyn Any + Send> = Box::new(42_u32);
        assert_eq!(
            panic_message(&*payload),
            "task panicked with a non-string payload"
        );
    }

    #[test]
    fn recovered_reuses_a_pretraced_payload() {
        let seed = Error::new("seeded");
        let err = recovered(Box::new(seed.clone()), &launch_site());
        assert!(err.ptr_eq(&seed));
        assert!(
            err.parent_trace()
                .expect("parent trace must be attached")
                .mentions("launcher::site")
        );
    }

    #[test]
    fn recovered_builds_an_error_from_a_plain_payload() {
        let err = recovered(Box::new("kaboom"), &launch_site());
        assert_eq!(err.to_string(), "kaboom");
        assert!(
            err.parent_trace()
                .expect("parent trace must be attached")
                .mentions("launcher::site")
        );
    }
}

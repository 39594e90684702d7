//! Launcher boundary scopes.
//!
//! A launcher captures the call stack at the launch site and enters a scope
//! around the spawned work; every [`Error`](crate::Error) constructed while
//! the scope is active picks the launch trace up as its parent trace.
//!
//! Scopes nest and live on a thread-local stack, so a launcher driving a
//! future must re-enter the scope around every poll: worker threads change,
//! the scope follows the poll. The guard is not `Send` and scopes must be
//! dropped in reverse entry order, which the RAII guard enforces for any
//! straight-line use.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::Arc;

use culprit_trace::Trace;

thread_local! {
    static PARENT_SCOPES: RefCell<Vec<Arc<Trace>>> = const { RefCell::new(Vec::new()) };
}

/// RAII guard for an active boundary scope; leaving the scope is dropping it.
pub struct ParentScope {
    _not_send: PhantomData<*const ()>,
}

/// Makes `trace` the ambient parent trace for errors constructed on this
/// thread until the returned guard drops.
pub fn enter(trace: Arc<Trace>) -> ParentScope {
    PARENT_SCOPES.with(|scopes| scopes.borrow_mut().push(trace));
    ParentScope {
        _not_send: PhantomData,
    }
}

impl Drop for ParentScope {
    fn drop(&mut self) {
        PARENT_SCOPES.with(|scopes| {
            scopes.borrow_mut().pop();
        });
    }
}

/// The innermost active scope's trace, if any.
pub(crate) fn current() -> Option<Arc<Trace>> {
    PARENT_SCOPES.with(|scopes| scopes.borrow().last().cloned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use culprit_trace::Location;

    fn launch_trace(name: &str) -> Arc<Trace> {
        Arc::new(Trace::from_frames(vec![Location::new("go.rs", 1, name)]))
    }

    #[test]
    fn errors_inside_a_scope_carry_the_parent_trace() {
        let scope = enter(launch_trace("launcher::alpha"));
        let err = Error::new("inside");
        drop(scope);

        let parent = err.parent_trace().expect("parent trace must be seeded");
        assert!(parent.mentions("launcher::alpha"));
    }

    #[test]
    fn errors_outside_any_scope_have_no_parent_trace() {
        let err = Error::new("outside");
        assert!(err.parent_trace().is_none());
    }

    #[test]
    fn scopes_nest_innermost_wins() {
        let _outer = enter(launch_trace("launcher::outer"));
        {
            let _inner = enter(launch_trace("launcher::inner"));
            let err = Error::new("nested");
            let parent = err.parent_trace().expect("parent trace must be seeded");
            assert!(parent.mentions("launcher::inner"));
        }
        let err = Error::new("after inner");
        let parent = err.parent_trace().expect("parent trace must be seeded");
        assert!(parent.mentions("launcher::outer"));
    }
}

//! Streaming stack capture with frame filtering.

use std::sync::OnceLock;

use crate::{Location, Trace};

/// Depth bound used when callers do not supply one.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Environment variable overriding [`DEFAULT_MAX_DEPTH`] process-wide.
const DEPTH_ENV: &str = "CULPRIT_TRACE_DEPTH";

/// Symbol-name prefixes that never appear in captured traces: this library's
/// own crates, the `backtrace` walker, and the runtime machinery that sits
/// between caller frames (panic plumbing, scheduler, closure dispatch).
const INTERNAL_PREFIXES: &[&str] = &[
    "culprit::",
    "culprit_trace::",
    "culprit_tokio::",
    "backtrace::",
    "std::backtrace",
    "std::panicking::",
    "std::panic::",
    "core::panicking::",
    "std::rt::",
    "std::sys::",
    "std::thread::",
    "core::ops::function::",
    "core::future::",
    "tokio::runtime::",
    "rust_begin_unwind",
    "__rust",
    "___rust",
];

/// The process-wide default capture depth: [`DEFAULT_MAX_DEPTH`] unless the
/// `CULPRIT_TRACE_DEPTH` environment variable holds a positive integer. Read
/// once, on first use.
pub fn default_max_depth() -> usize {
    static DEPTH: OnceLock<usize> = OnceLock::new();
    *DEPTH.get_or_init(|| {
        std::env::var(DEPTH_ENV)
            .ok()
            .and_then(|raw| raw.parse::<usize>().ok())
            .filter(|&depth| depth > 0)
            .unwrap_or(DEFAULT_MAX_DEPTH)
    })
}

/// Walks the current call stack and records up to `max_depth` caller-visible
/// frames, innermost first.
///
/// `skip` discards that many caller-visible frames before recording, so a
/// wrapper that captures on behalf of its caller can hide itself. Frames
/// belonging to this library or to the walker itself never count and never
/// appear; frames with no file or line information are dropped the same way.
///
/// `max_depth == 0` returns the empty trace without walking the stack.
pub fn capture(skip: usize, max_depth: usize) -> Trace {
    if max_depth == 0 {
        return Trace::new();
    }

    let mut remaining_skip = skip;
    let mut frames: Vec<Location> = Vec::new();

    backtrace::trace(|frame| {
        backtrace::resolve_frame(frame, |symbol| {
            if frames.len() >= max_depth {
                return;
            }
            let Some(location) = location_of(symbol) else {
                return;
            };
            if is_internal(location.function()) {
                return;
            }
            if remaining_skip > 0 {
                remaining_skip -= 1;
                return;
            }
            frames.push(location);
        });
        frames.len() < max_depth
    });

    Trace::from_frames(frames)
}

/// A symbol is recordable only with both a file and a nonzero line.
fn location_of(symbol: &backtrace::Symbol) -> Option<Location> {
    let file = symbol.filename()?.to_string_lossy().into_owned();
    let line = symbol.lineno()?;
    if file.is_empty() || line == 0 {
        return None;
    }
    let function = symbol
        .name()
        .map(|name| name.to_string())
        .unwrap_or_default();
    Some(Location::new(file, line, function))
}

fn is_internal(function: &str) -> bool {
    // Trait-impl symbols render as `<culprit::Error as ...>::fmt`.
    let name = function.strip_prefix('<').unwrap_or(function);
    INTERNAL_PREFIXES
        .iter()
        .any(|prefix| name.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_depth_skips_the_walk() {
        assert!(capture(0, 0).is_empty());
    }

    #[test]
    fn depth_bound_is_respected() {
        let trace = capture(0, 2);
        assert!(trace.len() <= 2);
    }

    #[test]
    fn default_depth_is_positive() {
        assert!(default_max_depth() > 0);
    }

    #[test]
    fn internal_prefixes_cover_trait_impl_symbols() {
        assert!(is_internal("culprit::error::Error::wrap"));
        assert!(is_internal("<culprit::error::Error as core::fmt::Debug>::fmt"));
        assert!(is_internal("backtrace::backtrace::trace"));
        assert!(!is_internal("culprit_app::handler"));
        assert!(!is_internal("my_service::run"));
    }
}

//! Human-readable rendering of an error chain with its traces.

use std::error::Error as StdError;
use std::fmt::Write;

use crate::error::Error;

/// Renders `err` with every link of its chain: the displayed message, the
/// trace captured where the link was constructed, and the launch-site trace
/// when the link has one. Links that are not augmented render their message
/// only.
pub fn render(err: &(dyn StdError + 'static)) -> String {
    let mut out = String::new();
    let mut current = Some(err);
    let mut first = true;

    while let Some(node) = current {
        let header = if first { "error" } else { "caused by" };
        first = false;
        let _ = writeln!(out, "{header}: {node}");

        if let Some(traced) = node.downcast_ref::<Error>() {
            let _ = write!(out, "{}", traced.trace());
            if let Some(parent) = traced.parent_trace() {
                let _ = writeln!(out, "task launched from:");
                let _ = write!(out, "{parent}");
            }
        }

        current = node.source();
    }

    out
}

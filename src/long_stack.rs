//! Long asynchronous stack-trace capture (§4.1, §6, §9).
//!
//! Each promise optionally back-links to the promise that produced it.
//! `render` walks that chain lazily, on first read of [`Promise::stack`],
//! up to `max_long_stack_depth` links, formatting up to
//! `long_stack_render_frames` of them.

use std::panic::Location;

use crate::promise::Promise;

/// One frame of a captured long stack: where a promise was created, plus
/// a (lazy) link to the promise it was created from.
pub(crate) struct StackHolder {
    pub location: &'static Location<'static>,
    pub prev: Option<Promise>,
}

impl StackHolder {
    #[track_caller]
    pub(crate) fn capture(prev: Option<Promise>) -> Self {
        StackHolder {
            location: Location::caller(),
            prev,
        }
    }
}

/// Render the long stack starting at `holder`, walking `prev` links up to
/// `max_depth`, formatting the first `max_frames` of them.
pub(crate) fn render(holder: &StackHolder, max_depth: usize, max_frames: usize) -> String {
    let mut frames = Vec::new();
    frames.push(holder.location.to_string());

    let mut current = holder.prev.clone();
    let mut depth = 1;
    while let Some(promise) = current {
        if depth >= max_depth {
            break;
        }
        match promise.stack_holder_location() {
            Some(loc) => frames.push(loc),
            None => break,
        }
        current = promise.stack_holder_prev();
        depth += 1;
    }

    frames.truncate(max_frames);
    frames.join("\nFrom previous: ")
}

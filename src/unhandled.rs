//! Global unhandled-rejection tracking (§4.6).
//!
//! A promise is tracked the moment it rejects; whether it's actually
//! reported depends on `Promise::is_handled`, checked lazily when the
//! tracker flushes at the end of the physical tick in which it settled.
//! `is_handled` itself is kept current by `promise.rs`'s "currently
//! rejecting" scratch list, which can flip a promise back to unhandled if
//! its rejection handler turns out to have re-thrown the identical reason.

use std::cell::RefCell;
use std::collections::HashSet;

use crate::microtask;
use crate::promise::Promise;
use crate::value::Value;

thread_local! {
    static PENDING: RefCell<Vec<(Promise, crate::zone::Zone)>> = RefCell::new(Vec::new());
    static SEEN_REASONS: RefCell<HashSet<usize>> = RefCell::new(HashSet::new());
}

/// Register `promise` (already transitioned to Rejected) with the
/// tracker, deduping by reason identity so a root cause that bubbles
/// through several derived promises is only reported once.
///
/// The promise's zone is pinned until [`flush`] decides its fate: without
/// this, a zone whose only remaining work was this rejection could
/// finalize (and run its `on_finalize` hook, e.g. `Zone::follow`'s) before
/// the tick-end check ever runs `report_unhandled` on it.
pub(crate) fn track(promise: Promise, reason: &Value) {
    if !first_time_seeing(reason) {
        return;
    }
    if let Some((_, zone)) = promise.rejection_snapshot() {
        zone.pin();
        PENDING.with(|p| p.borrow_mut().push((promise, zone)));
    }
    microtask::add_tick_finalizer(flush);
}

fn first_time_seeing(reason: &Value) -> bool {
    match reason.identity() {
        Some(id) => SEEN_REASONS.with(|s| s.borrow_mut().insert(id)),
        None => true,
    }
}

/// Move the pending list aside and report every promise still unhandled.
/// Run as a tick finalizer, i.e. after the microtask queue has fully
/// drained for this physical tick.
fn flush() {
    let pending = PENDING.with(|p| std::mem::take(&mut *p.borrow_mut()));
    for (promise, zone) in pending {
        if !promise.is_handled() {
            if let Some((reason, _)) = promise.rejection_snapshot() {
                zone.report_unhandled(&reason, Some(&promise));
            }
        }
        zone.unpin();
    }
}

#[cfg(test)]
pub(crate) fn reset_for_test() {
    PENDING.with(|p| p.borrow_mut().clear());
    SEEN_REASONS.with(|s| s.borrow_mut().clear());
}

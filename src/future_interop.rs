//! Bridging native `Future`s into the zone system — the Rust analogue of
//! patching the host's `Promise.prototype` so continuations scheduled off
//! *any* promise inherit the zone active when it was created (§4.7).
//!
//! There is no host promise prototype to patch here; instead, any future
//! that should carry a zone across its own internal scheduling boundaries
//! (an executor's poll calls) is wrapped in [`Zoned`], which re-enters the
//! captured zone for the duration of every `poll`.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::zone::Zone;

/// A future that re-enters its captured zone for the duration of every
/// `poll`, so a zone started before an `.await` is still active inside
/// the polled future's own body, and so a rejection surfacing during
/// polling reports through that zone's unhandled-rejection hook.
pub struct Zoned<F> {
    inner: Pin<Box<F>>,
    zone: Zone,
}

impl<F: Future> Zoned<F> {
    pub fn new(inner: F, zone: Zone) -> Self {
        Zoned {
            inner: Box::pin(inner),
            zone,
        }
    }
}

impl<F: Future> Future for Zoned<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        this.zone.pin();
        let result = Zone::use_psd(this.zone.clone(), || this.inner.as_mut().poll(cx));
        this.zone.unpin();
        result
    }
}

/// Adapter trait: `future.zoned()` captures the currently active zone and
/// wraps the future so it stays active across the future's own polls.
pub trait ZonedFutureExt: Future + Sized + 'static {
    fn zoned(self) -> Zoned<Self> {
        Zoned::new(self, Zone::active())
    }
}

impl<F: Future + 'static> ZonedFutureExt for F {}

impl Zone {
    /// Wrap `fut` so it polls inside this zone rather than whatever zone
    /// happens to be active at each individual `poll` call site.
    pub fn wrap_future<F: Future + 'static>(&self, fut: F) -> Zoned<F> {
        Zoned::new(fut, self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn zoned_future_restores_captured_zone_across_polls() {
        use std::task::{RawWaker, RawWakerVTable, Waker};

        fn noop_raw_waker() -> RawWaker {
            fn clone(_: *const ()) -> RawWaker {
                noop_raw_waker()
            }
            fn noop(_: *const ()) {}
            static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, noop, noop, noop);
            RawWaker::new(std::ptr::null(), &VTABLE)
        }

        struct ObserveZone {
            seen: std::rc::Rc<std::cell::RefCell<Option<Value>>>,
        }

        impl Future for ObserveZone {
            type Output = ();
            fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
                *self.seen.borrow_mut() = Zone::active().get_prop("marker");
                Poll::Ready(())
            }
        }

        let seen = std::rc::Rc::new(std::cell::RefCell::new(None));
        let fut = Zone::new_scope(vec![("marker".into(), Value::Number(7.0))], || {
            let inner = ObserveZone { seen: seen.clone() };
            inner.zoned()
        });

        let waker = unsafe { Waker::from_raw(noop_raw_waker()) };
        let mut cx = Context::from_waker(&waker);
        let mut fut = Box::pin(fut);
        assert!(fut.as_mut().poll(&mut cx).is_ready());
        assert!(matches!(*seen.borrow(), Some(Value::Number(n)) if n == 7.0));
    }
}

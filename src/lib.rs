//! A Promise/A+-compliant promise engine with an emulated microtask
//! scheduler, zoned async-context propagation, optional long asynchronous
//! stack traces, and unhandled-rejection detection.
//!
//! The engine is single-threaded and cooperative: there is no internal
//! thread pool or work-stealing queue, only a virtual microtask queue that
//! drains on top of whatever "physical tick" primitive the host schedules.
//! By default nothing schedules one — the embedder drives the queue by
//! calling [`pump`] (see [`PhysicalTick`]).

mod engine;
mod error;
mod future_interop;
mod long_stack;
mod microtask;
mod promise;
mod unhandled;
mod value;
mod zone;

pub use engine::{
    EngineConfig, EngineConfigBuilder, RejectionMapper, UnhandledHook, config, set_config,
    set_rejection_mapper, set_unhandled_rejection_hook,
};
pub use error::{Error, Result};
pub use future_interop::{Zoned, ZonedFutureExt};
pub use microtask::{ManualTick, PhysicalTick, drain_physical_tick as pump, scheduler, set_scheduler};
pub use promise::{Handler, Promise, RejectFn, ResolveFn, h};
pub use value::{Thenable, Value};
pub use zone::{HookOutcome, Zone};

/// Run `f` inside the zone active when `wrap` was called, flushing the
/// microtask queue afterward if this call wasn't already nested inside one
/// — the Rust analogue of wrapping a host callback so it behaves like a
/// promise reaction even when invoked from outside the engine entirely
/// (§6's wrapping helper).
pub fn wrap<F, R>(f: F, error_catcher: Option<std::rc::Rc<dyn Fn(Value)>>) -> impl Fn() -> Option<R>
where
    F: Fn() -> std::result::Result<R, Value> + 'static,
{
    let zone = Zone::active();
    move || {
        let result = Zone::use_psd(zone.clone(), || f());
        let outcome = match result {
            Ok(v) => Some(v),
            Err(e) => {
                if let Some(catcher) = &error_catcher {
                    catcher(e);
                }
                None
            }
        };
        if !microtask::is_inside_micro_tick() {
            microtask::flush_now();
        }
        outcome
    }
}

#[cfg(test)]
pub(crate) fn reset_for_test() {
    microtask::reset_for_test();
    engine::reset_for_test();
    unhandled::reset_for_test();
}

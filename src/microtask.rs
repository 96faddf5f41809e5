//! The emulated microtask queue and its physical-tick bootstrap.
//!
//! All state here is thread-local rather than a global `Mutex`: the engine
//! is explicitly single-threaded cooperative (§5), so a `RefCell`-guarded
//! thread-local is the correct weight — the same choice the host crate
//! makes for its own `EventLoop` (`Rc<RefCell<..>>`, no atomics).

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use tracing::trace;

/// A one-shot callback, boxed to erase its concrete closure type.
type Task = Box<dyn FnOnce()>;

/// Bridges the host's one-shot scheduling primitive to a virtual-tick
/// drain (§4.4). Implementors decide *when* `drain_one_physical_tick` is
/// invoked; the engine only promises to call `schedule` at most once per
/// physical tick.
///
/// Crucially, a reaction must never run in the same synchronous turn as
/// the code that triggered the settlement that scheduled it (Promise/A+'s
/// asynchrony guarantee) — so `schedule` must not call `cb` itself from
/// inside the caller's stack frame. Wiring `cb` to a real host primitive
/// (an event-loop's "run soon" queue, `tokio::task::spawn_local`, a GUI
/// toolkit's idle callback) gives genuine deferral; the default
/// [`ManualTick`] defers by simply not calling `cb` until the embedder
/// next calls [`drain_physical_tick`] (re-exported as `pump`).
pub trait PhysicalTick {
    /// Arrange for `cb` to run "later" — on whatever the host considers
    /// its own one-shot scheduling primitive.
    fn schedule(&self, cb: Task);
}

/// The default bootstrap for an embedder with no event loop of its own:
/// queued microtasks simply accumulate until the embedder calls
/// [`drain_physical_tick`]. `cb` is always `drain_physical_tick` itself,
/// so dropping it here is safe — the queue it would have drained is the
/// same one `pump` drains directly.
#[derive(Debug, Default, Clone, Copy)]
pub struct ManualTick;

impl PhysicalTick for ManualTick {
    fn schedule(&self, _cb: Task) {}
}

struct SchedulerState {
    microtasks: RefCell<VecDeque<Task>>,
    tick_finalizers: RefCell<Vec<Task>>,
    outside_micro_tick: Cell<bool>,
    needs_new_physical_tick: Cell<bool>,
    scheduler: RefCell<Rc<dyn PhysicalTick>>,
    scheduled_calls: Cell<u64>,
}

impl SchedulerState {
    fn new() -> Self {
        Self {
            microtasks: RefCell::new(VecDeque::new()),
            tick_finalizers: RefCell::new(Vec::new()),
            outside_micro_tick: Cell::new(true),
            needs_new_physical_tick: Cell::new(true),
            scheduler: RefCell::new(Rc::new(ManualTick)),
            scheduled_calls: Cell::new(0),
        }
    }
}

thread_local! {
    static STATE: SchedulerState = SchedulerState::new();
}

/// Install a new physical-tick bootstrap, replacing [`ManualTick`].
pub fn set_scheduler(scheduler: Rc<dyn PhysicalTick>) {
    STATE.with(|s| *s.scheduler.borrow_mut() = scheduler);
}

/// The currently installed physical-tick bootstrap.
pub fn scheduler() -> Rc<dyn PhysicalTick> {
    STATE.with(|s| s.scheduler.borrow().clone())
}

/// Enqueue a microtask (§4.4's `asap`). If no physical tick has been
/// scheduled since the queue last drained, the installed [`PhysicalTick`]
/// is invoked.
pub fn asap<F: FnOnce() + 'static>(callback: F) {
    STATE.with(|s| {
        s.microtasks.borrow_mut().push_back(Box::new(callback));
        if s.needs_new_physical_tick.get() {
            s.needs_new_physical_tick.set(false);
            let sched = s.scheduler.borrow().clone();
            sched.schedule(Box::new(drain_physical_tick));
        }
    });
}

/// Register a closure to run once the current physical tick's microtask
/// queue has fully drained (used by the unhandled-rejection tracker).
pub fn add_tick_finalizer<F: FnOnce() + 'static>(finalizer: F) {
    STATE.with(|s| s.tick_finalizers.borrow_mut().push(Box::new(finalizer)));
}

/// True while a virtual-tick drain loop is on the stack.
pub fn is_inside_micro_tick() -> bool {
    STATE.with(|s| !s.outside_micro_tick.get())
}

pub(crate) fn note_scheduled_call() {
    STATE.with(|s| s.scheduled_calls.set(s.scheduled_calls.get() + 1));
}

pub(crate) fn note_scheduled_call_complete() {
    STATE.with(|s| s.scheduled_calls.set(s.scheduled_calls.get().saturating_sub(1)));
}

/// Run one physical tick: drain the microtask queue to empty, run tick
/// finalizers, then repeat if either drained a new round of work (a
/// finalizer — e.g. the unhandled-rejection tracker settling a `follow`
/// promise — may itself enqueue reactions that need their own drain).
///
/// An embedder supplying its own [`PhysicalTick`] calls this from whatever
/// callback its host primitive eventually invokes; with the default
/// [`ManualTick`], the embedder (or [`flush_now`]) calls it directly.
pub fn drain_physical_tick() {
    loop {
        crate::engine::reset_tick_budget();
        STATE.with(|s| {
            s.outside_micro_tick.set(false);
            s.needs_new_physical_tick.set(false);
        });

        loop {
            let next = STATE.with(|s| s.microtasks.borrow_mut().pop_front());
            match next {
                Some(task) => {
                    trace!("draining microtask");
                    task();
                }
                None => break,
            }
        }

        STATE.with(|s| {
            s.outside_micro_tick.set(true);
            s.needs_new_physical_tick.set(true);
        });

        run_tick_finalizers();

        let more_pending = STATE.with(|s| {
            !s.microtasks.borrow().is_empty() || !s.tick_finalizers.borrow().is_empty()
        });
        if !more_pending {
            break;
        }
    }
}

fn run_tick_finalizers() {
    let finalizers = STATE.with(|s| std::mem::take(&mut *s.tick_finalizers.borrow_mut()));
    for finalizer in finalizers {
        finalizer();
    }
}

/// Synchronously opens a virtual-tick scope (if not already inside one)
/// and drains to empty. Used by [`crate::wrap`] and by anything that owns
/// its own notion of "end of the current synchronous turn".
pub fn flush_now() {
    if is_inside_micro_tick() {
        // Already draining: our caller is itself a microtask, so the
        // enclosing `drain_physical_tick` loop will pick up anything we
        // enqueue without us recursing into it.
        return;
    }
    drain_physical_tick();
}

#[cfg(test)]
pub(crate) fn reset_for_test() {
    STATE.with(|s| {
        s.microtasks.borrow_mut().clear();
        s.tick_finalizers.borrow_mut().clear();
        s.outside_micro_tick.set(true);
        s.needs_new_physical_tick.set(true);
        s.scheduled_calls.set(0);
        *s.scheduler.borrow_mut() = Rc::new(ManualTick);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;

    #[test]
    fn asap_defers_until_the_physical_tick_is_drained() {
        reset_for_test();
        let order = Rc::new(StdRefCell::new(Vec::new()));

        let o1 = order.clone();
        asap(move || o1.borrow_mut().push(1));
        assert!(order.borrow().is_empty(), "must not run synchronously");

        drain_physical_tick();
        assert_eq!(*order.borrow(), vec![1]);
    }

    #[test]
    fn drains_nested_enqueues_in_one_physical_tick() {
        reset_for_test();
        let order = Rc::new(StdRefCell::new(Vec::new()));

        let o1 = order.clone();
        asap(move || {
            o1.borrow_mut().push(1);
            let o2 = o1.clone();
            asap(move || o2.borrow_mut().push(2));
        });
        drain_physical_tick();

        assert_eq!(*order.borrow(), vec![1, 2]);
    }

    #[test]
    fn tick_finalizers_run_after_queue_drains() {
        reset_for_test();
        let order: Rc<StdRefCell<Vec<&'static str>>> = Rc::new(StdRefCell::new(Vec::new()));

        let o1 = order.clone();
        add_tick_finalizer(move || o1.borrow_mut().push("finalized"));
        let o2 = order.clone();
        asap(move || o2.borrow_mut().push("microtask"));
        drain_physical_tick();

        assert_eq!(*order.borrow(), vec!["microtask", "finalized"]);
    }
}

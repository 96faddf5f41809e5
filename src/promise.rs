//! The promise state machine and Promise/A+ resolution procedure
//! (§2, §4.1–§4.3).

use std::cell::RefCell;
use std::rc::Rc;

use crate::engine;
use crate::long_stack::{self, StackHolder};
use crate::microtask;
use crate::unhandled;
use crate::value::Value;
use crate::zone::Zone;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Pending,
    Fulfilled,
    Rejected,
}

/// A handler passed to [`Promise::then`] and friends: takes the settled
/// value and produces either the downstream's fulfillment value or its
/// rejection reason.
pub type Handler = Rc<dyn Fn(Value) -> std::result::Result<Value, Value>>;

/// Wrap a plain closure as a [`Handler`].
pub fn h<F>(f: F) -> Handler
where
    F: Fn(Value) -> std::result::Result<Value, Value> + 'static,
{
    Rc::new(f)
}

thread_local! {
    /// Reasons currently in the middle of a `reject` call on this thread
    /// (§4.1 reject bullet 1, §4.6). Cleared right before a rejection
    /// handler runs; if the handler re-throws the identical reason, its
    /// `do_reject` call pushes that reason's identity back on, which is
    /// how the dispatcher tells "truly handled" apart from "passed the
    /// same error along unchanged".
    static CURRENTLY_REJECTING: RefCell<Vec<usize>> = RefCell::new(Vec::new());
}

fn mark_rejecting(reason: &Value) {
    if let Some(id) = reason.identity() {
        CURRENTLY_REJECTING.with(|c| c.borrow_mut().push(id));
    }
}

fn clear_rejecting() {
    CURRENTLY_REJECTING.with(|c| c.borrow_mut().clear());
}

fn is_still_rejecting(id: usize) -> bool {
    CURRENTLY_REJECTING.with(|c| c.borrow().contains(&id))
}

struct Listener {
    on_fulfilled: Option<Handler>,
    on_rejected: Option<Handler>,
    downstream: Promise,
    captured_zone: Zone,
}

struct PromiseInner {
    state: State,
    value: Option<Value>,
    listeners: Vec<Listener>,
    zone: Zone,
    /// Set once this promise has had a reaction registered on it, via
    /// `then`/`catch`/`finally`/adoption — regardless of which handler
    /// branch was actually present (the host crate's own
    /// `add_promise_reactions` sets `handled` the same unconditional way).
    handled: bool,
    /// Opt-in marker (§3's `lib_flag`): when set, `resolve`/`reject` on
    /// this promise opens a virtual-tick scope around listener enqueueing
    /// and drains the microtask queue before returning, letting a caller
    /// that settles from a known-quiescent stack observe continuations
    /// synchronously without breaking A+ ordering for anyone else. Off by
    /// default — nothing sets it unless [`Promise::set_lib_flag`] is
    /// called.
    lib_flag: bool,
    stack: Option<StackHolder>,
    cached_stack_render: RefCell<Option<Rc<str>>>,
}

/// A single eventual value, fulfilled or rejected exactly once (§2).
///
/// Cloning a `Promise` clones the handle; all clones observe the same
/// state, listeners, and zone.
#[derive(Clone)]
pub struct Promise(Rc<RefCell<PromiseInner>>);

impl PartialEq for Promise {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for Promise {}

/// Resolves the promise it was paired with by [`Promise::deferred`].
#[derive(Clone)]
pub struct ResolveFn(Rc<dyn Fn(Value)>);

impl ResolveFn {
    pub fn resolve(&self, value: Value) {
        (self.0)(value);
    }
}

/// Rejects the promise it was paired with by [`Promise::deferred`].
#[derive(Clone)]
pub struct RejectFn(Rc<dyn Fn(Value)>);

impl RejectFn {
    pub fn reject(&self, reason: Value) {
        (self.0)(reason);
    }
}

impl Promise {
    fn new_pending(zone: Zone) -> Self {
        zone.pin();
        Promise(Rc::new(RefCell::new(PromiseInner {
            state: State::Pending,
            value: None,
            listeners: Vec::new(),
            zone,
            handled: false,
            lib_flag: false,
            stack: None,
            cached_stack_render: RefCell::new(None),
        })))
    }

    #[track_caller]
    fn link_stack(&self, prev: Promise) {
        self.0.borrow_mut().stack = Some(StackHolder::capture(Some(prev)));
    }

    /// Opt this promise into synchronous settlement (§3, §4.1's `lib_flag`):
    /// once set, a later `resolve`/`reject` on it drains the microtask
    /// queue before returning, rather than merely enqueueing reactions.
    /// Meant for a caller that knows its own stack is already quiescent
    /// (e.g. a top-level host callback) and wants to observe continuations
    /// synchronously; does not affect any other promise's ordering.
    pub fn set_lib_flag(&self) {
        self.0.borrow_mut().lib_flag = true;
    }

    /// Create a pending promise together with functions that settle it.
    /// The Rust analogue of `new Promise((resolve, reject) => ...)` without
    /// forcing callers to write the executor as a single closure.
    #[track_caller]
    pub fn deferred() -> (Promise, ResolveFn, RejectFn) {
        let promise = Promise::new_pending(Zone::active());
        if engine::config().long_stacks {
            promise.0.borrow_mut().stack = Some(StackHolder::capture(None));
        }

        let p1 = promise.clone();
        let resolve = ResolveFn(Rc::new(move |v| p1.do_resolve(v)));
        let p2 = promise.clone();
        let reject = RejectFn(Rc::new(move |r| p2.do_reject(r)));
        (promise, resolve, reject)
    }

    /// Build a promise from an executor, in the style of the host
    /// platform's `new Promise(executor)` (§2).
    #[track_caller]
    pub fn new<F>(executor: F) -> Promise
    where
        F: FnOnce(ResolveFn, RejectFn),
    {
        let (promise, resolve, reject) = Promise::deferred();
        executor(resolve, reject);
        promise
    }

    /// An already-fulfilled promise, or `value` itself if it is already a
    /// core promise (§4.1).
    pub fn resolved(value: Value) -> Promise {
        if let Value::Promise(p) = value {
            return p;
        }
        let (promise, resolve, _reject) = Promise::deferred();
        resolve.resolve(value);
        promise
    }

    /// An already-rejected promise.
    pub fn rejected(reason: Value) -> Promise {
        let (promise, _resolve, reject) = Promise::deferred();
        reject.reject(reason);
        promise
    }

    /// The resolution procedure (§4.1): rejects on self-resolution, adopts
    /// nested core promises and foreign thenables, otherwise fulfills
    /// directly.
    pub(crate) fn do_resolve(&self, value: Value) {
        if let Value::Promise(ref p) = value {
            if Rc::ptr_eq(&self.0, &p.0) {
                self.do_reject(crate::error::Error::SelfResolution.into());
                return;
            }
            self.adopt(p.clone());
            return;
        }
        if let Value::Thenable(ref t) = value {
            let t = t.clone();
            let resolve_self = self.clone();
            let reject_self = self.clone();
            t.then_dyn(
                Box::new(move |v| resolve_self.do_resolve(v)),
                Box::new(move |r| reject_self.do_reject(r)),
            );
            return;
        }
        self.settle(State::Fulfilled, value);
    }

    /// Adopt `source`'s eventual outcome without allocating a distinct
    /// listener shape — a passthrough reaction (no handlers) reuses the
    /// same dispatch path as a plain `then` (§4.1's adoption).
    fn adopt(&self, source: Promise) {
        source.add_listener(Listener {
            on_fulfilled: None,
            on_rejected: None,
            downstream: self.clone(),
            captured_zone: Zone::active(),
        });
    }

    pub(crate) fn do_reject(&self, reason: Value) {
        mark_rejecting(&reason);
        let reason = engine::map_rejection(reason);
        self.settle(State::Rejected, reason);
    }

    /// Flip this promise back to unhandled after the fact — used when its
    /// rejection handler turns out to have re-thrown the identical reason
    /// rather than actually consuming it (§4.6).
    fn mark_still_unhandled(&self) {
        self.0.borrow_mut().handled = false;
    }

    fn settle(&self, state: State, value: Value) {
        let (listeners, zone, lib_flag) = {
            let mut inner = self.0.borrow_mut();
            if inner.state != State::Pending {
                return;
            }
            inner.state = state;
            inner.value = Some(value.clone());
            (
                std::mem::take(&mut inner.listeners),
                inner.zone.clone(),
                inner.lib_flag,
            )
        };

        if state == State::Rejected {
            unhandled::track(self.clone(), &value);
        }

        for listener in listeners {
            self.dispatch_listener(listener, state, value.clone());
        }

        zone.unpin();

        if lib_flag {
            microtask::flush_now();
        }
    }

    /// Register a listener, reacting immediately (via a microtask) if
    /// already settled, or queueing it if still pending (§4.2, §4.3).
    fn add_listener(&self, listener: Listener) {
        let settled = {
            let mut inner = self.0.borrow_mut();
            inner.handled = true;
            if inner.state == State::Pending {
                inner.listeners.push(listener);
                return;
            }
            (inner.state, inner.value.clone().unwrap_or(Value::Undefined))
        };
        self.dispatch_listener(listener, settled.0, settled.1);
    }

    fn dispatch_listener(&self, listener: Listener, state: State, value: Value) {
        let handler = match state {
            State::Fulfilled => listener.on_fulfilled.clone(),
            State::Rejected => listener.on_rejected.clone(),
            State::Pending => unreachable!("dispatch only happens once settled"),
        };

        let Some(handler) = handler else {
            match state {
                State::Fulfilled => listener.downstream.do_resolve(value),
                State::Rejected => listener.downstream.do_reject(value),
                State::Pending => unreachable!(),
            }
            return;
        };

        let zone = listener.captured_zone;
        zone.pin();
        microtask::note_scheduled_call();
        let downstream = listener.downstream;
        let dispatch_zone = zone.clone();
        let source = self.clone();
        let reason_id = if state == State::Rejected {
            value.identity()
        } else {
            None
        };
        microtask::asap(move || {
            engine::note_microtask_drained();
            if state == State::Rejected {
                clear_rejecting();
            }
            let outcome = Zone::use_psd(dispatch_zone.clone(), || handler(value));
            match outcome {
                Ok(v) => downstream.do_resolve(v),
                Err(e) => downstream.do_reject(e),
            }
            if let Some(id) = reason_id {
                if is_still_rejecting(id) {
                    source.mark_still_unhandled();
                }
            }
            dispatch_zone.unpin();
            microtask::note_scheduled_call_complete();
        });
    }

    /// Register fulfillment and rejection reactions, returning a new
    /// downstream promise (§4.2).
    #[track_caller]
    pub fn then(&self, on_fulfilled: Option<Handler>, on_rejected: Option<Handler>) -> Promise {
        let zone = Zone::active();
        let downstream = Promise::new_pending(zone.clone());
        if engine::config().long_stacks {
            downstream.link_stack(self.clone());
        }
        self.add_listener(Listener {
            on_fulfilled,
            on_rejected,
            downstream: downstream.clone(),
            captured_zone: zone,
        });
        downstream
    }

    /// `then(None, Some(on_rejected))`.
    #[track_caller]
    pub fn catch(&self, on_rejected: Handler) -> Promise {
        self.then(None, Some(on_rejected))
    }

    /// Only handle rejections whose reason matches `predicate`; others pass
    /// through unchanged (the Rust analogue of a constructor-filtered
    /// `catch`, since there is no `instanceof` to match on).
    #[track_caller]
    pub fn catch_if<P>(&self, predicate: P, handler: Handler) -> Promise
    where
        P: Fn(&Value) -> bool + 'static,
    {
        let wrapped: Handler = Rc::new(move |reason: Value| {
            if predicate(&reason) {
                handler(reason)
            } else {
                Err(reason)
            }
        });
        self.then(None, Some(wrapped))
    }

    /// Only handle rejections carrying an engine [`crate::Error`] whose
    /// `Display` starts with `kind`; others pass through unchanged.
    #[track_caller]
    pub fn catch_kind(&self, kind: &'static str, handler: Handler) -> Promise {
        self.catch_if(move |reason| matches!(reason, Value::Error(e) if e.to_string().starts_with(kind)), handler)
    }

    /// Only handle rejections whose reason is a `Value::Object` wrapping an
    /// `E`; others pass through unchanged.
    #[track_caller]
    pub fn catch_type<E, F>(&self, handler: F) -> Promise
    where
        E: 'static,
        F: Fn(&E) -> std::result::Result<Value, Value> + 'static,
    {
        let wrapped: Handler = Rc::new(move |reason: Value| match &reason {
            Value::Object(obj) => match obj.downcast_ref::<E>() {
                Some(e) => handler(e),
                None => Err(reason.clone()),
            },
            _ => Err(reason),
        });
        self.then(None, Some(wrapped))
    }

    /// Run `f` on either settlement, forwarding the original outcome
    /// untouched regardless of what `f` returns (§4.2).
    #[track_caller]
    pub fn finally<F>(&self, f: F) -> Promise
    where
        F: Fn() + 'static,
    {
        let f = Rc::new(f);
        let f_ok = f.clone();
        let f_err = f;
        self.then(
            Some(Rc::new(move |v: Value| {
                f_ok();
                Ok(v)
            })),
            Some(Rc::new(move |r: Value| {
                f_err();
                Err(r)
            })),
        )
    }

    /// Fulfills once every input promise fulfills, with results in input
    /// order; rejects as soon as any input rejects (§4.1's fan-in, not
    /// named directly by the spec's core model but standard alongside it).
    pub fn all<I>(promises: I) -> Promise
    where
        I: IntoIterator<Item = Promise>,
    {
        let items: Vec<Promise> = promises.into_iter().collect();
        let (promise, resolve, reject) = Promise::deferred();
        if items.is_empty() {
            resolve.resolve(Value::array(Vec::new()));
            return promise;
        }

        let total = items.len();
        let results = Rc::new(RefCell::new(vec![Value::Undefined; total]));
        let remaining = Rc::new(std::cell::Cell::new(total));

        for (i, item) in items.into_iter().enumerate() {
            let results = results.clone();
            let remaining = remaining.clone();
            let resolve = resolve.clone();
            let reject = reject.clone();
            item.then(
                Some(Rc::new(move |v: Value| {
                    results.borrow_mut()[i] = v;
                    let left = remaining.get() - 1;
                    remaining.set(left);
                    if left == 0 {
                        resolve.resolve(Value::array(results.borrow().clone()));
                    }
                    Ok(Value::Undefined)
                })),
                Some(Rc::new(move |r: Value| {
                    reject.reject(r);
                    Ok(Value::Undefined)
                })),
            );
        }

        promise
    }

    /// Settles with whichever input settles first (§4.1's fan-in).
    pub fn race<I>(promises: I) -> Promise
    where
        I: IntoIterator<Item = Promise>,
    {
        let (promise, resolve, reject) = Promise::deferred();
        for item in promises {
            let resolve = resolve.clone();
            let reject = reject.clone();
            item.then(
                Some(Rc::new(move |v: Value| {
                    resolve.resolve(v);
                    Ok(Value::Undefined)
                })),
                Some(Rc::new(move |r: Value| {
                    reject.reject(r);
                    Ok(Value::Undefined)
                })),
            );
        }
        promise
    }

    pub(crate) fn is_handled(&self) -> bool {
        self.0.borrow().handled
    }

    pub(crate) fn rejection_snapshot(&self) -> Option<(Value, Zone)> {
        let inner = self.0.borrow();
        if inner.state == State::Rejected {
            Some((inner.value.clone().unwrap(), inner.zone.clone()))
        } else {
            None
        }
    }

    pub(crate) fn stack_holder_location(&self) -> Option<String> {
        self.0
            .borrow()
            .stack
            .as_ref()
            .map(|h| h.location.to_string())
    }

    pub(crate) fn stack_holder_prev(&self) -> Option<Promise> {
        self.0.borrow().stack.as_ref().and_then(|h| h.prev.clone())
    }

    /// Render this promise's captured long stack, if long-stack capture was
    /// enabled when it was created. Rendering is lazy and cached (§6, §9).
    pub fn stack(&self) -> Option<String> {
        {
            let inner = self.0.borrow();
            inner.stack.as_ref()?;
            if let Some(cached) = inner.cached_stack_render.borrow().clone() {
                return Some(cached.to_string());
            }
        }
        let cfg = engine::config();
        let rendered = {
            let inner = self.0.borrow();
            let holder = inner.stack.as_ref().expect("checked above");
            long_stack::render(holder, cfg.max_long_stack_depth, cfg.long_stack_render_frames)
        };
        *self.0.borrow().cached_stack_render.borrow_mut() = Some(Rc::from(rendered.as_str()));
        Some(rendered)
    }
}

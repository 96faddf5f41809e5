//! The zone (async-context) engine, §4.5.
//!
//! A zone is a node in a tree rooted at the global zone. The *active* zone
//! is a single-valued, thread-local register; entering and leaving a zone
//! is bracketed by a `Drop` guard so the register is always restored, even
//! across a panic unwind.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use tracing::{debug, debug_span};

use crate::microtask::{self, PhysicalTick};
use crate::value::Value;

/// Outcome of the unhandled-rejection hook, the Rust analogue of a
/// cancellable DOM `unhandledrejection` event (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    /// The hook consumed the rejection; suppress the `tracing` warning.
    Handled,
    /// The hook did not consume it; the engine still emits its warning.
    Unhandled,
}

/// Snapshot restored when a zone is entered/exited (§4.5's `env`).
#[derive(Clone)]
pub(crate) struct ZoneEnv {
    pub scheduler: Rc<dyn PhysicalTick>,
    pub rejection_mapper: Option<crate::engine::RejectionMapper>,
}

struct ZoneInner {
    parent: Option<Zone>,
    is_global: bool,
    ref_count: RefCell<u64>,
    on_unhandled: RefCell<Option<Rc<dyn Fn(&Value, Option<&crate::promise::Promise>) -> HookOutcome>>>,
    env: RefCell<Option<ZoneEnv>>,
    props: RefCell<FxHashMap<String, Value>>,
    finalized: RefCell<bool>,
    on_finalize: RefCell<Option<Box<dyn FnOnce()>>>,
}

/// A reference-counted handle to a zone. Cloning a `Zone` clones the
/// handle, not the zone itself — all clones observe the same ref_count,
/// props, and parent.
#[derive(Clone)]
pub struct Zone(Rc<ZoneInner>);

impl PartialEq for Zone {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for Zone {}

thread_local! {
    static ACTIVE: RefCell<Zone> = RefCell::new(Zone::global());
    static GLOBAL: Zone = Zone::new_global();
}

impl Zone {
    fn new_global() -> Self {
        Zone(Rc::new(ZoneInner {
            parent: None,
            is_global: true,
            ref_count: RefCell::new(1),
            on_unhandled: RefCell::new(None),
            env: RefCell::new(Some(ZoneEnv {
                scheduler: microtask::scheduler(),
                rejection_mapper: None,
            })),
            props: RefCell::new(HashMap::default()),
            finalized: RefCell::new(false),
            on_finalize: RefCell::new(None),
        }))
    }

    /// The process's root zone. Always alive, never finalized.
    pub fn global() -> Self {
        GLOBAL.with(|g| g.clone())
    }

    pub fn is_global(&self) -> bool {
        self.0.is_global
    }

    /// The zone currently active on this thread.
    pub fn active() -> Self {
        ACTIVE.with(|a| a.borrow().clone())
    }

    /// A property explicitly set on this zone, falling back to the parent
    /// chain (§4.5: "unset fields fall through to the parent").
    pub fn get_prop(&self, key: &str) -> Option<Value> {
        if let Some(v) = self.0.props.borrow().get(key) {
            return Some(v.clone());
        }
        self.0.parent.as_ref().and_then(|p| p.get_prop(key))
    }

    fn ref_count(&self) -> u64 {
        *self.0.ref_count.borrow()
    }

    pub(crate) fn pin(&self) {
        *self.0.ref_count.borrow_mut() += 1;
    }

    pub(crate) fn unpin(&self) {
        let should_finalize = {
            let mut rc = self.0.ref_count.borrow_mut();
            *rc = rc.saturating_sub(1);
            *rc == 0 && !self.0.is_global
        };
        if should_finalize {
            self.finalize();
        }
    }

    fn finalize(&self) {
        let mut finalized = self.0.finalized.borrow_mut();
        if *finalized {
            return;
        }
        *finalized = true;
        drop(finalized);

        debug!("zone finalized");
        if let Some(hook) = self.0.on_finalize.borrow_mut().take() {
            hook();
        }
        if let Some(parent) = &self.0.parent {
            parent.unpin();
        }
    }

    /// Invoke this zone's `on_unhandled`, falling through to an ancestor's
    /// (unset fields fall through to the parent, same as `get_prop`),
    /// then to the process-wide hook, for a rejection that survived to the
    /// end of a physical tick (§4.6).
    pub(crate) fn report_unhandled(&self, reason: &Value, promise: Option<&crate::promise::Promise>) {
        let outcome = self.on_unhandled_chain(reason, promise);
        if outcome == HookOutcome::Unhandled {
            tracing::warn!(reason = ?reason, "unhandled promise rejection");
        }
    }

    fn on_unhandled_chain(&self, reason: &Value, promise: Option<&crate::promise::Promise>) -> HookOutcome {
        if let Some(h) = self.0.on_unhandled.borrow().clone() {
            return h(reason, promise);
        }
        if let Some(parent) = &self.0.parent {
            return parent.on_unhandled_chain(reason, promise);
        }
        match crate::engine::unhandled_rejection_hook() {
            Some(h) => h(reason, promise),
            None => HookOutcome::Unhandled,
        }
    }

    /// Set this zone's unhandled-rejection hook.
    pub fn set_on_unhandled<F>(&self, hook: F)
    where
        F: Fn(&Value, Option<&crate::promise::Promise>) -> HookOutcome + 'static,
    {
        *self.0.on_unhandled.borrow_mut() = Some(Rc::new(hook));
    }

    /// Create a child zone, switch into it for the duration of `fn`, and
    /// finalize it immediately if no work pinned it (§4.5).
    pub fn new_scope<F, R>(props: Vec<(String, Value)>, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        Self::new_scope_with_finalizer(props, None, f)
    }

    fn new_scope_with_finalizer<F, R>(
        props: Vec<(String, Value)>,
        on_finalize: Option<Box<dyn FnOnce()>>,
        f: F,
    ) -> R
    where
        F: FnOnce() -> R,
    {
        let parent = Zone::active();
        let env = parent.0.env.borrow().clone();
        let mut own_props = HashMap::default();
        for (k, v) in props {
            own_props.insert(k, v);
        }
        let child = Zone(Rc::new(ZoneInner {
            parent: Some(parent.clone()),
            is_global: false,
            ref_count: RefCell::new(0),
            on_unhandled: RefCell::new(None),
            env: RefCell::new(env),
            props: RefCell::new(own_props),
            finalized: RefCell::new(false),
            on_finalize: RefCell::new(on_finalize),
        }));
        parent.pin();

        let result = Zone::use_psd(child.clone(), f);

        if child.ref_count() == 0 {
            child.finalize();
        }
        result
    }

    /// Save the active zone, switch to `zone`, run `f`, and restore the
    /// previous zone even if `f` panics (§4.5).
    pub fn use_psd<F, R>(zone: Zone, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let previous = ACTIVE.with(|a| a.replace(zone.clone()));
        let _guard = RestoreGuard { previous: Some(previous) };
        switch_env(&zone);
        let _span = debug_span!("zone_switch", global = zone.is_global()).entered();
        f()
    }

    /// Create a child zone whose returned promise settles once all work
    /// pinned to it completes (§4.5's `follow`). Captures both rejections
    /// of core promises bound to the zone (via `on_unhandled`) and
    /// rejections of foreign thenables observed inside it.
    pub fn follow<F>(body: F) -> crate::promise::Promise
    where
        F: FnOnce(),
    {
        use crate::promise::Promise;

        let (promise, resolve, reject) = Promise::deferred();
        let first_rejection: Rc<RefCell<Option<Value>>> = Rc::new(RefCell::new(None));

        let fr_hook = first_rejection.clone();
        let fr_finalize = first_rejection.clone();

        let on_finalize: Box<dyn FnOnce()> = Box::new(move || match fr_finalize.borrow_mut().take() {
            Some(reason) => reject.reject(reason),
            None => resolve.resolve(Value::Undefined),
        });

        Zone::new_scope_with_finalizer(vec![], Some(on_finalize), move || {
            let zone = Zone::active();
            zone.set_on_unhandled(move |reason, _promise| {
                let mut slot = fr_hook.borrow_mut();
                if slot.is_none() {
                    *slot = Some(reason.clone());
                }
                HookOutcome::Handled
            });
            body();
        });

        promise
    }
}

struct RestoreGuard {
    previous: Option<Zone>,
}

impl Drop for RestoreGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            ACTIVE.with(|a| *a.borrow_mut() = previous.clone());
            switch_env(&previous);
        }
    }
}

fn switch_env(zone: &Zone) {
    if let Some(env) = zone.0.env.borrow().clone() {
        microtask::set_scheduler(env.scheduler);
        crate::engine::set_rejection_mapper(env.rejection_mapper);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_zone_restores_parent_on_exit() {
        let global = Zone::active();
        Zone::new_scope(vec![], || {
            assert_ne!(Zone::active(), global);
        });
        assert_eq!(Zone::active(), global);
    }

    #[test]
    fn props_fall_through_to_parent() {
        Zone::new_scope(vec![("a".into(), Value::Number(1.0))], || {
            let outer_val = Zone::active().get_prop("a");
            assert!(matches!(outer_val, Some(Value::Number(n)) if n == 1.0));
            Zone::new_scope(vec![], || {
                let inherited = Zone::active().get_prop("a");
                assert!(matches!(inherited, Some(Value::Number(n)) if n == 1.0));
            });
        });
    }

    #[test]
    fn child_zone_finalizes_when_no_work_pinned() {
        let child_ref = Rc::new(RefCell::new(None));
        let cr = child_ref.clone();
        Zone::new_scope(vec![], move || {
            *cr.borrow_mut() = Some(Zone::active());
        });
        let zone = child_ref.borrow().clone().unwrap();
        assert_eq!(zone.ref_count(), 0);
    }
}

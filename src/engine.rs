//! Engine-wide configuration: resource limits, the rejection mapper, and
//! the unhandled-rejection hook (§4.8, §4.9).
//!
//! Mirrors the host crate's own resource-limit configuration shape
//! (`EventLoop::max_microtasks_per_tick`) rather than inventing a new
//! configuration idiom.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::value::Value;
use crate::zone::HookOutcome;

/// A pluggable transform applied to every rejection reason at the moment
/// of rejection (§4.1, §4.8). Defaults to identity.
pub type RejectionMapper = Rc<dyn Fn(Value) -> Value>;

/// The process-wide (thread-local) unhandled-rejection hook, the Rust
/// analogue of a cancellable DOM `unhandledrejection` event.
pub type UnhandledHook = Rc<dyn Fn(&Value, Option<&crate::promise::Promise>) -> HookOutcome>;

/// Tunables for the engine, mirroring the host crate's own resource-limit
/// configuration (`EventLoop::max_microtasks_per_tick` there, a starvation
/// guard) and the spec's long-stack knobs (§6, §9).
#[derive(Clone)]
pub struct EngineConfig {
    /// Starvation guard: a physical tick that drains more than this many
    /// microtasks logs a warning (the drain is not aborted — correctness
    /// over the A+ contract takes priority over the guard).
    pub max_microtasks_per_tick: usize,
    /// Enable long-stack capture (§9: "an optional feature; production
    /// builds may disable it entirely"). Off by default.
    pub long_stacks: bool,
    /// Maximum `prev` back-links walked when assembling a long stack.
    pub max_long_stack_depth: usize,
    /// Maximum frames rendered into the final long-stack string.
    pub long_stack_render_frames: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_microtasks_per_tick: 10_000,
            long_stacks: false,
            max_long_stack_depth: 100,
            long_stack_render_frames: 20,
        }
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder(Self::default())
    }
}

#[derive(Clone)]
pub struct EngineConfigBuilder(EngineConfig);

impl EngineConfigBuilder {
    pub fn max_microtasks_per_tick(mut self, n: usize) -> Self {
        self.0.max_microtasks_per_tick = n;
        self
    }

    pub fn long_stacks(mut self, enabled: bool) -> Self {
        self.0.long_stacks = enabled;
        self
    }

    pub fn max_long_stack_depth(mut self, n: usize) -> Self {
        self.0.max_long_stack_depth = n;
        self
    }

    pub fn long_stack_render_frames(mut self, n: usize) -> Self {
        self.0.long_stack_render_frames = n;
        self
    }

    pub fn build(self) -> EngineConfig {
        self.0
    }
}

thread_local! {
    static CONFIG: RefCell<EngineConfig> = RefCell::new(EngineConfig::default());
    static REJECTION_MAPPER: RefCell<Option<RejectionMapper>> = RefCell::new(None);
    static UNHANDLED_HOOK: RefCell<Option<UnhandledHook>> = RefCell::new(None);
    static MICROTASKS_THIS_TICK: Cell<usize> = Cell::new(0);
    static TICK_BUDGET_WARNED: Cell<bool> = Cell::new(false);
}

/// Install a new [`EngineConfig`] for this thread's engine.
pub fn set_config(config: EngineConfig) {
    CONFIG.with(|c| *c.borrow_mut() = config);
}

/// The active [`EngineConfig`].
pub fn config() -> EngineConfig {
    CONFIG.with(|c| c.borrow().clone())
}

/// Install a rejection mapper; `None` restores the identity mapper.
pub fn set_rejection_mapper(mapper: Option<RejectionMapper>) {
    REJECTION_MAPPER.with(|m| *m.borrow_mut() = mapper);
}

/// Apply the active rejection mapper (identity if none installed).
pub fn map_rejection(reason: Value) -> Value {
    REJECTION_MAPPER.with(|m| match &*m.borrow() {
        Some(f) => f(reason),
        None => reason,
    })
}

/// Install the process-wide unhandled-rejection hook (§6).
pub fn set_unhandled_rejection_hook(hook: Option<UnhandledHook>) {
    UNHANDLED_HOOK.with(|h| *h.borrow_mut() = hook);
}

pub(crate) fn unhandled_rejection_hook() -> Option<UnhandledHook> {
    UNHANDLED_HOOK.with(|h| h.borrow().clone())
}

pub(crate) fn note_microtask_drained() {
    MICROTASKS_THIS_TICK.with(|c| {
        let n = c.get() + 1;
        c.set(n);
        if n >= config().max_microtasks_per_tick && !TICK_BUDGET_WARNED.with(|w| w.get()) {
            TICK_BUDGET_WARNED.with(|w| w.set(true));
            tracing::warn!(
                drained = n,
                "physical tick exceeded max_microtasks_per_tick; continuing to drain"
            );
        }
    });
}

/// Reset the per-tick microtask counter. Called at the start of each
/// `drain_physical_tick` pass so the starvation guard in
/// `note_microtask_drained` is a per-tick budget, not a lifetime total.
pub(crate) fn reset_tick_budget() {
    MICROTASKS_THIS_TICK.with(|c| c.set(0));
    TICK_BUDGET_WARNED.with(|w| w.set(false));
}

#[cfg(test)]
pub(crate) fn reset_for_test() {
    set_config(EngineConfig::default());
    set_rejection_mapper(None);
    set_unhandled_rejection_hook(None);
    reset_tick_budget();
}

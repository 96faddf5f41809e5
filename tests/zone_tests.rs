mod common;

use std::cell::RefCell;
use std::rc::Rc;

use zonal_promise::{HookOutcome, Promise, Value, Zone, h, pump};

#[test]
fn zone_is_captured_when_a_reaction_is_registered_and_restored_when_it_runs() {
    common::setup();
    let seen = Rc::new(RefCell::new(None));

    Zone::new_scope(vec![("request_id".into(), Value::from("r-1"))], || {
        let promise = Promise::resolved(Value::from(1.0));
        let s = seen.clone();
        promise.then(
            Some(h(move |v| {
                *s.borrow_mut() = Zone::active().get_prop("request_id");
                Ok(v)
            })),
            None,
        );
    });

    // Outside the scope, the active zone no longer carries request_id.
    assert!(Zone::active().get_prop("request_id").is_none());

    pump();

    assert!(matches!(&*seen.borrow(), Some(Value::String(s)) if &**s == "r-1"));
}

#[test]
fn nested_scopes_inherit_and_can_shadow_parent_props() {
    common::setup();
    Zone::new_scope(vec![("tag".into(), Value::from("outer"))], || {
        Zone::new_scope(vec![("tag".into(), Value::from("inner"))], || {
            let tag = Zone::active().get_prop("tag");
            assert!(matches!(&tag, Some(Value::String(s)) if &**s == "inner"));
        });
        let tag = Zone::active().get_prop("tag");
        assert!(matches!(&tag, Some(Value::String(s)) if &**s == "outer"));
    });
}

#[test]
fn follow_settles_once_all_pinned_work_in_scope_completes() {
    common::setup();
    let (inner, inner_resolve, _reject) = Promise::deferred();
    let completed = Rc::new(RefCell::new(false));

    let followed = Zone::follow(|| {
        let c = completed.clone();
        inner.then(
            Some(h(move |v| {
                *c.borrow_mut() = true;
                Ok(v)
            })),
            None,
        );
    });

    let settled = Rc::new(RefCell::new(false));
    let s = settled.clone();
    followed.then(
        Some(h(move |v| {
            *s.borrow_mut() = true;
            Ok(v)
        })),
        None,
    );

    pump();
    assert!(!*settled.borrow(), "must wait on the inner work");

    inner_resolve.resolve(Value::Undefined);
    pump();

    assert!(*completed.borrow());
    assert!(*settled.borrow());
}

#[test]
fn follow_rejects_with_the_first_unhandled_rejection_observed_inside() {
    common::setup();
    let followed = Zone::follow(|| {
        Promise::rejected(Value::from("inner failure"));
    });

    let caught = Rc::new(RefCell::new(None));
    let c = caught.clone();
    followed.catch(h(move |reason| {
        *c.borrow_mut() = Some(reason.clone());
        Ok(reason)
    }));

    pump();
    assert!(matches!(&*caught.borrow(), Some(Value::String(s)) if &**s == "inner failure"));
}

#[test]
fn zone_unhandled_hook_can_suppress_the_default_warning() {
    common::setup();
    let hook_fired = Rc::new(RefCell::new(false));
    let hf = hook_fired.clone();

    Zone::new_scope(vec![], move || {
        let zone = Zone::active();
        zone.set_on_unhandled(move |_reason, _promise| {
            *hf.borrow_mut() = true;
            HookOutcome::Handled
        });
        Promise::rejected(Value::from("swallowed"));
    });

    pump();
    assert!(*hook_fired.borrow());
}

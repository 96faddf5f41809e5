mod common;

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use zonal_promise::{EngineConfig, Promise, Value, h, pump};

#[derive(Debug)]
struct CustomError {
    code: u32,
}

impl fmt::Display for CustomError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "custom error {}", self.code)
    }
}

#[test]
fn catch_type_only_handles_matching_payload() {
    common::setup();
    let handled_code = Rc::new(RefCell::new(None));
    let hc = handled_code.clone();

    Promise::rejected(Value::Object(Rc::new(CustomError { code: 42 })))
        .catch_type::<CustomError, _>(move |e| {
            *hc.borrow_mut() = Some(e.code);
            Ok(Value::Undefined)
        });

    pump();
    assert_eq!(*handled_code.borrow(), Some(42));
}

#[test]
fn catch_type_passes_through_mismatched_payload() {
    common::setup();
    let fallback_ran = Rc::new(RefCell::new(false));
    let fr = fallback_ran.clone();

    Promise::rejected(Value::from("plain string reason"))
        .catch_type::<CustomError, _>(|_e| Ok(Value::Undefined))
        .catch(h(move |_reason| {
            *fr.borrow_mut() = true;
            Ok(Value::Undefined)
        }));

    pump();
    assert!(*fallback_ran.borrow());
}

#[test]
fn long_stack_capture_links_through_then_chains() {
    zonal_promise::set_config(EngineConfig::builder().long_stacks(true).build());

    let chained = Promise::resolved(Value::from(1.0))
        .then(Some(h(|v| Ok(v))), None)
        .then(Some(h(|v| Ok(v))), None);

    pump();
    let stack = chained.stack();
    assert!(stack.is_some());
    assert!(stack.unwrap().contains("From previous:"));

    zonal_promise::set_config(EngineConfig::default());
}

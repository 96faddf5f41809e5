//! Dynamic value carried by promises.
//!
//! The engine is agnostic to what a promise actually resolves or rejects
//! with, so fulfillment values and rejection reasons share one small,
//! cheaply-cloned tagged union rather than a generic type parameter. This
//! mirrors how an embedded interpreter's own value type plays the same role
//! for *its* promises; here the "interpreter" is whatever host embeds this
//! engine.

use crate::error::Error;
use crate::promise::Promise;
use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// Anything a promise can settle with.
#[derive(Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Array(Rc<Vec<Value>>),
    /// An engine-level error (used for `Error::SelfResolution` and friends).
    Error(Rc<Error>),
    /// A nested core promise — adopted via internal continuation
    /// registration rather than a generic `then` call (§4.1).
    Promise(Promise),
    /// A foreign thenable: anything implementing [`Thenable`] but not a
    /// [`Promise`] itself.
    Thenable(Rc<dyn Thenable>),
    /// An opaque host value passed through untouched.
    Object(Rc<dyn Any>),
}

impl Value {
    pub fn string(s: impl Into<Rc<str>>) -> Self {
        Value::String(s.into())
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(items))
    }

    /// Duck-typed thenable test, matching the spec's "any object with a
    /// callable `then`" — in Rust, anything tagged `Promise` or `Thenable`.
    pub fn is_thenable(&self) -> bool {
        matches!(self, Value::Promise(_) | Value::Thenable(_))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Pointer-identity key for the reference-carrying variants. Used to
    /// recognize when the very same rejection reason resurfaces — e.g. a
    /// rejection re-thrown unchanged from a `catch` handler, or the same
    /// root cause bubbling through several derived promises (§4.6).
    /// `Number`/`String`/etc. have no stable identity to key on, so they
    /// return `None` and are treated as always-distinct.
    pub(crate) fn identity(&self) -> Option<usize> {
        match self {
            Value::Error(rc) => Some(Rc::as_ptr(rc) as *const () as usize),
            Value::Object(rc) => Some(Rc::as_ptr(rc) as *const () as usize),
            Value::Thenable(rc) => Some(Rc::as_ptr(rc) as *const () as usize),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Array(items) => f.debug_list().entries(items.iter()).finish(),
            Value::Error(e) => write!(f, "Error({e})"),
            Value::Promise(_) => write!(f, "Promise {{ .. }}"),
            Value::Thenable(_) => write!(f, "Thenable {{ .. }}"),
            Value::Object(_) => write!(f, "Object {{ .. }}"),
        }
    }
}

impl From<Error> for Value {
    fn from(e: Error) -> Self {
        Value::Error(Rc::new(e))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s.into())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<Promise> for Value {
    fn from(p: Promise) -> Self {
        Value::Promise(p)
    }
}

/// A foreign (non-core) promise-like object. Any host type that wants to be
/// adopted by the resolution procedure (§4.1) implements this.
pub trait Thenable {
    /// Register fulfillment/rejection continuations. Implementations must
    /// call at most one of the two closures, at most once.
    fn then_dyn(
        &self,
        on_fulfilled: Box<dyn FnOnce(Value)>,
        on_rejected: Box<dyn FnOnce(Value)>,
    );
}

#![forbid(unsafe_code)]

//! Synchronous reference subscriber.
//!
//! A [`Watcher`] evaluates a getter with itself as the active subscriber,
//! records every Dep the getter read, and re-evaluates synchronously when any
//! of them is notified. After each evaluation it detaches from Deps it no
//! longer read.
//!
//! There is no scheduler: `update()` runs the getter on the notifying call
//! stack. A watcher that writes a slot it depends on during its own
//! evaluation is not re-entered; the nested notification is dropped.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use smallvec::SmallVec;

use crate::dep::{Dep, Subscriber, SubscriberId, TargetGuard};
use crate::value::Value;

type DepList = SmallVec<[Rc<Dep>; 4]>;

/// A tracked computation with an optional change callback.
pub struct Watcher {
    id: SubscriberId,
    this: Weak<Watcher>,
    getter: Box<dyn Fn() -> Value>,
    callback: Option<Box<dyn Fn(&Value, &Value)>>,
    value: RefCell<Value>,
    deps: RefCell<DepList>,
    new_deps: RefCell<DepList>,
    active: Cell<bool>,
    running: Cell<bool>,
    runs: Cell<u64>,
}

impl Watcher {
    /// Create and evaluate immediately.
    pub fn new(getter: impl Fn() -> Value + 'static) -> Rc<Self> {
        Self::build(Box::new(getter), None)
    }

    /// Create with a callback receiving `(new, old)` whenever re-evaluation
    /// yields a different value, or any composite value.
    pub fn with_callback(
        getter: impl Fn() -> Value + 'static,
        callback: impl Fn(&Value, &Value) + 'static,
    ) -> Rc<Self> {
        Self::build(Box::new(getter), Some(Box::new(callback)))
    }

    fn build(
        getter: Box<dyn Fn() -> Value>,
        callback: Option<Box<dyn Fn(&Value, &Value)>>,
    ) -> Rc<Self> {
        let watcher = Rc::new_cyclic(|this| Self {
            id: SubscriberId::next(),
            this: this.clone(),
            getter,
            callback,
            value: RefCell::new(Value::Undefined),
            deps: RefCell::new(SmallVec::new()),
            new_deps: RefCell::new(SmallVec::new()),
            active: Cell::new(true),
            running: Cell::new(false),
            runs: Cell::new(0),
        });
        let initial = watcher.evaluate();
        *watcher.value.borrow_mut() = initial;
        watcher
    }

    /// Last evaluated value.
    #[must_use]
    pub fn value(&self) -> Value {
        self.value.borrow().clone()
    }

    /// Number of getter evaluations, including the initial one.
    #[must_use]
    pub fn run_count(&self) -> u64 {
        self.runs.get()
    }

    /// Number of Deps read by the last evaluation.
    #[must_use]
    pub fn dep_count(&self) -> usize {
        self.deps.borrow().len()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    /// Register the active subscriber on every Dep this watcher read, so a
    /// reader of a derived value reacts to the same sources.
    pub fn depend(&self) {
        let deps: DepList = self.deps.borrow().clone();
        for dep in deps {
            dep.depend();
        }
    }

    /// Detach from every Dep and stop reacting.
    pub fn teardown(&self) {
        if !self.active.replace(false) {
            return;
        }
        for dep in self.deps.borrow_mut().drain(..) {
            dep.remove_sub(self.id);
        }
    }

    fn evaluate(&self) -> Value {
        struct Running<'a>(&'a Cell<bool>);
        impl Drop for Running<'_> {
            fn drop(&mut self) {
                self.0.set(false);
            }
        }

        let target = self.this.upgrade().map(|rc| rc as Rc<dyn Subscriber>);
        self.running.set(true);
        let value = {
            let _running = Running(&self.running);
            let _frame = TargetGuard::enter(target);
            (self.getter)()
        };
        self.runs.set(self.runs.get() + 1);
        self.cleanup_deps();
        value
    }

    fn cleanup_deps(&self) {
        let fresh = std::mem::take(&mut *self.new_deps.borrow_mut());
        let stale = std::mem::replace(&mut *self.deps.borrow_mut(), fresh);
        let deps = self.deps.borrow();
        for dep in stale {
            if !deps.iter().any(|d| d.id() == dep.id()) {
                dep.remove_sub(self.id);
            }
        }
    }
}

impl Subscriber for Watcher {
    fn id(&self) -> SubscriberId {
        self.id
    }

    fn add_dep(&self, dep: &Rc<Dep>) {
        let mut new_deps = self.new_deps.borrow_mut();
        if !new_deps.iter().any(|d| d.id() == dep.id()) {
            new_deps.push(Rc::clone(dep));
        }
    }

    fn update(&self) {
        if !self.active.get() {
            return;
        }
        if self.running.get() {
            tracing::trace!(subscriber = self.id.raw(), "re-entrant update skipped");
            return;
        }
        let new_value = self.evaluate();
        let old = self.value.replace(new_value.clone());
        if (!new_value.strict_eq(&old) || new_value.is_composite())
            && let Some(callback) = &self.callback
        {
            callback(&new_value, &old);
        }
    }
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("id", &self.id.raw())
            .field("deps", &self.dep_count())
            .field("runs", &self.runs.get())
            .field("active", &self.active.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectRef;
    use crate::observer::observe;

    fn state(entries: &[(&str, i32)]) -> ObjectRef {
        let obj = ObjectRef::from_entries(entries.iter().copied());
        observe(&Value::from(obj.clone()), false);
        obj
    }

    #[test]
    fn reruns_on_dependency_change() {
        let s = state(&[("a", 1)]);
        let read = s.clone();
        let w = Watcher::new(move || read.get("a"));
        assert_eq!(w.value(), Value::from(1));
        s.assign("a", Value::from(2));
        assert_eq!(w.value(), Value::from(2));
        assert_eq!(w.run_count(), 2);
    }

    #[test]
    fn callback_receives_new_and_old() {
        let s = state(&[("a", 1)]);
        let read = s.clone();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&seen);
        let _w = Watcher::with_callback(
            move || read.get("a"),
            move |new, old| log.borrow_mut().push((new.clone(), old.clone())),
        );
        s.assign("a", Value::from(5));
        assert_eq!(*seen.borrow(), vec![(Value::from(5), Value::from(1))]);
    }

    #[test]
    fn stale_dependencies_are_dropped() {
        let s = state(&[("flag", 1), ("x", 10), ("y", 20)]);
        let read = s.clone();
        let w = Watcher::new(move || {
            if read.get("flag") == Value::from(1) {
                read.get("x")
            } else {
                read.get("y")
            }
        });
        assert_eq!(w.dep_count(), 2);
        s.assign("flag", Value::from(0));
        let x_dep = Rc::clone(s.reactive_slot("x").expect("x").dep());
        assert!(!x_dep.has_subscriber(w.id()));
        let runs = w.run_count();
        s.assign("x", Value::from(11));
        assert_eq!(w.run_count(), runs);
    }

    #[test]
    fn self_write_does_not_recurse() {
        let s = state(&[("n", 0)]);
        let read = s.clone();
        let w = Watcher::new(move || {
            let next = read.get("n").as_number().unwrap_or(0.0) + 1.0;
            read.assign("n", Value::Number(next));
            Value::Number(next)
        });
        assert_eq!(w.run_count(), 1);
        assert_eq!(s.get("n"), Value::from(1));
    }

    #[test]
    fn depend_forwards_sources_to_reader() {
        let s = state(&[("a", 1)]);
        let read = s.clone();
        let derived = Watcher::new(move || read.get("a"));
        let source = Rc::clone(&derived);
        let outer = Watcher::new(move || {
            source.depend();
            source.value()
        });
        s.assign("a", Value::from(3));
        assert_eq!(outer.value(), Value::from(3));
        assert_eq!(outer.dep_count(), 1);
    }

    #[test]
    fn teardown_detaches() {
        let s = state(&[("a", 1)]);
        let read = s.clone();
        let w = Watcher::new(move || read.get("a"));
        w.teardown();
        assert_eq!(w.dep_count(), 0);
        s.assign("a", Value::from(2));
        assert_eq!(w.value(), Value::from(1));
        assert!(!w.is_active());
    }

    #[test]
    fn dropped_watcher_stops_reacting() {
        let s = state(&[("a", 1)]);
        let read = s.clone();
        drop(Watcher::new(move || read.get("a")));
        s.assign("a", Value::from(2));
        let slot = s.reactive_slot("a").expect("slot");
        assert_eq!(slot.dep().subscriber_count(), 0);
    }
}

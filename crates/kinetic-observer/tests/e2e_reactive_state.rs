//! E2E: reactive state driven through observe/set/del and watchers.
//!
//! Covers the full read → depend → write → notify loop:
//! 1. Root state accepts writes to declared keys and refuses new keys.
//! 2. Nested non-root objects accept new keys through `set`, and the new
//!    slots behave like declared ones.
//! 3. Array mutators wake whole-array readers and observe inserted elements.
//! 4. Refusals degrade silently and surface as logged diagnostics.

#![forbid(unsafe_code)]

use std::cell::RefCell;
use std::rc::Rc;

use kinetic_observer::config::{self, ReactivityConfig};
use kinetic_observer::diagnostics::capture_warnings;
use kinetic_observer::{
    ArrayRef, DiagnosticKind, MutationOutcome, ObjectRef, Value, Watcher, del, observe, set,
};
use tracing_test::traced_test;

fn counter(getter: impl Fn() -> Value + 'static) -> (Rc<Watcher>, Rc<RefCell<Vec<Value>>>) {
    let seen: Rc<RefCell<Vec<Value>>> = Rc::default();
    let log = Rc::clone(&seen);
    let watcher = Watcher::with_callback(getter, move |new, _old| log.borrow_mut().push(new.clone()));
    (watcher, seen)
}

#[test]
fn e2e_root_state_write_notifies_once() {
    let state = ObjectRef::from_entries([("a", 1)]);
    let root = Value::from(state.clone());
    observe(&root, true);

    let read = state.clone();
    let (_s, seen) = counter(move || read.get("a"));

    assert_eq!(set(&root, "a", Value::from(2)), MutationOutcome::Updated);
    assert_eq!(*seen.borrow(), vec![Value::from(2)]);
}

#[test]
fn e2e_root_state_refuses_new_key() {
    let state = ObjectRef::from_entries([("a", 1)]);
    let root = Value::from(state.clone());
    observe(&root, true);

    let (outcome, warnings) = capture_warnings(|| set(&root, "b", Value::from(3)));
    assert_eq!(outcome, MutationOutcome::Refused);
    assert!(state.get("b").is_undefined());
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].kind, DiagnosticKind::UsageViolation);
}

#[test]
fn e2e_new_key_on_nested_state_is_reactive() {
    let nested = ObjectRef::from_entries([("a", 1)]);
    let state = ObjectRef::from_entries([("nested", nested.clone())]);
    observe(&Value::from(state.clone()), true);

    // A reader of the containing slot learns about shape changes.
    let read_shape = state.clone();
    let (_shape, shape_seen) = counter(move || {
        let inner = read_shape.get("nested");
        Value::from(inner.as_object().map_or(0, ObjectRef::len) as f64)
    });

    let target = Value::from(nested.clone());
    assert_eq!(set(&target, "b", Value::from(3)), MutationOutcome::Added);
    assert_eq!(*shape_seen.borrow(), vec![Value::from(2)]);

    let read_b = nested.clone();
    let (b_watcher, b_seen) = counter(move || read_b.get("b"));
    assert_eq!(b_watcher.value(), Value::from(3));

    nested.assign("b", Value::from(4));
    set(&target, "b", Value::from(5));
    assert_eq!(*b_seen.borrow(), vec![Value::from(4), Value::from(5)]);

    assert_eq!(del(&target, "b"), MutationOutcome::Removed);
    assert_eq!(*shape_seen.borrow(), vec![Value::from(2), Value::from(1)]);
}

#[test]
fn e2e_array_push_wakes_readers_and_observes_elements() {
    let list = ArrayRef::new();
    let state = ObjectRef::from_entries([("list", list.clone())]);
    observe(&Value::from(state.clone()), true);

    let read = state.clone();
    let (_w, seen) = counter(move || {
        let arr = read.get("list");
        Value::from(arr.as_array().map_or(0, ArrayRef::len) as f64)
    });

    let item = ObjectRef::from_entries([("done", false)]);
    list.push([Value::from(item.clone())]);
    assert_eq!(*seen.borrow(), vec![Value::from(1)]);
    assert!(item.observer().is_some());

    // Element slot writes wake element readers, not the list reader.
    let read_item = item.clone();
    let (_iw, item_seen) = counter(move || read_item.get("done"));
    item.assign("done", Value::from(true));
    assert_eq!(*item_seen.borrow(), vec![Value::from(true)]);
    assert_eq!(seen.borrow().len(), 1);

    // Raw index writes are a tracking boundary.
    list.set_index(0, Value::Null);
    assert_eq!(seen.borrow().len(), 1);
}

#[test]
fn e2e_replacing_a_nested_object_retargets_dependencies() {
    let first = ObjectRef::from_entries([("v", 1)]);
    let state = ObjectRef::from_entries([("child", first.clone())]);
    observe(&Value::from(state.clone()), false);

    let read = state.clone();
    let (w, _seen) = counter(move || {
        read.get("child")
            .as_object()
            .map(|child| child.get("v"))
            .unwrap_or_default()
    });
    assert_eq!(w.value(), Value::from(1));

    let second = ObjectRef::from_entries([("v", 10)]);
    state.assign("child", Value::from(second.clone()));
    assert_eq!(w.value(), Value::from(10));

    let runs = w.run_count();
    first.assign("v", Value::from(2));
    assert_eq!(w.run_count(), runs);
    second.assign("v", Value::from(11));
    assert_eq!(w.value(), Value::from(11));
}

#[test]
fn e2e_server_rendering_never_observes() {
    config::scoped(ReactivityConfig::default().with_server_rendering(true), || {
        let state = Value::from(ObjectRef::from_entries([("a", 1)]));
        assert!(observe(&state, true).is_none());
        assert_eq!(set(&state, "b", Value::from(2)), MutationOutcome::Untracked);
    });
}

#[test]
#[traced_test]
fn e2e_refusals_are_logged() {
    config::scoped(ReactivityConfig::default().with_diagnostics(true), || {
        let vm = Value::from(ObjectRef::new_instance());
        assert_eq!(del(&vm, "x"), MutationOutcome::Refused);
    });
    assert!(logs_contain("avoid deleting property `x`"));
}

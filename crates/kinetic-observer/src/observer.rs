#![forbid(unsafe_code)]

//! Observers and reactive slots.
//!
//! [`observe`] attaches an [`Observer`] to a composite value. For objects the
//! Observer walks the enumerable own keys and installs a [`ReactiveSlot`] on
//! each through [`define_reactive`]; for arrays it observes every element and
//! relies on the [`ArrayRef`] mutators for change notification.
//!
//! # Invariants
//!
//! 1. At most one Observer per composite value; re-observing returns the
//!    existing one.
//! 2. Reading a slot while a subscriber is active registers that subscriber
//!    on the slot Dep, on the child Observer Dep (if the value is an observed
//!    composite), and on the Observer Dep of every nested array element.
//! 3. Writing a value that is `===` to the current one, or NaN over NaN,
//!    notifies nobody. Any other write notifies the slot Dep exactly once.
//! 4. Every value stored into a slot is observed if it is composite and
//!    conversion is enabled.
//!
//! # Failure Modes
//!
//! - **Non-configurable property**: left untouched, reported as
//!   `UnsupportedTarget` when diagnostics are on.
//! - **Key added by plain assignment**: gets no slot; only
//!   `mutation::set` installs slots after the initial walk.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::array::{ArrayRef, WeakArrayRef};
use crate::config;
use crate::dep::{self, Dep};
use crate::diagnostics::ReactivityWarning;
use crate::object::{Getter, ObjectRef, Property, PropertySlot, Setter, WeakObjectRef};
use crate::value::Value;

// ─── Observer ────────────────────────────────────────────────────────────────

#[derive(Clone)]
enum Owner {
    Object(WeakObjectRef),
    Array(WeakArrayRef),
}

/// Instrumentation record for one observed composite value.
///
/// The Observer does not own its value; the value owns the Observer.
pub struct Observer {
    owner: Owner,
    dep: Rc<Dep>,
    vm_count: Cell<usize>,
}

impl Observer {
    fn attach_object(obj: &ObjectRef) -> Rc<Self> {
        let ob = Rc::new(Self {
            owner: Owner::Object(obj.downgrade()),
            dep: Dep::new(),
            vm_count: Cell::new(0),
        });
        tracing::trace!(dep_id = ob.dep.id().raw(), kind = "object", "observer attached");
        obj.attach_observer(Rc::clone(&ob));
        ob.walk(obj);
        ob
    }

    fn attach_array(arr: &ArrayRef) -> Rc<Self> {
        let ob = Rc::new(Self {
            owner: Owner::Array(arr.downgrade()),
            dep: Dep::new(),
            vm_count: Cell::new(0),
        });
        tracing::trace!(dep_id = ob.dep.id().raw(), kind = "array", "observer attached");
        arr.attach_observer(Rc::clone(&ob));
        ob.observe_array(&arr.to_vec());
        ob
    }

    /// Dep notified on structural change: keys added or removed, array
    /// mutated.
    #[must_use]
    pub fn dep(&self) -> &Rc<Dep> {
        &self.dep
    }

    /// Number of root instances using this value as their top-level state.
    #[must_use]
    pub fn vm_count(&self) -> usize {
        self.vm_count.get()
    }

    /// Whether some root instance uses this value as its state.
    #[must_use]
    pub fn is_root_data(&self) -> bool {
        self.vm_count.get() > 0
    }

    /// A root instance stopped using this value as its state.
    pub fn release_root(&self) {
        self.vm_count.set(self.vm_count.get().saturating_sub(1));
    }

    /// The observed value, while it is alive.
    #[must_use]
    pub fn value(&self) -> Option<Value> {
        match &self.owner {
            Owner::Object(weak) => weak.upgrade().map(Value::Object),
            Owner::Array(weak) => weak.upgrade().map(Value::Array),
        }
    }

    /// Install a reactive slot for every enumerable own key.
    pub fn walk(&self, obj: &ObjectRef) {
        for key in obj.keys() {
            let value = obj.get(&key);
            define_reactive(obj, &key, value);
        }
    }

    /// Observe each element of `items`.
    pub fn observe_array(&self, items: &[Value]) {
        for item in items {
            observe(item, false);
        }
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("dep", &self.dep)
            .field("vm_count", &self.vm_count.get())
            .finish()
    }
}

/// Return the Observer for `value`, creating one when allowed.
///
/// A new Observer is created only for plain objects and arrays that are
/// extensible, not root instances, while conversion is enabled and outside
/// server rendering. With `as_root_data` the Observer's root-instance count
/// is incremented, which makes `set`/`del` refuse shape changes on it.
pub fn observe(value: &Value, as_root_data: bool) -> Option<Rc<Observer>> {
    let ob = match value {
        Value::Object(obj) => obj.observer().or_else(|| {
            (conversion_allowed() && obj.is_extensible() && !obj.is_instance())
                .then(|| Observer::attach_object(obj))
        }),
        Value::Array(arr) => arr.observer().or_else(|| {
            (conversion_allowed() && arr.is_extensible()).then(|| Observer::attach_array(arr))
        }),
        _ => return None,
    };
    if as_root_data && let Some(ob) = &ob {
        ob.vm_count.set(ob.vm_count.get() + 1);
    }
    ob
}

fn conversion_allowed() -> bool {
    config::should_convert() && !config::is_server_rendering()
}

// ─── Reactive slot ───────────────────────────────────────────────────────────

/// One property rewritten to track reads and writes.
///
/// The slot aggregates its own Dep with the Dep of the child Observer (when
/// its value is an observed composite); a tracked read registers on both.
pub struct ReactiveSlot {
    key: Rc<str>,
    dep: Rc<Dep>,
    value: RefCell<Value>,
    child: RefCell<Option<Rc<Observer>>>,
    getter: Option<Getter>,
    setter: Option<Setter>,
    custom_setter: Option<Rc<dyn Fn()>>,
}

impl ReactiveSlot {
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The slot's own Dep.
    #[must_use]
    pub fn dep(&self) -> &Rc<Dep> {
        &self.dep
    }

    /// Observer of the current value, when it is an observed composite.
    #[must_use]
    pub fn child_observer(&self) -> Option<Rc<Observer>> {
        self.child.borrow().clone()
    }

    fn current(&self) -> Value {
        match &self.getter {
            Some(get) => get(),
            None => self.value.borrow().clone(),
        }
    }

    /// Tracked read.
    pub fn get(&self) -> Value {
        let value = self.current();
        if dep::is_tracking() {
            self.depend(&value);
        }
        value
    }

    /// Register the active subscriber on every Dep this read touches.
    fn depend(&self, value: &Value) {
        self.dep.depend();
        if let Some(child) = self.child_observer() {
            child.dep().depend();
        }
        if let Value::Array(arr) = value {
            depend_array(arr);
        }
    }

    /// Tracked write.
    pub fn set(&self, new_value: Value) {
        let old = self.current();
        if new_value.strict_eq(&old) || (new_value.is_nan() && old.is_nan()) {
            return;
        }
        if let Some(custom) = &self.custom_setter
            && config::current().diagnostics
        {
            custom();
        }
        match &self.setter {
            Some(set) => set(new_value.clone()),
            None => *self.value.borrow_mut() = new_value.clone(),
        }
        *self.child.borrow_mut() = observe(&new_value, false);
        self.dep.notify();
    }
}

impl fmt::Debug for ReactiveSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveSlot")
            .field("key", &self.key)
            .field("dep", &self.dep)
            .field("has_child", &self.child.borrow().is_some())
            .finish()
    }
}

/// Touching an array registers on every nested element's Observer, since
/// element access cannot be intercepted per index.
fn depend_array(arr: &ArrayRef) {
    for item in arr.to_vec() {
        if let Some(ob) = item.observer() {
            ob.dep().depend();
        }
        if let Value::Array(nested) = &item {
            depend_array(nested);
        }
    }
}

/// Make `key` on `obj` a reactive slot holding `value`.
///
/// An existing accessor pair is composed with, not replaced. Returns `false`
/// (and leaves the property untouched) when the property is
/// non-configurable, or when `key` is new and `obj` is not extensible.
pub fn define_reactive(obj: &ObjectRef, key: &str, value: Value) -> bool {
    define_reactive_with(obj, key, value, None)
}

/// [`define_reactive`] with a hook run before each effective write while
/// diagnostics are enabled (used to flag writes the caller considers
/// illegal, such as mutating a prop).
pub fn define_reactive_with(
    obj: &ObjectRef,
    key: &str,
    value: Value,
    custom_setter: Option<Rc<dyn Fn()>>,
) -> bool {
    let existing = obj.property(key);
    if existing.as_ref().is_some_and(|prop| !prop.configurable) {
        ReactivityWarning::NonConfigurable {
            key: key.to_owned(),
        }
        .report();
        return false;
    }
    if existing.is_none() && !obj.is_extensible() {
        ReactivityWarning::NotExtensible {
            key: key.to_owned(),
        }
        .report();
        return false;
    }

    let (getter, setter): (Option<Getter>, Option<Setter>) =
        match existing.map(|prop| prop.slot) {
            Some(PropertySlot::Accessor { get, set }) => (get, set),
            Some(PropertySlot::Reactive(prev)) => {
                let read = Rc::clone(&prev);
                let get: Getter = Rc::new(move || read.current());
                let set: Setter = Rc::new(move |v: Value| prev.set(v));
                (Some(get), Some(set))
            }
            Some(PropertySlot::Data { .. }) | None => (None, None),
        };

    let child = observe(&value, false);
    let slot = Rc::new(ReactiveSlot {
        key: Rc::from(key),
        dep: Dep::new(),
        value: RefCell::new(value),
        child: RefCell::new(child),
        getter,
        setter,
        custom_setter,
    });
    tracing::trace!(dep_id = slot.dep.id().raw(), key, "reactive slot installed");
    obj.define_property(key, Property::reactive(slot))
}

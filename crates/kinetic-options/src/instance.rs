#![forbid(unsafe_code)]

//! Component instances.
//!
//! [`Instance::new`] runs the creation sequence: resolve the constructor's
//! options, merge the instance options on top, call `beforeCreate`, set up
//! props, methods, data, computed properties and watchers, then call
//! `created`.
//!
//! Every user function (hooks, methods, data factories, computed getters,
//! watch handlers) receives the instance object as its first argument.
//! The instance object is a root instance: it is never observed, and `set`
//! and `del` refuse to change its shape.

use std::cell::{Cell, OnceCell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use kinetic_observer::object::{Getter, Setter, WeakObjectRef};
use kinetic_observer::{
    Func, Key, MutationOutcome, ObjectRef, Property, Value, Watcher, define_reactive_with,
    mutation, observe, untracked,
};

use crate::bag::{OptionBag, OptionValue};
use crate::constructor::Constructor;
use crate::error::{OptionsError, OptionsWarning};
use crate::strategy::{MergeContext, merge_options};

static NEXT_UID: AtomicU64 = AtomicU64::new(0);

type ComputedCell = Rc<OnceCell<Rc<Watcher>>>;

/// A live component instance.
pub struct Instance {
    uid: u64,
    this: ObjectRef,
    ctor: Rc<Constructor>,
    options: Rc<OptionBag>,
    props: ObjectRef,
    data: ObjectRef,
    computed: Vec<ComputedCell>,
    watchers: RefCell<Vec<Rc<Watcher>>>,
    destroyed: Cell<bool>,
}

impl Instance {
    /// Create an instance of `ctor`.
    pub fn new(ctor: &Rc<Constructor>, options: OptionBag) -> Result<Self, OptionsError> {
        let resolved = ctor.resolve_options()?;
        let options = Rc::new(merge_options(&resolved, &options, MergeContext::Instance));
        let mut vm = Self {
            uid: NEXT_UID.fetch_add(1, Ordering::Relaxed),
            this: ObjectRef::new_instance(),
            ctor: Rc::clone(ctor),
            options,
            props: ObjectRef::new(),
            data: ObjectRef::new(),
            computed: Vec::new(),
            watchers: RefCell::new(Vec::new()),
            destroyed: Cell::new(false),
        };
        tracing::debug!(uid = vm.uid, cid = ctor.cid(), "instance init");

        vm.call_hook("beforeCreate");
        vm.init_props();
        vm.init_methods();
        vm.data = vm.init_data();
        vm.computed = vm.init_computed();
        vm.init_watch();
        vm.call_hook("created");
        Ok(vm)
    }

    #[must_use]
    pub fn uid(&self) -> u64 {
        self.uid
    }

    /// The instance object.
    #[must_use]
    pub fn this(&self) -> &ObjectRef {
        &self.this
    }

    #[must_use]
    pub fn constructor(&self) -> &Rc<Constructor> {
        &self.ctor
    }

    /// Merged options for this instance.
    #[must_use]
    pub fn options(&self) -> &Rc<OptionBag> {
        &self.options
    }

    /// Root state object.
    #[must_use]
    pub fn data(&self) -> &ObjectRef {
        &self.data
    }

    #[must_use]
    pub fn props(&self) -> &ObjectRef {
        &self.props
    }

    /// Read a property through the instance object.
    #[must_use]
    pub fn get(&self, key: &str) -> Value {
        self.this.get(key)
    }

    /// Assign a property through the instance object.
    pub fn assign(&self, key: &str, value: Value) -> bool {
        self.this.assign(key, value)
    }

    /// Call a method by name. `None` if no such method exists.
    pub fn call_method(&self, name: &str, args: &[Value]) -> Option<Value> {
        let method = self.this.get(name);
        method.as_func().map(|f| f.call(args))
    }

    /// `set` on any target reachable from this instance.
    pub fn set(&self, target: &Value, key: impl Into<Key>, value: Value) -> MutationOutcome {
        mutation::set(target, key, value)
    }

    /// `del` on any target reachable from this instance.
    pub fn delete(&self, target: &Value, key: impl Into<Key>) -> MutationOutcome {
        mutation::del(target, key)
    }

    /// Call every handler registered for a lifecycle hook.
    pub fn call_hook(&self, hook: &str) {
        let handlers = self.options.hooks(hook);
        if handlers.is_empty() {
            return;
        }
        tracing::trace!(uid = self.uid, hook, handlers = handlers.len(), "call hook");
        let this = Value::from(self.this.clone());
        for handler in handlers {
            handler.call(std::slice::from_ref(&this));
        }
    }

    /// Watch a dot-separated path on the instance; `handler` receives
    /// `(this, new, old)`.
    pub fn watch(&self, expression: &str, handler: Func) -> Rc<Watcher> {
        let path: Vec<String> = expression.split('.').map(str::to_owned).collect();
        let reader = self.this.downgrade();
        let owner = self.this.downgrade();
        let watcher = Watcher::with_callback(
            move || read_path(&reader, &path),
            move |new, old| {
                handler.call(&[this_value(&owner), new.clone(), old.clone()]);
            },
        );
        self.watchers.borrow_mut().push(Rc::clone(&watcher));
        watcher
    }

    /// Run the destroy hooks and detach every watcher. Idempotent.
    pub fn destroy(&self) {
        if self.destroyed.get() {
            return;
        }
        self.call_hook("beforeDestroy");
        for watcher in self.watchers.borrow_mut().drain(..) {
            watcher.teardown();
        }
        for cell in &self.computed {
            if let Some(watcher) = cell.get() {
                watcher.teardown();
            }
        }
        if let Some(ob) = self.data.observer() {
            ob.release_root();
        }
        self.destroyed.set(true);
        self.call_hook("destroyed");
        tracing::debug!(uid = self.uid, "instance destroyed");
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }

    // ── state initialisation ────────────────────────────────────────────

    fn init_props(&self) {
        let Some(declared) = self.options.map("props") else {
            return;
        };
        let supplied = self.options.map("propsData");
        for (key, spec) in declared {
            let value = supplied
                .and_then(|data| data.get(key))
                .cloned()
                .unwrap_or_else(|| self.prop_default(spec));
            let warn_key = key.clone();
            define_reactive_with(
                &self.props,
                key,
                value,
                Some(Rc::new(move || {
                    OptionsWarning::PropMutation {
                        key: warn_key.clone(),
                    }
                    .report();
                })),
            );
            proxy(&self.this, &self.props, key);
        }
    }

    fn prop_default(&self, spec: &Value) -> Value {
        let default = spec
            .as_object()
            .map(|spec| spec.get("default"))
            .unwrap_or_default();
        match default {
            Value::Func(factory) => factory.call(&[Value::from(self.this.clone())]),
            other => other,
        }
    }

    fn init_methods(&self) {
        let Some(methods) = self.options.map("methods") else {
            return;
        };
        for (key, method) in methods {
            if self.props.has_own(key) {
                OptionsWarning::DuplicateKey {
                    key: key.clone(),
                    declared_as: "prop",
                }
                .report();
            }
            let bound = match method.as_func() {
                Some(f) => bind(f, self.this.downgrade()),
                None => {
                    OptionsWarning::UndefinedMethod { key: key.clone() }.report();
                    Func::new(|_| Value::Undefined)
                }
            };
            self.this
                .define_property(key, Property::data(Value::from(bound)));
        }
    }

    fn init_data(&self) -> ObjectRef {
        let this = Value::from(self.this.clone());
        let raw = match self.options.get("data") {
            Some(OptionValue::Data(factory)) => {
                Some(untracked(|| factory.call(std::slice::from_ref(&this))))
            }
            Some(OptionValue::Value(value)) => Some(value.clone()),
            _ => None,
        };
        let data = match raw {
            None => ObjectRef::new(),
            Some(Value::Object(obj)) if !obj.is_instance() => obj,
            Some(_) => {
                OptionsWarning::DataNotObject.report();
                ObjectRef::new()
            }
        };

        let methods = self.options.map("methods");
        for key in data.keys() {
            if methods.is_some_and(|m| m.contains_key(&key)) {
                OptionsWarning::DuplicateKey {
                    key: key.clone(),
                    declared_as: "method",
                }
                .report();
            }
            if self.props.has_own(&key) {
                OptionsWarning::DuplicateKey {
                    key,
                    declared_as: "prop",
                }
                .report();
            } else if !is_reserved(&key) {
                proxy(&self.this, &data, &key);
            }
        }
        observe(&Value::from(data.clone()), true);
        data
    }

    fn init_computed(&self) -> Vec<ComputedCell> {
        let Some(computed) = self.options.map("computed") else {
            return Vec::new();
        };
        let mut cells = Vec::with_capacity(computed.len());
        for (key, getter) in computed {
            let Some(getter) = getter.as_func().cloned() else {
                OptionsWarning::UndefinedMethod { key: key.clone() }.report();
                continue;
            };
            if self.this.has_own(key) {
                OptionsWarning::DuplicateKey {
                    key: key.clone(),
                    declared_as: "data property or prop",
                }
                .report();
                continue;
            }
            let cell: ComputedCell = Rc::default();
            let lazy = Rc::clone(&cell);
            let owner = self.this.downgrade();
            let get: Getter = Rc::new(move || {
                let watcher = lazy.get_or_init(|| {
                    let owner = owner.clone();
                    let getter = getter.clone();
                    Watcher::new(move || getter.call(&[this_value(&owner)]))
                });
                watcher.depend();
                watcher.value()
            });
            self.this
                .define_property(key, Property::accessor(Some(get), None));
            cells.push(cell);
        }
        cells
    }

    fn init_watch(&self) {
        let Some(watch) = self.options.watchers() else {
            return;
        };
        let methods = self.options.map("methods");
        for (expression, handlers) in watch {
            for handler in handlers.iter() {
                let resolved = match handler {
                    Value::Func(f) => Some(f.clone()),
                    Value::Str(name) => methods
                        .and_then(|m| m.get(&**name))
                        .and_then(Value::as_func)
                        .cloned(),
                    _ => None,
                };
                match resolved {
                    Some(f) => {
                        self.watch(expression, f);
                    }
                    None => OptionsWarning::InvalidWatchHandler {
                        key: expression.clone(),
                    }
                    .report(),
                }
            }
        }
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("uid", &self.uid)
            .field("cid", &self.ctor.cid())
            .field("data", &self.data)
            .field("destroyed", &self.destroyed.get())
            .finish()
    }
}

fn is_reserved(key: &str) -> bool {
    key.starts_with('$') || key.starts_with('_')
}

fn this_value(this: &WeakObjectRef) -> Value {
    this.upgrade().map(Value::from).unwrap_or_default()
}

/// Make `target[key]` read and write `source[key]`.
fn proxy(target: &ObjectRef, source: &ObjectRef, key: &str) {
    let (read, write) = (source.clone(), source.clone());
    let (read_key, write_key) = (key.to_owned(), key.to_owned());
    let get: Getter = Rc::new(move || read.get(&read_key));
    let set: Setter = Rc::new(move |value: Value| {
        write.assign(&write_key, value);
    });
    target.define_property(key, Property::accessor(Some(get), Some(set)));
}

/// Prepend the instance to every call of `f`.
fn bind(f: &Func, this: WeakObjectRef) -> Func {
    let f = f.clone();
    Func::new(move |args| {
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(this_value(&this));
        full.extend_from_slice(args);
        f.call(&full)
    })
}

fn read_path(root: &WeakObjectRef, path: &[String]) -> Value {
    let mut current = this_value(root);
    for segment in path {
        current = match &current {
            Value::Object(obj) => obj.get(segment),
            _ => return Value::Undefined,
        };
    }
    current
}

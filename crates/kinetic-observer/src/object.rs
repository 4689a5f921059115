#![forbid(unsafe_code)]

//! Shared, ordered property maps.
//!
//! [`ObjectRef`] models an object whose properties may be plain data, a
//! custom accessor pair, or an installed [`ReactiveSlot`]. Property order is
//! insertion order, so [`ObjectRef::keys`] walks keys the way they were
//! declared.
//!
//! # Invariants
//!
//! 1. A non-configurable property can be neither redefined nor deleted.
//! 2. No interior borrow is held while an accessor or reactive slot runs, so
//!    getters and setters may freely read and write the same object.
//! 3. The Observer back-reference lives outside the property map and is
//!    never enumerated.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use crate::observer::{Observer, ReactiveSlot};
use crate::value::Value;

/// Custom read accessor.
pub type Getter = Rc<dyn Fn() -> Value>;
/// Custom write accessor.
pub type Setter = Rc<dyn Fn(Value)>;

/// Storage behind one property.
#[derive(Clone)]
pub enum PropertySlot {
    Data { value: Value, writable: bool },
    Accessor {
        get: Option<Getter>,
        set: Option<Setter>,
    },
    Reactive(Rc<ReactiveSlot>),
}

/// A property descriptor.
#[derive(Clone)]
pub struct Property {
    pub slot: PropertySlot,
    pub enumerable: bool,
    pub configurable: bool,
}

impl Property {
    /// Writable, enumerable, configurable data property.
    #[must_use]
    pub fn data(value: Value) -> Self {
        Self {
            slot: PropertySlot::Data {
                value,
                writable: true,
            },
            enumerable: true,
            configurable: true,
        }
    }

    /// Enumerable, configurable accessor property.
    #[must_use]
    pub fn accessor(get: Option<Getter>, set: Option<Setter>) -> Self {
        Self {
            slot: PropertySlot::Accessor { get, set },
            enumerable: true,
            configurable: true,
        }
    }

    pub(crate) fn reactive(slot: Rc<ReactiveSlot>) -> Self {
        Self {
            slot: PropertySlot::Reactive(slot),
            enumerable: true,
            configurable: true,
        }
    }

    #[must_use]
    pub fn non_configurable(mut self) -> Self {
        self.configurable = false;
        self
    }

    #[must_use]
    pub fn non_enumerable(mut self) -> Self {
        self.enumerable = false;
        self
    }

    #[must_use]
    pub fn read_only(mut self) -> Self {
        if let PropertySlot::Data { writable, .. } = &mut self.slot {
            *writable = false;
        }
        self
    }

    /// The installed reactive slot, if this property has been made reactive.
    #[must_use]
    pub fn reactive_slot(&self) -> Option<&Rc<ReactiveSlot>> {
        match &self.slot {
            PropertySlot::Reactive(slot) => Some(slot),
            _ => None,
        }
    }
}

/// Whether an object is plain data or a state-owning root instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObjectKind {
    #[default]
    Plain,
    /// A component instance. Never observed; its shape is never extended
    /// through `set`/`del`.
    Instance,
}

struct ObjectData {
    kind: ObjectKind,
    props: RefCell<IndexMap<String, Property>>,
    extensible: Cell<bool>,
    ob: RefCell<Option<Rc<Observer>>>,
}

/// Shared handle to an object. Cloning shares the same object.
#[derive(Clone)]
pub struct ObjectRef(Rc<ObjectData>);

/// Non-owning handle, used by Observer back-references.
#[derive(Clone)]
pub struct WeakObjectRef(Weak<ObjectData>);

impl WeakObjectRef {
    #[must_use]
    pub fn upgrade(&self) -> Option<ObjectRef> {
        self.0.upgrade().map(ObjectRef)
    }
}

impl Default for ObjectRef {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectRef {
    /// Empty, extensible plain object.
    #[must_use]
    pub fn new() -> Self {
        Self::with_kind(ObjectKind::Plain)
    }

    /// Empty root-instance object.
    #[must_use]
    pub fn new_instance() -> Self {
        Self::with_kind(ObjectKind::Instance)
    }

    fn with_kind(kind: ObjectKind) -> Self {
        Self(Rc::new(ObjectData {
            kind,
            props: RefCell::new(IndexMap::new()),
            extensible: Cell::new(true),
            ob: RefCell::new(None),
        }))
    }

    /// Plain object with the given data properties, in order.
    pub fn from_entries<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let obj = Self::new();
        {
            let mut props = obj.0.props.borrow_mut();
            for (key, value) in entries {
                props.insert(key.into(), Property::data(value.into()));
            }
        }
        obj
    }

    #[must_use]
    pub fn kind(&self) -> ObjectKind {
        self.0.kind
    }

    #[must_use]
    pub fn is_instance(&self) -> bool {
        self.0.kind == ObjectKind::Instance
    }

    /// Read a property. Runs accessors; `Undefined` when absent.
    pub fn get(&self, key: &str) -> Value {
        let slot = match self.0.props.borrow().get(key) {
            Some(prop) => prop.slot.clone(),
            None => return Value::Undefined,
        };
        match slot {
            PropertySlot::Data { value, .. } => value,
            PropertySlot::Accessor { get: Some(get), .. } => get(),
            PropertySlot::Accessor { get: None, .. } => Value::Undefined,
            PropertySlot::Reactive(slot) => slot.get(),
        }
    }

    /// Plain assignment, `obj[key] = value`.
    ///
    /// Accessors route to their setter, writable data is replaced, and an
    /// absent key is added as a plain (untracked) data property when the
    /// object is extensible. Returns whether the write took effect.
    pub fn assign(&self, key: &str, value: Value) -> bool {
        let slot = self.0.props.borrow().get(key).map(|prop| prop.slot.clone());
        match slot {
            Some(PropertySlot::Reactive(slot)) => {
                slot.set(value);
                true
            }
            Some(PropertySlot::Accessor { set: Some(set), .. }) => {
                set(value);
                true
            }
            Some(PropertySlot::Accessor { set: None, .. }) => false,
            Some(PropertySlot::Data { writable: false, .. }) => false,
            Some(PropertySlot::Data { .. }) => {
                if let Some(prop) = self.0.props.borrow_mut().get_mut(key) {
                    prop.slot = PropertySlot::Data {
                        value,
                        writable: true,
                    };
                }
                true
            }
            None => {
                if !self.is_extensible() {
                    return false;
                }
                self.0
                    .props
                    .borrow_mut()
                    .insert(key.to_owned(), Property::data(value));
                true
            }
        }
    }

    /// Define or redefine a property. Refuses when the existing property is
    /// non-configurable or when adding to a non-extensible object.
    pub fn define_property(&self, key: &str, prop: Property) -> bool {
        let mut props = self.0.props.borrow_mut();
        match props.get_mut(key) {
            Some(existing) if !existing.configurable => false,
            Some(existing) => {
                *existing = prop;
                true
            }
            None if !self.0.extensible.get() => false,
            None => {
                props.insert(key.to_owned(), prop);
                true
            }
        }
    }

    /// Snapshot of a property descriptor.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<Property> {
        self.0.props.borrow().get(key).cloned()
    }

    /// Remove a property. Returns `false` if it is non-configurable.
    pub fn delete(&self, key: &str) -> bool {
        let mut props = self.0.props.borrow_mut();
        match props.get(key) {
            Some(prop) if !prop.configurable => false,
            Some(_) => {
                props.shift_remove(key);
                true
            }
            None => true,
        }
    }

    #[must_use]
    pub fn has_own(&self, key: &str) -> bool {
        self.0.props.borrow().contains_key(key)
    }

    /// Enumerable own keys, in insertion order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.0
            .props
            .borrow()
            .iter()
            .filter(|(_, prop)| prop.enumerable)
            .map(|(key, _)| key.clone())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.props.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn prevent_extensions(&self) {
        self.0.extensible.set(false);
    }

    #[must_use]
    pub fn is_extensible(&self) -> bool {
        self.0.extensible.get()
    }

    /// Make every property non-configurable (and data read-only) and stop
    /// further extension.
    pub fn freeze(&self) {
        self.prevent_extensions();
        for prop in self.0.props.borrow_mut().values_mut() {
            prop.configurable = false;
            if let PropertySlot::Data { writable, .. } = &mut prop.slot {
                *writable = false;
            }
        }
    }

    /// The attached Observer, if this object has been made reactive.
    #[must_use]
    pub fn observer(&self) -> Option<Rc<Observer>> {
        self.0.ob.borrow().clone()
    }

    pub(crate) fn attach_observer(&self, ob: Rc<Observer>) {
        *self.0.ob.borrow_mut() = Some(ob);
    }

    /// The reactive slot installed for `key`, if any.
    #[must_use]
    pub fn reactive_slot(&self, key: &str) -> Option<Rc<ReactiveSlot>> {
        self.0
            .props
            .borrow()
            .get(key)
            .and_then(|prop| prop.reactive_slot().cloned())
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakObjectRef {
        WeakObjectRef(Rc::downgrade(&self.0))
    }
}

/// Prints keys only: formatting must never run accessors.
impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("kind", &self.0.kind)
            .field("keys", &self.keys())
            .field("observed", &self.0.ob.borrow().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn assign_adds_plain_property_when_extensible() {
        let obj = ObjectRef::new();
        assert!(obj.assign("a", Value::from(1)));
        assert_eq!(obj.get("a"), Value::from(1));
        obj.prevent_extensions();
        assert!(!obj.assign("b", Value::from(2)));
        assert!(obj.get("b").is_undefined());
    }

    #[test]
    fn keys_preserve_insertion_order_and_skip_hidden() {
        let obj = ObjectRef::from_entries([("z", 1), ("a", 2)]);
        obj.define_property("hidden", Property::data(Value::Null).non_enumerable());
        obj.assign("m", Value::from(3));
        assert_eq!(obj.keys(), vec!["z", "a", "m"]);
        assert!(obj.has_own("hidden"));
    }

    #[test]
    fn accessor_routes_reads_and_writes() {
        let store = Rc::new(Cell::new(0.0));
        let read = Rc::clone(&store);
        let write = Rc::clone(&store);
        let obj = ObjectRef::new();
        obj.define_property(
            "n",
            Property::accessor(
                Some(Rc::new(move || Value::Number(read.get()))),
                Some(Rc::new(move |v: Value| write.set(v.as_number().unwrap_or(0.0)))),
            ),
        );
        obj.assign("n", Value::from(7));
        assert_eq!(store.get(), 7.0);
        assert_eq!(obj.get("n"), Value::from(7));
    }

    #[test]
    fn accessor_may_reenter_its_object() {
        let obj = ObjectRef::from_entries([("base", 2)]);
        let weak = obj.downgrade();
        obj.define_property(
            "double",
            Property::accessor(
                Some(Rc::new(move || {
                    let this = weak.upgrade().expect("object alive");
                    Value::Number(this.get("base").as_number().unwrap_or(0.0) * 2.0)
                })),
                None,
            ),
        );
        assert_eq!(obj.get("double"), Value::from(4));
    }

    #[test]
    fn non_configurable_cannot_be_redefined_or_deleted() {
        let obj = ObjectRef::new();
        obj.define_property("k", Property::data(Value::from(1)).non_configurable());
        assert!(!obj.define_property("k", Property::data(Value::from(2))));
        assert!(!obj.delete("k"));
        assert_eq!(obj.get("k"), Value::from(1));
    }

    #[test]
    fn freeze_blocks_writes() {
        let obj = ObjectRef::from_entries([("a", 1)]);
        obj.freeze();
        assert!(!obj.assign("a", Value::from(2)));
        assert!(!obj.is_extensible());
        assert_eq!(obj.get("a"), Value::from(1));
    }

    #[test]
    fn debug_does_not_run_accessors() {
        let hits = Rc::new(Cell::new(0));
        let counted = Rc::clone(&hits);
        let obj = ObjectRef::new();
        obj.define_property(
            "x",
            Property::accessor(
                Some(Rc::new(move || {
                    counted.set(counted.get() + 1);
                    Value::Null
                })),
                None,
            ),
        );
        let rendered = format!("{obj:?}");
        assert!(rendered.contains("\"x\""));
        assert_eq!(hits.get(), 0);
    }
}

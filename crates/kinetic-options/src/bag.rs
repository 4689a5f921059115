#![forbid(unsafe_code)]

//! Option bags: the declarative description of a component.
//!
//! An [`OptionBag`] maps option categories to values. Values are shared
//! handles, and identity matters: option resolution decides whether anything
//! changed by comparing handles ([`OptionValue::same`]), never contents.
//!
//! Asset registries (`components`, `directives`, `filters`) are layered: a
//! lookup that misses in a registry continues in its parent, and
//! registration always writes to the registry it is called on.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use kinetic_observer::{Func, ObjectRef, Value};

use crate::constructor::Constructor;

/// Lifecycle hook option keys, in invocation order.
pub const LIFECYCLE_HOOKS: [&str; 10] = [
    "beforeCreate",
    "created",
    "beforeMount",
    "mounted",
    "beforeUpdate",
    "updated",
    "beforeDestroy",
    "destroyed",
    "activated",
    "deactivated",
];

#[must_use]
pub fn is_lifecycle_hook(key: &str) -> bool {
    LIFECYCLE_HOOKS.contains(&key)
}

/// `foo-bar` → `fooBar`.
#[must_use]
pub fn camelize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut chars = name.chars().peekable();
    while let Some(c) = chars.next() {
        match chars.peek() {
            Some(next) if c == '-' && next.is_alphanumeric() => {
                out.extend(next.to_uppercase());
                chars.next();
            }
            _ => out.push(c),
        }
    }
    out
}

// ─── Option values ───────────────────────────────────────────────────────────

/// One option category's value.
#[derive(Clone)]
pub enum OptionValue {
    /// Lifecycle hook list.
    Hooks(Rc<[Func]>),
    /// State factory, called with the instance as its only argument.
    Data(Func),
    /// `props`, `methods`, `computed`: name → definition.
    Map(Rc<IndexMap<String, Value>>),
    /// `watch`: expression → handlers.
    Watch(Rc<IndexMap<String, Rc<[Value]>>>),
    /// `components`, `directives`, `filters`.
    Assets(Rc<AssetRegistry>),
    Value(Value),
}

impl OptionValue {
    /// Handle identity. `Value` compares with `===`.
    #[must_use]
    pub fn same(&self, other: &OptionValue) -> bool {
        match (self, other) {
            (Self::Hooks(a), Self::Hooks(b)) => Rc::ptr_eq(a, b),
            (Self::Data(a), Self::Data(b)) => a.ptr_eq(b),
            (Self::Map(a), Self::Map(b)) => Rc::ptr_eq(a, b),
            (Self::Watch(a), Self::Watch(b)) => Rc::ptr_eq(a, b),
            (Self::Assets(a), Self::Assets(b)) => Rc::ptr_eq(a, b),
            (Self::Value(a), Self::Value(b)) => a.strict_eq(b),
            _ => false,
        }
    }

    #[must_use]
    pub fn as_hooks(&self) -> Option<&Rc<[Func]>> {
        match self {
            Self::Hooks(hooks) => Some(hooks),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_map(&self) -> Option<&Rc<IndexMap<String, Value>>> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_watch(&self) -> Option<&Rc<IndexMap<String, Rc<[Value]>>>> {
        match self {
            Self::Watch(watch) => Some(watch),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_assets(&self) -> Option<&Rc<AssetRegistry>> {
        match self {
            Self::Assets(registry) => Some(registry),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }
}

impl fmt::Debug for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hooks(hooks) => f.debug_tuple("Hooks").field(&hooks.len()).finish(),
            Self::Data(func) => f.debug_tuple("Data").field(func).finish(),
            Self::Map(map) => f.debug_list().entries(map.keys()).finish(),
            Self::Watch(watch) => f.debug_tuple("Watch").field(&watch.len()).finish(),
            Self::Assets(registry) => fmt::Debug::fmt(registry, f),
            Self::Value(value) => fmt::Debug::fmt(value, f),
        }
    }
}

// ─── Assets ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    Component,
    Directive,
    Filter,
}

impl AssetKind {
    pub const ALL: [AssetKind; 3] = [Self::Component, Self::Directive, Self::Filter];

    /// Option key holding this kind's registry.
    #[must_use]
    pub const fn option_key(self) -> &'static str {
        match self {
            Self::Component => "components",
            Self::Directive => "directives",
            Self::Filter => "filters",
        }
    }

    #[must_use]
    pub fn from_option_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.option_key() == key)
    }
}

/// Directive hooks. A bare function registers as both `bind` and `update`.
#[derive(Debug, Clone, Default)]
pub struct DirectiveDef {
    pub bind: Option<Func>,
    pub inserted: Option<Func>,
    pub update: Option<Func>,
    pub component_updated: Option<Func>,
    pub unbind: Option<Func>,
}

impl DirectiveDef {
    #[must_use]
    pub fn from_fn(f: Func) -> Self {
        Self {
            bind: Some(f.clone()),
            update: Some(f),
            ..Self::default()
        }
    }
}

/// A registered asset.
#[derive(Clone)]
pub enum Asset {
    Component(Rc<Constructor>),
    /// A constructor's registration of itself under its own name.
    SelfComponent(Weak<Constructor>),
    Directive(Rc<DirectiveDef>),
    Filter(Func),
    Other(Value),
}

impl Asset {
    /// The component constructor, if this is a live component.
    #[must_use]
    pub fn constructor(&self) -> Option<Rc<Constructor>> {
        match self {
            Self::Component(ctor) => Some(Rc::clone(ctor)),
            Self::SelfComponent(weak) => weak.upgrade(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_directive(&self) -> Option<&DirectiveDef> {
        match self {
            Self::Directive(def) => Some(def),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_filter(&self) -> Option<&Func> {
        match self {
            Self::Filter(f) => Some(f),
            _ => None,
        }
    }
}

impl fmt::Debug for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Component(ctor) => f.debug_tuple("Component").field(&ctor.cid()).finish(),
            Self::SelfComponent(weak) => f
                .debug_tuple("SelfComponent")
                .field(&weak.upgrade().map(|ctor| ctor.cid()))
                .finish(),
            Self::Directive(def) => fmt::Debug::fmt(def, f),
            Self::Filter(func) => f.debug_tuple("Filter").field(func).finish(),
            Self::Other(value) => f.debug_tuple("Other").field(value).finish(),
        }
    }
}

/// Layered asset registry.
pub struct AssetRegistry {
    kind: AssetKind,
    own: RefCell<IndexMap<String, Asset>>,
    parent: Option<Rc<AssetRegistry>>,
}

impl AssetRegistry {
    #[must_use]
    pub fn new(kind: AssetKind) -> Self {
        Self::layered(kind, None)
    }

    /// Empty registry whose misses fall through to `parent`.
    #[must_use]
    pub fn layered(kind: AssetKind, parent: Option<Rc<AssetRegistry>>) -> Self {
        Self {
            kind,
            own: RefCell::new(IndexMap::new()),
            parent,
        }
    }

    #[must_use]
    pub fn kind(&self) -> AssetKind {
        self.kind
    }

    #[must_use]
    pub fn parent(&self) -> Option<&Rc<AssetRegistry>> {
        self.parent.as_ref()
    }

    /// Copy of this layer's own entries, sharing the same parent.
    #[must_use]
    pub fn fork(&self) -> Self {
        Self {
            kind: self.kind,
            own: RefCell::new(self.own.borrow().clone()),
            parent: self.parent.clone(),
        }
    }

    /// Register on this layer; returns the asset it shadows on this layer.
    pub fn register(&self, id: &str, asset: Asset) -> Option<Asset> {
        self.own.borrow_mut().insert(id.to_owned(), asset)
    }

    /// Look `id` up through the layer chain.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Asset> {
        if let Some(asset) = self.own.borrow().get(id) {
            return Some(asset.clone());
        }
        self.parent.as_ref().and_then(|parent| parent.get(id))
    }

    #[must_use]
    pub fn get_own(&self, id: &str) -> Option<Asset> {
        self.own.borrow().get(id).cloned()
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    #[must_use]
    pub fn own_ids(&self) -> Vec<String> {
        self.own.borrow().keys().cloned().collect()
    }

    /// Every asset visible from this layer, outermost layer first, nearer
    /// layers overriding.
    #[must_use]
    pub fn visible(&self) -> IndexMap<String, Asset> {
        let mut all = self
            .parent
            .as_ref()
            .map(|parent| parent.visible())
            .unwrap_or_default();
        for (id, asset) in self.own.borrow().iter() {
            all.insert(id.clone(), asset.clone());
        }
        all
    }

    /// Number of layers, this one included.
    #[must_use]
    pub fn depth(&self) -> usize {
        1 + self.parent.as_ref().map_or(0, |parent| parent.depth())
    }
}

impl fmt::Debug for AssetRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetRegistry")
            .field("kind", &self.kind)
            .field("own", &self.own_ids())
            .field("depth", &self.depth())
            .finish()
    }
}

// ─── Option bag ──────────────────────────────────────────────────────────────

/// Declared or merged component options.
#[derive(Clone, Default)]
pub struct OptionBag {
    entries: IndexMap<String, OptionValue>,
    mixins: Vec<Rc<OptionBag>>,
    extends: Option<Rc<OptionBag>>,
}

impl OptionBag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ── builders ────────────────────────────────────────────────────────

    #[must_use]
    pub fn named(self, name: &str) -> Self {
        self.insert("name", OptionValue::Value(Value::from(name)))
    }

    /// Append a lifecycle hook.
    #[must_use]
    pub fn hook(mut self, hook: &str, f: Func) -> Self {
        let mut hooks: Vec<Func> = self
            .entries
            .get(hook)
            .and_then(OptionValue::as_hooks)
            .map(|existing| existing.to_vec())
            .unwrap_or_default();
        hooks.push(f);
        self.entries
            .insert(hook.to_owned(), OptionValue::Hooks(hooks.into()));
        self
    }

    /// State factory.
    #[must_use]
    pub fn data(self, factory: Func) -> Self {
        self.insert("data", OptionValue::Data(factory))
    }

    /// Literal state object. Only valid for instance options.
    #[must_use]
    pub fn data_object(self, data: ObjectRef) -> Self {
        self.insert("data", OptionValue::Value(Value::from(data)))
    }

    #[must_use]
    pub fn method(self, name: &str, f: Func) -> Self {
        self.map_entry("methods", name, Value::from(f))
    }

    #[must_use]
    pub fn computed(self, name: &str, getter: Func) -> Self {
        self.map_entry("computed", name, Value::from(getter))
    }

    /// Declare a prop. A non-object `spec` is taken as the prop's type.
    #[must_use]
    pub fn prop(self, name: &str, spec: Value) -> Self {
        let spec = if spec.is_plain_object() {
            spec
        } else {
            Value::from(ObjectRef::from_entries([("type", spec)]))
        };
        self.map_entry("props", &camelize(name), spec)
    }

    /// Declare untyped props by name (array form).
    #[must_use]
    pub fn props(self, names: &[&str]) -> Self {
        names
            .iter()
            .fold(self, |bag, name| bag.prop(name, Value::Null))
    }

    /// Values for declared props, supplied at instance creation.
    #[must_use]
    pub fn props_data(self, name: &str, value: Value) -> Self {
        self.map_entry("propsData", &camelize(name), value)
    }

    /// Add a watch handler: a function, or the name of a method.
    #[must_use]
    pub fn watch(mut self, expression: &str, handler: impl Into<Value>) -> Self {
        let mut watch: IndexMap<String, Rc<[Value]>> = self
            .entries
            .get("watch")
            .and_then(OptionValue::as_watch)
            .map(|w| (**w).clone())
            .unwrap_or_default();
        let mut handlers: Vec<Value> = watch
            .get(expression)
            .map(|h| h.to_vec())
            .unwrap_or_default();
        handlers.push(handler.into());
        watch.insert(expression.to_owned(), handlers.into());
        self.entries
            .insert("watch".to_owned(), OptionValue::Watch(Rc::new(watch)));
        self
    }

    #[must_use]
    pub fn component(self, id: &str, ctor: Rc<Constructor>) -> Self {
        self.asset(AssetKind::Component, id, Asset::Component(ctor))
    }

    #[must_use]
    pub fn directive(self, id: &str, def: DirectiveDef) -> Self {
        self.asset(AssetKind::Directive, id, Asset::Directive(Rc::new(def)))
    }

    #[must_use]
    pub fn filter(self, id: &str, f: Func) -> Self {
        self.asset(AssetKind::Filter, id, Asset::Filter(f))
    }

    #[must_use]
    pub fn mixin(mut self, mixin: impl Into<Rc<OptionBag>>) -> Self {
        self.mixins.push(mixin.into());
        self
    }

    #[must_use]
    pub fn extends(mut self, base: impl Into<Rc<OptionBag>>) -> Self {
        self.extends = Some(base.into());
        self
    }

    #[must_use]
    pub fn insert(mut self, key: &str, value: OptionValue) -> Self {
        self.entries.insert(key.to_owned(), value);
        self
    }

    fn map_entry(mut self, key: &str, name: &str, value: Value) -> Self {
        let mut map: IndexMap<String, Value> = self
            .entries
            .get(key)
            .and_then(OptionValue::as_map)
            .map(|m| (**m).clone())
            .unwrap_or_default();
        map.insert(name.to_owned(), value);
        self.entries
            .insert(key.to_owned(), OptionValue::Map(Rc::new(map)));
        self
    }

    fn asset(mut self, kind: AssetKind, id: &str, asset: Asset) -> Self {
        let registry = self
            .entries
            .get(kind.option_key())
            .and_then(OptionValue::as_assets)
            .map_or_else(|| AssetRegistry::new(kind), |r| r.fork());
        registry.register(id, asset);
        self.entries.insert(
            kind.option_key().to_owned(),
            OptionValue::Assets(Rc::new(registry)),
        );
        self
    }

    pub(crate) fn set_entry(&mut self, key: &str, value: OptionValue) {
        self.entries.insert(key.to_owned(), value);
    }

    // ── readers ─────────────────────────────────────────────────────────

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.entries.get(key)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OptionValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.get("name")?.as_value()?.as_str()
    }

    /// Hooks registered under `hook`, in call order.
    #[must_use]
    pub fn hooks(&self, hook: &str) -> &[Func] {
        match self.get(hook).and_then(OptionValue::as_hooks) {
            Some(hooks) => &hooks[..],
            None => &[],
        }
    }

    #[must_use]
    pub fn map(&self, key: &str) -> Option<&IndexMap<String, Value>> {
        self.get(key).and_then(OptionValue::as_map).map(|m| &**m)
    }

    #[must_use]
    pub fn watchers(&self) -> Option<&IndexMap<String, Rc<[Value]>>> {
        self.get("watch").and_then(OptionValue::as_watch).map(|w| &**w)
    }

    #[must_use]
    pub fn assets(&self, kind: AssetKind) -> Option<&Rc<AssetRegistry>> {
        self.get(kind.option_key()).and_then(OptionValue::as_assets)
    }

    #[must_use]
    pub fn mixins(&self) -> &[Rc<OptionBag>] {
        &self.mixins
    }

    #[must_use]
    pub fn extends_from(&self) -> Option<&Rc<OptionBag>> {
        self.extends.as_ref()
    }
}

impl fmt::Debug for OptionBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptionBag")
            .field("entries", &self.entries)
            .field("mixins", &self.mixins.len())
            .field("extends", &self.extends.is_some())
            .finish()
    }
}

#![forbid(unsafe_code)]

//! Component constructors and option resolution.
//!
//! A [`Constructor`] owns the merged options for one component definition.
//! Subclasses created with [`Constructor::extend`] keep three snapshots:
//!
//! - `super_options`: the parent's resolved options the current merge was
//!   built from,
//! - `extend_options`: the options passed to `extend`,
//! - `sealed_options`: a shallow copy of the merged options, used to tell
//!   which categories were replaced after the merge.
//!
//! # Invariants
//!
//! 1. [`Constructor::resolve_options`] re-merges only when the parent's
//!    resolved options changed identity; otherwise it returns the cached
//!    handle.
//! 2. Hooks never appear twice in a re-merged hook list because of a
//!    re-merge. Hook identity is the `Func` allocation: a hook that is
//!    recreated rather than re-referenced counts as new.
//! 3. Resolution terminates: a constructor reached twice while walking its
//!    ancestors fails with [`OptionsError::InheritanceCycle`].
//!
//! # Failure Modes
//!
//! - **Registry cycles**: a constructor that registers one of its own
//!   subclasses as a component keeps it alive and is kept alive by it, like
//!   any global registration. Self-registration under the constructor's own
//!   name is weak.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashSet;
use indexmap::IndexMap;
use kinetic_observer::Func;

use crate::bag::{Asset, AssetKind, AssetRegistry, DirectiveDef, OptionBag, OptionValue};
use crate::error::{OptionsError, OptionsWarning};
use crate::strategy::{MergeContext, merge_options};

static NEXT_CID: AtomicU64 = AtomicU64::new(0);

const DEFAULT_RESERVED_TAGS: &[&str] = &[
    "slot", "component", "html", "body", "base", "head", "link", "meta", "style", "title",
    "address", "article", "aside", "footer", "header", "h1", "h2", "h3", "h4", "h5", "h6",
    "nav", "section", "div", "dd", "dl", "dt", "figure", "hr", "li", "main", "ol", "p", "pre",
    "ul", "a", "b", "br", "code", "em", "i", "img", "span", "strong", "table", "tbody", "td",
    "th", "thead", "tr", "button", "form", "input", "label", "option", "select", "textarea",
    "svg", "circle", "g", "path", "rect", "text",
];

/// Registration policy shared by a constructor tree.
#[derive(Debug, Clone)]
pub struct OptionsConfig {
    /// Element names that must not be used as component ids.
    pub reserved_tags: AHashSet<String>,
}

impl Default for OptionsConfig {
    fn default() -> Self {
        Self {
            reserved_tags: DEFAULT_RESERVED_TAGS.iter().map(|t| (*t).to_owned()).collect(),
        }
    }
}

impl OptionsConfig {
    #[must_use]
    pub fn with_reserved_tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            reserved_tags: tags.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn is_reserved_tag(&self, id: &str) -> bool {
        self.reserved_tags.contains(&id.to_ascii_lowercase())
    }
}

fn root_options() -> OptionBag {
    AssetKind::ALL.into_iter().fold(OptionBag::new(), |bag, kind| {
        bag.insert(
            kind.option_key(),
            OptionValue::Assets(Rc::new(AssetRegistry::new(kind))),
        )
    })
}

fn valid_component_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '-')
}

/// A component definition with resolvable options.
pub struct Constructor {
    cid: u64,
    this: Weak<Constructor>,
    root: Weak<Constructor>,
    config: Rc<OptionsConfig>,
    parent: RefCell<Option<Rc<Constructor>>>,
    options: RefCell<Rc<OptionBag>>,
    super_options: RefCell<Option<Rc<OptionBag>>>,
    extend_options: RefCell<Rc<OptionBag>>,
    sealed_options: RefCell<Rc<OptionBag>>,
}

impl Constructor {
    /// Root constructor with empty asset registries and default config.
    #[must_use]
    pub fn base() -> Rc<Self> {
        Self::with_config(OptionsConfig::default())
    }

    #[must_use]
    pub fn with_config(config: OptionsConfig) -> Rc<Self> {
        let ctor = Rc::new_cyclic(|this: &Weak<Self>| {
            let options = Rc::new(root_options());
            Self {
                cid: NEXT_CID.fetch_add(1, Ordering::Relaxed),
                this: this.clone(),
                root: this.clone(),
                config: Rc::new(config),
                parent: RefCell::new(None),
                sealed_options: RefCell::new(Rc::clone(&options)),
                options: RefCell::new(options),
                super_options: RefCell::new(None),
                extend_options: RefCell::new(Rc::new(OptionBag::new())),
            }
        });
        tracing::debug!(cid = ctor.cid, "root constructor created");
        ctor
    }

    #[must_use]
    pub fn cid(&self) -> u64 {
        self.cid
    }

    #[must_use]
    pub fn parent(&self) -> Option<Rc<Constructor>> {
        self.parent.borrow().clone()
    }

    /// The root this constructor was (transitively) extended from.
    #[must_use]
    pub fn root(&self) -> Option<Rc<Constructor>> {
        self.root.upgrade()
    }

    #[must_use]
    pub fn config(&self) -> &OptionsConfig {
        &self.config
    }

    /// Current options, without re-resolution.
    #[must_use]
    pub fn options(&self) -> Rc<OptionBag> {
        Rc::clone(&self.options.borrow())
    }

    #[must_use]
    pub fn super_options(&self) -> Option<Rc<OptionBag>> {
        self.super_options.borrow().clone()
    }

    #[must_use]
    pub fn extend_options(&self) -> Rc<OptionBag> {
        Rc::clone(&self.extend_options.borrow())
    }

    #[must_use]
    pub fn sealed_options(&self) -> Rc<OptionBag> {
        Rc::clone(&self.sealed_options.borrow())
    }

    #[must_use]
    pub fn name(&self) -> Option<String> {
        self.options.borrow().name().map(str::to_owned)
    }

    /// Create a subclass whose options are `extend_options` merged onto
    /// this constructor's current options.
    pub fn extend(self: &Rc<Self>, extend_options: OptionBag) -> Rc<Constructor> {
        let extend_options = Rc::new(extend_options);
        let super_options = self.options();
        let name = extend_options
            .name()
            .or_else(|| super_options.name())
            .map(str::to_owned);
        if let Some(name) = &name
            && !valid_component_name(name)
        {
            OptionsWarning::InvalidComponentName { name: name.clone() }.report();
        }

        let options = Rc::new(merge_options(
            &super_options,
            &extend_options,
            MergeContext::Extend,
        ));
        let sub = Rc::new_cyclic(|this: &Weak<Self>| {
            if let Some(name) = &name
                && let Some(components) = options.assets(AssetKind::Component)
            {
                components.register(name, Asset::SelfComponent(this.clone()));
            }
            Self {
                cid: NEXT_CID.fetch_add(1, Ordering::Relaxed),
                this: this.clone(),
                root: self.root.clone(),
                config: Rc::clone(&self.config),
                parent: RefCell::new(Some(Rc::clone(self))),
                sealed_options: RefCell::new(Rc::new((*options).clone())),
                options: RefCell::new(options),
                super_options: RefCell::new(Some(super_options)),
                extend_options: RefCell::new(extend_options),
            }
        });
        tracing::debug!(
            cid = sub.cid,
            parent = self.cid,
            name = name.as_deref(),
            "constructor extended"
        );
        sub
    }

    /// Merge `mixin` into this constructor's options. The options handle
    /// changes, so subclasses re-resolve on their next resolution.
    pub fn mixin(&self, mixin: OptionBag) {
        let merged = merge_options(&self.options(), &mixin, MergeContext::Extend);
        *self.options.borrow_mut() = Rc::new(merged);
        tracing::debug!(cid = self.cid, "mixin applied");
    }

    /// Replace the parent constructor.
    pub fn set_parent(&self, parent: Option<Rc<Constructor>>) {
        tracing::debug!(
            cid = self.cid,
            parent = parent.as_ref().map(|p| p.cid),
            "constructor re-parented"
        );
        *self.parent.borrow_mut() = parent;
    }

    // ── assets ──────────────────────────────────────────────────────────

    /// Look an asset up through this constructor's current registries.
    #[must_use]
    pub fn asset(&self, kind: AssetKind, id: &str) -> Option<Asset> {
        self.options.borrow().assets(kind)?.get(id)
    }

    /// Register an asset on this constructor's own registry layer.
    pub fn register_asset(&self, kind: AssetKind, id: &str, asset: Asset) {
        if kind == AssetKind::Component && self.config.is_reserved_tag(id) {
            OptionsWarning::ReservedComponentId { id: id.to_owned() }.report();
        }
        if let Some(registry) = self.options.borrow().assets(kind) {
            registry.register(id, asset);
        }
    }

    pub fn component(&self, id: &str, ctor: Rc<Constructor>) {
        self.register_asset(AssetKind::Component, id, Asset::Component(ctor));
    }

    /// Register a component from plain options, extending the root
    /// constructor. The component's name defaults to `id`.
    pub fn component_options(&self, id: &str, options: OptionBag) -> Rc<Constructor> {
        let options = if options.name().is_some() {
            options
        } else {
            options.named(id)
        };
        let root = self
            .root()
            .or_else(|| self.this.upgrade())
            .unwrap_or_else(Constructor::base);
        let ctor = root.extend(options);
        self.component(id, Rc::clone(&ctor));
        ctor
    }

    #[must_use]
    pub fn lookup_component(&self, id: &str) -> Option<Rc<Constructor>> {
        self.asset(AssetKind::Component, id)?.constructor()
    }

    pub fn directive(&self, id: &str, def: DirectiveDef) {
        self.register_asset(AssetKind::Directive, id, Asset::Directive(Rc::new(def)));
    }

    /// Register a function directive, used for both `bind` and `update`.
    pub fn directive_fn(&self, id: &str, f: Func) {
        self.directive(id, DirectiveDef::from_fn(f));
    }

    pub fn filter(&self, id: &str, f: Func) {
        self.register_asset(AssetKind::Filter, id, Asset::Filter(f));
    }

    // ── resolution ──────────────────────────────────────────────────────

    /// Options with every ancestor change folded in.
    pub fn resolve_options(&self) -> Result<Rc<OptionBag>, OptionsError> {
        let mut visited = AHashSet::new();
        self.resolve_with(&mut visited)
    }

    fn resolve_with(&self, visited: &mut AHashSet<u64>) -> Result<Rc<OptionBag>, OptionsError> {
        if !visited.insert(self.cid) {
            return Err(OptionsError::InheritanceCycle { cid: self.cid });
        }
        let Some(parent) = self.parent() else {
            return Ok(self.options());
        };
        let super_options = parent.resolve_with(visited)?;
        let unchanged = self
            .super_options
            .borrow()
            .as_ref()
            .is_some_and(|cached| Rc::ptr_eq(cached, &super_options));
        if unchanged {
            return Ok(self.options());
        }

        tracing::debug!(cid = self.cid, parent = parent.cid, "super options changed, re-resolving");
        *self.super_options.borrow_mut() = Some(Rc::clone(&super_options));
        if let Some(modified) = self.resolve_modified_options() {
            let mut extend_options = (*self.extend_options()).clone();
            for (key, value) in modified {
                extend_options.set_entry(&key, value);
            }
            *self.extend_options.borrow_mut() = Rc::new(extend_options);
        }

        let merged = Rc::new(merge_options(
            &super_options,
            &self.extend_options(),
            MergeContext::Extend,
        ));
        if let Some(name) = merged.name()
            && let Some(components) = merged.assets(AssetKind::Component)
        {
            components.register(name, Asset::SelfComponent(self.this.clone()));
        }
        *self.options.borrow_mut() = Rc::clone(&merged);
        *self.sealed_options.borrow_mut() = Rc::new((*merged).clone());
        Ok(merged)
    }

    /// Categories whose handle differs from the sealed snapshot, each
    /// passed through [`dedupe`].
    #[must_use]
    pub fn resolve_modified_options(&self) -> Option<IndexMap<String, OptionValue>> {
        let latest = self.options();
        let sealed = self.sealed_options();
        let extended = self.extend_options();
        let mut modified: Option<IndexMap<String, OptionValue>> = None;
        for (key, value) in latest.iter() {
            let sealed_value = sealed.get(key);
            if sealed_value.is_some_and(|s| s.same(value)) {
                continue;
            }
            modified
                .get_or_insert_with(IndexMap::new)
                .insert(key.to_owned(), dedupe(value, extended.get(key), sealed_value));
        }
        modified
    }
}

fn hook_identities(value: Option<&OptionValue>) -> AHashSet<usize> {
    match value {
        Some(OptionValue::Hooks(hooks)) => hooks.iter().map(Func::addr).collect(),
        Some(OptionValue::Value(kinetic_observer::Value::Func(f))) => [f.addr()].into_iter().collect(),
        _ => AHashSet::new(),
    }
}

/// Drop hooks the sealed snapshot already had, unless the constructor's own
/// extend options declare them. Non-hook values pass through.
///
/// Unlike a plain latest-minus-sealed difference, the constructor's own hooks
/// always survive, so they are not lost when an ancestor changes.
#[must_use]
pub fn dedupe(
    latest: &OptionValue,
    extended: Option<&OptionValue>,
    sealed: Option<&OptionValue>,
) -> OptionValue {
    let OptionValue::Hooks(hooks) = latest else {
        return latest.clone();
    };
    let own = hook_identities(extended);
    let seen = hook_identities(sealed);
    let kept: Vec<Func> = hooks
        .iter()
        .filter(|hook| own.contains(&hook.addr()) || !seen.contains(&hook.addr()))
        .cloned()
        .collect();
    OptionValue::Hooks(kept.into())
}

impl fmt::Debug for Constructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Constructor")
            .field("cid", &self.cid)
            .field("parent", &self.parent.borrow().as_ref().map(|p| p.cid))
            .field("name", &self.name())
            .finish()
    }
}

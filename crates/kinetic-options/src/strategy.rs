#![forbid(unsafe_code)]

//! Option merge strategies.
//!
//! [`merge_options`] combines a parent bag with a child bag key by key, using
//! the strategy registered for the key:
//!
//! | key | strategy |
//! |---|---|
//! | lifecycle hooks | concatenate, parent first |
//! | `data` | compose factories; child state wins, nested plain objects merge |
//! | `props`, `methods`, `computed` | extend, child wins per key |
//! | `watch` | concatenate handlers per expression |
//! | `components`, `directives`, `filters` | new layer over the parent registry |
//! | `el`, `propsData` | child wins; instance creation only |
//! | anything else | child wins when present |
//!
//! A strategy that leaves a value untouched returns the same handle, which is
//! what lets option resolution detect change by identity.

use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;
use indexmap::IndexMap;
use kinetic_observer::{Func, Value, mutation};

use crate::bag::{AssetKind, AssetRegistry, OptionBag, OptionValue, is_lifecycle_hook};
use crate::error::OptionsWarning;

/// Whether options are merged for a constructor definition or for a live
/// instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeContext {
    Extend,
    Instance,
}

/// User strategy: `(parent, child, context) -> merged`.
pub type MergeStrategy =
    Rc<dyn Fn(Option<&OptionValue>, Option<&OptionValue>, MergeContext) -> Option<OptionValue>>;

thread_local! {
    static CUSTOM_STRATEGIES: RefCell<AHashMap<String, MergeStrategy>> = RefCell::new(AHashMap::new());
}

/// Register (or with `None`, remove) a strategy for `key`, overriding the
/// built-in one. Returns the previously registered strategy.
pub fn set_merge_strategy(key: &str, strategy: Option<MergeStrategy>) -> Option<MergeStrategy> {
    CUSTOM_STRATEGIES.with(|strategies| {
        let mut strategies = strategies.borrow_mut();
        match strategy {
            Some(strategy) => strategies.insert(key.to_owned(), strategy),
            None => strategies.remove(key),
        }
    })
}

fn custom_strategy(key: &str) -> Option<MergeStrategy> {
    CUSTOM_STRATEGIES.with(|strategies| strategies.borrow().get(key).cloned())
}

/// Merge `child` onto `parent`.
///
/// The child's `extends` is merged into the parent first, then each of its
/// mixins in order. The result carries no mixins or `extends` of its own.
#[must_use]
pub fn merge_options(parent: &OptionBag, child: &OptionBag, ctx: MergeContext) -> OptionBag {
    let mut folded: Option<OptionBag> = None;
    if let Some(base) = child.extends_from() {
        folded = Some(merge_options(parent, base, ctx));
    }
    for mixin in child.mixins() {
        let next = merge_options(folded.as_ref().unwrap_or(parent), mixin, ctx);
        folded = Some(next);
    }
    let parent = folded.as_ref().unwrap_or(parent);

    let mut merged = OptionBag::new();
    let keys = parent
        .keys()
        .chain(child.keys().filter(|key| !parent.contains_key(key)));
    for key in keys {
        if let Some(value) = merge_field(key, parent.get(key), child.get(key), ctx) {
            merged.set_entry(key, value);
        }
    }
    tracing::trace!(keys = merged.len(), ?ctx, "options merged");
    merged
}

fn merge_field(
    key: &str,
    parent: Option<&OptionValue>,
    child: Option<&OptionValue>,
    ctx: MergeContext,
) -> Option<OptionValue> {
    if let Some(strategy) = custom_strategy(key) {
        return strategy(parent, child, ctx);
    }
    if is_lifecycle_hook(key) {
        return merge_hooks(parent, child);
    }
    if let Some(kind) = AssetKind::from_option_key(key) {
        return Some(merge_assets(kind, parent, child));
    }
    match key {
        "data" => merge_data_option(parent, child, ctx),
        "props" | "methods" | "computed" => merge_maps(parent, child),
        "watch" => merge_watch(parent, child),
        "el" | "propsData" => {
            if ctx == MergeContext::Extend {
                OptionsWarning::InstanceOnly {
                    key: key.to_owned(),
                }
                .report();
            }
            default_merge(parent, child)
        }
        _ => default_merge(parent, child),
    }
}

/// Child wins when present.
#[must_use]
pub fn default_merge(parent: Option<&OptionValue>, child: Option<&OptionValue>) -> Option<OptionValue> {
    child.or(parent).cloned()
}

/// Parent hooks followed by child hooks. An absent child keeps the parent
/// list handle.
#[must_use]
pub fn merge_hooks(parent: Option<&OptionValue>, child: Option<&OptionValue>) -> Option<OptionValue> {
    let Some(child) = child else {
        return parent.cloned();
    };
    let child_hooks: Rc<[Func]> = match child {
        OptionValue::Hooks(hooks) => Rc::clone(hooks),
        OptionValue::Value(Value::Func(f)) => Rc::from([f.clone()]),
        other => return Some(other.clone()),
    };
    match parent.and_then(OptionValue::as_hooks) {
        Some(parent_hooks) => {
            let mut all = parent_hooks.to_vec();
            all.extend(child_hooks.iter().cloned());
            Some(OptionValue::Hooks(all.into()))
        }
        None => Some(OptionValue::Hooks(child_hooks)),
    }
}

fn merge_assets(
    kind: AssetKind,
    parent: Option<&OptionValue>,
    child: Option<&OptionValue>,
) -> OptionValue {
    let registry = AssetRegistry::layered(kind, parent.and_then(OptionValue::as_assets).cloned());
    if let Some(child) = child.and_then(OptionValue::as_assets) {
        for (id, asset) in child.visible() {
            registry.register(&id, asset);
        }
    }
    OptionValue::Assets(Rc::new(registry))
}

fn merge_maps(parent: Option<&OptionValue>, child: Option<&OptionValue>) -> Option<OptionValue> {
    match (parent.and_then(OptionValue::as_map), child.and_then(OptionValue::as_map)) {
        (Some(parent), Some(child)) => {
            let mut merged = (**parent).clone();
            merged.extend(child.iter().map(|(k, v)| (k.clone(), v.clone())));
            Some(OptionValue::Map(Rc::new(merged)))
        }
        _ => default_merge(parent, child),
    }
}

fn merge_watch(parent: Option<&OptionValue>, child: Option<&OptionValue>) -> Option<OptionValue> {
    match (parent.and_then(OptionValue::as_watch), child.and_then(OptionValue::as_watch)) {
        (Some(parent), Some(child)) => {
            let mut merged: IndexMap<String, Rc<[Value]>> = (**parent).clone();
            for (expression, handlers) in child.iter() {
                let combined: Rc<[Value]> = match merged.get(expression) {
                    Some(existing) => existing.iter().chain(handlers.iter()).cloned().collect(),
                    None => Rc::clone(handlers),
                };
                merged.insert(expression.clone(), combined);
            }
            Some(OptionValue::Watch(Rc::new(merged)))
        }
        _ => default_merge(parent, child),
    }
}

fn merge_data_option(
    parent: Option<&OptionValue>,
    child: Option<&OptionValue>,
    ctx: MergeContext,
) -> Option<OptionValue> {
    match ctx {
        MergeContext::Extend => {
            let Some(child) = child else {
                return parent.cloned();
            };
            let OptionValue::Data(child_fn) = child else {
                OptionsWarning::DataNotFunction.report();
                return parent.cloned();
            };
            let Some(OptionValue::Data(parent_fn)) = parent else {
                return Some(child.clone());
            };
            let (child_fn, parent_fn) = (child_fn.clone(), parent_fn.clone());
            Some(OptionValue::Data(Func::new(move |args| {
                merge_data(&child_fn.call(args), &parent_fn.call(args))
            })))
        }
        MergeContext::Instance => {
            if parent.is_none() && child.is_none() {
                return None;
            }
            let (parent, child) = (parent.cloned(), child.cloned());
            Some(OptionValue::Data(Func::new(move |args| {
                let instance_data = match &child {
                    Some(OptionValue::Data(f)) => f.call(args),
                    Some(OptionValue::Value(v)) => v.clone(),
                    _ => Value::Undefined,
                };
                let default_data = match &parent {
                    Some(OptionValue::Data(f)) => f.call(args),
                    _ => Value::Undefined,
                };
                match instance_data {
                    Value::Object(_) => merge_data(&instance_data, &default_data),
                    Value::Undefined | Value::Null => default_data,
                    other => other,
                }
            })))
        }
    }
}

/// Copy keys of `from` missing in `to` (through `set`, so an observed `to`
/// gets reactive slots), recursing into plain objects present in both.
fn merge_data(to: &Value, from: &Value) -> Value {
    let (Some(to_obj), Some(from_obj)) = (to.as_object(), from.as_object()) else {
        return to.clone();
    };
    for key in from_obj.keys() {
        let from_val = from_obj.get(&key);
        if !to_obj.has_own(&key) {
            mutation::set(to, key.as_str(), from_val);
        } else {
            let to_val = to_obj.get(&key);
            if to_val.is_plain_object() && from_val.is_plain_object() {
                merge_data(&to_val, &from_val);
            }
        }
    }
    to.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kinetic_observer::ObjectRef;
    use kinetic_observer::diagnostics::{DiagnosticKind, capture_warnings};

    fn noop() -> Func {
        Func::new(|_| Value::Undefined)
    }

    fn factory(entries: Vec<(&'static str, Value)>) -> Func {
        Func::new(move |_| Value::from(ObjectRef::from_entries(entries.clone())))
    }

    #[test]
    fn hooks_concatenate_parent_first() {
        let (p, c) = (noop(), noop());
        let parent = OptionBag::new().hook("created", p.clone());
        let child = OptionBag::new().hook("created", c.clone());
        let merged = merge_options(&parent, &child, MergeContext::Extend);
        let hooks = merged.hooks("created");
        assert_eq!(hooks.len(), 2);
        assert!(hooks[0].ptr_eq(&p));
        assert!(hooks[1].ptr_eq(&c));
    }

    #[test]
    fn untouched_hooks_keep_their_handle() {
        let parent = OptionBag::new().hook("created", noop());
        let merged = merge_options(&parent, &OptionBag::new(), MergeContext::Extend);
        assert!(merged.get("created").expect("hooks").same(parent.get("created").expect("hooks")));
    }

    #[test]
    fn mixins_apply_after_extends() {
        let (base, mixed, own) = (noop(), noop(), noop());
        let child = OptionBag::new()
            .hook("created", own.clone())
            .mixin(OptionBag::new().hook("created", mixed.clone()))
            .extends(OptionBag::new().hook("created", base.clone()));
        let merged = merge_options(&OptionBag::new(), &child, MergeContext::Extend);
        let hooks = merged.hooks("created");
        assert_eq!(hooks.len(), 3);
        assert!(hooks[0].ptr_eq(&base));
        assert!(hooks[1].ptr_eq(&mixed));
        assert!(hooks[2].ptr_eq(&own));
        assert!(merged.mixins().is_empty());
    }

    #[test]
    fn methods_extend_with_child_winning() {
        let (a, b1, b2) = (noop(), noop(), noop());
        let parent = OptionBag::new().method("a", a.clone()).method("b", b1);
        let child = OptionBag::new().method("b", b2.clone());
        let merged = merge_options(&parent, &child, MergeContext::Extend);
        let methods = merged.map("methods").expect("methods");
        assert!(methods["a"].as_func().is_some_and(|f| f.ptr_eq(&a)));
        assert!(methods["b"].as_func().is_some_and(|f| f.ptr_eq(&b2)));
    }

    #[test]
    fn watch_handlers_concatenate() {
        let parent = OptionBag::new().watch("x", "first");
        let child = OptionBag::new().watch("x", "second").watch("y", "third");
        let merged = merge_options(&parent, &child, MergeContext::Extend);
        let watch = merged.watchers().expect("watch");
        assert_eq!(&*watch["x"], &[Value::from("first"), Value::from("second")]);
        assert_eq!(watch["y"].len(), 1);
    }

    #[test]
    fn assets_layer_over_parent_registry() {
        let parent = OptionBag::new().filter("upper", noop());
        let child = OptionBag::new().filter("lower", noop());
        let merged = merge_options(&parent, &child, MergeContext::Extend);
        let filters = merged.assets(AssetKind::Filter).expect("filters");
        assert!(filters.get_own("lower").is_some());
        assert!(filters.get_own("upper").is_none());
        assert!(filters.contains("upper"));
    }

    #[test]
    fn data_factories_compose_child_first() {
        let parent = OptionBag::new().data(factory(vec![
            ("shared", Value::from("parent")),
            ("inherited", Value::from(1)),
        ]));
        let child = OptionBag::new().data(factory(vec![("shared", Value::from("child"))]));
        let merged = merge_options(&parent, &child, MergeContext::Extend);
        let Some(OptionValue::Data(f)) = merged.get("data") else {
            panic!("data should be a factory");
        };
        let state = f.call(&[]);
        let state = state.as_object().expect("object");
        assert_eq!(state.get("shared"), Value::from("child"));
        assert_eq!(state.get("inherited"), Value::from(1));
    }

    #[test]
    fn nested_data_objects_merge_recursively() {
        let parent = OptionBag::new().data(Func::new(|_| {
            Value::from(ObjectRef::from_entries([(
                "nested",
                ObjectRef::from_entries([("a", 1), ("b", 2)]),
            )]))
        }));
        let child = OptionBag::new().data(Func::new(|_| {
            Value::from(ObjectRef::from_entries([(
                "nested",
                ObjectRef::from_entries([("b", 20)]),
            )]))
        }));
        let merged = merge_options(&parent, &child, MergeContext::Extend);
        let Some(OptionValue::Data(f)) = merged.get("data") else {
            panic!("data should be a factory");
        };
        let nested = f.call(&[]).as_object().expect("object").get("nested");
        let nested = nested.as_object().expect("nested");
        assert_eq!(nested.get("a"), Value::from(1));
        assert_eq!(nested.get("b"), Value::from(20));
    }

    #[test]
    fn literal_data_in_definition_is_rejected() {
        let child = OptionBag::new().data_object(ObjectRef::new());
        let (merged, warnings) =
            capture_warnings(|| merge_options(&OptionBag::new(), &child, MergeContext::Extend));
        assert!(merged.get("data").is_none());
        assert_eq!(warnings[0].kind, DiagnosticKind::InvalidOption);
    }

    #[test]
    fn literal_data_is_accepted_for_instances() {
        let parent = OptionBag::new().data(factory(vec![("a", Value::from(1))]));
        let literal = ObjectRef::from_entries([("b", 2)]);
        let child = OptionBag::new().data_object(literal.clone());
        let merged = merge_options(&parent, &child, MergeContext::Instance);
        let Some(OptionValue::Data(f)) = merged.get("data") else {
            panic!("data should be a factory");
        };
        let state = f.call(&[]);
        assert!(state.as_object().is_some_and(|o| o.ptr_eq(&literal)));
        assert_eq!(literal.get("a"), Value::from(1));
    }

    #[test]
    fn el_outside_instance_creation_warns() {
        let child = OptionBag::new().insert("el", OptionValue::Value(Value::from("#app")));
        let ((), warnings) = capture_warnings(|| {
            let _ = merge_options(&OptionBag::new(), &child, MergeContext::Extend);
            let _ = merge_options(&OptionBag::new(), &child, MergeContext::Instance);
        });
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("`el`"));
    }

    #[test]
    fn custom_strategy_overrides_default() {
        let strategy: MergeStrategy =
            Rc::new(|_: Option<&OptionValue>, _: Option<&OptionValue>, _: MergeContext| {
                Some(OptionValue::Value(Value::from(42)))
            });
        let previous = set_merge_strategy("answer", Some(strategy));
        assert!(previous.is_none());
        let child = OptionBag::new().insert("answer", OptionValue::Value(Value::from(1)));
        let merged = merge_options(&OptionBag::new(), &child, MergeContext::Extend);
        set_merge_strategy("answer", None);
        assert_eq!(merged.get("answer").and_then(OptionValue::as_value), Some(&Value::from(42)));
    }
}

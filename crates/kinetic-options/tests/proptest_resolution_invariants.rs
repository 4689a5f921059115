//! Property-based invariant tests for option resolution.
//!
//! Over arbitrary interleavings of mixins on a three-level chain
//! (`base -> a -> d`) and resolutions of either subclass:
//!
//! 1. Every hook appears in a resolved hook list exactly once.
//! 2. Resolved hooks follow declaration order: root mixins, the middle
//!    class and its mixins, then the leaf and its mixins.
//! 3. Resolving twice without an intervening change yields the same handle.

use std::rc::Rc;

use kinetic_observer::{Func, Value};
use kinetic_options::{Constructor, OptionBag};
use proptest::prelude::*;

#[derive(Debug, Clone, Copy)]
enum Op {
    MixinBase,
    MixinA,
    MixinD,
    ResolveA,
    ResolveD,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::MixinBase),
        Just(Op::MixinA),
        Just(Op::MixinD),
        Just(Op::ResolveA),
        Just(Op::ResolveD),
    ]
}

fn hook() -> Func {
    Func::new(|_| Value::Undefined)
}

fn addrs(hooks: &[Func]) -> Vec<usize> {
    hooks.iter().map(Func::addr).collect()
}

#[derive(Default)]
struct Model {
    base: Vec<Func>,
    a: Vec<Func>,
    d: Vec<Func>,
}

impl Model {
    fn expected_a(&self) -> Vec<usize> {
        addrs(&[self.base.clone(), self.a.clone()].concat())
    }

    fn expected_d(&self) -> Vec<usize> {
        addrs(&[self.base.clone(), self.a.clone(), self.d.clone()].concat())
    }
}

fn resolved(ctor: &Rc<Constructor>) -> Vec<usize> {
    let options = ctor.resolve_options().expect("resolve");
    addrs(options.hooks("created"))
}

proptest! {
    #[test]
    fn mixins_reach_subclasses_exactly_once(ops in proptest::collection::vec(op_strategy(), 0..24)) {
        let base = Constructor::base();
        let mut model = Model::default();

        let own_a = hook();
        let a = base.extend(OptionBag::new().hook("created", own_a.clone()));
        model.a.push(own_a);
        let own_d = hook();
        let d = a.extend(OptionBag::new().hook("created", own_d.clone()));
        model.d.push(own_d);

        for op in ops {
            match op {
                Op::MixinBase => {
                    let h = hook();
                    base.mixin(OptionBag::new().hook("created", h.clone()));
                    model.base.push(h);
                }
                Op::MixinA => {
                    let h = hook();
                    a.mixin(OptionBag::new().hook("created", h.clone()));
                    model.a.push(h);
                }
                Op::MixinD => {
                    let h = hook();
                    d.mixin(OptionBag::new().hook("created", h.clone()));
                    model.d.push(h);
                }
                Op::ResolveA => prop_assert_eq!(resolved(&a), model.expected_a()),
                Op::ResolveD => prop_assert_eq!(resolved(&d), model.expected_d()),
            }
        }

        prop_assert_eq!(resolved(&d), model.expected_d());
        prop_assert_eq!(resolved(&a), model.expected_a());
    }

    #[test]
    fn resolution_is_stable_without_changes(mixins in 0usize..5) {
        let base = Constructor::base();
        let a = base.extend(OptionBag::new());
        let d = a.extend(OptionBag::new().named("leaf"));
        for _ in 0..mixins {
            a.mixin(OptionBag::new().hook("mounted", hook()));
        }

        let first = d.resolve_options().expect("resolve");
        let second = d.resolve_options().expect("resolve");
        prop_assert!(Rc::ptr_eq(&first, &second));
        prop_assert_eq!(first.hooks("mounted").len(), mixins);
    }
}

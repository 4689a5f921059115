#![forbid(unsafe_code)]

//! Component options: declaration, merging, and resolution.
//!
//! - [`OptionBag`] describes a component: hooks, state, methods, assets.
//! - [`merge_options`] combines a parent bag with a child bag, one strategy
//!   per option category.
//! - [`Constructor`] holds merged options along an inheritance chain and
//!   re-resolves them lazily when an ancestor changes.
//! - [`Instance`] turns resolved options into live reactive state.
//!
//! # Example
//!
//! ```
//! use kinetic_observer::{Func, Value};
//! use kinetic_options::{Constructor, OptionBag};
//!
//! let base = Constructor::base();
//! let child = base.extend(OptionBag::new().named("child").hook("created", Func::new(|_| Value::Undefined)));
//! let options = child.resolve_options().unwrap();
//! assert_eq!(options.hooks("created").len(), 1);
//! ```

pub mod bag;
pub mod constructor;
pub mod error;
pub mod instance;
pub mod strategy;

pub use bag::{
    Asset, AssetKind, AssetRegistry, DirectiveDef, LIFECYCLE_HOOKS, OptionBag, OptionValue,
};
pub use constructor::{Constructor, OptionsConfig, dedupe};
pub use error::{OptionsError, OptionsWarning};
pub use instance::Instance;
pub use strategy::{MergeContext, MergeStrategy, merge_options, set_merge_strategy};

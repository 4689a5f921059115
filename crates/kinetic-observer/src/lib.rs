#![forbid(unsafe_code)]

//! Dependency-tracking reactivity core.
//!
//! Plain data ([`Value`]) is converted in place into observed state:
//!
//! - [`observe`] attaches an [`Observer`] to an object or array.
//! - Each object key becomes a [`ReactiveSlot`] whose reads register the
//!   active [`Subscriber`] on a [`Dep`] and whose writes notify it.
//! - [`ArrayRef`] mutators notify the array's Observer Dep.
//! - [`set`] and [`del`] add and remove tracked keys after observation.
//!
//! # Architecture
//!
//! Everything is single-threaded and synchronous: `Rc`/`RefCell` ownership,
//! a thread-local stack of active subscribers, and notification on the
//! writer's call stack. Deps hold subscribers weakly; Observers hold their
//! value weakly. A composite value owns its Observer.
//!
//! [`Watcher`] is a minimal subscriber that re-runs a getter on change.

pub mod array;
pub mod config;
pub mod dep;
pub mod diagnostics;
pub mod mutation;
pub mod object;
pub mod observer;
pub mod value;
pub mod watcher;

pub use array::ArrayRef;
pub use config::ReactivityConfig;
pub use dep::{Dep, DepId, Subscriber, SubscriberId, TargetGuard, untracked};
pub use diagnostics::{Diagnostic, DiagnosticKind, ReactivityWarning};
pub use mutation::{Key, MutationOutcome, del, set};
pub use object::{ObjectKind, ObjectRef, Property, PropertySlot};
pub use observer::{Observer, ReactiveSlot, define_reactive, define_reactive_with, observe};
pub use value::{Func, Value};
pub use watcher::Watcher;

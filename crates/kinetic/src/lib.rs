#![forbid(unsafe_code)]

//! kinetic public facade crate.
//!
//! Re-exports the reactivity core and, with the `options` feature (on by
//! default), component options and instances.

pub use kinetic_observer::{
    ArrayRef, Func, MutationOutcome, ObjectRef, ReactivityConfig, Value, Watcher, del, observe,
    set,
};
#[cfg(feature = "options")]
pub use kinetic_options::{Constructor, Instance, OptionBag, OptionsError};

pub mod prelude {
    pub use kinetic_observer as observer;
    #[cfg(feature = "options")]
    pub use kinetic_options as options;
}

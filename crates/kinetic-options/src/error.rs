#![forbid(unsafe_code)]

//! Errors and diagnostics raised by option handling.

use kinetic_observer::diagnostics::{self, DiagnosticKind};

/// Hard failures of option resolution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OptionsError {
    /// The constructor's ancestor chain loops back on itself.
    #[error("constructor {cid} appears twice in its own ancestor chain")]
    InheritanceCycle { cid: u64 },
}

/// Non-fatal option problems, reported through the diagnostics channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OptionsWarning {
    #[error("option `{key}` can only be used during instance creation")]
    InstanceOnly { key: String },
    #[error("the `data` option should be a function that returns a per-instance value in component definitions")]
    DataNotFunction,
    #[error("data functions should return an object")]
    DataNotObject,
    #[error("do not use built-in or reserved element names as component id: {id}")]
    ReservedComponentId { id: String },
    #[error(
        "invalid component name `{name}`: component names may only contain alphanumeric characters and hyphens, and must start with a letter"
    )]
    InvalidComponentName { name: String },
    #[error("method `{key}` has an undefined value in the component definition")]
    UndefinedMethod { key: String },
    #[error("`{key}` is already declared as a {declared_as}")]
    DuplicateKey {
        key: String,
        declared_as: &'static str,
    },
    #[error("avoid mutating prop `{key}` directly; it is overwritten whenever the parent re-renders")]
    PropMutation { key: String },
    #[error("watch handler for `{key}` is not a function or method name")]
    InvalidWatchHandler { key: String },
}

impl OptionsWarning {
    #[must_use]
    pub fn kind(&self) -> DiagnosticKind {
        match self {
            Self::PropMutation { .. } | Self::ReservedComponentId { .. } => {
                DiagnosticKind::UsageViolation
            }
            _ => DiagnosticKind::InvalidOption,
        }
    }

    pub fn report(self) {
        diagnostics::report(self.kind(), self.to_string());
    }
}

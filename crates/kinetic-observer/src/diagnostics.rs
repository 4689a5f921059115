#![forbid(unsafe_code)]

//! Development-time diagnostics.
//!
//! The reactivity core has no hard failures: refused or skipped operations
//! return normally and, when [`ReactivityConfig::diagnostics`] is on, raise a
//! [`Diagnostic`]. Diagnostics go to the installed warn handler, or to
//! `tracing::warn!` when none is installed and the config is not silent.
//!
//! [`ReactivityConfig::diagnostics`]: crate::config::ReactivityConfig::diagnostics

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::config;

/// Category of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    /// The caller did something the engine refuses (e.g. adding keys to root
    /// state).
    UsageViolation,
    /// The target cannot be made reactive.
    UnsupportedTarget,
    /// An option value is malformed or used in the wrong context.
    InvalidOption,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::UsageViolation => "usage violation",
            Self::UnsupportedTarget => "unsupported target",
            Self::InvalidOption => "invalid option",
        })
    }
}

/// One reported diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
}

/// Conditions reported by the reactivity core.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReactivityWarning {
    #[error(
        "avoid adding reactive property `{key}` to a root instance or its root state at runtime; declare it upfront in the data option"
    )]
    AddToRootState { key: String },
    #[error("avoid deleting property `{key}` from a root instance or its root state; set it to null instead")]
    DeleteFromRootState { key: String },
    #[error("property `{key}` is non-configurable and cannot be made reactive")]
    NonConfigurable { key: String },
    #[error("cannot add property `{key}`: the object is not extensible")]
    NotExtensible { key: String },
    #[error("cannot {operation} property `{key}` on a primitive value")]
    PrimitiveTarget { operation: &'static str, key: String },
    #[error("array key `{key}` is not a valid index")]
    InvalidArrayKey { key: String },
    #[error("writing index {index} would grow the array past {limit} elements")]
    ArrayLengthLimit { index: usize, limit: usize },
}

impl ReactivityWarning {
    #[must_use]
    pub fn kind(&self) -> DiagnosticKind {
        match self {
            Self::AddToRootState { .. } | Self::DeleteFromRootState { .. } => {
                DiagnosticKind::UsageViolation
            }
            Self::NonConfigurable { .. }
            | Self::NotExtensible { .. }
            | Self::PrimitiveTarget { .. }
            | Self::InvalidArrayKey { .. }
            | Self::ArrayLengthLimit { .. } => DiagnosticKind::UnsupportedTarget,
        }
    }

    pub fn report(self) {
        report(self.kind(), self.to_string());
    }
}

type WarnHandler = Rc<dyn Fn(&Diagnostic)>;

thread_local! {
    static HANDLER: RefCell<Option<WarnHandler>> = const { RefCell::new(None) };
}

/// Raise a diagnostic. No-op unless diagnostics are enabled.
pub fn report(kind: DiagnosticKind, message: impl Into<String>) {
    let config = config::current();
    if !config.diagnostics {
        return;
    }
    let diagnostic = Diagnostic {
        kind,
        message: message.into(),
    };
    // Clone out so the handler may report recursively.
    let handler = HANDLER.with(|h| h.borrow().clone());
    match handler {
        Some(handler) => handler(&diagnostic),
        None if !config.silent => {
            tracing::warn!(kind = %diagnostic.kind, "{}", diagnostic.message);
        }
        None => {}
    }
}

/// Install a handler for diagnostics on this thread; returns the previous
/// one. `None` restores the default `tracing` sink.
pub fn set_warn_handler(handler: Option<Rc<dyn Fn(&Diagnostic)>>) -> Option<Rc<dyn Fn(&Diagnostic)>> {
    HANDLER.with(|h| h.replace(handler))
}

/// Run `f` with diagnostics enabled and collect everything it reports.
pub fn capture_warnings<R>(f: impl FnOnce() -> R) -> (R, Vec<Diagnostic>) {
    struct Restore(Option<Option<WarnHandler>>);
    impl Drop for Restore {
        fn drop(&mut self) {
            if let Some(previous) = self.0.take() {
                set_warn_handler(previous);
            }
        }
    }

    let sink: Rc<RefCell<Vec<Diagnostic>>> = Rc::default();
    let collect = Rc::clone(&sink);
    let restore = Restore(Some(set_warn_handler(Some(Rc::new(move |d: &Diagnostic| {
        collect.borrow_mut().push(d.clone());
    })))));
    let result = config::scoped(config::current().with_diagnostics(true), f);
    drop(restore);
    let captured = sink.take();
    (result, captured)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn disabled_diagnostics_report_nothing() {
        let seen = Rc::new(RefCell::new(0));
        let counted = Rc::clone(&seen);
        let previous = set_warn_handler(Some(Rc::new(move |_: &Diagnostic| {
            *counted.borrow_mut() += 1;
        })));
        config::scoped(config::current().with_diagnostics(false), || {
            report(DiagnosticKind::UsageViolation, "ignored");
        });
        set_warn_handler(previous);
        assert_eq!(*seen.borrow(), 0);
    }

    #[test]
    fn capture_collects_and_restores_handler() {
        let ((), captured) = capture_warnings(|| {
            ReactivityWarning::InvalidArrayKey { key: "x".into() }.report();
        });
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].kind, DiagnosticKind::UnsupportedTarget);
        assert!(captured[0].message.contains("`x`"));
        assert!(HANDLER.with(|h| h.borrow().is_none()));
    }

    #[test]
    fn warning_kinds() {
        assert_eq!(
            ReactivityWarning::AddToRootState { key: "a".into() }.kind(),
            DiagnosticKind::UsageViolation
        );
        assert_eq!(
            ReactivityWarning::PrimitiveTarget {
                operation: "set",
                key: "a".into()
            }
            .kind(),
            DiagnosticKind::UnsupportedTarget
        );
    }

    #[test]
    #[traced_test]
    fn default_sink_logs_warning() {
        config::scoped(config::current().with_diagnostics(true), || {
            ReactivityWarning::DeleteFromRootState { key: "gone".into() }.report();
        });
        assert!(logs_contain("set it to null instead"));
    }

    #[test]
    #[traced_test]
    fn silent_config_drops_unhandled_diagnostics() {
        config::scoped(
            config::current().with_diagnostics(true).with_silent(true),
            || report(DiagnosticKind::InvalidOption, "quiet please"),
        );
        assert!(!logs_contain("quiet please"));
    }
}

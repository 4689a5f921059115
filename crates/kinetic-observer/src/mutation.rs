#![forbid(unsafe_code)]

//! Sanctioned dynamic-key mutation: [`set`] and [`del`].
//!
//! A key added by plain assignment after an object was observed gets no
//! reactive slot, and raw array index writes are invisible to subscribers.
//! These two functions are the only way to add or remove tracked keys and to
//! write array indices observably.

use std::fmt;

use crate::array::{ArrayRef, MAX_ARRAY_INDEX};
use crate::config;
use crate::diagnostics::ReactivityWarning;
use crate::object::ObjectRef;
use crate::observer::define_reactive;
use crate::value::Value;

/// Property key for [`set`] and [`del`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Index(usize),
    Name(String),
}

impl Key {
    /// Index form, accepting canonical numeric names (`"3"`).
    #[must_use]
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Self::Index(i) => Some(*i),
            Self::Name(name) => {
                let canonical = !name.is_empty()
                    && (name == "0" || !name.starts_with('0'))
                    && name.bytes().all(|b| b.is_ascii_digit());
                canonical.then(|| name.parse().ok()).flatten()
            }
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i) => write!(f, "{i}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Self::Name(name.to_owned())
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

/// What [`set`] or [`del`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    /// An existing key or index was written.
    Updated,
    /// A new reactive slot was installed and the Observer Dep notified.
    Added,
    /// The target is not observed; the change was applied without
    /// notification.
    Untracked,
    /// The key or element was removed.
    Removed,
    /// Nothing to delete.
    Missing,
    /// The operation was refused; a diagnostic was reported.
    Refused,
}

impl MutationOutcome {
    /// Whether the target changed.
    #[must_use]
    pub fn applied(self) -> bool {
        matches!(
            self,
            Self::Updated | Self::Added | Self::Untracked | Self::Removed
        )
    }
}

/// Set `key` on `target`, installing a reactive slot if the key is new and
/// the target is observed.
pub fn set(target: &Value, key: impl Into<Key>, value: Value) -> MutationOutcome {
    let key = key.into();
    match target {
        Value::Array(arr) => set_index(arr, &key, value),
        Value::Object(obj) => set_key(obj, &key.to_string(), value),
        _ => {
            ReactivityWarning::PrimitiveTarget {
                operation: "set",
                key: key.to_string(),
            }
            .report();
            MutationOutcome::Refused
        }
    }
}

/// Delete `key` from `target`, notifying the Observer Dep when observed.
pub fn del(target: &Value, key: impl Into<Key>) -> MutationOutcome {
    let key = key.into();
    match target {
        Value::Array(arr) => {
            let Some(index) = key.as_index() else {
                return invalid_array_key(&key);
            };
            if arr.splice(index, 1, std::iter::empty()).is_empty() {
                MutationOutcome::Missing
            } else {
                MutationOutcome::Removed
            }
        }
        Value::Object(obj) => delete_key(obj, &key.to_string()),
        _ => {
            ReactivityWarning::PrimitiveTarget {
                operation: "delete",
                key: key.to_string(),
            }
            .report();
            MutationOutcome::Refused
        }
    }
}

fn set_index(arr: &ArrayRef, key: &Key, value: Value) -> MutationOutcome {
    let Some(index) = key.as_index().filter(|&i| i <= MAX_ARRAY_INDEX) else {
        return invalid_array_key(key);
    };
    let limit = config::current().max_array_len;
    if index >= arr.len() && index >= limit {
        ReactivityWarning::ArrayLengthLimit { index, limit }.report();
        return MutationOutcome::Refused;
    }
    let existed = index < arr.len();
    arr.set_len(arr.len().max(index));
    arr.splice(index, 1, [value]);
    if existed {
        MutationOutcome::Updated
    } else if arr.observer().is_some() {
        MutationOutcome::Added
    } else {
        MutationOutcome::Untracked
    }
}

fn set_key(obj: &ObjectRef, key: &str, value: Value) -> MutationOutcome {
    if obj.has_own(key) {
        return if obj.assign(key, value) {
            MutationOutcome::Updated
        } else {
            MutationOutcome::Refused
        };
    }
    let ob = obj.observer();
    if obj.is_instance() || ob.as_ref().is_some_and(|ob| ob.is_root_data()) {
        ReactivityWarning::AddToRootState {
            key: key.to_owned(),
        }
        .report();
        return MutationOutcome::Refused;
    }
    let Some(ob) = ob else {
        return if obj.assign(key, value) {
            MutationOutcome::Untracked
        } else {
            MutationOutcome::Refused
        };
    };
    if !define_reactive(obj, key, value) {
        return MutationOutcome::Refused;
    }
    ob.dep().notify();
    MutationOutcome::Added
}

fn delete_key(obj: &ObjectRef, key: &str) -> MutationOutcome {
    let ob = obj.observer();
    if obj.is_instance() || ob.as_ref().is_some_and(|ob| ob.is_root_data()) {
        ReactivityWarning::DeleteFromRootState {
            key: key.to_owned(),
        }
        .report();
        return MutationOutcome::Refused;
    }
    if !obj.has_own(key) {
        return MutationOutcome::Missing;
    }
    if !obj.delete(key) {
        return MutationOutcome::Refused;
    }
    match ob {
        Some(ob) => {
            ob.dep().notify();
            MutationOutcome::Removed
        }
        None => MutationOutcome::Untracked,
    }
}

fn invalid_array_key(key: &Key) -> MutationOutcome {
    ReactivityWarning::InvalidArrayKey {
        key: key.to_string(),
    }
    .report();
    MutationOutcome::Refused
}

#![forbid(unsafe_code)]

//! Shared arrays with intercepted mutators.
//!
//! [`ArrayRef`] is the explicit facade standing in for prototype patching:
//! the seven mutating methods ([`push`](ArrayRef::push),
//! [`pop`](ArrayRef::pop), [`shift`](ArrayRef::shift),
//! [`unshift`](ArrayRef::unshift), [`splice`](ArrayRef::splice),
//! [`sort`](ArrayRef::sort), [`reverse`](ArrayRef::reverse)) perform the
//! mutation and then, when the array is observed, observe any inserted
//! elements and notify the array's Observer Dep.
//!
//! # Invariants
//!
//! 1. An observed array's Dep is notified exactly once per mutator call.
//! 2. Elements inserted by a mutator into an observed array are observed
//!    before subscribers are notified.
//! 3. Unobserved arrays mutate silently.
//!
//! # Tracking boundary
//!
//! Index reads ([`get`](ArrayRef::get)) and raw index writes
//! ([`set_index`](ArrayRef::set_index), [`set_len`](ArrayRef::set_len)) are
//! not intercepted. Reads are tracked at whole-array granularity through the
//! slot holding the array; writes must go through a mutator or
//! `mutation::set` to be seen.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::observer::Observer;
use crate::value::Value;

/// Largest valid array index (`2^32 - 2`).
pub const MAX_ARRAY_INDEX: usize = (u32::MAX - 1) as usize;

struct ArrayData {
    items: RefCell<Vec<Value>>,
    extensible: Cell<bool>,
    ob: RefCell<Option<Rc<Observer>>>,
}

/// Shared handle to an array. Cloning shares the same storage.
#[derive(Clone)]
pub struct ArrayRef(Rc<ArrayData>);

/// Non-owning handle, used by Observer back-references.
#[derive(Clone)]
pub struct WeakArrayRef(Weak<ArrayData>);

impl WeakArrayRef {
    #[must_use]
    pub fn upgrade(&self) -> Option<ArrayRef> {
        self.0.upgrade().map(ArrayRef)
    }
}

impl Default for ArrayRef {
    fn default() -> Self {
        Self::new()
    }
}

impl ArrayRef {
    #[must_use]
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    #[must_use]
    pub fn from_vec(items: Vec<Value>) -> Self {
        Self(Rc::new(ArrayData {
            items: RefCell::new(items),
            extensible: Cell::new(true),
            ob: RefCell::new(None),
        }))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.items.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Untracked index read.
    #[must_use]
    pub fn get(&self, index: usize) -> Value {
        self.0
            .items
            .borrow()
            .get(index)
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot of the elements.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Value> {
        self.0.items.borrow().clone()
    }

    /// Raw index write. Never notifies and never observes `value`.
    ///
    /// Returns `false`, leaving the array untouched, when `index` is beyond
    /// [`MAX_ARRAY_INDEX`].
    pub fn set_index(&self, index: usize, value: Value) -> bool {
        if index > MAX_ARRAY_INDEX {
            return false;
        }
        let Some(len) = index.checked_add(1) else {
            return false;
        };
        let mut items = self.0.items.borrow_mut();
        if index >= items.len() {
            items.resize(len, Value::Undefined);
        }
        items[index] = value;
        true
    }

    /// Raw length write (`arr.length = n`). Never notifies.
    pub fn set_len(&self, len: usize) {
        self.0.items.borrow_mut().resize(len, Value::Undefined);
    }

    pub fn prevent_extensions(&self) {
        self.0.extensible.set(false);
    }

    #[must_use]
    pub fn is_extensible(&self) -> bool {
        self.0.extensible.get()
    }

    #[must_use]
    pub fn observer(&self) -> Option<Rc<Observer>> {
        self.0.ob.borrow().clone()
    }

    pub(crate) fn attach_observer(&self, ob: Rc<Observer>) {
        *self.0.ob.borrow_mut() = Some(ob);
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &ArrayRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakArrayRef {
        WeakArrayRef(Rc::downgrade(&self.0))
    }

    // ── Intercepted mutators ────────────────────────────────────────────

    /// Append elements; returns the new length.
    pub fn push(&self, values: impl IntoIterator<Item = Value>) -> usize {
        let inserted: Vec<Value> = values.into_iter().collect();
        let len = {
            let mut items = self.0.items.borrow_mut();
            items.extend(inserted.iter().cloned());
            items.len()
        };
        self.after_mutation("push", &inserted);
        len
    }

    /// Remove and return the last element (`Undefined` when empty).
    pub fn pop(&self) -> Value {
        let removed = self.0.items.borrow_mut().pop().unwrap_or_default();
        self.after_mutation("pop", &[]);
        removed
    }

    /// Remove and return the first element (`Undefined` when empty).
    pub fn shift(&self) -> Value {
        let removed = {
            let mut items = self.0.items.borrow_mut();
            if items.is_empty() {
                Value::Undefined
            } else {
                items.remove(0)
            }
        };
        self.after_mutation("shift", &[]);
        removed
    }

    /// Prepend elements; returns the new length.
    pub fn unshift(&self, values: impl IntoIterator<Item = Value>) -> usize {
        let inserted: Vec<Value> = values.into_iter().collect();
        let len = {
            let mut items = self.0.items.borrow_mut();
            items.splice(0..0, inserted.iter().cloned());
            items.len()
        };
        self.after_mutation("unshift", &inserted);
        len
    }

    /// Remove `delete_count` elements at `start` and insert `insert` in their
    /// place. Out-of-range arguments are clamped. Returns the removed
    /// elements.
    pub fn splice(
        &self,
        start: usize,
        delete_count: usize,
        insert: impl IntoIterator<Item = Value>,
    ) -> Vec<Value> {
        let inserted: Vec<Value> = insert.into_iter().collect();
        let removed = {
            let mut items = self.0.items.borrow_mut();
            let start = start.min(items.len());
            let end = start.saturating_add(delete_count).min(items.len());
            items
                .splice(start..end, inserted.iter().cloned())
                .collect()
        };
        self.after_mutation("splice", &inserted);
        removed
    }

    /// Sort by string conversion, `undefined` last (the default sort order).
    pub fn sort(&self) {
        self.sort_by(|a, b| match (a.is_undefined(), b.is_undefined()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => a.to_string().cmp(&b.to_string()),
        });
    }

    /// Stable sort with a comparator. The comparator sees a snapshot, so it
    /// may read this array.
    pub fn sort_by(&self, mut compare: impl FnMut(&Value, &Value) -> Ordering) {
        let mut items = self.to_vec();
        items.sort_by(|a, b| compare(a, b));
        *self.0.items.borrow_mut() = items;
        self.after_mutation("sort", &[]);
    }

    pub fn reverse(&self) {
        self.0.items.borrow_mut().reverse();
        self.after_mutation("reverse", &[]);
    }

    fn after_mutation(&self, method: &'static str, inserted: &[Value]) {
        let Some(ob) = self.observer() else {
            return;
        };
        if !inserted.is_empty() {
            ob.observe_array(inserted);
        }
        tracing::trace!(method, inserted = inserted.len(), "array mutation");
        ob.dep().notify();
    }
}

impl fmt::Debug for ArrayRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Array")
            .field("len", &self.len())
            .field("observed", &self.0.ob.borrow().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nums(values: &[i32]) -> Vec<Value> {
        values.iter().copied().map(Value::from).collect()
    }

    #[test]
    fn unobserved_mutators_behave_like_vec() {
        let arr = ArrayRef::from_vec(nums(&[3, 1, 2]));
        assert_eq!(arr.push(nums(&[4])), 4);
        assert_eq!(arr.shift(), Value::from(3));
        assert_eq!(arr.unshift(nums(&[0])), 4);
        assert_eq!(arr.pop(), Value::from(4));
        assert_eq!(arr.to_vec(), nums(&[0, 1, 2]));
        arr.reverse();
        assert_eq!(arr.to_vec(), nums(&[2, 1, 0]));
        arr.sort();
        assert_eq!(arr.to_vec(), nums(&[0, 1, 2]));
    }

    #[test]
    fn splice_clamps_and_returns_removed() {
        let arr = ArrayRef::from_vec(nums(&[1, 2, 3]));
        let removed = arr.splice(1, 10, nums(&[9]));
        assert_eq!(removed, nums(&[2, 3]));
        assert_eq!(arr.to_vec(), nums(&[1, 9]));
        let removed = arr.splice(99, 1, nums(&[5]));
        assert!(removed.is_empty());
        assert_eq!(arr.to_vec(), nums(&[1, 9, 5]));
    }

    #[test]
    fn default_sort_is_lexicographic_with_undefined_last() {
        let arr = ArrayRef::from_vec(vec![
            Value::Undefined,
            Value::from(10),
            Value::from(9),
            Value::from("a"),
        ]);
        arr.sort();
        assert_eq!(
            arr.to_vec(),
            vec![Value::from(10), Value::from(9), Value::from("a"), Value::Undefined]
        );
    }

    #[test]
    fn pop_and_shift_on_empty_return_undefined() {
        let arr = ArrayRef::new();
        assert!(arr.pop().is_undefined());
        assert!(arr.shift().is_undefined());
    }

    #[test]
    fn raw_index_write_pads_with_undefined() {
        let arr = ArrayRef::new();
        assert!(arr.set_index(2, Value::from(1)));
        assert_eq!(arr.len(), 3);
        assert!(arr.get(0).is_undefined());
        arr.set_len(1);
        assert_eq!(arr.len(), 1);
    }

    #[test]
    fn raw_index_write_past_max_index_is_rejected() {
        let arr = ArrayRef::from_vec(vec![Value::from(1)]);
        assert!(!arr.set_index(usize::MAX, Value::from(2)));
        assert!(!arr.set_index(MAX_ARRAY_INDEX + 1, Value::from(2)));
        assert_eq!(arr.to_vec(), vec![Value::from(1)]);
    }
}

#![forbid(unsafe_code)]

//! Dependency registries and the active-subscriber stack.
//!
//! A [`Dep`] is the set of subscribers interested in one observable slot
//! (or in the shape of one observed composite). Reads call [`Dep::depend`],
//! which attributes the read to whichever subscriber sits on top of the
//! thread-local target stack. Writes call [`Dep::notify`].
//!
//! # Invariants
//!
//! 1. A subscriber appears in a Dep's set at most once.
//! 2. `depend()` with no active subscriber (or an empty frame pushed by
//!    [`untracked`]) registers nothing.
//! 3. `notify()` calls `update()` in registration order and holds no
//!    interior borrow while doing so, so subscribers may read, write, and
//!    re-register during notification.
//! 4. The target stack is strictly nested: every push is matched by a pop.
//!
//! # Failure Modes
//!
//! - **Self-triggering subscriber**: a subscriber that writes a slot it
//!   depends on during its own `update()` recurses. The Dep performs no cycle
//!   detection; the subscriber must guard itself (see `Watcher`).
//! - **Dropped subscriber**: subscribers are held weakly and pruned lazily
//!   during the next `notify()`.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use smallvec::SmallVec;

// ─── Id generation ───────────────────────────────────────────────────────────

static NEXT_DEP_ID: AtomicU64 = AtomicU64::new(0);
static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(0);

/// Process-wide, monotonically assigned Dep identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DepId(u64);

impl DepId {
    fn next() -> Self {
        Self(NEXT_DEP_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Process-wide subscriber identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Allocate a fresh id. Subscriber implementations call this once at
    /// construction.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

// ─── Subscriber ──────────────────────────────────────────────────────────────

/// A computation that re-runs when data it previously read changes.
pub trait Subscriber {
    fn id(&self) -> SubscriberId;

    /// Called by [`Dep::depend`] before the Dep records this subscriber.
    /// Implementations use it to remember their dependencies so they can
    /// drop stale ones after re-evaluation.
    fn add_dep(&self, _dep: &Rc<Dep>) {}

    /// A Dep this subscriber is registered on was notified.
    fn update(&self);
}

struct SubEntry {
    id: SubscriberId,
    sub: Weak<dyn Subscriber>,
}

// ─── Dep ─────────────────────────────────────────────────────────────────────

/// Subscriber registry for one observable slot or composite shape.
pub struct Dep {
    id: DepId,
    subs: RefCell<SmallVec<[SubEntry; 4]>>,
}

impl Dep {
    #[must_use]
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            id: DepId::next(),
            subs: RefCell::new(SmallVec::new()),
        })
    }

    #[must_use]
    pub fn id(&self) -> DepId {
        self.id
    }

    /// Register a subscriber. No-op if it is already registered.
    pub fn add_sub(&self, sub: &Rc<dyn Subscriber>) {
        let id = sub.id();
        let mut subs = self.subs.borrow_mut();
        if subs.iter().any(|entry| entry.id == id) {
            return;
        }
        subs.push(SubEntry {
            id,
            sub: Rc::downgrade(sub),
        });
    }

    /// Remove a subscriber by id.
    pub fn remove_sub(&self, id: SubscriberId) {
        self.subs.borrow_mut().retain(|entry| entry.id != id);
    }

    /// Attribute a read to the active subscriber, if any.
    pub fn depend(self: &Rc<Self>) {
        if let Some(target) = current_target() {
            target.add_dep(self);
            self.add_sub(&target);
        }
    }

    /// Wake every registered subscriber, in registration order.
    pub fn notify(&self) {
        let live: SmallVec<[Rc<dyn Subscriber>; 4]> = {
            let mut subs = self.subs.borrow_mut();
            subs.retain(|entry| entry.sub.strong_count() > 0);
            subs.iter().filter_map(|entry| entry.sub.upgrade()).collect()
        };
        tracing::trace!(dep_id = self.id.0, subscribers = live.len(), "dep notify");
        for sub in live {
            sub.update();
        }
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subs
            .borrow()
            .iter()
            .filter(|entry| entry.sub.strong_count() > 0)
            .count()
    }

    #[must_use]
    pub fn has_subscriber(&self, id: SubscriberId) -> bool {
        self.subs.borrow().iter().any(|entry| entry.id == id)
    }
}

impl std::fmt::Debug for Dep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dep")
            .field("id", &self.id.0)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

// ─── Target stack ────────────────────────────────────────────────────────────

thread_local! {
    static TARGET_STACK: RefCell<Vec<Option<Rc<dyn Subscriber>>>> = const { RefCell::new(Vec::new()) };
}

/// Make `target` the active subscriber until the matching [`pop_target`].
///
/// Pushing `None` suspends tracking for the nested frame.
pub fn push_target(target: Option<Rc<dyn Subscriber>>) {
    TARGET_STACK.with(|stack| stack.borrow_mut().push(target));
}

/// Restore the previously active subscriber.
pub fn pop_target() {
    TARGET_STACK.with(|stack| {
        stack.borrow_mut().pop();
    });
}

/// The subscriber currently collecting dependencies.
#[must_use]
pub fn current_target() -> Option<Rc<dyn Subscriber>> {
    TARGET_STACK.with(|stack| stack.borrow().last().cloned().flatten())
}

/// Whether a read right now would register a dependency.
#[must_use]
pub fn is_tracking() -> bool {
    TARGET_STACK.with(|stack| matches!(stack.borrow().last(), Some(Some(_))))
}

/// Depth of the target stack (including empty frames).
#[must_use]
pub fn target_depth() -> usize {
    TARGET_STACK.with(|stack| stack.borrow().len())
}

/// RAII frame on the target stack. Pops on drop, including during unwind.
#[must_use = "the target is popped as soon as the guard is dropped"]
pub struct TargetGuard {
    _private: (),
}

impl TargetGuard {
    pub fn enter(target: Option<Rc<dyn Subscriber>>) -> Self {
        push_target(target);
        Self { _private: () }
    }
}

impl Drop for TargetGuard {
    fn drop(&mut self) {
        pop_target();
    }
}

/// Run `f` with `target` as the active subscriber.
pub fn with_target<R>(target: Rc<dyn Subscriber>, f: impl FnOnce() -> R) -> R {
    let _guard = TargetGuard::enter(Some(target));
    f()
}

/// Run `f` with dependency collection suspended.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _guard = TargetGuard::enter(None);
    f()
}

#![forbid(unsafe_code)]

//! Observable value cells.
//!
//! # Design
//!
//! [`Cell<T>`] is a cheap handle over shared, reference-counted storage.
//! Cloning a `Cell` creates a new handle to the **same** value. Reading with
//! [`get()`](Cell::get) reports the cell to the [tracker](crate::tracker) so
//! that derived cells can discover it; writing with [`set()`](Cell::set)
//! stores the value and synchronously calls every subscriber.
//!
//! A cell built by [`Cell::derived`] has its `set` redirected through a write
//! function; see the crate docs for the derived-cell protocol.
//!
//! # Invariants
//!
//! 1. Subscribers are notified in subscription order.
//! 2. No interior borrow is held while user code runs, so subscribers may
//!    read, write, subscribe and unsubscribe freely from inside a callback.
//!    The one exception is [`with`](Cell::with), whose closure runs under a
//!    shared borrow of the value.
//! 3. A subscriber removed during a notification round is not called for the
//!    rest of that round. One added during a round is first called on the
//!    next round.
//! 4. Every `set` on a plain cell notifies, even if the value is unchanged.
//!
//! # Failure Modes
//!
//! - **Dependency cycle**: a derived cell whose recompute re-enters itself is
//!   cut at [`ReactiveConfig::max_recompute_depth`](crate::ReactiveConfig); see
//!   [`Cell::try_set`].
//! - **Disposer failure**: logged and skipped by
//!   [`dispose_all_upstream`](Cell::dispose_all_upstream).

use std::any::type_name;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::derived::{self, Derivation};
use crate::disposer::Disposer;
use crate::error::{ReactiveError, Result};
use crate::tracker::{self, CellId, Dependency, Trackable};

/// A shared subscriber callback.
///
/// Two `Observer`s are the same subscriber when they are clones of one
/// another; [`Cell::subscribe_observer`] uses that identity to ignore
/// duplicate registrations.
pub struct Observer<T> {
    callback: Rc<dyn Fn(&T)>,
}

impl<T> Observer<T> {
    pub fn new(callback: impl Fn(&T) + 'static) -> Self {
        Self {
            callback: Rc::new(callback),
        }
    }

    /// Whether both handles refer to the same callback.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Rc::as_ptr(&self.callback), Rc::as_ptr(&other.callback))
    }

    fn call(&self, value: &T) {
        (self.callback)(value);
    }
}

impl<T> Clone for Observer<T> {
    fn clone(&self) -> Self {
        Self {
            callback: Rc::clone(&self.callback),
        }
    }
}

impl<T> fmt::Debug for Observer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer").finish_non_exhaustive()
    }
}

struct Subscriber<T> {
    observer: Observer<T>,
    /// Cleared on removal so in-flight notification snapshots skip it.
    live: Rc<std::cell::Cell<bool>>,
}

impl<T> Clone for Subscriber<T> {
    fn clone(&self) -> Self {
        Self {
            observer: self.observer.clone(),
            live: Rc::clone(&self.live),
        }
    }
}

pub(crate) struct CellInner<T> {
    id: CellId,
    value: RefCell<T>,
    /// Bumped on every stored-value write.
    version: std::cell::Cell<u64>,
    /// Recomputes of this cell currently on the stack.
    recomputing: std::cell::Cell<usize>,
    subscribers: RefCell<Vec<Subscriber<T>>>,
    /// Disposers for this cell's own subscriptions to other cells.
    upstream: RefCell<Vec<Disposer>>,
    derivation: Option<Derivation<T>>,
    last_error: RefCell<Option<ReactiveError>>,
}

impl<T> CellInner<T> {
    fn remove_subscriber(&self, observer: &Observer<T>) {
        let mut subscribers = self.subscribers.borrow_mut();
        if let Some(pos) = subscribers
            .iter()
            .position(|sub| sub.observer.ptr_eq(observer))
        {
            let removed = subscribers.remove(pos);
            removed.live.set(false);
        }
    }
}

impl<T> Drop for CellInner<T> {
    fn drop(&mut self) {
        for disposer in self.upstream.get_mut().drain(..) {
            if let Err(err) = disposer.dispose() {
                tracing::warn!(message = "reactive.dispose_failed", cell = %self.id, error = %err);
            }
        }
    }
}

/// A mutable, observable value holder.
pub struct Cell<T> {
    pub(crate) inner: Rc<CellInner<T>>,
}

impl<T> Clone for Cell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Cell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("Cell");
        dbg.field("id", &self.inner.id);
        match self.inner.value.try_borrow() {
            Ok(value) => dbg.field("value", &*value),
            Err(_) => dbg.field("value", &"<borrowed>"),
        };
        dbg.field("version", &self.inner.version.get())
            .field("derived", &self.inner.derivation.is_some())
            .field("subscribers", &self.inner.subscribers.borrow().len())
            .finish()
    }
}

impl<T: Clone + 'static> Cell<T> {
    /// Create a plain cell holding `value`.
    pub fn new(value: T) -> Self {
        Self::from_parts(value, None)
    }

    pub(crate) fn from_parts(value: T, derivation: Option<Derivation<T>>) -> Self {
        Self {
            inner: Rc::new(CellInner {
                id: CellId::next(),
                value: RefCell::new(value),
                version: std::cell::Cell::new(0),
                recomputing: std::cell::Cell::new(0),
                subscribers: RefCell::new(Vec::new()),
                upstream: RefCell::new(Vec::new()),
                derivation,
                last_error: RefCell::new(None),
            }),
        }
    }

    /// Get a clone of the current value, reporting the read to the tracker.
    #[must_use]
    pub fn get(&self) -> T {
        self.track();
        self.inner.value.borrow().clone()
    }

    /// Access the current value by reference, reporting the read to the
    /// tracker.
    ///
    /// `f` runs while the value is borrowed. Use [`get`](Cell::get) instead
    /// if `f` may write this cell, directly or through a subscriber.
    ///
    /// # Panics
    ///
    /// Panics if the closure writes to this same cell.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.track();
        let value = self.inner.value.borrow();
        f(&value)
    }

    /// Get a clone of the current value without reporting the read.
    #[must_use]
    pub fn peek(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Write a value.
    ///
    /// On a plain cell this stores `value` and notifies every subscriber.
    /// On a derived cell it calls the write function with `value` and then
    /// notifies every subscriber with the stored value, which changes only if
    /// the write reached one of the cell's dependencies.
    pub fn set(&self, value: T) {
        match &self.inner.derivation {
            Some(derivation) => {
                derivation.write(value);
                self.notify();
            }
            None => self.force_set(value),
        }
    }

    /// As [`set`](Cell::set), but report a dependency cycle detected anywhere
    /// in the synchronous chain this write started.
    pub fn try_set(&self, value: T) -> Result<()> {
        derived::watch_faults(|| self.set(value)).map_or(Ok(()), Err)
    }

    /// Modify a copy of the current value in place and [`set`](Cell::set) it.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let mut next = self.peek();
        f(&mut next);
        self.set(next);
    }

    /// Store `value` and notify, bypassing any write redirection.
    pub(crate) fn force_set(&self, value: T) {
        *self.inner.value.borrow_mut() = value;
        self.inner.version.set(self.inner.version.get() + 1);
        self.notify();
    }

    fn notify(&self) {
        let snapshot: Vec<Subscriber<T>> = self.inner.subscribers.borrow().clone();
        if snapshot.is_empty() {
            return;
        }
        let value = self.peek();
        for subscriber in &snapshot {
            if subscriber.live.get() {
                subscriber.observer.call(&value);
            }
        }
    }

    fn track(&self) {
        tracker::report_with(self.inner.id, || {
            let source: Rc<dyn Trackable> = Rc::new(self.clone());
            Dependency::new(self.inner.id, type_name::<T>(), source)
        });
    }

    /// Subscribe a fresh callback. Returns a handle that removes it.
    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Disposer {
        self.subscribe_observer(&Observer::new(callback))
    }

    /// Subscribe a shared observer, unless it is already subscribed.
    ///
    /// The returned handle removes the observer whichever call registered it.
    pub fn subscribe_observer(&self, observer: &Observer<T>) -> Disposer {
        {
            let mut subscribers = self.inner.subscribers.borrow_mut();
            if !subscribers.iter().any(|sub| sub.observer.ptr_eq(observer)) {
                subscribers.push(Subscriber {
                    observer: observer.clone(),
                    live: Rc::new(std::cell::Cell::new(true)),
                });
            }
        }

        let weak: Weak<CellInner<T>> = Rc::downgrade(&self.inner);
        let observer = observer.clone();
        Disposer::new(move || {
            // A dropped cell has no subscribers left to remove.
            if let Some(inner) = weak.upgrade() {
                inner.remove_subscriber(&observer);
            }
            Ok(())
        })
    }

    /// Record a disposer for a subscription this cell holds on another cell.
    pub fn add_disposer(&self, disposer: Disposer) {
        let mut upstream = self.inner.upstream.borrow_mut();
        if !upstream.iter().any(|d| d.ptr_eq(&disposer)) {
            upstream.push(disposer);
        }
    }

    /// Dispose every recorded upstream subscription.
    ///
    /// Every disposer runs even if some fail; failures are logged.
    pub fn dispose_all_upstream(&self) {
        let disposers = std::mem::take(&mut *self.inner.upstream.borrow_mut());
        for disposer in disposers {
            if let Err(err) = disposer.dispose() {
                tracing::warn!(message = "reactive.dispose_failed", cell = %self.inner.id, error = %err);
            }
        }
    }

    #[must_use]
    pub fn id(&self) -> CellId {
        self.inner.id
    }

    /// Number of stored-value writes since creation.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.version.get()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.borrow().len()
    }

    /// Number of upstream subscriptions this cell currently holds.
    #[must_use]
    pub fn upstream_count(&self) -> usize {
        self.inner.upstream.borrow().len()
    }

    #[must_use]
    pub fn is_derived(&self) -> bool {
        self.inner.derivation.is_some()
    }

    /// The failure recorded by the most recent recompute, if it failed.
    #[must_use]
    pub fn last_error(&self) -> Option<ReactiveError> {
        self.inner.last_error.borrow().clone()
    }

    pub(crate) fn set_last_error(&self, error: Option<ReactiveError>) {
        *self.inner.last_error.borrow_mut() = error;
    }

    pub(crate) fn recomputing(&self) -> &std::cell::Cell<usize> {
        &self.inner.recomputing
    }

    pub(crate) fn derivation(&self) -> Option<&Derivation<T>> {
        self.inner.derivation.as_ref()
    }

    pub(crate) fn downgrade(&self) -> Weak<CellInner<T>> {
        Rc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &Weak<CellInner<T>>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    /// Whether both handles refer to the same cell.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: Clone + 'static> Trackable for Cell<T> {
    fn subscribe_erased(&self, callback: Rc<dyn Fn()>) -> Disposer {
        self.subscribe(move |_| callback())
    }
}

#![forbid(unsafe_code)]

//! Derived cells: values computed from other cells, with dependencies
//! discovered at read time.
//!
//! # Recompute
//!
//! A derived cell is recomputed once at construction and then every time one
//! of its current dependencies is written. Each recompute:
//!
//! 1. evaluates the read function inside a fresh capture scope,
//! 2. disposes every upstream subscription the cell held,
//! 3. subscribes a new recompute callback to each cell the read touched,
//! 4. stores the result and notifies the cell's subscribers, bypassing the
//!    write redirection.
//!
//! Because the subscriptions are rebuilt from scratch, a read function that
//! picks its sources at run time (`sources[which.get()].get()`) only ever
//! listens to the sources it used last.
//!
//! # Failure Modes
//!
//! - **Read fails** ([`Cell::try_derived`]): the cell stores `None`, keeps
//!   the dependencies read before the failure and records the error in
//!   [`Cell::last_error`]. The next successful recompute clears it.
//! - **Read panics**: the panic propagates to whoever triggered the recompute.
//!   The capture scope is popped during unwinding.
//! - **Cycle**: a cell whose recompute re-enters itself more than
//!   [`ReactiveConfig::max_recompute_depth`] times is refused with
//!   [`ReactiveError::CycleDetected`]. Recomputes of distinct cells do not
//!   count against each other, so acyclic chains of any length propagate.
//!   A cycle through `n` cells unwinds after about `n` times the limit
//!   nested calls.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::cell::{Cell, CellInner};
use crate::config::ReactiveConfig;
use crate::error::ReactiveError;
use crate::tracker::{self, Capture};

/// Result of one read-function evaluation.
pub(crate) struct Evaluation<T> {
    value: T,
    failure: Option<String>,
}

impl<T> Evaluation<T> {
    fn ok(value: T) -> Self {
        Self {
            value,
            failure: None,
        }
    }

    fn failed(absent: T, message: String) -> Self {
        Self {
            value: absent,
            failure: Some(message),
        }
    }
}

/// The read/write pair behind a derived cell.
pub(crate) struct Derivation<T> {
    read: Box<dyn Fn() -> Evaluation<T>>,
    write: Box<dyn Fn(T)>,
}

impl<T> Derivation<T> {
    pub(crate) fn write(&self, value: T) {
        (self.write)(value);
    }
}

thread_local! {
    static WATCHERS: std::cell::Cell<usize> = const { std::cell::Cell::new(0) };
    static FAULT: RefCell<Option<ReactiveError>> = const { RefCell::new(None) };
}

/// Counts one in-progress recompute of a single cell for as long as it lives.
struct ReentryGuard<'a> {
    count: &'a std::cell::Cell<usize>,
}

impl<'a> ReentryGuard<'a> {
    fn enter(count: &'a std::cell::Cell<usize>) -> Result<Self, usize> {
        let depth = count.get();
        if depth >= ReactiveConfig::max_depth() {
            return Err(depth);
        }
        count.set(depth + 1);
        Ok(Self { count })
    }
}

impl Drop for ReentryGuard<'_> {
    fn drop(&mut self) {
        self.count.set(self.count.get().saturating_sub(1));
    }
}

struct WatchGuard;

impl Drop for WatchGuard {
    fn drop(&mut self) {
        WATCHERS.with(|w| w.set(w.get().saturating_sub(1)));
    }
}

/// Run `f` and return the first cycle fault raised while it ran.
///
/// Faults seen by a nested watcher are passed on to the enclosing one.
pub(crate) fn watch_faults(f: impl FnOnce()) -> Option<ReactiveError> {
    let outer = take_fault();
    let enclosing = WATCHERS.with(|w| w.replace(w.get() + 1));
    let guard = WatchGuard;
    f();
    drop(guard);

    let fault = take_fault();
    if enclosing > 0 {
        FAULT.with(|slot| *slot.borrow_mut() = outer.or_else(|| fault.clone()));
    }
    fault
}

fn take_fault() -> Option<ReactiveError> {
    FAULT.with(|fault| fault.borrow_mut().take())
}

fn record_fault(err: ReactiveError) {
    if WATCHERS.with(std::cell::Cell::get) == 0 {
        return;
    }
    FAULT.with(|slot| {
        slot.borrow_mut().get_or_insert(err);
    });
}

impl<T: Clone + 'static> Cell<T> {
    /// Create a derived cell.
    ///
    /// `read` is called exactly once here to produce the initial value, and
    /// again whenever a cell it read during its previous call is written.
    /// It is never called for any other reason, including `get()`.
    ///
    /// `set` on the returned cell calls `write` instead of storing the value;
    /// the stored value only changes if `write` reaches one of the cell's
    /// dependencies.
    pub fn derived(read: impl Fn() -> T + 'static, write: impl Fn(T) + 'static) -> Self {
        build(move || Evaluation::ok(read()), write)
    }
}

impl<T: Clone + 'static> Cell<Option<T>> {
    /// Create a derived cell whose read function may fail.
    ///
    /// A failed read stores `None` and records the failure in
    /// [`last_error`](Cell::last_error).
    pub fn try_derived<E: fmt::Display>(
        read: impl Fn() -> Result<T, E> + 'static,
        write: impl Fn(Option<T>) + 'static,
    ) -> Self {
        build(
            move || match read() {
                Ok(value) => Evaluation::ok(Some(value)),
                Err(err) => Evaluation::failed(None, err.to_string()),
            },
            write,
        )
    }
}

fn build<T: Clone + 'static>(
    read: impl Fn() -> Evaluation<T> + 'static,
    write: impl Fn(T) + 'static,
) -> Cell<T> {
    let (evaluation, capture) = evaluate(&read);
    let cell = Cell::from_parts(
        evaluation.value,
        Some(Derivation {
            read: Box::new(read),
            write: Box::new(write),
        }),
    );
    record_failure(&cell, evaluation.failure);
    rewire(&cell, &capture);
    tracing::debug!(
        message = "reactive.derived",
        cell = %cell.id(),
        dependencies = capture.len()
    );
    cell
}

fn evaluate<T>(read: &dyn Fn() -> Evaluation<T>) -> (Evaluation<T>, Capture) {
    let scope = tracker::listen();
    let evaluation = read();
    (evaluation, scope.finish())
}

fn rewire<T: Clone + 'static>(cell: &Cell<T>, capture: &Capture) {
    for dependency in capture {
        let weak = cell.downgrade();
        let disposer = dependency.subscribe(Rc::new(move || recompute(&weak)));
        cell.add_disposer(disposer);
    }
}

fn record_failure<T: Clone + 'static>(cell: &Cell<T>, failure: Option<String>) {
    let error = failure.map(|message| {
        if ReactiveConfig::logs_evaluation_failures() {
            tracing::warn!(message = "reactive.eval_failed", cell = %cell.id(), error = %message);
        }
        ReactiveError::Evaluation {
            cell: cell.id(),
            message,
        }
    });
    cell.set_last_error(error);
}

fn recompute<T: Clone + 'static>(weak: &Weak<CellInner<T>>) {
    // The cell may have been dropped after this callback was snapshotted.
    let Some(cell) = Cell::upgrade(weak) else {
        return;
    };
    let _reentry = match ReentryGuard::enter(cell.recomputing()) {
        Ok(guard) => guard,
        Err(depth) => {
            tracing::error!(message = "reactive.cycle_detected", cell = %cell.id(), depth);
            let err = ReactiveError::CycleDetected {
                cell: cell.id(),
                depth,
            };
            cell.set_last_error(Some(err.clone()));
            record_fault(err);
            return;
        }
    };
    let Some(derivation) = cell.derivation() else {
        return;
    };

    let span = tracing::debug_span!(
        "reactive.recompute",
        cell = %cell.id(),
        dependencies = tracing::field::Empty
    );
    let _entered = span.enter();

    let (evaluation, capture) = evaluate(&*derivation.read);
    cell.dispose_all_upstream();
    rewire(&cell, &capture);
    span.record("dependencies", capture.len());
    record_failure(&cell, evaluation.failure);
    cell.force_set(evaluation.value);
}

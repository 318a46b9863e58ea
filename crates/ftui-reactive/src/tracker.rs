#![forbid(unsafe_code)]

//! Read tracking for dependency discovery.
//!
//! Every [`Cell::get`](crate::Cell::get) reports itself here. While a capture
//! scope is open, the report is recorded as a [`Dependency`]; otherwise it is
//! ignored.
//!
//! # Design
//!
//! Scopes form a per-thread stack. [`start_listening`] pushes a scope and
//! [`stop_listening`] pops it, returning everything it captured. Reads are
//! recorded in the innermost scope only, so a read function that builds
//! another derived cell while it is being evaluated does not disturb its own
//! capture.
//!
//! # Invariants
//!
//! 1. A [`Capture`] lists cells in the order they were first read.
//! 2. A cell appears at most once per capture, however often it was read.
//! 3. Reads inside [`untracked`] are invisible to every open scope.
//! 4. A [`ListenScope`] dropped without `finish()` (e.g. while unwinding)
//!    still pops its scope.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::disposer::Disposer;

/// Process-unique identity of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId(u64);

impl CellId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cell#{}", self.0)
    }
}

/// Type-erased ability to subscribe a recompute callback to a cell.
pub(crate) trait Trackable {
    fn subscribe_erased(&self, callback: Rc<dyn Fn()>) -> Disposer;
}

/// A cell that was read during a capture scope.
///
/// Holds the cell strongly, together with a subscribe capability that
/// already knows the cell's value type.
#[derive(Clone)]
pub struct Dependency {
    id: CellId,
    type_name: &'static str,
    source: Rc<dyn Trackable>,
}

impl Dependency {
    pub(crate) fn new(id: CellId, type_name: &'static str, source: Rc<dyn Trackable>) -> Self {
        Self {
            id,
            type_name,
            source,
        }
    }

    #[must_use]
    pub fn id(&self) -> CellId {
        self.id
    }

    /// Name of the cell's value type. Diagnostic only.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub(crate) fn subscribe(&self, callback: Rc<dyn Fn()>) -> Disposer {
        self.source.subscribe_erased(callback)
    }
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependency")
            .field("id", &self.id)
            .field("type_name", &self.type_name)
            .finish()
    }
}

/// The dependencies recorded by one closed scope.
#[derive(Debug, Clone, Default)]
pub struct Capture {
    records: Vec<Dependency>,
}

impl Capture {
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn record_at(&self, index: usize) -> Option<&Dependency> {
        self.records.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Dependency> {
        self.records.iter()
    }

    #[must_use]
    pub fn contains(&self, id: CellId) -> bool {
        self.records.iter().any(|record| record.id == id)
    }

    /// Cell ids in first-read order.
    #[must_use]
    pub fn ids(&self) -> Vec<CellId> {
        self.records.iter().map(Dependency::id).collect()
    }
}

impl<'a> IntoIterator for &'a Capture {
    type Item = &'a Dependency;
    type IntoIter = std::slice::Iter<'a, Dependency>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

enum Scope {
    Capturing {
        records: Vec<Dependency>,
        seen: HashSet<CellId>,
    },
    Suppressed,
}

impl Scope {
    fn capturing() -> Self {
        Self::Capturing {
            records: Vec::new(),
            seen: HashSet::new(),
        }
    }

    fn into_capture(self) -> Capture {
        match self {
            Self::Capturing { records, .. } => Capture { records },
            Self::Suppressed => Capture::default(),
        }
    }
}

thread_local! {
    static SCOPES: RefCell<Vec<Scope>> = const { RefCell::new(Vec::new()) };
}

/// Open a new capture scope on top of the stack.
pub fn start_listening() {
    push(Scope::capturing());
}

/// Close the innermost scope and return what it captured.
///
/// Returns an empty capture when no scope is open.
pub fn stop_listening() -> Capture {
    SCOPES
        .with(|scopes| scopes.borrow_mut().pop())
        .map(Scope::into_capture)
        .unwrap_or_default()
}

/// Whether reads on this thread are currently being recorded.
#[must_use]
pub fn is_listening() -> bool {
    SCOPES.with(|scopes| matches!(scopes.borrow().last(), Some(Scope::Capturing { .. })))
}

/// Number of open scopes on this thread, suppressing ones included.
#[must_use]
pub fn scope_depth() -> usize {
    SCOPES.with(|scopes| scopes.borrow().len())
}

/// Record `dependency` in the innermost scope, unless that scope already
/// holds the same cell.
pub fn report(dependency: Dependency) {
    report_with(dependency.id, move || dependency);
}

/// As [`report`], building the record only when it will be kept.
pub(crate) fn report_with(id: CellId, make: impl FnOnce() -> Dependency) {
    SCOPES.with(|scopes| {
        let mut scopes = scopes.borrow_mut();
        if let Some(Scope::Capturing { records, seen }) = scopes.last_mut()
            && seen.insert(id)
        {
            records.push(make());
        }
    });
}

/// Open a capture scope that is popped when the returned guard drops.
pub fn listen() -> ListenScope {
    start_listening();
    ListenScope {
        depth: scope_depth(),
        finished: false,
        _not_send: PhantomData,
    }
}

/// Run `f` without recording any of its reads.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    push(Scope::Suppressed);
    let _guard = PopGuard {
        depth: scope_depth(),
    };
    f()
}

fn push(scope: Scope) {
    SCOPES.with(|scopes| scopes.borrow_mut().push(scope));
}

/// Pop scopes until the one opened at `depth` is gone, returning its capture.
fn pop_to(depth: usize) -> Capture {
    SCOPES.with(|scopes| {
        let mut scopes = scopes.borrow_mut();
        if depth == 0 || scopes.len() < depth {
            return Capture::default();
        }
        scopes.truncate(depth);
        scopes.pop().map(Scope::into_capture).unwrap_or_default()
    })
}

/// RAII capture scope returned by [`listen`].
#[must_use = "dropping a ListenScope discards its capture"]
pub struct ListenScope {
    depth: usize,
    finished: bool,
    _not_send: PhantomData<Rc<()>>,
}

impl ListenScope {
    /// Close the scope and return what it captured.
    pub fn finish(mut self) -> Capture {
        self.finished = true;
        pop_to(self.depth)
    }
}

impl Drop for ListenScope {
    fn drop(&mut self) {
        if !self.finished {
            let _ = pop_to(self.depth);
        }
    }
}

struct PopGuard {
    depth: usize,
}

impl Drop for PopGuard {
    fn drop(&mut self) {
        let _ = pop_to(self.depth);
    }
}

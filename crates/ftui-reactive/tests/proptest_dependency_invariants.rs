#![forbid(unsafe_code)]

//! Property-based invariant tests for dynamic dependency tracking.
//!
//! These tests verify structural invariants that must hold for **any**
//! sequence of writes:
//!
//! 1. A selector-driven derived cell always equals the selected source.
//! 2. After every write it is subscribed to exactly the selector and the
//!    selected source.
//! 3. The read function runs only when the selector or the selected source
//!    is written.
//! 4. Tracker captures list each cell once, in first-read order.
//! 5. Derived sums match a naive sum after arbitrary writes.

use std::cell::Cell as Counter;
use std::rc::Rc;

use ftui_reactive::{Cell, CellId, tracker};
use proptest::prelude::*;

const SOURCES: usize = 4;

// ── Strategies ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Op {
    /// Write `value` to source `index`.
    Source { index: usize, value: i64 },
    /// Point the selector at source `index`.
    Select { index: usize },
    /// Write through the derived cell.
    Through { value: i64 },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..SOURCES, -1000i64..1000).prop_map(|(index, value)| Op::Source { index, value }),
        2 => (0..SOURCES).prop_map(|index| Op::Select { index }),
        1 => (-1000i64..1000).prop_map(|value| Op::Through { value }),
    ]
}

fn ops() -> impl Strategy<Value = Vec<Op>> {
    proptest::collection::vec(op(), 0..60)
}

// ── Helpers ─────────────────────────────────────────────────────────────

struct Selected {
    sources: Vec<Cell<i64>>,
    which: Cell<usize>,
    derived: Cell<i64>,
    evaluations: Rc<Counter<u32>>,
}

fn build_selected(initial: &[i64]) -> Selected {
    let sources: Vec<Cell<i64>> = initial.iter().copied().map(Cell::new).collect();
    let which = Cell::new(0usize);
    let evaluations = Rc::new(Counter::new(0u32));

    let (rs, rw, count) = (sources.clone(), which.clone(), Rc::clone(&evaluations));
    let (ws, ww) = (sources.clone(), which.clone());
    let derived = Cell::derived(
        move || {
            count.set(count.get() + 1);
            rs[rw.get()].get()
        },
        move |value| ws[ww.get()].set(value),
    );

    Selected {
        sources,
        which,
        derived,
        evaluations,
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 1-3. Selector-driven derived cell
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn derived_tracks_selected_source(
        initial in proptest::collection::vec(-1000i64..1000, SOURCES),
        ops in ops(),
    ) {
        let s = build_selected(&initial);
        let mut model: Vec<i64> = initial.clone();
        let mut selected = 0usize;
        let mut expected_evaluations = 1u32;

        prop_assert_eq!(s.evaluations.get(), 1);

        for op in ops {
            match op {
                Op::Source { index, value } => {
                    s.sources[index].set(value);
                    model[index] = value;
                    if index == selected {
                        expected_evaluations += 1;
                    }
                }
                Op::Select { index } => {
                    s.which.set(index);
                    selected = index;
                    expected_evaluations += 1;
                }
                Op::Through { value } => {
                    s.derived.set(value);
                    model[selected] = value;
                    expected_evaluations += 1;
                }
            }

            prop_assert_eq!(s.derived.get(), model[selected]);
            prop_assert_eq!(s.evaluations.get(), expected_evaluations);
            prop_assert_eq!(s.derived.upstream_count(), 2);
            prop_assert_eq!(s.which.subscriber_count(), 1);
            for (index, source) in s.sources.iter().enumerate() {
                let expected = usize::from(index == selected);
                prop_assert_eq!(source.subscriber_count(), expected);
            }
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 4. Tracker captures
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn capture_lists_first_reads_once(reads in proptest::collection::vec(0..8usize, 0..40)) {
        let cells: Vec<Cell<usize>> = (0..8).map(Cell::new).collect();

        let scope = tracker::listen();
        for &i in &reads {
            let _ = cells[i].get();
        }
        let capture = scope.finish();

        let mut expected: Vec<CellId> = Vec::new();
        for &i in &reads {
            let id = cells[i].id();
            if !expected.contains(&id) {
                expected.push(id);
            }
        }
        prop_assert_eq!(capture.ids(), expected);
        prop_assert_eq!(tracker::scope_depth(), 0);
    }

    #[test]
    fn nested_scopes_never_leak_into_each_other(
        outer_reads in proptest::collection::vec(0..6usize, 0..20),
        inner_reads in proptest::collection::vec(0..6usize, 0..20),
    ) {
        let cells: Vec<Cell<usize>> = (0..6).map(Cell::new).collect();

        let outer = tracker::listen();
        for &i in &outer_reads {
            let _ = cells[i].get();
        }
        let inner = tracker::listen();
        for &i in &inner_reads {
            let _ = cells[i].get();
        }
        let inner_capture = inner.finish();
        let outer_capture = outer.finish();

        for &i in &inner_reads {
            prop_assert!(inner_capture.contains(cells[i].id()));
        }
        prop_assert_eq!(inner_capture.len(), {
            let mut seen = inner_reads.clone();
            seen.sort_unstable();
            seen.dedup();
            seen.len()
        });
        for (i, cell) in cells.iter().enumerate() {
            prop_assert_eq!(outer_capture.contains(cell.id()), outer_reads.contains(&i));
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 5. Derived sums
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn derived_sum_matches_naive(
        initial in proptest::collection::vec(-100i64..100, 1..8),
        writes in proptest::collection::vec((0..8usize, -100i64..100), 0..40),
    ) {
        let cells: Vec<Cell<i64>> = initial.iter().copied().map(Cell::new).collect();
        let read = cells.clone();
        let sum = Cell::derived(move || read.iter().map(Cell::get).sum::<i64>(), |_| {});
        let mut model = initial.clone();

        for (index, value) in writes {
            let index = index % cells.len();
            cells[index].set(value);
            model[index] = value;
            prop_assert_eq!(sum.get(), model.iter().sum::<i64>());
        }
        prop_assert_eq!(sum.upstream_count(), cells.len());
    }
}

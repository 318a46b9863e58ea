#![forbid(unsafe_code)]

//! Dynamically tracked reactive cells for FrankenTUI.
//!
//! This crate provides observable values whose derived dependents are
//! discovered at read time instead of being declared up front:
//!
//! - [`Cell`]: a shared, observable value with synchronous change
//!   notification via subscriber callbacks.
//! - [`Cell::derived`]: a cell computed by a read function. Whatever cells
//!   the read function touches become its dependencies, re-discovered on
//!   every recompute. Writes are redirected through a write function.
//! - [`Disposer`] / [`Subscription`]: handles that cancel one subscription,
//!   explicitly or on drop.
//! - [`tracker`]: the per-thread capture scopes that record reads.
//!
//! # Example
//!
//! ```
//! use ftui_reactive::Cell;
//!
//! let celsius = Cell::new(100);
//! let source = celsius.clone();
//! let sink = celsius.clone();
//! let fahrenheit = Cell::derived(
//!     move || source.get() * 9 / 5 + 32,
//!     move |f| sink.set((f - 32) * 5 / 9),
//! );
//!
//! assert_eq!(fahrenheit.get(), 212);
//! celsius.set(0);
//! assert_eq!(fahrenheit.get(), 32);
//! fahrenheit.set(50);
//! assert_eq!(celsius.get(), 10);
//! ```
//!
//! # Architecture
//!
//! `Cell<T>` uses `Rc` + `RefCell` for single-threaded shared ownership.
//! Propagation is a chain of plain function calls: `set` does not return
//! until every recompute and notification it caused has finished.
//!
//! A derived cell subscribes a recompute callback to each dependency. The
//! callback holds the derived cell weakly, so a derived cell lives exactly as
//! long as some handle to it does.
//!
//! # Invariants
//!
//! 1. Subscribers are notified in registration order.
//! 2. A derived cell's read function runs once at construction and then only
//!    when a cell it read last time is written; never because of `get()`.
//! 3. After each recompute a derived cell is subscribed to exactly the cells
//!    its read function touched during that recompute.
//! 4. `set` on a derived cell never stores its argument; subscribers are
//!    notified once with the stored value after the write function returns.
//! 5. Read capture scopes nest: building a derived cell inside a read
//!    function does not disturb the enclosing capture.

pub mod cell;
pub mod config;
mod derived;
pub mod disposer;
pub mod error;
pub mod tracker;

pub use cell::{Cell, Observer};
pub use config::ReactiveConfig;
pub use disposer::{Disposer, Subscription};
pub use error::{ReactiveError, Result};
pub use tracker::{Capture, CellId, Dependency, untracked};

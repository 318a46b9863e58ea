#![forbid(unsafe_code)]

//! Error types for reactive cells.
//!
//! None of these errors escape `get`/`set`: they are recovered locally and
//! surfaced through [`Cell::last_error`](crate::Cell::last_error),
//! [`Cell::try_set`](crate::Cell::try_set) and `tracing` events.

use thiserror::Error;

use crate::tracker::CellId;

pub type Result<T> = std::result::Result<T, ReactiveError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    /// A derived cell's read function failed; the cell holds its absence value.
    #[error("evaluation of {cell} failed: {message}")]
    Evaluation { cell: CellId, message: String },

    /// An individual disposer's teardown action failed.
    #[error("disposer failed: {message}")]
    Dispose { message: String },

    /// A derived cell's recompute re-entered itself past the configured depth.
    #[error("cyclic dependency: recompute of {cell} refused at depth {depth}")]
    CycleDetected { cell: CellId, depth: usize },
}

impl ReactiveError {
    #[must_use]
    pub fn dispose(message: impl Into<String>) -> Self {
        Self::Dispose {
            message: message.into(),
        }
    }

    /// Whether this error came from the recompute re-entry guard.
    #[must_use]
    pub fn is_cycle(&self) -> bool {
        matches!(self, Self::CycleDetected { .. })
    }
}

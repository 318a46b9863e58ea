#![forbid(unsafe_code)]

//! Subscription teardown handles.
//!
//! A [`Disposer`] cancels exactly one subscription. It is a shared handle:
//! clones refer to the same teardown action, which runs at most once no
//! matter how many times or through which clone `dispose` is called.
//!
//! Dropping a `Disposer` does **not** cancel anything. Wrap it in a
//! [`Subscription`] to get unsubscribe-on-drop.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::Result;

type Action = Box<dyn FnOnce() -> Result<()>>;

/// Idempotent handle that cancels one subscription.
#[derive(Clone)]
pub struct Disposer {
    action: Rc<RefCell<Option<Action>>>,
}

impl Disposer {
    /// Wrap a teardown action.
    pub fn new(action: impl FnOnce() -> Result<()> + 'static) -> Self {
        let action: Action = Box::new(action);
        Self {
            action: Rc::new(RefCell::new(Some(action))),
        }
    }

    /// A disposer with nothing to tear down.
    #[must_use]
    pub fn noop() -> Self {
        Self {
            action: Rc::new(RefCell::new(None)),
        }
    }

    /// Run the teardown action if it has not run yet.
    ///
    /// Later calls return `Ok(())` without doing anything, even if the first
    /// call failed.
    pub fn dispose(&self) -> Result<()> {
        // Release the borrow before running: the action may drop other cells.
        let action = self.action.borrow_mut().take();
        match action {
            Some(action) => action(),
            None => Ok(()),
        }
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.action.borrow().is_none()
    }

    /// Whether both handles refer to the same teardown action.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.action, &other.action)
    }

    /// Convert into a guard that disposes on drop.
    #[must_use]
    pub fn into_subscription(self) -> Subscription {
        Subscription {
            disposer: Some(self),
        }
    }
}

impl fmt::Debug for Disposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposer")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// RAII guard that disposes its subscription when dropped.
#[must_use = "dropping a Subscription immediately unsubscribes"]
#[derive(Debug)]
pub struct Subscription {
    disposer: Option<Disposer>,
}

impl Subscription {
    /// Give up the guard and keep the subscription alive.
    #[must_use]
    pub fn detach(mut self) -> Disposer {
        self.disposer.take().unwrap_or_else(Disposer::noop)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(disposer) = self.disposer.take()
            && let Err(err) = disposer.dispose()
        {
            tracing::warn!(message = "reactive.dispose_failed", error = %err);
        }
    }
}

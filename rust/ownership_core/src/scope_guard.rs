//! Deferred actions bound to a scope.
use std::fmt::{Debug, Formatter};
use std::mem::ManuallyDrop;

/// Runs an action when it goes out of scope, unless it was dismissed.
///
/// The guard can not be cloned. Moving it transfers the armed state along with
/// the action, leaving nothing behind that could run it a second time.
///
/// # Examples
///
/// ```
/// use ownership_core::ScopeGuard;
/// use std::cell::Cell;
///
/// let cleaned = Cell::new(false);
/// {
///     let _guard = ScopeGuard::new(|| cleaned.set(true));
/// }
/// assert!(cleaned.get());
///
/// let cleaned = Cell::new(false);
/// {
///     let mut guard = ScopeGuard::new(|| cleaned.set(true));
///     guard.dismiss();
/// }
/// assert!(!cleaned.get());
/// ```
#[must_use = "the action runs immediately if the guard is not bound to a variable"]
pub struct ScopeGuard<F: FnOnce()> {
    action: ManuallyDrop<F>,
    armed: bool,
}

impl<F: FnOnce()> ScopeGuard<F> {
    /// Constructs an armed guard.
    #[inline]
    pub fn new(action: F) -> Self {
        Self {
            action: ManuallyDrop::new(action),
            armed: true,
        }
    }

    /// Disarms the guard. Calling it more than once has no further effect.
    #[inline]
    pub fn dismiss(&mut self) {
        self.armed = false;
    }

    /// Returns whether the action is still going to run.
    #[inline]
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Disarms the guard and returns the action without running it.
    pub fn into_inner(self) -> F {
        let mut this = ManuallyDrop::new(self);
        // Safety: `this` is never dropped, so the action is taken exactly once.
        unsafe { ManuallyDrop::take(&mut this.action) }
    }
}

impl<F: FnOnce()> Drop for ScopeGuard<F> {
    fn drop(&mut self) {
        // Safety: The action is only taken here or in `into_inner`, which skips
        // the destructor.
        let action = unsafe { ManuallyDrop::take(&mut self.action) };
        if self.armed {
            self.armed = false;
            action();
        }
    }
}

impl<F: FnOnce()> Debug for ScopeGuard<F> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeGuard")
            .field("armed", &self.armed)
            .finish_non_exhaustive()
    }
}

/// Defers the execution of a block until the end of the enclosing scope.
///
/// # Examples
///
/// ```
/// use ownership_core::defer;
/// use std::cell::Cell;
///
/// let count = Cell::new(0);
/// {
///     defer! { count.set(count.get() + 1) };
///     assert_eq!(count.get(), 0);
/// }
/// assert_eq!(count.get(), 1);
/// ```
#[macro_export]
macro_rules! defer {
    ($($body:tt)*) => {
        let _guard = $crate::ScopeGuard::new(|| { $($body)* });
    };
}

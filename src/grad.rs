//! Scoped switch for gradient bookkeeping.
//!
//! Nothing in this crate records gradients, but forward passes issued for
//! generation run under [`no_grad`] so that a model implementation which does
//! keep training state can skip it.

use std::cell::Cell;

thread_local! {
    static GRAD_ENABLED: Cell<bool> = const { Cell::new(true) };
}

/// Whether gradient bookkeeping is enabled on the current thread.
pub fn is_grad_enabled() -> bool {
    GRAD_ENABLED.with(Cell::get)
}

/// Disable gradient bookkeeping until the returned guard is dropped.
pub fn no_grad() -> NoGradGuard {
    let prev = GRAD_ENABLED.with(|g| g.replace(false));
    NoGradGuard { prev }
}

/// Restores the previous gradient state on drop.
#[must_use = "gradients are re-enabled as soon as the guard is dropped"]
pub struct NoGradGuard {
    prev: bool,
}

impl Drop for NoGradGuard {
    fn drop(&mut self) {
        GRAD_ENABLED.with(|g| g.set(self.prev));
    }
}

//! Evaluation Context
//!
//! The evaluation context tracks which watcher is currently evaluating.
//! Every reactive read consults it: if a watcher is on top of the stack,
//! the read registers that watcher as a subscriber.
//!
//! # Implementation
//!
//! We use a thread-local stack of targets. Evaluating a watcher pushes it,
//! and the returned [`TargetGuard`] pops it when dropped. Because the pop
//! happens in `Drop`, the enclosing target is restored on every exit path:
//! normal return, an `Err` propagated with `?`, or a panic unwinding through
//! the evaluation.
//!
//! A `None` entry masks the enclosing watcher. [`untracked`] uses it to read
//! reactive state without recording dependencies.

use std::cell::RefCell;

use super::ids::WatcherId;
use super::watcher::Watcher;

thread_local! {
    static TARGET_STACK: RefCell<Vec<Option<Watcher>>> = const { RefCell::new(Vec::new()) };
}

/// Guard that pops the evaluation target when dropped.
pub struct TargetGuard {
    id: Option<WatcherId>,
}

impl TargetGuard {
    /// Make `target` the current evaluation target.
    ///
    /// The previous target becomes current again when the guard drops.
    pub(crate) fn push(target: Option<Watcher>) -> Self {
        let id = target.as_ref().map(Watcher::id);
        TARGET_STACK.with(|stack| stack.borrow_mut().push(target));
        Self { id }
    }
}

impl Drop for TargetGuard {
    fn drop(&mut self) {
        // The stack may already be gone during thread teardown.
        let _ = TARGET_STACK.try_with(|stack| {
            let popped = stack.borrow_mut().pop();

            if let Some(entry) = popped {
                debug_assert_eq!(
                    entry.as_ref().map(Watcher::id),
                    self.id,
                    "evaluation target mismatch"
                );
            }
        });
    }
}

/// The watcher currently evaluating, if any.
pub fn current() -> Option<Watcher> {
    TARGET_STACK.with(|stack| stack.borrow().last().cloned().flatten())
}

/// Check whether reads are being attributed to a watcher right now.
pub fn is_tracking() -> bool {
    TARGET_STACK.with(|stack| matches!(stack.borrow().last(), Some(Some(_))))
}

/// Number of entries on the target stack.
pub fn depth() -> usize {
    TARGET_STACK.with(|stack| stack.borrow().len())
}

/// Run `f` without attributing its reads to the current watcher.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _guard = TargetGuard::push(None);
    f()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Value, WatchOptions};

    fn idle_watcher() -> Watcher {
        Watcher::new(|| Ok(Value::Null), WatchOptions::computed())
    }

    #[test]
    fn guard_restores_previous_target() {
        let outer = idle_watcher();
        let inner = idle_watcher();

        assert!(!is_tracking());
        {
            let _outer = TargetGuard::push(Some(outer.clone()));
            assert_eq!(current().map(|w| w.id()), Some(outer.id()));

            {
                let _inner = TargetGuard::push(Some(inner.clone()));
                assert_eq!(current().map(|w| w.id()), Some(inner.id()));
            }

            // After inner guard drops, outer should be current
            assert_eq!(current().map(|w| w.id()), Some(outer.id()));
        }

        assert!(current().is_none());
        assert_eq!(depth(), 0);
    }

    #[test]
    fn untracked_masks_current_target() {
        let watcher = idle_watcher();
        let _guard = TargetGuard::push(Some(watcher));

        assert!(is_tracking());
        untracked(|| {
            assert!(!is_tracking());
            assert!(current().is_none());
        });
        assert!(is_tracking());
    }

    #[test]
    fn target_restored_after_panic() {
        let watcher = idle_watcher();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = TargetGuard::push(Some(watcher.clone()));
            panic!("getter failed");
        }));

        assert!(result.is_err());
        assert_eq!(depth(), 0);
        assert!(!is_tracking());
    }
}

//! Strict Mode
//!
//! Guards a state tree against mutation outside designated commit
//! functions. A deep, synchronous watcher observes the whole tree; any
//! change that happens while no commit is running is reported as
//! [`ReactiveError::StrictViolation`] through the error handler.
//!
//! The check is a report, not a panic, so a violation never interrupts the
//! change propagation that is already underway.

use std::cell::Cell;
use std::rc::Rc;

use crate::error::{ReactiveError, Result};
use crate::reactive::{observe, Callback, Object, Value, WatchOptions, Watcher};

/// A strict-mode validator over one state object.
pub struct StrictMode {
    committing: Rc<Cell<bool>>,
    watcher: Watcher,
}

impl StrictMode {
    /// Observe `state` and start validating every change to it.
    pub fn enable(state: &Object) -> Self {
        let root = Value::Object(state.clone());
        observe(&root, false);

        let committing = Rc::new(Cell::new(false));
        let flag = committing.clone();
        let watcher = Watcher::build(
            "strict mode".to_owned(),
            Rc::new(move || -> Result<Value> { Ok(root.clone()) }),
            Some(Rc::new(move |_: &Value, _: &Value| -> Result<()> {
                if flag.get() {
                    Ok(())
                } else {
                    Err(ReactiveError::StrictViolation)
                }
            }) as Callback),
            WatchOptions::default().with_deep().with_sync(),
        );

        Self { committing, watcher }
    }

    /// Run `f` as a commit. Changes made inside are allowed.
    pub fn commit<R>(&self, f: impl FnOnce() -> R) -> R {
        struct Restore(Rc<Cell<bool>>, bool);

        impl Drop for Restore {
            fn drop(&mut self) {
                self.0.set(self.1);
            }
        }

        let _restore = Restore(self.committing.clone(), self.committing.replace(true));
        f()
    }

    pub fn is_committing(&self) -> bool {
        self.committing.get()
    }

    /// Stop validating.
    pub fn disable(&self) {
        self.watcher.teardown();
    }

    pub fn is_enabled(&self) -> bool {
        self.watcher.is_active()
    }
}

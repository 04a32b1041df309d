//! Errors and error reporting.
//!
//! Failures inside tracked computations never unwind into the scheduler.
//! They are turned into a [`ReactiveError`] and handed to [`handle_error`],
//! which forwards them to the handler installed on the current thread or,
//! failing that, logs them through `tracing`.

use std::cell::RefCell;
use std::fmt::Display;
use std::rc::Rc;

use thiserror::Error;

use crate::config;

/// Errors produced by the reactive engine.
#[derive(Debug, Error)]
pub enum ReactiveError {
    /// A getter or callback supplied by user code failed.
    #[error("{0}")]
    Eval(String),

    /// A watch expression is not a plain dot-delimited path.
    #[error("failed watching path \"{0}\": only simple dot-delimited paths are accepted")]
    InvalidPath(String),

    /// A computed property was declared without a getter.
    #[error("no getter function has been defined for computed property \"{0}\"")]
    MissingGetter(String),

    /// A required prop was not passed.
    #[error("missing required prop: \"{0}\"")]
    MissingProp(String),

    /// A prop value does not match any of its declared types.
    #[error("invalid prop: type check failed for prop \"{name}\". Expected {expected}, got {got}")]
    PropType {
        name: String,
        expected: String,
        got: String,
    },

    /// A prop's custom validator rejected its value.
    #[error("invalid prop: custom validator check failed for prop \"{0}\"")]
    PropValidator(String),

    /// Strict-mode state was mutated outside `commit`.
    #[error("do not mutate state outside commit handlers")]
    StrictViolation,

    /// Configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl ReactiveError {
    /// Build an evaluation error from any displayable message.
    pub fn eval(message: impl Display) -> Self {
        Self::Eval(message.to_string())
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;

type ErrorHandler = Rc<dyn Fn(&ReactiveError, &str)>;

thread_local! {
    static ERROR_HANDLER: RefCell<Option<ErrorHandler>> = const { RefCell::new(None) };
}

/// Restores the previously installed error handler when dropped.
pub struct ErrorHandlerGuard {
    previous: Option<ErrorHandler>,
}

impl Drop for ErrorHandlerGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        let _ = ERROR_HANDLER.try_with(|slot| *slot.borrow_mut() = previous);
    }
}

/// Install an error handler for the current thread.
///
/// The handler receives the error and a short description of where it
/// happened, such as `callback for watcher "count"`.
pub fn set_error_handler<F>(handler: F) -> ErrorHandlerGuard
where
    F: Fn(&ReactiveError, &str) + 'static,
{
    let previous = ERROR_HANDLER.with(|slot| slot.borrow_mut().replace(Rc::new(handler)));
    ErrorHandlerGuard { previous }
}

/// Report an error raised inside the engine.
pub fn handle_error(error: &ReactiveError, info: &str) {
    // Clone out so the handler may install another handler.
    let handler = ERROR_HANDLER.with(|slot| slot.borrow().clone());

    match handler {
        Some(handler) => handler(error, info),
        None => tracing::error!(target: "trellis", %error, "error in {info}"),
    }
}

/// Emit a non-fatal diagnostic unless the engine is configured silent.
pub(crate) fn warn(message: impl Display) {
    if !config::is_silent() {
        tracing::warn!(target: "trellis", "{message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_receives_error_and_info() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let _guard = set_error_handler(move |err, info| {
            sink.borrow_mut().push(format!("{info}: {err}"));
        });

        handle_error(&ReactiveError::eval("boom"), "getter for watcher \"a\"");

        assert_eq!(seen.borrow().as_slice(), ["getter for watcher \"a\": boom"]);
    }

    #[test]
    fn guard_restores_previous_handler() {
        let outer_hits = Rc::new(RefCell::new(0));
        let inner_hits = Rc::new(RefCell::new(0));

        let outer = outer_hits.clone();
        let _outer = set_error_handler(move |_, _| *outer.borrow_mut() += 1);
        {
            let inner = inner_hits.clone();
            let _inner = set_error_handler(move |_, _| *inner.borrow_mut() += 1);
            handle_error(&ReactiveError::StrictViolation, "test");
        }
        handle_error(&ReactiveError::StrictViolation, "test");

        assert_eq!(*inner_hits.borrow(), 1);
        assert_eq!(*outer_hits.borrow(), 1);
    }

    #[test]
    fn messages_are_descriptive() {
        assert_eq!(
            ReactiveError::InvalidPath("a-b".into()).to_string(),
            "failed watching path \"a-b\": only simple dot-delimited paths are accepted"
        );
        assert_eq!(
            ReactiveError::MissingGetter("total".into()).to_string(),
            "no getter function has been defined for computed property \"total\""
        );
    }
}

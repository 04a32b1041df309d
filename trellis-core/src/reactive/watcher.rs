//! Watcher Implementation
//!
//! A Watcher is one tracked computation: a render function, a computed
//! property, or an explicit watch. It evaluates its getter with itself as
//! the evaluation target, so every reactive read inside the getter lands in
//! its dependency set.
//!
//! # How Watchers Work
//!
//! 1. `get()` pushes the watcher onto the evaluation stack, runs the getter
//!    (and a deep traversal if requested), then pops it again.
//!
//! 2. The Deps touched during that pass replace the previous subscription
//!    set. Deps touched for the first time are subscribed; Deps that were
//!    not touched again are unsubscribed.
//!
//! 3. When a subscribed Dep notifies, `update()` reacts according to the
//!    watcher's kind:
//!    - `Lazy` marks the cached value dirty and waits to be read.
//!    - `Sync` runs right away.
//!    - `Queued` goes to the scheduler and runs once in the next flush.
//!
//! 4. `run()` re-evaluates and hands `(new, old)` to the callback if the
//!    value changed.
//!
//! # Failure Isolation
//!
//! A failing getter or callback is reported through
//! [`handle_error`](crate::error::handle_error) and never escapes `run()` or
//! `evaluate()`. The evaluation stack is restored by a guard, so a failure
//! cannot leave a stale target behind.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::context::{self, TargetGuard};
use super::dep::Dep;
use super::ids::{DepId, WatcherId};
use super::object::Object;
use super::path::{parse_path, resolve};
use super::traverse::traverse;
use super::value::Value;
use crate::error::{handle_error, warn, ReactiveError, Result};
use crate::scheduler::queue_watcher;

/// A tracked computation.
pub type Getter = Rc<dyn Fn() -> Result<Value>>;

/// Change callback, called with `(new, old)`.
pub type Callback = Rc<dyn Fn(&Value, &Value) -> Result<()>>;

/// Options recognized when creating a watcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchOptions {
    /// Pull-based: evaluate only when read after a change.
    pub lazy: bool,
    /// Run synchronously on every change instead of batching.
    pub sync: bool,
    /// Depend on every nested field of the value.
    pub deep: bool,
    /// Created by user code rather than by the engine. Errors from user
    /// watchers are reported as coming from a `user watcher`.
    pub user: bool,
    /// Call the callback once at creation with `(value, Null)`.
    pub immediate: bool,
}

impl WatchOptions {
    /// Options for a computed property.
    pub fn computed() -> Self {
        Self {
            lazy: true,
            ..Self::default()
        }
    }

    /// Options for a watch created by user code.
    pub fn user() -> Self {
        Self {
            user: true,
            ..Self::default()
        }
    }

    pub fn with_deep(mut self) -> Self {
        self.deep = true;
        self
    }

    pub fn with_sync(mut self) -> Self {
        self.sync = true;
        self
    }

    pub fn with_immediate(mut self) -> Self {
        self.immediate = true;
        self
    }

    /// The update behaviour these options select. `lazy` wins over `sync`.
    pub fn kind(&self) -> WatcherKind {
        if self.lazy {
            WatcherKind::Lazy
        } else if self.sync {
            WatcherKind::Sync
        } else {
            WatcherKind::Queued
        }
    }
}

/// How a watcher reacts to a change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatcherKind {
    /// Mark dirty; recompute when next read.
    Lazy,
    /// Re-run immediately.
    Sync,
    /// Re-run once in the next scheduler flush.
    Queued,
}

/// A shared handle to a tracked computation.
///
/// Dropping the last handle unsubscribes the watcher from every Dep.
#[derive(Clone)]
pub struct Watcher(Rc<WatcherInner>);

pub(crate) struct WatcherInner {
    id: WatcherId,
    expression: String,
    getter: Getter,
    callback: Option<Callback>,
    kind: WatcherKind,
    deep: bool,
    user: bool,
    state: RefCell<WatcherState>,
}

struct WatcherState {
    value: Value,
    dirty: bool,
    active: bool,
    deps: SmallVec<[Dep; 4]>,
    dep_ids: HashSet<DepId>,
    new_deps: SmallVec<[Dep; 4]>,
    new_dep_ids: HashSet<DepId>,
}

impl Drop for WatcherInner {
    fn drop(&mut self) {
        for dep in self.state.get_mut().deps.drain(..) {
            dep.remove_sub_id(self.id);
        }
    }
}

impl Watcher {
    /// Create a watcher over a closure. Non-lazy watchers evaluate once
    /// right away to collect their dependencies.
    pub fn new<F>(getter: F, options: WatchOptions) -> Self
    where
        F: Fn() -> Result<Value> + 'static,
    {
        let expression = std::any::type_name::<F>().to_owned();
        Self::build(expression, Rc::new(getter), None, options)
    }

    /// Create a watcher that calls `callback` with `(new, old)` whenever
    /// the value of `getter` changes.
    pub fn with_callback<F, C>(getter: F, callback: C, options: WatchOptions) -> Self
    where
        F: Fn() -> Result<Value> + 'static,
        C: Fn(&Value, &Value) -> Result<()> + 'static,
    {
        let expression = std::any::type_name::<F>().to_owned();
        Self::build(expression, Rc::new(getter), Some(Rc::new(callback) as Callback), options)
    }

    /// Create a watcher over a dot-delimited path into `root`.
    ///
    /// An invalid path is reported as a warning and the watcher falls back
    /// to a getter that always yields `Null`.
    pub fn from_path<C>(root: &Object, path: &str, callback: C, options: WatchOptions) -> Self
    where
        C: Fn(&Value, &Value) -> Result<()> + 'static,
    {
        let callback = Rc::new(callback) as Callback;
        Self::build(path.to_owned(), path_getter(root, path), Some(callback), options)
    }

    pub(crate) fn build(
        expression: String,
        getter: Getter,
        callback: Option<Callback>,
        options: WatchOptions,
    ) -> Self {
        let kind = options.kind();
        let watcher = Self(Rc::new(WatcherInner {
            id: WatcherId::next(),
            expression,
            getter,
            callback,
            kind,
            deep: options.deep,
            user: options.user,
            state: RefCell::new(WatcherState {
                value: Value::Null,
                dirty: kind == WatcherKind::Lazy,
                active: true,
                deps: SmallVec::new(),
                dep_ids: HashSet::new(),
                new_deps: SmallVec::new(),
                new_dep_ids: HashSet::new(),
            }),
        }));

        tracing::debug!(target: "trellis", id = %watcher.id(), ?kind, expression = %watcher.0.expression, "watcher created");

        if kind != WatcherKind::Lazy {
            let value = watcher.get().unwrap_or_else(|err| {
                watcher.report(&err, "getter for");
                Value::Null
            });
            watcher.store(value);
        }

        if options.immediate {
            if let Some(callback) = &watcher.0.callback {
                if let Err(err) = callback(&watcher.value(), &Value::Null) {
                    watcher.report(&err, "callback for immediate");
                }
            }
        }

        watcher
    }

    /// Get the watcher's unique ID.
    pub fn id(&self) -> WatcherId {
        self.0.id
    }

    /// The expression text, for diagnostics.
    pub fn expression(&self) -> &str {
        &self.0.expression
    }

    pub fn kind(&self) -> WatcherKind {
        self.0.kind
    }

    pub fn is_user(&self) -> bool {
        self.0.user
    }

    pub fn is_active(&self) -> bool {
        self.0.state.borrow().active
    }

    /// Whether a lazy watcher's cached value is stale.
    pub fn is_dirty(&self) -> bool {
        self.0.state.borrow().dirty
    }

    /// The cached value.
    pub fn value(&self) -> Value {
        self.0.state.borrow().value.clone()
    }

    /// Number of Deps this watcher is subscribed to.
    pub fn dep_count(&self) -> usize {
        self.0.state.borrow().deps.len()
    }

    /// Check whether two handles are the same watcher.
    pub fn ptr_eq(a: &Watcher, b: &Watcher) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }

    pub(crate) fn downgrade(&self) -> Weak<WatcherInner> {
        Rc::downgrade(&self.0)
    }

    pub(crate) fn upgrade(weak: &Weak<WatcherInner>) -> Option<Watcher> {
        weak.upgrade().map(Watcher)
    }

    /// Evaluate the getter under tracking and reconcile subscriptions.
    ///
    /// An error from the getter is returned after the evaluation target has
    /// been restored and the subscriptions reconciled.
    pub fn get(&self) -> Result<Value> {
        {
            let mut state = self.0.state.borrow_mut();
            state.new_deps.clear();
            state.new_dep_ids.clear();
        }

        let result = {
            let _guard = TargetGuard::push(Some(self.clone()));
            let result = (self.0.getter)();
            if self.0.deep {
                if let Ok(value) = &result {
                    traverse(value);
                }
            }
            result
        };

        self.cleanup_deps();
        result
    }

    /// Record `dep` for the pass in progress. Repeated reads of the same
    /// Dep within one pass are ignored.
    pub fn add_dep(&self, dep: &Dep) {
        let mut state = self.0.state.borrow_mut();
        if state.new_dep_ids.insert(dep.id()) {
            state.new_deps.push(dep.clone());
        }
    }

    /// Swap in the Deps collected by the last pass.
    fn cleanup_deps(&self) {
        let (stale, fresh) = {
            let mut guard = self.0.state.borrow_mut();
            let state = &mut *guard;

            let stale: Vec<Dep> = if state.active {
                state
                    .deps
                    .iter()
                    .filter(|dep| !state.new_dep_ids.contains(&dep.id()))
                    .cloned()
                    .collect()
            } else {
                // Torn down mid-evaluation: keep nothing.
                state.new_deps.clear();
                state.new_dep_ids.clear();
                state.deps.drain(..).collect()
            };
            let fresh: Vec<Dep> = state
                .new_deps
                .iter()
                .filter(|dep| !state.dep_ids.contains(&dep.id()))
                .cloned()
                .collect();

            std::mem::swap(&mut state.deps, &mut state.new_deps);
            std::mem::swap(&mut state.dep_ids, &mut state.new_dep_ids);
            state.new_deps.clear();
            state.new_dep_ids.clear();

            (stale, fresh)
        };

        for dep in &stale {
            dep.remove_sub(self);
        }
        for dep in &fresh {
            dep.add_sub(self);
        }
    }

    /// Recompute a lazy watcher's value. Errors are reported and leave
    /// `Null` behind.
    pub fn evaluate(&self) {
        let value = self.get().unwrap_or_else(|err| {
            self.report(&err, "getter for");
            Value::Null
        });
        self.store(value);
        self.0.state.borrow_mut().dirty = false;
    }

    /// React to a change in one of the watcher's Deps.
    pub fn update(&self) {
        match self.0.kind {
            WatcherKind::Lazy => self.0.state.borrow_mut().dirty = true,
            WatcherKind::Sync => self.run(),
            WatcherKind::Queued => queue_watcher(self),
        }
    }

    /// Re-evaluate and call the callback if the value changed.
    ///
    /// Containers and deep watchers always count as changed, since their
    /// contents may have been mutated in place. If the getter fails, the
    /// error is reported and the previous value is kept.
    pub fn run(&self) {
        if !self.is_active() {
            return;
        }

        let value = match self.get() {
            Ok(value) => value,
            Err(err) => {
                self.report(&err, "getter for");
                return;
            }
        };

        let changed = value != self.0.state.borrow().value || value.is_container() || self.0.deep;
        if !changed {
            return;
        }

        let old = self.store(value.clone());
        if let Some(callback) = &self.0.callback {
            if let Err(err) = callback(&value, &old) {
                self.report(&err, "callback for");
            }
        }
    }

    /// Let the watcher currently evaluating depend on everything this
    /// watcher depends on, recomputing first if dirty.
    ///
    /// This is how reading a computed property makes the reader react to
    /// the computed property's inputs.
    pub fn depend(&self) {
        if self.is_dirty() {
            self.evaluate();
        }
        if context::is_tracking() {
            let deps = self.0.state.borrow().deps.clone();
            for dep in &deps {
                dep.depend();
            }
        }
    }

    /// Unsubscribe from every Dep and stop reacting. Calling it again does
    /// nothing.
    pub fn teardown(&self) {
        let deps = {
            let mut state = self.0.state.borrow_mut();
            if !state.active {
                return;
            }
            state.active = false;
            state.dep_ids.clear();
            std::mem::take(&mut state.deps)
        };

        for dep in &deps {
            dep.remove_sub(self);
        }

        tracing::debug!(target: "trellis", id = %self.id(), "watcher torn down");
    }

    /// Replace the cached value, returning the old one.
    fn store(&self, value: Value) -> Value {
        std::mem::replace(&mut self.0.state.borrow_mut().value, value)
    }

    /// Report `err` with an info string such as `callback for user watcher "a"`.
    fn report(&self, err: &ReactiveError, context: &str) {
        let kind = if self.0.user { "user watcher" } else { "watcher" };
        handle_error(err, &format!("{context} {kind} \"{}\"", self.0.expression));
    }
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.0.state.borrow();
        f.debug_struct("Watcher")
            .field("id", &self.0.id)
            .field("expression", &self.0.expression)
            .field("kind", &self.0.kind)
            .field("active", &state.active)
            .field("dirty", &state.dirty)
            .field("deps", &state.deps.len())
            .finish()
    }
}

fn path_getter(root: &Object, path: &str) -> Getter {
    match parse_path(path) {
        Some(segments) => {
            let root = Value::Object(root.clone());
            Rc::new(move || Ok(resolve(&root, &segments)))
        }
        None => {
            warn(ReactiveError::InvalidPath(path.to_owned()));
            Rc::new(|| Ok(Value::Null))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{observe, set};
    use crate::scheduler::flush_scheduler_queue;
    use serde_json::json;
    use std::cell::Cell;

    fn state(json: serde_json::Value) -> Object {
        let value = Value::from(json);
        observe(&value, false);
        value.as_object().cloned().unwrap()
    }

    fn counter() -> (Rc<Cell<usize>>, Rc<Cell<usize>>) {
        let calls = Rc::new(Cell::new(0));
        (calls.clone(), calls)
    }

    #[test]
    fn sync_watcher_runs_on_change() {
        let obj = state(json!({"count": 0}));
        let (calls, sink) = counter();

        let _watcher = Watcher::from_path(
            &obj,
            "count",
            move |_, _| {
                sink.set(sink.get() + 1);
                Ok(())
            },
            WatchOptions::user().with_sync(),
        );

        obj.set("count", 1);
        obj.set("count", 1);
        obj.set("count", 2);

        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn lazy_watcher_only_marks_dirty() {
        let obj = state(json!({"count": 1}));
        let (runs, sink) = counter();

        let reader = obj.clone();
        let computed = Watcher::new(
            move || {
                sink.set(sink.get() + 1);
                Ok(Value::from(reader.get("count").and_then(|v| v.as_f64()).unwrap_or(0.0) * 2.0))
            },
            WatchOptions::computed(),
        );

        assert!(computed.is_dirty());
        assert_eq!(runs.get(), 0);

        computed.evaluate();
        assert_eq!(computed.value(), Value::from(2));

        obj.set("count", 5);
        assert!(computed.is_dirty());
        assert_eq!(runs.get(), 1);

        computed.evaluate();
        assert_eq!(computed.value(), Value::from(10));
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn stale_dependencies_are_dropped() {
        let obj = state(json!({"flag": true, "x": 1, "z": 2}));

        let reader = obj.clone();
        let watcher = Watcher::new(
            move || {
                let flag = reader.get("flag").and_then(|v| v.as_bool()).unwrap_or(false);
                let branch = if flag { "x" } else { "z" };
                Ok(reader.get(branch).unwrap_or_default())
            },
            WatchOptions::default().with_sync(),
        );
        assert_eq!(watcher.value(), Value::from(1));
        assert_eq!(watcher.dep_count(), 2);

        obj.set("flag", false);
        assert_eq!(watcher.value(), Value::from(2));
        assert_eq!(watcher.dep_count(), 2);

        let before = watcher.value();
        obj.set("x", 100);
        assert_eq!(watcher.value(), before);
    }

    #[test]
    fn getter_error_is_reported_and_isolated() {
        let reports = Rc::new(RefCell::new(Vec::new()));
        let sink = reports.clone();
        let _guard = crate::error::set_error_handler(move |err, info| {
            sink.borrow_mut().push(format!("{info}: {err}"));
        });

        let obj = state(json!({"n": 1}));
        let reader = obj.clone();
        let watcher = Watcher::new(
            move || {
                let n = reader.get("n").and_then(|v| v.as_f64()).unwrap_or(0.0);
                if n > 1.0 {
                    return Err(ReactiveError::eval("too big"));
                }
                Ok(Value::from(n))
            },
            WatchOptions::default().with_sync(),
        );

        obj.set("n", 2);

        assert_eq!(watcher.value(), Value::from(1));
        assert!(!context::is_tracking());
        assert_eq!(reports.borrow().len(), 1);
        assert!(reports.borrow()[0].starts_with("getter for watcher"));
        assert!(reports.borrow()[0].ends_with("too big"));

        // Subscriptions survive the failed pass.
        obj.set("n", 0);
        assert_eq!(watcher.value(), Value::from(0));
    }

    #[test]
    fn teardown_is_idempotent() {
        let obj = state(json!({"a": 1}));
        let (calls, sink) = counter();

        let watcher = Watcher::from_path(
            &obj,
            "a",
            move |_, _| {
                sink.set(sink.get() + 1);
                Ok(())
            },
            WatchOptions::user().with_sync(),
        );

        watcher.teardown();
        watcher.teardown();
        obj.set("a", 2);

        assert!(!watcher.is_active());
        assert_eq!(watcher.dep_count(), 0);
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn immediate_calls_back_with_null_old_value() {
        let obj = state(json!({"a": 1}));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();

        let _watcher = Watcher::from_path(
            &obj,
            "a",
            move |new, old| {
                sink.borrow_mut().push((new.clone(), old.clone()));
                Ok(())
            },
            WatchOptions::user().with_immediate(),
        );

        assert_eq!(seen.borrow().as_slice(), [(Value::from(1), Value::Null)]);
    }

    #[test]
    fn deep_watch_sees_nested_mutation() {
        let obj = state(json!({"user": {"address": {"city": "Oslo"}}}));
        let (calls, sink) = counter();

        let _watcher = Watcher::from_path(
            &obj,
            "user",
            move |_, _| {
                sink.set(sink.get() + 1);
                Ok(())
            },
            WatchOptions::user().with_deep().with_sync(),
        );

        let address = obj.get("user").unwrap().as_object().unwrap().get("address").unwrap();
        address.as_object().unwrap().set("city", "Bergen");
        set(&address, "zip", "5003");

        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn invalid_path_falls_back_to_null() {
        let obj = state(json!({"a": 1}));
        let watcher = Watcher::from_path(&obj, "a + 1", |_, _| Ok(()), WatchOptions::user());

        assert!(watcher.value().is_null());
        assert_eq!(watcher.dep_count(), 0);
    }

    #[test]
    fn queued_watcher_waits_for_flush() {
        let obj = state(json!({"a": 1}));
        let (calls, sink) = counter();

        let _watcher = Watcher::from_path(
            &obj,
            "a",
            move |_, _| {
                sink.set(sink.get() + 1);
                Ok(())
            },
            WatchOptions::user(),
        );

        obj.set("a", 2);
        assert_eq!(calls.get(), 0);

        flush_scheduler_queue();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let options: WatchOptions = serde_json::from_value(json!({"deep": true})).unwrap();
        assert!(options.deep);
        assert_eq!(options.kind(), WatcherKind::Queued);
        assert_eq!(WatchOptions::computed().with_sync().kind(), WatcherKind::Lazy);
    }

    #[test]
    fn error_reports_name_user_watchers() {
        let reports = Rc::new(RefCell::new(Vec::new()));
        let sink = reports.clone();
        let _guard = crate::error::set_error_handler(move |_, info| {
            sink.borrow_mut().push(info.to_owned());
        });

        let obj = state(json!({"a": 1}));
        let fail = |_: &Value, _: &Value| -> Result<()> { Err(ReactiveError::eval("rejected")) };
        let _user = Watcher::from_path(&obj, "a", fail, WatchOptions::user().with_sync());
        let _engine = Watcher::from_path(&obj, "a", fail, WatchOptions::default().with_sync());

        obj.set("a", 2);

        assert_eq!(
            reports.borrow().as_slice(),
            ["callback for user watcher \"a\"", "callback for watcher \"a\""]
        );
    }
}

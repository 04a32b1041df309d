//! Reactive Primitives
//!
//! This module implements dependency tracking: deps, observers, reactive
//! properties and watchers. These primitives form the foundation of
//! Trellis's change propagation.
//!
//! # Concepts
//!
//! ## Dep
//!
//! A Dep is a publish point. Each reactive field owns one, and each observed
//! container owns one for changes to its shape. Reading the field while a
//! watcher evaluates subscribes that watcher; writing the field notifies
//! every subscriber.
//!
//! ## Observer
//!
//! An Observer is attached to an object or array the first time it is
//! handed to [`observe`]. For objects it turns every field into a reactive
//! property; for arrays it switches on mutation interception. Nested
//! containers are observed recursively.
//!
//! ## Watcher
//!
//! A Watcher is a tracked computation. It records the Deps it reads,
//! re-subscribes after every evaluation, and re-runs when one of them
//! notifies: lazily (computed properties), synchronously, or batched
//! through the [scheduler](crate::scheduler).
//!
//! # Implementation Notes
//!
//! Everything here is single-threaded. Handles are `Rc`-based and `!Send`;
//! the evaluation stack lives in thread-local storage. Deps refer to their
//! subscribers weakly, so a watcher is never kept alive by the state it
//! reads.

mod array;
mod context;
mod dep;
mod ids;
mod object;
mod observer;
mod path;
mod traverse;
mod value;
mod watcher;

pub use array::Array;
pub use context::{current, depth, is_tracking, untracked, TargetGuard};
pub use dep::Dep;
pub use ids::{DepId, WatcherId};
pub use object::{define_reactive, AccessorGet, AccessorSet, CustomSetter, Descriptor, Object};
pub use observer::{del, observe, set, without_conversion, Key, Observer};
pub(crate) use observer::with_conversion;
pub use path::{parse_path, resolve};
pub use traverse::traverse;
pub use value::Value;
pub use watcher::{Callback, Getter, WatchOptions, Watcher, WatcherKind};

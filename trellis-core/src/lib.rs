//! Trellis Core
//!
//! This crate provides the change-propagation engine for the Trellis
//! reactive state layer. It implements:
//!
//! - Observable objects and arrays with transparent dependency tracking
//! - Watchers: lazy (computed), synchronous and batched computations
//! - A deduplicating, id-ordered batching scheduler driven by a tick queue
//! - Component-style instance state (validated props, data, computed, watch)
//! - Strict mode validation of state mutations
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: values, deps, observers, reactive properties and watchers
//! - `scheduler`: the watcher queue and the `next_tick` queue it flushes on
//! - `instance`: props, data, computed properties and watch definitions
//! - `props`: prop declarations, defaults and validation
//! - `strict`: mutation validation for state trees
//! - `error`, `config`: error reporting and global configuration
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_core::reactive::{observe, Value, WatchOptions, Watcher};
//! use trellis_core::flush_ticks;
//!
//! // Make a state tree observable
//! let state = Value::from(serde_json::json!({ "count": 0 }));
//! observe(&state, false);
//! let obj = state.as_object().unwrap().clone();
//!
//! // Watch a derived value
//! let _watcher = Watcher::from_path(&obj, "count", |new, old| {
//!     println!("count: {old} -> {new}");
//!     Ok(())
//! }, WatchOptions::user());
//!
//! // Both writes land in one flush
//! obj.set("count", 1);
//! obj.set("count", 2);
//! flush_ticks();
//! // Prints once: "count: 0 -> 2"
//! ```
//!
//! # Threading
//!
//! The engine is single-threaded. All handles are `!Send`, and the
//! evaluation stack, scheduler, tick queue and error handler are
//! per-thread. Only [`config`] is process-wide.

pub mod config;
pub mod error;
pub mod instance;
pub mod props;
pub mod reactive;
pub mod scheduler;
pub mod strict;

pub use config::{config, configure, Config};
pub use error::{handle_error, set_error_handler, ReactiveError, Result};
pub use instance::{ComputedDef, Instance, InstanceBuilder, Unwatch};
pub use props::{PropDef, PropType};
pub use reactive::{
    define_reactive, del, observe, set, without_conversion, Array, Dep, Object, Observer, Value,
    WatchOptions, Watcher, WatcherKind,
};
pub use scheduler::{flush_ticks, install_tokio_driver, next_tick, tick};
pub use strict::StrictMode;

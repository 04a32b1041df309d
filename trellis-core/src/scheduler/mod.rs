//! Batching Scheduler
//!
//! Changes made during one synchronous turn are coalesced. Every queued
//! watcher that a mutation touches is collected once, and the whole batch
//! runs in a single flush on the next tick:
//!
//! ```rust,ignore
//! state.set("count", 1);
//! state.set("count", 2);   // same watcher, still queued once
//! flush_ticks();           // watcher runs once and sees 4, not 2 then 4
//! ```
//!
//! # Modules
//!
//! - `queue`: the deduplicated, id-ordered watcher queue and its flush.
//! - `tick`: the deferred callback queue that the flush is scheduled on,
//!   plus the drivers that drain it.

mod queue;
mod tick;

pub use queue::{flush_scheduler_queue, is_flushing, pending_watchers, queue_watcher};
pub use tick::{
    flush_ticks, has_pending_ticks, install_driver, install_tokio_driver, next_tick, tick, Driver,
    DriverGuard,
};

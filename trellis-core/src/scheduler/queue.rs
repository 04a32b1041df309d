//! Watcher Queue
//!
//! Queued watchers are collected here and run together in one flush on the
//! next tick.
//!
//! # Algorithm
//!
//! 1. `queue_watcher` dedupes by id. Outside a flush, the watcher is
//!    appended. During a flush, it is inserted after the last queued
//!    watcher with a smaller or equal id, but never at or before the
//!    position being processed. A watcher whose turn has already passed
//!    therefore runs again in the same flush.
//!
//! 2. The first watcher queued in a tick schedules the flush with
//!    [`next_tick`]. Later ones ride along.
//!
//! 3. The flush sorts the queue by id. Ids grow in creation order, so
//!    outer computations run before the inner ones they created.
//!
//! 4. Each watcher's id leaves the dedupe set right before it runs, so a
//!    watcher may queue itself again. A watcher that does this more than
//!    `max_update_count` times in one flush aborts the flush with a warning.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use super::tick::next_tick;
use crate::config::max_update_count;
use crate::error::warn;
use crate::reactive::{Watcher, WatcherId};

#[derive(Default)]
struct Scheduler {
    queue: Vec<Watcher>,
    has: HashSet<WatcherId>,
    circular: HashMap<WatcherId, usize>,
    /// A flush has been scheduled and not finished yet.
    waiting: bool,
    flushing: bool,
    /// Position of the watcher currently running.
    index: usize,
}

thread_local! {
    static SCHEDULER: RefCell<Scheduler> = RefCell::new(Scheduler::default());
}

/// Queue `watcher` for the next flush. Already-queued watchers are ignored.
pub fn queue_watcher(watcher: &Watcher) {
    let id = watcher.id();

    let schedule = SCHEDULER.with(|scheduler| {
        let mut s = scheduler.borrow_mut();
        if !s.has.insert(id) {
            return false;
        }

        if s.flushing {
            let mut position = s.queue.len();
            while position > s.index + 1 && s.queue[position - 1].id() > id {
                position -= 1;
            }
            s.queue.insert(position, watcher.clone());
        } else {
            s.queue.push(watcher.clone());
        }

        !std::mem::replace(&mut s.waiting, true)
    });

    if schedule {
        next_tick(flush_scheduler_queue);
    }
}

/// Resets the scheduler when a flush ends, including by panic.
struct FlushGuard;

impl Drop for FlushGuard {
    fn drop(&mut self) {
        let _ = SCHEDULER.try_with(|scheduler| {
            let queue = {
                let mut s = scheduler.borrow_mut();
                s.has.clear();
                s.circular.clear();
                s.waiting = false;
                s.flushing = false;
                s.index = 0;
                std::mem::take(&mut s.queue)
            };
            drop(queue);
        });
    }
}

/// Run every queued watcher in id order.
///
/// Normally called from the tick queue; calling it directly flushes
/// synchronously. A nested call during a flush does nothing.
pub fn flush_scheduler_queue() {
    let started = SCHEDULER.with(|scheduler| {
        let mut s = scheduler.borrow_mut();
        if s.flushing {
            return false;
        }
        s.flushing = true;
        s.queue.sort_by_key(Watcher::id);
        true
    });
    if !started {
        return;
    }

    let _guard = FlushGuard;
    let limit = max_update_count();
    let mut index = 0;

    loop {
        let next = SCHEDULER.with(|scheduler| {
            let mut s = scheduler.borrow_mut();
            s.index = index;
            let watcher = s.queue.get(index).cloned()?;
            s.has.remove(&watcher.id());
            Some(watcher)
        });
        let Some(watcher) = next else {
            break;
        };

        watcher.run();

        let runaway = SCHEDULER.with(|scheduler| {
            let mut s = scheduler.borrow_mut();
            let id = watcher.id();
            if !s.has.contains(&id) {
                return false;
            }
            let count = s.circular.entry(id).or_insert(0);
            *count += 1;
            *count > limit
        });
        if runaway {
            warn(format!(
                "you may have an infinite update loop in watcher with expression \"{}\"",
                watcher.expression()
            ));
            break;
        }

        index += 1;
    }

    tracing::trace!(target: "trellis", watchers = index, "flushed scheduler queue");
}

/// Number of watchers waiting for the next flush.
pub fn pending_watchers() -> usize {
    SCHEDULER.with(|scheduler| scheduler.borrow().queue.len())
}

/// Check whether a flush is running on this thread.
pub fn is_flushing() -> bool {
    SCHEDULER.with(|scheduler| scheduler.borrow().flushing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{observe, Object, Value, WatchOptions};
    use crate::scheduler::flush_ticks;
    use serde_json::json;
    use std::rc::Rc;

    fn state(json: serde_json::Value) -> Object {
        let value = Value::from(json);
        observe(&value, false);
        value.as_object().cloned().unwrap()
    }

    fn number(obj: &Object, key: &str) -> f64 {
        obj.get(key).and_then(|v| v.as_f64()).unwrap_or(0.0)
    }

    #[test]
    fn queue_dedupes_by_id() {
        let obj = state(json!({"a": 1, "b": 2}));
        let reader = obj.clone();
        let _watcher = Watcher::new(
            move || Ok(Value::from(number(&reader, "a") + number(&reader, "b"))),
            WatchOptions::default(),
        );

        obj.set("a", 10);
        obj.set("b", 20);
        obj.set("a", 30);

        assert_eq!(pending_watchers(), 1);
        flush_ticks();
        assert_eq!(pending_watchers(), 0);
    }

    #[test]
    fn flush_runs_in_creation_order() {
        let obj = state(json!({"n": 0}));
        let order = Rc::new(RefCell::new(Vec::new()));

        let make = |label: &'static str| {
            let order = order.clone();
            Watcher::from_path(
                &obj,
                "n",
                move |_, _| {
                    order.borrow_mut().push(label);
                    Ok(())
                },
                WatchOptions::user(),
            )
        };
        let first = make("first");
        let second = make("second");

        // Queue the later watcher first.
        queue_watcher(&second);
        obj.set("n", 1);
        flush_ticks();

        assert!(first.id() < second.id());
        assert_eq!(order.borrow().as_slice(), ["first", "second"]);
    }

    #[test]
    fn watcher_queued_during_flush_runs_in_same_flush() {
        let obj = state(json!({"a": 0, "b": 0}));
        let runs = Rc::new(RefCell::new(Vec::new()));

        // Created first, so it sorts first, but only becomes dirty once the
        // second watcher writes `b`.
        let log = runs.clone();
        let _reads_b = Watcher::from_path(
            &obj,
            "b",
            move |new, _| {
                log.borrow_mut().push(format!("b={new}"));
                Ok(())
            },
            WatchOptions::user(),
        );

        let writer = obj.clone();
        let log = runs.clone();
        let _writes_b = Watcher::from_path(
            &obj,
            "a",
            move |new, _| {
                log.borrow_mut().push(format!("a={new}"));
                writer.set("b", new.clone());
                Ok(())
            },
            WatchOptions::user(),
        );

        obj.set("a", 5);
        flush_ticks();

        assert_eq!(runs.borrow().as_slice(), ["a=5", "b=5"]);
    }

    #[test]
    fn runaway_watcher_is_stopped() {
        let obj = state(json!({"n": 0}));
        let runs = Rc::new(RefCell::new(0));

        let writer = obj.clone();
        let counter = runs.clone();
        let _watcher = Watcher::from_path(
            &obj,
            "n",
            move |new, _| {
                *counter.borrow_mut() += 1;
                writer.set("n", new.as_f64().unwrap_or(0.0) + 1.0);
                Ok(())
            },
            WatchOptions::user(),
        );

        obj.set("n", 1);
        flush_ticks();

        assert_eq!(*runs.borrow(), max_update_count() + 1);
        assert!(!is_flushing());
        assert_eq!(pending_watchers(), 0);
    }
}

//! Dep Implementation
//!
//! A Dep is a publish point. Every reactive field and every observed
//! container owns one. Watchers subscribe to the Deps they read during
//! evaluation, and a write to the field (or a structural change to the
//! container) notifies them.
//!
//! # Ownership
//!
//! Watchers hold their Deps strongly; Deps hold their subscribers weakly.
//! A watcher therefore lives exactly as long as its owner keeps a handle,
//! and a dropped watcher can never be notified.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use super::context;
use super::ids::{DepId, WatcherId};
use super::watcher::{Watcher, WatcherInner};

/// A set of subscribers interested in one piece of state.
#[derive(Clone)]
pub struct Dep(Rc<DepInner>);

struct DepInner {
    id: DepId,
    /// Subscribers in subscription order.
    subs: RefCell<IndexMap<WatcherId, Weak<WatcherInner>>>,
}

impl Dep {
    /// Create a dep with no subscribers.
    pub fn new() -> Self {
        Self(Rc::new(DepInner {
            id: DepId::next(),
            subs: RefCell::new(IndexMap::new()),
        }))
    }

    /// Get the dep's unique ID.
    pub fn id(&self) -> DepId {
        self.0.id
    }

    /// The watcher currently evaluating, if any.
    pub fn target() -> Option<Watcher> {
        context::current()
    }

    /// Check whether reads are currently attributed to a watcher.
    pub fn is_tracking() -> bool {
        context::is_tracking()
    }

    /// Append `watcher` to the subscribers if it is not already there.
    pub fn add_sub(&self, watcher: &Watcher) {
        self.0
            .subs
            .borrow_mut()
            .entry(watcher.id())
            .or_insert_with(|| watcher.downgrade());
    }

    /// Remove `watcher` from the subscribers. No-op if absent.
    pub fn remove_sub(&self, watcher: &Watcher) {
        self.remove_sub_id(watcher.id());
    }

    pub(crate) fn remove_sub_id(&self, id: WatcherId) {
        // try_borrow: a watcher dropped while this dep is mid-update has
        // nothing to remove that notify has not already snapshotted.
        if let Ok(mut subs) = self.0.subs.try_borrow_mut() {
            subs.shift_remove(&id);
        }
    }

    /// Register this dep with the current evaluation target.
    ///
    /// The watcher does the bookkeeping so it can dedupe within one pass.
    pub fn depend(&self) {
        if let Some(target) = context::current() {
            target.add_dep(self);
        }
    }

    /// Notify every subscriber that the state behind this dep changed.
    ///
    /// Iterates over a snapshot: subscribers added or removed by an
    /// `update()` do not affect which subscribers this call visits.
    pub fn notify(&self) {
        let subs: Vec<Watcher> = self
            .0
            .subs
            .borrow()
            .values()
            .filter_map(Watcher::upgrade)
            .collect();

        tracing::trace!(target: "trellis", dep = self.0.id.raw(), subscribers = subs.len(), "notify");

        for sub in subs {
            sub.update();
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.0
            .subs
            .borrow()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Ids of live subscribers in notification order.
    pub fn subscriber_ids(&self) -> Vec<WatcherId> {
        self.0
            .subs
            .borrow()
            .iter()
            .filter(|(_, weak)| weak.strong_count() > 0)
            .map(|(id, _)| *id)
            .collect()
    }
}

impl Default for Dep {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Dep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dep")
            .field("id", &self.0.id)
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

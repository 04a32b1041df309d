//! Identifiers for deps and watchers.
//!
//! Both id kinds come from process-wide monotonic counters. Watcher ids double
//! as the flush order: a watcher created inside another computation always
//! gets a larger id than its creator, so sorting the queue by id runs outer
//! computations before inner ones.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a [`Dep`](super::Dep).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DepId(u64);

impl DepId {
    /// Generate a new unique dep ID.
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Unique identifier for a [`Watcher`](super::Watcher).
///
/// Ids are handed out in creation order and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WatcherId(u64);

impl WatcherId {
    /// Generate a new unique watcher ID.
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for WatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watcher_ids_increase_monotonically() {
        let id1 = WatcherId::next();
        let id2 = WatcherId::next();
        let id3 = WatcherId::next();

        assert!(id1 < id2);
        assert!(id2 < id3);
    }

    #[test]
    fn dep_ids_are_unique() {
        let id1 = DepId::next();
        let id2 = DepId::next();

        assert_ne!(id1, id2);
    }
}

//! Global configuration.
//!
//! Configuration is process-wide and read on hot paths (every warning and
//! every flush), so it lives behind a `parking_lot::RwLock` in a lazily
//! initialized static. It can be built in code or parsed from JSON.

use std::sync::OnceLock;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Suppress non-fatal warnings.
    pub silent: bool,

    /// How many times one watcher may re-queue itself within a single flush
    /// before the flush is aborted as an infinite update loop.
    pub max_update_count: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            silent: false,
            max_update_count: 100,
        }
    }
}

impl Config {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(source: &str) -> Result<Self> {
        Ok(serde_json::from_str(source)?)
    }
}

static CONFIG: OnceLock<RwLock<Config>> = OnceLock::new();

fn global() -> &'static RwLock<Config> {
    CONFIG.get_or_init(|| RwLock::new(Config::default()))
}

/// Snapshot of the current configuration.
pub fn config() -> Config {
    global().read().clone()
}

/// Mutate the global configuration in place.
pub fn configure(f: impl FnOnce(&mut Config)) {
    f(&mut global().write());
}

pub(crate) fn is_silent() -> bool {
    global().read().silent
}

pub(crate) fn max_update_count() -> usize {
    global().read().max_update_count
}

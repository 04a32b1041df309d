//! Deep traversal for deep watchers.
//!
//! Reading a field only subscribes to that field. A deep watcher needs every
//! nested field as well, so after its getter returns, the watcher walks the
//! result and reads everything reachable from it.

use std::collections::HashSet;

use super::dep::Dep;
use super::ids::DepId;
use super::value::Value;

#[derive(Default)]
struct Seen {
    observed: HashSet<DepId>,
    plain: HashSet<usize>,
}

impl Seen {
    /// Record a container; returns `false` if it was visited before.
    fn visit(&mut self, dep: Option<&Dep>, addr: usize) -> bool {
        match dep {
            Some(dep) => self.observed.insert(dep.id()),
            None => self.plain.insert(addr),
        }
    }
}

/// Read every field reachable from `value`, depending on each observed
/// container on the way. Frozen objects are skipped. Cycles are visited
/// once.
pub fn traverse(value: &Value) {
    let mut seen = Seen::default();
    walk(value, &mut seen);
}

fn walk(value: &Value, seen: &mut Seen) {
    match value {
        Value::Object(obj) => {
            if obj.is_frozen() {
                return;
            }
            let observer = obj.observer();
            if !seen.visit(observer.as_ref().map(|ob| ob.dep()), obj.addr()) {
                return;
            }
            if let Some(observer) = &observer {
                observer.dep().depend();
            }
            for key in obj.keys() {
                if let Some(child) = obj.get(&key) {
                    walk(&child, seen);
                }
            }
        }
        Value::Array(arr) => {
            let observer = arr.observer();
            if !seen.visit(observer.as_ref().map(|ob| ob.dep()), arr.addr()) {
                return;
            }
            if let Some(observer) = &observer {
                observer.dep().depend();
            }
            for item in arr.to_vec() {
                walk(&item, seen);
            }
        }
        _ => {}
    }
}

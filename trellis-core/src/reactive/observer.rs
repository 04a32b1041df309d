//! Observer Implementation
//!
//! An Observer marks a container as reactive. It is created the first time
//! a container is handed to [`observe`], stored inside the container handle
//! itself, and returned unchanged by every later call.
//!
//! # How Observation Works
//!
//! 1. The observer is attached before anything else happens, so a cyclic
//!    graph reaches the already-attached observer instead of recursing.
//!
//! 2. Objects: every enumerable field becomes a reactive property.
//!
//! 3. Arrays: mutation interception switches on (it keys off the attached
//!    observer) and every element is observed in turn.
//!
//! The observer's own Dep fires when the container changes shape: a key
//! added with [`set`], removed with [`del`], or an array mutated
//! structurally.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use super::array::Array;
use super::context::untracked;
use super::dep::Dep;
use super::object::{define_reactive, Field, Object};
use super::value::Value;
use crate::error::warn;

/// The reactive marker attached to an observed object or array.
#[derive(Clone)]
pub struct Observer(Rc<ObserverInner>);

struct ObserverInner {
    /// Fires when the container itself changes shape.
    dep: Dep,
    /// Number of instances using the container as root data.
    vm_count: Cell<usize>,
}

impl Observer {
    fn new() -> Self {
        Self(Rc::new(ObserverInner {
            dep: Dep::new(),
            vm_count: Cell::new(0),
        }))
    }

    /// The container-level dep.
    pub fn dep(&self) -> &Dep {
        &self.0.dep
    }

    /// Number of instances that own the container as root data.
    pub fn vm_count(&self) -> usize {
        self.0.vm_count.get()
    }

    pub(crate) fn release_root(&self) {
        self.0.vm_count.set(self.0.vm_count.get().saturating_sub(1));
    }

    /// Check whether two handles are the same observer.
    pub fn ptr_eq(a: &Observer, b: &Observer) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }

    /// Make every enumerable field of `obj` reactive.
    fn walk(&self, obj: &Object) {
        for (key, field) in obj.entries() {
            let value = match field {
                Field::Data { value, descriptor } if descriptor.enumerable => value,
                Field::Accessor { get, descriptor, .. } if descriptor.enumerable => {
                    get.map(|get| untracked(|| get())).unwrap_or_default()
                }
                _ => continue,
            };
            define_reactive(obj, &key, value, None);
        }
    }

    /// Observe each value in `items`.
    pub(crate) fn observe_array(&self, items: &[Value]) {
        for item in items {
            observe(item, false);
        }
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("dep", &self.0.dep)
            .field("vm_count", &self.vm_count())
            .finish()
    }
}

thread_local! {
    static SHOULD_CONVERT: Cell<bool> = const { Cell::new(true) };
}

/// Run `f` with conversion switched off: values reached inside `f` that are
/// not observed yet stay plain.
///
/// Used when passing values down as props of a child instance, where the
/// value belongs to the parent and may be deliberately left plain.
pub fn without_conversion<R>(f: impl FnOnce() -> R) -> R {
    convert_within(false, f)
}

/// Run `f` with conversion switched on, whatever the surrounding setting.
pub(crate) fn with_conversion<R>(f: impl FnOnce() -> R) -> R {
    convert_within(true, f)
}

fn convert_within<R>(enabled: bool, f: impl FnOnce() -> R) -> R {
    struct Restore(bool);

    impl Drop for Restore {
        fn drop(&mut self) {
            let previous = self.0;
            let _ = SHOULD_CONVERT.try_with(|flag| flag.set(previous));
        }
    }

    let _restore = Restore(SHOULD_CONVERT.with(|flag| flag.replace(enabled)));
    f()
}

fn should_convert() -> bool {
    SHOULD_CONVERT.with(Cell::get)
}

/// Attach an observer to `value` if it is a container, returning the
/// existing observer when there already is one.
///
/// A new observer is only created while conversion is enabled, and only
/// for extensible containers; objects marked raw are skipped. With
/// `as_root`, the observer's root count is incremented.
pub fn observe(value: &Value, as_root: bool) -> Option<Observer> {
    let observer = match value {
        Value::Object(obj) => obj.observer().or_else(|| {
            (should_convert() && obj.is_extensible() && !obj.is_raw()).then(|| {
                let observer = obj.attach_observer(Observer::new());
                observer.walk(obj);
                observer
            })
        }),
        Value::Array(arr) => arr.observer().or_else(|| {
            (should_convert() && arr.is_extensible()).then(|| {
                let observer = arr.attach_observer(Observer::new());
                observer.observe_array(&arr.to_vec());
                observer
            })
        }),
        _ => return None,
    };

    if as_root {
        if let Some(observer) = &observer {
            observer.0.vm_count.set(observer.0.vm_count.get() + 1);
        }
    }

    observer
}

/// Key for [`set`] and [`del`]: an array index or an object field name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    Index(usize),
    Name(String),
}

impl Key {
    fn name(&self) -> String {
        match self {
            Key::Index(index) => index.to_string(),
            Key::Name(name) => name.clone(),
        }
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Key::Index(index)
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Key::Name(name.to_owned())
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Key::Name(name)
    }
}

/// Set a key on a container, adding it reactively if it is new.
///
/// - Arrays: the array is padded with `Null` up to `index`, then the slot
///   is replaced through `splice`, which notifies.
/// - Existing object keys: a normal assignment.
/// - New keys on root data: refused with a warning.
/// - New keys on observed objects: defined reactive, then the object's
///   container dep notifies.
///
/// Returns the value that was set.
pub fn set(target: &Value, key: impl Into<Key>, value: impl Into<Value>) -> Value {
    let key = key.into();
    let value = value.into();

    match (target, &key) {
        (Value::Array(arr), Key::Index(index)) => {
            set_index(arr, *index, value.clone());
            value
        }
        (Value::Object(obj), _) => {
            let name = key.name();

            if obj.contains_key(&name) {
                obj.set(&name, value.clone());
                return value;
            }

            let observer = obj.observer();
            if observer.as_ref().is_some_and(|ob| ob.vm_count() > 0) {
                warn(format!(
                    "avoid adding reactive property \"{name}\" to root data at runtime; declare it upfront"
                ));
                return value;
            }

            match observer {
                Some(observer) => {
                    define_reactive(obj, &name, value.clone(), None);
                    observer.dep().notify();
                }
                None => obj.set(&name, value.clone()),
            }
            value
        }
        _ => {
            warn(format!(
                "cannot set key {key:?} on a value of type {}",
                target.type_name()
            ));
            value
        }
    }
}

fn set_index(arr: &Array, index: usize, value: Value) {
    let len = arr.len();
    if index > len {
        // Padding goes through splice too, so observers see a single change.
        let padding = std::iter::repeat(Value::Null).take(index - len);
        let mut inserted: Vec<Value> = padding.collect();
        inserted.push(value);
        arr.splice(len, 0, inserted);
    } else {
        arr.splice(index, 1, vec![value]);
    }
}

/// Delete a key from a container and notify if it was observed.
///
/// Array indexes are removed through `splice`. Root data refuses deletion
/// with a warning. Missing and non-configurable keys are left alone.
pub fn del(target: &Value, key: impl Into<Key>) {
    let key = key.into();

    match (target, &key) {
        (Value::Array(arr), Key::Index(index)) => {
            if *index < arr.len() {
                arr.splice(*index, 1, Vec::new());
            }
        }
        (Value::Object(obj), _) => {
            let name = key.name();
            let observer = obj.observer();

            if observer.as_ref().is_some_and(|ob| ob.vm_count() > 0) {
                warn(format!(
                    "avoid deleting property \"{name}\" from root data; set it to null instead"
                ));
                return;
            }

            if !obj.remove_field(&name) {
                return;
            }

            if let Some(observer) = observer {
                observer.dep().notify();
            }
        }
        _ => warn(format!(
            "cannot delete key {key:?} from a value of type {}",
            target.type_name()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn observe_is_idempotent() {
        let value = Value::from(json!({"a": 1}));

        let first = observe(&value, false).unwrap();
        let second = observe(&value, false).unwrap();

        assert!(Observer::ptr_eq(&first, &second));
    }

    #[test]
    fn observe_ignores_scalars() {
        assert!(observe(&Value::from(1), false).is_none());
        assert!(observe(&Value::Null, true).is_none());
    }

    #[test]
    fn observe_walks_nested_graph() {
        let value = Value::from(json!({"user": {"name": "ada"}, "list": [{"id": 1}]}));
        observe(&value, false);

        let root = value.as_object().unwrap();
        let user = root.get("user").unwrap();
        let list = root.get("list").unwrap();
        let first = list.as_array().unwrap().get(0).unwrap();

        assert!(user.observer().is_some());
        assert!(list.observer().is_some());
        assert!(first.observer().is_some());
    }

    #[test]
    fn observe_skips_raw_and_non_extensible() {
        let raw = Object::new();
        raw.mark_raw();
        assert!(observe(&Value::from(raw), false).is_none());

        let sealed = Object::new();
        sealed.prevent_extensions();
        assert!(observe(&Value::from(sealed), false).is_none());
    }

    #[test]
    fn observe_handles_cycles() {
        let obj = Object::new();
        obj.set("me", obj.clone());

        let observer = observe(&Value::from(obj.clone()), false);
        assert!(observer.is_some());

        // Break the cycle so the test does not leak.
        obj.set("me", Value::Null);
    }

    #[test]
    fn root_count_increments() {
        let value = Value::from(json!({}));
        observe(&value, true);
        let observer = observe(&value, true).unwrap();

        assert_eq!(observer.vm_count(), 2);
    }

    #[test]
    fn without_conversion_leaves_values_plain() {
        let value = Value::from(json!({"a": 1}));

        let observer = without_conversion(|| observe(&value, false));
        assert!(observer.is_none());
        assert!(observe(&value, false).is_some());
    }

    #[test]
    fn set_pads_arrays() {
        let value = Value::from(json!([1]));
        set(&value, 3usize, 4);

        assert_eq!(value.to_json(), json!([1, null, null, 4]));
    }

    #[test]
    fn set_refuses_new_root_keys() {
        let value = Value::from(json!({"a": 1}));
        observe(&value, true);

        set(&value, "b", 2);

        assert!(!value.as_object().unwrap().contains_key("b"));
    }

    #[test]
    fn set_on_plain_object_adds_plain_field() {
        let value = Value::from(json!({}));
        set(&value, "a", 1);

        assert_eq!(value.to_json(), json!({"a": 1}));
    }

    #[test]
    fn del_removes_keys_and_indexes() {
        let obj = Value::from(json!({"a": 1, "b": 2}));
        observe(&obj, false);
        del(&obj, "a");
        del(&obj, "missing");
        assert_eq!(obj.to_json(), json!({"b": 2}));

        let arr = Value::from(json!([1, 2, 3]));
        del(&arr, 1usize);
        del(&arr, 9usize);
        assert_eq!(arr.to_json(), json!([1, 3]));
    }
}

//! Reactive Objects
//!
//! An [`Object`] is a shared, insertion-ordered map of fields. A field is
//! one of:
//!
//! - plain data, read and written directly;
//! - an accessor pair supplied by the caller;
//! - a reactive property installed by [`define_reactive`].
//!
//! Reading a reactive property while a watcher evaluates subscribes that
//! watcher; writing a different value notifies every subscriber. Plain
//! fields do neither, which is why assigning a brand-new key with
//! [`Object::set`] is not reactive; use [`set`](super::set) to add a key
//! reactively.

use std::cell::{Cell, OnceCell, RefCell};
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use super::array::Array;
use super::context;
use super::dep::Dep;
use super::observer::{observe, Observer};
use super::value::Value;

/// Getter half of an accessor field.
pub type AccessorGet = Rc<dyn Fn() -> Value>;

/// Setter half of an accessor field.
pub type AccessorSet = Rc<dyn Fn(Value)>;

/// Hook invoked before a reactive property stores a changed value.
pub type CustomSetter = Rc<dyn Fn(&Value)>;

/// Attributes of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    /// The field may be redefined or deleted.
    pub configurable: bool,
    /// The field is listed by [`Object::keys`].
    pub enumerable: bool,
    /// Plain data fields accept writes.
    pub writable: bool,
}

impl Default for Descriptor {
    fn default() -> Self {
        Self {
            configurable: true,
            enumerable: true,
            writable: true,
        }
    }
}

impl Descriptor {
    /// A writable, enumerable field that can never be redefined.
    pub const fn non_configurable() -> Self {
        Self {
            configurable: false,
            enumerable: true,
            writable: true,
        }
    }
}

#[derive(Clone)]
pub(crate) enum Field {
    Data {
        value: Value,
        descriptor: Descriptor,
    },
    Accessor {
        get: Option<AccessorGet>,
        set: Option<AccessorSet>,
        descriptor: Descriptor,
    },
    Reactive(Rc<ReactiveProperty>),
}

impl Field {
    fn descriptor(&self) -> Descriptor {
        match self {
            Field::Data { descriptor, .. } | Field::Accessor { descriptor, .. } => *descriptor,
            Field::Reactive(_) => Descriptor::default(),
        }
    }

    fn read(&self) -> Value {
        match self {
            Field::Data { value, .. } => value.clone(),
            Field::Accessor { get: Some(get), .. } => get(),
            Field::Accessor { get: None, .. } => Value::Null,
            Field::Reactive(prop) => prop.get(),
        }
    }
}

/// A shared handle to a dynamic object.
#[derive(Clone)]
pub struct Object(Rc<ObjectData>);

struct ObjectData {
    fields: RefCell<IndexMap<String, Field>>,
    observer: OnceCell<Observer>,
    extensible: Cell<bool>,
    raw: Cell<bool>,
}

impl Object {
    /// Create an empty object.
    pub fn new() -> Self {
        Self(Rc::new(ObjectData {
            fields: RefCell::new(IndexMap::new()),
            observer: OnceCell::new(),
            extensible: Cell::new(true),
            raw: Cell::new(false),
        }))
    }

    /// Create an object with plain data fields.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let obj = Self::new();
        {
            let mut fields = obj.0.fields.borrow_mut();
            for (key, value) in pairs {
                fields.insert(
                    key.into(),
                    Field::Data {
                        value: value.into(),
                        descriptor: Descriptor::default(),
                    },
                );
            }
        }
        obj
    }

    /// Read a field. Reactive fields register the current watcher.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.field(key).map(|field| field.read())
    }

    /// Assign a field.
    ///
    /// Reactive fields run their setter and notify on change. A missing
    /// key is added as plain data (if the object is extensible) and does
    /// not notify anyone.
    pub fn set(&self, key: &str, value: impl Into<Value>) {
        let value = value.into();

        match self.field(key) {
            Some(Field::Reactive(prop)) => prop.set(value),
            Some(Field::Accessor { set: Some(set), .. }) => set(value),
            Some(Field::Accessor { set: None, .. }) => {}
            Some(Field::Data { descriptor, .. }) => {
                if descriptor.writable {
                    if let Some(Field::Data { value: slot, .. }) =
                        self.0.fields.borrow_mut().get_mut(key)
                    {
                        *slot = value;
                    }
                }
            }
            None => {
                if self.is_extensible() {
                    self.insert_field(
                        key,
                        Field::Data {
                            value,
                            descriptor: Descriptor::default(),
                        },
                    );
                }
            }
        }
    }

    /// Check for an own field, enumerable or not.
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.fields.borrow().contains_key(key)
    }

    /// Enumerable keys in insertion order.
    pub fn keys(&self) -> Vec<String> {
        self.0
            .fields
            .borrow()
            .iter()
            .filter(|(_, field)| field.descriptor().enumerable)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Number of own fields.
    pub fn len(&self) -> usize {
        self.0.fields.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Define or redefine a plain data field.
    ///
    /// Returns `false` if an existing field is non-configurable, or if the
    /// key is new and the object is not extensible.
    pub fn define_property(&self, key: &str, value: impl Into<Value>, descriptor: Descriptor) -> bool {
        if !self.can_define(key) {
            return false;
        }
        self.insert_field(
            key,
            Field::Data {
                value: value.into(),
                descriptor,
            },
        );
        true
    }

    /// Define or redefine an accessor field.
    pub fn define_accessor(
        &self,
        key: &str,
        get: Option<AccessorGet>,
        set: Option<AccessorSet>,
        descriptor: Descriptor,
    ) -> bool {
        if !self.can_define(key) {
            return false;
        }
        self.insert_field(key, Field::Accessor { get, set, descriptor });
        true
    }

    /// Forbid adding new fields. Non-extensible objects are never observed.
    pub fn prevent_extensions(&self) {
        self.0.extensible.set(false);
    }

    pub fn is_extensible(&self) -> bool {
        self.0.extensible.get()
    }

    /// Make the object non-extensible and every field non-configurable.
    /// Data fields also become read-only.
    pub fn freeze(&self) {
        self.prevent_extensions();

        let mut fields = self.0.fields.borrow_mut();
        for field in fields.values_mut() {
            let frozen = match field {
                Field::Data { value, .. } => Field::Data {
                    value: value.clone(),
                    descriptor: Descriptor {
                        configurable: false,
                        enumerable: true,
                        writable: false,
                    },
                },
                Field::Accessor { get, set, descriptor } => Field::Accessor {
                    get: get.clone(),
                    set: set.clone(),
                    descriptor: Descriptor {
                        configurable: false,
                        ..*descriptor
                    },
                },
                Field::Reactive(prop) => {
                    let getter = prop.clone();
                    let setter = prop.clone();
                    Field::Accessor {
                        get: Some(Rc::new(move || getter.get()) as AccessorGet),
                        set: Some(Rc::new(move |value: Value| setter.set(value)) as AccessorSet),
                        descriptor: Descriptor::non_configurable(),
                    }
                }
            };
            *field = frozen;
        }
    }

    /// Check whether [`freeze`](Self::freeze) semantics hold.
    pub fn is_frozen(&self) -> bool {
        !self.is_extensible()
            && self.0.fields.borrow().values().all(|field| match field {
                Field::Data { descriptor, .. } => !descriptor.configurable && !descriptor.writable,
                Field::Accessor { descriptor, .. } => !descriptor.configurable,
                Field::Reactive(_) => false,
            })
    }

    /// Exclude this object from observation.
    pub fn mark_raw(&self) {
        self.0.raw.set(true);
    }

    pub fn is_raw(&self) -> bool {
        self.0.raw.get()
    }

    /// The observer attached to this object, if it has been observed.
    pub fn observer(&self) -> Option<Observer> {
        self.0.observer.get().cloned()
    }

    /// Check whether two handles point to the same object.
    pub fn ptr_eq(a: &Object, b: &Object) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    pub(crate) fn attach_observer(&self, observer: Observer) -> Observer {
        self.0.observer.get_or_init(|| observer).clone()
    }

    pub(crate) fn field(&self, key: &str) -> Option<Field> {
        self.0.fields.borrow().get(key).cloned()
    }

    pub(crate) fn entries(&self) -> Vec<(String, Field)> {
        self.0
            .fields
            .borrow()
            .iter()
            .map(|(key, field)| (key.clone(), field.clone()))
            .collect()
    }

    pub(crate) fn insert_field(&self, key: &str, field: Field) {
        let previous = self.0.fields.borrow_mut().insert(key.to_owned(), field);
        drop(previous);
    }

    /// Remove a configurable field. Returns whether a field was removed.
    pub(crate) fn remove_field(&self, key: &str) -> bool {
        let removed = {
            let mut fields = self.0.fields.borrow_mut();
            match fields.get(key) {
                Some(field) if field.descriptor().configurable => fields.shift_remove(key),
                _ => None,
            }
        };
        removed.is_some()
    }

    fn can_define(&self, key: &str) -> bool {
        match self.0.fields.borrow().get(key) {
            Some(field) => field.descriptor().configurable,
            None => self.is_extensible(),
        }
    }
}

impl Default for Object {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("keys", &self.keys())
            .field("observed", &self.0.observer.get().is_some())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Reactive Properties
// ----------------------------------------------------------------------------

/// State behind one reactive field.
pub(crate) struct ReactiveProperty {
    dep: Dep,
    value: RefCell<Value>,
    /// Observer of the current value, when it is a container.
    child: RefCell<Option<Observer>>,
    getter: Option<AccessorGet>,
    setter: Option<AccessorSet>,
    custom_setter: Option<CustomSetter>,
}

impl ReactiveProperty {
    fn current(&self) -> Value {
        match &self.getter {
            Some(get) => get(),
            None => self.value.borrow().clone(),
        }
    }

    pub(crate) fn get(&self) -> Value {
        let value = self.current();

        if context::is_tracking() {
            self.dep.depend();
            let child = self.child.borrow().clone();
            if let Some(child) = child {
                child.dep().depend();
            }
            if let Value::Array(items) = &value {
                depend_array(items);
            }
        }

        value
    }

    pub(crate) fn set(&self, new_value: Value) {
        let value = self.current();
        if new_value == value || (new_value.is_nan() && value.is_nan()) {
            return;
        }

        if let Some(custom_setter) = &self.custom_setter {
            custom_setter(&new_value);
        }

        match &self.setter {
            Some(set) => set(new_value.clone()),
            None => *self.value.borrow_mut() = new_value.clone(),
        }

        let child = observe(&new_value, false);
        *self.child.borrow_mut() = child;

        self.dep.notify();
    }

    #[cfg(test)]
    pub(crate) fn dep(&self) -> &Dep {
        &self.dep
    }
}

/// Install a reactive property for `key` on `obj`.
///
/// An existing accessor (or an earlier reactive definition) for the key is
/// kept and composed: the new property reads and writes through it. A
/// non-configurable field is left untouched, as is a new key on a
/// non-extensible object.
pub fn define_reactive(obj: &Object, key: &str, value: Value, custom_setter: Option<CustomSetter>) {
    let existing = obj.field(key);

    match &existing {
        Some(field) if !field.descriptor().configurable => {
            tracing::debug!(target: "trellis", key, "property is not configurable, left non-reactive");
            return;
        }
        None if !obj.is_extensible() => {
            tracing::debug!(target: "trellis", key, "object is not extensible, property not added");
            return;
        }
        _ => {}
    }

    let (getter, setter): (Option<AccessorGet>, Option<AccessorSet>) = match existing {
        Some(Field::Accessor { get, set, .. }) => (get, set),
        Some(Field::Reactive(previous)) => {
            let reader = previous.clone();
            (
                Some(Rc::new(move || reader.get()) as AccessorGet),
                Some(Rc::new(move |value| previous.set(value)) as AccessorSet),
            )
        }
        _ => (None, None),
    };

    let child = observe(&value, false);
    let prop = ReactiveProperty {
        dep: Dep::new(),
        value: RefCell::new(value),
        child: RefCell::new(child),
        getter,
        setter,
        custom_setter,
    };

    obj.insert_field(key, Field::Reactive(Rc::new(prop)));
}

/// Depend on every observed element of an array, recursing into nested
/// arrays. Element reads cannot be intercepted, so touching the array
/// touches all of them. Each nested array is visited once, so an array
/// that contains itself terminates.
pub(crate) fn depend_array(items: &Array) {
    let mut visited = HashSet::new();
    visited.insert(items.addr());
    depend_elements(items, &mut visited);
}

fn depend_elements(items: &Array, visited: &mut HashSet<usize>) {
    for item in items.to_vec() {
        if let Some(observer) = item.observer() {
            observer.dep().depend();
        }
        if let Value::Array(nested) = &item {
            if visited.insert(nested.addr()) {
                depend_elements(nested, visited);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Watcher, WatchOptions};

    fn reactive_prop(obj: &Object, key: &str) -> Rc<ReactiveProperty> {
        match obj.field(key) {
            Some(Field::Reactive(prop)) => prop,
            _ => panic!("{key} is not reactive"),
        }
    }

    #[test]
    fn plain_set_adds_non_reactive_field() {
        let obj = Object::new();
        obj.set("a", 1);

        assert_eq!(obj.get("a"), Some(Value::from(1)));
        assert!(matches!(obj.field("a"), Some(Field::Data { .. })));
    }

    #[test]
    fn non_extensible_object_rejects_new_keys() {
        let obj = Object::from_pairs([("a", 1)]);
        obj.prevent_extensions();

        obj.set("b", 2);
        obj.set("a", 3);

        assert!(!obj.contains_key("b"));
        assert_eq!(obj.get("a"), Some(Value::from(3)));
    }

    #[test]
    fn freeze_blocks_writes_and_redefinition() {
        let obj = Object::from_pairs([("a", 1)]);
        obj.freeze();

        obj.set("a", 2);
        assert_eq!(obj.get("a"), Some(Value::from(1)));
        assert!(!obj.define_property("a", 5, Descriptor::default()));
        assert!(obj.is_frozen());
    }

    #[test]
    fn define_reactive_skips_non_configurable() {
        let obj = Object::new();
        obj.define_property("fixed", 1, Descriptor::non_configurable());

        define_reactive(&obj, "fixed", Value::from(1), None);

        assert!(matches!(obj.field("fixed"), Some(Field::Data { .. })));
    }

    #[test]
    fn define_reactive_composes_existing_accessor() {
        let backing = Rc::new(RefCell::new(Value::from(10)));
        let obj = Object::new();

        let read = backing.clone();
        let write = backing.clone();
        obj.define_accessor(
            "x",
            Some(Rc::new(move || read.borrow().clone()) as AccessorGet),
            Some(Rc::new(move |value: Value| *write.borrow_mut() = value) as AccessorSet),
            Descriptor::default(),
        );

        define_reactive(&obj, "x", Value::Null, None);
        assert_eq!(obj.get("x"), Some(Value::from(10)));

        obj.set("x", 20);
        assert_eq!(*backing.borrow(), Value::from(20));
        assert_eq!(obj.get("x"), Some(Value::from(20)));
    }

    #[test]
    fn custom_setter_runs_only_on_change() {
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let obj = Object::new();
        define_reactive(
            &obj,
            "x",
            Value::from(1),
            Some(Rc::new(move |_: &Value| counter.set(counter.get() + 1))),
        );

        obj.set("x", 1);
        obj.set("x", 2);

        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn read_registers_current_watcher_once() {
        let obj = Object::new();
        define_reactive(&obj, "x", Value::from(1), None);

        let reader = obj.clone();
        let watcher = Watcher::new(
            move || {
                reader.get("x");
                reader.get("x");
                Ok(reader.get("x").unwrap_or_default())
            },
            WatchOptions::default(),
        );

        assert_eq!(watcher.dep_count(), 1);
        assert_eq!(reactive_prop(&obj, "x").dep().subscriber_count(), 1);
    }

    #[test]
    fn replacing_container_observes_new_value() {
        let obj = Object::new();
        define_reactive(&obj, "child", Value::Null, None);

        let child = Object::from_pairs([("n", 1)]);
        obj.set("child", child.clone());

        assert!(child.observer().is_some());
        assert!(matches!(child.field("n"), Some(Field::Reactive(_))));
    }

    #[test]
    fn tracked_read_of_self_containing_array_terminates() {
        let list = Array::new();
        list.push(Value::Array(list.clone()));
        let obj = Object::from_pairs([("list", Value::Array(list.clone()))]);
        observe(&Value::Object(obj.clone()), false);

        let reader = obj.clone();
        let watcher = Watcher::new(
            move || {
                let list = reader.get("list").unwrap_or_default();
                Ok(Value::from(list.as_array().map_or(0, |a| a.len())))
            },
            WatchOptions::default().with_sync(),
        );

        // The field dep plus the array's container dep
        assert_eq!(watcher.value(), Value::from(1));
        assert_eq!(watcher.dep_count(), 2);

        list.push(2);
        assert_eq!(watcher.value(), Value::from(2));

        // Break the cycle so the array can be freed.
        list.splice(0, 1, Vec::new());
    }
}

//! Observable Arrays
//!
//! Element reads cannot be tracked individually, so arrays are tracked as a
//! whole: reading a reactive field that holds an array depends on the
//! array's container Dep. The seven structurally mutating operations below
//! notify that Dep once per call and observe any values they insert.
//! Everything else (`get`, `len`, `to_vec`) is a plain read.
//!
//! An array that was never observed mutates silently.

use std::cell::{Cell, OnceCell, RefCell};
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use super::observer::Observer;
use super::value::Value;

/// A shared handle to a dynamic array.
#[derive(Clone)]
pub struct Array(Rc<ArrayData>);

struct ArrayData {
    items: RefCell<Vec<Value>>,
    observer: OnceCell<Observer>,
    extensible: Cell<bool>,
}

impl Array {
    /// Create an empty array.
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    /// Create an array holding `items`.
    pub fn from_vec(items: Vec<Value>) -> Self {
        Self(Rc::new(ArrayData {
            items: RefCell::new(items),
            observer: OnceCell::new(),
            extensible: Cell::new(true),
        }))
    }

    pub fn len(&self) -> usize {
        self.0.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element at `index`.
    pub fn get(&self, index: usize) -> Option<Value> {
        self.0.items.borrow().get(index).cloned()
    }

    /// Snapshot of the elements.
    pub fn to_vec(&self) -> Vec<Value> {
        self.0.items.borrow().clone()
    }

    /// Append a value. Returns the new length.
    pub fn push(&self, value: impl Into<Value>) -> usize {
        let value = value.into();
        let len = {
            let mut items = self.0.items.borrow_mut();
            items.push(value.clone());
            items.len()
        };
        self.mutated(&[value]);
        len
    }

    /// Remove the last element.
    pub fn pop(&self) -> Option<Value> {
        let removed = self.0.items.borrow_mut().pop();
        self.mutated(&[]);
        removed
    }

    /// Remove the first element.
    pub fn shift(&self) -> Option<Value> {
        let removed = {
            let mut items = self.0.items.borrow_mut();
            (!items.is_empty()).then(|| items.remove(0))
        };
        self.mutated(&[]);
        removed
    }

    /// Prepend a value. Returns the new length.
    pub fn unshift(&self, value: impl Into<Value>) -> usize {
        let value = value.into();
        let len = {
            let mut items = self.0.items.borrow_mut();
            items.insert(0, value.clone());
            items.len()
        };
        self.mutated(&[value]);
        len
    }

    /// Remove `delete_count` elements starting at `start` and insert
    /// `inserted` in their place. Both bounds are clamped to the array.
    /// Returns the removed elements.
    pub fn splice(&self, start: usize, delete_count: usize, inserted: Vec<Value>) -> Vec<Value> {
        let removed = {
            let mut items = self.0.items.borrow_mut();
            let start = start.min(items.len());
            let end = start.saturating_add(delete_count).min(items.len());
            items.splice(start..end, inserted.iter().cloned()).collect()
        };
        self.mutated(&inserted);
        removed
    }

    /// Sort by string conversion, the default ordering of dynamic arrays.
    /// `Null` elements sort last.
    pub fn sort(&self) {
        self.sort_by(|a, b| match (a.is_null(), b.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => a.to_string().cmp(&b.to_string()),
        });
    }

    /// Stable sort with a comparator.
    ///
    /// The comparator runs on a snapshot, so it may read this array.
    pub fn sort_by<F>(&self, compare: F)
    where
        F: FnMut(&Value, &Value) -> Ordering,
    {
        let mut items = self.to_vec();
        items.sort_by(compare);
        *self.0.items.borrow_mut() = items;
        self.mutated(&[]);
    }

    /// Reverse the elements in place.
    pub fn reverse(&self) {
        self.0.items.borrow_mut().reverse();
        self.mutated(&[]);
    }

    /// Stop this array from being observed in the future.
    pub fn prevent_extensions(&self) {
        self.0.extensible.set(false);
    }

    pub fn is_extensible(&self) -> bool {
        self.0.extensible.get()
    }

    /// The observer attached to this array, if it has been observed.
    pub fn observer(&self) -> Option<Observer> {
        self.0.observer.get().cloned()
    }

    /// Check whether two handles point to the same array.
    pub fn ptr_eq(a: &Array, b: &Array) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    pub(crate) fn attach_observer(&self, observer: Observer) -> Observer {
        self.0.observer.get_or_init(|| observer).clone()
    }

    /// Observe inserted values and notify the container dep.
    fn mutated(&self, inserted: &[Value]) {
        if let Some(observer) = self.observer() {
            observer.observe_array(inserted);
            observer.dep().notify();
        }
    }
}

impl Default for Array {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Array")
            .field("len", &self.len())
            .field("observed", &self.0.observer.get().is_some())
            .finish()
    }
}

impl FromIterator<Value> for Array {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self::from_vec(iter.into_iter().collect())
    }
}

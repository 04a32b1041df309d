//! Instance State
//!
//! An [`Instance`] wires the reactive primitives together the way a
//! component does: props, data, computed properties and watchers, plus a
//! render watcher once mounted.
//!
//! # Initialization Order
//!
//! 1. Props are validated against their [`PropDef`], absent ones taking
//!    their default, and defined reactive on their own object. On a child
//!    instance, passed prop values belong to the parent, so they are not
//!    converted, and assigning a prop directly warns.
//!
//! 2. Data is observed as root data. Keys that clash with props or start
//!    with `_` or `$` are not reachable through [`Instance::get`].
//!
//! 3. Each computed property gets a lazy watcher. Reading it through the
//!    instance recomputes when dirty and makes the reader depend on the
//!    computed property's own inputs.
//!
//! 4. Watch definitions become user watchers over path expressions.
//!
//! Closures stored on the instance receive it as an argument rather than
//! capturing it, so an instance never keeps itself alive.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use crate::error::{handle_error, warn, ReactiveError, Result};
use crate::props::{validate_prop, PropDef};
use crate::reactive::{
    define_reactive, observe, parse_path, resolve, without_conversion, Callback, CustomSetter,
    Getter, Object, Value, WatchOptions, Watcher,
};

/// Getter of a computed property.
pub type ComputedGetter = Rc<dyn Fn(&Instance) -> Result<Value>>;

/// Setter of a computed property.
pub type ComputedSetter = Rc<dyn Fn(&Instance, Value) -> Result<()>>;

/// Watch handler, called with `(instance, new, old)`.
pub type Handler = Rc<dyn Fn(&Instance, &Value, &Value) -> Result<()>>;

/// Prop names with a meaning of their own.
const RESERVED_PROPS: [&str; 3] = ["key", "ref", "slot"];

/// Definition of a computed property.
#[derive(Clone)]
pub struct ComputedDef {
    get: Option<ComputedGetter>,
    set: Option<ComputedSetter>,
    cache: bool,
}

impl ComputedDef {
    /// A cached computed property.
    pub fn new<F>(get: F) -> Self
    where
        F: Fn(&Instance) -> Result<Value> + 'static,
    {
        Self {
            get: Some(Rc::new(get) as ComputedGetter),
            set: None,
            cache: true,
        }
    }

    /// A computed property with a setter but no getter. Reading it warns
    /// once at setup and yields `Null`.
    pub fn setter_only<S>(set: S) -> Self
    where
        S: Fn(&Instance, Value) -> Result<()> + 'static,
    {
        Self {
            get: None,
            set: Some(Rc::new(set) as ComputedSetter),
            cache: true,
        }
    }

    pub fn with_setter<S>(mut self, set: S) -> Self
    where
        S: Fn(&Instance, Value) -> Result<()> + 'static,
    {
        self.set = Some(Rc::new(set) as ComputedSetter);
        self
    }

    /// Call the getter on every read instead of caching.
    pub fn uncached(mut self) -> Self {
        self.cache = false;
        self
    }
}

struct WatchDef {
    expression: String,
    handler: Handler,
    options: WatchOptions,
}

/// Builder for an [`Instance`].
#[derive(Default)]
pub struct InstanceBuilder {
    /// Declaration and passed value of each prop.
    props: IndexMap<String, (PropDef, Option<Value>)>,
    data: Option<Value>,
    computed: Vec<(String, ComputedDef)>,
    watch: Vec<WatchDef>,
    child: bool,
}

impl InstanceBuilder {
    /// Pass a value for a prop. A prop without a [`PropDef`] accepts any
    /// value.
    pub fn prop(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.props.entry(key.into()).or_default().1 = Some(value.into());
        self
    }

    /// Declare a prop. Declared props that are not passed take their
    /// default.
    pub fn prop_def(mut self, key: impl Into<String>, def: PropDef) -> Self {
        self.props.entry(key.into()).or_default().0 = def;
        self
    }

    /// Root data. Anything other than an object is replaced by an empty
    /// object with a warning.
    pub fn data(mut self, data: impl Into<Value>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn computed(mut self, name: impl Into<String>, def: ComputedDef) -> Self {
        self.computed.push((name.into(), def));
        self
    }

    /// Watch a path expression. A key may have several handlers.
    pub fn watch<H>(mut self, expression: impl Into<String>, handler: H, options: WatchOptions) -> Self
    where
        H: Fn(&Instance, &Value, &Value) -> Result<()> + 'static,
    {
        self.watch.push(WatchDef {
            expression: expression.into(),
            handler: Rc::new(handler),
            options,
        });
        self
    }

    /// Mark the instance as a child, whose props are owned by a parent.
    pub fn child(mut self) -> Self {
        self.child = true;
        self
    }

    pub fn build(self) -> Instance {
        let is_root = !self.child;
        let updating_props = Rc::new(Cell::new(false));

        let props = Object::new();
        let define_props = || {
            let mut defs = IndexMap::new();
            for (key, (def, passed)) in self.props {
                let value = validate_prop(&key, &def, passed);
                if RESERVED_PROPS.contains(&key.as_str()) {
                    warn(format!("\"{key}\" is a reserved attribute and cannot be used as a prop"));
                }
                let setter = prop_setter(&key, is_root, updating_props.clone());
                define_reactive(&props, &key, value, Some(setter));
                defs.insert(key, def);
            }
            defs
        };
        let prop_defs = if is_root {
            define_props()
        } else {
            without_conversion(define_props)
        };

        let data = match self.data {
            None | Some(Value::Null) => Object::new(),
            Some(Value::Object(obj)) => obj,
            Some(other) => {
                warn(format!("data must be an object, got {}", other.type_name()));
                Object::new()
            }
        };
        for key in data.keys() {
            if props.contains_key(&key) {
                warn(format!(
                    "The data property \"{key}\" is already declared as a prop. Use prop default value instead."
                ));
            }
        }
        observe(&Value::Object(data.clone()), true);

        let instance = Instance(Rc::new(InstanceInner {
            is_root,
            props,
            prop_defs,
            data,
            computed: RefCell::new(IndexMap::new()),
            watchers: RefCell::new(Vec::new()),
            render: RefCell::new(None),
            updating_props,
            destroyed: Cell::new(false),
        }));

        for (name, def) in self.computed {
            instance.define_computed(name, def);
        }
        for def in self.watch {
            instance.create_watcher(def.expression, def.handler, def.options);
        }

        tracing::debug!(target: "trellis", root = is_root, "instance initialized");
        instance
    }
}

fn prop_setter(key: &str, is_root: bool, updating: Rc<Cell<bool>>) -> CustomSetter {
    let key = key.to_owned();
    Rc::new(move |_: &Value| {
        if !is_root && !updating.get() {
            warn(format!(
                "Avoid mutating a prop directly since the value will be overwritten whenever \
                 the parent re-renders. Use a data or computed property based on the prop's \
                 value instead. Prop being mutated: \"{key}\""
            ));
        }
    })
}

fn is_reserved(key: &str) -> bool {
    key.starts_with('_') || key.starts_with('$')
}

enum Computed {
    Cached {
        watcher: Watcher,
        set: Option<ComputedSetter>,
    },
    Uncached {
        get: ComputedGetter,
        set: Option<ComputedSetter>,
    },
}

impl Computed {
    fn setter(&self) -> Option<ComputedSetter> {
        match self {
            Computed::Cached { set, .. } | Computed::Uncached { set, .. } => set.clone(),
        }
    }
}

/// A component-style owner of reactive state.
#[derive(Clone)]
pub struct Instance(Rc<InstanceInner>);

struct InstanceInner {
    is_root: bool,
    props: Object,
    prop_defs: IndexMap<String, PropDef>,
    data: Object,
    computed: RefCell<IndexMap<String, Rc<Computed>>>,
    watchers: RefCell<Vec<Watcher>>,
    render: RefCell<Option<Watcher>>,
    updating_props: Rc<Cell<bool>>,
    destroyed: Cell<bool>,
}

/// Stops a watch created with [`Instance::watch`].
pub struct Unwatch {
    watcher: Watcher,
    owner: Weak<InstanceInner>,
}

impl Unwatch {
    /// Tear the watcher down. Later changes no longer reach its handler.
    pub fn unwatch(&self) {
        self.watcher.teardown();
        if let Some(owner) = self.owner.upgrade() {
            let id = self.watcher.id();
            owner.watchers.borrow_mut().retain(|w| w.id() != id);
        }
    }

    /// The underlying watcher.
    pub fn watcher(&self) -> &Watcher {
        &self.watcher
    }
}

impl Instance {
    pub fn builder() -> InstanceBuilder {
        InstanceBuilder::default()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_root
    }

    pub fn is_destroyed(&self) -> bool {
        self.0.destroyed.get()
    }

    /// The props object.
    pub fn props(&self) -> &Object {
        &self.0.props
    }

    /// The root data object.
    pub fn data(&self) -> &Object {
        &self.0.data
    }

    /// Read a prop, data field or computed property, in that order.
    /// Unknown keys yield `Null`.
    pub fn get(&self, key: &str) -> Value {
        if self.0.props.contains_key(key) {
            return self.0.props.get(key).unwrap_or_default();
        }
        if self.proxies_data(key) {
            return self.0.data.get(key).unwrap_or_default();
        }

        let computed = self.0.computed.borrow().get(key).cloned();
        match computed.as_deref() {
            Some(Computed::Cached { watcher, .. }) => {
                watcher.depend();
                watcher.value()
            }
            Some(Computed::Uncached { get, .. }) => get(self).unwrap_or_else(|err| {
                handle_error(&err, &format!("getter for computed property \"{key}\""));
                Value::Null
            }),
            None => Value::Null,
        }
    }

    /// Assign a prop, data field or computed property.
    pub fn set(&self, key: &str, value: impl Into<Value>) {
        let value = value.into();

        if self.0.props.contains_key(key) {
            self.0.props.set(key, value);
            return;
        }
        if self.proxies_data(key) {
            self.0.data.set(key, value);
            return;
        }

        let computed = self.0.computed.borrow().get(key).cloned();
        match computed.map(|c| c.setter()) {
            Some(Some(set)) => {
                if let Err(err) = set(self, value) {
                    handle_error(&err, &format!("setter for computed property \"{key}\""));
                }
            }
            Some(None) => warn(format!(
                "Computed property \"{key}\" was assigned to but it has no setter."
            )),
            None => warn(format!("Property \"{key}\" is not defined on the instance.")),
        }
    }

    /// Assign props the way a parent passes them down: validated, without
    /// the direct mutation warning, and without converting values on a
    /// child.
    pub fn update_props<I, K, V>(&self, props: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        struct Restore(Rc<Cell<bool>>, bool);

        impl Drop for Restore {
            fn drop(&mut self) {
                self.0.set(self.1);
            }
        }

        let flag = &self.0.updating_props;
        let _restore = Restore(flag.clone(), flag.replace(true));

        let assign = || {
            for (key, value) in props {
                let key = key.as_ref();
                if let Some(def) = self.0.prop_defs.get(key) {
                    self.0.props.set(key, validate_prop(key, def, Some(value.into())));
                } else {
                    warn(format!("\"{key}\" is not a declared prop"));
                }
            }
        };
        if self.0.is_root {
            assign();
        } else {
            without_conversion(assign);
        }
    }

    /// Watch a path expression resolved through [`get`](Self::get).
    pub fn watch<H>(&self, expression: &str, handler: H, options: WatchOptions) -> Unwatch
    where
        H: Fn(&Instance, &Value, &Value) -> Result<()> + 'static,
    {
        let watcher = self.create_watcher(expression.to_owned(), Rc::new(handler), options);
        self.unwatch_handle(watcher)
    }

    /// Watch the result of a function.
    pub fn watch_fn<F, H>(&self, getter: F, handler: H, options: WatchOptions) -> Unwatch
    where
        F: Fn(&Instance) -> Result<Value> + 'static,
        H: Fn(&Instance, &Value, &Value) -> Result<()> + 'static,
    {
        let expression = std::any::type_name::<F>().to_owned();
        let getter = self.bind(Rc::new(getter));
        let watcher = self.register(expression, getter, Rc::new(handler), options);
        self.unwatch_handle(watcher)
    }

    /// Create the render watcher. A previous render watcher is torn down.
    pub fn mount<R>(&self, render: R) -> Watcher
    where
        R: Fn(&Instance) -> Result<()> + 'static,
    {
        let getter = self.bind(Rc::new(move |vm: &Instance| -> Result<Value> {
            render(vm)?;
            Ok(Value::Null)
        }));
        let watcher = Watcher::build("render".to_owned(), getter, None, WatchOptions::default());

        if let Some(previous) = self.0.render.replace(Some(watcher.clone())) {
            previous.teardown();
        }
        watcher
    }

    /// Queue the render watcher as if one of its dependencies changed.
    pub fn force_update(&self) {
        let render = self.0.render.borrow().clone();
        if let Some(render) = render {
            render.update();
        }
    }

    /// Tear down every watcher and release the root data.
    pub fn destroy(&self) {
        if self.0.destroyed.replace(true) {
            return;
        }

        if let Some(render) = self.0.render.take() {
            render.teardown();
        }
        for watcher in self.0.watchers.take() {
            watcher.teardown();
        }
        for computed in self.0.computed.borrow().values() {
            if let Computed::Cached { watcher, .. } = computed.as_ref() {
                watcher.teardown();
            }
        }
        if let Some(observer) = self.0.data.observer() {
            observer.release_root();
        }

        tracing::debug!(target: "trellis", "instance destroyed");
    }

    /// Number of live user watchers.
    pub fn watcher_count(&self) -> usize {
        self.0.watchers.borrow().len()
    }

    fn proxies_data(&self, key: &str) -> bool {
        !is_reserved(key) && self.0.data.contains_key(key)
    }

    /// Wrap an instance closure into a watcher getter holding only a weak
    /// reference to the instance.
    fn bind(&self, f: ComputedGetter) -> Getter {
        let owner = Rc::downgrade(&self.0);
        Rc::new(move || match owner.upgrade() {
            Some(inner) => f(&Instance(inner)),
            None => Ok(Value::Null),
        })
    }

    fn define_computed(&self, name: String, def: ComputedDef) {
        if self.0.props.contains_key(&name) {
            warn(format!("The computed property \"{name}\" is already defined as a prop."));
            return;
        }
        if self.0.data.contains_key(&name) {
            warn(format!("The computed property \"{name}\" is already defined in data."));
            return;
        }

        let get = def.get.unwrap_or_else(|| {
            warn(ReactiveError::MissingGetter(name.clone()));
            Rc::new(|_: &Instance| Ok(Value::Null)) as ComputedGetter
        });

        let computed = if def.cache {
            let watcher = Watcher::build(
                name.clone(),
                self.bind(get),
                None,
                WatchOptions::computed(),
            );
            Computed::Cached {
                watcher,
                set: def.set,
            }
        } else {
            Computed::Uncached { get, set: def.set }
        };

        self.0.computed.borrow_mut().insert(name, Rc::new(computed));
    }

    fn create_watcher(&self, expression: String, handler: Handler, options: WatchOptions) -> Watcher {
        let getter = match parse_path(&expression) {
            Some(segments) => self.bind(Rc::new(move |vm: &Instance| -> Result<Value> {
                let Some((first, rest)) = segments.split_first() else {
                    return Ok(Value::Null);
                };
                Ok(resolve(&vm.get(first), rest))
            })),
            None => {
                warn(ReactiveError::InvalidPath(expression.clone()));
                Rc::new(|| Ok(Value::Null)) as Getter
            }
        };
        self.register(expression, getter, handler, options)
    }

    fn register(&self, expression: String, getter: Getter, handler: Handler, options: WatchOptions) -> Watcher {
        let owner = Rc::downgrade(&self.0);
        let callback: Callback = Rc::new(move |new: &Value, old: &Value| match owner.upgrade() {
            Some(inner) => handler(&Instance(inner), new, old),
            None => Ok(()),
        });

        let options = WatchOptions {
            user: true,
            ..options
        };
        let watcher = Watcher::build(expression, getter, Some(callback), options);
        self.0.watchers.borrow_mut().push(watcher.clone());
        watcher
    }

    fn unwatch_handle(&self, watcher: Watcher) -> Unwatch {
        Unwatch {
            watcher,
            owner: Rc::downgrade(&self.0),
        }
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("root", &self.0.is_root)
            .field("props", &self.0.props.keys())
            .field("data", &self.0.data.keys())
            .field("computed", &self.0.computed.borrow().keys().collect::<Vec<_>>())
            .field("watchers", &self.0.watchers.borrow().len())
            .field("destroyed", &self.0.destroyed.get())
            .finish()
    }
}

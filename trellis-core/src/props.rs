//! Prop Definitions
//!
//! A prop may declare the types it accepts, a default, whether it must be
//! passed, and a custom validator. [`validate_prop`] resolves the value an
//! instance stores for a prop; [`assert_prop`] checks a value against its
//! definition.
//!
//! Boolean props are cast: an absent boolean prop without a default becomes
//! `false`, and an empty string or the prop's hyphenated name becomes
//! `true`, unless the prop also accepts strings.

use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::{warn, ReactiveError, Result};
use crate::reactive::{observe, with_conversion, Value};

/// A type a prop value can be checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl PropType {
    /// Check whether `value` is of this type.
    pub fn matches(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (PropType::String, Value::String(_))
                | (PropType::Number, Value::Number(_))
                | (PropType::Boolean, Value::Bool(_))
                | (PropType::Object, Value::Object(_))
                | (PropType::Array, Value::Array(_))
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            PropType::String => "String",
            PropType::Number => "Number",
            PropType::Boolean => "Boolean",
            PropType::Object => "Object",
            PropType::Array => "Array",
        }
    }
}

impl fmt::Display for PropType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Produces the default value of an absent prop.
pub type PropDefault = Rc<dyn Fn() -> Value>;

/// Custom check run on a prop value after its type matched.
pub type PropValidator = Rc<dyn Fn(&Value) -> bool>;

/// Declaration of one prop.
#[derive(Clone, Default)]
pub struct PropDef {
    types: Vec<PropType>,
    default: Option<PropDefault>,
    required: bool,
    validator: Option<PropValidator>,
}

impl PropDef {
    /// A prop accepting any value.
    pub fn new() -> Self {
        Self::default()
    }

    /// A prop accepting values of `ty`.
    pub fn of_type(ty: PropType) -> Self {
        Self::new().or_type(ty)
    }

    /// Also accept values of `ty`.
    pub fn or_type(mut self, ty: PropType) -> Self {
        if !self.types.contains(&ty) {
            self.types.push(ty);
        }
        self
    }

    /// Value used when the prop is absent. The factory runs for every
    /// instance, so containers are never shared between instances.
    pub fn with_default<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Value + 'static,
    {
        self.default = Some(Rc::new(factory));
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Value) -> bool + 'static,
    {
        self.validator = Some(Rc::new(validator));
        self
    }

    pub fn accepts(&self, ty: PropType) -> bool {
        self.types.contains(&ty)
    }

    pub fn is_required(&self) -> bool {
        self.required
    }
}

impl fmt::Debug for PropDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropDef")
            .field("types", &self.types)
            .field("default", &self.default.is_some())
            .field("required", &self.required)
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

/// Resolve the value stored for prop `key` from the value passed by the
/// parent, if any.
///
/// An absent prop takes its default, which is observed even while
/// conversion is switched off: the default is created for this instance
/// and belongs to nobody else. A value failing [`assert_prop`] is warned
/// about and stored anyway.
pub fn validate_prop(key: &str, def: &PropDef, passed: Option<Value>) -> Value {
    let absent = passed.is_none();
    let mut passed = passed;

    if def.accepts(PropType::Boolean) {
        if absent && def.default.is_none() {
            passed = Some(Value::Bool(false));
        } else if !def.accepts(PropType::String) {
            if let Some(Value::String(s)) = &passed {
                if s.is_empty() || *s == hyphenate(key) {
                    passed = Some(Value::Bool(true));
                }
            }
        }
    }

    let value = match passed {
        Some(value) => value,
        None => {
            let value = def.default.as_ref().map_or(Value::Null, |factory| factory());
            with_conversion(|| observe(&value, false));
            value
        }
    };

    if let Err(err) = assert_prop(key, def, &value, absent) {
        warn(err);
    }
    value
}

/// Check `value` against the declaration of prop `key`.
///
/// A missing required prop fails. Otherwise `Null` passes for optional
/// props, then the declared types and the custom validator are checked in
/// that order.
pub fn assert_prop(key: &str, def: &PropDef, value: &Value, absent: bool) -> Result<()> {
    if def.required && absent {
        return Err(ReactiveError::MissingProp(key.to_owned()));
    }
    if value.is_null() && !def.required {
        return Ok(());
    }

    if !def.types.is_empty() && !def.types.iter().any(|ty| ty.matches(value)) {
        let expected: Vec<&str> = def.types.iter().map(PropType::name).collect();
        return Err(ReactiveError::PropType {
            name: key.to_owned(),
            expected: expected.join(", "),
            got: type_label(value).to_owned(),
        });
    }

    if let Some(validator) = &def.validator {
        if !validator(value) {
            return Err(ReactiveError::PropValidator(key.to_owned()));
        }
    }
    Ok(())
}

fn type_label(value: &Value) -> &'static str {
    match value {
        Value::Null => "Null",
        Value::Bool(_) => "Boolean",
        Value::Number(_) => "Number",
        Value::String(_) => "String",
        Value::Object(_) => "Object",
        Value::Array(_) => "Array",
    }
}

/// `isActive` -> `is-active`
fn hyphenate(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 2);
    let mut previous = None;
    for c in key.chars() {
        if c.is_ascii_uppercase() && previous.is_some_and(|p| p != '-') {
            out.push('-');
        }
        out.push(c.to_ascii_lowercase());
        previous = Some(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{without_conversion, Array};
    use serde_json::json;

    #[test]
    fn boolean_props_are_cast() {
        let flag = PropDef::of_type(PropType::Boolean);

        assert_eq!(validate_prop("isActive", &flag, None), Value::Bool(false));
        assert_eq!(validate_prop("isActive", &flag, Some(Value::from(""))), Value::Bool(true));
        assert_eq!(validate_prop("isActive", &flag, Some(Value::from("is-active"))), Value::Bool(true));

        let either = PropDef::of_type(PropType::Boolean).or_type(PropType::String);
        assert_eq!(validate_prop("isActive", &either, Some(Value::from(""))), Value::from(""));
    }

    #[test]
    fn default_is_fresh_and_observed_without_conversion() {
        let def = PropDef::of_type(PropType::Array).with_default(|| Value::from(json!([1, 2])));

        let first = without_conversion(|| validate_prop("items", &def, None));
        let second = without_conversion(|| validate_prop("items", &def, None));

        assert!(first.observer().is_some());
        let (Some(a), Some(b)) = (first.as_array(), second.as_array()) else {
            panic!("defaults should be arrays");
        };
        assert!(!Array::ptr_eq(a, b));
    }

    #[test]
    fn passed_values_win_over_defaults() {
        let def = PropDef::of_type(PropType::Number).with_default(|| Value::from(1));
        assert_eq!(validate_prop("size", &def, Some(Value::from(7))), Value::from(7));
        assert_eq!(validate_prop("size", &def, None), Value::from(1));
    }

    #[test]
    fn missing_required_prop_fails() {
        let def = PropDef::of_type(PropType::String).required();
        let err = assert_prop("title", &def, &Value::Null, true).unwrap_err();

        assert!(matches!(err, ReactiveError::MissingProp(_)));
        assert_eq!(err.to_string(), "missing required prop: \"title\"");
    }

    #[test]
    fn type_mismatch_lists_expected_types() {
        let def = PropDef::of_type(PropType::Number).or_type(PropType::String);
        let err = assert_prop("size", &def, &Value::Bool(true), false).unwrap_err();

        assert_eq!(
            err.to_string(),
            "invalid prop: type check failed for prop \"size\". Expected Number, String, got Boolean"
        );
        assert!(assert_prop("size", &def, &Value::from("large"), false).is_ok());
    }

    #[test]
    fn null_passes_optional_props() {
        let def = PropDef::of_type(PropType::Object);
        assert!(assert_prop("config", &def, &Value::Null, false).is_ok());
        assert!(assert_prop("config", &def.required(), &Value::Null, false).is_err());
    }

    #[test]
    fn validator_runs_after_type_check() {
        let def = PropDef::of_type(PropType::Number).with_validator(|v| v.as_f64().is_some_and(|n| n > 0.0));

        assert!(assert_prop("count", &def, &Value::from(3), false).is_ok());
        assert!(matches!(
            assert_prop("count", &def, &Value::from(-1), false),
            Err(ReactiveError::PropValidator(_))
        ));
        assert!(matches!(
            assert_prop("count", &def, &Value::from("3"), false),
            Err(ReactiveError::PropType { .. })
        ));
    }

    #[test]
    fn hyphenates_camel_case() {
        assert_eq!(hyphenate("isActive"), "is-active");
        assert_eq!(hyphenate("maxItemCount"), "max-item-count");
        assert_eq!(hyphenate("Label"), "label");
    }
}
